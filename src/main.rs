use std::path::PathBuf;

use clap::{CommandFactory, Parser};

use syncview::config;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SYNCVIEW_BUILD_GIT_HASH"),
    " ",
    env!("SYNCVIEW_BUILD_PROFILE"),
    ")"
);

#[derive(Parser)]
#[command(
    name = "syncview",
    version,
    long_version = LONG_VERSION,
    about = "Terminal document viewer that follows your editor (Kitty graphics + SyncTeX)"
)]
struct Cli {
    /// Document to display (PDF)
    document: Option<PathBuf>,

    /// Socket path for editor sync requests
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Zoom factor (1.0 = 72 pixels per inch)
    #[arg(long)]
    zoom: Option<f64>,

    /// Disable automatic reload when the document changes
    #[arg(long)]
    no_watch: bool,

    /// Log output file path (enables logging when specified)
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(log_path) = &cli.log {
        match std::fs::File::create(log_path) {
            Ok(file) => env_logger::Builder::from_default_env()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init(),
            Err(e) => {
                eprintln!("Error: failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        }
    }
    // no --log → logger not initialized (the alternate screen must stay clean)

    let Some(document) = cli.document else {
        eprintln!("{}", Cli::command().render_usage());
        std::process::exit(1);
    };

    // Load config file and merge CLI overrides
    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    cfg.merge_cli(cli.zoom, cli.socket);

    let result = cfg
        .resolve()
        .and_then(|config| syncview::viewer::run(&document, config, !cli.no_watch));

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
