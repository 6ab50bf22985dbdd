//! Terminal document viewer with Kitty Graphics Protocol
//!
//! Three activities drive one `Viewport` concurrently:
//!   - this thread: key events → scroll / reload / page jumps
//!   - the file watcher's thread: document changed → reload + draw
//!   - the command server's thread: sync request → resolve → jump
//!
//! Layout:
//!   rows 0..term_rows-1 : current page image, placed at y = -scroll_y
//!   row term_rows-1     : status bar

mod input;
mod state;
mod terminal;
mod viewport;
mod worker;

pub use state::{Document, ScrollUpPolicy, ViewportState};
pub use terminal::{Layout, Screen, compute_layout};
pub use viewport::{Viewport, ViewportError, ViewportOptions};

use anyhow::Context;
use crossterm::{
    event::{self, Event},
    terminal as crossterm_terminal,
};
use log::{debug, info, warn};
use std::io::stdout;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::render::PopplerRenderer;
use crate::server::{CommandServer, ServerConfig};
use crate::synctex::SyncMapper;
use crate::watch::FileWatcher;

use input::{Action, InputAccumulator, map_key_event};

/// Run the terminal viewer on `doc_path` until the user quits.
pub fn run(doc_path: &Path, config: Config, watch: bool) -> anyhow::Result<()> {
    terminal::check_tty()?;

    let (term_cols, term_rows) =
        crossterm_terminal::size().context("failed to get terminal size")?;

    let renderer = PopplerRenderer::new(config.render.pdfinfo.clone(), config.render.pdftoppm.clone());
    // Detached until raw mode is on: nothing may draw on the main screen.
    let screen = Screen::detached(Box::new(stdout()), compute_layout(term_cols, term_rows));
    let viewport = Arc::new(Viewport::open(
        doc_path,
        Box::new(renderer),
        screen,
        ViewportOptions {
            zoom: config.zoom,
            scroll_up: config.viewer.scroll_up,
        },
    )?);

    // raw mode + alternate screen until we return
    let mut guard = terminal::RawGuard::enter()?;

    let server = CommandServer::new(ServerConfig {
        socket_path: config.sync.socket.clone(),
        read_timeout: config.sync.read_timeout,
        max_request_bytes: config.sync.max_request_bytes,
    })
    .start(SyncMapper::new(config.sync.program.clone(), doc_path), Arc::clone(&viewport))?;

    let watcher = if watch {
        match FileWatcher::new(doc_path, Arc::clone(&viewport)) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("viewer: file watching disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    if let Err(e) = viewport.attach() {
        warn!("viewer: initial draw failed: {e}");
    }

    let step = i64::from(config.viewer.scroll_step);
    let mut acc = InputAccumulator::new();
    let result = loop {
        let ev = match event::read() {
            Ok(ev) => ev,
            Err(e) => break Err(anyhow::Error::from(e)),
        };
        debug!("event: {:?}", ev);

        let drawn = match ev {
            Event::Key(key_event) => {
                // Flash messages last until the next key press.
                let had_flash = viewport.clear_flash();
                match map_key_event(key_event, &mut acc) {
                    Some(Action::Quit) => break Ok(()),
                    Some(Action::ScrollDown(count)) => viewport.scroll(i64::from(count) * step),
                    Some(Action::ScrollUp(count)) => viewport.scroll(-i64::from(count) * step),
                    Some(Action::Reload) => {
                        // A failed reload leaves its message on the status bar.
                        let _ = viewport.reload();
                        viewport.draw()
                    }
                    Some(Action::FirstPage) => viewport.goto_page(0),
                    Some(Action::LastPage) => viewport.goto_page(viewport.page_count().saturating_sub(1)),
                    Some(Action::GotoPage(n)) => viewport.goto_page((n as usize).saturating_sub(1)),
                    Some(Action::CancelInput) | Some(Action::Digit) if had_flash => viewport.draw(),
                    Some(Action::CancelInput) | Some(Action::Digit) => Ok(()),
                    None => {
                        // Unknown key: reset accumulator
                        acc.reset();
                        if had_flash { viewport.draw() } else { Ok(()) }
                    }
                }
            }
            Event::Resize(new_cols, new_rows) => {
                debug!("resize: {new_cols}x{new_rows}");
                viewport.resize(compute_layout(new_cols, new_rows))
            }
            _ => Ok(()),
        };
        if let Err(e) = drawn {
            warn!("viewer: {e}");
        }
    };

    info!("viewer: shutting down");
    drop(watcher);
    server.shutdown();
    guard.cleanup();
    result
}
