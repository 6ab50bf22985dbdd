//! Local command server: editors ask the viewer to jump to a source line.
//!
//! One Unix socket, one JSON object per connection, no response:
//!
//! ```text
//! {"action":"sync","line":42,"file":"chapter1.tex"}
//! ```
//!
//! Connections are handled one at a time on the accept thread. Anything that
//! fails to parse is dropped and the loop keeps accepting.

use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::synctex::{PositionResolver, SyncResult};

/// How often an idle accept loop checks for shutdown.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub read_timeout: Duration,
    pub max_request_bytes: usize,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Sync {
        line: u32,
        #[serde(rename = "file")]
        source_file: String,
    },
}

/// Receiver of resolved sync positions.
pub trait SyncTarget: Send + Sync {
    fn sync_to(&self, result: SyncResult);
}

pub struct CommandServer {
    config: ServerConfig,
}

impl CommandServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind the socket (replacing a stale one) and start the accept thread.
    pub fn start<R, T>(self, resolver: R, target: Arc<T>) -> anyhow::Result<ServerHandle>
    where
        R: PositionResolver + 'static,
        T: SyncTarget + ?Sized + 'static,
    {
        let path = self.config.socket_path.clone();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => info!("server: removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()));
            }
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("failed to bind {}", path.display()))?;
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o600)) {
            warn!("server: chmod 600 {}: {e}", path.display());
        }
        // accept() must not block, or shutdown could not stop the loop.
        listener
            .set_nonblocking(true)
            .context("failed to make the listener non-blocking")?;
        let inode = fs::symlink_metadata(&path)
            .map(|m| (m.dev(), m.ino()))
            .with_context(|| format!("failed to stat {}", path.display()))?;
        info!("server: listening on {}", path.display());

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let config = self.config;
        let thread = thread::Builder::new()
            .name("command-server".into())
            .spawn(move || accept_loop(listener, &config, &thread_stop, &resolver, &*target))
            .context("failed to spawn command server thread")?;

        Ok(ServerHandle {
            path,
            inode,
            stop,
            thread: Some(thread),
        })
    }
}

/// Running server. Dropping it stops the loop and removes the socket file.
pub struct ServerHandle {
    path: PathBuf,
    /// (dev, ino) of the socket file this server created.
    inode: (u64, u64),
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn shutdown(mut self) {
        self.stop_and_cleanup();
    }

    fn stop_and_cleanup(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        let _ = thread.join();

        // Another instance may have replaced the file since; leave theirs alone.
        match fs::symlink_metadata(&self.path) {
            Ok(m) if (m.dev(), m.ino()) == self.inode => match fs::remove_file(&self.path) {
                Ok(()) => info!("server: removed {}", self.path.display()),
                Err(e) => debug!("server: remove {}: {e}", self.path.display()),
            },
            Ok(_) => info!("server: {} now belongs to another instance", self.path.display()),
            Err(e) => debug!("server: stat {}: {e}", self.path.display()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop_and_cleanup();
    }
}

fn accept_loop<R, T>(
    listener: UnixListener,
    config: &ServerConfig,
    stop: &AtomicBool,
    resolver: &R,
    target: &T,
) where
    R: PositionResolver,
    T: SyncTarget + ?Sized,
{
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                // Accepted sockets inherit O_NONBLOCK on some platforms.
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("server: set_nonblocking: {e}");
                    continue;
                }
                handle_connection(stream, config, resolver, target);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("server: accept failed: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("server: accept loop exited");
}

fn handle_connection<R, T>(mut stream: UnixStream, config: &ServerConfig, resolver: &R, target: &T)
where
    R: PositionResolver,
    T: SyncTarget + ?Sized,
{
    if let Err(e) = stream.set_read_timeout(Some(config.read_timeout)) {
        warn!("server: set_read_timeout: {e}");
    }
    let buf = match read_request(&mut stream, config.max_request_bytes) {
        Ok(buf) => buf,
        Err(e) => {
            debug!("server: read failed: {e}");
            return;
        }
    };

    match serde_json::from_slice::<Command>(&buf) {
        Ok(Command::Sync { line, source_file }) => {
            debug!("server: sync {source_file}:{line}");
            match resolver.resolve(line, &source_file) {
                Ok(result) => target.sync_to(result),
                Err(e) => debug!("server: sync unavailable: {e}"),
            }
        }
        Err(e) => debug!("server: discarding request ({} bytes): {e}", buf.len()),
    }
    // stream dropped here: the connection is closed whatever happened
}

/// Read one JSON value, stopping at EOF, at `max` bytes, or as soon as the
/// bytes read so far form a complete value (clients need not half-close).
fn read_request(stream: &mut impl Read, max: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while buf.len() < max {
        let want = chunk.len().min(max - buf.len());
        let n = match stream.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Timed out mid-request: parse what arrived.
            Err(_) if !buf.is_empty() => break,
            Err(e) => return Err(e),
        };
        buf.extend_from_slice(&chunk[..n]);
        if serde_json::from_slice::<serde::de::IgnoredAny>(&buf).is_ok() {
            break;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_command() {
        let cmd: Command =
            serde_json::from_str(r#"{"action":"sync","line":42,"file":"ch1.tex"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Sync {
                line: 42,
                source_file: "ch1.tex".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(serde_json::from_str::<Command>(r#"{"action":"noop"}"#).is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(serde_json::from_str::<Command>(r#"{"action":"sync","line":3}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"action":"sync","line":-3,"file":"a"}"#).is_err());
    }

    /// Sends one request and then never reaches EOF.
    struct HeldOpen {
        sent: bool,
    }

    impl Read for HeldOpen {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            assert!(!self.sent, "read past a complete request");
            self.sent = true;
            let req = br#"{"action":"sync","line":1,"file":"a"}"#;
            out[..req.len()].copy_from_slice(req);
            Ok(req.len())
        }
    }

    #[test]
    fn read_stops_at_complete_value() {
        let buf = read_request(&mut HeldOpen { sent: false }, 4096).unwrap();
        assert!(serde_json::from_slice::<Command>(&buf).is_ok());
    }

    #[test]
    fn read_is_capped() {
        let big = vec![b'['; 10_000];
        let buf = read_request(&mut big.as_slice(), 4096).unwrap();
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn read_until_eof_for_garbage() {
        let mut input: &[u8] = b"not json";
        let buf = read_request(&mut input, 4096).unwrap();
        assert_eq!(buf, b"not json");
    }
}
