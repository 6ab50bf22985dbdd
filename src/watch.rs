//! File watcher: tells a listener when the document changes on disk.
//!
//! notify::RecommendedWatcher runs its callback on an internal thread; the
//! listener is invoked right there, so it must be `Send + Sync`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::debug;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Something that reacts to the watched document changing.
pub trait DocumentListener: Send + Sync {
    fn on_document_changed(&self, path: &Path);
}

pub struct FileWatcher {
    _watcher: RecommendedWatcher, // Drop stops watching
}

impl FileWatcher {
    /// Watch `path` and notify `listener` on every write to it.
    ///
    /// Linux inotify loses the watch on rename (atomic save), so we watch
    /// the parent directory (NonRecursive) and filter events by path.
    pub fn new<L>(path: &Path, listener: Arc<L>) -> Result<Self>
    where
        L: DocumentListener + ?Sized + 'static,
    {
        let canonical = path.canonicalize()?;
        let target = canonical.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                if is_change_to(&event, &target) {
                    debug!("watch: {:?} on {}", event.kind, target.display());
                    listener.on_document_changed(&target);
                }
            },
            notify::Config::default(),
        )?;
        let parent = canonical
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cannot watch root path"))?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        Ok(Self { _watcher: watcher })
    }
}

/// A write to, or an atomic replace of, `target`.
fn is_change_to(event: &notify::Event, target: &Path) -> bool {
    let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    relevant && event.paths.iter().any(|p| p == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> notify::Event {
        notify::Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn modify_and_create_count() {
        let target = PathBuf::from("/tmp/doc.pdf");
        assert!(is_change_to(
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), "/tmp/doc.pdf"),
            &target
        ));
        assert!(is_change_to(
            &event(EventKind::Create(CreateKind::File), "/tmp/doc.pdf"),
            &target
        ));
    }

    #[test]
    fn other_files_and_reads_are_ignored() {
        let target = PathBuf::from("/tmp/doc.pdf");
        assert!(!is_change_to(
            &event(EventKind::Modify(ModifyKind::Any), "/tmp/doc.aux"),
            &target
        ));
        assert!(!is_change_to(
            &event(EventKind::Access(AccessKind::Any), "/tmp/doc.pdf"),
            &target
        ));
    }

    struct Forward(Mutex<mpsc::Sender<PathBuf>>);

    impl DocumentListener for Forward {
        fn on_document_changed(&self, path: &Path) {
            let _ = self.0.lock().unwrap().send(path.to_path_buf());
        }
    }

    #[test]
    fn write_notifies_listener() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.pdf");
        std::fs::write(&doc, b"v1").unwrap();

        let (tx, rx) = mpsc::channel();
        let _watcher = FileWatcher::new(&doc, Arc::new(Forward(Mutex::new(tx)))).unwrap();
        std::fs::write(&doc, b"v2").unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, doc.canonicalize().unwrap());
    }
}
