//! Dedicated rendering thread.
//!
//! The renderer is slow (it shells out and rasterizes), so it lives on its own
//! thread. Callers send a request carrying a reply channel and block on the
//! reply; the viewport state lock is never held across that wait.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error};

use crate::render::{DocumentInfo, Pixmap, RenderError, Renderer};

enum RenderRequest {
    Load {
        path: PathBuf,
        reply: mpsc::Sender<Result<DocumentInfo, RenderError>>,
    },
    Render {
        page: usize,
        zoom: f64,
        reply: mpsc::Sender<Result<Pixmap, RenderError>>,
    },
}

pub struct RenderWorker {
    tx: Option<mpsc::Sender<RenderRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    pub fn spawn(mut renderer: Box<dyn Renderer>) -> Self {
        let (tx, rx) = mpsc::channel::<RenderRequest>();
        let handle = thread::Builder::new()
            .name("render-worker".into())
            .spawn(move || {
                debug!("render worker: started");
                // FIFO: requests are served strictly in arrival order.
                while let Ok(req) = rx.recv() {
                    let start = Instant::now();
                    match req {
                        RenderRequest::Load { path, reply } => {
                            let res = renderer.load(&path);
                            if let Err(e) = &res {
                                error!("render worker: {e}");
                            }
                            let _ = reply.send(res);
                        }
                        RenderRequest::Render { page, zoom, reply } => {
                            let res = renderer.render_page(page, zoom);
                            if let Err(e) = &res {
                                error!("render worker: {e}");
                            }
                            let _ = reply.send(res);
                        }
                    }
                    debug!(
                        "render worker: request done in {:.1}ms",
                        start.elapsed().as_secs_f64() * 1000.0
                    );
                }
                debug!("render worker: channel closed, exiting");
            });

        match handle {
            Ok(handle) => Self {
                tx: Some(tx),
                handle: Some(handle),
            },
            Err(e) => {
                // Requests will fail with WorkerGone.
                error!("render worker: failed to spawn: {e}");
                Self { tx: None, handle: None }
            }
        }
    }

    fn call<T>(
        &self,
        make: impl FnOnce(mpsc::Sender<Result<T, RenderError>>) -> RenderRequest,
    ) -> Result<T, RenderError> {
        let tx = self.tx.as_ref().ok_or(RenderError::WorkerGone)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        tx.send(make(reply_tx)).map_err(|_| RenderError::WorkerGone)?;
        reply_rx.recv().map_err(|_| RenderError::WorkerGone)?
    }

    pub fn load(&self, path: &Path) -> Result<DocumentInfo, RenderError> {
        self.call(|reply| RenderRequest::Load {
            path: path.to_path_buf(),
            reply,
        })
    }

    pub fn render(&self, page: usize, zoom: f64) -> Result<Pixmap, RenderError> {
        self.call(|reply| RenderRequest::Render { page, zoom, reply })
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitty::PixelFormat;

    struct Recorder {
        calls: mpsc::Sender<String>,
    }

    impl Renderer for Recorder {
        fn load(&mut self, path: &Path) -> Result<DocumentInfo, RenderError> {
            let _ = self.calls.send(format!("load {}", path.display()));
            if path.ends_with("broken.pdf") {
                return Err(RenderError::DocumentLoad {
                    path: path.to_path_buf(),
                    reason: "broken".into(),
                });
            }
            Ok(DocumentInfo {
                page_sizes_pt: vec![(10.0, 10.0)],
            })
        }

        fn render_page(&mut self, index: usize, _zoom: f64) -> Result<Pixmap, RenderError> {
            let _ = self.calls.send(format!("render {index}"));
            Ok(Pixmap {
                width: 1,
                height: 1,
                format: PixelFormat::Rgb,
                data: vec![0, 0, 0],
            })
        }
    }

    #[test]
    fn requests_are_served_in_order() {
        let (calls_tx, calls_rx) = mpsc::channel();
        let worker = RenderWorker::spawn(Box::new(Recorder { calls: calls_tx }));
        worker.load(Path::new("a.pdf")).unwrap();
        worker.render(0, 1.0).unwrap();
        worker.render(3, 1.0).unwrap();
        drop(worker);
        let calls: Vec<String> = calls_rx.iter().collect();
        assert_eq!(calls, vec!["load a.pdf", "render 0", "render 3"]);
    }

    #[test]
    fn errors_are_returned_to_caller() {
        let (calls_tx, _calls_rx) = mpsc::channel();
        let worker = RenderWorker::spawn(Box::new(Recorder { calls: calls_tx }));
        let err = worker.load(Path::new("broken.pdf")).unwrap_err();
        assert!(matches!(err, RenderError::DocumentLoad { .. }));
        // Worker survives a failed request.
        assert!(worker.render(0, 1.0).is_ok());
    }
}
