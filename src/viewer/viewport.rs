//! Viewport controller: owns the viewport state and materializes it on screen.
//!
//! Two locks:
//!   - `shared` guards `ViewportState` + document geometry. Held only for field
//!     reads/writes, never across a render.
//!   - `screen` is the present lock. Every draw holds it from start to finish,
//!     so the frames of one draw (clear → transmit → place → status) are never
//!     interleaved with another draw's.
//!
//! `epoch` is bumped whenever a mutation makes the in-flight image stale. A
//! draw whose render was superseded starts over instead of clearing `dirty`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::state::{Document, ScrollUpPolicy, ViewportState};
use super::terminal::{Layout, Screen, StatusLine};
use super::worker::RenderWorker;
use crate::kitty::{EncodingError, ImageHandle, KittyEncoder};
use crate::render::{RenderError, Renderer};
use crate::server::SyncTarget;
use crate::synctex::SyncResult;
use crate::watch::DocumentListener;

#[derive(Debug, thiserror::Error)]
pub enum ViewportError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("terminal write failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ViewportOptions {
    pub zoom: f64,
    pub scroll_up: ScrollUpPolicy,
}

struct Shared {
    view: ViewportState,
    doc: Document,
    epoch: u64,
    flash: Option<String>,
}

pub struct Viewport {
    path: PathBuf,
    filename: String,
    scroll_up: ScrollUpPolicy,
    shared: Mutex<Shared>,
    screen: Mutex<Screen>,
    worker: RenderWorker,
    encoder: KittyEncoder,
    image_id: u32,
}

impl Viewport {
    /// Load the document and set up the viewport on page 1. Nothing is drawn yet.
    pub fn open(
        path: &Path,
        renderer: Box<dyn Renderer>,
        screen: Screen,
        opts: ViewportOptions,
    ) -> Result<Self, ViewportError> {
        let worker = RenderWorker::spawn(renderer);
        let doc = load_document(&worker, path)?;
        info!("viewport: opened {} ({} pages, zoom {})", path.display(), doc.page_count(), opts.zoom);

        let encoder = KittyEncoder::new();
        let image_id = encoder.allocate_id();
        Ok(Self {
            path: path.to_path_buf(),
            filename: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string(),
            scroll_up: opts.scroll_up,
            shared: Mutex::new(Shared {
                view: ViewportState::new(opts.zoom),
                doc,
                epoch: 0,
                flash: None,
            }),
            screen: Mutex::new(screen),
            worker,
            encoder,
            image_id,
        })
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_screen(&self) -> MutexGuard<'_, Screen> {
        self.screen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the state as one critical section. `f` returns true when it
    /// made the current image stale.
    fn mutate(&self, f: impl FnOnce(&mut ViewportState, &Document) -> bool) -> bool {
        let mut s = self.lock_shared();
        let Shared { view, doc, epoch, .. } = &mut *s;
        let stale = f(view, doc);
        if stale {
            *epoch += 1;
        }
        stale
    }

    pub fn snapshot(&self) -> ViewportState {
        self.lock_shared().view
    }

    pub fn page_count(&self) -> usize {
        self.lock_shared().doc.page_count()
    }

    pub fn image_id(&self) -> u32 {
        self.image_id
    }

    pub fn set_flash(&self, msg: impl Into<String>) {
        self.lock_shared().flash = Some(msg.into());
    }

    /// Returns true if a message was showing.
    pub fn clear_flash(&self) -> bool {
        self.lock_shared().flash.take().is_some()
    }

    pub fn scroll(&self, delta: i64) -> Result<(), ViewportError> {
        let policy = self.scroll_up;
        self.mutate(|view, doc| view.scroll(delta, doc, policy));
        self.draw()
    }

    /// Jump to the top of page `index` (0-based).
    pub fn goto_page(&self, index: usize) -> Result<(), ViewportError> {
        self.mutate(|view, doc| {
            let before = view.page_index;
            view.goto_page(index, doc);
            view.page_index != before
        });
        self.draw()
    }

    /// Returns false (and draws nothing) if the result was ignored.
    pub fn apply_sync(&self, result: SyncResult) -> Result<bool, ViewportError> {
        if !self.mutate(|view, doc| view.apply_sync(result, doc)) {
            return Ok(false);
        }
        self.set_flash(format!("synced to page {}", result.page));
        self.draw()?;
        Ok(true)
    }

    /// Re-read the document. On failure the previous document stays in place.
    pub fn reload(&self) -> Result<(), ViewportError> {
        let doc = match load_document(&self.worker, &self.path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("viewport: reload failed: {e}");
                self.set_flash(format!("reload failed: {e}"));
                return Err(e.into());
            }
        };
        let mut s = self.lock_shared();
        debug!("viewport: reloaded ({} pages)", doc.page_count());
        s.doc = doc;
        let Shared { view, doc, epoch, flash } = &mut *s;
        view.fit_document(doc);
        *epoch += 1;
        *flash = None;
        Ok(())
    }

    /// Start drawing on a screen created with `Screen::detached`, and draw now.
    pub fn attach(&self) -> Result<(), ViewportError> {
        self.lock_screen().attach();
        self.draw()
    }

    pub fn resize(&self, layout: Layout) -> Result<(), ViewportError> {
        self.lock_screen().set_layout(layout);
        self.draw()
    }

    /// Bring the terminal up to date with the current state.
    ///
    /// If `dirty`, the page is rendered and transmitted first. On failure nothing
    /// is written, `dirty` stays set, and the previous image remains on screen.
    pub fn draw(&self) -> Result<(), ViewportError> {
        let mut screen = self.lock_screen();
        if !screen.is_attached() {
            debug!("draw: screen not attached yet, skipping");
            return Ok(());
        }
        loop {
            let (snap, epoch) = {
                let s = self.lock_shared();
                (s.view, s.epoch)
            };

            let transmit = if snap.dirty {
                match self.render_frames(&snap) {
                    Ok(frames) => Some(frames),
                    Err(e) => {
                        self.set_flash(e.to_string());
                        return Err(e);
                    }
                }
            } else {
                None
            };

            let (scroll_y, page_index, page_count, page_height_px, flash) = {
                let mut s = self.lock_shared();
                if s.epoch != epoch {
                    debug!("draw: state changed while rendering page {}, retrying", snap.page_index + 1);
                    continue;
                }
                if transmit.is_some() {
                    s.view.dirty = false;
                }
                let v = s.view;
                (
                    v.scroll_y,
                    v.page_index,
                    s.doc.page_count(),
                    s.doc.page_height_px(v.page_index, v.zoom),
                    s.flash.clone(),
                )
            };

            screen.clear_viewport()?;
            if let Some(frames) = &transmit {
                screen.write_frames(frames)?;
            }
            let place = self.encoder.place(self.image_id, 0, -i64::from(scroll_y), true);
            screen.write_frames(&[place])?;
            screen.draw_status_bar(&StatusLine {
                filename: &self.filename,
                page: page_index,
                page_count,
                scroll_y,
                page_height_px,
                flash: flash.as_deref(),
            })?;
            return Ok(());
        }
    }

    fn render_frames(&self, snap: &ViewportState) -> Result<Vec<String>, ViewportError> {
        let pixmap = self.worker.render(snap.page_index, snap.zoom)?;
        let image = ImageHandle {
            id: self.image_id,
            width: pixmap.width,
            height: pixmap.height,
            format: pixmap.format,
        };
        let frames = self.encoder.transmit(&image, &pixmap.data)?;
        debug!(
            "draw: page {} -> {}x{} in {} frame(s)",
            snap.page_index + 1,
            pixmap.width,
            pixmap.height,
            frames.len()
        );
        Ok(frames)
    }
}

fn load_document(worker: &RenderWorker, path: &Path) -> Result<Document, RenderError> {
    let info = worker.load(path)?;
    Document::new(&info).ok_or_else(|| RenderError::DocumentLoad {
        path: path.to_path_buf(),
        reason: "document has no pages".into(),
    })
}

impl DocumentListener for Viewport {
    fn on_document_changed(&self, path: &Path) {
        info!("viewport: {} changed, reloading", path.display());
        // Reload failures are already reported on the status bar.
        if self.reload().is_ok()
            && let Err(e) = self.draw()
        {
            warn!("viewport: redraw after reload failed: {e}");
        }
    }
}

impl SyncTarget for Viewport {
    fn sync_to(&self, result: SyncResult) {
        match self.apply_sync(result) {
            Ok(true) => debug!("viewport: synced to page {} y {}", result.page, result.y),
            Ok(false) => debug!("viewport: sync to page {} ignored", result.page),
            Err(e) => warn!("viewport: sync draw failed: {e}"),
        }
    }
}
