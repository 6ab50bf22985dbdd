//! Viewport state and its transitions. Pure logic, no I/O.
//!
//! Invariants kept by every transition:
//!   - `page_index < page_count`
//!   - `scroll_y <= page_height_px(page_index)`
//!   - `dirty` is set whenever the page shown may differ from the last transmitted one

use log::debug;
use serde::Deserialize;

use crate::render::DocumentInfo;
use crate::synctex::SyncResult;

/// Where the viewport lands after scrolling above the top of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollUpPolicy {
    /// Top of the previous page.
    #[default]
    Top,
    /// Bottom of the previous page.
    Bottom,
}

/// Page geometry the viewport needs, in points.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    page_heights_pt: Vec<f64>,
}

impl Document {
    /// `None` for a document without pages.
    pub fn new(info: &DocumentInfo) -> Option<Self> {
        if info.page_count() == 0 {
            return None;
        }
        Some(Self {
            page_heights_pt: info.page_sizes_pt.iter().map(|&(_, h)| h).collect(),
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_heights_pt.len()
    }

    /// `round(height_pt * zoom)`; 0 for an out-of-range page.
    pub fn page_height_px(&self, index: usize, zoom: f64) -> u32 {
        self.page_heights_pt
            .get(index)
            .map(|h| (h * zoom).round().max(0.0) as u32)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub page_index: usize,
    pub scroll_y: u32,
    pub zoom: f64,
    pub dirty: bool,
}

impl ViewportState {
    pub fn new(zoom: f64) -> Self {
        Self {
            page_index: 0,
            scroll_y: 0,
            zoom,
            dirty: true,
        }
    }

    fn current_height(&self, doc: &Document) -> u32 {
        doc.page_height_px(self.page_index, self.zoom)
    }

    /// Move by `delta` pixels, crossing at most one page boundary.
    ///
    /// Returns true if the page changed (and `dirty` was set).
    pub fn scroll(&mut self, delta: i64, doc: &Document, policy: ScrollUpPolicy) -> bool {
        let height = self.current_height(doc) as i64;
        let y = self.scroll_y as i64 + delta;
        let old = (self.page_index, self.scroll_y);

        let page_changed = if y < 0 {
            if self.page_index > 0 {
                self.page_index -= 1;
                self.scroll_y = match policy {
                    ScrollUpPolicy::Top => 0,
                    ScrollUpPolicy::Bottom => self.current_height(doc),
                };
                true
            } else {
                self.scroll_y = 0;
                false
            }
        } else if y > height {
            if self.page_index + 1 < doc.page_count() {
                self.page_index += 1;
                self.scroll_y = 0;
                true
            } else {
                self.scroll_y = height as u32;
                false
            }
        } else {
            self.scroll_y = y as u32;
            false
        };

        if page_changed {
            self.dirty = true;
        }
        debug!(
            "scroll {delta}: (page {}, y {}) -> (page {}, y {})",
            old.0, old.1, self.page_index, self.scroll_y
        );
        page_changed
    }

    /// Jump to a resolved source position. Pages outside the document are ignored.
    ///
    /// Returns true if the state changed (and `dirty` was set).
    pub fn apply_sync(&mut self, result: SyncResult, doc: &Document) -> bool {
        if result.page <= 0 || result.page as u64 > doc.page_count() as u64 {
            debug!("sync: ignoring page {} (document has {})", result.page, doc.page_count());
            return false;
        }
        self.page_index = (result.page - 1) as usize;
        let y = (result.y * self.zoom).round().max(0.0) as u32;
        self.scroll_y = y.min(self.current_height(doc));
        self.dirty = true;
        true
    }

    /// Jump to the top of page `index` (clamped to the last page).
    pub fn goto_page(&mut self, index: usize, doc: &Document) {
        let index = index.min(doc.page_count() - 1);
        if index != self.page_index {
            self.page_index = index;
            self.dirty = true;
        }
        self.scroll_y = 0;
    }

    /// Adopt a freshly loaded document: clamp into range and mark dirty.
    pub fn fit_document(&mut self, doc: &Document) {
        self.page_index = self.page_index.min(doc.page_count() - 1);
        self.scroll_y = self.scroll_y.min(self.current_height(doc));
        self.dirty = true;
    }
}
