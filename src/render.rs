//! Rendering collaborator: turns a document page into raw pixels.
//!
//! `Renderer` is the seam the viewer talks to. `PopplerRenderer` implements it
//! with the poppler command-line tools (`pdfinfo` for page geometry,
//! `pdftoppm` for rasterization).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Instant;

use log::debug;
use regex::Regex;

use crate::kitty::PixelFormat;

/// Page geometry of a loaded document, in points.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub page_sizes_pt: Vec<(f64, f64)>,
}

impl DocumentInfo {
    pub fn page_count(&self) -> usize {
        self.page_sizes_pt.len()
    }
}

/// A rasterized page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot load {}: {reason}", .path.display())]
    DocumentLoad { path: PathBuf, reason: String },

    #[error("cannot render page {}: {reason}", .page + 1)]
    Page { page: usize, reason: String },

    #[error("render worker is not running")]
    WorkerGone,
}

pub trait Renderer: Send {
    /// (Re)open the document and report its page geometry.
    fn load(&mut self, path: &Path) -> Result<DocumentInfo, RenderError>;

    /// Rasterize page `index` (0-based) of the last loaded document.
    fn render_page(&mut self, index: usize, zoom: f64) -> Result<Pixmap, RenderError>;
}

// ---------------------------------------------------------------------------
// PopplerRenderer
// ---------------------------------------------------------------------------

pub struct PopplerRenderer {
    pdfinfo: String,
    pdftoppm: String,
    path: Option<PathBuf>,
}

impl PopplerRenderer {
    pub fn new(pdfinfo: impl Into<String>, pdftoppm: impl Into<String>) -> Self {
        Self {
            pdfinfo: pdfinfo.into(),
            pdftoppm: pdftoppm.into(),
            path: None,
        }
    }
}

impl Renderer for PopplerRenderer {
    fn load(&mut self, path: &Path) -> Result<DocumentInfo, RenderError> {
        let load_err = |reason: String| RenderError::DocumentLoad {
            path: path.to_path_buf(),
            reason,
        };

        // `-l` past the last page is clamped by pdfinfo, so one call is enough.
        let output = Command::new(&self.pdfinfo)
            .args(["-f", "1", "-l", "999999"])
            .arg(path)
            .output()
            .map_err(|e| load_err(format!("failed to run {}: {e}", self.pdfinfo)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(load_err(format!("{} {}: {}", self.pdfinfo, output.status, stderr.trim())));
        }

        let info = parse_pdfinfo(&String::from_utf8_lossy(&output.stdout));
        if info.page_count() == 0 {
            return Err(load_err("document has no pages".into()));
        }
        debug!("render: loaded {} ({} pages)", path.display(), info.page_count());
        self.path = Some(path.to_path_buf());
        Ok(info)
    }

    fn render_page(&mut self, index: usize, zoom: f64) -> Result<Pixmap, RenderError> {
        let page_err = |reason: String| RenderError::Page { page: index, reason };
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| page_err("no document loaded".into()))?;

        let start = Instant::now();
        let page = (index + 1).to_string();
        let dpi = format!("{:.3}", 72.0 * zoom);
        let output = Command::new(&self.pdftoppm)
            .args(["-f", &page, "-l", &page, "-r", &dpi, "-singlefile"])
            .arg(path)
            .output()
            .map_err(|e| page_err(format!("failed to run {}: {e}", self.pdftoppm)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(page_err(format!("{} {}: {}", self.pdftoppm, output.status, stderr.trim())));
        }

        let pixmap = parse_ppm(&output.stdout).map_err(page_err)?;
        debug!(
            "render: page {} at zoom {zoom} -> {}x{} in {:.1}ms",
            index + 1,
            pixmap.width,
            pixmap.height,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(pixmap)
    }
}

static PAGE_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Page\s+\d+\s+size:\s+([0-9.]+)\s+x\s+([0-9.]+)\s+pts").unwrap()
});

static SINGLE_SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Page size:\s+([0-9.]+)\s+x\s+([0-9.]+)\s+pts").unwrap());

static PAGES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)").unwrap());

/// Extract page sizes from `pdfinfo` output.
///
/// Per-page lines (`Page    3 size: ...`) win. Without them, the single
/// `Page size:` line is repeated `Pages:` times.
pub fn parse_pdfinfo(text: &str) -> DocumentInfo {
    let parse_pair = |c: regex::Captures| -> Option<(f64, f64)> {
        Some((c[1].parse().ok()?, c[2].parse().ok()?))
    };

    let per_page: Vec<(f64, f64)> = PAGE_SIZE_RE.captures_iter(text).filter_map(parse_pair).collect();
    if !per_page.is_empty() {
        return DocumentInfo {
            page_sizes_pt: per_page,
        };
    }

    let count: usize = PAGES_RE
        .captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let size = SINGLE_SIZE_RE.captures(text).and_then(parse_pair);
    DocumentInfo {
        page_sizes_pt: size.map(|s| vec![s; count]).unwrap_or_default(),
    }
}

/// Decode a binary PPM (`P6`, maxval 255) into an RGB pixmap.
pub fn parse_ppm(bytes: &[u8]) -> Result<Pixmap, String> {
    let mut pos = 0;
    let mut fields = [0u32; 3];
    let magic = next_token(bytes, &mut pos).ok_or("empty PPM")?;
    if magic != b"P6" {
        return Err(format!("unsupported PPM magic {:?}", String::from_utf8_lossy(magic)));
    }
    for field in fields.iter_mut() {
        let tok = next_token(bytes, &mut pos).ok_or("truncated PPM header")?;
        *field = std::str::from_utf8(tok)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| format!("bad PPM header field {:?}", String::from_utf8_lossy(tok)))?;
    }
    let [width, height, maxval] = fields;
    if maxval != 255 {
        return Err(format!("unsupported PPM maxval {maxval}"));
    }
    // Exactly one whitespace byte separates the header from the raster.
    pos += 1;

    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| format!("PPM dimensions {width}x{height} are too large"))?;
    let data = pos
        .checked_add(len)
        .and_then(|end| bytes.get(pos..end))
        .ok_or_else(|| format!("PPM raster truncated: want {len} bytes"))?
        .to_vec();
    Ok(Pixmap {
        width,
        height,
        format: PixelFormat::Rgb,
        data,
    })
}

/// Next whitespace-delimited header token, skipping `#` comments.
fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if bytes.get(*pos) == Some(&b'#') {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (*pos > start).then(|| &bytes[start..*pos])
}
