//! Source line → (page, y) resolution through the `synctex view` tool.
//!
//! Every failure mode collapses to `SyncUnavailable`: a sync request that
//! cannot be resolved leaves the viewport where it was.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

/// A resolved position, as reported by the tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncResult {
    /// 1-based page number.
    pub page: i64,
    /// Points from the top of the page.
    pub y: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncUnavailable {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Status { program: String, status: String },

    #[error("no Page: marker in output")]
    NoPage,

    #[error("page {0} is not a valid page")]
    InvalidPage(i64),

    #[error("cannot parse {field} value {value:?}")]
    Parse { field: &'static str, value: String },
}

/// Anything that can turn a source line into a document position.
pub trait PositionResolver: Send + Sync {
    fn resolve(&self, line: u32, source_file: &str) -> Result<SyncResult, SyncUnavailable>;
}

pub struct SyncMapper {
    program: String,
    document: PathBuf,
}

impl SyncMapper {
    pub fn new(program: impl Into<String>, document: &Path) -> Self {
        Self {
            program: program.into(),
            document: document.to_path_buf(),
        }
    }
}

impl PositionResolver for SyncMapper {
    fn resolve(&self, line: u32, source_file: &str) -> Result<SyncResult, SyncUnavailable> {
        let output = Command::new(&self.program)
            .arg("view")
            .arg("-i")
            .arg(format!("{line}:0:{source_file}"))
            .arg("-o")
            .arg(&self.document)
            .output()
            .map_err(|source| SyncUnavailable::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SyncUnavailable::Status {
                program: self.program.clone(),
                status: output.status.to_string(),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let result = parse_output(&text)?;
        debug!("synctex: {source_file}:{line} -> page {} y {}", result.page, result.y);
        Ok(result)
    }
}

/// Parse `synctex view` output.
///
/// The first `Page:` line and the first `y:` line are taken independently of
/// each other; later blocks are ignored. A missing `y:` means the top of the page.
pub fn parse_output(text: &str) -> Result<SyncResult, SyncUnavailable> {
    let mut page: Option<&str> = None;
    let mut y: Option<&str> = None;
    for line in text.lines() {
        let line = line.trim();
        if page.is_none()
            && let Some(v) = line.strip_prefix("Page:")
        {
            page = Some(v.trim());
            continue;
        }
        if y.is_none()
            && let Some(v) = line.strip_prefix("y:")
        {
            y = Some(v.trim());
        }
    }

    let page_text = page.ok_or(SyncUnavailable::NoPage)?;
    let page: i64 = page_text.parse().map_err(|_| SyncUnavailable::Parse {
        field: "Page",
        value: page_text.to_string(),
    })?;
    if page <= 0 {
        return Err(SyncUnavailable::InvalidPage(page));
    }
    let y = match y {
        Some(v) => v
            .parse::<f64>()
            .ok()
            .filter(|y| y.is_finite())
            .ok_or_else(|| SyncUnavailable::Parse {
                field: "y",
                value: v.to_string(),
            })?,
        None => 0.0,
    };
    Ok(SyncResult { page, y })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_and_y() {
        let r = parse_output("Page:3\ny:120.5").unwrap();
        assert_eq!(r, SyncResult { page: 3, y: 120.5 });
    }

    #[test]
    fn y_before_page() {
        let r = parse_output("y:44.0\nPage:2\n").unwrap();
        assert_eq!(r, SyncResult { page: 2, y: 44.0 });
    }

    #[test]
    fn full_synctex_block() {
        let text = "\
This is SyncTeX command line utility, version 1.5
SyncTeX result begin
Output:/tmp/paper.pdf
Page:4
x:72.0
y:300.25
h:72.0
v:310.0
W:468.0
H:12.0
before:
offset:0
middle:
after:
SyncTeX result end
";
        let r = parse_output(text).unwrap();
        assert_eq!(r, SyncResult { page: 4, y: 300.25 });
    }

    #[test]
    fn later_blocks_are_ignored() {
        let r = parse_output("Page:1\ny:10\nPage:5\ny:99\n").unwrap();
        assert_eq!(r, SyncResult { page: 1, y: 10.0 });
    }

    #[test]
    fn missing_page_is_unavailable() {
        assert!(matches!(parse_output("y:12\n"), Err(SyncUnavailable::NoPage)));
        assert!(matches!(parse_output(""), Err(SyncUnavailable::NoPage)));
    }

    #[test]
    fn non_positive_page_is_unavailable() {
        assert!(matches!(parse_output("Page:0\ny:1"), Err(SyncUnavailable::InvalidPage(0))));
        assert!(matches!(parse_output("Page:-2"), Err(SyncUnavailable::InvalidPage(-2))));
    }

    #[test]
    fn garbage_values_are_unavailable() {
        assert!(matches!(parse_output("Page:abc"), Err(SyncUnavailable::Parse { .. })));
        assert!(matches!(parse_output("Page:1\ny:zz"), Err(SyncUnavailable::Parse { .. })));
    }

    #[test]
    fn missing_y_defaults_to_top() {
        assert_eq!(parse_output("Page:2").unwrap(), SyncResult { page: 2, y: 0.0 });
    }

    #[test]
    fn missing_tool_is_unavailable() {
        let mapper = SyncMapper::new("/nonexistent/synctex", Path::new("doc.pdf"));
        assert!(matches!(
            mapper.resolve(10, "main.tex"),
            Err(SyncUnavailable::Spawn { .. })
        ));
    }
}
