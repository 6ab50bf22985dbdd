//! Terminal I/O layer: raw mode guard, output sink, status bar.

use crossterm::{
    ExecutableCommand, QueueableCommand, cursor,
    style::{self, Stylize},
    terminal,
};
use std::io::{self, Write, stdout};

use crate::kitty;

// ---------------------------------------------------------------------------
// RawGuard — restores raw mode / alternate screen / images on drop
// ---------------------------------------------------------------------------

pub(super) struct RawGuard {
    cleaned: bool,
}

impl RawGuard {
    pub(super) fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        stdout().execute(terminal::EnterAlternateScreen)?;
        stdout().execute(cursor::Hide)?;
        Ok(Self { cleaned: false })
    }

    pub(super) fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        let mut out = stdout();
        let _ = out.write_all(kitty::delete_all_frame().as_bytes());
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ---------------------------------------------------------------------------
// Layout / Screen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub cols: u16,
    /// Last terminal row; `None` when there is no room (or no terminal).
    pub status_row: Option<u16>,
}

impl Layout {
    pub fn headless() -> Self {
        Self {
            cols: 0,
            status_row: None,
        }
    }
}

pub fn compute_layout(term_cols: u16, term_rows: u16) -> Layout {
    Layout {
        cols: term_cols,
        status_row: if term_rows > 1 { Some(term_rows - 1) } else { None },
    }
}

/// What the status bar shows.
pub struct StatusLine<'a> {
    pub filename: &'a str,
    pub page: usize,
    pub page_count: usize,
    pub scroll_y: u32,
    pub page_height_px: u32,
    pub flash: Option<&'a str>,
}

/// Where viewer output goes. Holding the `Screen` means owning the terminal.
pub struct Screen {
    out: Box<dyn Write + Send>,
    layout: Layout,
    attached: bool,
}

impl Screen {
    pub fn new(out: Box<dyn Write + Send>, layout: Layout) -> Self {
        Self {
            out,
            layout,
            attached: true,
        }
    }

    /// A screen that refuses draws until `attach` is called.
    pub fn detached(out: Box<dyn Write + Send>, layout: Layout) -> Self {
        Self {
            out,
            layout,
            attached: false,
        }
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    /// Wipe the text layer and the image placements on it.
    pub fn clear_viewport(&mut self) -> io::Result<()> {
        self.out.queue(terminal::Clear(terminal::ClearType::All))?;
        self.out.queue(cursor::MoveTo(0, 0))?;
        Ok(())
    }

    pub fn write_frames(&mut self, frames: &[String]) -> io::Result<()> {
        kitty::write_frames(&mut self.out, frames)
    }

    pub fn draw_status_bar(&mut self, status: &StatusLine) -> io::Result<()> {
        let Some(row) = self.layout.status_row else {
            return self.out.flush();
        };
        self.out.queue(cursor::MoveTo(0, row))?;

        let position = format!(
            "page {}/{} | y={}/{} px",
            status.page + 1,
            status.page_count,
            status.scroll_y,
            status.page_height_px
        );
        let text = match status.flash {
            Some(msg) => format!(" {} | {} | {}", status.filename, position, msg),
            None => format!(" {} | {}  [j/k:scroll Ng:page r:reload q:quit]", status.filename, position),
        };
        let width = self.layout.cols as usize;
        let padded: String = format!("{text:<width$}").chars().take(width).collect();
        write!(self.out, "{}", padded.on_dark_grey().white())?;
        self.out.queue(style::ResetColor)?;
        // Park the cursor back at the origin so the next placement starts there.
        self.out.queue(cursor::MoveTo(0, 0))?;
        self.out.flush()
    }
}

pub(super) fn check_tty() -> anyhow::Result<()> {
    use std::io::IsTerminal;
    // crossterm's `use-dev-tty` reads keys from /dev/tty, so only stdout matters.
    if !io::stdout().is_terminal() {
        anyhow::bail!(
            "syncview requires an interactive terminal.\n\
             \n\
             Supported terminals: Kitty, Ghostty, WezTerm"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buf(Arc<Mutex<Vec<u8>>>);

    impl Write for Buf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn status(flash: Option<&str>) -> StatusLine<'_> {
        StatusLine {
            filename: "paper.pdf",
            page: 2,
            page_count: 9,
            scroll_y: 181,
            page_height_px: 1188,
            flash,
        }
    }

    #[test]
    fn layout_reserves_last_row() {
        assert_eq!(compute_layout(80, 24).status_row, Some(23));
        assert_eq!(compute_layout(80, 1).status_row, None);
    }

    #[test]
    fn status_bar_shows_position() {
        let buf = Buf::default();
        let mut screen = Screen::new(Box::new(buf.clone()), compute_layout(120, 40));
        screen.draw_status_bar(&status(None)).unwrap();
        let text = String::from_utf8_lossy(&buf.0.lock().unwrap()).to_string();
        assert!(text.contains("paper.pdf | page 3/9 | y=181/1188 px"), "{text}");
    }

    #[test]
    fn status_bar_shows_flash() {
        let buf = Buf::default();
        let mut screen = Screen::new(Box::new(buf.clone()), compute_layout(120, 40));
        screen.draw_status_bar(&status(Some("reload failed"))).unwrap();
        let text = String::from_utf8_lossy(&buf.0.lock().unwrap()).to_string();
        assert!(text.contains("| reload failed"), "{text}");
    }

    #[test]
    fn headless_screen_writes_no_status() {
        let buf = Buf::default();
        let mut screen = Screen::new(Box::new(buf.clone()), Layout::headless());
        screen.draw_status_bar(&status(None)).unwrap();
        assert!(buf.0.lock().unwrap().is_empty());
    }
}
