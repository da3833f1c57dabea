//! Sticky-width table drawn in place on every tick.
//!
//! Column widths only ever grow. In in-place mode each frame first moves the
//! cursor back over everything the previous frame printed, and a frame that is
//! shorter than its predecessor is followed by blank rows to wipe the rest.

use std::io::{self, Write};

/// Cells per row: percent, `|`, position, `of`, size, `|`, `in`, remaining,
/// `of`, total, fd, `|`, path.
pub const CELL_COUNT: usize = 13;

/// One table row.
pub type Row = [String; CELL_COUNT];

/// Cursor up one line.
const CURSOR_UP: &str = "\x1b[A";

/// How successive frames are put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redraw {
    /// Move the cursor back over the last frame and overwrite it.
    InPlace,
    /// Append each frame in full; for outputs without cursor control.
    Repaint,
}

#[derive(Debug)]
pub struct TableRenderer {
    redraw: Redraw,
    widths: [usize; CELL_COUNT],
    previous_rows: usize,
    /// Lines the last frame occupied, blank padding included.
    lines_on_screen: usize,
}

impl TableRenderer {
    pub fn new(redraw: Redraw) -> Self {
        Self {
            redraw,
            widths: [1; CELL_COUNT],
            previous_rows: 0,
            lines_on_screen: 0,
        }
    }

    #[allow(dead_code)]
    pub fn widths(&self) -> &[usize; CELL_COUNT] {
        &self.widths
    }

    #[allow(dead_code)]
    pub fn previous_rows(&self) -> usize {
        self.previous_rows
    }

    /// Draw one frame.
    pub fn draw<W: Write>(&mut self, rows: &[Row], out: &mut W) -> io::Result<()> {
        self.widen(rows);

        let mut frame = String::new();
        if self.redraw == Redraw::InPlace {
            frame.push_str(&CURSOR_UP.repeat(self.lines_on_screen));
        }
        for row in rows {
            self.push_row(&mut frame, row.iter().map(String::as_str));
        }
        if self.redraw == Redraw::InPlace {
            for _ in rows.len()..self.previous_rows {
                self.push_row(&mut frame, std::iter::repeat("").take(CELL_COUNT));
            }
        }

        out.write_all(frame.as_bytes())?;
        out.flush()?;

        self.lines_on_screen = rows.len().max(self.previous_rows);
        self.previous_rows = rows.len();
        Ok(())
    }

    fn widen(&mut self, rows: &[Row]) {
        for row in rows {
            for (width, cell) in self.widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    /// Append cells padded or truncated to their column width.
    fn push_row<'a>(&self, frame: &mut String, cells: impl Iterator<Item = &'a str>) {
        let line: Vec<String> = cells
            .zip(self.widths)
            .map(|(cell, w)| format!("{:<w$.w$}", cell))
            .collect();
        frame.push_str(&line.join(" "));
        frame.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, path: &str) -> Row {
        [
            " 50.0%", "|", "5", "of", "10", "|", "in", "1.0s", "of", "2.0s", id, "|", path,
        ]
        .map(String::from)
    }

    fn draw(renderer: &mut TableRenderer, rows: &[Row]) -> String {
        let mut out = Vec::new();
        renderer.draw(rows, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn first_frame_has_no_reposition() {
        let mut renderer = TableRenderer::new(Redraw::InPlace);
        let text = draw(&mut renderer, &[row("3", "/a")]);

        assert!(!text.contains('\x1b'));
        assert_eq!(text, " 50.0% | 5 of 10 | in 1.0s of 2.0s 3 | /a\n");
    }

    #[test]
    fn cells_pad_to_sticky_width() {
        let mut renderer = TableRenderer::new(Redraw::Repaint);
        draw(&mut renderer, &[row("3", "/long/path")]);
        let text = draw(&mut renderer, &[row("3", "/a")]);

        assert_eq!(renderer.widths()[12], "/long/path".len());
        assert!(text.ends_with("3 | /a        \n"));
    }

    #[test]
    fn widths_never_shrink() {
        let frames = vec![
            vec![row("3", "/a")],
            vec![row("10", "/much/longer/path"), row("4", "/b")],
            vec![],
            vec![row("5", "/c")],
        ];
        let mut renderer = TableRenderer::new(Redraw::InPlace);
        let mut previous = *renderer.widths();
        for frame in &frames {
            draw(&mut renderer, frame);
            let current = *renderer.widths();
            for (before, after) in previous.iter().zip(current.iter()) {
                assert!(after >= before);
            }
            previous = current;
        }
        assert_eq!(previous[10], 2);
        assert_eq!(previous[12], "/much/longer/path".len());
    }

    #[test]
    fn shrinking_frame_repositions_and_pads() {
        let mut renderer = TableRenderer::new(Redraw::InPlace);
        draw(
            &mut renderer,
            &[row("3", "/a"), row("4", "/b"), row("5", "/c")],
        );
        let text = draw(&mut renderer, &[row("4", "/b")]);

        assert!(text.starts_with(&"\x1b[A".repeat(3)));
        assert!(!text.starts_with(&"\x1b[A".repeat(4)));

        let body = text.trim_start_matches("\x1b[A");
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("/b"));
        assert!(lines[1].trim().is_empty());
        assert!(lines[2].trim().is_empty());
        assert_eq!(lines[1].len(), lines[0].len());
        assert_eq!(renderer.previous_rows(), 1);
    }

    #[test]
    fn reposition_covers_padding_of_previous_frame() {
        let mut renderer = TableRenderer::new(Redraw::InPlace);
        draw(&mut renderer, &[row("3", "/a"), row("4", "/b")]);
        draw(&mut renderer, &[]);
        // Two blank rows are still on screen.
        let text = draw(&mut renderer, &[row("3", "/a")]);
        assert!(text.starts_with(&"\x1b[A".repeat(2)));
        assert!(!text.starts_with(&"\x1b[A".repeat(3)));
    }

    #[test]
    fn growing_frame_writes_no_padding() {
        let mut renderer = TableRenderer::new(Redraw::InPlace);
        draw(&mut renderer, &[row("3", "/a")]);
        let text = draw(&mut renderer, &[row("3", "/a"), row("4", "/b")]);

        let body = text.trim_start_matches("\x1b[A");
        assert_eq!(body.lines().count(), 2);
        assert!(body.lines().all(|l| !l.trim().is_empty()));
    }

    #[test]
    fn repaint_mode_never_moves_cursor() {
        let mut renderer = TableRenderer::new(Redraw::Repaint);
        draw(&mut renderer, &[row("3", "/a"), row("4", "/b")]);
        let text = draw(&mut renderer, &[row("3", "/a")]);

        assert!(!text.contains('\x1b'));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn rows_keep_delivered_order() {
        let mut renderer = TableRenderer::new(Redraw::Repaint);
        let text = draw(&mut renderer, &[row("9", "/z"), row("2", "/y")]);

        let mut ids: Vec<&str> = text
            .lines()
            .map(|l| l.split_whitespace().nth(10).unwrap())
            .collect();
        assert_eq!(ids, vec!["9", "2"]);
        ids.sort();
        assert_eq!(ids, vec!["2", "9"]);
    }
}
