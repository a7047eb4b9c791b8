use std::sync::RwLock;

use vte::{Params, Parser, Perform};

/// A single terminal cell: the displayed character plus the minimal
/// attributes a detector might care about (bold/reverse video, used by some
/// agent CLIs to highlight their prompt box).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub bold: bool,
    pub reverse: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            bold: false,
            reverse: false,
        }
    }
}

/// A point-in-time rendering of the emulated screen: one text line per row
/// (null cells materialized as spaces) plus the parallel cell grid for
/// detectors that need attributes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub lines: Vec<String>,
    pub cells: Vec<Vec<Cell>>,
}

struct Grid {
    cols: usize,
    rows: usize,
    cells: Vec<Vec<Cell>>,
    cursor_row: usize,
    cursor_col: usize,
    bold: bool,
    reverse: bool,
}

impl Grid {
    fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cells: vec![vec![Cell::default(); cols]; rows],
            cursor_row: 0,
            cursor_col: 0,
            bold: false,
            reverse: false,
        }
    }

    fn resize(&mut self, cols: usize, rows: usize) {
        self.cols = cols;
        self.rows = rows;
        self.cells = vec![vec![Cell::default(); cols]; rows];
        self.cursor_row = self.cursor_row.min(rows.saturating_sub(1));
        self.cursor_col = self.cursor_col.min(cols.saturating_sub(1));
    }

    fn newline(&mut self) {
        if self.cursor_row + 1 >= self.rows {
            self.cells.remove(0);
            self.cells.push(vec![Cell::default(); self.cols]);
        } else {
            self.cursor_row += 1;
        }
    }

    fn put(&mut self, c: char) {
        if self.cursor_row < self.rows && self.cursor_col < self.cols {
            self.cells[self.cursor_row][self.cursor_col] = Cell {
                ch: c,
                bold: self.bold,
                reverse: self.reverse,
            };
        }
        self.cursor_col += 1;
        if self.cursor_col >= self.cols {
            self.cursor_col = 0;
            self.newline();
        }
    }

    fn snapshot(&self) -> Snapshot {
        let lines = self
            .cells
            .iter()
            .map(|row| row.iter().map(|c| c.ch).collect::<String>())
            .collect();
        Snapshot {
            lines,
            cells: self.cells.clone(),
        }
    }
}

struct GridPerform<'a> {
    grid: &'a mut Grid,
}

impl Perform for GridPerform<'_> {
    fn print(&mut self, c: char) {
        self.grid.put(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x0D => self.grid.cursor_col = 0,
            0x0A => self.grid.newline(),
            0x08 => self.grid.cursor_col = self.grid.cursor_col.saturating_sub(1),
            0x09 => {
                let next = ((self.grid.cursor_col / 8) + 1) * 8;
                self.grid.cursor_col = next.min(self.grid.cols.saturating_sub(1));
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        let param = |idx: usize, default: usize| -> usize {
            params
                .iter()
                .nth(idx)
                .and_then(|p| p.first().copied())
                .filter(|v| *v != 0)
                .map(|v| v as usize)
                .unwrap_or(default)
        };

        match action {
            'A' => self.grid.cursor_row = self.grid.cursor_row.saturating_sub(param(0, 1)),
            'B' => {
                self.grid.cursor_row =
                    (self.grid.cursor_row + param(0, 1)).min(self.grid.rows.saturating_sub(1))
            }
            'C' => {
                self.grid.cursor_col =
                    (self.grid.cursor_col + param(0, 1)).min(self.grid.cols.saturating_sub(1))
            }
            'D' => self.grid.cursor_col = self.grid.cursor_col.saturating_sub(param(0, 1)),
            'H' | 'f' => {
                let row = param(0, 1).saturating_sub(1);
                let col = param(1, 1).saturating_sub(1);
                self.grid.cursor_row = row.min(self.grid.rows.saturating_sub(1));
                self.grid.cursor_col = col.min(self.grid.cols.saturating_sub(1));
            }
            'm' => {
                for p in params.iter() {
                    match p.first().copied().unwrap_or(0) {
                        0 => {
                            self.grid.bold = false;
                            self.grid.reverse = false;
                        }
                        1 => self.grid.bold = true,
                        7 => self.grid.reverse = true,
                        22 => self.grid.bold = false,
                        27 => self.grid.reverse = false,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

/// Owns one emulated screen and its `vte` parser. Feeding it raw PTY bytes
/// keeps the grid in sync; `snapshot()` is cheap enough to call once per
/// `check_interval` tick without materially slowing the reader loop.
pub struct VirtualTerminal {
    parser: RwLock<Parser>,
    grid: RwLock<Grid>,
}

impl VirtualTerminal {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: RwLock::new(Parser::new()),
            grid: RwLock::new(Grid::new(cols as usize, rows as usize)),
        }
    }

    pub fn feed(&self, bytes: &[u8]) {
        let mut parser = self.parser.write().unwrap();
        let mut grid = self.grid.write().unwrap();
        let mut perform = GridPerform { grid: &mut grid };
        parser.advance(&mut perform, bytes);
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.grid.write().unwrap().resize(cols as usize, rows as usize);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.grid.read().unwrap().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_text_into_first_line() {
        let vt = VirtualTerminal::new(20, 5);
        vt.feed(b"hello");
        let snap = vt.snapshot();
        assert!(snap.lines[0].starts_with("hello"));
    }

    #[test]
    fn newline_advances_row() {
        let vt = VirtualTerminal::new(20, 5);
        vt.feed(b"a\r\nb");
        let snap = vt.snapshot();
        assert!(snap.lines[0].starts_with('a'));
        assert!(snap.lines[1].starts_with('b'));
    }

    #[test]
    fn resize_rebuilds_grid() {
        let vt = VirtualTerminal::new(10, 2);
        vt.feed(b"x");
        vt.resize(40, 10);
        let snap = vt.snapshot();
        assert_eq!(snap.lines.len(), 10);
        assert_eq!(snap.lines[0].len(), 40);
    }
}
