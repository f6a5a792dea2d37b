//! A1-style cell and range addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::DocumentError;

/// Worksheet grid limits: the last cell is `XFD1048576`.
pub const MAX_ROWS: u32 = 1_048_576;
pub const MAX_COLS: u32 = 16_384;

/// Zero-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl FromStr for CellRef {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DocumentError::InvalidAddress(s.to_string());
        let body = s.trim();
        let body = body.strip_prefix('$').unwrap_or(body);

        let split = body
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (letters, rest) = body.split_at(split);
        let digits = rest.strip_prefix('$').unwrap_or(rest);

        if letters.is_empty() || letters.len() > 3 {
            return Err(invalid());
        }
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let col = letters
            .bytes()
            .fold(0u32, |acc, b| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1))
            - 1;
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 || row > MAX_ROWS || col >= MAX_COLS {
            return Err(invalid());
        }
        Ok(CellRef { row: row - 1, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row + 1)
    }
}

/// Column index to letters: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Inclusive rectangular range. A single cell has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRef {
    pub start: CellRef,
    pub end: CellRef,
}

impl RangeRef {
    pub fn cell(cell: CellRef) -> Self {
        Self {
            start: cell,
            end: cell,
        }
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Smallest range covering every cell yielded, if any.
    pub fn bounding<I: IntoIterator<Item = CellRef>>(cells: I) -> Option<Self> {
        cells.into_iter().fold(None, |acc: Option<RangeRef>, c| {
            Some(match acc {
                None => RangeRef::cell(c),
                Some(r) => RangeRef {
                    start: CellRef::new(r.start.row.min(c.row), r.start.col.min(c.col)),
                    end: CellRef::new(r.end.row.max(c.row), r.end.col.max(c.col)),
                },
            })
        })
    }
}

impl FromStr for RangeRef {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None => Ok(RangeRef::cell(s.parse()?)),
            Some((a, b)) => {
                let (a, b): (CellRef, CellRef) = (a.parse()?, b.parse()?);
                Ok(RangeRef {
                    start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
                    end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
                })
            }
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Split `Sheet1!A1` / `'My Sheet'!A1:B2` into sheet name and local address.
pub fn split_sheet(address: &str) -> (Option<String>, &str) {
    match address.rsplit_once('!') {
        None => (None, address),
        Some((sheet, local)) => {
            let name = sheet
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .map(|s| s.replace("''", "'"))
                .unwrap_or_else(|| sheet.to_string());
            (Some(name), local)
        }
    }
}

/// Qualify a local address with its sheet, quoting names that need it.
pub fn qualify(sheet: &str, local: &str) -> String {
    let plain = sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("{sheet}!{local}")
    } else {
        format!("'{}'!{local}", sheet.replace('\'', "''"))
    }
}
