//! In-process workbook implementing the document host traits.
//!
//! Writes are staged per transaction and applied together on commit, so an
//! aborted transaction leaves the workbook untouched. Faults can be injected
//! for reads, writes to a given cell, and commits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::address::{self, CellRef, RangeRef};
use super::{DocumentHost, DocumentTransaction, SheetId};
use crate::error::DocumentError;
use crate::protocol::{CellValue, DocumentSnapshot};

/// Serializable form of a workbook: active sheet plus `sheet → address → value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkbookData {
    pub active: String,
    #[serde(default)]
    pub sheets: BTreeMap<String, BTreeMap<String, CellValue>>,
}

#[derive(Debug, Default)]
struct Sheet {
    name: String,
    cells: BTreeMap<CellRef, CellValue>,
}

impl Sheet {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: BTreeMap::new(),
        }
    }

    fn set(&mut self, cell: CellRef, value: CellValue) {
        if value.is_blank() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, value);
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    reads: bool,
    commits: bool,
    writes: HashSet<(String, CellRef)>,
}

#[derive(Debug, Default)]
struct BookState {
    sheets: Vec<Sheet>,
    active: usize,
    faults: Faults,
}

impl BookState {
    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|s| s.name == name)
    }

    fn active_name(&self) -> Option<&str> {
        self.sheets.get(self.active).map(|s| s.name.as_str())
    }

    /// Resolve a possibly sheet-qualified address against a default sheet.
    fn resolve(
        &self,
        default_sheet: &str,
        address: &str,
    ) -> Result<(usize, RangeRef), DocumentError> {
        let (qualified, local) = address::split_sheet(address);
        let name = qualified.as_deref().unwrap_or(default_sheet);
        let index = self
            .sheet_index(name)
            .ok_or_else(|| DocumentError::UnknownSheet(name.to_string()))?;
        Ok((index, local.parse()?))
    }
}

/// A workbook held in memory. Clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct MemoryWorkbook {
    state: Arc<Mutex<BookState>>,
}

impl MemoryWorkbook {
    /// A workbook with one empty, active sheet.
    pub fn new(sheet: &str) -> Self {
        let state = BookState {
            sheets: vec![Sheet::new(sheet)],
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn from_data(data: &WorkbookData) -> Result<Self, DocumentError> {
        let mut state = BookState::default();
        for (name, cells) in &data.sheets {
            let mut sheet = Sheet::new(name);
            for (addr, value) in cells {
                sheet.set(addr.parse()?, value.clone());
            }
            state.sheets.push(sheet);
        }
        if state.sheet_index(&data.active).is_none() {
            state.sheets.push(Sheet::new(&data.active));
        }
        state.active = state.sheet_index(&data.active).unwrap_or_default();
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn to_data(&self) -> WorkbookData {
        let state = self.lock();
        WorkbookData {
            active: state.active_name().unwrap_or_default().to_string(),
            sheets: state
                .sheets
                .iter()
                .map(|s| {
                    let cells = s
                        .cells
                        .iter()
                        .map(|(c, v)| (c.to_string(), v.clone()))
                        .collect();
                    (s.name.clone(), cells)
                })
                .collect(),
        }
    }

    /// Add an empty sheet if one with this name doesn't exist yet.
    pub fn add_sheet(&self, name: &str) {
        let mut state = self.lock();
        if state.sheet_index(name).is_none() {
            state.sheets.push(Sheet::new(name));
        }
    }

    pub fn activate(&self, name: &str) -> Result<(), DocumentError> {
        let mut state = self.lock();
        state.active = state
            .sheet_index(name)
            .ok_or_else(|| DocumentError::UnknownSheet(name.to_string()))?;
        Ok(())
    }

    /// Write a cell directly, outside any transaction.
    pub fn set_cell(
        &self,
        address: &str,
        value: impl Into<CellValue>,
    ) -> Result<(), DocumentError> {
        let mut state = self.lock();
        let active = state.active_name().ok_or(DocumentError::NoActiveSheet)?.to_string();
        let (index, range) = state.resolve(&active, address)?;
        state.sheets[index].set(range.start, value.into());
        Ok(())
    }

    pub fn cell(&self, address: &str) -> Result<CellValue, DocumentError> {
        let state = self.lock();
        let active = state.active_name().ok_or(DocumentError::NoActiveSheet)?;
        let (index, range) = state.resolve(active, address)?;
        Ok(state.sheets[index]
            .cells
            .get(&range.start)
            .cloned()
            .unwrap_or_default())
    }

    /// Make every used-range read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().faults.reads = fail;
    }

    /// Make every commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.lock().faults.commits = fail;
    }

    /// Make writes touching this cell fail. Unqualified addresses refer to the active sheet.
    pub fn fail_writes_to(&self, address: &str) -> Result<(), DocumentError> {
        let mut state = self.lock();
        let active = state.active_name().ok_or(DocumentError::NoActiveSheet)?.to_string();
        let (index, range) = state.resolve(&active, address)?;
        let sheet = state.sheets[index].name.clone();
        state.faults.writes.insert((sheet, range.start));
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentHost for MemoryWorkbook {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, DocumentError> {
        Ok(MemoryTransaction {
            book: self.clone(),
            staged: Vec::new(),
        })
    }
}

/// Transaction over a [`MemoryWorkbook`]. Dropping it discards staged writes.
pub struct MemoryTransaction {
    book: MemoryWorkbook,
    staged: Vec<(usize, CellRef, CellValue)>,
}

#[async_trait]
impl DocumentTransaction for MemoryTransaction {
    async fn active_sheet(&mut self) -> Result<SheetId, DocumentError> {
        let state = self.book.lock();
        state
            .active_name()
            .map(|name| SheetId(name.to_string()))
            .ok_or(DocumentError::NoActiveSheet)
    }

    async fn used_range(&mut self, sheet: &SheetId) -> Result<DocumentSnapshot, DocumentError> {
        let state = self.book.lock();
        if state.faults.reads {
            return Err(DocumentError::Read("injected read failure".into()));
        }
        let index = state
            .sheet_index(&sheet.0)
            .ok_or_else(|| DocumentError::UnknownSheet(sheet.0.clone()))?;
        let cells = &state.sheets[index].cells;

        // An empty sheet reports A1 holding a blank, like the host does.
        let range = RangeRef::bounding(cells.keys().copied())
            .unwrap_or_else(|| RangeRef::cell(CellRef::new(0, 0)));
        let values = (range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .map(|col| cells.get(&CellRef::new(row, col)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        Ok(DocumentSnapshot {
            values,
            address: address::qualify(&sheet.0, &range.to_string()),
        })
    }

    async fn set_range_values(
        &mut self,
        sheet: &SheetId,
        address: &str,
        values: Vec<Vec<CellValue>>,
    ) -> Result<(), DocumentError> {
        let state = self.book.lock();
        let (index, range) = state.resolve(&sheet.0, address)?;

        let shape_ok = values.len() == range.rows() as usize
            && values.iter().all(|row| row.len() == range.cols() as usize);
        if !shape_ok {
            return Err(DocumentError::Write {
                address: address.to_string(),
                reason: format!(
                    "expected {}x{} values for {}",
                    range.rows(),
                    range.cols(),
                    range
                ),
            });
        }

        let sheet_name = &state.sheets[index].name;
        let mut staged = Vec::new();
        for (r, row) in values.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                let cell = CellRef::new(range.start.row + r as u32, range.start.col + c as u32);
                if state.faults.writes.contains(&(sheet_name.clone(), cell)) {
                    return Err(DocumentError::Write {
                        address: address.to_string(),
                        reason: "injected write failure".into(),
                    });
                }
                staged.push((index, cell, value));
            }
        }
        self.staged.extend(staged);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DocumentError> {
        let mut state = self.book.lock();
        if state.faults.commits {
            self.staged.clear();
            return Err(DocumentError::Commit("injected commit failure".into()));
        }
        for (index, cell, value) in self.staged.drain(..) {
            state.sheets[index].set(cell, value);
        }
        Ok(())
    }
}
