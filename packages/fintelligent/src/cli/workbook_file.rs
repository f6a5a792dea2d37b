use anyhow::{Context, Result};
use fintelligent::MemoryWorkbook;
use fintelligent::document::memory::WorkbookData;
use std::path::Path;

/// Load a workbook saved as JSON (`{"active": ..., "sheets": {...}}`).
pub fn load(path: &Path) -> Result<MemoryWorkbook> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workbook {}", path.display()))?;
    let data: WorkbookData = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse workbook {}", path.display()))?;
    MemoryWorkbook::from_data(&data)
        .with_context(|| format!("Invalid workbook {}", path.display()))
}

pub fn save(book: &MemoryWorkbook, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&book.to_data())?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write workbook {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fintelligent::CellValue;

    #[test]
    fn test_save_then_load_keeps_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");

        let book = MemoryWorkbook::new("Budget");
        book.set_cell("B2", 42).unwrap();
        save(&book, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.cell("B2").unwrap(), CellValue::from(42));
        assert_eq!(loaded.to_data().active, "Budget");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read workbook"));
    }
}
