pub mod chat;
pub mod workbook_file;

use anyhow::{Context, Result};
use fintelligent::config::{FileConfig, load_config};
use std::path::Path;

/// `fintel config`: show what the layered config resolved to.
pub fn print_config(config_dir: &Path) -> Result<()> {
    let fc: FileConfig = load_config(config_dir)
        .extract()
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&fc)?);
    Ok(())
}
