//! List command - enumerate a workspace once.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::watcher::EventFilter;
use crate::workspace::list_entries;

pub fn run(path: &Path, json: bool, settings: &Settings) -> Result<()> {
    let filter = EventFilter::from_config(&settings.watch);
    let entries = list_entries(path, &filter)
        .with_context(|| format!("Cannot list {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        if entry.is_dir {
            println!("{}/", entry.path.display());
        } else {
            println!("{}", entry.path.display());
        }
    }
    eprintln!("{} entries", entries.len());
    Ok(())
}
