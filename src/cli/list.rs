//! List command implementation

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use crate::config::Config;

#[derive(Serialize)]
struct ListEntry {
    name: String,
    version: String,
    arch: String,
    location: String,
    checksum: String,
    size: u64,
}

pub fn run(path: &Path, json: bool, config: &Config) -> Result<()> {
    let repo = super::open_repository(path, &[], config)?;
    let packages = repo.packages()?;

    let entries: Vec<ListEntry> = packages
        .records()
        .map(|r| ListEntry {
            name: r.name.clone(),
            version: r.version.evr(),
            arch: r.arch.clone(),
            location: repo
                .tree()
                .location(&r.path)
                .unwrap_or_else(|| r.path.display().to_string()),
            checksum: r.checksum.clone(),
            size: r.size,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{}", "Packages:".bold());
    if entries.is_empty() {
        println!("  (no packages)");
    }
    for entry in &entries {
        println!(
            "  {} {} {}",
            entry.name.bold(),
            entry.version.cyan(),
            entry.arch.dimmed()
        );
    }

    Ok(())
}
