//! Add command implementation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;
use crate::package::PackageRecord;

pub fn run(path: &Path, files: &[PathBuf], sub: Option<&str>, config: &Config) -> Result<()> {
    let tools = super::tools(config);
    let records = files
        .iter()
        .map(|file| {
            PackageRecord::from_file(file, tools.parser.as_ref())
                .with_context(|| format!("Failed to read package: {}", file.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let written = match sub {
        Some(name) => super::open_meta(path, &[], config)?.add_packages(name, &records)?,
        None => super::open_repository(path, &[], config)?.add_packages(&records)?,
    };

    for file in &written {
        println!("  {} {}", "+".green(), file.display());
    }
    println!(
        "{} {} added, {} already present",
        "✓".green(),
        written.len(),
        records.len() - written.len()
    );
    Ok(())
}
