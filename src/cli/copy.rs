//! Copy command implementation

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::package::PackageFilter;

pub fn run(
    source: &Path,
    target: &Path,
    name: Option<&str>,
    regex: Option<&str>,
    config: &Config,
) -> Result<()> {
    let filter = match (name, regex) {
        (Some(name), _) => Some(PackageFilter::exact(name)),
        (None, Some(pattern)) => Some(PackageFilter::regex(pattern)?),
        (None, None) => None,
    };

    let source = super::open_repository(source, &[], config)?;
    let target = super::open_repository(target, &[], config)?;
    let written = target.add_packages_from(&source, filter.as_ref())?;

    for file in &written {
        println!("  {} {}", "+".green(), file.display());
    }
    println!("{} {} package(s) copied", "✓".green(), written.len());
    Ok(())
}
