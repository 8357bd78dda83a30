//! Normalize command implementation

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::tree::NormalizeReport;

pub fn run(path: &Path, meta: bool, config: &Config) -> Result<()> {
    if meta {
        let meta = super::open_meta(path, &[], config)?;
        for (name, report) in meta.normalize()? {
            print_report(&name, &report);
        }
    } else {
        let repo = super::open_repository(path, &[], config)?;
        print_report(&path.display().to_string(), &repo.normalize()?);
    }
    Ok(())
}

fn print_report(name: &str, report: &NormalizeReport) {
    println!(
        "  {} {}: {} file(s) moved",
        "✓".green(),
        name.bold(),
        report.moved.len()
    );
    for (path, error) in &report.failures {
        println!("    {} {} - {}", "✗".red(), path.display(), error.red());
    }
}
