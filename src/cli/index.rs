//! Repository index command

use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::index::IndexReport;
use crate::signing;

/// Run the index command
pub fn run(
    path: &Path,
    parents: &[PathBuf],
    meta: bool,
    key: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let key_path = key.unwrap_or(config.signing.key.as_path());
    let signer = signing::load_signing_key(key_path)?;

    println!("{}", "Indexing repository...".cyan());
    println!("  {}: {}", "Signing key".bold(), signer.fingerprint);
    println!();

    if meta {
        let meta = super::open_meta(path, parents, config)?;
        let reports = meta.index(&signer)?;
        for (name, report) in &reports {
            print_report(name, report);
        }
        println!();
        println!(
            "{} {} sub-repositories indexed",
            "✓".green(),
            reports.len()
        );
    } else {
        let repo = super::open_repository(path, parents, config)?;
        let report = repo.index(&signer)?;
        print_report(&path.display().to_string(), &report);
    }

    Ok(())
}

fn print_report(name: &str, report: &IndexReport) {
    let status = if report.regenerated {
        "(updated)".green()
    } else {
        "(up to date)".dimmed()
    };
    println!(
        "  {} {} {} packages, {} new deltas {}",
        "✓".green(),
        name.bold(),
        report.packages,
        report.deltas.created.len(),
        status
    );

    for (moved, to) in &report.normalized.moved {
        println!("    moved {} -> {}", moved.display(), to.display());
    }
    for path in &report.promoted {
        println!("    promoted {}", path.display());
    }
    for path in &report.pruned {
        println!("    pruned {}", path.display());
    }
    for (path, error) in report.scan_failures.iter().chain(&report.normalized.failures) {
        println!("    {} {} - {}", "✗".red(), path.display(), error.red());
    }
    for (delta, error) in &report.deltas.failures {
        println!("    {} {} - {}", "✗".red(), delta, error.red());
    }
}
