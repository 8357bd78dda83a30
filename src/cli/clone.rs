//! Clone command implementation

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;

pub fn run(source: &Path, target: &Path, meta: bool, config: &Config) -> Result<()> {
    if meta {
        super::open_meta(source, &[], config)?.clone_into(target)?;
    } else {
        super::open_repository(source, &[], config)?.clone_into(target)?;
    }

    println!(
        "{} Cloned {} into {}",
        "✓".green(),
        source.display(),
        target.display().to_string().bold()
    );
    Ok(())
}
