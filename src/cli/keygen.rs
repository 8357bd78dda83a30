//! Key generation command implementation

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::signing;

pub fn run(name: &str, email: &str, output: Option<&Path>, config: &Config) -> Result<()> {
    println!("{}", "Generating Ed25519 signing key...".cyan());
    println!();

    let output_dir = output.unwrap_or_else(|| config.signing_key_dir());

    let (_, fingerprint) = signing::generate_key(name, email, output_dir)?;

    println!("{}", "✓ Key generated successfully!".green().bold());
    println!();
    println!("  {}: {}", "Fingerprint".bold(), fingerprint);
    println!(
        "  {}: {}",
        "Public key".bold(),
        output_dir.join("signing-key.pub").display()
    );
    println!(
        "  {}: {}",
        "Secret key".bold(),
        output_dir.join("signing-key.secret").display()
    );
    println!();
    println!("{}", "⚠️  IMPORTANT:".yellow().bold());
    println!("  Keep the secret key private. Anyone holding it can sign");
    println!("  repository metadata that clients will accept.");

    Ok(())
}
