//! Cryptographic signing of repository metadata
//!
//! Uses Ed25519 signatures via ed25519-dalek. The manifest (`repomd.xml`) gets
//! a detached signature document (`repomd.xml.asc`) and the public key that
//! verifies it is exported next to it (`repomd.xml.key`).

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use base64::prelude::*;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{RepoError, Result};

/// Signs manifests on behalf of a repository.
///
/// The fingerprint takes part in the staleness check, so switching keys
/// regenerates the signature on the next index.
pub trait RepoSigner: Send + Sync {
    fn key_fingerprint(&self) -> String;

    /// Detached signature document for `data`
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Public key document able to verify [`RepoSigner::sign`] output
    fn export_public_key(&self) -> Result<Vec<u8>>;

    /// Check that `signature` is this key's signature over `data`
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()>;
}

/// A loaded signing key with its metadata
pub struct LoadedSigningKey {
    pub key: SigningKey,
    pub fingerprint: String,
    pub name: String,
    pub email: String,
}

impl LoadedSigningKey {
    /// Generate a fresh key that only lives in memory
    pub fn generate(name: &str, email: &str) -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let fingerprint = calculate_fingerprint(&key.verifying_key());
        Self {
            key,
            fingerprint,
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

impl RepoSigner for LoadedSigningKey {
    fn key_fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signature = self.key.sign(data);
        let document = format!(
            r#"# rpmrepo-signature-version: 1.0
type = "ed25519"
fingerprint = "{fingerprint}"
signature = "{signature}"
"#,
            fingerprint = self.fingerprint,
            signature = BASE64_STANDARD.encode(signature.to_bytes()),
        );
        Ok(document.into_bytes())
    }

    fn export_public_key(&self) -> Result<Vec<u8>> {
        Ok(public_key_document(
            &self.key.verifying_key(),
            &self.fingerprint,
            &self.name,
            &self.email,
            None,
        )
        .into_bytes())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let signature = std::str::from_utf8(signature)
            .map_err(|e| RepoError::Signing(e.to_string()))?;
        let key = public_key_document(
            &self.key.verifying_key(),
            &self.fingerprint,
            &self.name,
            &self.email,
            None,
        );
        verify_manifest(data, signature, &key)
    }
}

fn public_key_document(
    key: &VerifyingKey,
    fingerprint: &str,
    name: &str,
    email: &str,
    created: Option<&str>,
) -> String {
    let mut document = format!(
        r#"# rpmrepo-pubkey-version: 1.0
type = "ed25519"
purpose = "repository"
fingerprint = "{fingerprint}"
key = "{public_key}"

[identity]
name = "{name}"
email = "{email}"
"#,
        public_key = BASE64_STANDARD.encode(key.to_bytes()),
    );
    if let Some(created) = created {
        document.push_str(&format!("\n[metadata]\ncreated = \"{created}\"\n"));
    }
    document
}

/// Generate a new Ed25519 signing key pair
pub fn generate_key(
    name: &str,
    email: &str,
    output_dir: &Path,
) -> anyhow::Result<(SigningKey, String)> {
    let loaded = LoadedSigningKey::generate(name, email);
    let fingerprint = loaded.fingerprint.clone();
    let timestamp = chrono::Utc::now().to_rfc3339();

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create key directory: {}", output_dir.display()))?;

    let secret_path = output_dir.join("signing-key.secret");
    let secret_content = Zeroizing::new(format!(
        r#"# rpmrepo-secretkey-version: 1.0
# WARNING: Keep this file secure! Mode should be 0600.
type = "ed25519"
purpose = "repository"
fingerprint = "{fingerprint}"
secret-key = "{secret_key}"

[identity]
name = "{name}"
email = "{email}"

[metadata]
created = "{timestamp}"
"#,
        secret_key = BASE64_STANDARD.encode(loaded.key.to_bytes()),
    ));

    // Write with secure permissions
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&secret_path)?;
        std::io::Write::write_all(&mut file, secret_content.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(&secret_path, secret_content.as_bytes())?;
    }

    let public_path = output_dir.join("signing-key.pub");
    let public_content = public_key_document(
        &loaded.key.verifying_key(),
        &fingerprint,
        name,
        email,
        Some(&timestamp),
    );
    fs::write(&public_path, public_content)?;

    Ok((loaded.key, fingerprint))
}

/// Load an existing signing key
pub fn load_signing_key(key_path: &Path) -> anyhow::Result<LoadedSigningKey> {
    if !key_path.exists() {
        bail!("Signing key not found at: {}", key_path.display());
    }

    // Check permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let metadata = fs::metadata(key_path)?;
        let mode = metadata.mode() & 0o777;
        if mode != 0o600 {
            bail!(
                "Signing key has insecure permissions: {:o} (expected 0600). Fix with: chmod 600 {}",
                mode,
                key_path.display()
            );
        }
    }

    let content = Zeroizing::new(fs::read_to_string(key_path)?);
    let parsed: toml::Value = toml::from_str(&content)?;

    let secret_key_b64 = parsed
        .get("secret-key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing secret-key in key file"))?;

    let secret_bytes = Zeroizing::new(BASE64_STANDARD.decode(secret_key_b64)?);
    if secret_bytes.len() != 32 {
        bail!("Invalid secret key length");
    }

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    key_bytes.copy_from_slice(&secret_bytes);
    let signing_key = SigningKey::from_bytes(&key_bytes);

    let identity = parsed.get("identity");
    let name = identity
        .and_then(|i| i.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let email = identity
        .and_then(|i| i.get("email"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown@example.org")
        .to_string();

    // Verify key works by signing and verifying a test message
    let test_msg = b"rpmrepo-signing-test";
    let signature = signing_key.sign(test_msg);
    signing_key
        .verifying_key()
        .verify(test_msg, &signature)
        .map_err(|_| anyhow::anyhow!("Signing key verification failed"))?;

    // Recompute rather than trust the file
    let fingerprint = calculate_fingerprint(&signing_key.verifying_key());

    Ok(LoadedSigningKey {
        key: signing_key,
        fingerprint,
        name,
        email,
    })
}

/// Calculate the fingerprint of a verifying (public) key
pub fn calculate_fingerprint(key: &VerifyingKey) -> String {
    let hash = Sha256::digest(key.as_bytes());
    format!("ED25519:SHA256:{}", hex::encode(&hash[..16]))
}

/// Verify a manifest against its detached signature and exported key documents
pub fn verify_manifest(manifest: &[u8], signature_doc: &str, key_doc: &str) -> Result<()> {
    let bad = |what: &str| RepoError::Signing(what.to_string());

    let key: toml::Value = toml::from_str(key_doc).map_err(|e| bad(&e.to_string()))?;
    let signature: toml::Value = toml::from_str(signature_doc).map_err(|e| bad(&e.to_string()))?;

    let key_bytes = key
        .get("key")
        .and_then(|v| v.as_str())
        .and_then(|s| BASE64_STANDARD.decode(s).ok())
        .and_then(|b| <[u8; 32]>::try_from(b).ok())
        .ok_or_else(|| bad("malformed public key"))?;
    let public_key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| bad(&e.to_string()))?;

    let signature_bytes = signature
        .get("signature")
        .and_then(|v| v.as_str())
        .and_then(|s| BASE64_STANDARD.decode(s).ok())
        .and_then(|b| <[u8; 64]>::try_from(b).ok())
        .ok_or_else(|| bad("malformed signature"))?;

    public_key
        .verify(manifest, &Signature::from_bytes(&signature_bytes))
        .map_err(|_| bad("signature verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_generation() {
        let dir = tempdir().unwrap();
        let (key, fingerprint) = generate_key("Test User", "test@example.org", dir.path()).unwrap();

        assert!(fingerprint.starts_with("ED25519:SHA256:"));
        assert!(dir.path().join("signing-key.secret").exists());
        assert!(dir.path().join("signing-key.pub").exists());

        let message = b"test message";
        let signature = key.sign(message);
        key.verifying_key().verify(message, &signature).unwrap();
    }

    #[test]
    fn test_load_generated_key() {
        let dir = tempdir().unwrap();
        let (_, fingerprint) = generate_key("Test User", "test@example.org", dir.path()).unwrap();

        let loaded = load_signing_key(&dir.path().join("signing-key.secret")).unwrap();
        assert_eq!(loaded.fingerprint, fingerprint);
        assert_eq!(loaded.name, "Test User");
    }

    #[test]
    fn test_sign_and_verify_manifest() {
        let signer = LoadedSigningKey::generate("Test User", "test@example.org");
        let manifest = b"<repomd/>";

        let signature = String::from_utf8(signer.sign(manifest).unwrap()).unwrap();
        let key = String::from_utf8(signer.export_public_key().unwrap()).unwrap();

        verify_manifest(manifest, &signature, &key).unwrap();
        assert!(verify_manifest(b"<repomd>tampered</repomd>", &signature, &key).is_err());

        signer.verify(manifest, signature.as_bytes()).unwrap();
        let other = LoadedSigningKey::generate("Other User", "other@example.org");
        assert!(other.verify(manifest, signature.as_bytes()).is_err());
    }

    #[test]
    fn test_export_is_stable() {
        let signer = LoadedSigningKey::generate("Test User", "test@example.org");
        assert_eq!(
            signer.export_public_key().unwrap(),
            signer.export_public_key().unwrap()
        );
    }
}
