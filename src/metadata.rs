//! Repository metadata (`repodata/`) documents
//!
//! Produces the createrepo-compatible `primary`, `filelists`, `other` and
//! `prestodelta` documents and the `repomd.xml` manifest that lists them.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::delta::PublishedDelta;
use crate::error::{RepoError, Result};
use crate::package::{PackageIdentity, PackageRecord, Relation};
use crate::version::Version;

pub const REPOMD_FILE: &str = "repomd.xml";
pub const SIGNATURE_FILE: &str = "repomd.xml.asc";
pub const PUBLIC_KEY_FILE: &str = "repomd.xml.key";

const NS_COMMON: &str = "http://linux.duke.edu/metadata/common";
const NS_RPM: &str = "http://linux.duke.edu/metadata/rpm";
const NS_FILELISTS: &str = "http://linux.duke.edu/metadata/filelists";
const NS_OTHER: &str = "http://linux.duke.edu/metadata/other";
const NS_REPO: &str = "http://linux.duke.edu/metadata/repo";

/// A `repomd.xml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMd {
    /// Fingerprint of the inputs this manifest was generated from
    pub revision: String,
    /// The documents constituting this repository.
    #[serde(default)]
    pub data: Vec<RepoMdData>,
}

impl RepoMd {
    /// Construct an instance by parsing XML from a string.
    pub fn from_xml(s: &str) -> Result<Self> {
        quick_xml::de::from_str(s).map_err(|e| RepoError::Metadata(e.to_string()))
    }

    /// Find a document by type
    pub fn find(&self, data_type: &str) -> Option<&RepoMdData> {
        self.data.iter().find(|d| d.data_type == data_type)
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut w = xml_writer();
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        w.create_element("repomd")
            .with_attributes([("xmlns", NS_REPO), ("xmlns:rpm", NS_RPM)])
            .write_inner_content(|w| {
                text_element(w, "revision", &self.revision)?;
                for data in &self.data {
                    w.create_element("data")
                        .with_attribute(("type", data.data_type.as_str()))
                        .write_inner_content(|w| {
                            checksum_element(w, "checksum", &data.checksum)?;
                            if let Some(open) = &data.open_checksum {
                                checksum_element(w, "open-checksum", open)?;
                            }
                            w.create_element("location")
                                .with_attribute(("href", data.location.href.as_str()))
                                .write_empty()?;
                            if let Some(timestamp) = data.timestamp {
                                text_element(w, "timestamp", &timestamp.to_string())?;
                            }
                            if let Some(size) = data.size {
                                text_element(w, "size", &size.to_string())?;
                            }
                            if let Some(open_size) = data.open_size {
                                text_element(w, "open-size", &open_size.to_string())?;
                            }
                            Ok::<(), quick_xml::Error>(())
                        })?;
                }
                Ok::<(), quick_xml::Error>(())
            })?;

        let mut xml = w.into_inner();
        xml.push(b'\n');
        String::from_utf8(xml).map_err(|e| RepoError::Metadata(e.to_string()))
    }
}

/// A `<data>` element in a `repomd.xml` file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepoMdData {
    /// The type of data.
    #[serde(rename = "@type")]
    pub data_type: String,
    /// Content checksum of this file.
    pub checksum: Checksum,
    /// Where the file is located.
    pub location: Location,
    /// Size in bytes of the file as stored in the repository.
    pub size: Option<u64>,
    /// Time file was created.
    pub timestamp: Option<i64>,
    /// Content checksum of the decompressed file.
    #[serde(rename = "open-checksum")]
    pub open_checksum: Option<Checksum>,
    /// Size in bytes of the decompressed file.
    #[serde(rename = "open-size")]
    pub open_size: Option<u64>,
}

/// The content checksum of a `<data>` element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Checksum {
    #[serde(rename = "@type")]
    pub name: String,
    #[serde(rename = "$text")]
    pub value: String,
}

impl Checksum {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            name: "sha256".to_string(),
            value: value.into(),
        }
    }
}

/// The location of a `<data>` element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Location {
    #[serde(rename = "@href")]
    pub href: String,
}

/// A package as it appears in the indexes
#[derive(Debug, Clone)]
pub struct IndexedPackage<'a> {
    pub record: &'a PackageRecord,
    /// Repository-relative location of the package file
    pub location: String,
}

/// One compressed metadata document, ready to be written
#[derive(Debug, Clone)]
pub struct Document {
    pub data_type: &'static str,
    /// Uncompressed XML
    pub open: Vec<u8>,
    /// Gzip-compressed XML
    pub compressed: Vec<u8>,
}

impl Document {
    fn new(data_type: &'static str, open: Vec<u8>) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&open)?;
        let compressed = encoder.finish()?;
        Ok(Self {
            data_type,
            open,
            compressed,
        })
    }

    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.compressed))
    }

    pub fn open_checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.open))
    }

    /// `repodata/<checksum>-<type>.xml.gz`
    pub fn file_name(&self) -> String {
        format!("{}-{}.xml.gz", self.checksum(), self.data_type)
    }

    pub fn manifest_entry(&self, timestamp: i64) -> RepoMdData {
        RepoMdData {
            data_type: self.data_type.to_string(),
            checksum: Checksum::sha256(self.checksum()),
            location: Location {
                href: format!("repodata/{}", self.file_name()),
            },
            size: Some(self.compressed.len() as u64),
            timestamp: Some(timestamp),
            open_checksum: Some(Checksum::sha256(self.open_checksum())),
            open_size: Some(self.open.len() as u64),
        }
    }
}

type XmlWriter = Writer<Vec<u8>>;

fn xml_writer() -> XmlWriter {
    Writer::new_with_indent(Vec::new(), b' ', 2)
}

fn text_element(w: &mut XmlWriter, name: &str, text: &str) -> quick_xml::Result<()> {
    w.create_element(name)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn checksum_element(w: &mut XmlWriter, name: &str, checksum: &Checksum) -> quick_xml::Result<()> {
    w.create_element(name)
        .with_attribute(("type", checksum.name.as_str()))
        .write_text_content(BytesText::new(&checksum.value))?;
    Ok(())
}

fn version_element(w: &mut XmlWriter, version: &Version) -> quick_xml::Result<()> {
    let epoch = version.epoch.to_string();
    w.create_element("version")
        .with_attributes([
            ("epoch", epoch.as_str()),
            ("ver", version.version.as_str()),
            ("rel", version.release.as_str()),
        ])
        .write_empty()?;
    Ok(())
}

fn relations_element(w: &mut XmlWriter, name: &str, relations: &[Relation]) -> quick_xml::Result<()> {
    if relations.is_empty() {
        return Ok(());
    }
    w.create_element(name).write_inner_content(|w| {
        for relation in relations {
            let mut entry = w
                .create_element("rpm:entry")
                .with_attribute(("name", relation.name.as_str()));
            if let (Some(flags), Some(version)) = (&relation.flags, &relation.version) {
                let epoch = version.epoch.to_string();
                entry = entry.with_attributes([
                    ("flags", flags.as_str()),
                    ("epoch", epoch.as_str()),
                    ("ver", version.version.as_str()),
                    ("rel", version.release.as_str()),
                ]);
            }
            entry.write_empty()?;
        }
        Ok::<(), quick_xml::Error>(())
    })?;
    Ok(())
}

fn primary_entry(pkg: &IndexedPackage<'_>) -> quick_xml::Result<Vec<u8>> {
    let r = pkg.record;
    let mut w = xml_writer();
    w.create_element("package")
        .with_attribute(("type", "rpm"))
        .write_inner_content(|w| {
            text_element(w, "name", &r.name)?;
            text_element(w, "arch", &r.arch)?;
            version_element(w, &r.version)?;
            w.create_element("checksum")
                .with_attributes([("type", "sha256"), ("pkgid", "YES")])
                .write_text_content(BytesText::new(&r.checksum))?;
            text_element(w, "summary", &r.summary)?;
            text_element(w, "description", &r.description)?;
            text_element(w, "packager", r.packager.as_deref().unwrap_or(""))?;
            text_element(w, "url", r.url.as_deref().unwrap_or(""))?;

            let build_time = r.build_time.to_string();
            w.create_element("time")
                .with_attributes([("file", build_time.as_str()), ("build", build_time.as_str())])
                .write_empty()?;

            let size = r.size.to_string();
            let installed = r.installed_size.to_string();
            w.create_element("size")
                .with_attributes([
                    ("package", size.as_str()),
                    ("installed", installed.as_str()),
                    ("archive", installed.as_str()),
                ])
                .write_empty()?;

            w.create_element("location")
                .with_attribute(("href", pkg.location.as_str()))
                .write_empty()?;
            w.create_element("format").write_inner_content(|w| {
                text_element(w, "rpm:license", r.license.as_deref().unwrap_or(""))?;
                relations_element(w, "rpm:provides", &r.provides)?;
                relations_element(w, "rpm:requires", &r.requires)?;
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok::<(), quick_xml::Error>(())
        })?;
    Ok(w.into_inner())
}

fn package_start(r: &PackageRecord) -> BytesStart<'_> {
    BytesStart::new("package").with_attributes([
        ("pkgid", r.checksum.as_str()),
        ("name", r.name.as_str()),
        ("arch", r.arch.as_str()),
    ])
}

fn filelists_entry(pkg: &IndexedPackage<'_>) -> quick_xml::Result<Vec<u8>> {
    let r = pkg.record;
    let start = package_start(r);
    let mut w = xml_writer();
    w.write_event(Event::Start(start.borrow()))?;
    version_element(&mut w, &r.version)?;
    for file in &r.files {
        text_element(&mut w, "file", file)?;
    }
    w.write_event(Event::End(start.to_end()))?;
    Ok(w.into_inner())
}

fn other_entry(pkg: &IndexedPackage<'_>) -> quick_xml::Result<Vec<u8>> {
    let r = pkg.record;
    let start = package_start(r);
    let mut w = xml_writer();
    w.write_event(Event::Start(start.borrow()))?;
    version_element(&mut w, &r.version)?;
    w.write_event(Event::End(start.to_end()))?;
    Ok(w.into_inner())
}

/// Wrap per-package fragments in the document root element
fn document(data_type: &'static str, root: BytesStart<'_>, fragments: Vec<Vec<u8>>) -> Result<Document> {
    let mut w = xml_writer();
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(root.borrow()))?;
    for fragment in fragments {
        w.get_mut().write_all(b"\n")?;
        w.get_mut().write_all(&fragment)?;
    }
    w.write_event(Event::End(root.to_end()))?;

    let mut xml = w.into_inner();
    xml.push(b'\n');
    Document::new(data_type, xml)
}

/// Build the package documents (`primary`, `filelists`, `other`).
///
/// Per-package fragments are independent and built in parallel; the
/// fragments keep the input order.
pub fn package_documents(packages: &[IndexedPackage<'_>]) -> Result<Vec<Document>> {
    let count = packages.len().to_string();

    let fragments: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)> = packages
        .par_iter()
        .map(|pkg| -> quick_xml::Result<_> {
            Ok((primary_entry(pkg)?, filelists_entry(pkg)?, other_entry(pkg)?))
        })
        .collect::<quick_xml::Result<_>>()?;

    let mut primary = Vec::with_capacity(packages.len());
    let mut filelists = Vec::with_capacity(packages.len());
    let mut other = Vec::with_capacity(packages.len());
    for (p, f, o) in fragments {
        primary.push(p);
        filelists.push(f);
        other.push(o);
    }

    Ok(vec![
        document(
            "primary",
            BytesStart::new("metadata").with_attributes([
                ("xmlns", NS_COMMON),
                ("xmlns:rpm", NS_RPM),
                ("packages", count.as_str()),
            ]),
            primary,
        )?,
        document(
            "filelists",
            BytesStart::new("filelists")
                .with_attributes([("xmlns", NS_FILELISTS), ("packages", count.as_str())]),
            filelists,
        )?,
        document(
            "other",
            BytesStart::new("otherdata")
                .with_attributes([("xmlns", NS_OTHER), ("packages", count.as_str())]),
            other,
        )?,
    ])
}

/// Build the `prestodelta` document listing the available deltas
pub fn delta_document(deltas: &[PublishedDelta]) -> Result<Document> {
    // Deltas are grouped under the package they produce
    let mut targets: BTreeMap<(PackageIdentity, Version), Vec<&PublishedDelta>> = BTreeMap::new();
    for delta in deltas {
        let key = (delta.descriptor.identity(), delta.descriptor.new.clone());
        targets.entry(key).or_default().push(delta);
    }

    let entries = targets
        .iter()
        .map(|((identity, new), group)| delta_entry(identity, new, group))
        .collect::<quick_xml::Result<Vec<_>>>()?;

    document("prestodelta", BytesStart::new("prestodelta"), entries)
}

fn delta_entry(
    identity: &PackageIdentity,
    new: &Version,
    group: &[&PublishedDelta],
) -> quick_xml::Result<Vec<u8>> {
    let epoch = new.epoch.to_string();
    let mut w = xml_writer();
    w.create_element("newpackage")
        .with_attributes([
            ("name", identity.name.as_str()),
            ("epoch", epoch.as_str()),
            ("version", new.version.as_str()),
            ("release", new.release.as_str()),
            ("arch", identity.arch.as_str()),
        ])
        .write_inner_content(|w| {
            for delta in group {
                let old = &delta.descriptor.old;
                let old_epoch = old.epoch.to_string();
                w.create_element("delta")
                    .with_attributes([
                        ("oldepoch", old_epoch.as_str()),
                        ("oldversion", old.version.as_str()),
                        ("oldrelease", old.release.as_str()),
                    ])
                    .write_inner_content(|w| {
                        text_element(w, "filename", &format!("drpms/{}", delta.file_name))?;
                        text_element(w, "size", &delta.size.to_string())?;
                        w.create_element("checksum")
                            .with_attribute(("type", "sha256"))
                            .write_text_content(BytesText::new(&delta.checksum))?;
                        Ok::<(), quick_xml::Error>(())
                    })?;
            }
            Ok::<(), quick_xml::Error>(())
        })?;
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaDescriptor;
    use crate::package::PackageHeader;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::Path;

    fn record(version: &str, release: &str) -> PackageRecord {
        let header = PackageHeader {
            name: "jicmp".to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: "x86_64".to_string(),
            summary: "ICMP <java> & friends".to_string(),
            files: vec!["/usr/lib/libjicmp.so".to_string()],
            requires: vec![Relation::unversioned("glibc")],
            ..Default::default()
        };
        PackageRecord::from_header(
            header,
            Path::new("/repo/rpms/jicmp/x86_64/jicmp.rpm"),
            "abc".to_string(),
            10,
        )
    }

    fn gunzip(data: &[u8]) -> String {
        let mut out = String::new();
        GzDecoder::new(data).read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_filelists_lists_versions() {
        let records = [record("1.4.1", "1"), record("2.0.0", "0.1")];
        let packages: Vec<_> = records
            .iter()
            .map(|r| IndexedPackage {
                record: r,
                location: "rpms/jicmp/x86_64/jicmp.rpm".to_string(),
            })
            .collect();

        let documents = package_documents(&packages).unwrap();
        assert_eq!(documents.len(), 3);

        let filelists = gunzip(&documents[1].compressed);
        assert!(filelists.contains("packages=\"2\""));
        assert!(filelists.contains("<version epoch=\"0\" ver=\"1.4.1\" rel=\"1\"/>"));
        assert!(filelists.contains("<version epoch=\"0\" ver=\"2.0.0\" rel=\"0.1\"/>"));
        assert!(filelists.contains("<file>/usr/lib/libjicmp.so</file>"));

        let primary = gunzip(&documents[0].compressed);
        assert!(primary.contains("<summary>ICMP &lt;java&gt; &amp; friends</summary>"));
        assert!(primary.contains("<rpm:entry name=\"glibc\"/>"));
        assert!(documents[0].file_name().ends_with("-primary.xml.gz"));
    }

    #[test]
    fn test_repomd_round_trip() {
        let doc = Document::new("primary", b"<metadata/>".to_vec()).unwrap();
        let repomd = RepoMd {
            revision: "deadbeef".to_string(),
            data: vec![doc.manifest_entry(1_500_000_000)],
        };

        let parsed = RepoMd::from_xml(&repomd.to_xml().unwrap()).unwrap();
        assert_eq!(parsed.revision, "deadbeef");
        let primary = parsed.find("primary").unwrap();
        assert_eq!(primary.checksum.value, doc.checksum());
        assert_eq!(primary.size, Some(doc.compressed.len() as u64));
        assert_eq!(primary.location.href, format!("repodata/{}", doc.file_name()));
    }

    #[test]
    fn test_repomd_rejects_garbage() {
        assert!(RepoMd::from_xml("not xml at all <").is_err());
    }

    #[test]
    fn test_delta_document_groups_by_target() {
        let identity = PackageIdentity::new("jicmp", "x86_64");
        let new = Version::parse("2.0.0-0.1");
        let deltas: Vec<PublishedDelta> = ["1.4.1-1", "1.4.5-2"]
            .iter()
            .map(|old| {
                let descriptor = DeltaDescriptor::new(&identity, &Version::parse(old), &new);
                PublishedDelta {
                    file_name: descriptor.file_name(),
                    descriptor,
                    size: 3,
                    checksum: "feed".to_string(),
                }
            })
            .collect();

        let xml = gunzip(&delta_document(&deltas).unwrap().compressed);
        assert_eq!(xml.matches("<newpackage ").count(), 1);
        assert_eq!(xml.matches("<delta ").count(), 2);
        assert!(xml.contains("<filename>drpms/jicmp-1.4.1-1_2.0.0-0.1.x86_64.drpm</filename>"));
    }
}
