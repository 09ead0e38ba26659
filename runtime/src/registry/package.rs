//! Package metadata and the gzip+tar package format (`spec.md` §3, §4.5;
//! wrapper/dotfile stripping concretised in `SPEC_FULL.md` §6).

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{RuntimeError, RuntimeResult};
use super::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Lib,
    Agent,
    Tool,
}

impl PackageKind {
    fn parse(s: &str) -> RuntimeResult<Self> {
        match s {
            "lib" => Ok(PackageKind::Lib),
            "agent" => Ok(PackageKind::Agent),
            "tool" => Ok(PackageKind::Tool),
            other => Err(RuntimeError::registry(format!("unknown package type: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageMeta {
    pub name: String,
    pub version: Version,
    pub kind: PackageKind,
    pub entry: String,
    pub dependencies: BTreeMap<String, String>,
    pub checksum: Option<String>,
    pub size: u64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PackageMetaRaw {
    name: String,
    version: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default = "default_entry")]
    entry: String,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    description: Option<String>,
}

fn default_kind() -> String {
    "lib".to_string()
}

fn default_entry() -> String {
    "init.luau".to_string()
}

impl PackageMeta {
    pub fn from_json(bytes: &[u8]) -> RuntimeResult<Self> {
        let raw: PackageMetaRaw =
            serde_json::from_slice(bytes).map_err(|e| RuntimeError::registry(format!("invalid pkg.json: {e}")))?;
        if raw.name.is_empty() {
            return Err(RuntimeError::registry("pkg.json: name must not be empty"));
        }
        let version = Version::parse(&raw.version).map_err(RuntimeError::registry)?;
        let kind = PackageKind::parse(&raw.kind)?;
        Ok(Self {
            name: raw.name,
            version,
            kind,
            entry: raw.entry,
            dependencies: raw.dependencies,
            checksum: raw.checksum,
            size: raw.size,
            description: raw.description,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub meta: PackageMeta,
    pub entry_source: String,
    pub files: BTreeMap<String, Vec<u8>>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Verify `bytes` against an advertised checksum, compared case-sensitively
/// (`spec.md` §6 — lower-case hex on both sides). `None` means no checksum
/// was advertised, which is accepted (`spec.md` §4.5).
pub fn verify_checksum(bytes: &[u8], expected: Option<&str>) -> RuntimeResult<()> {
    match expected {
        None => Ok(()),
        Some(expected) => {
            let actual = sha256_hex(bytes);
            if actual == expected {
                Ok(())
            } else {
                Err(RuntimeError::registry(format!("checksum mismatch: expected {expected}, got {actual}")))
            }
        }
    }
}

/// Normalise a tar entry path: strip a leading `./`. Returns `None` for
/// paths that are empty or that (after stripping) still reference `..` —
/// rejected up front rather than silently dropped.
fn normalize_path(raw: &str) -> Option<String> {
    let trimmed = raw.strip_prefix("./").unwrap_or(raw);
    if trimmed.is_empty() || trimmed.split('/').any(|c| c == "..") {
        return None;
    }
    Some(trimmed.to_string())
}

fn is_dotfile(path: &str) -> bool {
    path.split('/').any(|component| component.starts_with('.') && component != "." && component != "..")
}

/// If the first entry's first path component doesn't look like a `.luau`
/// file itself, treat it as a wrapper directory and strip it from every
/// path exactly once (`spec.md` §6).
fn strip_wrapper_dir(paths: &[String]) -> Vec<String> {
    let Some(first) = paths.first() else {
        return Vec::new();
    };
    let Some((candidate, _)) = first.split_once('/') else {
        return paths.to_vec();
    };
    if candidate.ends_with(".luau") {
        return paths.to_vec();
    }
    let strip = format!("{candidate}/");
    paths.iter().map(|p| p.strip_prefix(strip.as_str()).unwrap_or(p).to_string()).collect()
}

/// Parse a gzip+tar package tarball into a [`Package`] (`spec.md` §3, §4.5).
pub fn parse_tarball(bytes: &[u8]) -> RuntimeResult<Package> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);

    let mut raw_entries: Vec<(String, Vec<u8>)> = Vec::new();
    let entries = archive.entries().map_err(|e| RuntimeError::registry(format!("invalid tarball: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| RuntimeError::registry(format!("invalid tarball entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| RuntimeError::registry(format!("invalid tarball path: {e}")))?
            .to_string_lossy()
            .into_owned();
        let Some(normalized) = normalize_path(&path) else {
            continue;
        };
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(RuntimeError::from)?;
        raw_entries.push((normalized, data));
    }

    let paths: Vec<String> = raw_entries.iter().map(|(p, _)| p.clone()).collect();
    let stripped = strip_wrapper_dir(&paths);

    let mut files = BTreeMap::new();
    for ((_, data), path) in raw_entries.into_iter().zip(stripped) {
        if is_dotfile(&path) {
            continue;
        }
        files.insert(path, data);
    }

    let pkg_json = files
        .get("pkg.json")
        .ok_or_else(|| RuntimeError::registry("tarball missing pkg.json"))?;
    let meta = PackageMeta::from_json(pkg_json)?;

    let entry_bytes = files
        .get(&meta.entry)
        .ok_or_else(|| RuntimeError::registry(format!("tarball missing declared entry file: {}", meta.entry)))?;
    let entry_source = String::from_utf8(entry_bytes.clone())
        .map_err(|_| RuntimeError::registry(format!("entry file {} is not valid utf-8", meta.entry)))?;

    Ok(Package { meta, entry_source, files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn parses_a_minimal_package() {
        let pkg_json = br#"{"name":"demo","version":"1.0.0"}"#;
        let entry = b"return {}";
        let tarball = build_tarball(&[("pkg.json", pkg_json), ("init.luau", entry)]);
        let pkg = parse_tarball(&tarball).unwrap();
        assert_eq!(pkg.meta.name, "demo");
        assert_eq!(pkg.meta.version, Version::new(1, 0, 0));
        assert_eq!(pkg.entry_source, "return {}");
    }

    #[test]
    fn strips_a_single_wrapper_directory() {
        let pkg_json = br#"{"name":"demo","version":"1.0.0"}"#;
        let entry = b"return {}";
        let tarball = build_tarball(&[("demo-1.0.0/pkg.json", pkg_json), ("demo-1.0.0/init.luau", entry)]);
        let pkg = parse_tarball(&tarball).unwrap();
        assert_eq!(pkg.meta.name, "demo");
        assert!(pkg.files.contains_key("pkg.json"));
    }

    #[test]
    fn drops_dotfiles() {
        let pkg_json = br#"{"name":"demo","version":"1.0.0"}"#;
        let entry = b"return {}";
        let tarball = build_tarball(&[("pkg.json", pkg_json), ("init.luau", entry), (".DS_Store", b"junk")]);
        let pkg = parse_tarball(&tarball).unwrap();
        assert!(!pkg.files.contains_key(".DS_Store"));
    }

    #[test]
    fn missing_pkg_json_is_a_registry_error() {
        let tarball = build_tarball(&[("init.luau", b"return {}")]);
        let err = parse_tarball(&tarball).unwrap_err();
        assert!(matches!(err, RuntimeError::Registry(_)));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let bytes = b"hello world";
        let err = verify_checksum(bytes, Some("0000000000000000000000000000000000000000000000000000000000000000")).unwrap_err();
        assert!(matches!(err, RuntimeError::Registry(_)));
    }

    #[test]
    fn checksum_match_is_accepted() {
        let bytes = b"hello world";
        let digest = sha256_hex(bytes);
        verify_checksum(bytes, Some(&digest)).unwrap();
    }
}
