//! `repomd.xml` manifest: the index of compressed metadata databases for one (sub-repo, arch).

use crate::errors::*;
use digest::Digest;
use serde::Deserialize;
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename = "repomd")]
pub struct RepoMd {
    pub revision: i64,
    #[serde(rename = "data", default)]
    pub data: Vec<MetadataEntry>,
}

impl RepoMd {
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(serde_xml_rs::from_str(xml)?)
    }

    pub fn find(&self, data_type: &str) -> Option<&MetadataEntry> {
        self.data.iter().find(|e| e.data_type == data_type)
    }

    /// Verifies every entry's referenced file against its recorded checksum.
    /// `dir` is the directory `location.href` is relative to (the arch directory,
    /// so hrefs of the form `repodata/...` resolve correctly).
    pub fn validate(&self, dir: &Path) -> Result<()> {
        for entry in &self.data {
            let path = dir.join(&entry.location.href);
            let actual = hash_file(&entry.checksum.algo, &path)?;
            if actual != entry.checksum.value.to_lowercase() {
                return Err(Error::ChecksumMismatch {
                    entry: entry.data_type.clone(),
                    expected: entry.checksum.value.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename = "data")]
pub struct MetadataEntry {
    #[serde(rename = "@type")]
    pub data_type: String,
    pub checksum: Checksum,
    #[serde(rename = "open-checksum", default)]
    pub open_checksum: Option<Checksum>,
    pub location: Location,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "open-size", default)]
    pub open_size: Option<u64>,
    #[serde(rename = "header-size", default)]
    pub header_size: Option<u64>,
    #[serde(default)]
    pub database_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Checksum {
    #[serde(rename = "@type")]
    pub algo: String,
    #[serde(rename = "#text")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Location {
    #[serde(rename = "@href")]
    pub href: String,
}

fn hash_file(algo: &str, path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let digest = match algo {
        "md5" => hex::encode(copy_digest(&mut file, md5::Md5::new())?),
        "sha1" => hex::encode(copy_digest(&mut file, sha1::Sha1::new())?),
        "sha224" => hex::encode(copy_digest(&mut file, sha2::Sha224::new())?),
        "sha256" => hex::encode(copy_digest(&mut file, sha2::Sha256::new())?),
        "sha384" => hex::encode(copy_digest(&mut file, sha2::Sha384::new())?),
        "sha512" => hex::encode(copy_digest(&mut file, sha2::Sha512::new())?),
        other => return Err(Error::InvalidChecksumAlgo(other.to_string())),
    };
    Ok(digest)
}

fn copy_digest<D: Digest + io::Write>(reader: &mut impl io::Read, mut hasher: D) -> Result<Vec<u8>> {
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}
