//! Index generator driver (C9): wraps the external `createrepo_c` invocation.

use crate::errors::*;
use crate::utils::{resolve_gid, resolve_uid};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgo {
    fn as_str(self) -> &'static str {
        match self {
            ChecksumAlgo::Md5 => "md5",
            ChecksumAlgo::Sha1 => "sha1",
            ChecksumAlgo::Sha224 => "sha224",
            ChecksumAlgo::Sha256 => "sha256",
            ChecksumAlgo::Sha384 => "sha384",
            ChecksumAlgo::Sha512 => "sha512",
        }
    }
}

impl std::str::FromStr for ChecksumAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "md5" => Ok(ChecksumAlgo::Md5),
            "sha1" => Ok(ChecksumAlgo::Sha1),
            "sha224" => Ok(ChecksumAlgo::Sha224),
            "sha256" => Ok(ChecksumAlgo::Sha256),
            "sha384" => Ok(ChecksumAlgo::Sha384),
            "sha512" => Ok(ChecksumAlgo::Sha512),
            other => Err(Error::InvalidChecksumAlgo(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Gz,
    Bz2,
    Xz,
    Zstd,
}

impl CompressionType {
    fn as_str(self) -> &'static str {
        match self {
            CompressionType::Gz => "gz",
            CompressionType::Bz2 => "bz2",
            CompressionType::Xz => "xz",
            CompressionType::Zstd => "zstd",
        }
    }
}

impl std::str::FromStr for CompressionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gz" => Ok(CompressionType::Gz),
            "bz2" => Ok(CompressionType::Bz2),
            "xz" => Ok(CompressionType::Xz),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(Error::InvalidCompression(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameScheme {
    Simple,
    Unique,
}

impl FilenameScheme {
    fn as_str(self) -> &'static str {
        match self {
            FilenameScheme::Simple => "simple",
            FilenameScheme::Unique => "unique",
        }
    }
}

impl std::str::FromStr for FilenameScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(FilenameScheme::Simple),
            "unique" => Ok(FilenameScheme::Unique),
            other => Err(Error::InvalidFilenameScheme(other.to_string())),
        }
    }
}

/// Validated options for one `createrepo_c` invocation (spec §4.5).
#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub checksum: ChecksumAlgo,
    pub compression: CompressionType,
    pub filename_scheme: FilenameScheme,
    pub workers: u32,
    pub changelog_limit: u32,
    pub distro_tag: Option<String>,
    pub content_tag: Option<String>,
    pub revision: Option<String>,
    pub delta: bool,
    pub delta_num_deltas: u32,
    pub pretty: bool,
    pub update: bool,
    pub split: bool,
    pub skip_symlinks: bool,
    pub zchunk: bool,
    pub groupfile: Option<PathBuf>,
    pub owner: Option<(String, String)>,
    pub binary: PathBuf,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        ReindexOptions {
            checksum: ChecksumAlgo::Sha256,
            compression: CompressionType::Gz,
            filename_scheme: FilenameScheme::Simple,
            workers: 1,
            changelog_limit: 10,
            distro_tag: None,
            content_tag: None,
            revision: None,
            delta: false,
            delta_num_deltas: 0,
            pretty: false,
            update: true,
            split: false,
            skip_symlinks: false,
            zchunk: false,
            groupfile: None,
            owner: None,
            binary: PathBuf::from("createrepo_c"),
        }
    }
}

impl ReindexOptions {
    /// Validates constraints spec §4.5 lists beyond what the type system already enforces:
    /// a non-negative worker/changelog count (guaranteed by the `u32` type), an existing
    /// group file, and resolvable owner user/group.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.groupfile {
            if !path.is_file() {
                return Err(Error::InvalidOptions(format!("group file does not exist: {path:?}")));
            }
        }
        if let Some((user, group)) = &self.owner {
            resolve_uid(user)?;
            resolve_gid(group)?;
        }
        Ok(())
    }

    fn build_args(&self, full: bool) -> Vec<String> {
        let mut args = vec![
            "--checksum".to_string(),
            self.checksum.as_str().to_string(),
            "--compress-type".to_string(),
            self.compression.as_str().to_string(),
            "--simple-md-filenames-scheme".to_string(),
            self.filename_scheme.as_str().to_string(),
            "--workers".to_string(),
            self.workers.to_string(),
            "--changelog-limit".to_string(),
            self.changelog_limit.to_string(),
        ];

        if let Some(tag) = &self.distro_tag {
            args.push("--distro".to_string());
            args.push(tag.clone());
        }
        if let Some(tag) = &self.content_tag {
            args.push("--content".to_string());
            args.push(tag.clone());
        }
        if let Some(rev) = &self.revision {
            args.push("--revision".to_string());
            args.push(rev.clone());
        }
        if self.delta {
            args.push("--deltas".to_string());
            args.push("--num-deltas".to_string());
            args.push(self.delta_num_deltas.to_string());
        }
        if self.pretty {
            args.push("--pretty".to_string());
        }
        if !full && self.update {
            args.push("--update".to_string());
        }
        if self.split {
            args.push("--split".to_string());
        }
        if self.skip_symlinks {
            args.push("--skip-symlinks".to_string());
        }
        if self.zchunk {
            args.push("--zck".to_string());
        }
        if let Some(groupfile) = &self.groupfile {
            args.push("--groupfile".to_string());
            args.push(groupfile.display().to_string());
        }

        args
    }
}

/// Invokes the external index builder on `path`. If `full`, `update` is cleared so the
/// tool rebuilds from scratch (spec §4.5). On success, applies owner/perms to `repodata`.
pub fn generate(path: &Path, opts: &ReindexOptions, full: bool) -> Result<()> {
    opts.validate()?;

    let args = opts.build_args(full);
    debug!("running {:?} {:?} in {:?}", opts.binary, args, path);
    let output = Command::new(&opts.binary).args(&args).arg(path).output()?;

    if !output.status.success() {
        return Err(Error::SubprocessFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    info!("reindexed {:?}", path);

    if let Some((user, group)) = &opts.owner {
        let uid = resolve_uid(user)?;
        let gid = resolve_gid(group)?;
        chown_tree(&path.join("repodata"), uid, gid)?;
    }

    Ok(())
}

#[cfg(unix)]
fn chown_tree(dir: &Path, uid: u32, gid: u32) -> Result<()> {
    use std::ffi::CString;
    fn chown_one(path: &Path, uid: u32, gid: u32) -> Result<()> {
        let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned())
            .map_err(|_| Error::InvalidOptions(format!("path contains NUL: {path:?}")))?;
        let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    chown_one(dir, uid, gid)?;
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            chown_one(&entry.path(), uid, gid)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn chown_tree(_dir: &Path, _uid: u32, _gid: u32) -> Result<()> {
    Ok(())
}
