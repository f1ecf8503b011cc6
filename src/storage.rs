//! Storage / depot (C6): per-(sub-repo, arch) directory owner, cache lifecycle, and the
//! custom SQL function registry.

use crate::arch::{self, ArchInfo};
use crate::compression;
use crate::errors::*;
use crate::metadata::RepoMd;
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Which partition of the repository a depot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubRepoKind {
    Release,
    Testing,
}

impl SubRepoKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            SubRepoKind::Release => "release",
            SubRepoKind::Testing => "testing",
        }
    }

    pub const ALL: [SubRepoKind; 2] = [SubRepoKind::Release, SubRepoKind::Testing];
}

impl fmt::Display for SubRepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One of the three SQLite databases a repository's metadata addon publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbKind {
    Primary,
    Filelists,
    Other,
}

impl DbKind {
    /// `repomd.xml` `type` attributes that resolve to this DB, most-preferred first:
    /// the zchunk variant, then the plain `_db` addon, falling back to the bare type
    /// name in case the manifest was produced without the `_db`/`_zck` split.
    fn manifest_type_candidates(self) -> &'static [&'static str] {
        match self {
            DbKind::Primary => &["primary_zck", "primary_db", "primary"],
            DbKind::Filelists => &["filelists_zck", "filelists_db", "filelists"],
            DbKind::Other => &["other_zck", "other_db", "other"],
        }
    }

    fn cache_suffix(self) -> &'static str {
        match self {
            DbKind::Primary => "primary",
            DbKind::Filelists => "filelists",
            DbKind::Other => "other",
        }
    }
}

/// A custom SQL scalar function bound to a particular DB kind (or to every kind),
/// installed on every connection opened for that kind.
pub struct FunctionRegistration {
    pub name: &'static str,
    pub db: Option<DbKind>,
    pub is_pure: bool,
    register: Arc<dyn Fn(&Connection) -> rusqlite::Result<()> + Send + Sync>,
}

/// Collects custom SQL function registrations and seals them into a `Storage`.
///
/// Mirrors the spec's process-wide write-once registry using an explicit builder rather
/// than a global: registration and `build` both fail once this builder has produced a
/// `Storage`. Each test (or caller) builds its own `StorageBuilder`, so this still gives
/// per-test isolation without process-wide shared state.
pub struct StorageBuilder {
    functions: RefCell<Vec<FunctionRegistration>>,
    sealed: Cell<bool>,
}

impl StorageBuilder {
    pub fn new() -> Self {
        StorageBuilder { functions: RefCell::new(Vec::new()), sealed: Cell::new(false) }
    }

    /// Registers a custom SQL scalar function. `db` restricts which DB kind installs it;
    /// `None` installs it on every connection regardless of kind.
    pub fn register_function(
        &self,
        db: Option<DbKind>,
        name: &'static str,
        is_pure: bool,
        register: impl Fn(&Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        if self.sealed.get() {
            return Err(Error::RegistryFrozen);
        }
        self.functions.borrow_mut().push(FunctionRegistration { name, db, is_pure, register: Arc::new(register) });
        Ok(())
    }

    /// Seals the registry and builds a `Storage`. A second call (on this builder, or any
    /// further `register_function` call) returns `Error::RegistryFrozen`.
    pub fn build(&self, options: StorageOptions) -> Result<Storage> {
        if self.sealed.get() {
            return Err(Error::RegistryFrozen);
        }
        self.sealed.set(true);
        let functions: Vec<FunctionRegistration> = self.functions.borrow_mut().drain(..).collect();
        Ok(Storage { options, functions: Arc::new(functions), depots: RefCell::new(HashMap::new()) })
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub dir_mode: u32,
    pub file_mode: u32,
    pub owner: Option<(u32, u32)>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            data_dir: PathBuf::new(),
            cache_dir: PathBuf::new(),
            dir_mode: 0o755,
            file_mode: 0o644,
            owner: None,
        }
    }
}

/// Owns every `Depot` for this repository, keyed by (sub-repo, arch).
pub struct Storage {
    options: StorageOptions,
    functions: Arc<Vec<FunctionRegistration>>,
    depots: RefCell<HashMap<(SubRepoKind, &'static str), Depot>>,
}

impl Storage {
    /// Creates the on-disk directory tree for every (sub-repo, arch) pair. Fails if
    /// `DataDir` already exists and is non-empty (spec §4.4, scenario S5).
    pub fn init(&self, sub_repos: &[SubRepoKind], archs: &[&'static str]) -> Result<()> {
        if self.options.data_dir.exists() {
            let mut entries = fs::read_dir(&self.options.data_dir)?;
            if entries.next().is_some() {
                return Err(Error::AlreadyInitialized);
            }
        }

        let mut infos = Vec::with_capacity(archs.len());
        for name in archs {
            let info = arch::by_name(name).ok_or_else(|| Error::InvalidArch(name.to_string()))?;
            infos.push(info);
        }

        for sub_repo in sub_repos {
            for info in &infos {
                let dir = self.arch_dir(*sub_repo, info);
                fs::create_dir_all(dir.join("repodata"))?;
                self.apply_dir_perms(&dir)?;
                self.apply_dir_perms(&dir.join("repodata"))?;
            }
        }
        fs::create_dir_all(&self.options.cache_dir)?;
        info!("initialized storage at {:?}", self.options.data_dir);
        Ok(())
    }

    fn apply_dir_perms(&self, dir: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(self.options.dir_mode))?;
            if let Some((uid, gid)) = self.options.owner {
                chown(dir, uid, gid)?;
            }
        }
        #[cfg(not(unix))]
        let _ = dir;
        Ok(())
    }

    pub fn arch_dir(&self, sub_repo: SubRepoKind, arch: &ArchInfo) -> PathBuf {
        self.options.data_dir.join(sub_repo.dir_name()).join(arch.dir)
    }

    /// Gets (creating if needed) the depot for `(sub_repo, arch)`.
    pub fn depot(&self, sub_repo: SubRepoKind, arch: &'static ArchInfo) -> std::cell::RefMut<'_, Depot> {
        let key = (sub_repo, arch.name);
        {
            let mut depots = self.depots.borrow_mut();
            depots.entry(key).or_insert_with(|| {
                Depot::new(
                    self.arch_dir(sub_repo, arch),
                    self.options.cache_dir.clone(),
                    sub_repo,
                    arch,
                    Arc::clone(&self.functions),
                    self.options.file_mode,
                )
            });
        }
        std::cell::RefMut::map(self.depots.borrow_mut(), |m| m.get_mut(&key).expect("just inserted"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.options.cache_dir
    }
}

#[cfg(unix)]
fn chown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    use std::ffi::CString;
    let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned())
        .map_err(|_| Error::InvalidOptions(format!("path contains NUL: {path:?}")))?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// The storage unit for one (sub-repo, arch) pair: owns the on-disk RPM directory, the
/// cached unpacked databases, and their open connections.
pub struct Depot {
    data_dir: PathBuf,
    cache_dir: PathBuf,
    sub_repo: SubRepoKind,
    arch: &'static ArchInfo,
    functions: Arc<Vec<FunctionRegistration>>,
    file_mode: u32,
    meta: Option<RepoMd>,
    meta_mtime: Option<SystemTime>,
    connections: HashMap<DbKind, (Connection, SystemTime)>,
}

impl Depot {
    fn new(
        data_dir: PathBuf,
        cache_dir: PathBuf,
        sub_repo: SubRepoKind,
        arch: &'static ArchInfo,
        functions: Arc<Vec<FunctionRegistration>>,
        file_mode: u32,
    ) -> Self {
        Depot {
            data_dir,
            cache_dir,
            sub_repo,
            arch,
            functions,
            file_mode,
            meta: None,
            meta_mtime: None,
            connections: HashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("repodata").join("repomd.xml")
    }

    fn cache_path(&self, db: DbKind) -> PathBuf {
        self.cache_dir.join(format!("{}-{}-{}.sqlite", self.sub_repo, self.arch.name, db.cache_suffix()))
    }

    /// Re-reads `repomd.xml` if it's newer than the cached revision, or if it hasn't
    /// been read yet.
    fn refresh_meta(&mut self) -> Result<()> {
        let path = self.manifest_path();
        let disk_mtime = fs::metadata(&path)?.modified()?;
        let needs_reload = match self.meta_mtime {
            Some(cached) => disk_mtime > cached,
            None => true,
        };
        if needs_reload {
            let xml = fs::read_to_string(&path)?;
            self.meta = Some(RepoMd::from_xml(&xml)?);
            self.meta_mtime = Some(disk_mtime);
            debug!("reloaded repomd.xml for {}/{}", self.sub_repo, self.arch.name);
        }
        Ok(())
    }

    fn find_entry(&self, db: DbKind) -> Result<&crate::metadata::MetadataEntry> {
        let meta = self.meta.as_ref().ok_or(Error::NotInitialized)?;
        db.manifest_type_candidates()
            .iter()
            .find_map(|t| meta.find(t))
            .ok_or_else(|| Error::MetadataNotFound(db.cache_suffix().to_string()))
    }

    /// True iff the given DB's cache entry is still valid: the manifest isn't stale
    /// relative to its own `revision`, and (if a connection is open) the compressed
    /// source file's mtime still matches the entry's recorded timestamp.
    pub fn is_cache_valid(&self, db: DbKind) -> bool {
        let Ok(disk_mtime) = fs::metadata(self.manifest_path()).and_then(|m| m.modified()) else {
            return false;
        };
        let Some(meta) = self.meta.as_ref() else {
            return false;
        };
        let revision_time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(meta.revision.max(0) as u64);
        if disk_mtime > revision_time {
            return false;
        }

        let Some(entry) = db.manifest_type_candidates().iter().find_map(|t| meta.find(t)) else {
            return false;
        };
        if let (Some((_, cached_source_mtime)), Some(ts)) = (self.connections.get(&db), entry.timestamp) {
            let entry_time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(ts.max(0) as u64);
            if *cached_source_mtime != entry_time {
                return false;
            }
        }
        true
    }

    /// Closes and drops every open connection for this depot.
    pub fn invalidate_cache(&mut self) -> Result<()> {
        let mut first_err = None;
        for (_, (conn, _)) in self.connections.drain() {
            if let Err((_, e)) = conn.close() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes every `*.sqlite` file from the cache directory.
    pub fn purge_cache(&mut self) -> Result<()> {
        self.invalidate_cache()?;
        if self.cache_dir.exists() {
            for entry in fs::read_dir(&self.cache_dir)? {
                let entry = entry?;
                if entry.path().extension().map(|e| e == "sqlite").unwrap_or(false) {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        info!("purged cache for {}/{}", self.sub_repo, self.arch.name);
        Ok(())
    }

    /// Lazily revalidates the manifest, unpacks and opens the database of kind `db`,
    /// returning the (freshly opened or still-cached) connection.
    pub fn get_db(&mut self, db: DbKind) -> Result<&Connection> {
        self.refresh_meta()?;
        if !self.is_cache_valid(db) {
            if self.connections.contains_key(&db) {
                debug!("cache invalidated for {}/{}/{:?}", self.sub_repo, self.arch.name, db);
            }
            self.connections.remove(&db);
        }

        if !self.connections.contains_key(&db) {
            let entry = self.find_entry(db)?.clone();
            let src = self.data_dir.join(&entry.location.href);
            let dest = self.cache_path(db);
            compression::unpack_to_path(&src, &dest, Some(self.file_mode))?;
            info!("unpacked {} -> {:?}", entry.location.href, dest);

            let conn = Connection::open(&dest)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "query_only", "ON")?;
            for reg in self.functions.iter() {
                if reg.db.is_none() || reg.db == Some(db) {
                    (reg.register)(&conn)?;
                }
            }

            let source_mtime = entry.timestamp.map(|ts| std::time::UNIX_EPOCH + std::time::Duration::from_secs(ts.max(0) as u64))
                .unwrap_or(fs::metadata(&src)?.modified()?);
            self.connections.insert(db, (conn, source_mtime));
        }

        Ok(&self.connections.get(&db).expect("just inserted").0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn opts(root: &Path) -> StorageOptions {
        StorageOptions {
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            ..Default::default()
        }
    }

    #[test]
    fn test_init_creates_leaf_directories() {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder.build(opts(root.path())).unwrap();
        storage.init(&[SubRepoKind::Release, SubRepoKind::Testing], &["src", "x86_64"]).unwrap();

        for sub in ["release", "testing"] {
            for arch_dir in ["SRPMS", "x86_64"] {
                assert!(root.path().join("data").join(sub).join(arch_dir).join("repodata").is_dir());
            }
        }
    }

    #[test]
    fn test_reinit_over_nonempty_fails() {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder.build(opts(root.path())).unwrap();
        storage.init(&[SubRepoKind::Release], &["src"]).unwrap();

        let err = storage.init(&[SubRepoKind::Release], &["src"]).unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
    }

    #[test]
    fn test_init_rejects_unknown_arch() {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder.build(opts(root.path())).unwrap();
        let err = storage.init(&[SubRepoKind::Release], &["made-up"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArch(_)));
    }

    #[test]
    fn test_builder_seals_after_build() {
        let builder = StorageBuilder::new();
        let root = tempdir().unwrap();
        builder.build(opts(root.path())).unwrap();

        let err = builder.register_function(None, "noop", true, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::RegistryFrozen));

        assert!(matches!(builder.build(opts(root.path())), Err(Error::RegistryFrozen)));
    }

    fn write_sqlite(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, name TEXT)").unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_get_db_unpacks_and_opens() {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder.build(opts(root.path())).unwrap();
        storage.init(&[SubRepoKind::Release], &["x86_64"]).unwrap();

        let arch = arch::by_name("x86_64").unwrap();
        let repodata = storage.arch_dir(SubRepoKind::Release, arch).join("repodata");
        let db_path = repodata.join("primary.sqlite");
        write_sqlite(&db_path);

        let xml = format!(
            r#"<repomd><revision>{}</revision><data type="primary_db"><checksum type="sha256">x</checksum><location href="repodata/primary.sqlite"/></data></repomd>"#,
            9999999999i64
        );
        let mut f = fs::File::create(repodata.join("repomd.xml")).unwrap();
        f.write_all(xml.as_bytes()).unwrap();
        drop(f);

        // set the manifest's on-disk mtime to match its own <revision> exactly
        let revision_time = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(9999999999);
        let _ = filetime_set(&repodata.join("repomd.xml"), revision_time);

        let mut depot = storage.depot(SubRepoKind::Release, arch);
        let conn = depot.get_db(DbKind::Primary).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    /// Property #9: bumping `repomd.xml`'s mtime above its own `<revision>` must
    /// invalidate the cache, even though `meta` was just (re)loaded from that same file.
    #[test]
    fn test_is_cache_valid_false_when_mtime_exceeds_revision() {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder.build(opts(root.path())).unwrap();
        storage.init(&[SubRepoKind::Release], &["x86_64"]).unwrap();

        let arch = arch::by_name("x86_64").unwrap();
        let repodata = storage.arch_dir(SubRepoKind::Release, arch).join("repodata");
        write_sqlite(&repodata.join("primary.sqlite"));

        let revision = 1_000_000_000i64;
        let xml = format!(
            r#"<repomd><revision>{revision}</revision><data type="primary_db"><checksum type="sha256">x</checksum><location href="repodata/primary.sqlite"/></data></repomd>"#
        );
        let mut f = fs::File::create(repodata.join("repomd.xml")).unwrap();
        f.write_all(xml.as_bytes()).unwrap();
        drop(f);
        let revision_time = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(revision as u64);
        let _ = filetime_set(&repodata.join("repomd.xml"), revision_time);

        let mut depot = storage.depot(SubRepoKind::Release, arch);
        depot.get_db(DbKind::Primary).unwrap();
        assert!(depot.is_cache_valid(DbKind::Primary));

        let past_revision = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs((revision - 1) as u64);
        let _ = filetime_set(&repodata.join("repomd.xml"), past_revision);
        depot.refresh_meta().unwrap();
        assert!(depot.is_cache_valid(DbKind::Primary));

        let future_mtime = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs((revision + 10) as u64);
        let _ = filetime_set(&repodata.join("repomd.xml"), future_mtime);
        depot.refresh_meta().unwrap();
        assert!(!depot.is_cache_valid(DbKind::Primary));
    }

    fn filetime_set(path: &Path, time: SystemTime) -> std::io::Result<()> {
        let f = fs::File::options().write(true).open(path)?;
        f.set_modified(time)
    }
}
