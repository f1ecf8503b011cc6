//! Repository / sub-repository facade (C10): the high-level operations orchestrated on
//! top of storage, search, and the index generator.

use crate::arch::{self, ArchClass, ArchInfo};
use crate::errors::*;
use crate::lead::Lead;
use crate::query::{self, Request, TermValue};
use crate::reindex::{self, ReindexOptions};
use crate::search::{self, Package, PackageFile, PackageRow, PackageStack};
use crate::signing::{Signer, Verifier};
use crate::storage::{DbKind, Depot, Storage, SubRepoKind};
use regex::Regex;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::OnceLock;
use std::time::SystemTime;

fn repo_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z_-]+$").unwrap())
}

/// Per-arch package counts and total size (spec §4.3 Stats).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchStats {
    pub count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub per_arch: BTreeMap<String, ArchStats>,
    pub updated: Option<SystemTime>,
}

/// Single changelog record (spec §3 PackageInfo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub author: String,
    pub date: i64,
    pub text: String,
}

/// Full single-package inspection payload, loaded only by `Info` (spec §3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageInfo {
    pub summary: String,
    pub description: String,
    pub url: String,
    pub vendor: String,
    pub group: String,
    pub license: String,
    pub package_size: i64,
    pub installed_size: i64,
    pub add_time: i64,
    pub build_time: i64,
    pub changelog: Vec<ChangelogEntry>,
    pub requires: Vec<query::Dependency>,
    pub provides: Vec<query::Dependency>,
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

/// What a sub-repo operation needs from its owning `Repository`, passed in explicitly
/// instead of a back-pointer (spec §9 "Cyclic ownership" design note).
pub struct RepoContext<'a> {
    pub storage: &'a Storage,
    pub archs: &'a [&'static ArchInfo],
    pub verifier: Option<&'a dyn Verifier>,
    pub split_files: bool,
}

/// One `release` or `testing` partition of a `Repository`. Holds no back-pointer to its
/// owner; every operation takes a `RepoContext` borrowed from the caller.
pub struct SubRepository {
    pub kind: SubRepoKind,
}

impl SubRepository {
    pub fn new(kind: SubRepoKind) -> Self {
        SubRepository { kind }
    }

    fn depot<'a>(&self, ctx: &'a RepoContext, arch: &'static ArchInfo) -> std::cell::RefMut<'a, Depot> {
        ctx.storage.depot(self.kind, arch)
    }

    /// Runs `sql` against `db` and collects the `pkgKey` column into a set.
    fn run_key_query(conn: &Connection, sql: &str) -> Result<BTreeSet<i64>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |r| r.get::<_, i64>(0))?;
        let mut keys = BTreeSet::new();
        for row in rows {
            keys.insert(row?);
        }
        Ok(keys)
    }

    fn load_rows(conn: &Connection, arch: &'static ArchInfo, keys: &BTreeSet<i64>) -> Result<Vec<(PackageRow, bool, PackageFile)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let in_list = keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT pkgId,name,arch,version,release,epoch,rpm_sourcerpm,location_href,size_package FROM packages WHERE pkgKey IN ({in_list})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, i64>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (pkg_id, name, row_arch, version, release, epoch, source_rpm, location_href, size_package) = row?;
            let is_src = row_arch == "src";
            let package_row = PackageRow {
                pkg_id: pkg_id.clone(),
                name,
                arch_flag: arch.flag,
                version,
                release,
                epoch,
                source_rpm,
                location_href: location_href.clone(),
                size_package,
            };
            let file = PackageFile {
                checksum_prefix: pkg_id.chars().take(7).collect(),
                path: location_href,
                size: size_package,
                arch_flag: arch.flag,
                base_arch_flag: arch.flag,
            };
            out.push((package_row, is_src, file));
        }
        Ok(out)
    }

    /// Lists packages (spec §4.3 List): `all && filter.is_empty()` returns every row,
    /// `!all && filter.is_empty()` returns the latest row per name, otherwise a
    /// name-version-release substring filter.
    pub fn list(&self, ctx: &RepoContext, filter: &str, all: bool) -> Result<PackageStack> {
        let sql = if !filter.is_empty() {
            let value = search::sanitize(filter);
            format!(
                "SELECT pkgKey FROM packages WHERE (name || \"-\" || version || \"-\" || release) LIKE \"%{value}%\" ORDER BY rpm_sourcerpm"
            )
        } else if all {
            "SELECT pkgKey FROM packages".to_string()
        } else {
            "SELECT pkgKey FROM packages GROUP BY name HAVING MAX(pkgKey)".to_string()
        };

        let mut rows = Vec::new();
        for arch in ctx.archs {
            let mut depot = self.depot(ctx, arch);
            let conn = depot.get_db(DbKind::Primary)?;
            let keys = Self::run_key_query(conn, &sql)?;
            rows.extend(Self::load_rows(conn, arch, &keys)?);
        }
        Ok(search::assemble_bundles(rows))
    }

    /// Executes a parsed `Request` (spec §4.2 Query planning): intersects per-arch key
    /// sets term by term, dropping an arch entirely once it has no surviving keys.
    pub fn find(&self, ctx: &RepoContext, request: &Request) -> Result<PackageStack> {
        let mut terms = request.query.clone();
        search::sort_terms(&mut terms);

        let mut running: BTreeMap<&'static str, BTreeSet<i64>> =
            ctx.archs.iter().map(|a| (a.name, BTreeSet::new())).collect();
        let mut initialized = false;

        for term in &terms {
            let fragments = compile_term(term)?;
            let mut fresh: BTreeMap<&'static str, BTreeSet<i64>> = BTreeMap::new();

            for arch in ctx.archs {
                let mut depot = self.depot(ctx, arch);
                let mut keys: Option<BTreeSet<i64>> = None;
                for frag in &fragments {
                    let conn = depot.get_db(frag.target)?;
                    let got = Self::run_key_query(conn, &frag.sql)?;
                    keys = Some(match keys {
                        Some(mut existing) => {
                            existing.extend(got);
                            existing
                        }
                        None => got,
                    });
                }
                fresh.insert(arch.name, keys.unwrap_or_default());
            }

            if !initialized {
                running = fresh;
                initialized = true;
            } else {
                search::intersect_per_arch(&mut running, &fresh);
            }
            if running.is_empty() {
                return Ok(PackageStack::default());
            }
        }

        if !initialized {
            return Ok(PackageStack::default());
        }

        let mut rows = Vec::new();
        for arch in ctx.archs {
            let Some(keys) = running.get(arch.name) else { continue };
            if keys.is_empty() {
                continue;
            }
            let mut depot = self.depot(ctx, arch);
            let conn = depot.get_db(DbKind::Primary)?;
            rows.extend(Self::load_rows(conn, arch, keys)?);
        }
        let mut stack = search::assemble_bundles(rows);
        self.apply_filter_flag(ctx, &mut stack, request.filter)?;
        Ok(stack)
    }

    /// Drops packages that contradict the request's `released`/`^` filter (spec §4.1),
    /// removing any bundle left with no packages.
    fn apply_filter_flag(&self, ctx: &RepoContext, stack: &mut PackageStack, filter: query::FilterFlag) -> Result<()> {
        if filter == query::FilterFlag::None {
            return Ok(());
        }
        for bundle in &mut stack.bundles {
            let mut kept = Vec::with_capacity(bundle.packages.len());
            for package in bundle.packages.drain(..) {
                let (released, _) = Self::is_package_released(ctx, &package, ctx.archs)?;
                let matches = match filter {
                    query::FilterFlag::Released => released,
                    query::FilterFlag::Unreleased => !released,
                    query::FilterFlag::None => true,
                };
                if matches {
                    kept.push(package);
                }
            }
            bundle.packages = kept;
        }
        stack.bundles.retain(|b| !b.packages.is_empty());
        Ok(())
    }

    /// Loads full inspection data for one package (spec §4.3 Info).
    pub fn info(&self, ctx: &RepoContext, name: &str, arch: &'static ArchInfo) -> Result<Option<(Package, PackageInfo)>> {
        let mut depot = self.depot(ctx, arch);
        let conn = depot.get_db(DbKind::Primary)?;

        let prefix = search::sanitize(name);
        let basic = conn.query_row(
            &format!(
                "SELECT pkgKey,pkgId,name,version,release,epoch,rpm_sourcerpm,location_href,size_package,size_installed,summary,description,url,rpm_vendor,rpm_group,rpm_license,time_file,time_build FROM packages WHERE name LIKE \"{prefix}%\" GROUP BY name HAVING MAX(time_build) LIMIT 1"
            ),
            [],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, i64>(8)?,
                    r.get::<_, i64>(9)?,
                    r.get::<_, String>(10)?,
                    r.get::<_, String>(11)?,
                    r.get::<_, String>(12)?,
                    r.get::<_, String>(13)?,
                    r.get::<_, String>(14)?,
                    r.get::<_, String>(15)?,
                    r.get::<_, i64>(16)?,
                    r.get::<_, i64>(17)?,
                ))
            },
        );

        let (
            pkg_key,
            pkg_id,
            name,
            version,
            release,
            epoch,
            source_rpm,
            location_href,
            size_package,
            size_installed,
            summary,
            description,
            url,
            vendor,
            group,
            license,
            time_file,
            time_build,
        ) = match basic {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let package = Package {
            name: name.clone(),
            version: version.clone(),
            release: release.clone(),
            epoch: epoch.clone(),
            arch_flags: arch.flag,
            source_rpm,
            files: vec![PackageFile {
                checksum_prefix: pkg_id.chars().take(7).collect(),
                path: location_href,
                size: size_package,
                arch_flag: arch.flag,
                base_arch_flag: arch.flag,
            }],
        };

        let requires = load_dependencies(conn, "requires", pkg_key)?;
        let provides = load_dependencies(conn, "provides", pkg_key)?;

        let (files, dirs) = {
            let files_conn = depot.get_db(DbKind::Filelists)?;
            load_payload(files_conn, pkg_key)?
        };

        let changelog = {
            let other_conn = depot.get_db(DbKind::Other)?;
            load_changelog(other_conn, pkg_key, &version, &release)?
        };

        Ok(Some((
            package,
            PackageInfo {
                summary,
                description,
                url,
                vendor,
                group,
                license,
                package_size: size_package,
                installed_size: size_installed,
                add_time: time_file,
                build_time: time_build,
                changelog,
                requires,
                provides,
                files,
                dirs,
            },
        )))
    }

    /// Probes the `release` sub-repo for an exact name/version/release/epoch match on
    /// every arch the package exists for (or NOARCH); returns the max add-time seen.
    pub fn is_package_released(
        release_ctx: &RepoContext,
        pkg: &Package,
        archs: &[&'static ArchInfo],
    ) -> Result<(bool, Option<i64>)> {
        let release_repo = SubRepository::new(SubRepoKind::Release);
        let mut released = false;
        let mut max_add_time = None;

        for arch in archs {
            let applies = pkg.arch_flags & arch.flag != 0 || arch.class == ArchClass::NoArch;
            if !applies || arch.class == ArchClass::Src {
                continue;
            }
            let mut depot = release_repo.depot(release_ctx, arch);
            let conn = match depot.get_db(DbKind::Primary) {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            let value = search::sanitize(&pkg.name);
            let result = conn.query_row(
                &format!(
                    "SELECT time_file FROM packages WHERE name = \"{value}\" AND version = \"{}\" AND release = \"{}\" AND epoch = \"{}\"",
                    search::sanitize(&pkg.version), search::sanitize(&pkg.release), search::sanitize(&pkg.epoch)
                ),
                [],
                |r| r.get::<_, i64>(0),
            );
            if let Ok(add_time) = result {
                released = true;
                max_add_time = Some(max_add_time.map_or(add_time, |m: i64| m.max(add_time)));
            }
        }
        Ok((released, max_add_time))
    }

    /// Validates, optionally verifies, and stores one RPM file (spec §4.3 AddPackage).
    /// NOARCH packages fan out to every binary arch directory currently present; a
    /// failure partway through is not rolled back — prior copies remain and the caller
    /// is expected to reindex or retry (spec §9 design note).
    pub fn add_package(&self, ctx: &RepoContext, path: &Path, signature: Option<&[u8]>) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::Rpm(path.display().to_string(), e.to_string()))?;
        if !crate::lead::has_rpm_magic(&bytes) {
            return Err(Error::Rpm(path.display().to_string(), "not an RPM file (bad magic)".to_string()));
        }
        let lead = Lead::parse(&bytes).map_err(|e| Error::Rpm(path.display().to_string(), e.to_string()))?;

        if let Some(verifier) = ctx.verifier {
            let sig = signature.ok_or(Error::SigningKeyMissing)?;
            verifier.verify_detached(&bytes, sig)?;
        }

        let file_name = path.file_name().ok_or_else(|| Error::Rpm(path.display().to_string(), "no file name".to_string()))?;

        let targets: Vec<&'static ArchInfo> = if lead.is_noarch() {
            ctx.archs.iter().copied().filter(|a| a.class == ArchClass::Binary).collect()
        } else {
            let info = lead.arch_info().ok_or_else(|| Error::ArchNotFound(lead.arch_num.to_string()))?;
            vec![info]
        };
        if targets.is_empty() {
            return Err(Error::ArchNotFound(lead.arch_num.to_string()));
        }

        for arch in targets {
            let depot = self.depot(ctx, arch);
            let dest_dir = Self::file_dest_dir(&depot, ctx.split_files, file_name.to_string_lossy().as_ref());
            fs::create_dir_all(&dest_dir)?;
            let dest = dest_dir.join(file_name);
            fs::write(&dest, &bytes)?;
            info!("added package {:?} to {}/{}", file_name, self.kind, arch.name);
        }
        Ok(())
    }

    fn file_dest_dir(depot: &Depot, split_files: bool, file_name: &str) -> PathBuf {
        if split_files {
            let first = file_name.chars().next().unwrap_or('_');
            depot.data_dir().join(first.to_string())
        } else {
            depot.data_dir().to_path_buf()
        }
    }

    /// Deletes a package file; under split-files, removes the now-empty parent directory.
    pub fn remove_package(&self, ctx: &RepoContext, arch: &'static ArchInfo, relative_path: &Path) -> Result<()> {
        let depot = self.depot(ctx, arch);
        let full_path = depot.data_dir().join(relative_path);
        fs::remove_file(&full_path)?;
        if let Some(parent) = full_path.parent()
            && parent != depot.data_dir()
        {
            let is_empty = fs::read_dir(parent).map(|mut d| d.next().is_none()).unwrap_or(false);
            if is_empty {
                let _ = fs::remove_dir(parent);
            }
        }
        info!("removed package {:?} from {}/{}", relative_path, self.kind, arch.name);
        Ok(())
    }

    /// Copies a package file between sub-repos (promotion), fanning noarch files out to
    /// every binary arch directory that exists on the destination.
    pub fn copy_package(
        from_ctx: &RepoContext,
        to_ctx: &RepoContext,
        from_kind: SubRepoKind,
        to_kind: SubRepoKind,
        arch: &'static ArchInfo,
        relative_path: &Path,
    ) -> Result<()> {
        let from_repo = SubRepository::new(from_kind);
        let to_repo = SubRepository::new(to_kind);
        let from_depot = from_repo.depot(from_ctx, arch);
        let src = from_depot.data_dir().join(relative_path);

        let targets: Vec<&'static ArchInfo> = if arch.class == ArchClass::NoArch {
            to_ctx.archs.iter().copied().filter(|a| a.class == ArchClass::Binary).collect()
        } else {
            vec![arch]
        };

        for target in targets {
            let to_depot = to_repo.depot(to_ctx, target);
            let dest_dir = to_depot.data_dir().join(relative_path.parent().unwrap_or(Path::new("")));
            fs::create_dir_all(&dest_dir)?;
            let dest = dest_dir.join(relative_path.file_name().unwrap_or_default());
            fs::copy(&src, &dest)?;
        }
        Ok(())
    }

    /// Aggregates per-arch (count, total size); `updated` is the max `repomd.xml` mtime.
    pub fn stats(&self, ctx: &RepoContext) -> Result<Stats> {
        let mut per_arch = BTreeMap::new();
        let mut updated = None;

        for arch in ctx.archs {
            let mut depot = self.depot(ctx, arch);
            let conn = match depot.get_db(DbKind::Primary) {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            let (total_size, count): (Option<i64>, i64) = conn.query_row(
                "SELECT SUM(size_package), COUNT(*) FROM packages",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            per_arch.insert(arch.name.to_string(), ArchStats { count, total_size: total_size.unwrap_or(0) });

            let manifest = depot.data_dir().join("repodata").join("repomd.xml");
            if let Ok(mtime) = fs::metadata(&manifest).and_then(|m| m.modified()) {
                updated = Some(updated.map_or(mtime, |u: SystemTime| u.max(mtime)));
            }
        }
        Ok(Stats { per_arch, updated })
    }

    /// Regenerates the index for every applicable arch, reporting progress on `tx` (one
    /// arch name per completed index) and closing it when done (spec §4.3/§5).
    pub fn reindex(&self, ctx: &RepoContext, opts: &ReindexOptions, full: bool) -> Result<Receiver<String>> {
        let (tx, rx) = mpsc::channel();
        for arch in ctx.archs {
            let depot = self.depot(ctx, arch);
            reindex::generate(depot.data_dir(), opts, full)?;
            let _ = tx.send(arch.name.to_string());
        }
        drop(tx);
        Ok(rx)
    }

    pub fn is_cache_valid(&self, ctx: &RepoContext) -> bool {
        ctx.archs.iter().all(|arch| {
            let depot = self.depot(ctx, arch);
            DbKind::ALL_KINDS.iter().all(|db| depot.is_cache_valid(*db))
        })
    }

    /// Preloads every known DB type for every arch.
    pub fn warmup_cache(&self, ctx: &RepoContext) -> Result<()> {
        for arch in ctx.archs {
            let mut depot = self.depot(ctx, arch);
            for db in DbKind::ALL_KINDS {
                depot.get_db(db)?;
            }
        }
        Ok(())
    }
}

impl DbKind {
    const ALL_KINDS: [DbKind; 3] = [DbKind::Primary, DbKind::Filelists, DbKind::Other];
}

fn compile_term(term: &query::Term) -> Result<Vec<search::SqlFragment>> {
    use crate::query::TermKind;
    let kind = term.kind;
    match (&term.value, kind) {
        (TermValue::String(value), TermKind::Source) => Ok(vec![search::compile_source_term(value, term.negative)]),
        (TermValue::String(value), TermKind::Payload) => Ok(search::compile_payload_term(value, term.negative)),
        (TermValue::String(value), _) => Ok(vec![search::compile_string_term(kind, value, term.negative)]),
        (TermValue::Range(lo, hi), _) => Ok(vec![search::compile_range_term(kind, *lo, *hi, term.negative)]),
        (TermValue::Dependency(dep), _) => Ok(vec![search::compile_dependency_term(kind, dep, term.negative)]),
    }
}

fn load_dependencies(conn: &Connection, table: &str, pkg_key: i64) -> Result<Vec<query::Dependency>> {
    let sql = format!("SELECT name, flags, epoch, version, release FROM {table} WHERE pkgKey = ?1 ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([pkg_key], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, Option<String>>(3)?,
            r.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut deps: Vec<query::Dependency> = Vec::new();
    for row in rows {
        let (name, flag, epoch, version, release) = row?;
        let flag = flag.and_then(|f| f.parse().ok()).unwrap_or(arch::DepFlag::Any);
        let dep = query::Dependency {
            name,
            flag,
            epoch: epoch.filter(|s| !s.is_empty()),
            version: version.filter(|s| !s.is_empty()),
            release: release.filter(|s| !s.is_empty()),
        };
        // Deduplicate adjacent entries sharing a name when a flagged row follows an ANY one.
        if let Some(last) = deps.last_mut() {
            if last.name == dep.name && last.flag == arch::DepFlag::Any && dep.flag != arch::DepFlag::Any {
                *last = dep;
                continue;
            }
            if last.name == dep.name && last.flag != arch::DepFlag::Any {
                continue;
            }
        }
        deps.push(dep);
    }
    Ok(deps)
}

fn load_payload(conn: &Connection, pkg_key: i64) -> Result<(Vec<String>, Vec<String>)> {
    let mut stmt = conn.prepare("SELECT dirname, filenames FROM filelist WHERE pkgKey = ?1")?;
    let rows = stmt.query_map([pkg_key], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for row in rows {
        let (dirname, filenames) = row?;
        dirs.push(dirname.clone());
        for f in filenames.split('/') {
            if !f.is_empty() {
                files.push(format!("{dirname}/{f}"));
            }
        }
    }
    Ok((files, dirs))
}

/// Selects the changelog record whose author ends with ` - version-strippedRelease`,
/// stripping the trailing `.<distro>` segment off release (spec §9 design note). Missing
/// rows are not an error — "no changelog" is a valid outcome.
fn load_changelog(conn: &Connection, pkg_key: i64, version: &str, release: &str) -> Result<Vec<ChangelogEntry>> {
    let stripped_release = release.split('.').next().unwrap_or(release);
    let suffix = format!(" - {version}-{stripped_release}");
    let mut stmt = conn.prepare("SELECT author, date, changelog FROM changelog WHERE pkgKey = ?1 ORDER BY date DESC")?;
    let rows = stmt.query_map([pkg_key], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (author, date, text) = row?;
        if author.ends_with(&suffix) {
            out.push(ChangelogEntry { author, date, text });
        }
    }
    Ok(out)
}

/// Repository-level metadata and ownership of the `release`/`testing` sub-repositories.
pub struct Repository {
    pub name: String,
    pub default_arch: &'static ArchInfo,
    pub file_filter: Option<String>,
    pub replace_on_add: bool,
    pub split_files: bool,
    pub archs: Vec<&'static ArchInfo>,
    pub storage: Storage,
    pub verifier: Option<Box<dyn Verifier>>,
    pub signer: Option<Box<dyn Signer>>,
    pub release: SubRepository,
    pub testing: SubRepository,
}

impl Repository {
    pub fn new(name: &str, default_arch: &'static ArchInfo, archs: Vec<&'static ArchInfo>, storage: Storage) -> Result<Self> {
        if !repo_name_regex().is_match(name) {
            return Err(Error::InvalidRepoName(name.to_string()));
        }
        Ok(Repository {
            name: name.to_string(),
            default_arch,
            file_filter: None,
            replace_on_add: false,
            split_files: false,
            archs,
            storage,
            verifier: None,
            signer: None,
            release: SubRepository::new(SubRepoKind::Release),
            testing: SubRepository::new(SubRepoKind::Testing),
        })
    }

    pub fn sub_repo(&self, kind: SubRepoKind) -> &SubRepository {
        match kind {
            SubRepoKind::Release => &self.release,
            SubRepoKind::Testing => &self.testing,
        }
    }

    pub fn ctx(&self) -> RepoContext<'_> {
        RepoContext {
            storage: &self.storage,
            archs: &self.archs,
            verifier: self.verifier.as_deref(),
            split_files: self.split_files,
        }
    }

    pub fn sign_detached(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.signer.as_ref().ok_or(Error::SigningKeyMissing)?.sign_detached(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBuilder;
    use rusqlite::Connection as RConn;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_repomd(repodata: &Path, entries: &[&str]) {
        let data_entries: String = entries
            .iter()
            .map(|t| format!(r#"<data type="{t}"><checksum type="sha256">x</checksum><location href="repodata/{t}.sqlite"/></data>"#))
            .collect();
        let xml = format!(r#"<repomd><revision>9999999999</revision>{data_entries}</repomd>"#);
        let mut f = fs::File::create(repodata.join("repomd.xml")).unwrap();
        f.write_all(xml.as_bytes()).unwrap();
        drop(f);
        let far_future = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(9999999999);
        let _ = fs::File::options().write(true).open(repodata.join("repomd.xml")).unwrap().set_modified(far_future);
    }

    fn write_primary_db(path: &Path, rows: &[(i64, &str, &str, &str, &str, &str, &str, &str, &str, i64)]) {
        let conn = RConn::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT, name TEXT, arch TEXT, version TEXT, release TEXT, epoch TEXT, rpm_sourcerpm TEXT, location_href TEXT, size_package INTEGER, size_installed INTEGER DEFAULT 0, summary TEXT DEFAULT '', description TEXT DEFAULT '', url TEXT DEFAULT '', rpm_vendor TEXT DEFAULT '', rpm_group TEXT DEFAULT '', rpm_license TEXT DEFAULT '', time_file INTEGER DEFAULT 0, time_build INTEGER DEFAULT 0);
             CREATE TABLE requires (pkgKey INTEGER, name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT);
             CREATE TABLE provides (pkgKey INTEGER, name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT);",
        )
        .unwrap();
        for (key, pkg_id, name, arch, version, release, epoch, source_rpm, location_href, size) in
            rows.iter().map(|(k, i, n, a, v, r, e, s, l, sz)| (k, i, n, a, v, r, e, s, l, *sz))
        {
            conn.execute(
                "INSERT INTO packages (pkgKey,pkgId,name,arch,version,release,epoch,rpm_sourcerpm,location_href,size_package) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                rusqlite::params![key, pkg_id, name, arch, version, release, epoch, source_rpm, location_href, size],
            )
            .unwrap();
        }
        conn.close().unwrap();
    }

    fn write_empty_db(path: &Path, ddl: &str) {
        let conn = RConn::open(path).unwrap();
        conn.execute_batch(ddl).unwrap();
        conn.close().unwrap();
    }

    struct Fixture {
        _root: tempfile::TempDir,
        storage: Storage,
        archs: Vec<&'static ArchInfo>,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder
            .build(crate::storage::StorageOptions {
                data_dir: root.path().join("data"),
                cache_dir: root.path().join("cache"),
                ..Default::default()
            })
            .unwrap();
        let archs = vec![arch::by_name("x86_64").unwrap()];
        storage.init(&[SubRepoKind::Release, SubRepoKind::Testing], &["x86_64"]).unwrap();
        Fixture { _root: root, storage, archs }
    }

    fn seed_release_package(fx: &Fixture, rows: &[(i64, &str, &str, &str, &str, &str, &str, &str, &str, i64)]) {
        seed_sub_repo_package(fx, SubRepoKind::Release, rows);
    }

    fn seed_sub_repo_package(fx: &Fixture, kind: SubRepoKind, rows: &[(i64, &str, &str, &str, &str, &str, &str, &str, &str, i64)]) {
        let arch = fx.archs[0];
        let repodata = fx.storage.arch_dir(kind, arch).join("repodata");
        write_primary_db(&repodata.join("primary.sqlite"), rows);
        write_empty_db(
            &repodata.join("filelists.sqlite"),
            "CREATE TABLE filelist (pkgKey INTEGER, dirname TEXT, filenames TEXT, filetypes TEXT)",
        );
        write_empty_db(&repodata.join("other.sqlite"), "CREATE TABLE changelog (pkgKey INTEGER, author TEXT, date INTEGER, changelog TEXT)");
        write_repomd(&repodata, &["primary", "filelists", "other"]);
    }

    #[test]
    fn test_list_all() {
        let fx = fixture();
        seed_release_package(&fx, &[(1, "abcdef01", "foo", "x86_64", "1.0", "1", "0", "foo-1.0-1.src.rpm", "x86_64/foo-1.0-1.x86_64.rpm", 100)]);

        let ctx = RepoContext { storage: &fx.storage, archs: &fx.archs, verifier: None, split_files: false };
        let sub = SubRepository::new(SubRepoKind::Release);
        let stack = sub.list(&ctx, "", true).unwrap();
        assert_eq!(stack.bundles.len(), 1);
        assert_eq!(stack.bundles[0].packages[0].name, "foo");
    }

    #[test]
    fn test_find_by_name() {
        let fx = fixture();
        seed_release_package(&fx, &[
            (1, "abcdef01", "foo", "x86_64", "1.0", "1", "0", "foo-1.0-1.src.rpm", "x86_64/foo-1.0-1.x86_64.rpm", 100),
            (2, "abcdef02", "bar", "x86_64", "2.0", "1", "0", "bar-2.0-1.src.rpm", "x86_64/bar-2.0-1.x86_64.rpm", 50),
        ]);

        let ctx = RepoContext { storage: &fx.storage, archs: &fx.archs, verifier: None, split_files: false };
        let sub = SubRepository::new(SubRepoKind::Release);
        let request = query::parse(&["n:foo"]).unwrap().unwrap();
        let stack = sub.find(&ctx, &request).unwrap();
        assert_eq!(stack.bundles.len(), 1);
        assert_eq!(stack.bundles[0].packages[0].name, "foo");
    }

    #[test]
    fn test_find_empty_request_returns_empty_stack() {
        let fx = fixture();
        seed_release_package(&fx, &[(1, "abcdef01", "foo", "x86_64", "1.0", "1", "0", "foo-1.0-1.src.rpm", "x86_64/foo-1.0-1.x86_64.rpm", 100)]);
        let ctx = RepoContext { storage: &fx.storage, archs: &fx.archs, verifier: None, split_files: false };
        let sub = SubRepository::new(SubRepoKind::Release);
        let request = Request::default();
        let stack = sub.find(&ctx, &request).unwrap();
        assert!(stack.bundles.is_empty());
    }

    #[test]
    fn test_find_released_filter_distinguishes_release_and_testing() {
        let fx = fixture();
        seed_sub_repo_package(&fx, SubRepoKind::Release, &[
            (1, "abcdef01", "foo", "x86_64", "1.0", "1", "0", "foo-1.0-1.src.rpm", "x86_64/foo-1.0-1.x86_64.rpm", 100),
        ]);
        seed_sub_repo_package(&fx, SubRepoKind::Testing, &[
            (1, "abcdef01", "foo", "x86_64", "1.0", "1", "0", "foo-1.0-1.src.rpm", "x86_64/foo-1.0-1.x86_64.rpm", 100),
            (2, "abcdef02", "bar", "x86_64", "2.0", "1", "0", "bar-2.0-1.src.rpm", "x86_64/bar-2.0-1.x86_64.rpm", 50),
        ]);

        let ctx = RepoContext { storage: &fx.storage, archs: &fx.archs, verifier: None, split_files: false };
        let sub = SubRepository::new(SubRepoKind::Testing);

        let released_request = query::parse(&["a:x86_64", "^:yes"]).unwrap().unwrap();
        let released = sub.find(&ctx, &released_request).unwrap();
        let released_names: Vec<&str> = released.bundles.iter().flat_map(|b| b.packages.iter().map(|p| p.name.as_str())).collect();
        assert_eq!(released_names, vec!["foo"]);

        let unreleased_request = query::parse(&["a:x86_64", "^:no"]).unwrap().unwrap();
        let unreleased = sub.find(&ctx, &unreleased_request).unwrap();
        let unreleased_names: Vec<&str> = unreleased.bundles.iter().flat_map(|b| b.packages.iter().map(|p| p.name.as_str())).collect();
        assert_eq!(unreleased_names, vec!["bar"]);
    }

    #[test]
    fn test_stats_aggregates_count_and_size() {
        let fx = fixture();
        seed_release_package(&fx, &[
            (1, "abcdef01", "foo", "x86_64", "1.0", "1", "0", "foo-1.0-1.src.rpm", "x86_64/foo-1.0-1.x86_64.rpm", 100),
            (2, "abcdef02", "bar", "x86_64", "2.0", "1", "0", "bar-2.0-1.src.rpm", "x86_64/bar-2.0-1.x86_64.rpm", 50),
        ]);
        let ctx = RepoContext { storage: &fx.storage, archs: &fx.archs, verifier: None, split_files: false };
        let sub = SubRepository::new(SubRepoKind::Release);
        let stats = sub.stats(&ctx).unwrap();
        let arch_stats = stats.per_arch.get("x86_64").unwrap();
        assert_eq!(arch_stats.count, 2);
        assert_eq!(arch_stats.total_size, 150);
        assert!(stats.updated.is_some());
    }

    #[test]
    fn test_add_and_list_fans_out_noarch() {
        let root = tempdir().unwrap();
        let builder = StorageBuilder::new();
        let storage = builder
            .build(crate::storage::StorageOptions {
                data_dir: root.path().join("data"),
                cache_dir: root.path().join("cache"),
                ..Default::default()
            })
            .unwrap();
        let archs = vec![arch::by_name("x86_64").unwrap(), arch::by_name("i386").unwrap()];
        storage.init(&[SubRepoKind::Release], &["x86_64", "i386"]).unwrap();

        let ctx = RepoContext { storage: &storage, archs: &archs, verifier: None, split_files: false };
        let sub = SubRepository::new(SubRepoKind::Release);

        let rpm_path = root.path().join("git-all-2.27.0-0.el7.noarch.rpm");
        let mut buf = vec![0u8; crate::lead::LEAD_SIZE];
        buf[0..4].copy_from_slice(&[0xED, 0xAB, 0xEE, 0xDB]);
        buf[8..10].copy_from_slice(&255u16.to_be_bytes());
        buf[78..80].copy_from_slice(&5u16.to_be_bytes());
        fs::write(&rpm_path, &buf).unwrap();

        sub.add_package(&ctx, &rpm_path, None).unwrap();

        for arch in &archs {
            let dest = storage.arch_dir(SubRepoKind::Release, arch).join("git-all-2.27.0-0.el7.noarch.rpm");
            assert!(dest.is_file(), "missing in {}", arch.name);
        }
    }

    #[test]
    fn test_repository_name_validation() {
        let fx = fixture();
        let arch = fx.archs[0];
        assert!(Repository::new("bad name!", arch, fx.archs.clone(), fx.storage).is_err());
    }
}
