//! Search engine (C8): term IR -> SQL, per-arch key intersection, bundle assembly.

use crate::query::{Dependency, Term, TermKind};
use crate::storage::DbKind;
use crate::utils::{natural_cmp, version_cmp};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Characters stripped entirely before embedding a user value in SQL text.
const STRIPPED: &[char] = &['\'', '"'];
/// Characters replaced with a single space before embedding (spec §4.2 Sanitization).
const REPLACED: &[char] = &['^', '$', '(', ')', '<', '>', '{', '}', '#', ';', '!', '='];

/// Sanitizes a user-supplied string before embedding it in a SQL literal.
pub fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if STRIPPED.contains(&c) {
            continue;
        }
        if REPLACED.contains(&c) {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn priority(kind: TermKind) -> u8 {
    match kind {
        TermKind::Arch => 0,
        TermKind::Name | TermKind::Source => 1,
        TermKind::Version | TermKind::Release | TermKind::DateAdd | TermKind::DateBuild => 2,
        TermKind::Epoch => 3,
        TermKind::Provides
        | TermKind::Requires
        | TermKind::Recommends
        | TermKind::Conflicts
        | TermKind::Obsoletes
        | TermKind::Enhances
        | TermKind::Suggests
        | TermKind::Supplements
        | TermKind::File => 4,
        TermKind::Group | TermKind::License | TermKind::Vendor | TermKind::Host => 7,
        TermKind::Size => 8,
        TermKind::Payload => 9,
    }
}

/// Orders terms cheapest-and-most-selective first (spec §4.2).
pub fn sort_terms(terms: &mut [Term]) {
    terms.sort_by_key(|t| priority(t.kind));
}

fn column_for(kind: TermKind) -> &'static str {
    match kind {
        TermKind::Name => "name",
        TermKind::Version => "version",
        TermKind::Release => "release",
        TermKind::Epoch => "epoch",
        TermKind::Arch => "arch",
        TermKind::License => "rpm_license",
        TermKind::Group => "rpm_group",
        TermKind::Vendor => "rpm_vendor",
        TermKind::Host => "rpm_buildhost",
        TermKind::File => "name",
        _ => "name",
    }
}

/// A compiled SQL fragment ready to run against a specific backing database.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub target: DbKind,
}

fn is_glob(value: &str) -> bool {
    value.contains(['*', '?', '['])
}

fn string_condition(column: &str, value: &str, negative: bool) -> String {
    let value = sanitize(value);
    if let Some(alts) = value.split_once('|').map(|_| value.split('|')) {
        let list: Vec<String> = alts.map(|v| format!("\"{v}\"")).collect();
        let op = if negative { "NOT IN" } else { "IN" };
        return format!("{column} {op} ({})", list.join(","));
    }
    if is_glob(&value) {
        let op = if negative { "NOT GLOB" } else { "GLOB" };
        return format!("{column} {op} \"{value}\"");
    }
    let op = if negative { "!=" } else { "=" };
    format!("{column} {op} \"{value}\"")
}

/// Compiles a basic string term (spec §4.2: IN / GLOB / `=`).
pub fn compile_string_term(kind: TermKind, value: &str, negative: bool) -> SqlFragment {
    let sql = format!("SELECT pkgKey FROM packages WHERE {}", string_condition(column_for(kind), value, negative));
    SqlFragment { sql, target: DbKind::Primary }
}

/// Compiles the source term's three-way OR (spec §4.2).
pub fn compile_source_term(value: &str, negative: bool) -> SqlFragment {
    let value = sanitize(value);
    let op = if negative { "!=" } else { "=" };
    let cond = if is_glob(&value) {
        let gop = if negative { "NOT GLOB" } else { "GLOB" };
        format!(
            "(rpm_sourcerpm {gop} \"{value}\" OR location_href {gop} \"{value}\" OR substr(location_href,3) {gop} \"{value}\")"
        )
    } else {
        format!(
            "(rpm_sourcerpm {op} \"{value}\" OR location_href {op} \"{value}\" OR substr(location_href,3) {op} \"{value}\")"
        )
    };
    SqlFragment { sql: format!("SELECT pkgKey FROM packages WHERE {cond}"), target: DbKind::Primary }
}

/// Compiles a range term (size, date-add, date-build).
pub fn compile_range_term(kind: TermKind, lo: f64, hi: f64, negative: bool) -> SqlFragment {
    let column = match kind {
        TermKind::Size => "size_package",
        TermKind::DateAdd => "time_file",
        TermKind::DateBuild => "time_build",
        _ => "size_package",
    };
    let op = if negative { "NOT BETWEEN" } else { "BETWEEN" };
    let sql = format!("SELECT pkgKey FROM packages WHERE {column} {op} {lo} AND {hi}");
    SqlFragment { sql, target: DbKind::Primary }
}

fn dep_table(kind: TermKind) -> &'static str {
    match kind {
        TermKind::Provides => "provides",
        TermKind::Requires => "requires",
        TermKind::Recommends => "recommends",
        TermKind::Conflicts => "conflicts",
        TermKind::Obsoletes => "obsoletes",
        TermKind::Enhances => "enhances",
        TermKind::Suggests => "suggests",
        TermKind::Supplements => "supplements",
        _ => "requires",
    }
}

/// Compiles a dependency term: a conjunction of name plus any non-empty flag/EVR clauses.
pub fn compile_dependency_term(kind: TermKind, dep: &Dependency, negative: bool) -> SqlFragment {
    let (eq, neq) = ("=", "!=");
    let op = if negative { neq } else { eq };
    let mut clauses = vec![format!("name {op} \"{}\"", sanitize(&dep.name))];

    if dep.flag != crate::arch::DepFlag::Any {
        let flag = if negative { dep.flag.negate() } else { dep.flag };
        clauses.push(format!("flags {op} \"{flag}\""));
        if let Some(epoch) = &dep.epoch {
            clauses.push(format!("epoch {op} \"{}\"", sanitize(epoch)));
        }
        if let Some(version) = &dep.version {
            clauses.push(format!("version {op} \"{}\"", sanitize(version)));
        }
        if let Some(release) = &dep.release {
            clauses.push(format!("release {op} \"{}\"", sanitize(release)));
        }
    }

    let joiner = if negative { " OR " } else { " AND " };
    let sql = format!("SELECT pkgKey FROM {} WHERE {}", dep_table(kind), clauses.join(joiner));
    SqlFragment { sql, target: DbKind::Primary }
}

/// Compiles a payload term. Splits `raw` into `dirname`/`filename` and emits one or two
/// fragments depending on how many of the two halves are globs (spec §4.2).
pub fn compile_payload_term(raw: &str, negative: bool) -> Vec<SqlFragment> {
    let (dirname, filename) = match raw.rsplit_once('/') {
        Some((d, f)) => (d, f),
        None => ("", raw),
    };

    if dirname.is_empty() || dirname == "." {
        let cond = if is_glob(filename) {
            string_condition("filenames", filename, negative)
        } else {
            like_condition("filenames", filename, negative)
        };
        return vec![SqlFragment { sql: format!("SELECT pkgKey FROM filelist WHERE {cond}"), target: DbKind::Filelists }];
    }

    if filename == "*" {
        let cond = if is_glob(dirname) {
            string_condition("dirname", dirname, negative)
        } else {
            like_condition("dirname", dirname, negative)
        };
        return vec![SqlFragment { sql: format!("SELECT pkgKey FROM filelist WHERE {cond}"), target: DbKind::Filelists }];
    }

    if !is_glob(dirname) && !is_glob(filename) {
        let dir = sanitize(dirname);
        let op = if negative { "!=" } else { "=" };
        let file_cond = like_fragment("filenames", filename, negative);
        let sql = format!("SELECT pkgKey FROM filelist WHERE dirname {op} \"{dir}\" AND {file_cond}");
        return vec![SqlFragment { sql, target: DbKind::Filelists }];
    }

    let dir = sanitize(dirname);
    let file = sanitize(filename);
    let path_op = if negative { "NOT GLOB" } else { "GLOB" };
    let neg_flag = if negative { 1 } else { 0 };
    vec![
        SqlFragment {
            sql: format!(
                "SELECT pkgKey FROM filelist WHERE (dirname || '/' || filenames) {path_op} \"{dir}/{file}\""
            ),
            target: DbKind::Filelists,
        },
        SqlFragment {
            sql: format!(
                "SELECT pkgKey FROM filelist WHERE filelist_globber(\"{dir}/{file}\", dirname, filenames, {neg_flag}) = 1"
            ),
            target: DbKind::Filelists,
        },
    ]
}

fn like_condition(column: &str, value: &str, negative: bool) -> String {
    let value = sanitize(value);
    let op = if negative { "NOT LIKE" } else { "LIKE" };
    format!("{column} {op} \"%{value}%\"")
}

fn like_fragment(column: &str, value: &str, negative: bool) -> String {
    like_condition(column, value, negative)
}

/// Glob-matches one path segment using `path.Match`-style semantics (`*`, `?`, `[...]`,
/// no `**`). Used by the `filelist_globber` custom SQL function.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_bytes(pattern.as_bytes(), text.as_bytes())
}

fn glob_match_bytes(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            glob_match_bytes(&pattern[1..], text) || (!text.is_empty() && glob_match_bytes(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match_bytes(&pattern[1..], &text[1..]),
        (Some(b'?'), None) => false,
        (Some(b'['), _) if text.is_empty() => false,
        (Some(b'['), Some(&c)) => {
            if let Some(end) = pattern.iter().position(|&b| b == b']') {
                let class = &pattern[1..end];
                let (negate, class) = match class.first() {
                    Some(b'!') | Some(b'^') => (true, &class[1..]),
                    _ => (false, class),
                };
                let matched = class_matches(class, c);
                if matched != negate {
                    glob_match_bytes(&pattern[end + 1..], &text[1..])
                } else {
                    false
                }
            } else {
                false
            }
        }
        (Some(&p), Some(&c)) => p == c && glob_match_bytes(&pattern[1..], &text[1..]),
        (Some(_), None) => false,
    }
}

fn class_matches(class: &[u8], c: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

/// The `filelist_globber(glob, dirname, filenames, negFlag)` custom SQL function body
/// (spec §4.4): splits `filenames` on `/`, matches each entry against `glob` joined with
/// `dirname`, returns true on first match in positive mode, false on first match in
/// negative mode (defaulting `neg_flag != 0` to negative).
pub fn filelist_globber(glob: &str, dirname: &str, filenames: &str, neg_flag: i64) -> bool {
    let negative = neg_flag != 0;
    for file in filenames.split('/') {
        if file.is_empty() {
            continue;
        }
        let path = format!("{dirname}/{file}");
        let matched = glob_match(glob, &path);
        if matched {
            return !negative;
        }
    }
    negative
}

/// A loaded, flattened package row as read from `packages`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRow {
    pub pkg_id: String,
    pub name: String,
    pub arch_flag: u32,
    pub version: String,
    pub release: String,
    pub epoch: String,
    pub source_rpm: String,
    pub location_href: String,
    pub size_package: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageFile {
    pub checksum_prefix: String,
    pub path: String,
    pub size: i64,
    pub arch_flag: u32,
    pub base_arch_flag: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub release: String,
    pub epoch: String,
    pub arch_flags: u32,
    pub source_rpm: String,
    pub files: Vec<PackageFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageBundle {
    pub source_rpm: String,
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackageStack {
    pub bundles: Vec<PackageBundle>,
}

fn source_key(row: &PackageRow, is_src: bool) -> String {
    if is_src && row.source_rpm.is_empty() {
        format!("{}-{}-{}.src.rpm", row.name, row.version, row.release)
    } else if row.source_rpm.is_empty() {
        format!("{}-{}-{}.src.rpm", row.name, row.version, row.release)
    } else {
        row.source_rpm.clone()
    }
}

/// Folds loaded rows into source-grouped bundles, merging rows that share
/// name/version/release/epoch across archs into one `Package` (spec §4.2).
pub fn assemble_bundles(rows: Vec<(PackageRow, bool, PackageFile)>) -> PackageStack {
    let mut bundles: Vec<PackageBundle> = Vec::new();

    for (row, is_src, file) in rows {
        let key = source_key(&row, is_src);
        let bundle = match bundles.iter_mut().find(|b| b.source_rpm == key) {
            Some(b) => b,
            None => {
                bundles.push(PackageBundle { source_rpm: key.clone(), packages: Vec::new() });
                bundles.last_mut().unwrap()
            }
        };

        match bundle.packages.iter_mut().find(|p| {
            p.name == row.name && p.version == row.version && p.release == row.release && p.epoch == row.epoch
        }) {
            Some(pkg) => {
                pkg.arch_flags |= row.arch_flag;
                pkg.files.push(file);
            }
            None => {
                bundle.packages.push(Package {
                    name: row.name,
                    version: row.version,
                    release: row.release,
                    epoch: row.epoch,
                    arch_flags: file.arch_flag,
                    source_rpm: key,
                    files: vec![file],
                });
            }
        }
    }

    bundles.sort_by(|a, b| {
        let (pa, pb) = (a.packages.first(), b.packages.first());
        match (pa, pb) {
            (Some(pa), Some(pb)) => natural_cmp(&pa.name, &pb.name)
                .then_with(|| version_cmp(&pa.version, &pb.version))
                .then_with(|| natural_cmp(&pa.release, &pb.release)),
            _ => Ordering::Equal,
        }
    });

    PackageStack { bundles }
}

/// Intersects the running per-arch key sets with a newly-collected set; arches with no
/// surviving keys are dropped entirely (spec §4.2 query planning).
pub fn intersect_per_arch(
    running: &mut std::collections::BTreeMap<&'static str, BTreeSet<i64>>,
    fresh: &std::collections::BTreeMap<&'static str, BTreeSet<i64>>,
) {
    running.retain(|arch, keys| {
        match fresh.get(arch) {
            Some(f) => {
                keys.retain(|k| f.contains(k));
                !keys.is_empty()
            }
            None => false,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::DepFlag;
    use crate::query::TermValue;

    #[test]
    fn test_s7_sql_basic_eq() {
        let frag = compile_string_term(TermKind::Name, "abcd", false);
        assert_eq!(frag.sql, "SELECT pkgKey FROM packages WHERE name = \"abcd\"");
    }

    #[test]
    fn test_sql_glob() {
        let frag = compile_string_term(TermKind::Name, "abcd*", false);
        assert_eq!(frag.sql, "SELECT pkgKey FROM packages WHERE name GLOB \"abcd*\"");
    }

    #[test]
    fn test_sql_alternation() {
        let frag = compile_string_term(TermKind::Name, "ab|cd", false);
        assert_eq!(frag.sql, "SELECT pkgKey FROM packages WHERE name IN (\"ab\",\"cd\")");
    }

    #[test]
    fn test_sql_source_three_way_or() {
        let frag = compile_source_term("abcd", false);
        assert_eq!(
            frag.sql,
            "SELECT pkgKey FROM packages WHERE (rpm_sourcerpm = \"abcd\" OR location_href = \"abcd\" OR substr(location_href,3) = \"abcd\")"
        );
    }

    #[test]
    fn test_s4_dependency_sql() {
        let dep = Dependency {
            name: "test".to_string(),
            flag: DepFlag::Gt,
            epoch: Some("1".to_string()),
            version: Some("2.3".to_string()),
            release: Some("0.el7".to_string()),
        };
        let frag = compile_dependency_term(TermKind::Requires, &dep, false);
        assert_eq!(
            frag.sql,
            "SELECT pkgKey FROM requires WHERE name = \"test\" AND flags = \"GT\" AND epoch = \"1\" AND version = \"2.3\" AND release = \"0.el7\""
        );
    }

    #[test]
    fn test_payload_simple_like() {
        let frags = compile_payload_term("/test/abcd", false);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].sql.contains("LIKE"));
    }

    #[test]
    fn test_payload_nested_glob_two_queries() {
        let frags = compile_payload_term("/test/[a-z]/test.*", false);
        assert_eq!(frags.len(), 2);
        assert!(frags[1].sql.contains("filelist_globber"));
    }

    #[test]
    fn test_glob_match_basic() {
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("[a-c]bc", "abc"));
        assert!(!glob_match("[a-c]bc", "dbc"));
        assert!(!glob_match("abc", "abcd"));
    }

    #[test]
    fn test_filelist_globber_positive_and_negative() {
        assert!(filelist_globber("*.txt", "/etc", "readme.txt/other.conf", 0));
        assert!(!filelist_globber("*.txt", "/etc", "other.conf", 0));
        assert!(filelist_globber("*.txt", "/etc", "other.conf", 1));
    }

    #[test]
    fn test_term_priority_order() {
        let mut terms = vec![
            Term { kind: TermKind::Size, value: TermValue::Range(0.0, 1.0), negative: false },
            Term { kind: TermKind::Name, value: TermValue::String("x".into()), negative: false },
            Term { kind: TermKind::Arch, value: TermValue::String("x86_64".into()), negative: false },
        ];
        sort_terms(&mut terms);
        assert_eq!(terms[0].kind, TermKind::Arch);
        assert_eq!(terms[1].kind, TermKind::Name);
        assert_eq!(terms[2].kind, TermKind::Size);
    }

    #[test]
    fn test_sanitize_strips_and_replaces() {
        assert_eq!(sanitize("a'b\"c^d"), "abc d");
    }

    #[test]
    fn test_bundle_grouping() {
        let rows = vec![
            (
                PackageRow {
                    pkg_id: "1".into(),
                    name: "foo".into(),
                    arch_flag: 1,
                    version: "1.0".into(),
                    release: "1".into(),
                    epoch: "0".into(),
                    source_rpm: "foo-1.0-1.src.rpm".into(),
                    location_href: "x86_64/foo-1.0-1.x86_64.rpm".into(),
                    size_package: 100,
                },
                false,
                PackageFile { checksum_prefix: "abcdef0".into(), path: "x86_64/foo-1.0-1.x86_64.rpm".into(), size: 100, arch_flag: 1, base_arch_flag: 1 },
            ),
            (
                PackageRow {
                    pkg_id: "2".into(),
                    name: "foo".into(),
                    arch_flag: 2,
                    version: "1.0".into(),
                    release: "1".into(),
                    epoch: "0".into(),
                    source_rpm: "foo-1.0-1.src.rpm".into(),
                    location_href: "i386/foo-1.0-1.i386.rpm".into(),
                    size_package: 90,
                },
                false,
                PackageFile { checksum_prefix: "fedcba0".into(), path: "i386/foo-1.0-1.i386.rpm".into(), size: 90, arch_flag: 2, base_arch_flag: 2 },
            ),
        ];
        let stack = assemble_bundles(rows);
        assert_eq!(stack.bundles.len(), 1);
        assert_eq!(stack.bundles[0].packages.len(), 1);
        assert_eq!(stack.bundles[0].packages[0].arch_flags, 1 | 2);
        assert_eq!(stack.bundles[0].packages[0].files.len(), 2);
    }
}
