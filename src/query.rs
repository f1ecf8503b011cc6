//! Query parser (C7): compact token syntax -> structured `Request`.

use crate::arch::{self, DepFlag};
use crate::errors::*;
use regex::Regex;
use std::sync::OnceLock;

/// Which field a term filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Name,
    Version,
    Release,
    Epoch,
    Arch,
    Source,
    License,
    Group,
    Vendor,
    Provides,
    Requires,
    Recommends,
    Conflicts,
    Obsoletes,
    Enhances,
    Suggests,
    Supplements,
    File,
    DateAdd,
    DateBuild,
    Host,
    Size,
    Payload,
}

/// `(long alias, short alias, kind)`. Every `TermKind` must appear at least once
/// (checked by `test_every_kind_has_alias`).
const ALIASES: &[(&str, &str, TermKind)] = &[
    ("name", "n", TermKind::Name),
    ("version", "v", TermKind::Version),
    ("release", "r", TermKind::Release),
    ("epoch", "e", TermKind::Epoch),
    ("arch", "a", TermKind::Arch),
    ("source", "s", TermKind::Source),
    ("license", "l", TermKind::License),
    ("group", "g", TermKind::Group),
    ("vendor", "V", TermKind::Vendor),
    ("provides", "P", TermKind::Provides),
    ("requires", "R", TermKind::Requires),
    ("recommends", "RC", TermKind::Recommends),
    ("conflicts", "C", TermKind::Conflicts),
    ("obsoletes", "O", TermKind::Obsoletes),
    ("enhances", "E", TermKind::Enhances),
    ("suggests", "SG", TermKind::Suggests),
    ("supplements", "SP", TermKind::Supplements),
    ("file", "f", TermKind::File),
    ("date-add", "d", TermKind::DateAdd),
    ("date-build", "D", TermKind::DateBuild),
    ("host", "h", TermKind::Host),
    ("size", "S", TermKind::Size),
    ("payload", "@", TermKind::Payload),
];

const RELEASED_LONG: &str = "released";
const RELEASED_SHORT: &str = "^";

fn kind_for_name(name: &str) -> Option<TermKind> {
    ALIASES.iter().find(|(l, s, _)| *l == name || *s == name).map(|(_, _, k)| *k)
}

/// A dependency value: `name`, optional comparison flag, optional epoch/version/release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub flag: DepFlag,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
}

/// The dynamically-typed value carried by a term (spec §4.2 Design Note "Dynamic term values").
#[derive(Debug, Clone, PartialEq)]
pub enum TermValue {
    String(String),
    Range(f64, f64),
    Dependency(Dependency),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub kind: TermKind,
    pub value: TermValue,
    pub negative: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFlag {
    Released,
    Unreleased,
    None,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub query: Vec<Term>,
    pub filter: FilterFlag,
}

impl Default for FilterFlag {
    fn default() -> Self {
        FilterFlag::None
    }
}

fn dep_op_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">=|<=|>|<|=").unwrap())
}

fn dep_rest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:([0-9]):)?([0-9a-zA-Z.*]*)(?:-(.*))?$").unwrap())
}

/// Parses a sequence of raw tokens into a `Request`. Blank tokens are dropped; if
/// nothing remains, returns `Ok(None)` (property #1: "null request").
pub fn parse(tokens: &[&str]) -> Result<Option<Request>> {
    let mut query = Vec::new();
    let mut filter = FilterFlag::None;

    for &token in tokens {
        if token.is_empty() {
            continue;
        }
        let (name, rest) = match token.split_once(':') {
            Some((name, rest)) => (name, rest),
            None => {
                // bare value: name-prefix search
                let value = format!("{token}*");
                query.push(Term { kind: TermKind::Name, value: TermValue::String(value), negative: false });
                continue;
            }
        };

        if name == RELEASED_LONG || name == RELEASED_SHORT {
            let (negative, raw) = split_negation(rest);
            let mut value = parse_bool(raw)?;
            if negative {
                value = !value;
            }
            filter = if value { FilterFlag::Released } else { FilterFlag::Unreleased };
            continue;
        }

        let kind = kind_for_name(name).ok_or_else(|| Error::InvalidTerm(name.to_string(), "unrecognized term name".to_string()))?;
        let (negative, raw) = split_negation(rest);
        let value = parse_value(kind, raw)?;
        query.push(Term { kind, value, negative });
    }

    if query.is_empty() && filter == FilterFlag::None {
        return Ok(None);
    }
    Ok(Some(Request { query, filter }))
}

/// Splits a leading `:` (the negation marker) off the term's raw value.
fn split_negation(raw: &str) -> (bool, &str) {
    match raw.strip_prefix(':') {
        Some(rest) => (true, rest),
        None => (false, raw),
    }
}

fn parse_value(kind: TermKind, raw: &str) -> Result<TermValue> {
    match kind {
        TermKind::Provides
        | TermKind::Requires
        | TermKind::Recommends
        | TermKind::Conflicts
        | TermKind::Obsoletes
        | TermKind::Enhances
        | TermKind::Suggests
        | TermKind::Supplements => Ok(TermValue::Dependency(parse_dependency(raw)?)),
        TermKind::Size => parse_size_range(raw).map(|(a, b)| TermValue::Range(a, b)),
        TermKind::DateAdd | TermKind::DateBuild => parse_date_range(raw).map(|(a, b)| TermValue::Range(a, b)),
        TermKind::Arch => Ok(TermValue::String(arch::format_arch_value(raw))),
        _ => Ok(TermValue::String(raw.to_string())),
    }
}

/// Parses `name[flag][epoch:]version-release` (spec §4.1/§8 property #5).
pub fn parse_dependency(raw: &str) -> Result<Dependency> {
    let (name, flag, tail) = match dep_op_regex().find(raw) {
        Some(m) => {
            let flag = DepFlag::from_symbol(m.as_str()).ok_or_else(|| Error::InvalidDependency(raw.to_string()))?;
            (&raw[..m.start()], flag, &raw[m.end()..])
        }
        None => (raw, DepFlag::Any, ""),
    };
    if name.is_empty() {
        return Err(Error::InvalidDependency(raw.to_string()));
    }

    let caps = dep_rest_regex().captures(tail).ok_or_else(|| Error::InvalidDependency(raw.to_string()))?;
    let epoch = caps.get(1).map(|m| m.as_str().to_string());
    let version = caps.get(2).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty());
    let release = caps.get(3).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty());

    if flag != DepFlag::Any && epoch.is_none() && version.is_none() && release.is_none() {
        return Err(Error::InvalidDependency(raw.to_string()));
    }

    Ok(Dependency { name: name.to_string(), flag, epoch, version, release })
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Parses a size value with suffix rules from spec §4.1/§8 property #4.
pub fn parse_size_range(raw: &str) -> Result<(f64, f64)> {
    if let Some(base) = raw.strip_suffix('+') {
        let n = parse_size_value(base)?;
        return Ok((n, GIB));
    }
    if let Some(rest) = raw.strip_suffix('-') {
        let n = parse_size_value(rest)?;
        return Ok((0.0, n));
    }
    if let Some((a, b)) = split_range(raw) {
        let lo = parse_size_value(a)?;
        let hi = parse_size_value(b)?;
        if lo > hi {
            return Err(Error::InvalidSizeRange(raw.to_string()));
        }
        return Ok((lo, hi));
    }
    let n = parse_size_value(raw)?;
    let lo = (n * 0.8).max(0.0);
    let hi = (n * 1.2).min(GIB);
    if lo > hi {
        return Err(Error::InvalidSizeRange(raw.to_string()));
    }
    Ok((lo, hi))
}

/// Splits `"A-B"` on the single interior `-`, being careful to not mistake a bare
/// `"N"` (no dash) or a trailing-dash form (already handled by the caller) for a range.
fn split_range(raw: &str) -> Option<(&str, &str)> {
    let idx = raw.rfind('-')?;
    if idx == 0 || idx == raw.len() - 1 {
        return None;
    }
    Some((&raw[..idx], &raw[idx + 1..]))
}

fn parse_size_value(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let lower = raw.to_lowercase();
    let (number, mult) = if let Some(n) = lower.strip_suffix("gb").or_else(|| lower.strip_suffix("gib")) {
        (n, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(n) = lower.strip_suffix("mb").or_else(|| lower.strip_suffix("mib")) {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = lower.strip_suffix("kb").or_else(|| lower.strip_suffix("kib")) {
        (n, 1024.0)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1.0)
    } else {
        (lower.as_str(), 1.0)
    };
    let value: f64 = number.parse().map_err(|_| Error::InvalidSizeRange(raw.to_string()))?;
    Ok(value * mult)
}

const DAY_SECS: f64 = 86400.0;

/// Parses a duration suffix (`d`ays, `w`eeks, `m`onths≈30d, `y`ears≈365d) into a range
/// `[now - dur, now]`, expressed as unix-epoch seconds.
pub fn parse_date_range(raw: &str) -> Result<(f64, f64)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidTerm("date".to_string(), "empty duration".to_string()));
    }
    let (number, unit) = raw.split_at(raw.len() - 1);
    let count: f64 = number
        .parse()
        .map_err(|_| Error::InvalidTerm("date".to_string(), format!("bad duration {raw:?}")))?;
    let secs = match unit {
        "d" => count * DAY_SECS,
        "w" => count * DAY_SECS * 7.0,
        "m" => count * DAY_SECS * 30.0,
        "y" => count * DAY_SECS * 365.0,
        _ => return Err(Error::InvalidTerm("date".to_string(), format!("bad duration suffix in {raw:?}"))),
    };
    let now = crate::utils::now_secs() as f64;
    Ok((now - secs, now))
}

/// Parses a boolean value (case-insensitive `yes/y/true/1` / `no/n/false/0`).
pub fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        _ => Err(Error::InvalidBoolean(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_kind_has_alias() {
        let kinds: HashSet<_> = ALIASES.iter().map(|(_, _, k)| *k).collect();
        for kind in [
            TermKind::Name, TermKind::Version, TermKind::Release, TermKind::Epoch, TermKind::Arch,
            TermKind::Source, TermKind::License, TermKind::Group, TermKind::Vendor, TermKind::Provides,
            TermKind::Requires, TermKind::Recommends, TermKind::Conflicts, TermKind::Obsoletes,
            TermKind::Enhances, TermKind::Suggests, TermKind::Supplements, TermKind::File,
            TermKind::DateAdd, TermKind::DateBuild, TermKind::Host, TermKind::Size, TermKind::Payload,
        ] {
            assert!(kinds.contains(&kind), "{kind:?} has no alias");
        }
    }

    #[test]
    fn test_alias_equivalence() {
        for (long, short, kind) in ALIASES {
            let sample = sample_value(*kind);
            let long_term = parse(&[&format!("{long}:{sample}")]).unwrap().unwrap().query.remove(0);
            let short_term = parse(&[&format!("{short}:{sample}")]).unwrap().unwrap().query.remove(0);
            assert_eq!(long_term.kind, *kind);
            assert_eq!(short_term.kind, *kind);
        }
    }

    fn sample_value(kind: TermKind) -> &'static str {
        match kind {
            TermKind::Size => "1mb",
            TermKind::DateAdd | TermKind::DateBuild => "1d",
            _ => "v",
        }
    }

    #[test]
    fn test_empty_and_blank_are_null() {
        assert_eq!(parse(&[]).unwrap(), None);
        assert_eq!(parse(&["", "", ""]).unwrap(), None);
    }

    #[test]
    fn test_unknown_term_errors() {
        assert!(parse(&["k:test"]).is_err());
    }

    #[test]
    fn test_negation() {
        let req = parse(&["n::value"]).unwrap().unwrap();
        assert_eq!(req.query[0].kind, TermKind::Name);
        assert_eq!(req.query[0].value, TermValue::String("value".to_string()));
        assert!(req.query[0].negative);
    }

    #[test]
    fn test_s1_parse_released_yes() {
        let req = parse(&["n:test", "^:yes"]).unwrap().unwrap();
        assert_eq!(req.query, vec![Term { kind: TermKind::Name, value: TermValue::String("test".into()), negative: false }]);
        assert_eq!(req.filter, FilterFlag::Released);
    }

    #[test]
    fn test_s2_parse_released_no() {
        let req = parse(&["n:test", "^:no"]).unwrap().unwrap();
        assert_eq!(req.filter, FilterFlag::Unreleased);
    }

    #[test]
    fn test_s3_size_range() {
        let req = parse(&["S:1mb-2mb"]).unwrap().unwrap();
        assert_eq!(req.query[0].value, TermValue::Range(1048576.0, 2097152.0));
    }

    #[test]
    fn test_size_range_laws() {
        assert_eq!(parse_size_range("1mb+").unwrap(), (1048576.0, GIB));
        assert_eq!(parse_size_range("1mb-").unwrap(), (0.0, 1048576.0));
        assert_eq!(parse_size_range("1mb-2mb").unwrap(), (1048576.0, 2097152.0));
        assert!(parse_size_range("2mb-1mb").is_err());
    }

    #[test]
    fn test_dependency_regex() {
        let dep = parse_dependency("webkaos>=2:3.8.1-4.el7").unwrap();
        assert_eq!(dep.name, "webkaos");
        assert_eq!(dep.flag, DepFlag::Ge);
        assert_eq!(dep.epoch.as_deref(), Some("2"));
        assert_eq!(dep.version.as_deref(), Some("3.8.1"));
        assert_eq!(dep.release.as_deref(), Some("4.el7"));
    }

    #[test]
    fn test_dependency_flag_requires_value() {
        assert!(parse_dependency("foo=").is_err());
    }

    #[test]
    fn test_bare_value_is_name_prefix() {
        let req = parse(&["test"]).unwrap().unwrap();
        assert_eq!(req.query[0].kind, TermKind::Name);
        assert_eq!(req.query[0].value, TermValue::String("test*".to_string()));
    }

    #[test]
    fn test_bool_parsing() {
        assert!(parse_bool("YES").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("no").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_arch_value_expansion() {
        let req = parse(&["a:x32"]).unwrap().unwrap();
        assert_eq!(req.query[0].value, TermValue::String("i386".to_string()));
    }
}
