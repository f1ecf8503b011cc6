//! Static tables for supported architectures and dependency comparison flags.

use std::fmt;
use std::str::FromStr;

/// Which kind of architecture a table row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchClass {
    Src,
    NoArch,
    Binary,
}

/// One row of the architecture table.
#[derive(Debug, Clone, Copy)]
pub struct ArchInfo {
    /// Canonical name, e.g. `x86_64`.
    pub name: &'static str,
    /// Short tag, e.g. `x64`.
    pub tag: &'static str,
    /// On-disk directory name. Empty for pseudo-arches that are never materialized as a directory.
    pub dir: &'static str,
    /// Bit assigned to this arch within a 32-bit membership bitset.
    pub flag: u32,
    pub class: ArchClass,
}

/// Supported architectures. Flag bits are pairwise distinct by construction (see `test_flags_distinct`).
pub const ARCHES: &[ArchInfo] = &[
    ArchInfo { name: "src", tag: "src", dir: "SRPMS", flag: 1 << 0, class: ArchClass::Src },
    ArchInfo { name: "noarch", tag: "noarch", dir: "noarch", flag: 1 << 1, class: ArchClass::NoArch },
    ArchInfo { name: "x86_64", tag: "x64", dir: "x86_64", flag: 1 << 2, class: ArchClass::Binary },
    ArchInfo { name: "i386", tag: "x32", dir: "i386", flag: 1 << 3, class: ArchClass::Binary },
    ArchInfo { name: "i686", tag: "i686", dir: "i686", flag: 1 << 4, class: ArchClass::Binary },
    ArchInfo { name: "aarch64", tag: "arm64", dir: "aarch64", flag: 1 << 5, class: ArchClass::Binary },
    ArchInfo { name: "armv7hl", tag: "armhf", dir: "armv7hl", flag: 1 << 6, class: ArchClass::Binary },
    ArchInfo { name: "ppc64le", tag: "ppc64le", dir: "ppc64le", flag: 1 << 7, class: ArchClass::Binary },
    ArchInfo { name: "s390x", tag: "s390x", dir: "s390x", flag: 1 << 8, class: ArchClass::Binary },
];

/// Looks up an arch row by canonical name.
pub fn by_name(name: &str) -> Option<&'static ArchInfo> {
    ARCHES.iter().find(|a| a.name == name)
}

/// Looks up an arch row by canonical name or short tag.
pub fn by_name_or_tag(value: &str) -> Option<&'static ArchInfo> {
    ARCHES.iter().find(|a| a.name == value || a.tag == value)
}

/// Expands a short tag to its canonical name. Unknown values pass through unchanged,
/// per the `formatArchValue` contract (property #6 in the testable-properties list).
pub fn format_arch_value(value: &str) -> String {
    let value = value.to_lowercase();
    match by_name_or_tag(&value) {
        Some(info) => info.name.to_string(),
        None => value,
    }
}

/// Comparison operator for a `Dependency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepFlag {
    Any,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl DepFlag {
    /// Parses the comparison symbol captured by the dependency regex (`>=`, `<=`, `>`, `<`, `=`, or empty).
    pub fn from_symbol(sym: &str) -> Option<Self> {
        match sym {
            "" => Some(DepFlag::Any),
            "=" => Some(DepFlag::Eq),
            "<" => Some(DepFlag::Lt),
            "<=" => Some(DepFlag::Le),
            ">" => Some(DepFlag::Gt),
            ">=" => Some(DepFlag::Ge),
            _ => None,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            DepFlag::Any => DepFlag::Any,
            DepFlag::Eq => DepFlag::Eq,
            DepFlag::Lt => DepFlag::Ge,
            DepFlag::Le => DepFlag::Gt,
            DepFlag::Gt => DepFlag::Le,
            DepFlag::Ge => DepFlag::Lt,
        }
    }
}

impl fmt::Display for DepFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepFlag::Any => "ANY",
            DepFlag::Eq => "EQ",
            DepFlag::Lt => "LT",
            DepFlag::Le => "LE",
            DepFlag::Gt => "GT",
            DepFlag::Ge => "GE",
        };
        f.write_str(s)
    }
}

impl FromStr for DepFlag {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANY" => Ok(DepFlag::Any),
            "EQ" => Ok(DepFlag::Eq),
            "LT" => Ok(DepFlag::Lt),
            "LE" => Ok(DepFlag::Le),
            "GT" => Ok(DepFlag::Gt),
            "GE" => Ok(DepFlag::Ge),
            _ => Err(crate::errors::Error::InvalidDependency(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_flags_distinct() {
        let mut seen = HashSet::new();
        for a in ARCHES {
            assert!(seen.insert(a.flag), "duplicate flag bit for {}", a.name);
        }
    }

    #[test]
    fn test_format_arch_value() {
        assert_eq!(format_arch_value("x32"), "i386");
        assert_eq!(format_arch_value("src"), "src");
        assert_eq!(format_arch_value("made-up-arch"), "made-up-arch");
    }

    #[test]
    fn test_depflag_roundtrip() {
        for flag in [DepFlag::Any, DepFlag::Eq, DepFlag::Lt, DepFlag::Le, DepFlag::Gt, DepFlag::Ge] {
            let s = flag.to_string();
            assert_eq!(s.parse::<DepFlag>().unwrap(), flag);
        }
    }

    #[test]
    fn test_depflag_symbols() {
        assert_eq!(DepFlag::from_symbol(">="), Some(DepFlag::Ge));
        assert_eq!(DepFlag::from_symbol("<="), Some(DepFlag::Le));
        assert_eq!(DepFlag::from_symbol(">"), Some(DepFlag::Gt));
        assert_eq!(DepFlag::from_symbol("<"), Some(DepFlag::Lt));
        assert_eq!(DepFlag::from_symbol("="), Some(DepFlag::Eq));
        assert_eq!(DepFlag::from_symbol(""), Some(DepFlag::Any));
        assert_eq!(DepFlag::from_symbol("~="), None);
    }
}
