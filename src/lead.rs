//! RPM lead block (first 96 bytes of every `.rpm` file).

use crate::arch::{self, ArchClass, ArchInfo};

pub const LEAD_SIZE: usize = 96;
const MAGIC: [u8; 4] = [0xED, 0xAB, 0xEE, 0xDB];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LeadError {
    #[error("RPM lead is truncated: got {0} bytes, need {LEAD_SIZE}")]
    Truncated(usize),
    #[error("bad RPM magic")]
    BadMagic,
    #[error("unsupported signature type {0}")]
    UnsupportedSigType(u16),
}

/// Maps the lead's numeric arch code to our arch table. The spec fixes one concrete
/// mapping (code 1 -> x86_64-class); the rest is filled in by natural extension and
/// recorded as a judgment call in DESIGN.md.
const ARCH_NUMS: &[(u16, &str)] = &[
    (1, "x86_64"),
    (2, "i386"),
    (3, "i686"),
    (10, "ppc64le"),
    (12, "s390x"),
    (14, "armv7hl"),
    (19, "aarch64"),
    (255, "noarch"),
];

const OS_NUMS: &[(u16, &str)] = &[(1, "Linux")];

/// True iff `buf` starts with the RPM magic number `0xEDABEEDB`.
pub fn has_rpm_magic(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0..4] == MAGIC
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lead {
    pub major: u8,
    pub minor: u8,
    pub is_src: bool,
    pub arch_num: u16,
    pub name: String,
    pub os_num: u16,
    pub sig_type: u16,
}

impl Lead {
    /// Parses the fixed 96-byte lead block from the start of an RPM file.
    pub fn parse(buf: &[u8]) -> Result<Self, LeadError> {
        if buf.len() < LEAD_SIZE {
            return Err(LeadError::Truncated(buf.len()));
        }
        if buf[0..4] != MAGIC {
            return Err(LeadError::BadMagic);
        }

        let major = buf[4];
        let minor = buf[5];
        let is_src = u16::from_be_bytes([buf[6], buf[7]]) == 1;
        let arch_num = u16::from_be_bytes([buf[8], buf[9]]);

        let raw_name = &buf[10..76];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();

        let os_num = u16::from_be_bytes([buf[76], buf[77]]);
        let sig_type = u16::from_be_bytes([buf[78], buf[79]]);
        if sig_type != 5 {
            return Err(LeadError::UnsupportedSigType(sig_type));
        }

        Ok(Lead { major, minor, is_src, arch_num, name, os_num, sig_type })
    }

    /// Resolves this lead's arch code to an arch-table row, if known.
    pub fn arch_info(&self) -> Option<&'static ArchInfo> {
        if self.is_src {
            return arch::by_name("src");
        }
        let name = ARCH_NUMS.iter().find(|(n, _)| *n == self.arch_num).map(|(_, n)| *n)?;
        arch::by_name(name)
    }

    pub fn is_noarch(&self) -> bool {
        self.arch_info().map(|a| a.class == ArchClass::NoArch).unwrap_or(false)
    }

    pub fn os_name(&self) -> Option<&'static str> {
        OS_NUMS.iter().find(|(n, _)| *n == self.os_num).map(|(_, n)| *n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_lead(is_src: bool, arch_num: u16, name: &str, os_num: u16, sig_type: u16) -> Vec<u8> {
        let mut buf = vec![0u8; LEAD_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = 3;
        buf[5] = 0;
        buf[6..8].copy_from_slice(&(if is_src { 1u16 } else { 0 }).to_be_bytes());
        buf[8..10].copy_from_slice(&arch_num.to_be_bytes());
        let name_bytes = name.as_bytes();
        buf[10..10 + name_bytes.len()].copy_from_slice(name_bytes);
        buf[76..78].copy_from_slice(&os_num.to_be_bytes());
        buf[78..80].copy_from_slice(&sig_type.to_be_bytes());
        buf
    }

    #[test]
    fn test_truncated() {
        assert_eq!(Lead::parse(&[0u8; 10]), Err(LeadError::Truncated(10)));
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = vec![0u8; LEAD_SIZE];
        buf[0] = 0;
        assert_eq!(Lead::parse(&buf), Err(LeadError::BadMagic));
    }

    #[test]
    fn test_unsupported_sig_type() {
        let buf = build_lead(false, 1, "git-all-2.27.0-0.el7", 1, 4);
        assert_eq!(Lead::parse(&buf), Err(LeadError::UnsupportedSigType(4)));
    }

    #[test]
    fn test_decode_git_all() {
        // property #11: git-all-2.27.0-0.el7.noarch.rpm decodes to this shape
        let buf = build_lead(false, 1, "git-all-2.27.0-0.el7", 1, 5);
        let lead = Lead::parse(&buf).unwrap();
        assert_eq!(lead.name, "git-all-2.27.0-0.el7");
        assert_eq!(lead.arch_num, 1);
        assert_eq!(lead.arch_info().unwrap().name, "x86_64");
        assert_eq!(lead.os_num, 1);
        assert_eq!(lead.os_name(), Some("Linux"));
        assert_eq!(lead.sig_type, 5);
        assert_eq!(lead.major, 3);
        assert_eq!(lead.minor, 0);
        assert!(!lead.is_src);
    }

    #[test]
    fn test_source_rpm() {
        let buf = build_lead(true, 0, "foo-1.0-1.el7", 1, 5);
        let lead = Lead::parse(&buf).unwrap();
        assert!(lead.is_src);
        assert_eq!(lead.arch_info().unwrap().name, "src");
    }
}
