//! Small helpers shared by several components: natural-sort ordering and owner lookup.

use crate::errors::*;
use std::cmp::Ordering;
use std::ffi::{CStr, CString};

/// Compares two strings the way `sort -V` does: runs of digits compare numerically,
/// everything else compares byte-wise. Used for package name/version/release ordering
/// (spec §4.2 result-assembly rule) and comps XML id/name ordering (spec §4.7).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek(), b.peek()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut a);
                    let nb = take_number(&mut b);
                    match na.cmp(&nb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                } else {
                    match ca.cmp(&cb) {
                        Ordering::Equal => {
                            a.next();
                            b.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

fn take_number(iter: &mut std::iter::Peekable<impl Iterator<Item = char>>) -> u128 {
    let mut n: u128 = 0;
    while let Some(&c) = iter.peek() {
        if let Some(d) = c.to_digit(10) {
            n = n.saturating_mul(10).saturating_add(d as u128);
            iter.next();
        } else {
            break;
        }
    }
    n
}

/// Compares version strings, parsing as semver where possible and falling back to
/// natural-sort comparison otherwise (spec §4.2: "semver-parsed where possible, natural
/// otherwise").
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => natural_cmp(a, b),
    }
}

/// Resolves a unix user name to a uid via `getpwnam`.
pub fn resolve_uid(name: &str) -> Result<u32> {
    let cname = CString::new(name).map_err(|_| Error::InvalidOptions(format!("invalid user name {name:?}")))?;
    let pwd = unsafe { libc::getpwnam(cname.as_ptr()) };
    if pwd.is_null() {
        return Err(Error::InvalidOptions(format!("unknown user {name:?}")));
    }
    Ok(unsafe { (*pwd).pw_uid })
}

/// Resolves a unix group name to a gid via `getgrnam`.
pub fn resolve_gid(name: &str) -> Result<u32> {
    let cname = CString::new(name).map_err(|_| Error::InvalidOptions(format!("invalid group name {name:?}")))?;
    let grp = unsafe { libc::getgrnam(cname.as_ptr()) };
    if grp.is_null() {
        return Err(Error::InvalidOptions(format!("unknown group {name:?}")));
    }
    Ok(unsafe { (*grp).gr_gid })
}

/// Current unix time in seconds, used as the anchor for date-range query terms.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[allow(dead_code)]
fn cstr_to_string(ptr: *const libc::c_char) -> String {
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
