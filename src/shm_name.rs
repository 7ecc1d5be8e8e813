// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// OS-level object names for named areas: `/<prefix>_<domain>_<name>`,
// shortened with an FNV-1a hash where the platform limit is small.

use crate::config::{self, DOMAIN_LENGTH, OS_NAME_LENGTH};
use crate::{Error, Result};

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm names. 0 disables truncation.
///
/// On macOS `PSHMNAMLEN` is 31. On Linux the limit is typically 255.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Check a logical name: 1..=OS_NAME_LENGTH bytes, no '/' and no NUL.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::BadValue("name is empty"));
    }
    if name.len() > OS_NAME_LENGTH {
        return Err(Error::BadValue("name is too long"));
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(Error::BadValue("name contains '/' or NUL"));
    }
    Ok(())
}

/// Check a domain tag: exactly DOMAIN_LENGTH printable ASCII characters.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.len() != DOMAIN_LENGTH {
        return Err(Error::BadValue("domain must be 4 characters"));
    }
    if !domain.bytes().all(|b| b.is_ascii_graphic() && b != b'/') {
        return Err(Error::BadValue("domain must be printable ASCII"));
    }
    Ok(())
}

/// Registry key for `(name, domain)`; also the unshortened OS name.
pub(crate) fn area_key(domain: &str, name: &str) -> String {
    format!("/{}_{}_{}", config::name_prefix(), domain, name)
}

/// OS name for a named area. Validates both parts first.
pub fn make_area_name(domain: &str, name: &str) -> Result<String> {
    validate_domain(domain)?;
    validate_name(name)?;
    Ok(shorten(area_key(domain, name)))
}

fn shorten(full: String) -> String {
    if SHM_NAME_MAX == 0 || full.len() <= SHM_NAME_MAX {
        return full;
    }

    // 1 (underscore) + 16 (hex hash)
    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = SHM_NAME_MAX.saturating_sub(HASH_SUFFIX_LEN + 1);

    let mut shortened = String::with_capacity(SHM_NAME_MAX);
    shortened.push('/');
    let body = &full[1..];
    let mut take = prefix_len.min(body.len());
    while !body.is_char_boundary(take) {
        take -= 1;
    }
    shortened.push_str(&body[..take]);
    shortened.push('_');
    shortened.push_str(&format!("{:016x}", fnv1a_64(full.as_bytes())));
    shortened
}
