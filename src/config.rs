// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Limits and process-wide settings.

use std::sync::OnceLock;

/// Longest logical name accepted for a named area or semaphore.
pub const OS_NAME_LENGTH: usize = 32;

/// Exact length of an area domain tag ("sem_", "pipe", ...).
pub const DOMAIN_LENGTH: usize = 4;

/// Stamped at the front of every named area.
pub const AREA_MAGIC: u32 = 0x4554_4b41; // "ETKA"

/// Bytes reserved in front of the user region of every area.
pub const AREA_HEADER_SIZE: usize = 64;

/// Slots per token depot page.
pub const TOKEN_PAGE_SLOTS: usize = 256;

/// Domain used for the areas backing named semaphores.
pub const SEM_DOMAIN: &str = "sem_";

/// Environment variable overriding the namespace of OS-level object names.
pub const PREFIX_ENV: &str = "LIBETK_SHM_PREFIX";

const DEFAULT_PREFIX: &str = "etk";

/// Namespace prepended to every OS-level object name.
///
/// Read from `LIBETK_SHM_PREFIX` on first use and fixed for the lifetime of
/// the process. Invalid values (empty, containing '/') fall back to "etk".
pub fn name_prefix() -> &'static str {
    static PREFIX: OnceLock<String> = OnceLock::new();
    PREFIX.get_or_init(|| match std::env::var(PREFIX_ENV) {
        Ok(p) if valid_prefix(&p) => p,
        Ok(p) => {
            log::warn!("ignoring invalid {PREFIX_ENV}={p:?}");
            DEFAULT_PREFIX.to_string()
        }
        Err(_) => DEFAULT_PREFIX.to_string(),
    })
}

fn valid_prefix(p: &str) -> bool {
    !p.is_empty() && p.len() <= 16 && p.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
