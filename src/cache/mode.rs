//! Cache-control mode and final mode resolution.
//!
//! The primary mode is exactly one of four states. The two flags ride alongside
//! it and never change which state is stored.

use std::fmt;

use serde::Serialize;

const STALE_BIT: u8 = 64;
const SHOW_HEADERS_BIT: u8 = 128;
const FLAG_MASK: u8 = STALE_BIT | SHOW_HEADERS_BIT;

/// Primary cache-control state of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    NoCache,
    Cache,
    /// Purge every tag identifying the current response.
    Purge,
    /// Purge only the URL tag of the current response.
    PurgeSingle,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::NoCache => "no_cache",
            CacheMode::Cache => "cache",
            CacheMode::Purge => "purge",
            CacheMode::PurgeSingle => "purge_single",
        }
    }

    fn bits(self) -> u8 {
        match self {
            CacheMode::NoCache => 0,
            CacheMode::Cache => 1,
            CacheMode::Purge => 2,
            CacheMode::PurgeSingle => 3,
        }
    }

    fn from_primary_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(CacheMode::NoCache),
            1 => Some(CacheMode::Cache),
            2 => Some(CacheMode::Purge),
            3 => Some(CacheMode::PurgeSingle),
            _ => None,
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags orthogonal to the primary mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModeFlags {
    /// Collapse all directives into the debug header.
    pub show_headers: bool,
    /// Purged entries may still be served while the proxy refreshes them.
    pub stale: bool,
}

/// Primary mode plus flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheControl {
    pub mode: CacheMode,
    pub flags: ModeFlags,
}

impl CacheControl {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            flags: ModeFlags::default(),
        }
    }

    /// Pack into the legacy single-integer form.
    pub fn bits(self) -> u8 {
        let mut bits = self.mode.bits();
        if self.flags.stale {
            bits |= STALE_BIT;
        }
        if self.flags.show_headers {
            bits |= SHOW_HEADERS_BIT;
        }
        bits
    }

    /// Split the legacy single-integer form. Unknown primary values yield `None`.
    pub fn from_bits(bits: u8) -> Option<Self> {
        let mode = CacheMode::from_primary_bits(bits & !FLAG_MASK)?;
        Some(Self {
            mode,
            flags: ModeFlags {
                show_headers: bits & SHOW_HEADERS_BIT != 0,
                stale: bits & STALE_BIT != 0,
            },
        })
    }
}

/// Request-level signals consulted when a CACHE decision is finalised.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeContext {
    /// Administrative screen, site or network.
    pub admin: bool,
    pub forced_no_cache: bool,
    /// The request was flagged non-cacheable after evaluation.
    pub non_cacheable: bool,
    /// The platform or an extension marked the body as device-specific.
    pub platform_mobile: bool,
    /// Local user-agent detection.
    pub agent_mobile: bool,
    /// The proxy keys this request into its mobile partition.
    pub upstream_expects_mobile: bool,
    pub mobile_view: bool,
}

/// Final mode-resolution policy.
///
/// Only a stored CACHE mode is subject to policy; the purge modes and
/// NOCACHE pass through untouched. Flags are always preserved.
pub fn resolve_mode(control: CacheControl, context: &ModeContext) -> CacheControl {
    let resolved = match control.mode {
        CacheMode::Cache => resolve_cache(context),
        other => other,
    };
    CacheControl {
        mode: resolved,
        flags: control.flags,
    }
}

fn resolve_cache(context: &ModeContext) -> CacheMode {
    if context.admin || context.forced_no_cache || context.non_cacheable {
        return CacheMode::NoCache;
    }

    if !context.mobile_view {
        return if context.platform_mobile {
            CacheMode::NoCache
        } else {
            CacheMode::Cache
        };
    }

    let detected_mobile = context.agent_mobile || context.platform_mobile;
    if context.upstream_expects_mobile != detected_mobile {
        return CacheMode::NoCache;
    }
    CacheMode::Cache
}
