//! Per-uid metered network policies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Runtime identity of an installed application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl Uid {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Uid {
    fn from(value: u32) -> Self {
        Uid(value)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Policy bitmask as stored by the authority.
///
/// Only [`UidPolicy::REJECT_METERED_BACKGROUND`] and
/// [`UidPolicy::ALLOW_METERED_BACKGROUND`] are interpreted here. Any other
/// bits are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UidPolicy(u32);

impl UidPolicy {
    pub const NONE: UidPolicy = UidPolicy(0);
    /// Background data on metered networks is rejected
    pub const REJECT_METERED_BACKGROUND: UidPolicy = UidPolicy(1 << 0);
    /// Background data on metered networks is allowed even with data saver on
    pub const ALLOW_METERED_BACKGROUND: UidPolicy = UidPolicy(1 << 2);
    /// Bits the policy cache cares about
    pub const TRACKED: UidPolicy =
        UidPolicy(Self::REJECT_METERED_BACKGROUND.0 | Self::ALLOW_METERED_BACKGROUND.0);

    pub const fn from_bits(bits: u32) -> Self {
        UidPolicy(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set. `NONE` is never contained.
    pub const fn contains(&self, other: UidPolicy) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: UidPolicy) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn with(self, other: UidPolicy) -> Self {
        UidPolicy(self.0 | other.0)
    }

    pub const fn without(self, other: UidPolicy) -> Self {
        UidPolicy(self.0 & !other.0)
    }

    /// Mask down to the allow/reject bits
    pub const fn tracked(self) -> Self {
        UidPolicy(self.0 & Self::TRACKED.0)
    }

    /// The tracked bits that may not coexist with the tracked bits of `self`
    pub const fn exclusive_with(self) -> Self {
        let mut excluded = 0;
        if self.0 & Self::ALLOW_METERED_BACKGROUND.0 != 0 {
            excluded |= Self::REJECT_METERED_BACKGROUND.0;
        }
        if self.0 & Self::REJECT_METERED_BACKGROUND.0 != 0 {
            excluded |= Self::ALLOW_METERED_BACKGROUND.0;
        }
        UidPolicy(excluded)
    }
}

impl BitOr for UidPolicy {
    type Output = UidPolicy;

    fn bitor(self, rhs: UidPolicy) -> UidPolicy {
        self.with(rhs)
    }
}

impl fmt::Display for UidPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Error type for parsing a policy name
#[derive(Debug, Clone)]
pub struct ParsePolicyError(String);

impl fmt::Display for ParsePolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid policy: {} (expected none, allow or reject)", self.0)
    }
}

impl std::error::Error for ParsePolicyError {}

/// Effective background data policy of an application
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Follows the global data saver state
    #[default]
    None,
    /// Unrestricted: may use metered data in the background
    #[serde(rename = "allow")]
    AllowMeteredBackground,
    /// Restricted: never uses metered data in the background
    #[serde(rename = "reject")]
    RejectMeteredBackground,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::None => "none",
            Policy::AllowMeteredBackground => "allow",
            Policy::RejectMeteredBackground => "reject",
        }
    }
}

impl From<UidPolicy> for Policy {
    /// Reject wins if a malformed mask carries both bits
    fn from(mask: UidPolicy) -> Self {
        if mask.contains(UidPolicy::REJECT_METERED_BACKGROUND) {
            Policy::RejectMeteredBackground
        } else if mask.contains(UidPolicy::ALLOW_METERED_BACKGROUND) {
            Policy::AllowMeteredBackground
        } else {
            Policy::None
        }
    }
}

impl From<Policy> for UidPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::None => UidPolicy::NONE,
            Policy::AllowMeteredBackground => UidPolicy::ALLOW_METERED_BACKGROUND,
            Policy::RejectMeteredBackground => UidPolicy::REJECT_METERED_BACKGROUND,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Policy::None),
            "allow" | "whitelist" => Ok(Policy::AllowMeteredBackground),
            "reject" | "blacklist" => Ok(Policy::RejectMeteredBackground),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}
