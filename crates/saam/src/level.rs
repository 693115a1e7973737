//! Enforcement levels
//!
//! The level is fixed for a whole build through Cargo features. It decides
//! which [`Enforcement`](crate::Enforcement) policy the handle types use
//! when no policy is named explicitly.

use crate::policy::{ActivePolicy, Enforcement};

/// How strictly the ownership and borrow discipline is checked at run time
///
/// The `Display`/`FromStr` spellings match the build option values
/// (`unchecked`, `counted`, `tracked`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum EnforcementLevel {
    /// No run-time checks; acquire and release compile away
    Unchecked,
    /// Borrows are counted, but aliasing is not validated
    Counted,
    /// Full borrow-state machine with violation reporting
    Tracked,
}

impl EnforcementLevel {
    /// All levels, in increasing strictness
    pub const ALL: [EnforcementLevel; 3] = [
        EnforcementLevel::Unchecked,
        EnforcementLevel::Counted,
        EnforcementLevel::Tracked,
    ];

    /// Ordinal used by the build wiring
    ///
    /// The mapping is `counted = 0`, `tracked = 1`, `unchecked = 2`. It is an
    /// encoding detail, not a strictness scale; use [`is_tracking`] or
    /// [`counts_borrows`] for semantic questions.
    ///
    /// [`is_tracking`]: EnforcementLevel::is_tracking
    /// [`counts_borrows`]: EnforcementLevel::counts_borrows
    pub const fn ordinal(self) -> u8 {
        match self {
            EnforcementLevel::Counted => 0,
            EnforcementLevel::Tracked => 1,
            EnforcementLevel::Unchecked => 2,
        }
    }

    /// Decode a build-wiring ordinal
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(EnforcementLevel::Counted),
            1 => Some(EnforcementLevel::Tracked),
            2 => Some(EnforcementLevel::Unchecked),
            _ => None,
        }
    }

    /// Whether violations are detected and reported
    pub const fn is_tracking(self) -> bool {
        matches!(self, EnforcementLevel::Tracked)
    }

    /// Whether outstanding borrows are counted at all
    pub const fn counts_borrows(self) -> bool {
        !matches!(self, EnforcementLevel::Unchecked)
    }
}

/// The level this build was compiled with
pub const ACTIVE_LEVEL: EnforcementLevel = <ActivePolicy as Enforcement>::LEVEL;
