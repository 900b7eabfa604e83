// config.rs — Compilation options
//
// Preconditions: none.
// Postconditions: none (value types only).
// Failure modes: `EnforcementLevel::from_str` rejects unknown level names.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::diag::DiagLevel;

/// How strictly legacy or non-portable constructs are treated.
///
/// Ordered from most to least permissive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    #[default]
    Disable,
    Log,
    Alarm,
    Error,
}

impl EnforcementLevel {
    /// The level at which an enforced check is reported, or `None` when
    /// the check is skipped entirely.
    pub fn diag_level(self) -> Option<DiagLevel> {
        match self {
            EnforcementLevel::Disable => None,
            EnforcementLevel::Log | EnforcementLevel::Alarm => Some(DiagLevel::Warning),
            EnforcementLevel::Error => Some(DiagLevel::Error),
        }
    }
}

impl fmt::Display for EnforcementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnforcementLevel::Disable => "disable",
            EnforcementLevel::Log => "log",
            EnforcementLevel::Alarm => "alarm",
            EnforcementLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for EnforcementLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" | "" => Ok(EnforcementLevel::Disable),
            "log" => Ok(EnforcementLevel::Log),
            "alarm" => Ok(EnforcementLevel::Alarm),
            "error" => Ok(EnforcementLevel::Error),
            other => Err(format!("unknown enforcement level '{other}'")),
        }
    }
}

/// Options threaded through a single compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub enforcement: EnforcementLevel,
    /// Report each pass and its elapsed time on stderr.
    pub verbose: bool,
}

impl CompileOptions {
    pub fn with_enforcement(mut self, level: EnforcementLevel) -> Self {
        self.enforcement = level;
        self
    }
}
