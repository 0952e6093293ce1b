//! Notification policy
//!
//! | mode        | notify when          |
//! |-------------|----------------------|
//! | `test`      | never                |
//! | `manual`    | always               |
//! | `scheduled` | the public IP changed |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Why a check is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Daily run from the daemon
    Scheduled,
    /// Operator asked for a notification now
    Manual,
    /// Dry run; nothing is sent or recorded
    Test,
}

impl CheckMode {
    pub const ALL: [CheckMode; 3] = [CheckMode::Scheduled, CheckMode::Manual, CheckMode::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMode::Scheduled => "scheduled",
            CheckMode::Manual => "manual",
            CheckMode::Test => "test",
        }
    }
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(CheckMode::Scheduled),
            "manual" => Ok(CheckMode::Manual),
            "test" => Ok(CheckMode::Test),
            other => Err(Error::invalid_input(format!("unknown check mode: {}", other))),
        }
    }
}

/// Decides whether a check should produce a notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationPolicy;

impl NotificationPolicy {
    /// Pure decision for a known mode
    pub fn decide(mode: CheckMode, has_changed: bool) -> bool {
        match mode {
            CheckMode::Test => false,
            CheckMode::Manual => true,
            CheckMode::Scheduled => has_changed,
        }
    }

    /// Decision for a mode read from outside (history files, CLI input)
    ///
    /// Unknown modes never notify.
    pub fn decide_raw(mode: &str, has_changed: bool) -> bool {
        match mode.parse::<CheckMode>() {
            Ok(mode) => Self::decide(mode, has_changed),
            Err(_) => {
                tracing::warn!("Unknown check mode '{}', not notifying", mode);
                false
            }
        }
    }
}
