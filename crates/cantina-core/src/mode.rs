use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CantinaError;

/// System operation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemMode {
    /// Initial mode while services come up.
    Startup,
    Idle,
    /// Background behaviors only (music, ambient effects).
    Ambient,
    /// Full voice interaction enabled.
    Interactive,
}

impl Default for SystemMode {
    fn default() -> Self {
        Self::Startup
    }
}

impl SystemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMode::Startup => "STARTUP",
            SystemMode::Idle => "IDLE",
            SystemMode::Ambient => "AMBIENT",
            SystemMode::Interactive => "INTERACTIVE",
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemMode {
    type Err = CantinaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STARTUP" => Ok(SystemMode::Startup),
            "IDLE" => Ok(SystemMode::Idle),
            "AMBIENT" => Ok(SystemMode::Ambient),
            "INTERACTIVE" => Ok(SystemMode::Interactive),
            other => Err(CantinaError::Validation(format!(
                "unknown system mode: {other}"
            ))),
        }
    }
}

/// Outcome carried by `mode.transition.complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransitionStatus {
    Success,
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [
            SystemMode::Startup,
            SystemMode::Idle,
            SystemMode::Ambient,
            SystemMode::Interactive,
        ] {
            assert_eq!(mode.as_str().parse::<SystemMode>().unwrap(), mode);
        }
    }

    #[test]
    fn mode_parse_is_case_insensitive() {
        assert_eq!("interactive".parse::<SystemMode>().unwrap(), SystemMode::Interactive);
    }

    #[test]
    fn unknown_mode_is_validation_error() {
        assert!(matches!(
            "PARTY".parse::<SystemMode>(),
            Err(CantinaError::Validation(_))
        ));
    }
}
