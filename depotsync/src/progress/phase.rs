//! Download lifecycle phases.

use std::fmt;
use std::str::FromStr;

/// Lifecycle phase of a download.
///
/// ```text
/// Unknown -> Preparing -> Downloading <-> Paused
///   -> Verifying -> Patching -> ApplyingData -> Finalizing -> Complete
/// any -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownloadPhase {
    #[default]
    Unknown,
    Preparing,
    Downloading,
    Paused,
    Verifying,
    Patching,
    ApplyingData,
    Finalizing,
    Complete,
    Failed,
}

impl DownloadPhase {
    /// `Complete` and `Failed` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Phases in which an ETA is meaningful.
    pub fn allows_eta(&self) -> bool {
        matches!(self, Self::Unknown | Self::Downloading)
    }

    /// Entering `Downloading` from any phase but itself or `Unknown` starts a
    /// fresh speed history.
    pub(crate) fn resets_speed_on_entry(previous: Self, next: Self) -> bool {
        next == Self::Downloading && !matches!(previous, Self::Downloading | Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Preparing => "PREPARING",
            Self::Downloading => "DOWNLOADING",
            Self::Paused => "PAUSED",
            Self::Verifying => "VERIFYING",
            Self::Patching => "PATCHING",
            Self::ApplyingData => "APPLYING_DATA",
            Self::Finalizing => "FINALIZING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a phase name, mapping anything unrecognized to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let phase = match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Self::Unknown,
            "PREPARING" => Self::Preparing,
            "DOWNLOADING" => Self::Downloading,
            "PAUSED" => Self::Paused,
            "VERIFYING" => Self::Verifying,
            "PATCHING" => Self::Patching,
            "APPLYING_DATA" => Self::ApplyingData,
            "FINALIZING" => Self::Finalizing,
            "COMPLETE" => Self::Complete,
            "FAILED" => Self::Failed,
            _ => return Err(format!("unknown download phase: {}", s)),
        };
        Ok(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(DownloadPhase::Complete.is_terminal());
        assert!(DownloadPhase::Failed.is_terminal());
        assert!(!DownloadPhase::Paused.is_terminal());
    }

    #[test]
    fn test_speed_reset_rule() {
        use DownloadPhase::*;
        assert!(DownloadPhase::resets_speed_on_entry(Paused, Downloading));
        assert!(DownloadPhase::resets_speed_on_entry(Preparing, Downloading));
        assert!(!DownloadPhase::resets_speed_on_entry(Unknown, Downloading));
        assert!(!DownloadPhase::resets_speed_on_entry(Downloading, Downloading));
        assert!(!DownloadPhase::resets_speed_on_entry(Paused, Verifying));
    }

    #[test]
    fn test_from_name() {
        assert_eq!(DownloadPhase::from_name("APPLYING_DATA"), DownloadPhase::ApplyingData);
        assert_eq!(DownloadPhase::from_name("paused"), DownloadPhase::Paused);
        assert_eq!(DownloadPhase::from_name("bogus"), DownloadPhase::Unknown);
    }
}
