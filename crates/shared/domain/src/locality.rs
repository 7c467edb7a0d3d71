use serde::{Deserialize, Serialize};

/// Where a file currently resides, as externally visible.
///
/// Derived, never stored: a [`Locality`] is always recomputed from the
/// current probe facts, and `Lost` never crosses the HTTP boundary (it is
/// rewritten to `Unavailable` by the call site, see the Lifecycle Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    /// Locality could not be determined (probe error), or a `Lost` file
    /// rewritten for external consumption.
    Unavailable,
    Disk,
    Tape,
    DiskAndTape,
    /// Internal only: on tape but its disk stub has vanished. Eligible for
    /// take-over, but never handed to a client as-is.
    Lost,
    /// Sentinel default, used before a Locality has been computed.
    None,
}

impl Locality {
    /// Derives a Locality from the three probe facts, per the truth table
    /// in the Storage Probe design.
    #[must_use]
    pub const fn from_probe_facts(on_disk: bool, on_tape: bool) -> Self {
        match (on_disk, on_tape) {
            (true, true) => Self::DiskAndTape,
            (true, false) => Self::Disk,
            (false, true) => Self::Tape,
            (false, false) => Self::Lost,
        }
    }

    /// The externally visible form: `Lost` becomes `Unavailable`.
    #[must_use]
    pub const fn externalize(self) -> Self {
        match self {
            Self::Lost => Self::Unavailable,
            other => other,
        }
    }

    /// True for the two localities that make a file eligible for take-over
    /// (on tape with no live disk copy).
    #[must_use]
    pub const fn is_take_over_eligible(self) -> bool {
        matches!(self, Self::Tape | Self::Lost)
    }
}

impl Default for Locality {
    fn default() -> Self {
        Self::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_disk_and_tape() {
        assert_eq!(Locality::from_probe_facts(true, true), Locality::DiskAndTape);
    }

    #[test]
    fn derives_lost_when_neither() {
        assert_eq!(Locality::from_probe_facts(false, false), Locality::Lost);
    }

    #[test]
    fn lost_externalizes_to_unavailable() {
        assert_eq!(Locality::Lost.externalize(), Locality::Unavailable);
        assert_eq!(Locality::Disk.externalize(), Locality::Disk);
    }

    #[test]
    fn wire_format_is_snake_case() {
        assert_eq!(serde_json::to_string(&Locality::DiskAndTape).unwrap(), "\"disk_and_tape\"");
        assert_eq!(serde_json::to_string(&Locality::Unavailable).unwrap(), "\"unavailable\"");
    }

    #[test]
    fn take_over_eligibility() {
        assert!(Locality::Tape.is_take_over_eligible());
        assert!(Locality::Lost.is_take_over_eligible());
        assert!(!Locality::Disk.is_take_over_eligible());
    }
}
