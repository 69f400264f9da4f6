//! Domain primitives shared by the parser, the catalog and the download loop.

pub mod events;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A streaming service the tool can talk to.
///
/// Serialized as the identifier the tool expects after `--service`, which is
/// also the namespace key of the catalog document.
///
/// # Examples
///
/// ```rust
/// use mdnx_autodl::domain::ServiceKind;
///
/// assert_eq!(ServiceKind::Crunchyroll.cli_name(), "crunchy");
/// assert_eq!("hidive".parse::<ServiceKind>().unwrap(), ServiceKind::Hidive);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "crunchy")]
    Crunchyroll,
    #[serde(rename = "hidive")]
    Hidive,
}

impl ServiceKind {
    pub const ALL: [Self; 2] = [Self::Crunchyroll, Self::Hidive];

    #[must_use]
    pub const fn cli_name(self) -> &'static str {
        match self {
            Self::Crunchyroll => "crunchy",
            Self::Hidive => "hidive",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Crunchyroll => "Crunchyroll",
            Self::Hidive => "HiDive",
        }
    }

    /// Series listed by the startup self-test when none is configured.
    #[must_use]
    pub const fn default_test_series(self) -> &'static str {
        match self {
            Self::Crunchyroll => "GMEHME81V",
            Self::Hidive => "1244",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crunchy" | "crunchyroll" | "cr" => Ok(Self::Crunchyroll),
            "hidive" | "hd" => Ok(Self::Hidive),
            other => Err(format!("Unknown service: {other}")),
        }
    }
}

/// Catalog key of the `number`-th season of a series (`S1`, `S2`, ...).
#[must_use]
pub fn season_key(number: u32) -> String {
    format!("S{number}")
}

/// Catalog key of the `number`-th episode of a season (`E1`, `E2`, ...).
#[must_use]
pub fn episode_key(number: u32) -> String {
    format!("E{number}")
}

/// Numeric part of a `S<n>`/`E<n>` key.
#[must_use]
pub fn key_index(key: &str) -> Option<u32> {
    key.get(1..)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_kind_roundtrip_names() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.cli_name().parse::<ServiceKind>().unwrap(), kind);
        }
        assert!("netflix".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_service_kind_serializes_as_cli_name() {
        let json = serde_json::to_string(&ServiceKind::Crunchyroll).unwrap();
        assert_eq!(json, "\"crunchy\"");
    }

    #[test]
    fn test_keys() {
        assert_eq!(season_key(3), "S3");
        assert_eq!(episode_key(12), "E12");
        assert_eq!(key_index("E12"), Some(12));
        assert_eq!(key_index("X"), None);
    }
}
