use serde::Deserialize;
use serde::Serialize;

/// Per-identifier outcome reported by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStatus {
    /// The anchor was found in the environment.
    Located,
    /// The anchor is already represented locally.
    AlreadyTracked,
    /// The cloud service has no anchor with this identifier.
    NotLocatedAnchorDoesNotExist,
    /// Not found yet; may still be reported later as scanning continues.
    NotLocated,
}

impl LocateStatus {
    /// Whether no further report for this identifier is expected.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NotLocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&LocateStatus::NotLocatedAnchorDoesNotExist).unwrap();
        assert_eq!(json, "\"not_located_anchor_does_not_exist\"");
    }

    #[test]
    fn only_not_located_is_open() {
        assert!(LocateStatus::Located.is_terminal());
        assert!(LocateStatus::AlreadyTracked.is_terminal());
        assert!(LocateStatus::NotLocatedAnchorDoesNotExist.is_terminal());
        assert!(!LocateStatus::NotLocated.is_terminal());
    }
}
