//! Shared domain types for reconciliation and dispatch.

use serde::{Deserialize, Serialize};

/// One buildable unit extracted from the catalog.
///
/// Projected from a tour document and one of its embedded scenes at
/// read time; never persisted by this system. The same scene may appear
/// more than once when historical data duplicates it across tours --
/// the match set tolerates that rather than deduplicating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReference {
    /// Owning tour document id.
    pub tour_id: String,
    /// Owning scene id within the tour.
    pub scene_id: String,
    /// Human-readable scene (or tour) name.
    pub name: String,
    /// Storage key as recorded in the catalog, e.g. `image/foo.jpg`.
    ///
    /// Already resolved through the single legacy/current field accessor
    /// at the catalog boundary.
    pub storage_key: String,
    /// Optional narration audio key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_key: Option<String>,
    /// Optional thumbnail key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
}

/// Remote instance lifecycle states this system reads and waits on.
///
/// The remote backend is authoritative; a state is never cached beyond
/// the dispatch attempt that observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    /// Any state this system does not transition on (e.g. terminated).
    Other(String),
}

impl InstanceState {
    /// Parse a backend state name. Unknown names land in [`Self::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_state_known_names() {
        assert_eq!(InstanceState::from_name("pending"), InstanceState::Pending);
        assert_eq!(InstanceState::from_name("running"), InstanceState::Running);
        assert_eq!(InstanceState::from_name("stopping"), InstanceState::Stopping);
        assert_eq!(InstanceState::from_name("stopped"), InstanceState::Stopped);
    }

    #[test]
    fn instance_state_unknown_name() {
        assert_eq!(
            InstanceState::from_name("shutting-down"),
            InstanceState::Other("shutting-down".to_string()),
        );
    }

    #[test]
    fn asset_reference_serializes_camel_case() {
        let reference = AssetReference {
            tour_id: "t1".into(),
            scene_id: "s1".into(),
            name: "Lobby".into(),
            storage_key: "image/lobby.jpg".into(),
            audio_key: None,
            thumbnail_key: Some("thumbs/lobby.jpg".into()),
        };
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["storageKey"], "image/lobby.jpg");
        assert_eq!(json["thumbnailKey"], "thumbs/lobby.jpg");
        assert!(json.get("audioKey").is_none());
    }
}
