use std::fmt;

/// Reference into the perception session's coordinate frame.
///
/// Only meaningful for the session that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoseHandle(pub u64);

impl fmt::Display for PoseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pose#{}", self.0)
    }
}

/// An anchor as this device knows it.
///
/// Built in memory when the user marks a point, filled in while the save is
/// in flight, and frozen once the cloud service assigns `id`. Records do not
/// outlive the perception session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    /// Assigned by the cloud service; `None` until saved.
    pub id: Option<String>,
    pub grouping_key: String,
    pub note: String,
    pub local_pose: Option<PoseHandle>,
}

impl AnchorRecord {
    pub(crate) fn draft(grouping_key: &str, pose: PoseHandle) -> Self {
        Self {
            id: None,
            grouping_key: grouping_key.to_string(),
            note: String::new(),
            local_pose: Some(pose),
        }
    }
}
