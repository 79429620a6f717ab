//! How a container is torn down when it is disposed.

/// Teardown chosen at dispose time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPolicy {
    /// A reaper removes the container later; dispose only stops it.
    ReaperSupervised,
    /// Nothing else will remove the container; dispose removes it.
    SelfManaged,
}

impl TeardownPolicy {
    /// Pick the policy for a container.
    ///
    /// `reaper_observes` is whether a reaper is enabled and the engine can
    /// host it. A missing, empty or nil-UUID session label marks a container
    /// outside any session (the reaper's own, for instance); those are only
    /// stopped.
    pub fn select(reaper_observes: bool, session_label: Option<&str>) -> Self {
        if reaper_observes {
            return Self::ReaperSupervised;
        }

        match session_label.map(str::trim) {
            Some(label) if !label.is_empty() && !is_nil_uuid(label) => Self::SelfManaged,
            _ => Self::ReaperSupervised,
        }
    }

    pub fn removes(&self) -> bool {
        matches!(self, Self::SelfManaged)
    }
}

fn is_nil_uuid(label: &str) -> bool {
    uuid::Uuid::parse_str(label).is_ok_and(|id| id.is_nil())
}
