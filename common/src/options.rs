//! Transaction options passed through to the store unmodified.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which replica set members may serve reads inside the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Read concern level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Snapshot,
    Available,
    Linearizable,
}

/// Write acknowledgment requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Acknowledgment {
    /// Acknowledged by this many nodes.
    Nodes(u32),
    /// Acknowledged by a majority of voting nodes.
    Majority,
    /// Named tag set.
    Custom(String),
}

/// Write concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcern {
    /// Acknowledgment requirement.
    pub w: Option<Acknowledgment>,
    /// Require the write to reach the on-disk journal.
    pub journal: Option<bool>,
    /// How long to wait for the acknowledgment.
    pub w_timeout: Option<Duration>,
}

impl WriteConcern {
    /// `{ w: "majority" }`.
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Majority),
            journal: None,
            w_timeout: None,
        }
    }

    /// `{ w: n }`.
    pub fn nodes(n: u32) -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(n)),
            journal: None,
            w_timeout: None,
        }
    }
}

/// Isolation and durability settings for one transactional scope.
///
/// The coordinator never inspects these; it hands them to
/// [`DocumentStore::start_scope`](crate::DocumentStore::start_scope) as given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub read_preference: Option<ReadPreference>,
    pub read_concern: Option<ReadConcernLevel>,
    pub write_concern: Option<WriteConcern>,
    /// Upper bound the server may spend on the commit.
    pub max_commit_time: Option<Duration>,
}

impl TransactionOptions {
    /// Primary reads, local read concern, majority writes.
    pub fn primary_local_majority() -> Self {
        Self {
            read_preference: Some(ReadPreference::Primary),
            read_concern: Some(ReadConcernLevel::Local),
            write_concern: Some(WriteConcern::majority()),
            max_commit_time: None,
        }
    }

    pub fn with_read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = Some(preference);
        self
    }

    pub fn with_read_concern(mut self, level: ReadConcernLevel) -> Self {
        self.read_concern = Some(level);
        self
    }

    pub fn with_write_concern(mut self, concern: WriteConcern) -> Self {
        self.write_concern = Some(concern);
        self
    }

    pub fn with_max_commit_time(mut self, duration: Duration) -> Self {
        self.max_commit_time = Some(duration);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_local_majority() {
        let options = TransactionOptions::primary_local_majority();
        assert_eq!(options.read_preference, Some(ReadPreference::Primary));
        assert_eq!(options.read_concern, Some(ReadConcernLevel::Local));
        assert_eq!(
            options.write_concern.and_then(|w| w.w),
            Some(Acknowledgment::Majority)
        );
    }

    #[test]
    fn test_builder_overrides() {
        let options = TransactionOptions::default()
            .with_read_concern(ReadConcernLevel::Snapshot)
            .with_write_concern(WriteConcern::nodes(2));
        assert_eq!(options.read_preference, None);
        assert_eq!(options.read_concern, Some(ReadConcernLevel::Snapshot));
        assert_eq!(options.write_concern, Some(WriteConcern::nodes(2)));
    }
}
