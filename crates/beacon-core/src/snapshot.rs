//! Persisted form of the delivery queue.
//!
//! The snapshot is an internal format: versioned JSON holding the ordered,
//! not-yet-confirmed jobs of each lane. It must round-trip losslessly so a
//! restarted process resumes with the same unacknowledged set.

use serde::{Deserialize, Serialize};

use crate::{
    error::{CoreError, Result},
    models::{Job, JobKind},
};

/// Ordered, unconfirmed jobs of both lanes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Format version.
    pub version: u32,
    /// Visit record jobs in dispatch order.
    #[serde(default)]
    pub visitor: Vec<Job>,
    /// Tracking event jobs in dispatch order.
    #[serde(default)]
    pub tracking: Vec<Job>,
}

impl QueueSnapshot {
    /// Format version written by this build.
    pub const VERSION: u32 = 1;

    /// Creates a snapshot of the given lanes.
    pub fn new(visitor: Vec<Job>, tracking: Vec<Job>) -> Self {
        Self { version: Self::VERSION, visitor, tracking }
    }

    /// Jobs of one lane.
    pub fn lane(&self, kind: JobKind) -> &[Job] {
        match kind {
            JobKind::Visitor => &self.visitor,
            JobKind::Tracking => &self.tracking,
        }
    }

    /// Total number of jobs across both lanes.
    pub fn len(&self) -> usize {
        self.visitor.len() + self.tracking.len()
    }

    /// Whether both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.visitor.is_empty() && self.tracking.is_empty()
    }

    /// Serializes the snapshot for the persistence adapter.
    ///
    /// # Errors
    ///
    /// Returns error if a payload holds a value JSON cannot represent.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a persisted snapshot.
    ///
    /// Jobs filed under the wrong lane are moved to their own lane so a
    /// hand-edited or corrupted snapshot cannot cross the lanes.
    ///
    /// # Errors
    ///
    /// Returns error if the blob is not a snapshot or carries an unknown
    /// version.
    pub fn decode(blob: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(blob)?;
        if snapshot.version != Self::VERSION {
            return Err(CoreError::UnsupportedSnapshotVersion {
                found: snapshot.version,
                expected: Self::VERSION,
            });
        }

        let (mut visitor, mut tracking) = (Vec::new(), Vec::new());
        for job in snapshot.visitor.into_iter().chain(snapshot.tracking) {
            match job.kind() {
                JobKind::Visitor => visitor.push(job),
                JobKind::Tracking => tracking.push(job),
            }
        }
        Ok(Self::new(visitor, tracking))
    }
}
