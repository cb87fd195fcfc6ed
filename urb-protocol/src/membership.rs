//! Static process membership
//!
//! The set of processes is fixed for the lifetime of a run. Every layer above
//! the link needs to know who the peers are and how big a majority is.

use crate::message::ProcessId;
use std::collections::BTreeSet;
use thiserror::Error;

/// Membership construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Process id 0 is reserved")]
    ReservedId,

    #[error("Local process {0} is not a member")]
    LocalNotMember(ProcessId),
}

/// The fixed set of processes taking part in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    local: ProcessId,
    processes: BTreeSet<ProcessId>,
}

impl Membership {
    /// Create a membership from the local id and every process id (local included)
    pub fn new(
        local: ProcessId,
        processes: impl IntoIterator<Item = ProcessId>,
    ) -> Result<Self, MembershipError> {
        let processes: BTreeSet<ProcessId> = processes.into_iter().collect();

        if processes.contains(&0) || local == 0 {
            return Err(MembershipError::ReservedId);
        }
        if !processes.contains(&local) {
            return Err(MembershipError::LocalNotMember(local));
        }

        Ok(Membership { local, processes })
    }

    /// Membership of processes `1..=count`
    pub fn range(local: ProcessId, count: u32) -> Result<Self, MembershipError> {
        Self::new(local, 1..=count)
    }

    /// Id of the local process
    #[inline]
    pub fn local(&self) -> ProcessId {
        self.local
    }

    /// Total number of processes (N)
    #[inline]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Always false; a membership contains at least the local process
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Check if `id` is a member
    pub fn contains(&self, id: ProcessId) -> bool {
        self.processes.contains(&id)
    }

    /// All process ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.iter().copied()
    }

    /// Every process except the local one
    pub fn others(&self) -> impl Iterator<Item = ProcessId> + '_ {
        let local = self.local;
        self.iter().filter(move |&id| id != local)
    }

    /// Whether `count` acknowledgments form a strict majority (`count > N/2`)
    #[inline]
    pub fn has_quorum(&self, count: usize) -> bool {
        count > self.len() / 2
    }
}
