//! Per-channel record of joined groups and replay after reconnect.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::RealtimeError;
use crate::protocol::Group;

/// Ordered, de-duplicated set of groups joined on one channel.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    groups: Mutex<Vec<Group>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, Vec<Group>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a joined group. Returns false if it was already recorded.
    pub fn record(&self, group: Group) -> bool {
        let mut groups = self.groups();
        if groups.contains(&group) {
            return false;
        }
        groups.push(group);
        true
    }

    /// Remove a group. Returns false if it was not recorded.
    pub fn remove(&self, group: &Group) -> bool {
        let mut groups = self.groups();
        let before = groups.len();
        groups.retain(|g| g != group);
        groups.len() != before
    }

    pub fn contains(&self, group: &Group) -> bool {
        self.groups().contains(group)
    }

    /// Groups in the order they were joined.
    pub fn snapshot(&self) -> Vec<Group> {
        self.groups().clone()
    }

    pub fn len(&self) -> usize {
        self.groups().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups().is_empty()
    }

    pub fn clear(&self) {
        self.groups().clear();
    }
}

/// Result of re-issuing joins after a reconnect.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub attempted: usize,
    pub failed: Vec<(Group, RealtimeError)>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed.len()
    }
}

/// Re-join every group in order. Each join is attempted independently; a
/// failure is recorded and the remaining groups are still joined.
pub async fn replay_groups<F, Fut>(groups: Vec<Group>, mut join: F) -> ReplayReport
where
    F: FnMut(Group) -> Fut,
    Fut: Future<Output = Result<(), RealtimeError>>,
{
    let mut report = ReplayReport::default();
    for group in groups {
        report.attempted += 1;
        if let Err(e) = join(group.clone()).await {
            report.failed.push((group, e));
        }
    }
    report
}
