//! Diff engine: classify each observed account against the active set.
//!
//! | Observed | In active set | Result |
//! |----------|---------------|--------|
//! | disconnected | no | new episode (notified) |
//! | disconnected | yes, same type | still active (not notified) |
//! | disconnected | yes, other type | old resolved + new episode (notified) |
//! | connected | yes | resolved |
//! | connected | no | nothing |
//!
//! Active episodes for accounts missing from the current fetch are left
//! open and reported as unobserved.
//!
//! The engine is pure: it reads nothing but its inputs and writes nothing.

use chrono::Duration;
use std::collections::{HashMap, HashSet};

use crate::models::{Account, CheckRun, DisconnectionEvent, RunSummary, TypeCounts};

/// Output of one diff. The three event lists are disjoint by episode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub new_events: Vec<DisconnectionEvent>,
    pub resolved_events: Vec<DisconnectionEvent>,
    pub still_active: Vec<DisconnectionEvent>,
    /// Accounts with an open episode that the fetch did not return.
    pub unobserved: Vec<i64>,
    pub total_accounts: usize,
}

impl DiffResult {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total_accounts: self.total_accounts,
            new_count: self.new_events.len(),
            resolved_count: self.resolved_events.len(),
            still_active_count: self.still_active.len(),
            unobserved_count: self.unobserved.len(),
            by_type: TypeCounts::from_events(&self.new_events),
        }
    }
}

pub fn diff(
    current: &[Account],
    active: &HashMap<i64, DisconnectionEvent>,
    run: &CheckRun,
) -> DiffResult {
    let mut result = DiffResult {
        total_accounts: current.len(),
        ..Default::default()
    };
    let mut seen: HashSet<i64> = HashSet::with_capacity(current.len());

    for account in current {
        if !seen.insert(account.account_id) {
            continue;
        }

        let prior = active.get(&account.account_id);
        match (account.disconnection_type(), prior) {
            (Some(_), None) => {
                result.new_events.extend(DisconnectionEvent::open(account, run));
            }
            (Some(kind), Some(open)) if kind == open.disconnection_type => {
                result.still_active.push(open.clone());
            }
            (Some(_), Some(open)) => {
                // A type change closes the old episode and starts a new one.
                // The new episode must sort after the old one even when both
                // fall in the same second.
                result.resolved_events.push(open.resolve(run));
                result.new_events.extend(DisconnectionEvent::open(account, run).map(|mut e| {
                    e.detected_at = e.detected_at.max(open.detected_at + Duration::seconds(1));
                    e
                }));
            }
            (None, Some(open)) => {
                result.resolved_events.push(open.resolve(run));
            }
            (None, None) => {}
        }
    }

    let mut unobserved: Vec<i64> = active
        .keys()
        .filter(|id| !seen.contains(*id))
        .copied()
        .collect();
    unobserved.sort_unstable();
    result.unobserved = unobserved;

    result
}
