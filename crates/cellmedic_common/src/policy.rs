//! Learning / policy store.
//!
//! Cumulative success counts per (fault type, action type). Shared by every
//! healing resource; `record` and `success_rate` go through one lock so
//! concurrent updates are never lost. Records are never decayed or removed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

use crate::fault::{ActionType, FaultType};

/// Verified result of one healing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Counters for one (fault type, action type) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub attempts: u64,
    pub successes: u64,
}

impl PolicyRecord {
    pub fn rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            None
        } else {
            Some(self.successes as f64 / self.attempts as f64)
        }
    }
}

/// Learned knowledge entry, for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub fault_type: FaultType,
    pub action_type: ActionType,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
}

/// Process-wide success-rate table
#[derive(Debug)]
pub struct PolicyStore {
    records: Mutex<BTreeMap<(FaultType, ActionType), PolicyRecord>>,
    neutral_prior: f64,
}

impl PolicyStore {
    pub fn new(neutral_prior: f64) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            neutral_prior,
        }
    }

    pub fn neutral_prior(&self) -> f64 {
        self.neutral_prior
    }

    /// Count one verified outcome
    pub fn record(&self, fault_type: FaultType, action_type: ActionType, outcome: Outcome) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let entry = records.entry((fault_type, action_type)).or_default();
        entry.attempts += 1;
        if outcome == Outcome::Success {
            entry.successes += 1;
        }
        debug!(
            "policy {}/{}: {}/{} after {:?}",
            fault_type, action_type, entry.successes, entry.attempts, outcome
        );
    }

    /// successes / attempts, or the neutral prior with no history
    pub fn success_rate(&self, fault_type: FaultType, action_type: ActionType) -> f64 {
        self.get(fault_type, action_type)
            .rate()
            .unwrap_or(self.neutral_prior)
    }

    pub fn get(&self, fault_type: FaultType, action_type: ActionType) -> PolicyRecord {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(&(fault_type, action_type))
            .copied()
            .unwrap_or_default()
    }

    /// Everything learned so far, in stable order
    pub fn snapshot(&self) -> Vec<PolicyEntry> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .map(|(&(fault_type, action_type), rec)| PolicyEntry {
                fault_type,
                action_type,
                attempts: rec.attempts,
                successes: rec.successes,
                success_rate: rec.rate().unwrap_or(self.neutral_prior),
            })
            .collect()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(0.5)
    }
}
