use std::collections::BTreeMap;

use shared::{
    domain::{QuizId, SubmissionId, SubmissionStatus, UnitKey},
    protocol::ActiveSubmission,
};
use thiserror::Error;

/// A unit already has a submission in flight; no network call was made.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("a submission for this question is already being checked")]
pub struct AlreadyPending;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub unit: UnitKey,
    /// None until the server echoes an id on the submit path.
    pub submission_id: Option<SubmissionId>,
    pub status: SubmissionStatus,
    pub is_correct: Option<bool>,
    pub error_log: Option<String>,
}

impl SubmissionRecord {
    fn optimistic(unit: UnitKey) -> Self {
        Self {
            unit,
            submission_id: None,
            status: SubmissionStatus::Pending,
            is_correct: None,
            error_log: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Admission control for submissions. At most one record per unit is
/// in flight at any instant; the existence of that record is the lock.
/// Resolved records are retained as history until the unit is
/// resubmitted.
#[derive(Debug, Default)]
pub struct SubmissionRegistry {
    records: BTreeMap<UnitKey, SubmissionRecord>,
}

impl SubmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the optimistic Pending record before any network call.
    /// Must be called with the registry lock held across no await
    /// point, which is what makes concurrent submits for one unit
    /// collapse to a single winner.
    pub fn begin(&mut self, unit: UnitKey) -> Result<(), AlreadyPending> {
        if self.records.get(&unit).is_some_and(SubmissionRecord::in_flight) {
            return Err(AlreadyPending);
        }
        self.records.insert(unit, SubmissionRecord::optimistic(unit));
        Ok(())
    }

    /// Records the server-echoed id for an in-flight unit.
    pub fn assign_submission_id(&mut self, unit: UnitKey, id: SubmissionId) {
        if let Some(record) = self.records.get_mut(&unit) {
            if record.in_flight() {
                record.submission_id = Some(id);
            }
        }
    }

    /// Removes the optimistic record after a rejected or failed submit,
    /// making the unit resubmittable immediately. A record that already
    /// resolved while the request was outstanding is left untouched.
    pub fn rollback(&mut self, unit: UnitKey) {
        if self.records.get(&unit).is_some_and(SubmissionRecord::in_flight) {
            self.records.remove(&unit);
        }
    }

    /// Moves an in-flight record to a terminal state. Idempotent:
    /// resolving an absent or already-terminal record is a no-op.
    /// Returns whether the registry changed.
    pub fn resolve(
        &mut self,
        unit: UnitKey,
        status: SubmissionStatus,
        is_correct: Option<bool>,
        error_log: Option<String>,
    ) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let Some(record) = self.records.get_mut(&unit) else {
            return false;
        };
        if !record.in_flight() {
            return false;
        }
        record.status = status;
        record.is_correct = is_correct;
        record.error_log = error_log;
        true
    }

    /// Merges the server's in-flight snapshot after a (re)connect. The
    /// server is the authority on what is still running, so entries are
    /// marked in flight with their server ids; nothing is resubmitted.
    pub fn hydrate(&mut self, quiz_id: QuizId, submissions: &[ActiveSubmission]) {
        for sub in submissions {
            let unit = UnitKey::new(quiz_id, sub.question_id);
            self.records.insert(
                unit,
                SubmissionRecord {
                    unit,
                    submission_id: Some(sub.id),
                    status: sub.status,
                    is_correct: None,
                    error_log: None,
                },
            );
        }
    }

    /// Units with an in-flight submission; gates `finish`.
    pub fn pending_units(&self) -> Vec<UnitKey> {
        self.records
            .values()
            .filter(|r| r.in_flight())
            .map(|r| r.unit)
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.records.values().any(SubmissionRecord::in_flight)
    }

    /// (unit, submission id) pairs the degraded-mode poll loop queries.
    pub fn pollable(&self) -> Vec<(UnitKey, SubmissionId)> {
        self.records
            .values()
            .filter(|r| r.in_flight())
            .filter_map(|r| r.submission_id.map(|id| (r.unit, id)))
            .collect()
    }

    pub fn record(&self, unit: UnitKey) -> Option<&SubmissionRecord> {
        self.records.get(&unit)
    }

    pub fn records(&self) -> impl Iterator<Item = &SubmissionRecord> {
        self.records.values()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
