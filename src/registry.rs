//! Job registry: the in-process table of conversion jobs and their lifecycle.
//!
//! ## State machine
//!
//! ```text
//! pending ──▶ processing ──▶ done
//!                  └───────▶ error
//! ```
//!
//! `pending` is set at creation, before a worker picks the job up.
//! `processing` is entered when the worker begins engine invocation. `done`
//! and `error` are terminal; a terminal job never mutates again. There is no
//! cancelled state — a client that stops polling does not stop the worker.
//!
//! ## Concurrency
//!
//! Writes to a given job come from exactly one worker task (single-writer per
//! job); reads come from many request handlers. A `std::sync::RwLock` around
//! the map with short critical sections is enough: readers always get a
//! cloned, consistent snapshot and never observe a half-applied transition.
//!
//! The registry is an explicit, dependency-injected component — construct one
//! per test, share one per process via `Arc`. No ambient globals.

use crate::cache::Fingerprint;
use crate::error::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use uuid::Uuid;

/// Opaque unique handle for one conversion job.
///
/// Used as the public URL path segment and as the storage directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh id. Collisions across concurrent creations are not a
    /// practical concern with v4 UUIDs.
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether `self -> next` is a legal single step of the state machine.
    fn can_step_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One conversion attempt, as seen by pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    /// Document title, populated once known — possibly before conversion
    /// finishes (metadata extraction is cheap).
    pub title: Option<String>,
    /// Populated only in the `error` state.
    pub error_message: Option<String>,
    /// Cache key this job is filed under.
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    /// Set when the job reaches a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// In-memory table of job records.
///
/// Volatile by design: the durable truth for completed conversions is the
/// storage directory plus the cache index, both of which survive restarts.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job in `pending` state and return its id.
    ///
    /// Safe to call concurrently; ids never collide.
    pub fn create(&self, fingerprint: Fingerprint) -> JobId {
        let id = JobId::new();
        let record = JobRecord {
            id,
            status: JobStatus::Pending,
            title: None,
            error_message: None,
            fingerprint,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs
            .write()
            .expect("job registry lock poisoned")
            .insert(id, record);
        id
    }

    /// Snapshot read of a job record.
    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs
            .read()
            .expect("job registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Move a job exactly one step forward in the state machine.
    ///
    /// `title` and `error_message` are applied atomically with the status so
    /// readers never see a torn record (e.g. `done` without its title).
    /// An illegal step — including any mutation of a terminal job — is a
    /// programming error and is rejected, not silently applied.
    pub fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        title: Option<String>,
        error_message: Option<String>,
    ) -> Result<JobRecord, ServiceError> {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        let record = jobs
            .get_mut(&id)
            .ok_or(ServiceError::JobNotFound { id })?;

        if !record.status.can_step_to(next) {
            return Err(ServiceError::InvalidTransition {
                id,
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        if let Some(t) = title {
            record.title = Some(t);
        }
        if next == JobStatus::Error {
            record.error_message = error_message;
        }
        if next.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
        Ok(record.clone())
    }

    /// Set the title early, before the job completes.
    ///
    /// Pure UX improvement: pollers see the title while conversion is still
    /// running. Rejected on terminal jobs like any other mutation.
    pub fn set_title(&self, id: JobId, title: impl Into<String>) -> Result<(), ServiceError> {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        let record = jobs
            .get_mut(&id)
            .ok_or(ServiceError::JobNotFound { id })?;
        if record.status.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                id,
                from: record.status,
                to: record.status,
            });
        }
        record.title = Some(title.into());
        Ok(())
    }

    /// Number of registered jobs (all states).
    pub fn len(&self) -> usize {
        self.jobs.read().expect("job registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;

    fn fp() -> Fingerprint {
        Fingerprint::from_content(b"test document")
    }

    #[test]
    fn create_starts_pending() {
        let registry = JobRegistry::new();
        let id = registry.create(fp());
        let record = registry.get(id).expect("job should exist");
        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.title.is_none());
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let registry = JobRegistry::new();
        let a = registry.create(fp());
        let b = registry.create(fp());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn happy_path_transitions() {
        let registry = JobRegistry::new();
        let id = registry.create(fp());

        registry
            .transition(id, JobStatus::Processing, None, None)
            .unwrap();
        let record = registry
            .transition(id, JobStatus::Done, Some("Paper".into()), None)
            .unwrap();

        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.title.as_deref(), Some("Paper"));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn error_path_records_message() {
        let registry = JobRegistry::new();
        let id = registry.create(fp());
        registry
            .transition(id, JobStatus::Processing, None, None)
            .unwrap();
        let record = registry
            .transition(id, JobStatus::Error, None, Some("engine exploded".into()))
            .unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("engine exploded"));
    }

    #[test]
    fn skipping_processing_is_rejected() {
        let registry = JobRegistry::new();
        let id = registry.create(fp());
        let err = registry
            .transition(id, JobStatus::Done, None, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_jobs_never_mutate() {
        let registry = JobRegistry::new();
        let id = registry.create(fp());
        registry
            .transition(id, JobStatus::Processing, None, None)
            .unwrap();
        registry.transition(id, JobStatus::Done, None, None).unwrap();

        assert!(registry
            .transition(id, JobStatus::Error, None, None)
            .is_err());
        assert!(registry.set_title(id, "too late").is_err());
        // Record is untouched
        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert!(record.title.is_none());
    }

    #[test]
    fn set_title_before_completion() {
        let registry = JobRegistry::new();
        let id = registry.create(fp());
        registry
            .transition(id, JobStatus::Processing, None, None)
            .unwrap();
        registry.set_title(id, "Early Title").unwrap();
        assert_eq!(
            registry.get(id).unwrap().title.as_deref(),
            Some("Early Title")
        );
    }

    #[test]
    fn unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        assert!(registry.get(JobId::new()).is_none());
        let err = registry
            .transition(JobId::new(), JobStatus::Processing, None, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::JobNotFound { .. }));
    }

    #[test]
    fn job_id_round_trips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_serialises_as_a_plain_uuid_string() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
