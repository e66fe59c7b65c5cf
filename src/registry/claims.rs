//! One-active-job-per-knowledge-base bookkeeping.

use crate::error::{Error, JobError, Result};
use crate::types::{BaseId, JobId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// A create is in flight (dispatcher submit, record insert)
    Reserved,
    /// This job holds the slot until it turns terminal
    Job(JobId),
}

/// Active-slot table shared by the registry and outstanding reservations
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveClaims {
    inner: Arc<Mutex<HashMap<BaseId, Claim>>>,
}

impl ActiveClaims {
    /// Take the active slot for `base_id`, or fail with `Conflict`
    pub(crate) fn reserve(&self, base_id: &BaseId) -> Result<BaseReservation> {
        let mut claims = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(claim) = claims.get(base_id) {
            let active_job_id = match claim {
                Claim::Job(id) => Some(*id),
                Claim::Reserved => None,
            };
            return Err(Error::Job(JobError::Conflict {
                base_id: base_id.clone(),
                active_job_id,
            }));
        }

        claims.insert(base_id.clone(), Claim::Reserved);
        Ok(BaseReservation {
            base_id: base_id.clone(),
            claims: self.clone(),
            committed: false,
        })
    }

    /// Give the slot to `job_id` directly (used when restoring active records)
    pub(crate) fn assign(&self, base_id: &BaseId, job_id: JobId) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(base_id.clone(), Claim::Job(job_id));
    }

    /// Free the slot if `job_id` still holds it
    pub(crate) fn release(&self, base_id: &BaseId, job_id: JobId) {
        let mut claims = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if claims.get(base_id) == Some(&Claim::Job(job_id)) {
            claims.remove(base_id);
        }
    }

    /// The job holding the slot, if one has been recorded
    pub(crate) fn active_job(&self, base_id: &BaseId) -> Option<JobId> {
        match self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(base_id)
        {
            Some(Claim::Job(id)) => Some(*id),
            _ => None,
        }
    }

    fn drop_reservation(&self, base_id: &BaseId) {
        let mut claims = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if claims.get(base_id) == Some(&Claim::Reserved) {
            claims.remove(base_id);
        }
    }
}

/// Exclusive right to create the next active job for a knowledge base
///
/// Dropping an uncommitted reservation frees the slot again.
#[derive(Debug)]
pub struct BaseReservation {
    base_id: BaseId,
    claims: ActiveClaims,
    committed: bool,
}

impl BaseReservation {
    /// Knowledge base this reservation is for
    pub fn base_id(&self) -> &BaseId {
        &self.base_id
    }

    /// Hand the slot to the job that was just recorded
    pub(crate) fn commit(mut self, job_id: JobId) {
        self.claims.assign(&self.base_id, job_id);
        self.committed = true;
    }
}

impl Drop for BaseReservation {
    fn drop(&mut self) {
        if !self.committed {
            self.claims.drop_reservation(&self.base_id);
        }
    }
}
