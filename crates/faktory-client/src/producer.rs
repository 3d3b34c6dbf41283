//! Thin typed façade over PUSH / PUSHB / BATCH / MUTATE, mirroring the
//! verb-per-function shape of a hand-written backend client.

use std::collections::HashMap;

use crate::client::{Client, Role};
use crate::error::{FaktoryError, ValidationError};
use crate::model::{Batch, Job, MutateOperation};

/// A job-submitting view over a [`Client`]. Construction fails if the
/// client's role is `consumer`.
pub struct Producer<'a> {
    client: &'a Client,
}

impl<'a> Producer<'a> {
    pub fn new(client: &'a Client) -> Result<Self, ValidationError> {
        if client.role() == Role::Consumer {
            return Err(ValidationError::InvalidRole("consumer".to_string()));
        }
        Ok(Self { client })
    }

    pub async fn push(&self, job: &Job) -> Result<bool, FaktoryError> {
        self.client.push(job).await
    }

    pub async fn push_bulk(&self, jobs: &[Job]) -> Result<HashMap<String, String>, FaktoryError> {
        self.client.push_bulk(jobs).await
    }

    pub async fn batch_new(&self, batch: &Batch) -> Result<String, FaktoryError> {
        self.client.batch_new(batch).await
    }

    pub async fn batch_open(&self, bid: &str) -> Result<(), FaktoryError> {
        self.client.batch_open(bid).await
    }

    pub async fn batch_commit(&self, bid: &str) -> Result<(), FaktoryError> {
        self.client.batch_commit(bid).await
    }

    pub async fn mutate(&self, op: &MutateOperation) -> Result<(), FaktoryError> {
        self.client.mutate(op).await
    }
}
