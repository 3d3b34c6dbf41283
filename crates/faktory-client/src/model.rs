//! Data model: [`Job`], [`TargetJob`], [`Batch`], [`JobFilter`],
//! [`MutateOperation`], `Cmd`, `Target`.
//!
//! All bounds are enforced at construction, never lazily at send time
//! (a `Job` or `MutateOperation` that exists is always valid to serialize).

use std::collections::HashMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

const DEFAULT_QUEUE: &str = "default";
const MIN_RESERVE_FOR: i64 = 60;
const DEFAULT_RESERVE_FOR: i64 = 1800;
const DEFAULT_RETRY: i64 = 25;
const DEFAULT_BACKTRACE: u32 = 5;

pub(crate) fn random_hex_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn validate_at(at: &str) -> Result<(), ValidationError> {
    if at.is_empty() {
        return Ok(());
    }
    chrono::DateTime::parse_from_rfc3339(at)
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidAt(at.to_string()))
}

/// A unit of work submitted to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    pub jid: String,
    pub jobtype: String,
    pub args: Vec<Value>,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_reserve_for")]
    pub reserve_for: i64,
    #[serde(default)]
    pub at: String,
    #[serde(default = "default_retry")]
    pub retry: i64,
    #[serde(default = "default_backtrace")]
    pub backtrace: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, Value>>,
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}
fn default_reserve_for() -> i64 {
    DEFAULT_RESERVE_FOR
}
fn default_retry() -> i64 {
    DEFAULT_RETRY
}
fn default_backtrace() -> u32 {
    DEFAULT_BACKTRACE
}

/// The shape of a FETCH reply as the server actually sends it.
///
/// The server adds fields a client never constructs (`created_at`,
/// `enqueued_at`, `failure` on a retried job, and others), so this type
/// has no `deny_unknown_fields`: anything it doesn't name is captured in
/// `extra` rather than rejected. Convert to [`Job`] with `.into()`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundJob {
    pub jid: String,
    pub jobtype: String,
    pub args: Vec<Value>,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_reserve_for")]
    pub reserve_for: i64,
    #[serde(default)]
    pub at: String,
    #[serde(default = "default_retry")]
    pub retry: i64,
    #[serde(default = "default_backtrace")]
    pub backtrace: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl From<InboundJob> for Job {
    fn from(value: InboundJob) -> Self {
        Job {
            jid: value.jid,
            jobtype: value.jobtype,
            args: value.args,
            queue: value.queue,
            reserve_for: value.reserve_for,
            at: value.at,
            retry: value.retry,
            backtrace: value.backtrace,
            custom: value.custom,
        }
    }
}

impl Job {
    /// Starts building a job of the given `jobtype` with `args`.
    pub fn builder(jobtype: impl Into<String>, args: Vec<Value>) -> JobBuilder {
        JobBuilder {
            jid: None,
            jobtype: jobtype.into(),
            args,
            queue: None,
            reserve_for: None,
            at: None,
            retry: None,
            backtrace: None,
            custom: None,
        }
    }
}

/// Builder for [`Job`]; validates every bound on [`JobBuilder::build`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    jid: Option<String>,
    jobtype: String,
    args: Vec<Value>,
    queue: Option<String>,
    reserve_for: Option<i64>,
    at: Option<String>,
    retry: Option<i64>,
    backtrace: Option<u32>,
    custom: Option<HashMap<String, Value>>,
}

impl JobBuilder {
    pub fn jid(mut self, jid: impl Into<String>) -> Self {
        self.jid = Some(jid.into());
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn reserve_for(mut self, seconds: i64) -> Self {
        self.reserve_for = Some(seconds);
        self
    }

    pub fn at(mut self, at: impl Into<String>) -> Self {
        self.at = Some(at.into());
        self
    }

    pub fn retry(mut self, retry: i64) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn backtrace(mut self, backtrace: u32) -> Self {
        self.backtrace = Some(backtrace);
        self
    }

    pub fn custom(mut self, custom: HashMap<String, Value>) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn build(self) -> Result<Job, ValidationError> {
        if self.jobtype.is_empty() {
            return Err(ValidationError::EmptyJobtype);
        }
        let queue = self.queue.unwrap_or_else(default_queue);
        if queue.is_empty() {
            return Err(ValidationError::EmptyQueue);
        }
        let reserve_for = self.reserve_for.unwrap_or(DEFAULT_RESERVE_FOR);
        if reserve_for < MIN_RESERVE_FOR {
            return Err(ValidationError::ReserveForTooSmall(reserve_for));
        }
        let retry = self.retry.unwrap_or(DEFAULT_RETRY);
        if retry < -1 {
            return Err(ValidationError::InvalidRetry(retry));
        }
        let at = self.at.unwrap_or_default();
        validate_at(&at)?;

        Ok(Job {
            jid: self.jid.unwrap_or_else(random_hex_id),
            jobtype: self.jobtype,
            args: self.args,
            queue,
            reserve_for,
            at,
            retry,
            backtrace: self.backtrace.unwrap_or(DEFAULT_BACKTRACE),
            custom: self.custom,
        })
    }
}

/// A job shape used inside [`Batch`] success/complete callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetJob {
    pub jobtype: String,
    pub args: Vec<Value>,
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl TargetJob {
    pub fn new(jobtype: impl Into<String>, args: Vec<Value>) -> Result<Self, ValidationError> {
        let jobtype = jobtype.into();
        if jobtype.is_empty() {
            return Err(ValidationError::EmptyJobtype);
        }
        Ok(Self {
            jobtype,
            args,
            queue: default_queue(),
        })
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Result<Self, ValidationError> {
        let queue = queue.into();
        if queue.is_empty() {
            return Err(ValidationError::EmptyQueue);
        }
        self.queue = queue;
        Ok(self)
    }
}

/// A grouping handle with optional success/complete callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Batch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_bid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<TargetJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<TargetJob>,
}

/// A selection predicate over `{jids, regexp, jobtype}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobtype: Option<String>,
}

/// The mutation verb of a [`MutateOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cmd {
    Clear,
    Kill,
    Discard,
    Requeue,
}

/// The job set targeted by a [`MutateOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Retries,
    Scheduled,
    Dead,
}

/// A bulk operation against one of the server's retry/scheduled/dead sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutateOperation {
    pub cmd: Cmd,
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<JobFilter>,
}

impl MutateOperation {
    pub fn new(cmd: Cmd, target: Target) -> Self {
        Self {
            cmd,
            target,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: JobFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_jid_is_32_hex_chars() {
        let job = Job::builder("adder", vec![]).build().unwrap();
        assert_eq!(job.jid.len(), 32);
        assert!(job.jid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn successive_jids_are_distinct() {
        let a = Job::builder("adder", vec![]).build().unwrap();
        let b = Job::builder("adder", vec![]).build().unwrap();
        assert_ne!(a.jid, b.jid);
    }

    #[test]
    fn job_defaults_match_spec() {
        let job = Job::builder("adder", vec![Value::from(2), Value::from(3)])
            .build()
            .unwrap();
        assert_eq!(job.queue, "default");
        assert_eq!(job.reserve_for, 1800);
        assert_eq!(job.retry, 25);
        assert_eq!(job.backtrace, 5);
        assert_eq!(job.at, "");
    }

    #[test]
    fn reserve_for_below_60_is_rejected() {
        let err = Job::builder("adder", vec![])
            .reserve_for(59)
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::ReserveForTooSmall(59));
    }

    #[test]
    fn retry_below_negative_one_is_rejected() {
        let err = Job::builder("adder", vec![]).retry(-2).build().unwrap_err();
        assert_eq!(err, ValidationError::InvalidRetry(-2));
    }

    #[test]
    fn non_rfc3339_at_is_rejected() {
        let err = Job::builder("adder", vec![])
            .at("not a timestamp")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidAt("not a timestamp".into()));
    }

    #[test]
    fn empty_at_is_accepted() {
        let job = Job::builder("adder", vec![]).build().unwrap();
        assert_eq!(job.at, "");
    }

    #[test]
    fn rfc3339_at_is_accepted() {
        let job = Job::builder("adder", vec![])
            .at("2026-07-27T00:00:00Z")
            .build()
            .unwrap();
        assert_eq!(job.at, "2026-07-27T00:00:00Z");
    }

    #[test]
    fn empty_jobtype_is_rejected() {
        let err = Job::builder("", vec![]).build().unwrap_err();
        assert_eq!(err, ValidationError::EmptyJobtype);
    }

    #[test]
    fn job_rejects_unknown_fields_on_deserialize() {
        let raw = r#"{"jid":"x","jobtype":"adder","args":[],"bogus":1}"#;
        assert!(serde_json::from_str::<Job>(raw).is_err());
    }

    #[test]
    fn inbound_job_tolerates_server_added_fields() {
        let raw = r#"{"jid":"x","jobtype":"adder","args":[],"created_at":"2026-07-27T00:00:00Z","enqueued_at":"2026-07-27T00:00:01Z","failure":{"retry_count":1}}"#;
        let inbound: InboundJob = serde_json::from_str(raw).unwrap();
        assert_eq!(inbound.jid, "x");
        assert!(inbound.extra.contains_key("created_at"));
        assert!(inbound.extra.contains_key("failure"));

        let job: Job = inbound.into();
        assert_eq!(job.jid, "x");
        assert_eq!(job.queue, "default");
    }

    #[test]
    fn mutate_operation_omits_null_filter() {
        let op = MutateOperation::new(Cmd::Kill, Target::Retries);
        let json = serde_json::to_value(&op).unwrap();
        assert!(json.get("filter").is_none());
    }

    #[test]
    fn mutate_operation_round_trips() {
        let op = MutateOperation::new(Cmd::Requeue, Target::Scheduled).with_filter(JobFilter {
            jids: Some(vec!["a".into(), "b".into()]),
            regexp: None,
            jobtype: Some("adder".into()),
        });
        let json = serde_json::to_string(&op).unwrap();
        let back: MutateOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn cmd_and_target_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Cmd::Discard).unwrap(), "\"discard\"");
        assert_eq!(serde_json::to_string(&Target::Dead).unwrap(), "\"dead\"");
    }
}
