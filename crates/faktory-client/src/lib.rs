//! Client library for the Faktory Work Protocol: connection state machine,
//! HELLO handshake, data model, and the Producer façade.
//!
//! The Consumer runtime that uses this crate to fetch and execute jobs
//! lives in `faktory-worker`.

mod client;
mod connection;
mod error;
mod model;
mod producer;

pub use client::{Client, ClientConfig, ConnectedClient, Role, State};
pub use connection::Connection;
pub use error::{FaktoryError, ProtocolError, ValidationError};
pub use model::{Batch, Cmd, Job, JobBuilder, JobFilter, MutateOperation, Target, TargetJob};
pub use producer::Producer;
