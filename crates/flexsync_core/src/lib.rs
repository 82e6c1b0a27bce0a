//! # FlexSync Core
//!
//! Local object database used by the FlexSync client.
//!
//! This crate provides:
//! - Typed objects keyed by `(object_type, primary_key)`
//! - A small predicate language with canonical query text
//! - Frozen, versioned snapshots for readers
//! - A single-writer transaction with commit and rollback
//! - A metadata area where the sync engine keeps its durable state
//!
//! Every commit is persisted as one CBOR record on a
//! [`flexsync_storage::RecordLog`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod config;
mod database;
mod error;
mod object;
mod query;
mod schema;
mod snapshot;
mod transaction;

pub use cbor::{from_cbor, to_cbor};
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use object::{Object, ObjectKey, ObjectSet, Value};
pub use query::Query;
pub use schema::Schema;
pub use snapshot::Snapshot;
pub use transaction::{TransactionState, WriteTransaction};
