//! # FlexSync Sync Protocol
//!
//! Event vocabulary shared by sync sessions and the FlexSync client.
//!
//! This crate provides:
//! - Error categories and codes, including which ones demand a client reset
//! - `ProtocolError` with its canonical message format
//! - `SessionEvent` (progress, subscription acknowledgements, errors,
//!   connection changes) and its CBOR frame codec
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codes;
mod error;
mod events;

pub use codes::{ErrorCategory, SyncErrorCode};
pub use error::{CodecError, CodecResult};
pub use events::{
    AckState, ConnectionState, ProgressDirection, ProgressReport, ProtocolError, SessionEvent,
    SubscriptionAck,
};
