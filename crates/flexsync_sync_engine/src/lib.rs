//! # FlexSync Sync Engine
//!
//! Client side of Flexible Sync for a FlexSync database.
//!
//! This crate provides:
//! - The subscription set manager (versioned query sets, server
//!   acknowledgements, waiting for synchronization)
//! - Upload and download progress streams
//! - Client reset coordination (discard unsynced changes or manual recovery)
//! - The session boundary trait and an in-process mock session
//! - `SyncClient`, which wires a session to all of the above
//!
//! ## Architecture
//!
//! A session delivers [`SessionEvent`](flexsync_sync_protocol::SessionEvent)s
//! over a channel. The client's dispatch task routes each one:
//! 1. Progress reports go to the progress tracker
//! 2. Subscription acknowledgements go to the subscription manager
//! 3. Errors that demand a client reset go to the reset coordinator, then
//!    every error goes to the configured error handler
//!
//! ## Key Invariants
//!
//! - Subscription set versions only grow; observers never see one regress
//! - Subscription commits and client reset recovery never interleave
//! - Failed updates and failed resets leave the previous valid state in place
//! - Sync waits are refused on the thread holding the write transaction

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
pub mod client_reset;
mod config;
mod error;
mod progress;
mod session;
pub mod subscription;

pub use client::{SubscribeOptions, SyncClient, WaitForSync};
pub use client_reset::{
    ClientResetCoordinator, ClientResetRequiredError, ClientResetState, ClientResetStrategy,
};
pub use config::{
    ErrorHandler, InitialRemoteData, InitialSubscriptions, InitialSubscriptionsCallback,
    SyncConfig, SyncMode,
};
pub use error::{CallbackError, ErrorKind, SyncError, SyncResult};
pub use progress::{Progress, ProgressMode, ProgressStream, ProgressStreamExt, ProgressTracker};
pub use session::{MockSession, SessionState, SyncSessionFacade};
pub use subscription::{
    MutableSubscriptionSet, Subscription, SubscriptionSet, SubscriptionSetManager,
    SubscriptionSetState,
};
