//! Write transactions.
//!
//! FlexSync databases have a single writer:
//! - **Atomicity**: all changes of a transaction commit together or not at all
//! - **Isolation**: readers hold frozen snapshots and never see pending writes
//! - **Durability**: a commit returns after its record is synced

mod state;
mod write;

pub use state::TransactionState;
pub use write::WriteTransaction;
