//! Client reset handling.
//!
//! When the server reports an error that requires a client reset the
//! [`ClientResetCoordinator`] pauses the session and applies the configured
//! [`ClientResetStrategy`]:
//!
//! ```text
//! Idle -> Detected -> BeforeCallback -> Recovery -> AfterCallback -> Resumed
//!            \              \               \             \
//!             +--------------+---------------+-------------+--> ErrorReported
//! ```
//!
//! The manual strategy and the automatic-recovery-failure error go straight
//! from `Detected` to `ErrorReported`.

mod coordinator;
mod required;
mod strategy;

pub use coordinator::{ClientResetCoordinator, ClientResetState};
pub use required::{ClientResetRequiredError, RECOVERY_DIR};
pub use strategy::{AfterResetCallback, BeforeResetCallback, ClientResetStrategy, ResetErrorCallback};
