//! Error categories and codes reported by the sync server and client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Raised by the local sync client.
    Client,
    /// Connection-level protocol error; affects every session on it.
    Connection,
    /// Session-level protocol error.
    Session,
    /// Operating system error.
    System,
    /// Anything else.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Client => "Client",
            ErrorCategory::Connection => "Connection",
            ErrorCategory::Session => "Session",
            ErrorCategory::System => "System",
            ErrorCategory::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

macro_rules! sync_error_codes {
    ($($(#[$doc:meta])* $variant:ident = ($category:ident, $code:literal);)+) => {
        /// Known sync error codes.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum SyncErrorCode {
            $($(#[$doc])* $variant,)+
        }

        impl SyncErrorCode {
            /// Every known code.
            pub const ALL: &'static [SyncErrorCode] = &[$(SyncErrorCode::$variant,)+];

            /// Numeric wire value.
            #[must_use]
            pub const fn code(self) -> i32 {
                match self {
                    $(SyncErrorCode::$variant => $code,)+
                }
            }

            /// Category the code belongs to.
            #[must_use]
            pub const fn category(self) -> ErrorCategory {
                match self {
                    $(SyncErrorCode::$variant => ErrorCategory::$category,)+
                }
            }

            /// Name used in error messages.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(SyncErrorCode::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

sync_error_codes! {
    /// Automatic client reset recovery already failed.
    AutoClientResetFailure = (Client, 132);

    ConnectionClosed = (Connection, 100);
    OtherError = (Connection, 101);
    UnknownMessage = (Connection, 102);
    BadSyntax = (Connection, 103);
    LimitsExceeded = (Connection, 104);
    WrongProtocolVersion = (Connection, 105);
    BadSessionIdent = (Connection, 106);
    ReuseOfSessionIdent = (Connection, 107);
    BoundInOtherSession = (Connection, 108);
    BadMessageOrder = (Connection, 109);
    BadDecompression = (Connection, 110);
    BadChangesetHeaderSyntax = (Connection, 111);
    BadChangesetSize = (Connection, 112);
    SwitchToFlxSync = (Connection, 113);
    SwitchToPbs = (Connection, 114);

    SessionClosed = (Session, 200);
    OtherSessionError = (Session, 201);
    TokenExpired = (Session, 202);
    BadAuthentication = (Session, 203);
    IllegalRealmPath = (Session, 204);
    NoSuchRealm = (Session, 205);
    PermissionDenied = (Session, 206);
    BadServerFileIdent = (Session, 207);
    BadClientFileIdent = (Session, 208);
    BadServerVersion = (Session, 209);
    BadClientVersion = (Session, 210);
    /// Local and server histories can no longer be merged.
    DivergingHistories = (Session, 211);
    BadChangeset = (Session, 212);
    PartialSyncDisabled = (Session, 214);
    UnsupportedSessionFeature = (Session, 215);
    BadOriginFileIdent = (Session, 216);
    BadClientFile = (Session, 217);
    ServerFileDeleted = (Session, 218);
    ClientFileBlacklisted = (Session, 219);
    UserBlacklisted = (Session, 220);
    TransactBeforeUpload = (Session, 221);
    ClientFileExpired = (Session, 222);
    UserMismatch = (Session, 223);
    TooManySessions = (Session, 224);
    InvalidSchemaChange = (Session, 225);
    /// The server rejected a subscription query.
    BadQuery = (Session, 226);
    ObjectAlreadyExists = (Session, 227);
    ServerPermissionsChanged = (Session, 228);
    InitialSyncNotCompleted = (Session, 229);
    WriteNotAllowed = (Session, 230);
    CompensatingWrite = (Session, 231);
    MigrateToFlexibleSync = (Session, 232);
    BadProgress = (Session, 233);
    RevertToPartitionBasedSync = (Session, 234);
    BadSchemaVersion = (Session, 235);
    SchemaVersionChanged = (Session, 236);
}

impl SyncErrorCode {
    /// Looks up a code by category and numeric value.
    #[must_use]
    pub fn from_code(category: ErrorCategory, code: i32) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.category() == category && c.code() == code)
    }

    /// Returns true if the server (or a failed automatic recovery) demands
    /// that the local file be rebuilt.
    #[must_use]
    pub const fn requires_client_reset(self) -> bool {
        matches!(
            self,
            SyncErrorCode::BadClientFileIdent
                | SyncErrorCode::BadServerVersion
                | SyncErrorCode::DivergingHistories
                | SyncErrorCode::BadClientFile
                | SyncErrorCode::ServerFileDeleted
                | SyncErrorCode::ClientFileBlacklisted
                | SyncErrorCode::UserBlacklisted
                | SyncErrorCode::ClientFileExpired
                | SyncErrorCode::AutoClientResetFailure
        )
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique_per_category() {
        let mut seen = HashSet::new();
        for code in SyncErrorCode::ALL {
            assert!(
                seen.insert((code.category(), code.code())),
                "duplicate {code}"
            );
        }
    }

    #[test]
    fn lookup_by_value() {
        assert_eq!(
            SyncErrorCode::from_code(ErrorCategory::Session, 211),
            Some(SyncErrorCode::DivergingHistories)
        );
        assert_eq!(
            SyncErrorCode::from_code(ErrorCategory::Client, 132),
            Some(SyncErrorCode::AutoClientResetFailure)
        );
        assert_eq!(SyncErrorCode::from_code(ErrorCategory::Connection, 211), None);
        assert_eq!(SyncErrorCode::from_code(ErrorCategory::Session, 999), None);
    }

    #[test]
    fn client_reset_codes() {
        let resets: Vec<i32> = SyncErrorCode::ALL
            .iter()
            .filter(|c| c.requires_client_reset())
            .map(|c| c.code())
            .collect();
        assert_eq!(resets, vec![132, 208, 209, 211, 217, 218, 219, 220, 222]);
        assert!(!SyncErrorCode::BadQuery.requires_client_reset());
    }

    #[test]
    fn display() {
        assert_eq!(
            SyncErrorCode::AutoClientResetFailure.to_string(),
            "AutoClientResetFailure(132)"
        );
        assert_eq!(ErrorCategory::Session.to_string(), "Session");
    }
}
