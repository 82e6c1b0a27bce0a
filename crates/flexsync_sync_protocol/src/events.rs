//! Events a sync session reports to the client.

use crate::codes::{ErrorCategory, SyncErrorCode};
use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A protocol-level error reported by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Error category.
    pub category: ErrorCategory,
    /// Numeric code within the category.
    pub code: i32,
    /// Server or client supplied message.
    pub message: String,
}

impl ProtocolError {
    /// Creates an error for a known code.
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            category: code.category(),
            code: code.code(),
            message: message.into(),
        }
    }

    /// Creates an error from raw values, e.g. a code this client does not know.
    pub fn raw(category: ErrorCategory, code: i32, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    /// Returns the code if it is known.
    #[must_use]
    pub fn known_code(&self) -> Option<SyncErrorCode> {
        SyncErrorCode::from_code(self.category, self.code)
    }

    /// Returns true if this error asks for a client reset.
    #[must_use]
    pub fn is_client_reset_requested(&self) -> bool {
        self.known_code()
            .is_some_and(SyncErrorCode::requires_client_reset)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.known_code().map_or("Unknown", SyncErrorCode::name);
        write!(
            f,
            "[{}][{}({})] {}",
            self.category, name, self.code, self.message
        )
    }
}

impl std::error::Error for ProtocolError {}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressDirection {
    /// Local changes going to the server.
    Upload,
    /// Server changes coming to the client.
    Download,
}

/// Raw transfer counters for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Direction of the counters.
    pub direction: ProgressDirection,
    /// Bytes transferred so far.
    pub transferred: u64,
    /// Bytes known to be transferable so far.
    pub transferable: u64,
}

/// State the server reports for a subscription set version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckState {
    /// The server is sending the initial data for the set.
    Bootstrapping,
    /// The set's data is fully downloaded.
    Complete,
    /// The server rejected the set.
    Error(String),
}

/// Server acknowledgement of a subscription set version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAck {
    /// Acknowledged version.
    pub version: i64,
    /// Reported state.
    pub state: AckState,
}

/// Network connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected to the server.
    Connected,
}

/// An event delivered by a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New transfer counters.
    Progress(ProgressReport),
    /// A subscription set changed state on the server.
    SubscriptionStateChanged(SubscriptionAck),
    /// A protocol error.
    Error(ProtocolError),
    /// The connection changed state.
    ConnectionStateChanged(ConnectionState),
}

impl SessionEvent {
    /// Returns the event type code used in frames.
    pub fn type_code(&self) -> u8 {
        match self {
            SessionEvent::Progress(_) => 1,
            SessionEvent::SubscriptionStateChanged(_) => 2,
            SessionEvent::Error(_) => 3,
            SessionEvent::ConnectionStateChanged(_) => 4,
        }
    }

    /// Encodes to a frame: one type byte followed by the CBOR payload.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut frame = vec![self.type_code()];
        match self {
            SessionEvent::Progress(report) => write_payload(&mut frame, report)?,
            SessionEvent::SubscriptionStateChanged(ack) => write_payload(&mut frame, ack)?,
            SessionEvent::Error(error) => write_payload(&mut frame, error)?,
            SessionEvent::ConnectionStateChanged(state) => write_payload(&mut frame, state)?,
        }
        Ok(frame)
    }

    /// Decodes a frame produced by [`SessionEvent::encode`].
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let (&type_code, payload) = bytes.split_first().ok_or(CodecError::EmptyFrame)?;
        match type_code {
            1 => Ok(SessionEvent::Progress(read_payload(payload)?)),
            2 => Ok(SessionEvent::SubscriptionStateChanged(read_payload(payload)?)),
            3 => Ok(SessionEvent::Error(read_payload(payload)?)),
            4 => Ok(SessionEvent::ConnectionStateChanged(read_payload(payload)?)),
            other => Err(CodecError::UnknownEventType(other)),
        }
    }
}

fn write_payload<T: Serialize>(frame: &mut Vec<u8>, payload: &T) -> CodecResult<()> {
    ciborium::ser::into_writer(payload, frame).map_err(|e| CodecError::Encode(e.to_string()))
}

fn read_payload<T: DeserializeOwned>(payload: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(payload).map_err(|e| CodecError::Decode(e.to_string()))
}
