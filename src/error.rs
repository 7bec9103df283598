//! Stable wire error taxonomy (spec §7) plus the leaf error types for the
//! components that produce them before the dispatcher translates them.

use thiserror::Error;

/// Error codes carried on the wire in an `Error` frame. Discriminants are
/// pinned explicitly so they never shift if a variant is added or reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum ProtocolErrorCode {
    Unauthorized = 1,
    AuthTimeout = 2,
    Banned = 3,
    RoomNotFound = 10,
    RoomLocked = 11,
    RoomFull = 12,
    RoomBlacklisted = 13,
    RoomWrongState = 14,
    NotHost = 20,
    NotInRoom = 21,
    AlreadyInRoom = 22,
    ProtocolViolation = 30,
    UnsupportedVersion = 31,
    Internal = 99,
}

impl ProtocolErrorCode {
    /// Whether the dispatcher must terminate the session after flushing the
    /// error frame for this code (spec §7 propagation policy).
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ProtocolErrorCode::ProtocolViolation
                | ProtocolErrorCode::Internal
                | ProtocolErrorCode::Banned
                | ProtocolErrorCode::UnsupportedVersion
        )
    }

    pub fn message(self) -> &'static str {
        match self {
            ProtocolErrorCode::Unauthorized => "token rejected",
            ProtocolErrorCode::AuthTimeout => "handshake window elapsed",
            ProtocolErrorCode::Banned => "identity or address is banned",
            ProtocolErrorCode::RoomNotFound => "room not found",
            ProtocolErrorCode::RoomLocked => "room is locked",
            ProtocolErrorCode::RoomFull => "room is at capacity",
            ProtocolErrorCode::RoomBlacklisted => "blacklisted from this room",
            ProtocolErrorCode::RoomWrongState => "room is not in the required state",
            ProtocolErrorCode::NotHost => "only the host may do this",
            ProtocolErrorCode::NotInRoom => "not a member of a room",
            ProtocolErrorCode::AlreadyInRoom => "already a member of another room",
            ProtocolErrorCode::ProtocolViolation => "malformed or oversized frame",
            ProtocolErrorCode::UnsupportedVersion => "unsupported protocol version",
            ProtocolErrorCode::Internal => "internal server error",
        }
    }
}

/// Errors produced while joining/operating on a room, ahead of translation
/// to a [`ProtocolErrorCode`] by the dispatcher.
#[derive(Debug, Clone, Copy, Error, serde::Serialize, serde::Deserialize)]
pub enum RoomError {
    #[error("room is locked")]
    Locked,
    #[error("room is full")]
    Full,
    #[error("blacklisted from this room")]
    Blacklisted,
    #[error("already in another room")]
    AlreadyInRoom,
    #[error("room not found")]
    NotFound,
    #[error("room is not in the required state")]
    WrongState,
    #[error("only the host may do this")]
    NotHost,
    #[error("not a member of this room")]
    NotInRoom,
}

impl From<RoomError> for ProtocolErrorCode {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::Locked => ProtocolErrorCode::RoomLocked,
            RoomError::Full => ProtocolErrorCode::RoomFull,
            RoomError::Blacklisted => ProtocolErrorCode::RoomBlacklisted,
            RoomError::AlreadyInRoom => ProtocolErrorCode::AlreadyInRoom,
            RoomError::NotFound => ProtocolErrorCode::RoomNotFound,
            RoomError::WrongState => ProtocolErrorCode::RoomWrongState,
            RoomError::NotHost => ProtocolErrorCode::NotHost,
            RoomError::NotInRoom => ProtocolErrorCode::NotInRoom,
        }
    }
}
