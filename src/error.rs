use thiserror::Error;

use crate::core::PeerAddress;
use crate::core::curve::CurveError;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state for call to {0} to succeed: {1}")]
    InvalidState(&'static str, String),

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error("signed prekey signature validation failed")]
    SignatureValidationFailed,
    #[error("unknown signed prekey id {0}")]
    InvalidSignedPreKeyId(u32),
    #[error("one-time prekey {0} is not available")]
    OneTimePreKeyUnavailable(u32),

    #[error("message failed authentication")]
    AuthenticationFailed,
    #[error("message could not be encrypted")]
    EncryptionFailure,

    #[error("session with {0} not found")]
    SessionNotFound(PeerAddress),
    #[error("invalid session state: {0}")]
    InvalidSessionState(&'static str),
    #[error("session record for {0} is unreadable")]
    SessionCorrupted(PeerAddress),
    #[error("ratchet step failed: {0}")]
    RatchetStepFailed(&'static str),

    #[error("duplicate message with counter {0}")]
    DuplicateMessage(u32),
    #[error("message counter {0} is too far ahead of chain index {1}")]
    TooManySkippedMessages(u32, u32),

    #[error("no key bundle published for {0}")]
    BundleUnavailable(PeerAddress),
    #[error("key bundle directory failure: {0}")]
    Directory(String),

    #[error("secret store failure: {0}")]
    SecretStore(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
}
