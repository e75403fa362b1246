//! Error handling.
//!
//! Failures come in two tiers. The fatal tier is [`Error`]: the engine
//! or its caller is being misused (a handle popped twice, configuration
//! that cannot work) and the current operation cannot proceed. The
//! recoverable tier is [`ErrorIndication`], the RFC 3412
//! statusInformation values: expected outcomes of processing untrusted
//! peer input, such as a failed digest check or a stale time window.
//! Indications drive the retry logic and the application callbacks;
//! [`Error::Status`] carries them across `Result` boundaries so `?`
//! works at internal call sites.
//!
//! The [`Result`] alias boxes the error side to keep the Ok path small.
//!
//! ```rust
//! use snmp_engine::{Error, ErrorIndication, Result};
//!
//! fn classify(result: Result<()>) {
//!     match result {
//!         Ok(()) => println!("ok"),
//!         Err(e) => match e.indication() {
//!             Some(ErrorIndication::NotInTimeWindow) => println!("resync and retry"),
//!             Some(other) => println!("status: {}", other),
//!             None => println!("fatal: {}", e),
//!         },
//!     }
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;

/// Stand-in peer address (0.0.0.0:0) for decode failures that happen
/// before any source address is attached to the buffer.
pub(crate) const UNKNOWN_TARGET: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)), 0);

/// Result with the crate's boxed error.
pub type Result<T> = std::result::Result<T, Box<Error>>;

/// Recoverable status indications (RFC 3412 `statusInformation`).
///
/// These are the named outcomes the security and message-processing layers
/// report when a message cannot be processed for protocol reasons. They are
/// ordinary values, not faults: the command engine consumes some of them to
/// drive retries (time-window resync, engine rediscovery) and hands the
/// rest to the application callback.
///
/// Each indication renders as its conventional camelCase protocol token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorIndication {
    /// Digest did not match the message contents (wrong key or tampering).
    AuthenticationFailure,
    /// Authentication could not be performed (malformed digest field).
    AuthenticationError,
    /// Ciphertext could not be decrypted or was structurally invalid.
    DecryptionError,
    /// Plaintext could not be encrypted.
    EncryptionError,
    /// Privacy requested with a protocol the engine does not support.
    UnsupportedPrivProtocol,
    /// Authentication requested from a user provisioned without keys.
    NoAuthentication,
    /// Security name not found in the user table.
    UnknownUserName,
    /// Authoritative engine ID not known yet (discovery required).
    UnknownEngineId,
    /// Message failed the authoritative engine's time window.
    NotInTimeWindow,
    /// Requested security level cannot be provided for this user.
    UnsupportedSecurityLevel,
    /// Response failed validation against the outstanding request.
    BadResponse,
    /// Response carried no variable bindings where some were required.
    EmptyResponse,
    /// Agent returned a name that does not advance the walk ordering.
    OidNotIncreasing,
    /// No response arrived within the retry budget.
    RequestTimedOut,
}

impl fmt::Display for ErrorIndication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::AuthenticationFailure => "authenticationFailure",
            Self::AuthenticationError => "authenticationError",
            Self::DecryptionError => "decryptionError",
            Self::EncryptionError => "encryptionError",
            Self::UnsupportedPrivProtocol => "unsupportedPrivProtocol",
            Self::NoAuthentication => "noAuthentication",
            Self::UnknownUserName => "unknownUserName",
            Self::UnknownEngineId => "unknownEngineID",
            Self::NotInTimeWindow => "notInTimeWindow",
            Self::UnsupportedSecurityLevel => "unsupportedSecurityLevel",
            Self::BadResponse => "badResponse",
            Self::EmptyResponse => "emptyResponse",
            Self::OidNotIncreasing => "oidNotIncreasing",
            Self::RequestTimedOut => "requestTimedOut",
        };
        f.write_str(token)
    }
}

impl ErrorIndication {
    /// Whether this indication means the peer could not place us in its
    /// engine timeline, rather than a lost or bad exchange. The command
    /// engine retries these through rediscovery instead of burning an
    /// ordinary retry.
    pub fn is_discovery(&self) -> bool {
        matches!(self, Self::NotInTimeWindow | Self::UnknownEngineId)
    }
}

/// Fatal failures.
///
/// This enum covers conditions under which the current operation cannot
/// continue at all. Recoverable protocol outcomes travel as
/// [`ErrorIndication`] values, wrapped in [`Error::Status`] when they
/// cross a `Result` boundary.
///
/// Errors are boxed (via [`Result`]) to keep the size small on the stack.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A recoverable status indication crossing a Result boundary.
    #[error("{0}")]
    Status(ErrorIndication),

    /// No cached state exists for the given handle.
    ///
    /// Popping a handle twice, or popping a handle that was never issued,
    /// is a caller bug. Stale responses never reach this error: the
    /// message processor drops them before any pop is attempted.
    #[error("no cached state for handle {handle}")]
    CacheMiss { handle: u32 },

    /// The authentication parameters field could not be located.
    ///
    /// Outgoing: the all-zero digest placeholder was not found in the
    /// serialized message. Incoming: the claimed digest bytes were not
    /// found in the authenticated stream. Either way the message cannot
    /// be secured or verified.
    #[error("cannot locate authentication parameters in message")]
    AuthParamsNotFound,

    /// Message from the peer could not be parsed.
    #[error("malformed message from {target}")]
    MalformedMessage { target: SocketAddr },

    /// The dispatcher could not hand a message to its transport.
    #[error("I/O error sending to {target}")]
    Io {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Configuration the engine cannot honor.
    #[error("invalid configuration: {0}")]
    Config(Box<str>),

    /// OID that violates the encoding rules.
    #[error("invalid OID: {0}")]
    InvalidOid(Box<str>),
}

impl Error {
    /// Box the error for the [`Result`] alias.
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    /// The status indication carried by this error, if it belongs to the
    /// recoverable tier.
    pub fn indication(&self) -> Option<ErrorIndication> {
        match self {
            Self::Status(indication) => Some(*indication),
            _ => None,
        }
    }
}

impl From<ErrorIndication> for Box<Error> {
    fn from(indication: ErrorIndication) -> Self {
        Error::Status(indication).boxed()
    }
}

/// SNMP protocol error status (RFC 3416).
///
/// An agent that answers with a non-zero status has still processed the
/// request successfully at the message layer, so these are application
/// outcomes, distinct from [`ErrorIndication`]. Codes 0 through 5 date
/// from SNMPv1; the rest arrived with SNMPv2 and mostly describe SET
/// failures.
///
/// ```
/// use snmp_engine::ErrorStatus;
///
/// let status = ErrorStatus::from_i32(4);
/// assert_eq!(status, ErrorStatus::ReadOnly);
/// assert_eq!(status.to_string(), "readOnly");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorStatus {
    /// Success.
    NoError,
    /// The response would not have fit in a single message.
    TooBig,
    /// Variable not found. SNMPv1 only, later versions bind exception
    /// markers instead.
    NoSuchName,
    /// SET with a value the variable cannot take. SNMPv1 only.
    BadValue,
    /// SET against a read-only variable. SNMPv1 only.
    ReadOnly,
    /// Unspecified failure.
    GenErr,
    /// The variable is outside the configured access view.
    NoAccess,
    /// SET value has the wrong ASN.1 type.
    WrongType,
    /// SET value has a length the variable cannot take.
    WrongLength,
    /// SET value uses an encoding the variable cannot take.
    WrongEncoding,
    /// SET value is out of range for the variable.
    WrongValue,
    /// The named row can never be created.
    NoCreation,
    /// SET value conflicts with the state of other variables.
    InconsistentValue,
    /// A resource needed for the SET is exhausted.
    ResourceUnavailable,
    /// Commit phase of a SET failed.
    CommitFailed,
    /// Undo phase of a SET failed after a commit failure.
    UndoFailed,
    /// The principal is not authorized for this operation.
    AuthorizationError,
    /// The variable exists but cannot be written.
    NotWritable,
    /// The name cannot be created under current conditions.
    InconsistentName,
    /// Code point this engine does not know.
    Unknown(i32),
}

impl ErrorStatus {
    // RFC 3416 order; the position of a variant is its code point
    const BY_CODE: [ErrorStatus; 19] = [
        ErrorStatus::NoError,
        ErrorStatus::TooBig,
        ErrorStatus::NoSuchName,
        ErrorStatus::BadValue,
        ErrorStatus::ReadOnly,
        ErrorStatus::GenErr,
        ErrorStatus::NoAccess,
        ErrorStatus::WrongType,
        ErrorStatus::WrongLength,
        ErrorStatus::WrongEncoding,
        ErrorStatus::WrongValue,
        ErrorStatus::NoCreation,
        ErrorStatus::InconsistentValue,
        ErrorStatus::ResourceUnavailable,
        ErrorStatus::CommitFailed,
        ErrorStatus::UndoFailed,
        ErrorStatus::AuthorizationError,
        ErrorStatus::NotWritable,
        ErrorStatus::InconsistentName,
    ];

    /// Map a wire code point to its variant.
    ///
    /// Codes this engine does not know come back as
    /// [`ErrorStatus::Unknown`] rather than failing the decode; the
    /// field is open to future additions.
    pub fn from_i32(value: i32) -> Self {
        let known = usize::try_from(value)
            .ok()
            .and_then(|index| Self::BY_CODE.get(index).copied());
        match known {
            Some(status) => status,
            None => {
                tracing::warn!(
                    target: "snmp_engine::error",
                    { snmp.error_status = value },
                    "unknown SNMP error status",
                );
                Self::Unknown(value)
            }
        }
    }

    /// The wire code point.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Unknown(code) => *code,
            // every named variant sits in BY_CODE at its code point
            known => Self::BY_CODE
                .iter()
                .position(|status| status == known)
                .unwrap_or_default() as i32,
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::NoError => "noError",
            Self::TooBig => "tooBig",
            Self::NoSuchName => "noSuchName",
            Self::BadValue => "badValue",
            Self::ReadOnly => "readOnly",
            Self::GenErr => "genErr",
            Self::NoAccess => "noAccess",
            Self::WrongType => "wrongType",
            Self::WrongLength => "wrongLength",
            Self::WrongEncoding => "wrongEncoding",
            Self::WrongValue => "wrongValue",
            Self::NoCreation => "noCreation",
            Self::InconsistentValue => "inconsistentValue",
            Self::ResourceUnavailable => "resourceUnavailable",
            Self::CommitFailed => "commitFailed",
            Self::UndoFailed => "undoFailed",
            Self::AuthorizationError => "authorizationError",
            Self::NotWritable => "notWritable",
            Self::InconsistentName => "inconsistentName",
            Self::Unknown(code) => return write!(f, "unknown({code})"),
        };
        f.write_str(token)
    }
}
