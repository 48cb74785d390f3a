//! Error types for bridge operations.

use crate::registry::InstanceId;

/// Errors that can occur while handling a bridge call.
///
/// Lookups that merely miss are not errors - registry getters return
/// `Option` - but a call that *references* an unregistered identifier is a
/// contract violation and surfaces as [`BridgeError::NotFound`] on the
/// call's response.
#[derive(Debug)]
pub enum BridgeError {
    /// No capability is registered under this channel name.
    UnknownChannel(String),
    /// The capability does not implement this method.
    UnknownMethod {
        /// Channel the call arrived on.
        channel: String,
        /// Method that was requested.
        method: String,
    },
    /// The referenced identifier is not registered (or its weak entry has
    /// been reclaimed).
    NotFound(InstanceId),
    /// The identifier resolved to an instance of an unexpected type.
    WrongType {
        /// The offending identifier.
        identifier: InstanceId,
        /// Name of the type the adapter expected.
        expected: &'static str,
    },
    /// A peer-chosen identifier is already bound to a different instance.
    IdentifierInUse(InstanceId),
    /// The instance is already registered under another identifier.
    AlreadyRegistered(InstanceId),
    /// A call argument was missing or malformed.
    InvalidArgument(String),
    /// The native layer rejected the operation (malformed URL, detached
    /// view, platform not supported, ...).
    Platform(String),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownChannel(channel) => write!(f, "unknown channel: {channel}"),
            Self::UnknownMethod { channel, method } => {
                write!(f, "channel {channel} has no method {method}")
            }
            Self::NotFound(id) => write!(f, "no instance registered for identifier {id}"),
            Self::WrongType {
                identifier,
                expected,
            } => write!(f, "identifier {identifier} is not a {expected}"),
            Self::IdentifierInUse(id) => {
                write!(f, "identifier {id} is bound to a different instance")
            }
            Self::AlreadyRegistered(id) => {
                write!(f, "instance is already registered as {id}")
            }
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Platform(msg) => write!(f, "platform error: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
