//! One typed adapter module per native capability.
//!
//! Each module owns a channel name and both directions of traffic on it:
//! the [`Capability`](skiff_core::Capability) implementation decoding
//! inbound calls from the peer, and a forwarder turning native delegate
//! callbacks into outbound calls. Forwarders resolve every referenced
//! object to an identifier before anything crosses the transport,
//! weak-registering native-originated objects the peer has not seen yet.

use serde_json::Value;
use skiff_core::BridgeError;

pub mod configuration;
pub mod data_store;
pub mod navigation;
pub mod object;
pub mod script_channel;
pub mod ui_delegate;
pub mod user_content;
pub mod web_view;

/// Serialize an outbound payload, logging instead of panicking on failure.
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            log::error!("failed to serialize outbound payload: {e}");
            None
        }
    }
}

pub(crate) fn unknown_method(channel: &'static str, method: &str) -> BridgeError {
    BridgeError::UnknownMethod {
        channel: channel.to_string(),
        method: method.to_string(),
    }
}
