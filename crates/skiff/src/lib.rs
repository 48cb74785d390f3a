//! # Skiff
//!
//! WebKit bridge plugin framework for Rust embedders.
//!
//! Skiff lets a remote managed-language peer drive native WebKit objects
//! through integer handles: the peer sends `create`/configure/dispose
//! calls over a message channel, and native delegate callbacks travel the
//! other way carrying only identifiers and plain data.
//!
//! ## Architecture
//!
//! ```text
//! Remote peer (managed layer)
//!        | identifiers + JSON payloads
//! MessageTransport (embedder-provided codec)
//!        |
//! WebKitBridge - capability adapters - InstanceRegistry
//!        |
//! WKWebView & friends (macOS) / headless backend (elsewhere)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skiff::prelude::*;
//! use std::rc::Rc;
//!
//! // Wire the bridge to your framework's message channel.
//! struct ChannelTransport { /* ... */ }
//! impl MessageTransport for ChannelTransport {
//!     fn send(&self, message: OutboundMessage, reply: ReplyHandler) {
//!         // encode and dispatch to the peer; invoke `reply` on response
//!     }
//! }
//!
//! let bridge = WebKitBridge::new(Rc::new(ChannelTransport { /* ... */ }));
//! // Route inbound peer calls:
//! // bridge.handle_message(channel, method, &args, responder);
//! // Periodically reclaim unreachable instances:
//! // bridge.sweep();
//! ```

// Re-export sub-crates
pub use skiff_core as core;
pub use skiff_webkit as webkit;

/// Prelude module for convenient imports.
///
/// Import everything you need to embed the bridge:
/// ```rust,ignore
/// use skiff::prelude::*;
/// ```
pub mod prelude {
    // Core registry and transport contract
    pub use skiff_core::{
        BridgeContext, BridgeError, Capability, Instance, InstanceId, InstanceRegistry,
        MessageTransport, OutboundMessage, RemoteError, ReplyHandler, Responder, Result,
    };

    // The plugin itself
    pub use skiff_webkit::WebKitBridge;

    // Wire types
    pub use skiff_webkit::types::{
        AudiovisualMediaType, AuthDisposition, AuthResponse, Credential, CredentialPersistence,
        FrameInfo, HttpCookie, KeyValueChange, KeyValueChangeKey, KeyValueObservingOption,
        MediaCaptureType, NavigationAction, NavigationPolicy, NavigationType, PermissionDecision,
        ProtectionSpace, ScriptMessage, UrlRequest, UserScript, UserScriptInjectionTime,
        WebError, WebsiteDataType,
    };
}
