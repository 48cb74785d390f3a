//! Core abstractions for the Skiff WebKit bridge.
//!
//! This crate holds everything that is independent of WebKit itself: the
//! [`InstanceRegistry`] pairing native objects with the integer handles
//! shared with the remote peer, the [`MessageTransport`] contract outbound
//! calls go through, the [`Capability`] dispatch trait, and the error
//! taxonomy. The WebKit capability adapters and platform glue live in
//! `skiff-webkit`.

pub mod channel;
pub mod context;
mod error;
pub mod registry;

pub use channel::{Capability, MessageTransport, OutboundMessage, RemoteError, ReplyHandler, Responder};
pub use context::BridgeContext;
pub use error::{BridgeError, Result};
pub use registry::{Instance, InstanceId, InstanceRegistry};
