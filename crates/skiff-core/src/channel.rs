//! Remote-call transport contract and capability dispatch.
//!
//! The bridge never speaks a concrete wire format. Outbound calls go
//! through [`MessageTransport`], a trait the embedder implements over
//! whatever message-channel codec its framework provides; inbound calls
//! arrive pre-decoded as `(channel, method, args)` and are routed to a
//! [`Capability`]. Payloads are `serde_json::Value` at this boundary, so
//! anything serializable crosses unchanged.

use std::rc::Rc;

use serde_json::Value;

use crate::context::BridgeContext;
use crate::error::BridgeError;
use crate::registry::InstanceId;

/// A call from the native side to the remote peer.
///
/// Carries only identifiers and plain serializable data - never object
/// references.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Capability channel the call belongs to.
    pub channel: &'static str,
    /// Method on the peer side.
    pub method: &'static str,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Failure reported by the remote peer for an outbound call.
#[derive(Debug, Clone)]
pub struct RemoteError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description, if the peer provided one.
    pub message: Option<String>,
    /// Arbitrary extra payload.
    pub details: Option<Value>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "remote error {}: {message}", self.code),
            None => write!(f, "remote error {}", self.code),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Completion callback for an outbound request/response call.
pub type ReplyHandler = Box<dyn FnOnce(std::result::Result<Value, RemoteError>)>;

/// Completion callback for an inbound call.
///
/// Every inbound method gets exactly one responder invocation: the success
/// payload, or the error to surface on the call's response. Methods backed
/// by asynchronous native operations move the responder into the native
/// completion.
pub type Responder = Box<dyn FnOnce(std::result::Result<Value, BridgeError>)>;

/// Transport for calls from the native side to the remote peer.
///
/// Implementations wrap the host framework's message channel. Calls are
/// asynchronous: `send` must not block, and the reply arrives on the same
/// thread the bridge runs on.
pub trait MessageTransport {
    /// Issue a request/response call.
    fn send(&self, message: OutboundMessage, reply: ReplyHandler);

    /// Issue a one-way event call.
    ///
    /// The default implementation sends and logs a remote failure, since
    /// one-way callers have nowhere to surface it.
    fn notify(&self, message: OutboundMessage) {
        let channel = message.channel;
        let method = message.method;
        self.send(
            message,
            Box::new(move |result| {
                if let Err(e) = result {
                    log::error!("one-way call {channel}.{method} failed: {e}");
                }
            }),
        );
    }
}

/// One native capability exposed over the bridge.
///
/// A capability owns a channel name and decodes the inbound methods the
/// peer may invoke on it. The outbound half (delegate forwarding) lives in
/// the same module as the implementation but goes straight through
/// [`BridgeContext`].
pub trait Capability {
    /// Channel name this capability answers on.
    fn channel(&self) -> &'static str;

    /// Handle one inbound call.
    ///
    /// Must invoke `responder` exactly once, immediately for synchronous
    /// methods or from the native completion for asynchronous ones.
    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder);
}

/// Decode the argument at `index` as an instance identifier.
pub fn id_arg(args: &[Value], index: usize) -> Result<InstanceId, BridgeError> {
    let raw = args
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(index, "identifier"))?;
    Ok(InstanceId::new(raw))
}

/// Decode the argument at `index` as a string.
pub fn str_arg<'a>(args: &'a [Value], index: usize) -> Result<&'a str, BridgeError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(index, "string"))
}

/// Decode the argument at `index` as a string, treating JSON null as absent.
pub fn opt_str_arg<'a>(args: &'a [Value], index: usize) -> Result<Option<&'a str>, BridgeError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(missing(index, "string or null")),
    }
}

/// Decode the argument at `index` as a boolean.
pub fn bool_arg(args: &[Value], index: usize) -> Result<bool, BridgeError> {
    args.get(index)
        .and_then(Value::as_bool)
        .ok_or_else(|| missing(index, "boolean"))
}

/// Decode the argument at `index` as a non-negative integer.
pub fn u64_arg(args: &[Value], index: usize) -> Result<u64, BridgeError> {
    args.get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(index, "unsigned integer"))
}

/// Decode the argument at `index` as a 64-bit float.
pub fn f64_arg(args: &[Value], index: usize) -> Result<f64, BridgeError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(index, "number"))
}

/// Deserialize the argument at `index` into `T`.
pub fn typed_arg<T: serde::de::DeserializeOwned>(
    args: &[Value],
    index: usize,
) -> Result<T, BridgeError> {
    let value = args
        .get(index)
        .ok_or_else(|| missing(index, std::any::type_name::<T>()))?;
    serde_json::from_value(value.clone()).map_err(|e| {
        BridgeError::InvalidArgument(format!("argument {index} did not decode: {e}"))
    })
}

fn missing(index: usize, expected: &str) -> BridgeError {
    BridgeError::InvalidArgument(format!("argument {index}: expected {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    struct RecordingTransport {
        sent: RefCell<Vec<(String, String)>>,
    }

    impl MessageTransport for RecordingTransport {
        fn send(&self, message: OutboundMessage, reply: ReplyHandler) {
            self.sent
                .borrow_mut()
                .push((message.channel.to_string(), message.method.to_string()));
            reply(Err(RemoteError {
                code: "unimplemented".into(),
                message: None,
                details: None,
            }));
        }
    }

    #[test]
    fn test_notify_swallows_remote_errors() {
        let transport = RecordingTransport {
            sent: RefCell::new(Vec::new()),
        };
        transport.notify(OutboundMessage {
            channel: "navigation_delegate",
            method: "did_finish_navigation",
            args: vec![json!(1)],
        });
        assert_eq!(
            transport.sent.borrow().as_slice(),
            &[(
                "navigation_delegate".to_string(),
                "did_finish_navigation".to_string()
            )]
        );
    }

    #[test]
    fn test_id_arg_decodes_and_rejects() {
        let args = vec![json!(7), json!("not an id")];
        assert_eq!(id_arg(&args, 0).unwrap(), InstanceId::new(7));
        assert!(id_arg(&args, 1).is_err());
        assert!(id_arg(&args, 2).is_err());
    }

    #[test]
    fn test_opt_str_arg_treats_null_as_absent() {
        let args = vec![json!(null), json!("x"), json!(3)];
        assert_eq!(opt_str_arg(&args, 0).unwrap(), None);
        assert_eq!(opt_str_arg(&args, 1).unwrap(), Some("x"));
        assert!(opt_str_arg(&args, 2).is_err());
        assert_eq!(opt_str_arg(&args, 9).unwrap(), None);
    }

    #[test]
    fn test_typed_arg_reports_decode_failures() {
        #[derive(serde::Deserialize)]
        struct Point {
            #[allow(dead_code)]
            x: f64,
        }
        let args = vec![json!({ "x": 1.5 }), json!({ "y": true })];
        assert!(typed_arg::<Point>(&args, 0).is_ok());
        assert!(matches!(
            typed_arg::<Point>(&args, 1),
            Err(BridgeError::InvalidArgument(_))
        ));
    }
}
