//! Shared state threaded through every capability adapter.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use serde_json::Value;

use crate::channel::{MessageTransport, OutboundMessage, ReplyHandler};
use crate::error::BridgeError;
use crate::registry::{InstanceId, InstanceRegistry};

/// Registry plus transport, shared by all adapters of one plugin session.
///
/// The original system threads a `(messenger, instance manager)` pair
/// through every adapter constructor; here the pair is one shared context.
/// The context is `!Send` and must stay on the thread that handles bridge
/// calls. Adapter code must not hold a registry borrow across a transport
/// call: replies can re-enter the bridge.
pub struct BridgeContext {
    registry: RefCell<InstanceRegistry>,
    transport: Rc<dyn MessageTransport>,
}

impl BridgeContext {
    /// Create a context with a fresh registry.
    pub fn new(transport: Rc<dyn MessageTransport>) -> Self {
        Self::with_registry(transport, InstanceRegistry::new())
    }

    /// Create a context around an existing registry (e.g. one constructed
    /// with a custom identifier base).
    pub fn with_registry(transport: Rc<dyn MessageTransport>, registry: InstanceRegistry) -> Self {
        Self {
            registry: RefCell::new(registry),
            transport,
        }
    }

    /// Shared borrow of the registry.
    pub fn registry(&self) -> Ref<'_, InstanceRegistry> {
        self.registry.borrow()
    }

    /// Exclusive borrow of the registry.
    pub fn registry_mut(&self) -> RefMut<'_, InstanceRegistry> {
        self.registry.borrow_mut()
    }

    /// The transport outbound calls go through.
    pub fn transport(&self) -> &Rc<dyn MessageTransport> {
        &self.transport
    }

    /// Emit a one-way event call to the peer.
    pub fn notify(&self, channel: &'static str, method: &'static str, args: Vec<Value>) {
        self.transport.notify(OutboundMessage {
            channel,
            method,
            args,
        });
    }

    /// Issue a request/response call to the peer.
    pub fn call(
        &self,
        channel: &'static str,
        method: &'static str,
        args: Vec<Value>,
        reply: ReplyHandler,
    ) {
        self.transport.send(
            OutboundMessage {
                channel,
                method,
                args,
            },
            reply,
        );
    }

    /// Identifier for a native-originated object, registering it weakly on
    /// first sight.
    ///
    /// This is the side channel delegate forwarders use for objects the
    /// peer has never been told about (a configuration spawned by WebKit, a
    /// popup's web view). The registry does not keep such objects alive.
    pub fn expose_weak(&self, instance: &Rc<dyn Any>) -> InstanceId {
        self.registry.borrow_mut().register_weak(instance)
    }

    /// Resolve `id` to an instance of type `T`.
    ///
    /// Unregistered (or reclaimed) identifiers are [`BridgeError::NotFound`];
    /// a live instance of another type is [`BridgeError::WrongType`].
    pub fn resolve<T: Any>(&self, id: InstanceId) -> Result<Rc<T>, BridgeError> {
        let registry = self.registry.borrow();
        let instance = registry.get(id).ok_or(BridgeError::NotFound(id))?;
        instance
            .downcast::<T>()
            .map_err(|_| BridgeError::WrongType {
                identifier: id,
                expected: std::any::type_name::<T>(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RemoteError;

    struct NullTransport;

    impl MessageTransport for NullTransport {
        fn send(&self, _message: OutboundMessage, reply: ReplyHandler) {
            reply(Err(RemoteError {
                code: "dropped".into(),
                message: None,
                details: None,
            }));
        }
    }

    fn context() -> BridgeContext {
        BridgeContext::new(Rc::new(NullTransport))
    }

    #[test]
    fn test_expose_weak_is_idempotent() {
        let ctx = context();
        let instance: Rc<dyn Any> = Rc::new(String::from("config"));
        let first = ctx.expose_weak(&instance);
        let second = ctx.expose_weak(&instance);
        assert_eq!(first, second);
        assert_eq!(ctx.registry().weak_count(), 1);
    }

    #[test]
    fn test_resolve_distinguishes_missing_from_mistyped() {
        let ctx = context();
        let id = ctx.registry_mut().register(Rc::new(String::from("view")));

        assert!(ctx.resolve::<String>(id).is_ok());
        assert!(matches!(
            ctx.resolve::<u32>(id),
            Err(BridgeError::WrongType { .. })
        ));
        assert!(matches!(
            ctx.resolve::<String>(InstanceId::new(99)),
            Err(BridgeError::NotFound(_))
        ));
    }
}
