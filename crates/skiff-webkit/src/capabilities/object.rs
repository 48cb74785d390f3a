//! Base object capability.
//!
//! The peer-facing surface every registered instance shares: explicit
//! disposal, and key-value observation of web view properties (estimated
//! progress, URL, title). The outbound direction also carries `dispose`
//! notifications for entries the sweep evicted, so the peer can drop its
//! proxies.

use std::any::Any;
use std::rc::{Rc, Weak};

use serde_json::{json, Value};
use skiff_core::channel::{id_arg, str_arg, typed_arg};
use skiff_core::{BridgeContext, Capability, InstanceId, Responder};

use crate::capabilities::{encode, unknown_method};
use crate::platform::{Observer, WebView};
use crate::types::{KeyValueChange, KeyValueObservingOption};

/// Channel name for base object traffic.
pub const CHANNEL: &str = "object";

/// Notify the peer that the sweep evicted `id`.
///
/// Mirrors the inbound `dispose`: whichever side drops an object last
/// tells the other to forget the identifier.
pub fn notify_evicted(ctx: &BridgeContext, id: InstanceId) {
    ctx.notify(CHANNEL, "dispose", vec![json!(id)]);
}

/// Outbound half: forwards key-value change callbacks to the peer.
pub struct KvoForwarder {
    ctx: Weak<BridgeContext>,
    id: InstanceId,
}

impl KvoForwarder {
    /// Forwarder for the observer registered under `id`.
    pub fn new(ctx: &Rc<BridgeContext>, id: InstanceId) -> Self {
        Self {
            ctx: Rc::downgrade(ctx),
            id,
        }
    }

    /// Identifier of the observer this forwarder speaks for.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn observe_value(
        &self,
        key_path: &str,
        observed: &Rc<WebView>,
        changes: Vec<KeyValueChange>,
    ) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let any: Rc<dyn Any> = observed.clone();
        let observed_id = ctx.expose_weak(&any);
        let Some(changes) = encode(&changes) else { return };
        ctx.notify(
            CHANNEL,
            "observe_value",
            vec![
                json!(self.id),
                json!(key_path),
                json!(observed_id),
                changes,
            ],
        );
    }
}

/// Inbound half: disposal and observer management.
pub struct ObjectCapability;

impl ObjectCapability {
    fn dispose(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        // Absent is fine: the peer may race its dispose against a sweep.
        if ctx.registry_mut().remove(id).is_none() {
            log::debug!("dispose for unknown identifier {id}");
        }
        Ok(Value::Null)
    }

    fn create_observer(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let observer = Observer::new(KvoForwarder::new(ctx, id))?;
        let any: Rc<dyn Any> = observer;
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }

    fn add_observer(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let observer_id = id_arg(args, 0)?;
        let object_id = id_arg(args, 1)?;
        let key_path = str_arg(args, 2)?;
        let options: Vec<KeyValueObservingOption> = typed_arg(args, 3)?;

        let observer = ctx.resolve::<Observer>(observer_id)?;
        let web_view = ctx.resolve::<WebView>(object_id)?;
        web_view.add_observer(&observer, key_path, &options)?;
        Ok(Value::Null)
    }

    fn remove_observer(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let observer_id = id_arg(args, 0)?;
        let object_id = id_arg(args, 1)?;
        let key_path = str_arg(args, 2)?;

        let observer = ctx.resolve::<Observer>(observer_id)?;
        let web_view = ctx.resolve::<WebView>(object_id)?;
        web_view.remove_observer(&observer, key_path)?;
        Ok(Value::Null)
    }
}

impl Capability for ObjectCapability {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder) {
        let result = match method {
            "dispose" => self.dispose(ctx, args),
            "create_observer" => self.create_observer(ctx, args),
            "add_observer" => self.add_observer(ctx, args),
            "remove_observer" => self.remove_observer(ctx, args),
            _ => Err(unknown_method(CHANNEL, method)),
        };
        responder(result);
    }
}
