//! Script message handler capability.
//!
//! A handler is created by the peer, attached to a user content controller
//! under a name, and from then on forwards every `postMessage` from page
//! JavaScript to the peer as a one-way call.

use std::any::Any;
use std::rc::{Rc, Weak};

use serde_json::{json, Value};
use skiff_core::channel::id_arg;
use skiff_core::{BridgeContext, Capability, InstanceId, Responder};

use crate::capabilities::{encode, unknown_method};
use crate::platform::{ScriptMessageHandler, UserContentController};
use crate::types::ScriptMessage;

/// Channel name for script message handler traffic.
pub const CHANNEL: &str = "script_message_handler";

/// Outbound half: forwards received script messages to the peer.
pub struct ScriptMessageForwarder {
    ctx: Weak<BridgeContext>,
    id: InstanceId,
}

impl ScriptMessageForwarder {
    /// Forwarder for the handler registered under `id`.
    pub fn new(ctx: &Rc<BridgeContext>, id: InstanceId) -> Self {
        Self {
            ctx: Rc::downgrade(ctx),
            id,
        }
    }

    /// Identifier of the handler this forwarder speaks for.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn did_receive_script_message(
        &self,
        controller: &Rc<UserContentController>,
        message: ScriptMessage,
    ) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let any: Rc<dyn Any> = controller.clone();
        let controller_id = ctx.expose_weak(&any);
        let Some(message) = encode(&message) else { return };
        ctx.notify(
            CHANNEL,
            "did_receive_script_message",
            vec![json!(self.id), json!(controller_id), message],
        );
    }
}

/// Inbound half: `create` only; attachment happens on the
/// `user_content_controller` channel.
pub struct ScriptMessageHandlerCapability;

impl ScriptMessageHandlerCapability {
    fn create(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let handler = ScriptMessageHandler::new(ScriptMessageForwarder::new(ctx, id))?;
        let any: Rc<dyn Any> = handler;
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }
}

impl Capability for ScriptMessageHandlerCapability {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder) {
        let result = match method {
            "create" => self.create(ctx, args),
            _ => Err(unknown_method(CHANNEL, method)),
        };
        responder(result);
    }
}
