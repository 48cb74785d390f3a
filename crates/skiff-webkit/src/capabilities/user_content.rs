//! User content controller capability.
//!
//! The controller is never created standalone: the peer captures the one
//! owned by a configuration, then manages script message handlers and user
//! scripts on it.

use std::any::Any;
use std::rc::Rc;

use serde_json::Value;
use skiff_core::channel::{id_arg, str_arg, typed_arg};
use skiff_core::{BridgeContext, Capability, Responder};

use crate::capabilities::unknown_method;
use crate::platform::{ScriptMessageHandler, UserContentController, WebViewConfiguration};
use crate::types::UserScript;

/// Channel name for user content controller traffic.
pub const CHANNEL: &str = "user_content_controller";

/// Inbound adapter for user content controller operations.
pub struct UserContentControllerCapability;

impl UserContentControllerCapability {
    fn create_from_configuration(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let configuration = ctx.resolve::<WebViewConfiguration>(id_arg(args, 1)?)?;
        let any: Rc<dyn Any> = configuration.user_content_controller();
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }

    fn add_script_message_handler(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let controller = ctx.resolve::<UserContentController>(id_arg(args, 0)?)?;
        let handler = ctx.resolve::<ScriptMessageHandler>(id_arg(args, 1)?)?;
        let name = str_arg(args, 2)?;
        controller.add_script_message_handler(&handler, name)?;
        Ok(Value::Null)
    }

    fn remove_script_message_handler(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let controller = ctx.resolve::<UserContentController>(id_arg(args, 0)?)?;
        let name = str_arg(args, 1)?;
        controller.remove_script_message_handler(name);
        Ok(Value::Null)
    }

    fn remove_all_script_message_handlers(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let controller = ctx.resolve::<UserContentController>(id_arg(args, 0)?)?;
        controller.remove_all_script_message_handlers();
        Ok(Value::Null)
    }

    fn add_user_script(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let controller = ctx.resolve::<UserContentController>(id_arg(args, 0)?)?;
        let script: UserScript = typed_arg(args, 1)?;
        controller.add_user_script(&script);
        Ok(Value::Null)
    }

    fn remove_all_user_scripts(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let controller = ctx.resolve::<UserContentController>(id_arg(args, 0)?)?;
        controller.remove_all_user_scripts();
        Ok(Value::Null)
    }
}

impl Capability for UserContentControllerCapability {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder) {
        let result = match method {
            "create_from_configuration" => self.create_from_configuration(ctx, args),
            "add_script_message_handler" => self.add_script_message_handler(ctx, args),
            "remove_script_message_handler" => self.remove_script_message_handler(ctx, args),
            "remove_all_script_message_handlers" => {
                self.remove_all_script_message_handlers(ctx, args)
            }
            "add_user_script" => self.add_user_script(ctx, args),
            "remove_all_user_scripts" => self.remove_all_user_scripts(ctx, args),
            _ => Err(unknown_method(CHANNEL, method)),
        };
        responder(result);
    }
}
