//! Web view configuration capability.
//!
//! Configurations are created standalone or captured from an existing web
//! view (the platform copies the configuration at view creation, so the
//! captured object is distinct from the one the view was created with).

use std::any::Any;
use std::rc::Rc;

use serde_json::Value;
use skiff_core::channel::{bool_arg, id_arg, typed_arg};
use skiff_core::{BridgeContext, Capability, Responder};

use crate::capabilities::unknown_method;
use crate::platform::{WebView, WebViewConfiguration};
use crate::types::AudiovisualMediaType;

/// Channel name for configuration traffic.
pub const CHANNEL: &str = "web_view_configuration";

/// Inbound adapter for configuration operations.
pub struct WebViewConfigurationCapability;

impl WebViewConfigurationCapability {
    fn create(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let configuration = WebViewConfiguration::new()?;
        let any: Rc<dyn Any> = configuration;
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }

    fn create_from_web_view(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let web_view = ctx.resolve::<WebView>(id_arg(args, 1)?)?;
        let any: Rc<dyn Any> = web_view.configuration();
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }

    fn set_flag(
        &self,
        ctx: &Rc<BridgeContext>,
        method: &str,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let configuration = ctx.resolve::<WebViewConfiguration>(id_arg(args, 0)?)?;
        let value = bool_arg(args, 1)?;
        match method {
            "set_allows_inline_media_playback" => {
                configuration.set_allows_inline_media_playback(value)
            }
            "set_limits_navigations_to_app_bound_domains" => {
                configuration.set_limits_navigations_to_app_bound_domains(value)
            }
            "set_allows_javascript" => configuration.set_allows_javascript(value),
            _ => return Err(unknown_method(CHANNEL, method)),
        }
        Ok(Value::Null)
    }

    fn set_media_types_requiring_user_action(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let configuration = ctx.resolve::<WebViewConfiguration>(id_arg(args, 0)?)?;
        let types: AudiovisualMediaType = typed_arg(args, 1)?;
        configuration.set_media_types_requiring_user_action_for_playback(types);
        Ok(Value::Null)
    }
}

impl Capability for WebViewConfigurationCapability {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder) {
        let result = match method {
            "create" => self.create(ctx, args),
            "create_from_web_view" => self.create_from_web_view(ctx, args),
            "set_allows_inline_media_playback"
            | "set_limits_navigations_to_app_bound_domains"
            | "set_allows_javascript" => self.set_flag(ctx, method, args),
            "set_media_types_requiring_user_action_for_playback" => {
                self.set_media_types_requiring_user_action(ctx, args)
            }
            _ => Err(unknown_method(CHANNEL, method)),
        };
        responder(result);
    }
}
