//! Web view capability.
//!
//! The widest inbound surface: creation against a configuration, content
//! loading, history traversal, state getters, script evaluation, and
//! delegate wiring. Everything here resolves identifiers through the
//! registry and touches the platform wrapper; no state lives in the
//! capability itself.

use std::any::Any;
use std::rc::Rc;

use serde_json::{json, Value};
use skiff_core::channel::{id_arg, opt_str_arg, str_arg, typed_arg};
use skiff_core::{BridgeContext, BridgeError, Capability, Responder};

use crate::capabilities::unknown_method;
use crate::platform::{NavigationDelegate, UiDelegate, WebView, WebViewConfiguration};
use crate::types::UrlRequest;

/// Channel name for web view traffic.
pub const CHANNEL: &str = "web_view";

/// Inbound adapter for web view operations.
pub struct WebViewCapability;

impl WebViewCapability {
    fn create(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let configuration_id = id_arg(args, 1)?;
        let configuration = ctx.resolve::<WebViewConfiguration>(configuration_id)?;
        let web_view = WebView::new(&configuration)?;
        let any: Rc<dyn Any> = web_view;
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }

    fn load_request(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        let request: UrlRequest = typed_arg(args, 1)?;
        web_view.load_request(&request)?;
        Ok(Value::Null)
    }

    fn load_html_string(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        let html = str_arg(args, 1)?;
        let base_url = opt_str_arg(args, 2)?;
        web_view.load_html_string(html, base_url)?;
        Ok(Value::Null)
    }

    fn load_file(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        let url = str_arg(args, 1)?;
        let read_access_url = str_arg(args, 2)?;
        web_view.load_file(url, read_access_url)?;
        Ok(Value::Null)
    }

    fn set_navigation_delegate(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        let delegate = match args.get(1) {
            None | Some(Value::Null) => None,
            Some(_) => Some(ctx.resolve::<NavigationDelegate>(id_arg(args, 1)?)?),
        };
        web_view.set_navigation_delegate(delegate);
        Ok(Value::Null)
    }

    fn set_ui_delegate(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        let delegate = match args.get(1) {
            None | Some(Value::Null) => None,
            Some(_) => Some(ctx.resolve::<UiDelegate>(id_arg(args, 1)?)?),
        };
        web_view.set_ui_delegate(delegate);
        Ok(Value::Null)
    }

    fn set_custom_user_agent(
        &self,
        ctx: &Rc<BridgeContext>,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        let agent = opt_str_arg(args, 1)?;
        web_view.set_custom_user_agent(agent);
        Ok(Value::Null)
    }

    /// One-argument methods that only need the resolved web view.
    fn simple(
        &self,
        ctx: &Rc<BridgeContext>,
        method: &str,
        args: &[Value],
    ) -> skiff_core::Result<Value> {
        let web_view = ctx.resolve::<WebView>(id_arg(args, 0)?)?;
        match method {
            "reload" => {
                web_view.reload();
                Ok(Value::Null)
            }
            "go_back" => {
                web_view.go_back();
                Ok(Value::Null)
            }
            "go_forward" => {
                web_view.go_forward();
                Ok(Value::Null)
            }
            "can_go_back" => Ok(json!(web_view.can_go_back())),
            "can_go_forward" => Ok(json!(web_view.can_go_forward())),
            "get_url" => Ok(json!(web_view.url())),
            "get_title" => Ok(json!(web_view.title())),
            "get_estimated_progress" => Ok(json!(web_view.estimated_progress())),
            _ => Err(unknown_method(CHANNEL, method)),
        }
    }
}

impl Capability for WebViewCapability {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn invoke(&self, ctx: &Rc<BridgeContext>, method: &str, args: &[Value], responder: Responder) {
        match method {
            "create" => responder(self.create(ctx, args)),
            "load_request" => responder(self.load_request(ctx, args)),
            "load_html_string" => responder(self.load_html_string(ctx, args)),
            "load_file" => responder(self.load_file(ctx, args)),
            "set_navigation_delegate" => responder(self.set_navigation_delegate(ctx, args)),
            "set_ui_delegate" => responder(self.set_ui_delegate(ctx, args)),
            "set_custom_user_agent" => responder(self.set_custom_user_agent(ctx, args)),
            "evaluate_javascript" => {
                // Asynchronous: the responder rides along into the native
                // completion instead of answering here.
                let resolved = id_arg(args, 0).and_then(|id| {
                    Ok((ctx.resolve::<WebView>(id)?, str_arg(args, 1)?.to_string()))
                });
                match resolved {
                    Ok((web_view, script)) => {
                        web_view.evaluate_javascript(
                            &script,
                            Box::new(move |result| {
                                responder(result.map_err(BridgeError::Platform));
                            }),
                        );
                    }
                    Err(e) => responder(Err(e)),
                }
            }
            "reload" | "go_back" | "go_forward" | "can_go_back" | "can_go_forward" | "get_url"
            | "get_title" | "get_estimated_progress" => responder(self.simple(ctx, method, args)),
            _ => responder(Err(unknown_method(CHANNEL, method))),
        }
    }
}
