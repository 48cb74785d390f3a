//! UI delegate capability.
//!
//! Forwards the two UI callbacks the peer cares about: a page asking to
//! open a new web view (popup/targeted link) and a page requesting media
//! capture permission.

use std::any::Any;
use std::rc::{Rc, Weak};

use serde_json::{json, Value};
use skiff_core::channel::id_arg;
use skiff_core::{BridgeContext, Capability, InstanceId, Responder};

use crate::capabilities::{encode, unknown_method};
use crate::platform::{UiDelegate, WebView, WebViewConfiguration};
use crate::types::{MediaCaptureType, NavigationAction, PermissionDecision};

/// Channel name for UI delegate traffic.
pub const CHANNEL: &str = "ui_delegate";

/// Outbound half: forwards UI callbacks to the peer.
pub struct UiForwarder {
    ctx: Weak<BridgeContext>,
    id: InstanceId,
}

impl UiForwarder {
    /// Forwarder for the delegate registered under `id`.
    pub fn new(ctx: &Rc<BridgeContext>, id: InstanceId) -> Self {
        Self {
            ctx: Rc::downgrade(ctx),
            id,
        }
    }

    /// Identifier of the delegate this forwarder speaks for.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The page asked for a new web view. The configuration WebKit offers
    /// is native-originated, so it enters the registry weakly here.
    pub fn on_create_web_view(
        &self,
        web_view: &Rc<WebView>,
        configuration: &Rc<WebViewConfiguration>,
        action: NavigationAction,
    ) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let web_view_any: Rc<dyn Any> = web_view.clone();
        let configuration_any: Rc<dyn Any> = configuration.clone();
        let web_view_id = ctx.expose_weak(&web_view_any);
        let configuration_id = ctx.expose_weak(&configuration_any);
        let Some(action) = encode(&action) else { return };
        ctx.notify(
            CHANNEL,
            "on_create_web_view",
            vec![
                json!(self.id),
                json!(web_view_id),
                json!(configuration_id),
                action,
            ],
        );
    }

    /// Ask the peer to decide a media capture permission request.
    ///
    /// A peer failure or undecodable reply denies the request.
    pub fn request_media_capture_permission(
        &self,
        web_view: &Rc<WebView>,
        origin: String,
        capture_type: MediaCaptureType,
        respond: Box<dyn FnOnce(PermissionDecision)>,
    ) {
        let Some(ctx) = self.ctx.upgrade() else {
            respond(PermissionDecision::Deny);
            return;
        };
        let any: Rc<dyn Any> = web_view.clone();
        let web_view_id = ctx.expose_weak(&any);
        let Some(capture_type) = encode(&capture_type) else {
            respond(PermissionDecision::Deny);
            return;
        };
        ctx.call(
            CHANNEL,
            "request_media_capture_permission",
            vec![
                json!(self.id),
                json!(web_view_id),
                json!(origin),
                capture_type,
            ],
            Box::new(move |result| {
                let decision = match result {
                    Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                        log::error!("undecodable permission decision: {e}");
                        PermissionDecision::Deny
                    }),
                    Err(e) => {
                        log::error!("media capture permission request failed: {e}");
                        PermissionDecision::Deny
                    }
                };
                respond(decision);
            }),
        );
    }
}

/// Inbound half: `create` only.
pub struct UiDelegateCapability;

impl UiDelegateCapability {
    fn create(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let delegate = UiDelegate::new(UiForwarder::new(ctx, id))?;
        let any: Rc<dyn Any> = delegate;
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }
}

impl Capability for UiDelegateCapability {
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
