//! Navigation delegate capability.
//!
//! Inbound: the peer creates delegate instances and wires them to web views
//! through the `web_view` channel. Outbound: every `WKNavigationDelegate`
//! callback worth forwarding - provisional start, finish, failure, policy
//! decisions, authentication challenges, content-process termination.

use std::any::Any;
use std::rc::{Rc, Weak};

use serde_json::{json, Value};
use skiff_core::channel::id_arg;
use skiff_core::{BridgeContext, Capability, InstanceId, Responder};

use crate::capabilities::{encode, unknown_method};
use crate::platform::{NavigationDelegate, WebView};
use crate::types::{
    AuthDisposition, AuthResponse, NavigationAction, NavigationPolicy, ProtectionSpace, WebError,
};

/// Channel name for navigation delegate traffic.
pub const CHANNEL: &str = "navigation_delegate";

/// Outbound half: forwards one delegate's callbacks to the peer.
///
/// Holds the bridge context weakly; once the plugin session is torn down,
/// late native callbacks become no-ops instead of keeping the session
/// alive.
pub struct NavigationForwarder {
    ctx: Weak<BridgeContext>,
    id: InstanceId,
}

impl NavigationForwarder {
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

    /// The web view's identifier, weak-registering it on first sight.
    fn web_view_id(ctx: &Rc<BridgeContext>, web_view: &Rc<WebView>) -> InstanceId {
        let any: Rc<dyn Any> = web_view.clone();
        ctx.expose_weak(&any)
    }

    pub fn did_start_provisional_navigation(&self, web_view: &Rc<WebView>, url: Option<String>) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let web_view_id = Self::web_view_id(&ctx, web_view);
        ctx.notify(
            CHANNEL,
            "did_start_provisional_navigation",
            vec![json!(self.id), json!(web_view_id), json!(url)],
        );
    }

    pub fn did_finish_navigation(&self, web_view: &Rc<WebView>, url: Option<String>) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let web_view_id = Self::web_view_id(&ctx, web_view);
        ctx.notify(
            CHANNEL,
            "did_finish_navigation",
            vec![json!(self.id), json!(web_view_id), json!(url)],
        );
    }

    pub fn did_fail_navigation(&self, web_view: &Rc<WebView>, error: WebError) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let web_view_id = Self::web_view_id(&ctx, web_view);
        let Some(error) = encode(&error) else { return };
        ctx.notify(
            CHANNEL,
            "did_fail_navigation",
            vec![json!(self.id), json!(web_view_id), error],
        );
    }

    pub fn web_content_process_did_terminate(&self, web_view: &Rc<WebView>) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        let web_view_id = Self::web_view_id(&ctx, web_view);
        ctx.notify(
            CHANNEL,
            "web_content_process_did_terminate",
            vec![json!(self.id), json!(web_view_id)],
        );
    }

    /// Ask the peer whether a navigation may proceed.
    ///
    /// A peer failure or undecodable reply allows the navigation, matching
    /// the platform default when no delegate is installed.
    pub fn decide_policy_for_navigation_action(
        &self,
        web_view: &Rc<WebView>,
        action: NavigationAction,
        respond: Box<dyn FnOnce(NavigationPolicy)>,
    ) {
        let Some(ctx) = self.ctx.upgrade() else {
            respond(NavigationPolicy::Allow);
            return;
        };
        let web_view_id = Self::web_view_id(&ctx, web_view);
        let Some(action) = encode(&action) else {
            respond(NavigationPolicy::Allow);
            return;
        };
        ctx.call(
            CHANNEL,
            "decide_policy_for_navigation_action",
            vec![json!(self.id), json!(web_view_id), action],
            Box::new(move |result| {
                let policy = match result {
                    Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                        log::error!("undecodable navigation policy: {e}");
                        NavigationPolicy::Allow
                    }),
                    Err(e) => {
                        log::error!("navigation policy request failed: {e}");
                        NavigationPolicy::Allow
                    }
                };
                respond(policy);
            }),
        );
    }

    /// Forward an authentication challenge and hand the peer's answer to
    /// the native completion.
    ///
    /// A peer failure or undecodable reply falls back to the platform's
    /// default handling, with no credential attached.
    pub fn did_receive_authentication_challenge(
        &self,
        web_view: &Rc<WebView>,
        protection_space: ProtectionSpace,
        respond: Box<dyn FnOnce(AuthResponse)>,
    ) {
        let default = || AuthResponse {
            disposition: AuthDisposition::PerformDefaultHandling,
            credential: None,
        };
        let Some(ctx) = self.ctx.upgrade() else {
            respond(default());
            return;
        };
        let web_view_id = Self::web_view_id(&ctx, web_view);
        let Some(space) = encode(&protection_space) else {
            respond(default());
            return;
        };
        ctx.call(
            CHANNEL,
            "did_receive_authentication_challenge",
            vec![json!(self.id), json!(web_view_id), space],
            Box::new(move |result| {
                let response = match result {
                    Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                        log::error!("undecodable authentication response: {e}");
                        default()
                    }),
                    Err(e) => {
                        log::error!("authentication challenge request failed: {e}");
                        default()
                    }
                };
                respond(response);
            }),
        );
    }
}

/// Inbound half: `create` is the only method the peer invokes directly.
pub struct NavigationDelegateCapability;

impl NavigationDelegateCapability {
    fn create(&self, ctx: &Rc<BridgeContext>, args: &[Value]) -> skiff_core::Result<Value> {
        let id = id_arg(args, 0)?;
        let delegate = NavigationDelegate::new(NavigationForwarder::new(ctx, id))?;
        let any: Rc<dyn Any> = delegate;
        ctx.registry_mut().register_remote(id, any)?;
        Ok(Value::Null)
    }
}

impl Capability for NavigationDelegateCapability {
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
