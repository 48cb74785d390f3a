//! WebKit bridge plugin for the Skiff framework.
//!
//! This crate is the host side of the bridge: it receives remote calls
//! that create and configure native WebKit objects, and forwards native
//! delegate callbacks (navigation events, script messages, authentication
//! challenges, key-value observation) back to the remote peer. Objects
//! cross the bridge as integer identifiers managed by the instance
//! registry in `skiff-core`; the wire codec behind those calls is the
//! embedder's [`MessageTransport`] implementation.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use skiff_core::{
    BridgeContext, BridgeError, Capability, InstanceRegistry, MessageTransport, Responder,
};

pub mod capabilities;
pub mod platform;
pub mod types;

use capabilities::configuration::WebViewConfigurationCapability;
use capabilities::data_store::WebsiteDataStoreCapability;
use capabilities::navigation::NavigationDelegateCapability;
use capabilities::object::{self, ObjectCapability};
use capabilities::script_channel::ScriptMessageHandlerCapability;
use capabilities::ui_delegate::UiDelegateCapability;
use capabilities::user_content::UserContentControllerCapability;
use capabilities::web_view::WebViewCapability;

/// One plugin session: the shared context plus the capability table.
///
/// Created when the hosting plugin is registered and dropped (after
/// [`detach`](Self::detach)) when it is deregistered. All calls must
/// arrive on the host UI/event thread; the type is `!Send` by
/// construction.
pub struct WebKitBridge {
    ctx: Rc<BridgeContext>,
    capabilities: HashMap<&'static str, Box<dyn Capability>>,
}

impl WebKitBridge {
    /// Create a bridge with a fresh registry.
    pub fn new(transport: Rc<dyn MessageTransport>) -> Self {
        Self::with_context(Rc::new(BridgeContext::new(transport)))
    }

    /// Create a bridge around a pre-configured registry (e.g. one with a
    /// custom identifier base).
    pub fn with_registry(transport: Rc<dyn MessageTransport>, registry: InstanceRegistry) -> Self {
        Self::with_context(Rc::new(BridgeContext::with_registry(transport, registry)))
    }

    fn with_context(ctx: Rc<BridgeContext>) -> Self {
        let mut bridge = Self {
            ctx,
            capabilities: HashMap::new(),
        };
        bridge.register_capability(Box::new(ObjectCapability));
        bridge.register_capability(Box::new(WebViewCapability));
        bridge.register_capability(Box::new(WebViewConfigurationCapability));
        bridge.register_capability(Box::new(UserContentControllerCapability));
        bridge.register_capability(Box::new(ScriptMessageHandlerCapability));
        bridge.register_capability(Box::new(NavigationDelegateCapability));
        bridge.register_capability(Box::new(UiDelegateCapability));
        bridge.register_capability(Box::new(WebsiteDataStoreCapability));
        bridge
    }

    /// Install a capability, replacing any existing one on the same
    /// channel.
    pub fn register_capability(&mut self, capability: Box<dyn Capability>) {
        self.capabilities.insert(capability.channel(), capability);
    }

    /// Route one inbound call to its capability.
    ///
    /// The responder receives the success payload or the error to surface
    /// on the call's response; asynchronous methods invoke it from their
    /// native completion.
    pub fn handle_message(
        &self,
        channel: &str,
        method: &str,
        args: &[Value],
        responder: Responder,
    ) {
        match self.capabilities.get(channel) {
            Some(capability) => capability.invoke(&self.ctx, method, args, responder),
            None => responder(Err(BridgeError::UnknownChannel(channel.to_string()))),
        }
    }

    /// Run a registry sweep and tell the peer about every evicted entry.
    ///
    /// Scheduling is the embedder's choice; eviction never happens
    /// synchronously with any other bridge call. Returns the number of
    /// evicted entries.
    pub fn sweep(&self) -> usize {
        let evicted = self.ctx.registry_mut().sweep();
        for id in &evicted {
            object::notify_evicted(&self.ctx, *id);
        }
        evicted.len()
    }

    /// Drop every registered instance. Called at plugin deregistration.
    pub fn detach(&self) {
        self.ctx.registry_mut().clear();
    }

    /// The shared context, for embedders that need direct registry access.
    pub fn context(&self) -> &Rc<BridgeContext> {
        &self.ctx
    }
}

// The adapter tests drive the headless backend, which only exists off
// macOS; on macOS the same paths require a real WebKit process.
#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::*;
    use crate::platform::{UserContentController, WebView, WebsiteDataStore};
    use crate::types::{
        AuthDisposition, AuthResponse, CredentialPersistence, ProtectionSpace,
    };
    use serde_json::json;
    use skiff_core::{InstanceId, OutboundMessage, RemoteError, ReplyHandler};
    use std::cell::RefCell;

    /// Transport that records outbound calls and answers from a scripted
    /// reply table (JSON null when unscripted).
    #[derive(Default)]
    struct TestTransport {
        sent: RefCell<Vec<(String, String, Vec<Value>)>>,
        replies: RefCell<HashMap<(&'static str, &'static str), Value>>,
    }

    impl TestTransport {
        fn script_reply(&self, channel: &'static str, method: &'static str, reply: Value) {
            self.replies.borrow_mut().insert((channel, method), reply);
        }

        fn sent_methods(&self) -> Vec<(String, String)> {
            self.sent
                .borrow()
                .iter()
                .map(|(channel, method, _)| (channel.clone(), method.clone()))
                .collect()
        }

        fn sent_args(&self, method: &str) -> Vec<Value> {
            self.sent
                .borrow()
                .iter()
                .find(|(_, m, _)| m == method)
                .map(|(_, _, args)| args.clone())
                .expect("method was sent")
        }
    }

    impl MessageTransport for TestTransport {
        fn send(&self, message: OutboundMessage, reply: ReplyHandler) {
            self.sent.borrow_mut().push((
                message.channel.to_string(),
                message.method.to_string(),
                message.args.clone(),
            ));
            let scripted = self
                .replies
                .borrow()
                .get(&(message.channel, message.method))
                .cloned();
            match scripted {
                Some(value) => reply(Ok(value)),
                None => reply(Err(RemoteError {
                    code: "unscripted".into(),
                    message: None,
                    details: None,
                })),
            }
        }
    }

    fn bridge() -> (WebKitBridge, Rc<TestTransport>) {
        let transport = Rc::new(TestTransport::default());
        let bridge = WebKitBridge::new(Rc::clone(&transport) as Rc<dyn MessageTransport>);
        (bridge, transport)
    }

    fn dispatch(
        bridge: &WebKitBridge,
        channel: &str,
        method: &str,
        args: Vec<Value>,
    ) -> skiff_core::Result<Value> {
        let slot: Rc<RefCell<Option<skiff_core::Result<Value>>>> = Rc::new(RefCell::new(None));
        let captured = Rc::clone(&slot);
        bridge.handle_message(
            channel,
            method,
            &args,
            Box::new(move |result| {
                *captured.borrow_mut() = Some(result);
            }),
        );
        let result = slot.borrow_mut().take().expect("responder was invoked");
        result
    }

    fn dispatch_ok(bridge: &WebKitBridge, channel: &str, method: &str, args: Vec<Value>) -> Value {
        dispatch(bridge, channel, method, args).expect("call succeeded")
    }

    /// Peer-side setup shared by most tests: configuration 0, web view 1.
    fn create_web_view(bridge: &WebKitBridge) {
        dispatch_ok(bridge, "web_view_configuration", "create", vec![json!(0)]);
        dispatch_ok(bridge, "web_view", "create", vec![json!(1), json!(0)]);
    }

    #[test]
    fn test_create_and_load_round_trip() {
        let (bridge, _) = bridge();
        create_web_view(&bridge);

        dispatch_ok(
            &bridge,
            "web_view",
            "load_request",
            vec![json!(1), json!({ "url": "https://example.com/" })],
        );
        assert_eq!(
            dispatch_ok(&bridge, "web_view", "get_url", vec![json!(1)]),
            json!("https://example.com/")
        );
    }

    #[test]
    fn test_unknown_channel_and_method_are_reported() {
        let (bridge, _) = bridge();
        assert!(matches!(
            dispatch(&bridge, "no_such_channel", "create", vec![]),
            Err(BridgeError::UnknownChannel(_))
        ));
        assert!(matches!(
            dispatch(&bridge, "web_view", "no_such_method", vec![json!(1)]),
            Err(BridgeError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_create_against_unknown_configuration_fails() {
        let (bridge, _) = bridge();
        assert!(matches!(
            dispatch(&bridge, "web_view", "create", vec![json!(1), json!(9)]),
            Err(BridgeError::NotFound(id)) if id == InstanceId::new(9)
        ));
    }

    #[test]
    fn test_duplicate_peer_identifier_is_rejected() {
        let (bridge, _) = bridge();
        dispatch_ok(&bridge, "web_view_configuration", "create", vec![json!(0)]);
        assert!(matches!(
            dispatch(&bridge, "web_view_configuration", "create", vec![json!(0)]),
            Err(BridgeError::IdentifierInUse(_))
        ));
    }

    #[test]
    fn test_dispose_releases_the_instance() {
        let (bridge, _) = bridge();
        create_web_view(&bridge);

        dispatch_ok(&bridge, "object", "dispose", vec![json!(1)]);
        assert!(matches!(
            dispatch(&bridge, "web_view", "get_url", vec![json!(1)]),
            Err(BridgeError::NotFound(_))
        ));
        // Disposing again is not a fault.
        dispatch_ok(&bridge, "object", "dispose", vec![json!(1)]);
    }

    #[test]
    fn test_script_message_reaches_the_peer() {
        let (bridge, transport) = bridge();
        dispatch_ok(&bridge, "web_view_configuration", "create", vec![json!(0)]);
        dispatch_ok(
            &bridge,
            "user_content_controller",
            "create_from_configuration",
            vec![json!(2), json!(0)],
        );
        dispatch_ok(&bridge, "script_message_handler", "create", vec![json!(3)]);
        dispatch_ok(
            &bridge,
            "user_content_controller",
            "add_script_message_handler",
            vec![json!(2), json!(3), json!("events")],
        );

        let controller = bridge
            .context()
            .resolve::<UserContentController>(InstanceId::new(2))
            .unwrap();
        controller.post_script_message("events", json!({ "kind": "ready" }));

        let args = transport.sent_args("did_receive_script_message");
        assert_eq!(args[0], json!(3));
        assert_eq!(args[1], json!(2));
        assert_eq!(args[2]["name"], json!("events"));
        assert_eq!(args[2]["body"]["kind"], json!("ready"));
    }

    #[test]
    fn test_duplicate_handler_name_is_a_platform_error() {
        let (bridge, _) = bridge();
        dispatch_ok(&bridge, "web_view_configuration", "create", vec![json!(0)]);
        dispatch_ok(
            &bridge,
            "user_content_controller",
            "create_from_configuration",
            vec![json!(2), json!(0)],
        );
        dispatch_ok(&bridge, "script_message_handler", "create", vec![json!(3)]);
        let add = |bridge: &WebKitBridge| {
            dispatch(
                bridge,
                "user_content_controller",
                "add_script_message_handler",
                vec![json!(2), json!(3), json!("events")],
            )
        };
        assert!(add(&bridge).is_ok());
        assert!(matches!(add(&bridge), Err(BridgeError::Platform(_))));
    }

    #[test]
    fn test_navigation_events_carry_identifiers() {
        let (bridge, transport) = bridge();
        create_web_view(&bridge);
        dispatch_ok(&bridge, "navigation_delegate", "create", vec![json!(4)]);
        dispatch_ok(
            &bridge,
            "web_view",
            "set_navigation_delegate",
            vec![json!(1), json!(4)],
        );
        transport.script_reply(
            "navigation_delegate",
            "decide_policy_for_navigation_action",
            json!("allow"),
        );

        dispatch_ok(
            &bridge,
            "web_view",
            "load_request",
            vec![json!(1), json!({ "url": "https://example.com/" })],
        );

        let methods = transport.sent_methods();
        let nav_methods: Vec<&str> = methods
            .iter()
            .filter(|(channel, _)| channel == "navigation_delegate")
            .map(|(_, method)| method.as_str())
            .collect();
        assert_eq!(
            nav_methods,
            vec![
                "decide_policy_for_navigation_action",
                "did_start_provisional_navigation",
                "did_finish_navigation",
            ]
        );
        let args = transport.sent_args("did_finish_navigation");
        assert_eq!(args[0], json!(4));
        assert_eq!(args[1], json!(1));
        assert_eq!(args[2], json!("https://example.com/"));
    }

    #[test]
    fn test_cancelled_policy_stops_the_navigation() {
        let (bridge, transport) = bridge();
        create_web_view(&bridge);
        dispatch_ok(&bridge, "navigation_delegate", "create", vec![json!(4)]);
        dispatch_ok(
            &bridge,
            "web_view",
            "set_navigation_delegate",
            vec![json!(1), json!(4)],
        );
        transport.script_reply(
            "navigation_delegate",
            "decide_policy_for_navigation_action",
            json!("cancel"),
        );

        dispatch_ok(
            &bridge,
            "web_view",
            "load_request",
            vec![json!(1), json!({ "url": "https://blocked.example/" })],
        );

        assert_eq!(
            dispatch_ok(&bridge, "web_view", "get_url", vec![json!(1)]),
            json!(null)
        );
        assert!(!transport
            .sent_methods()
            .iter()
            .any(|(_, method)| method == "did_finish_navigation"));
    }

    #[test]
    fn test_authentication_challenge_uses_peer_credential() {
        let (bridge, transport) = bridge();
        create_web_view(&bridge);
        dispatch_ok(&bridge, "navigation_delegate", "create", vec![json!(4)]);
        dispatch_ok(
            &bridge,
            "web_view",
            "set_navigation_delegate",
            vec![json!(1), json!(4)],
        );
        transport.script_reply(
            "navigation_delegate",
            "did_receive_authentication_challenge",
            json!({
                "disposition": "useCredential",
                "credential": {
                    "user": "user",
                    "password": "secret",
                    "persistence": "forSession",
                },
            }),
        );

        let web_view = bridge
            .context()
            .resolve::<WebView>(InstanceId::new(1))
            .unwrap();
        let answer: Rc<RefCell<Option<AuthResponse>>> = Rc::new(RefCell::new(None));
        let captured = Rc::clone(&answer);
        web_view.receive_authentication_challenge(
            ProtectionSpace {
                host: "example.com".into(),
                port: 443,
                realm: Some("private".into()),
                authentication_method: None,
            },
            Box::new(move |response| {
                *captured.borrow_mut() = Some(response);
            }),
        );

        let response = answer.borrow_mut().take().unwrap();
        assert_eq!(response.disposition, AuthDisposition::UseCredential);
        let credential = response.credential.unwrap();
        assert_eq!(credential.user, "user");
        assert_eq!(credential.persistence, CredentialPersistence::ForSession);
    }

    #[test]
    fn test_failed_challenge_reply_falls_back_to_default_handling() {
        let (bridge, _transport) = bridge();
        create_web_view(&bridge);
        dispatch_ok(&bridge, "navigation_delegate", "create", vec![json!(4)]);
        dispatch_ok(
            &bridge,
            "web_view",
            "set_navigation_delegate",
            vec![json!(1), json!(4)],
        );
        // No scripted reply: the transport reports a remote error.

        let web_view = bridge
            .context()
            .resolve::<WebView>(InstanceId::new(1))
            .unwrap();
        let answer: Rc<RefCell<Option<AuthResponse>>> = Rc::new(RefCell::new(None));
        let captured = Rc::clone(&answer);
        web_view.receive_authentication_challenge(
            ProtectionSpace {
                host: "example.com".into(),
                port: 443,
                realm: None,
                authentication_method: None,
            },
            Box::new(move |response| {
                *captured.borrow_mut() = Some(response);
            }),
        );

        let response = answer.borrow_mut().take().unwrap();
        assert_eq!(response.disposition, AuthDisposition::PerformDefaultHandling);
        assert!(response.credential.is_none());
    }

    #[test]
    fn test_observer_forwards_title_changes() {
        let (bridge, transport) = bridge();
        create_web_view(&bridge);
        dispatch_ok(&bridge, "object", "create_observer", vec![json!(5)]);
        dispatch_ok(
            &bridge,
            "object",
            "add_observer",
            vec![json!(5), json!(1), json!("title"), json!(["newValue"])],
        );

        let web_view = bridge
            .context()
            .resolve::<WebView>(InstanceId::new(1))
            .unwrap();
        web_view.set_page_title(Some("Hello".into()));

        let args = transport.sent_args("observe_value");
        assert_eq!(args[0], json!(5));
        assert_eq!(args[1], json!("title"));
        assert_eq!(args[2], json!(1));
        assert_eq!(args[3][0]["key"], json!("newValue"));
        assert_eq!(args[3][0]["value"], json!("Hello"));

        dispatch_ok(
            &bridge,
            "object",
            "remove_observer",
            vec![json!(5), json!(1), json!("title")],
        );
        transport.sent.borrow_mut().clear();
        web_view.set_page_title(Some("Again".into()));
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_evaluate_javascript_replies_asynchronously() {
        let (bridge, _) = bridge();
        create_web_view(&bridge);

        let web_view = bridge
            .context()
            .resolve::<WebView>(InstanceId::new(1))
            .unwrap();
        web_view.queue_script_result(Ok(json!(42)));
        assert_eq!(
            dispatch_ok(
                &bridge,
                "web_view",
                "evaluate_javascript",
                vec![json!(1), json!("6 * 7")],
            ),
            json!(42)
        );

        web_view.queue_script_result(Err("ReferenceError: nope".into()));
        assert!(matches!(
            dispatch(
                &bridge,
                "web_view",
                "evaluate_javascript",
                vec![json!(1), json!("nope()")],
            ),
            Err(BridgeError::Platform(message)) if message.contains("ReferenceError")
        ));
    }

    #[test]
    fn test_cookies_and_data_removal() {
        let (bridge, _) = bridge();
        dispatch_ok(&bridge, "web_view_configuration", "create", vec![json!(0)]);
        dispatch_ok(
            &bridge,
            "website_data_store",
            "create_from_configuration",
            vec![json!(6), json!(0)],
        );

        dispatch_ok(
            &bridge,
            "website_data_store",
            "set_cookie",
            vec![
                json!(6),
                json!({
                    "name": "session",
                    "value": "abc",
                    "domain": "example.com",
                    "path": "/",
                }),
            ],
        );
        let store = bridge
            .context()
            .resolve::<WebsiteDataStore>(InstanceId::new(6))
            .unwrap();
        assert_eq!(store.cookies().len(), 1);

        assert_eq!(
            dispatch_ok(
                &bridge,
                "website_data_store",
                "remove_data_of_types",
                vec![json!(6), json!(["cookies"]), json!(0.0)],
            ),
            json!(true)
        );
        assert!(store.cookies().is_empty());
        // Second removal finds nothing left.
        assert_eq!(
            dispatch_ok(
                &bridge,
                "website_data_store",
                "remove_data_of_types",
                vec![json!(6), json!(["cookies"]), json!(0.0)],
            ),
            json!(false)
        );
    }

    #[test]
    fn test_sweep_notifies_peer_of_evictions() {
        let (bridge, transport) = bridge();
        let orphan: Rc<dyn std::any::Any> = Rc::new(String::from("native-originated"));
        let id = bridge.context().expose_weak(&orphan);
        drop(orphan);

        assert_eq!(bridge.sweep(), 1);
        let args = transport.sent_args("dispose");
        assert_eq!(args[0], json!(id));

        // Peer-created entries are locked and survive sweeps.
        transport.sent.borrow_mut().clear();
        dispatch_ok(&bridge, "web_view_configuration", "create", vec![json!(0)]);
        assert_eq!(bridge.sweep(), 0);
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_detach_clears_every_instance() {
        let (bridge, _) = bridge();
        create_web_view(&bridge);
        assert!(!bridge.context().registry().is_empty());

        bridge.detach();
        assert!(bridge.context().registry().is_empty());
        assert!(matches!(
            dispatch(&bridge, "web_view", "get_url", vec![json!(1)]),
            Err(BridgeError::NotFound(_))
        ));
    }
}
