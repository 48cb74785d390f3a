//! Headless WebKit stand-in.
//!
//! Used on platforms without WebKit and by the adapter tests. The types
//! mirror the macOS wrappers' surface exactly; behind it they keep just
//! enough state - navigation history, user scripts, handlers, cookies,
//! observers - for the adapter layer to behave observably. Methods that
//! only a page or the network could trigger on the real platform
//! (`post_script_message`, `fail_navigation`, authentication) are exposed
//! as plain methods here so embedders and tests can drive them.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::{Rc, Weak};

use serde_json::{json, Value};

use skiff_core::{BridgeError, Result};

use crate::capabilities::navigation::NavigationForwarder;
use crate::capabilities::object::KvoForwarder;
use crate::capabilities::script_channel::ScriptMessageForwarder;
use crate::capabilities::ui_delegate::UiForwarder;
use crate::types::{
    AudiovisualMediaType, AuthResponse, FrameInfo, HttpCookie, KeyValueChange, KeyValueChangeKey,
    KeyValueObservingOption, MediaCaptureType, NavigationAction, NavigationPolicy,
    NavigationType, PermissionDecision, ProtectionSpace, ScriptMessage, UrlRequest, UserScript,
    WebError, WebsiteDataType,
};

// ---------------------------------------------------------------------------
// Delegate holders
// ---------------------------------------------------------------------------

/// Navigation delegate: holds the forwarder the web view raises events on.
pub struct NavigationDelegate {
    forwarder: NavigationForwarder,
}

impl NavigationDelegate {
    pub fn new(forwarder: NavigationForwarder) -> Result<Rc<Self>> {
        Ok(Rc::new(Self { forwarder }))
    }

    pub fn forwarder(&self) -> &NavigationForwarder {
        &self.forwarder
    }
}

/// Script message handler: holds the forwarder messages are delivered on.
pub struct ScriptMessageHandler {
    forwarder: ScriptMessageForwarder,
}

impl ScriptMessageHandler {
    pub fn new(forwarder: ScriptMessageForwarder) -> Result<Rc<Self>> {
        Ok(Rc::new(Self { forwarder }))
    }

    pub fn forwarder(&self) -> &ScriptMessageForwarder {
        &self.forwarder
    }
}

/// UI delegate: holds the forwarder UI callbacks are raised on.
pub struct UiDelegate {
    forwarder: UiForwarder,
}

impl UiDelegate {
    pub fn new(forwarder: UiForwarder) -> Result<Rc<Self>> {
        Ok(Rc::new(Self { forwarder }))
    }

    pub fn forwarder(&self) -> &UiForwarder {
        &self.forwarder
    }
}

/// Key-value observer: holds the forwarder change callbacks are raised on.
pub struct Observer {
    forwarder: KvoForwarder,
}

impl Observer {
    pub fn new(forwarder: KvoForwarder) -> Result<Rc<Self>> {
        Ok(Rc::new(Self { forwarder }))
    }

    pub fn forwarder(&self) -> &KvoForwarder {
        &self.forwarder
    }
}

// ---------------------------------------------------------------------------
// WebViewConfiguration
// ---------------------------------------------------------------------------

/// Configuration for new web views.
///
/// Owns its user content controller and website data store, handing out the
/// same wrapper on every access so registry identities stay stable.
pub struct WebViewConfiguration {
    user_content_controller: Rc<UserContentController>,
    website_data_store: Rc<WebsiteDataStore>,
    allows_inline_media_playback: Cell<bool>,
    limits_navigations_to_app_bound_domains: Cell<bool>,
    allows_javascript: Cell<bool>,
    media_types_requiring_user_action: Cell<AudiovisualMediaType>,
}

impl WebViewConfiguration {
    pub fn new() -> Result<Rc<Self>> {
        Ok(Rc::new(Self {
            user_content_controller: UserContentController::new(),
            website_data_store: Rc::new(WebsiteDataStore::default()),
            allows_inline_media_playback: Cell::new(false),
            limits_navigations_to_app_bound_domains: Cell::new(false),
            allows_javascript: Cell::new(true),
            media_types_requiring_user_action: Cell::new(AudiovisualMediaType::All),
        }))
    }

    pub fn set_allows_inline_media_playback(&self, value: bool) {
        self.allows_inline_media_playback.set(value);
    }

    pub fn set_limits_navigations_to_app_bound_domains(&self, value: bool) {
        self.limits_navigations_to_app_bound_domains.set(value);
    }

    pub fn set_allows_javascript(&self, value: bool) {
        self.allows_javascript.set(value);
    }

    pub fn set_media_types_requiring_user_action_for_playback(&self, types: AudiovisualMediaType) {
        self.media_types_requiring_user_action.set(types);
    }

    pub fn user_content_controller(&self) -> Rc<UserContentController> {
        Rc::clone(&self.user_content_controller)
    }

    pub fn website_data_store(&self) -> Rc<WebsiteDataStore> {
        Rc::clone(&self.website_data_store)
    }

    pub fn allows_javascript(&self) -> bool {
        self.allows_javascript.get()
    }

    pub fn allows_inline_media_playback(&self) -> bool {
        self.allows_inline_media_playback.get()
    }

    /// The copy a web view keeps, as the platform copies configurations at
    /// view creation. Flag state is copied; the content controller and data
    /// store are shared with the original, matching WebKit.
    fn copy_for_view(&self) -> Rc<Self> {
        Rc::new(Self {
            user_content_controller: Rc::clone(&self.user_content_controller),
            website_data_store: Rc::clone(&self.website_data_store),
            allows_inline_media_playback: Cell::new(self.allows_inline_media_playback.get()),
            limits_navigations_to_app_bound_domains: Cell::new(
                self.limits_navigations_to_app_bound_domains.get(),
            ),
            allows_javascript: Cell::new(self.allows_javascript.get()),
            media_types_requiring_user_action: Cell::new(
                self.media_types_requiring_user_action.get(),
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// UserContentController
// ---------------------------------------------------------------------------

/// Script message handlers and user scripts for one configuration.
pub struct UserContentController {
    handlers: RefCell<HashMap<String, Rc<ScriptMessageHandler>>>,
    user_scripts: RefCell<Vec<UserScript>>,
    self_weak: Weak<Self>,
}

impl UserContentController {
    fn new() -> Rc<Self> {
        Rc::new_cyclic(|self_weak| Self {
            handlers: RefCell::new(HashMap::new()),
            user_scripts: RefCell::new(Vec::new()),
            self_weak: self_weak.clone(),
        })
    }

    fn self_rc(&self) -> Rc<Self> {
        self.self_weak.upgrade().expect("controller is alive")
    }

    pub fn add_script_message_handler(
        &self,
        handler: &Rc<ScriptMessageHandler>,
        name: &str,
    ) -> Result<()> {
        let mut handlers = self.handlers.borrow_mut();
        if handlers.contains_key(name) {
            // WebKit raises an exception for duplicate names.
            return Err(BridgeError::Platform(format!(
                "a script message handler named {name} is already registered"
            )));
        }
        handlers.insert(name.to_string(), Rc::clone(handler));
        Ok(())
    }

    pub fn remove_script_message_handler(&self, name: &str) {
        self.handlers.borrow_mut().remove(name);
    }

    pub fn remove_all_script_message_handlers(&self) {
        self.handlers.borrow_mut().clear();
    }

    pub fn add_user_script(&self, script: &UserScript) {
        self.user_scripts.borrow_mut().push(script.clone());
    }

    pub fn remove_all_user_scripts(&self) {
        self.user_scripts.borrow_mut().clear();
    }

    /// Installed user scripts, in insertion order.
    pub fn user_scripts(&self) -> Vec<UserScript> {
        self.user_scripts.borrow().clone()
    }

    /// Names with a handler attached.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver a page-originated `postMessage` to the named handler.
    pub fn post_script_message(&self, name: &str, body: Value) {
        let handler = self.handlers.borrow().get(name).cloned();
        match handler {
            Some(handler) => handler.forwarder().did_receive_script_message(
                &self.self_rc(),
                ScriptMessage {
                    name: name.to_string(),
                    body,
                },
            ),
            None => log::debug!("script message to unhandled name {name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// WebsiteDataStore
// ---------------------------------------------------------------------------

/// Cookie jar and website data records for one configuration.
#[derive(Default)]
pub struct WebsiteDataStore {
    cookies: RefCell<Vec<HttpCookie>>,
    records: RefCell<HashSet<WebsiteDataType>>,
}

impl WebsiteDataStore {
    pub fn remove_data_of_types(
        &self,
        types: &[WebsiteDataType],
        _modified_since_epoch: f64,
        completion: Box<dyn FnOnce(bool)>,
    ) {
        let mut had_records = false;
        for data_type in types {
            if *data_type == WebsiteDataType::Cookies {
                let mut cookies = self.cookies.borrow_mut();
                had_records |= !cookies.is_empty();
                cookies.clear();
            }
            had_records |= self.records.borrow_mut().remove(data_type);
        }
        completion(had_records);
    }

    pub fn set_cookie(&self, cookie: &HttpCookie, completion: Box<dyn FnOnce()>) {
        let mut cookies = self.cookies.borrow_mut();
        cookies.retain(|existing| {
            existing.name != cookie.name
                || existing.domain != cookie.domain
                || existing.path != cookie.path
        });
        cookies.push(cookie.clone());
        drop(cookies);
        completion();
    }

    /// Current cookie jar contents.
    pub fn cookies(&self) -> Vec<HttpCookie> {
        self.cookies.borrow().clone()
    }

    /// Pretend the store holds records of `data_type`.
    pub fn insert_record(&self, data_type: WebsiteDataType) {
        self.records.borrow_mut().insert(data_type);
    }
}

// ---------------------------------------------------------------------------
// WebView
// ---------------------------------------------------------------------------

struct ObserverRegistration {
    key_path: String,
    observer: Rc<Observer>,
    options: Vec<KeyValueObservingOption>,
}

/// Headless web view: history, state getters, delegates, observers.
pub struct WebView {
    configuration: Rc<WebViewConfiguration>,
    navigation_delegate: RefCell<Option<Rc<NavigationDelegate>>>,
    ui_delegate: RefCell<Option<Rc<UiDelegate>>>,
    custom_user_agent: RefCell<Option<String>>,
    current_url: RefCell<Option<String>>,
    title: RefCell<Option<String>>,
    estimated_progress: Cell<f64>,
    back_stack: RefCell<Vec<String>>,
    forward_stack: RefCell<Vec<String>>,
    queued_script_results: RefCell<VecDeque<std::result::Result<Value, String>>>,
    observers: RefCell<Vec<ObserverRegistration>>,
    self_weak: Weak<Self>,
}

impl WebView {
    pub fn new(configuration: &WebViewConfiguration) -> Result<Rc<Self>> {
        Ok(Rc::new_cyclic(|self_weak| Self {
            configuration: configuration.copy_for_view(),
            navigation_delegate: RefCell::new(None),
            ui_delegate: RefCell::new(None),
            custom_user_agent: RefCell::new(None),
            current_url: RefCell::new(None),
            title: RefCell::new(None),
            estimated_progress: Cell::new(0.0),
            back_stack: RefCell::new(Vec::new()),
            forward_stack: RefCell::new(Vec::new()),
            queued_script_results: RefCell::new(VecDeque::new()),
            observers: RefCell::new(Vec::new()),
            self_weak: self_weak.clone(),
        }))
    }

    fn self_rc(&self) -> Rc<Self> {
        self.self_weak.upgrade().expect("web view is alive")
    }

    /// The view's own configuration copy.
    pub fn configuration(&self) -> Rc<WebViewConfiguration> {
        Rc::clone(&self.configuration)
    }

    pub fn set_navigation_delegate(&self, delegate: Option<Rc<NavigationDelegate>>) {
        *self.navigation_delegate.borrow_mut() = delegate;
    }

    pub fn set_ui_delegate(&self, delegate: Option<Rc<UiDelegate>>) {
        *self.ui_delegate.borrow_mut() = delegate;
    }

    pub fn set_custom_user_agent(&self, agent: Option<&str>) {
        *self.custom_user_agent.borrow_mut() = agent.map(str::to_string);
    }

    pub fn custom_user_agent(&self) -> Option<String> {
        self.custom_user_agent.borrow().clone()
    }

    pub fn load_request(&self, request: &UrlRequest) -> Result<()> {
        if !request.url.contains(':') {
            return Err(BridgeError::Platform(format!(
                "invalid URL: {}",
                request.url
            )));
        }
        self.navigate(request.clone(), NavigationType::Other);
        Ok(())
    }

    pub fn load_html_string(&self, _html: &str, base_url: Option<&str>) -> Result<()> {
        let url = base_url.unwrap_or("about:blank").to_string();
        self.commit_navigation(url);
        Ok(())
    }

    pub fn load_file(&self, url: &str, _read_access_url: &str) -> Result<()> {
        if !url.starts_with("file://") {
            return Err(BridgeError::Platform(format!("not a file URL: {url}")));
        }
        self.commit_navigation(url.to_string());
        Ok(())
    }

    pub fn reload(&self) {
        let current = self.current_url.borrow().clone();
        if let Some(url) = current {
            self.navigate(UrlRequest::get(url), NavigationType::Reload);
        }
    }

    pub fn can_go_back(&self) -> bool {
        !self.back_stack.borrow().is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward_stack.borrow().is_empty()
    }

    /// History traversal; skips the policy round like a cached load.
    pub fn go_back(&self) {
        let Some(previous) = self.back_stack.borrow_mut().pop() else {
            return;
        };
        if let Some(current) = self.current_url.borrow_mut().replace(previous.clone()) {
            self.forward_stack.borrow_mut().push(current);
        }
        self.finish_load(previous);
    }

    pub fn go_forward(&self) {
        let Some(next) = self.forward_stack.borrow_mut().pop() else {
            return;
        };
        if let Some(current) = self.current_url.borrow_mut().replace(next.clone()) {
            self.back_stack.borrow_mut().push(current);
        }
        self.finish_load(next);
    }

    pub fn url(&self) -> Option<String> {
        self.current_url.borrow().clone()
    }

    pub fn title(&self) -> Option<String> {
        self.title.borrow().clone()
    }

    pub fn estimated_progress(&self) -> f64 {
        self.estimated_progress.get()
    }

    pub fn evaluate_javascript(
        &self,
        _script: &str,
        completion: Box<dyn FnOnce(std::result::Result<Value, String>)>,
    ) {
        let result = self
            .queued_script_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(Value::Null));
        completion(result);
    }

    /// Queue the result the next `evaluate_javascript` call reports.
    pub fn queue_script_result(&self, result: std::result::Result<Value, String>) {
        self.queued_script_results.borrow_mut().push_back(result);
    }

    pub fn add_observer(
        &self,
        observer: &Rc<Observer>,
        key_path: &str,
        options: &[KeyValueObservingOption],
    ) -> Result<()> {
        self.observers.borrow_mut().push(ObserverRegistration {
            key_path: key_path.to_string(),
            observer: Rc::clone(observer),
            options: options.to_vec(),
        });
        if options.contains(&KeyValueObservingOption::InitialValue) {
            let initial = self.value_for_key_path(key_path);
            observer.forwarder().observe_value(
                key_path,
                &self.self_rc(),
                vec![KeyValueChange {
                    key: KeyValueChangeKey::NewValue,
                    value: initial,
                }],
            );
        }
        Ok(())
    }

    pub fn remove_observer(&self, observer: &Rc<Observer>, key_path: &str) -> Result<()> {
        self.observers.borrow_mut().retain(|registration| {
            registration.key_path != key_path
                || !Rc::ptr_eq(&registration.observer, observer)
        });
        Ok(())
    }

    /// Deliver an authentication challenge through the navigation delegate.
    pub fn receive_authentication_challenge(
        &self,
        protection_space: ProtectionSpace,
        respond: Box<dyn FnOnce(AuthResponse)>,
    ) {
        let delegate = self.navigation_delegate.borrow().clone();
        match delegate {
            Some(delegate) => delegate.forwarder().did_receive_authentication_challenge(
                &self.self_rc(),
                protection_space,
                respond,
            ),
            None => respond(AuthResponse {
                disposition: crate::types::AuthDisposition::PerformDefaultHandling,
                credential: None,
            }),
        }
    }

    /// Report a load failure through the navigation delegate.
    pub fn fail_navigation(&self, error: WebError) {
        self.set_estimated_progress(0.0);
        let delegate = self.navigation_delegate.borrow().clone();
        if let Some(delegate) = delegate {
            delegate
                .forwarder()
                .did_fail_navigation(&self.self_rc(), error);
        }
    }

    /// Report a web content process crash through the navigation delegate.
    pub fn terminate_web_content_process(&self) {
        let delegate = self.navigation_delegate.borrow().clone();
        if let Some(delegate) = delegate {
            delegate
                .forwarder()
                .web_content_process_did_terminate(&self.self_rc());
        }
    }

    /// A page asks for a new web view; the offered configuration is a fresh
    /// native-originated object.
    pub fn request_popup(&self, action: NavigationAction) {
        let delegate = self.ui_delegate.borrow().clone();
        if let Some(delegate) = delegate {
            let offered = self.configuration.copy_for_view();
            delegate
                .forwarder()
                .on_create_web_view(&self.self_rc(), &offered, action);
        }
    }

    /// A page requests media capture permission.
    pub fn request_media_capture(
        &self,
        origin: String,
        capture_type: MediaCaptureType,
        respond: Box<dyn FnOnce(PermissionDecision)>,
    ) {
        let delegate = self.ui_delegate.borrow().clone();
        match delegate {
            Some(delegate) => delegate.forwarder().request_media_capture_permission(
                &self.self_rc(),
                origin,
                capture_type,
                respond,
            ),
            None => respond(PermissionDecision::Prompt),
        }
    }

    /// Set the page title and notify observers.
    pub fn set_page_title(&self, title: Option<String>) {
        let old = std::mem::replace(&mut *self.title.borrow_mut(), title.clone());
        self.notify_observers("title", json!(old), json!(title));
    }

    fn navigate(&self, request: UrlRequest, navigation_type: NavigationType) {
        let url = request.url.clone();
        let action = NavigationAction {
            request,
            target_frame: FrameInfo {
                is_main_frame: true,
            },
            navigation_type,
        };
        let delegate = self.navigation_delegate.borrow().clone();
        match delegate {
            Some(delegate) => {
                let this = self.self_rc();
                let target = Rc::clone(&this);
                delegate.forwarder().decide_policy_for_navigation_action(
                    &this,
                    action,
                    Box::new(move |policy| {
                        if policy == NavigationPolicy::Allow {
                            target.commit_navigation(url);
                        }
                    }),
                );
            }
            None => self.commit_navigation(url),
        }
    }

    fn commit_navigation(&self, url: String) {
        {
            let mut current = self.current_url.borrow_mut();
            if let Some(previous) = current.replace(url.clone()) {
                self.back_stack.borrow_mut().push(previous);
            }
        }
        self.forward_stack.borrow_mut().clear();
        let delegate = self.navigation_delegate.borrow().clone();
        if let Some(delegate) = &delegate {
            delegate
                .forwarder()
                .did_start_provisional_navigation(&self.self_rc(), Some(url.clone()));
        }
        self.set_estimated_progress(0.1);
        self.finish_load(url);
    }

    fn finish_load(&self, url: String) {
        self.notify_observers("URL", Value::Null, json!(url.clone()));
        self.set_estimated_progress(1.0);
        let delegate = self.navigation_delegate.borrow().clone();
        if let Some(delegate) = delegate {
            delegate
                .forwarder()
                .did_finish_navigation(&self.self_rc(), Some(url));
        }
    }

    fn set_estimated_progress(&self, progress: f64) {
        let old = self.estimated_progress.replace(progress);
        if (old - progress).abs() > f64::EPSILON {
            self.notify_observers("estimatedProgress", json!(old), json!(progress));
        }
    }

    fn value_for_key_path(&self, key_path: &str) -> Value {
        match key_path {
            "URL" => json!(self.url()),
            "title" => json!(self.title()),
            "estimatedProgress" => json!(self.estimated_progress()),
            _ => Value::Null,
        }
    }

    fn notify_observers(&self, key_path: &str, old: Value, new: Value) {
        let interested: Vec<(Rc<Observer>, Vec<KeyValueObservingOption>)> = self
            .observers
            .borrow()
            .iter()
            .filter(|registration| registration.key_path == key_path)
            .map(|registration| (Rc::clone(&registration.observer), registration.options.clone()))
            .collect();
        for (observer, options) in interested {
            let mut changes = Vec::new();
            if options.contains(&KeyValueObservingOption::NewValue) {
                changes.push(KeyValueChange {
                    key: KeyValueChangeKey::NewValue,
                    value: new.clone(),
                });
            }
            if options.contains(&KeyValueObservingOption::OldValue) {
                changes.push(KeyValueChange {
                    key: KeyValueChangeKey::OldValue,
                    value: old.clone(),
                });
            }
            observer
                .forwarder()
                .observe_value(key_path, &self.self_rc(), changes);
        }
    }
}
