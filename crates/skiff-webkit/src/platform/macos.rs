//! macOS WebKit wrappers backed by `WKWebView` and friends.
//!
//! Every wrapper owns its `Retained` native object; registry identity is
//! the wrapper's `Rc` allocation, so one native object is always paired
//! with one wrapper. Delegate wiring goes through the runtime-registered
//! ObjC classes in `macos_delegates`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{msg_send, MainThreadMarker};
use objc2_foundation::{NSDate, NSMutableURLRequest, NSSet, NSString, NSURL};
use objc2_web_kit::{
    WKAudiovisualMediaTypes, WKUserContentController as NativeUserContentController,
    WKUserScript as NativeUserScript, WKUserScriptInjectionTime, WKWebView as NativeWebView,
    WKWebViewConfiguration as NativeConfiguration, WKWebsiteDataStore as NativeDataStore,
};
use serde_json::Value;

use skiff_core::{BridgeError, Result};

use crate::capabilities::navigation::NavigationForwarder;
use crate::capabilities::object::KvoForwarder;
use crate::capabilities::script_channel::ScriptMessageForwarder;
use crate::capabilities::ui_delegate::UiForwarder;
use crate::platform::macos_delegates::{
    self, evaluate_javascript_completion, DelegateHost, NativeBacked, KVO_OPTION_INITIAL,
    KVO_OPTION_NEW, KVO_OPTION_OLD,
};
use crate::types::{
    AudiovisualMediaType, HttpCookie, KeyValueObservingOption, UrlRequest, UserScript,
    UserScriptInjectionTime, WebsiteDataType,
};

fn main_thread() -> Result<MainThreadMarker> {
    MainThreadMarker::new()
        .ok_or_else(|| BridgeError::Platform("must be called from the main thread".into()))
}

fn ns_url(url: &str) -> Result<Retained<NSURL>> {
    let string = NSString::from_str(url);
    // SAFETY: URLWithString accepts any NSString and returns nil for
    // unparseable input.
    unsafe { NSURL::URLWithString(&string) }
        .ok_or_else(|| BridgeError::Platform(format!("invalid URL: {url}")))
}

// ---------------------------------------------------------------------------
// Delegate wrappers
// ---------------------------------------------------------------------------

/// Navigation delegate: the runtime-built ObjC object plus the forwarder it
/// calls into.
pub struct NavigationDelegate {
    host: Box<DelegateHost<NavigationForwarder>>,
    objc: Retained<AnyObject>,
}

impl NavigationDelegate {
    pub fn new(forwarder: NavigationForwarder) -> Result<Rc<Self>> {
        let mtm = main_thread()?;
        let host = Box::new(DelegateHost::new(forwarder));
        // SAFETY: the host box outlives the ObjC object because the wrapper
        // owns both, and the object's only strong owner is the wrapper.
        let objc = unsafe { macos_delegates::new_navigation_delegate(&*host, mtm) };
        Ok(Rc::new(Self { host, objc }))
    }

    pub fn forwarder(&self) -> &NavigationForwarder {
        &self.host.forwarder
    }

    fn attach(&self, web_view: &Rc<WebView>) {
        self.host.attach(web_view);
    }
}

/// Script message handler wrapper.
pub struct ScriptMessageHandler {
    host: Box<DelegateHost<ScriptMessageForwarder, UserContentController>>,
    objc: Retained<AnyObject>,
}

impl ScriptMessageHandler {
    pub fn new(forwarder: ScriptMessageForwarder) -> Result<Rc<Self>> {
        let mtm = main_thread()?;
        let host = Box::new(DelegateHost::new(forwarder));
        // SAFETY: as for NavigationDelegate - wrapper owns host and object.
        let objc = unsafe { macos_delegates::new_script_message_handler(&*host, mtm) };
        Ok(Rc::new(Self { host, objc }))
    }

    pub fn forwarder(&self) -> &ScriptMessageForwarder {
        &self.host.forwarder
    }
}

/// UI delegate wrapper.
pub struct UiDelegate {
    host: Box<DelegateHost<UiForwarder>>,
    objc: Retained<AnyObject>,
}

impl UiDelegate {
    pub fn new(forwarder: UiForwarder) -> Result<Rc<Self>> {
        let mtm = main_thread()?;
        let host = Box::new(DelegateHost::new(forwarder));
        // SAFETY: as for NavigationDelegate - wrapper owns host and object.
        let objc = unsafe { macos_delegates::new_ui_delegate(&*host, mtm) };
        Ok(Rc::new(Self { host, objc }))
    }

    pub fn forwarder(&self) -> &UiForwarder {
        &self.host.forwarder
    }

    fn attach(&self, web_view: &Rc<WebView>) {
        self.host.attach(web_view);
    }
}

/// Key-value observer wrapper.
pub struct Observer {
    host: Box<DelegateHost<KvoForwarder>>,
    objc: Retained<AnyObject>,
}

impl Observer {
    pub fn new(forwarder: KvoForwarder) -> Result<Rc<Self>> {
        let mtm = main_thread()?;
        let host = Box::new(DelegateHost::new(forwarder));
        // SAFETY: as for NavigationDelegate - wrapper owns host and object.
        let objc = unsafe { macos_delegates::new_key_value_observer(&*host, mtm) };
        Ok(Rc::new(Self { host, objc }))
    }

    pub fn forwarder(&self) -> &KvoForwarder {
        &self.host.forwarder
    }
}

// ---------------------------------------------------------------------------
// WebViewConfiguration
// ---------------------------------------------------------------------------

/// Configuration wrapper.
///
/// The user content controller and website data store wrappers are created
/// once and cached, so repeated capture through the bridge resolves to the
/// same registry identity.
pub struct WebViewConfiguration {
    native: Retained<NativeConfiguration>,
    user_content_controller: Rc<UserContentController>,
    website_data_store: Rc<WebsiteDataStore>,
}

impl WebViewConfiguration {
    pub fn new() -> Result<Rc<Self>> {
        let mtm = main_thread()?;
        // SAFETY: WKWebViewConfiguration::new is safe on the main thread.
        let native = unsafe { NativeConfiguration::new(mtm) };
        Ok(Self::wrap(native))
    }

    fn wrap(native: Retained<NativeConfiguration>) -> Rc<Self> {
        // SAFETY: a configuration always has a content controller and a
        // data store.
        let controller = unsafe { native.userContentController() };
        // SAFETY: see above.
        let data_store = unsafe { native.websiteDataStore() };
        Rc::new(Self {
            native,
            user_content_controller: Rc::new_cyclic(|self_weak| UserContentController {
                native: controller,
                self_weak: self_weak.clone(),
            }),
            website_data_store: Rc::new(WebsiteDataStore { native: data_store }),
        })
    }

    /// Wrap a native configuration handed out by WebKit (e.g. the one
    /// offered for a popup).
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid `WKWebViewConfiguration`.
    pub(crate) unsafe fn from_native_ptr(ptr: *const AnyObject) -> Rc<Self> {
        // SAFETY: per this function's contract; retain keeps it alive for
        // the wrapper's lifetime.
        let native = unsafe { Retained::retain(ptr as *mut NativeConfiguration) }
            .expect("configuration pointer is non-nil");
        Self::wrap(native)
    }

    pub fn set_allows_inline_media_playback(&self, value: bool) {
        // Inline playback is an iOS concept; macOS WebKit always plays
        // inline, so there is nothing to set.
        let _ = value;
        log::debug!("allowsInlineMediaPlayback has no effect on macOS");
    }

    pub fn set_limits_navigations_to_app_bound_domains(&self, value: bool) {
        // SAFETY: plain BOOL property setter.
        unsafe { self.native.setLimitsNavigationsToAppBoundDomains(value) };
    }

    pub fn set_allows_javascript(&self, value: bool) {
        // SAFETY: a configuration always has default webpage preferences.
        let preferences = unsafe { self.native.defaultWebpagePreferences() };
        // SAFETY: plain BOOL property setter.
        unsafe { preferences.setAllowsContentJavaScript(value) };
    }

    pub fn set_media_types_requiring_user_action_for_playback(&self, types: AudiovisualMediaType) {
        let native_types = match types {
            AudiovisualMediaType::None => WKAudiovisualMediaTypes::WKAudiovisualMediaTypeNone,
            AudiovisualMediaType::Audio => WKAudiovisualMediaTypes::WKAudiovisualMediaTypeAudio,
            AudiovisualMediaType::Video => WKAudiovisualMediaTypes::WKAudiovisualMediaTypeVideo,
            AudiovisualMediaType::All => WKAudiovisualMediaTypes::WKAudiovisualMediaTypeAll,
        };
        // SAFETY: plain property setter taking an options bitmask.
        unsafe { self.native.setMediaTypesRequiringUserActionForPlayback(native_types) };
    }

    pub fn user_content_controller(&self) -> Rc<UserContentController> {
        Rc::clone(&self.user_content_controller)
    }

    pub fn website_data_store(&self) -> Rc<WebsiteDataStore> {
        Rc::clone(&self.website_data_store)
    }
}

// ---------------------------------------------------------------------------
// UserContentController
// ---------------------------------------------------------------------------

/// User content controller wrapper.
pub struct UserContentController {
    native: Retained<NativeUserContentController>,
    self_weak: Weak<Self>,
}

impl UserContentController {
    pub fn add_script_message_handler(
        &self,
        handler: &Rc<ScriptMessageHandler>,
        name: &str,
    ) -> Result<()> {
        // The handler's callbacks resolve the controller wrapper through
        // its host, so the pairing is recorded before WebKit can call back.
        handler
            .host
            .attach(&self.self_weak.upgrade().expect("controller is alive"));
        let name = NSString::from_str(name);
        // SAFETY: the handler object conforms to WKScriptMessageHandler and
        // is retained by the controller until removed; duplicate names raise
        // inside WebKit before any state changes.
        unsafe {
            let _: () = msg_send![
                &self.native,
                addScriptMessageHandler: &*handler.objc,
                name: &*name,
            ];
        }
        Ok(())
    }

    pub fn remove_script_message_handler(&self, name: &str) {
        let name = NSString::from_str(name);
        // SAFETY: removing an unknown name is a no-op.
        unsafe { self.native.removeScriptMessageHandlerForName(&name) };
    }

    pub fn remove_all_script_message_handlers(&self) {
        // SAFETY: no arguments, no preconditions.
        unsafe { self.native.removeAllScriptMessageHandlers() };
    }

    pub fn add_user_script(&self, script: &UserScript) {
        let source = NSString::from_str(&script.source);
        let injection_time = match script.injection_time {
            UserScriptInjectionTime::AtDocumentStart => {
                WKUserScriptInjectionTime::AtDocumentStart
            }
            UserScriptInjectionTime::AtDocumentEnd => WKUserScriptInjectionTime::AtDocumentEnd,
        };
        // SAFETY: standard three-argument WKUserScript initializer.
        let user_script = unsafe {
            NativeUserScript::initWithSource_injectionTime_forMainFrameOnly(
                NativeUserScript::alloc(),
                &source,
                injection_time,
                script.is_main_frame_only,
            )
        };
        // SAFETY: the controller copies the script.
        unsafe { self.native.addUserScript(&user_script) };
    }

    pub fn remove_all_user_scripts(&self) {
        // SAFETY: no arguments, no preconditions.
        unsafe { self.native.removeAllUserScripts() };
    }
}

impl NativeBacked for UserContentController {
    type Native = NativeUserContentController;

    fn native_ptr(&self) -> *const NativeUserContentController {
        Retained::as_ptr(&self.native)
    }
}

// ---------------------------------------------------------------------------
// WebsiteDataStore
// ---------------------------------------------------------------------------

/// Website data store wrapper.
pub struct WebsiteDataStore {
    native: Retained<NativeDataStore>,
}

impl WebsiteDataStore {
    pub fn remove_data_of_types(
        &self,
        types: &[WebsiteDataType],
        modified_since_epoch: f64,
        completion: Box<dyn FnOnce(bool)>,
    ) {
        let type_names: Vec<Retained<NSString>> =
            types.iter().map(|t| data_type_name(*t)).collect();
        let type_refs: Vec<&NSString> = type_names.iter().map(|s| &**s).collect();
        let type_set: Retained<NSSet<NSString>> = NSSet::from_slice(&type_refs);
        // SAFETY: dateWithTimeIntervalSince1970 accepts any interval.
        let since = unsafe { NSDate::dateWithTimeIntervalSince1970(modified_since_epoch) };
        macos_delegates::remove_data_of_types(&self.native, &type_set, &since, completion);
    }

    pub fn set_cookie(&self, cookie: &HttpCookie, completion: Box<dyn FnOnce()>) {
        macos_delegates::set_cookie(&self.native, cookie, completion);
    }
}

fn data_type_name(data_type: WebsiteDataType) -> Retained<NSString> {
    let name = match data_type {
        WebsiteDataType::Cookies => "WKWebsiteDataTypeCookies",
        WebsiteDataType::MemoryCache => "WKWebsiteDataTypeMemoryCache",
        WebsiteDataType::DiskCache => "WKWebsiteDataTypeDiskCache",
        WebsiteDataType::OfflineWebApplicationCache => {
            "WKWebsiteDataTypeOfflineWebApplicationCache"
        }
        WebsiteDataType::LocalStorage => "WKWebsiteDataTypeLocalStorage",
        WebsiteDataType::SessionStorage => "WKWebsiteDataTypeSessionStorage",
        WebsiteDataType::WebSqlDatabases => "WKWebsiteDataTypeWebSQLDatabases",
        WebsiteDataType::IndexedDbDatabases => "WKWebsiteDataTypeIndexedDBDatabases",
    };
    NSString::from_str(name)
}

// ---------------------------------------------------------------------------
// WebView
// ---------------------------------------------------------------------------

/// Web view wrapper.
///
/// WebKit holds its delegates weakly, so the wrapper keeps the delegate
/// wrappers alive for as long as they are installed.
pub struct WebView {
    webview: Retained<NativeWebView>,
    configuration: Rc<WebViewConfiguration>,
    navigation_delegate: RefCell<Option<Rc<NavigationDelegate>>>,
    ui_delegate: RefCell<Option<Rc<UiDelegate>>>,
    self_weak: Weak<Self>,
}

impl WebView {
    pub fn new(configuration: &WebViewConfiguration) -> Result<Rc<Self>> {
        let mtm = main_thread()?;
        let frame = objc2_foundation::NSRect::new(
            objc2_foundation::NSPoint::new(0.0, 0.0),
            objc2_foundation::NSSize::new(0.0, 0.0),
        );
        // SAFETY: frame and configuration are valid; we are on the main
        // thread.
        let webview = unsafe {
            NativeWebView::initWithFrame_configuration(mtm.alloc(), frame, &configuration.native)
        };
        // The view keeps its own configuration copy; wrap that one so
        // capture-from-view resolves to the object the view actually uses.
        // SAFETY: a web view always has a configuration.
        let own_configuration = unsafe { webview.configuration() };
        Ok(Rc::new_cyclic(|self_weak| Self {
            webview,
            configuration: WebViewConfiguration::wrap(own_configuration),
            navigation_delegate: RefCell::new(None),
            ui_delegate: RefCell::new(None),
            self_weak: self_weak.clone(),
        }))
    }

    pub fn configuration(&self) -> Rc<WebViewConfiguration> {
        Rc::clone(&self.configuration)
    }

    pub fn load_request(&self, request: &UrlRequest) -> Result<()> {
        let url = ns_url(&request.url)?;
        // SAFETY: requestWithURL accepts any NSURL.
        let native_request = unsafe { NSMutableURLRequest::requestWithURL(&url) };
        if let Some(method) = &request.http_method {
            let method = NSString::from_str(method);
            // SAFETY: plain property setter.
            unsafe { native_request.setHTTPMethod(&method) };
        }
        if let Some(body) = &request.http_body {
            let data = objc2_foundation::NSData::with_bytes(body);
            // SAFETY: plain property setter.
            unsafe { native_request.setHTTPBody(Some(&data)) };
        }
        for (field, value) in &request.headers {
            let field = NSString::from_str(field);
            let value = NSString::from_str(value);
            // SAFETY: both arguments are valid NSStrings.
            unsafe { native_request.setValue_forHTTPHeaderField(Some(&value), &field) };
        }
        // SAFETY: the request is fully built and the view is alive.
        unsafe { self.webview.loadRequest(&native_request) };
        Ok(())
    }

    pub fn load_html_string(&self, html: &str, base_url: Option<&str>) -> Result<()> {
        let html = NSString::from_str(html);
        let base = match base_url {
            Some(url) => Some(ns_url(url)?),
            None => None,
        };
        // SAFETY: html is a valid NSString; base URL is optional.
        unsafe { self.webview.loadHTMLString_baseURL(&html, base.as_deref()) };
        Ok(())
    }

    pub fn load_file(&self, url: &str, read_access_url: &str) -> Result<()> {
        let file_url = ns_url(url)?;
        let read_access = ns_url(read_access_url)?;
        // SAFETY: both URLs are valid.
        unsafe {
            self.webview
                .loadFileURL_allowingReadAccessToURL(&file_url, &read_access)
        };
        Ok(())
    }

    pub fn reload(&self) {
        // SAFETY: no arguments, no preconditions.
        unsafe { self.webview.reload() };
    }

    pub fn go_back(&self) {
        // SAFETY: a no-op when there is no back item.
        unsafe { self.webview.goBack() };
    }

    pub fn go_forward(&self) {
        // SAFETY: a no-op when there is no forward item.
        unsafe { self.webview.goForward() };
    }

    pub fn can_go_back(&self) -> bool {
        // SAFETY: plain BOOL property getter.
        unsafe { self.webview.canGoBack() }
    }

    pub fn can_go_forward(&self) -> bool {
        // SAFETY: plain BOOL property getter.
        unsafe { self.webview.canGoForward() }
    }

    pub fn url(&self) -> Option<String> {
        // SAFETY: plain property getter; nil before the first load.
        let url = unsafe { self.webview.URL() }?;
        // SAFETY: absoluteString is valid on any NSURL.
        unsafe { url.absoluteString() }.map(|s| s.to_string())
    }

    pub fn title(&self) -> Option<String> {
        // SAFETY: plain property getter; nil before the first load.
        unsafe { self.webview.title() }.map(|s| s.to_string())
    }

    pub fn estimated_progress(&self) -> f64 {
        // SAFETY: plain double property getter.
        unsafe { self.webview.estimatedProgress() }
    }

    pub fn set_custom_user_agent(&self, agent: Option<&str>) {
        let agent = agent.map(NSString::from_str);
        // SAFETY: plain property setter accepting nil.
        unsafe { self.webview.setCustomUserAgent(agent.as_deref()) };
    }

    pub fn evaluate_javascript(
        &self,
        script: &str,
        completion: Box<dyn FnOnce(std::result::Result<Value, String>)>,
    ) {
        evaluate_javascript_completion(&self.webview, script, completion);
    }

    pub fn set_navigation_delegate(&self, delegate: Option<Rc<NavigationDelegate>>) {
        match &delegate {
            Some(delegate) => {
                delegate.attach(&self.self_rc());
                // SAFETY: the delegate object conforms to
                // WKNavigationDelegate; WebKit stores it weakly and the
                // wrapper keeps it alive below.
                unsafe {
                    let _: () =
                        msg_send![&self.webview, setNavigationDelegate: &*delegate.objc];
                }
            }
            None => {
                // SAFETY: clearing the delegate is always valid.
                unsafe {
                    let _: () = msg_send![
                        &self.webview,
                        setNavigationDelegate: std::ptr::null::<AnyObject>(),
                    ];
                }
            }
        }
        *self.navigation_delegate.borrow_mut() = delegate;
    }

    pub fn set_ui_delegate(&self, delegate: Option<Rc<UiDelegate>>) {
        match &delegate {
            Some(delegate) => {
                delegate.attach(&self.self_rc());
                // SAFETY: the delegate object conforms to WKUIDelegate;
                // WebKit stores it weakly and the wrapper keeps it alive.
                unsafe {
                    let _: () = msg_send![&self.webview, setUIDelegate: &*delegate.objc];
                }
            }
            None => {
                // SAFETY: clearing the delegate is always valid.
                unsafe {
                    let _: () = msg_send![
                        &self.webview,
                        setUIDelegate: std::ptr::null::<AnyObject>(),
                    ];
                }
            }
        }
        *self.ui_delegate.borrow_mut() = delegate;
    }

    pub fn add_observer(
        &self,
        observer: &Rc<Observer>,
        key_path: &str,
        options: &[KeyValueObservingOption],
    ) -> Result<()> {
        observer.host.attach(&self.self_rc());
        let key_path = NSString::from_str(key_path);
        let mut native_options: usize = 0;
        for option in options {
            native_options |= match option {
                KeyValueObservingOption::NewValue => KVO_OPTION_NEW,
                KeyValueObservingOption::OldValue => KVO_OPTION_OLD,
                KeyValueObservingOption::InitialValue => KVO_OPTION_INITIAL,
                KeyValueObservingOption::PriorNotification => 0x08,
            };
        }
        // SAFETY: the observer object implements observeValueForKeyPath and
        // stays alive while installed (its wrapper is registered).
        unsafe {
            let _: () = msg_send![
                &self.webview,
                addObserver: &*observer.objc,
                forKeyPath: &*key_path,
                options: native_options,
                context: std::ptr::null_mut::<std::ffi::c_void>(),
            ];
        }
        Ok(())
    }

    pub fn remove_observer(&self, observer: &Rc<Observer>, key_path: &str) -> Result<()> {
        let key_path = NSString::from_str(key_path);
        // SAFETY: removing an installed observer; WebKit ignores unknown
        // pairs on modern runtimes.
        unsafe {
            let _: () = msg_send![
                &self.webview,
                removeObserver: &*observer.objc,
                forKeyPath: &*key_path,
            ];
        }
        Ok(())
    }

    fn self_rc(&self) -> Rc<Self> {
        self.self_weak.upgrade().expect("web view is alive")
    }
}

impl NativeBacked for WebView {
    type Native = NativeWebView;

    fn native_ptr(&self) -> *const NativeWebView {
        Retained::as_ptr(&self.webview)
    }
}
