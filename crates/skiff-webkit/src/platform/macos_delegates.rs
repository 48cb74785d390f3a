//! Runtime-registered ObjC delegate classes.
//!
//! These classes use fixed names (`SkiffNavigationDelegate`,
//! `SkiffScriptMessageHandler`, `SkiffUiDelegate`, `SkiffKeyValueObserver`)
//! shared across all bridge instances in a process. The method
//! implementations are identical for every instance - they forward to the
//! per-instance [`DelegateHost`] stored in an ivar - so first-registration
//! races between identically-built copies are benign.

use std::cell::RefCell;
use std::ffi::{c_void, CStr};
use std::rc::{Rc, Weak};

use block2::{Block, RcBlock};
use objc2::rc::Retained;
use objc2::runtime::{AnyClass, AnyObject, AnyProtocol, ClassBuilder, Sel};
use objc2::{msg_send, sel, ClassType, MainThreadMarker};
use objc2_foundation::{NSInteger, NSObject, NSString};
use objc2_web_kit::{
    WKUserContentController as NativeUserContentController, WKWebView as NativeWebView,
    WKWebsiteDataStore as NativeDataStore,
};
use serde_json::{json, Value};

use crate::capabilities::navigation::NavigationForwarder;
use crate::capabilities::object::KvoForwarder;
use crate::capabilities::script_channel::ScriptMessageForwarder;
use crate::capabilities::ui_delegate::UiForwarder;
use crate::platform::macos::{UserContentController, WebView, WebViewConfiguration};
use crate::types::{
    AuthDisposition, CredentialPersistence, FrameInfo, HttpCookie, KeyValueChange,
    KeyValueChangeKey, MediaCaptureType, NavigationAction, NavigationPolicy, NavigationType,
    ProtectionSpace, ScriptMessage, UrlRequest, WebError,
};

/// Ivar holding the `*const DelegateHost` pointer on each instance.
const HOST_IVAR: &CStr = c"_skiffHost";

/// NSKeyValueObservingOptions bits.
pub(crate) const KVO_OPTION_NEW: usize = 0x01;
pub(crate) const KVO_OPTION_OLD: usize = 0x02;
pub(crate) const KVO_OPTION_INITIAL: usize = 0x04;

/// A wrapper that fronts exactly one native object.
pub(crate) trait NativeBacked {
    type Native;
    fn native_ptr(&self) -> *const Self::Native;
}

/// Per-instance state the ObjC callbacks reach through the ivar: the
/// forwarder plus the wrappers the delegate is installed on, so a raw
/// native pointer can be mapped back to its wrapper.
pub(crate) struct DelegateHost<F, T: NativeBacked = WebView> {
    pub(crate) forwarder: F,
    attached: RefCell<Vec<Weak<T>>>,
}

impl<F, T: NativeBacked> DelegateHost<F, T> {
    pub(crate) fn new(forwarder: F) -> Self {
        Self {
            forwarder,
            attached: RefCell::new(Vec::new()),
        }
    }

    /// Remember a wrapper; dead entries are pruned on each attach.
    pub(crate) fn attach(&self, target: &Rc<T>) {
        let mut attached = self.attached.borrow_mut();
        attached.retain(|weak| weak.strong_count() > 0);
        if !attached
            .iter()
            .any(|weak| weak.as_ptr() == Rc::as_ptr(target))
        {
            attached.push(Rc::downgrade(target));
        }
    }

    fn resolve(&self, native: *const T::Native) -> Option<Rc<T>> {
        self.attached
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|wrapper| wrapper.native_ptr() == native)
    }
}

/// Read the host pointer back out of an instance's ivar.
///
/// # Safety
///
/// `this` must be an instance of a class built by this module whose ivar
/// was initialized with a `DelegateHost<F, T>` of the same parameters,
/// still alive.
unsafe fn host_from_ivar<'a, F, T: NativeBacked>(
    this: &'a AnyObject,
) -> Option<&'a DelegateHost<F, T>> {
    let ivar = this.class().instance_variable(HOST_IVAR)?;
    // SAFETY: ivar was written once at construction and never mutated.
    let ptr: *const c_void = unsafe { *ivar.load_ptr::<*const c_void>(this) };
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees the pointed-to host is alive and matches.
    Some(unsafe { &*(ptr as *const DelegateHost<F, T>) })
}

/// Allocate an instance of `cls` and store the host pointer in its ivar.
///
/// # Safety
///
/// `host` must outlive the returned object.
unsafe fn instantiate<F, T: NativeBacked>(
    cls: &AnyClass,
    host: *const DelegateHost<F, T>,
) -> Retained<AnyObject> {
    // SAFETY: standard ObjC alloc pattern on a class we just built.
    let obj: *mut AnyObject = unsafe { msg_send![cls, alloc] };
    // SAFETY: init on a freshly allocated object.
    let obj: *mut AnyObject = unsafe { msg_send![obj, init] };
    assert!(!obj.is_null(), "alloc+init returned nil");

    let ivar = cls
        .instance_variable(HOST_IVAR)
        .expect("host ivar must exist");
    // SAFETY: obj is a freshly init'd instance; no shared ref exists yet.
    unsafe {
        let slot: *mut *const c_void = ivar.load_ptr(&*obj);
        *slot = host as *const c_void;
    }

    // SAFETY: alloc+init returned a +1 retained, non-null object.
    unsafe { Retained::from_raw(obj) }.unwrap()
}

/// Build (or fetch) a class with the host ivar and the given protocol.
fn delegate_class(
    name: &CStr,
    protocol: Option<&CStr>,
    add_methods: impl FnOnce(&mut ClassBuilder),
) -> &'static AnyClass {
    if let Some(existing) = AnyClass::get(name) {
        return existing;
    }

    let superclass = NSObject::class();
    let mut builder = match ClassBuilder::new(name, superclass) {
        Some(b) => b,
        // Another registration won the race between the AnyClass::get check
        // and this point. Look it up again.
        None => {
            return AnyClass::get(name)
                .expect("class must exist after ClassBuilder::new returned None");
        }
    };

    builder.add_ivar::<*const c_void>(HOST_IVAR);
    if let Some(protocol) = protocol {
        if let Some(proto) = AnyProtocol::get(protocol) {
            builder.add_protocol(proto);
        }
    }
    add_methods(&mut builder);
    builder.register()
}

// ---------------------------------------------------------------------------
// ObjC value helpers
// ---------------------------------------------------------------------------

fn string_from_ns(object: *const AnyObject) -> Option<String> {
    if object.is_null() {
        return None;
    }
    // SAFETY: caller passes an NSString (or nil, handled above).
    let ns: &NSString = unsafe { &*(object as *const NSString) };
    Some(ns.to_string())
}

/// Best-effort conversion of a native value to JSON: strings pass through,
/// numbers and booleans via NSNumber, anything else through its
/// description.
fn ns_object_to_json(object: *const AnyObject) -> Value {
    if object.is_null() {
        return Value::Null;
    }
    // SAFETY: the caller hands us a valid object.
    let this: &AnyObject = unsafe { &*object };

    if let Some(string_class) = AnyClass::get(c"NSString") {
        // SAFETY: isKindOfClass: is valid on any object.
        let is_string: bool = unsafe { msg_send![this, isKindOfClass: string_class] };
        if is_string {
            return json!(string_from_ns(object));
        }
    }

    if let Some(number_class) = AnyClass::get(c"NSNumber") {
        // SAFETY: isKindOfClass: is valid on any object.
        let is_number: bool = unsafe { msg_send![this, isKindOfClass: number_class] };
        if is_number {
            // SAFETY: objCType is valid on any NSNumber and returns a
            // static C string.
            let encoding: *const std::ffi::c_char = unsafe { msg_send![this, objCType] };
            // SAFETY: checked non-null before the read.
            let is_bool =
                !encoding.is_null() && unsafe { *encoding } == b'c' as std::ffi::c_char;
            if is_bool {
                // SAFETY: boolValue is valid on any NSNumber.
                let value: bool = unsafe { msg_send![this, boolValue] };
                return json!(value);
            }
            // SAFETY: doubleValue is valid on any NSNumber.
            let value: f64 = unsafe { msg_send![this, doubleValue] };
            return json!(value);
        }
    }

    // SAFETY: description is valid on any object.
    let description: *const AnyObject = unsafe { msg_send![this, description] };
    json!(string_from_ns(description))
}

fn request_from_ns(request: *const AnyObject) -> UrlRequest {
    // SAFETY: URL is valid on any NSURLRequest.
    let url: *const AnyObject = unsafe { msg_send![request, URL] };
    let url_string: *const AnyObject = if url.is_null() {
        std::ptr::null()
    } else {
        // SAFETY: absoluteString is valid on any NSURL.
        unsafe { msg_send![url, absoluteString] }
    };
    // SAFETY: HTTPMethod is valid on any NSURLRequest.
    let method: *const AnyObject = unsafe { msg_send![request, HTTPMethod] };
    UrlRequest {
        url: string_from_ns(url_string).unwrap_or_default(),
        http_method: string_from_ns(method),
        http_body: None,
        headers: Default::default(),
    }
}

fn action_from_ns(action: *const AnyObject) -> NavigationAction {
    // SAFETY: request is valid on any WKNavigationAction.
    let request: *const AnyObject = unsafe { msg_send![action, request] };
    // SAFETY: targetFrame is valid on any WKNavigationAction (nullable).
    let frame: *const AnyObject = unsafe { msg_send![action, targetFrame] };
    let is_main_frame = if frame.is_null() {
        false
    } else {
        // SAFETY: isMainFrame is valid on any WKFrameInfo.
        unsafe { msg_send![frame, isMainFrame] }
    };
    // SAFETY: navigationType is valid on any WKNavigationAction.
    let navigation_type: NSInteger = unsafe { msg_send![action, navigationType] };
    NavigationAction {
        request: request_from_ns(request),
        target_frame: FrameInfo { is_main_frame },
        navigation_type: match navigation_type {
            0 => NavigationType::LinkActivated,
            1 => NavigationType::FormSubmitted,
            2 => NavigationType::BackForward,
            3 => NavigationType::Reload,
            4 => NavigationType::FormResubmitted,
            _ => NavigationType::Other,
        },
    }
}

// ---------------------------------------------------------------------------
// SkiffNavigationDelegate (WKNavigationDelegate)
// ---------------------------------------------------------------------------

fn navigation_delegate_class() -> &'static AnyClass {
    delegate_class(
        c"SkiffNavigationDelegate",
        Some(c"WKNavigationDelegate"),
        |builder| {
            // SAFETY: the signatures match the WKNavigationDelegate protocol.
            unsafe {
                builder.add_method(
                    sel!(webView:didStartProvisionalNavigation:),
                    did_start_provisional_navigation
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                        ),
                );
                builder.add_method(
                    sel!(webView:didFinishNavigation:),
                    did_finish_navigation
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                        ),
                );
                builder.add_method(
                    sel!(webView:didFailNavigation:withError:),
                    did_fail_navigation
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                            *const AnyObject,
                        ),
                );
                builder.add_method(
                    sel!(webView:didFailProvisionalNavigation:withError:),
                    did_fail_navigation
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                            *const AnyObject,
                        ),
                );
                builder.add_method(
                    sel!(webViewWebContentProcessDidTerminate:),
                    web_content_process_did_terminate
                        as unsafe extern "C-unwind" fn(*mut AnyObject, Sel, *const AnyObject),
                );
                builder.add_method(
                    sel!(webView:decidePolicyForNavigationAction:decisionHandler:),
                    decide_policy_for_navigation_action
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                            *mut AnyObject,
                        ),
                );
                builder.add_method(
                    sel!(webView:didReceiveAuthenticationChallenge:completionHandler:),
                    did_receive_authentication_challenge
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                            *mut AnyObject,
                        ),
                );
            }
        },
    )
}

/// Resolve the `(host, wrapper)` pair every navigation callback needs.
fn navigation_env<'a>(
    this: &'a AnyObject,
    webview: *const AnyObject,
) -> Option<(&'a DelegateHost<NavigationForwarder>, Rc<WebView>)> {
    // SAFETY: the receiver is a SkiffNavigationDelegate whose ivar holds a
    // live NavigationForwarder host (the wrapper owns both).
    let host = unsafe { host_from_ivar::<NavigationForwarder, WebView>(this) }?;
    let wrapper = host.resolve(webview as *const NativeWebView)?;
    Some((host, wrapper))
}

unsafe extern "C-unwind" fn did_start_provisional_navigation(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    _navigation: *const AnyObject,
) {
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    let Some((host, wrapper)) = navigation_env(this, webview) else {
        return;
    };
    host.forwarder
        .did_start_provisional_navigation(&wrapper, wrapper.url());
}

unsafe extern "C-unwind" fn did_finish_navigation(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    _navigation: *const AnyObject,
) {
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    let Some((host, wrapper)) = navigation_env(this, webview) else {
        return;
    };
    host.forwarder.did_finish_navigation(&wrapper, wrapper.url());
}

unsafe extern "C-unwind" fn did_fail_navigation(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    _navigation: *const AnyObject,
    error: *const AnyObject,
) {
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    let Some((host, wrapper)) = navigation_env(this, webview) else {
        return;
    };
    // SAFETY: code/domain/localizedDescription are valid on any NSError.
    let code: NSInteger = unsafe { msg_send![error, code] };
    // SAFETY: see above.
    let domain: *const AnyObject = unsafe { msg_send![error, domain] };
    // SAFETY: see above.
    let description: *const AnyObject = unsafe { msg_send![error, localizedDescription] };
    host.forwarder.did_fail_navigation(
        &wrapper,
        WebError {
            code: code as i64,
            domain: string_from_ns(domain).unwrap_or_default(),
            description: string_from_ns(description).unwrap_or_default(),
        },
    );
}

unsafe extern "C-unwind" fn web_content_process_did_terminate(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
) {
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    let Some((host, wrapper)) = navigation_env(this, webview) else {
        return;
    };
    host.forwarder.web_content_process_did_terminate(&wrapper);
}

unsafe extern "C-unwind" fn decide_policy_for_navigation_action(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    action: *const AnyObject,
    decision_handler: *mut AnyObject,
) {
    let handler = decision_handler as *mut Block<dyn Fn(NSInteger)>;
    // SAFETY: WebKit hands us a policy block; copying moves it to the heap
    // so it can be called after this callback returns.
    let Some(handler) = (unsafe { RcBlock::copy(handler) }) else {
        return;
    };
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    let Some((host, wrapper)) = navigation_env(this, webview) else {
        // No wrapper attached: WKNavigationActionPolicyAllow.
        // SAFETY: the block takes one NSInteger.
        unsafe { handler.call((1,)) };
        return;
    };
    host.forwarder.decide_policy_for_navigation_action(
        &wrapper,
        action_from_ns(action),
        Box::new(move |policy| {
            let native: NSInteger = match policy {
                NavigationPolicy::Cancel => 0,
                NavigationPolicy::Allow => 1,
            };
            // SAFETY: the block takes one NSInteger.
            unsafe { handler.call((native,)) };
        }),
    );
}

unsafe extern "C-unwind" fn did_receive_authentication_challenge(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    challenge: *const AnyObject,
    completion_handler: *mut AnyObject,
) {
    let handler = completion_handler as *mut Block<dyn Fn(NSInteger, *mut AnyObject)>;
    // SAFETY: WebKit hands us a (disposition, credential) block; copied for
    // the asynchronous reply.
    let Some(handler) = (unsafe { RcBlock::copy(handler) }) else {
        return;
    };
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    let Some((host, wrapper)) = navigation_env(this, webview) else {
        // NSURLSessionAuthChallengePerformDefaultHandling.
        // SAFETY: the block takes (NSInteger, id).
        unsafe { handler.call((1, std::ptr::null_mut())) };
        return;
    };

    // SAFETY: protectionSpace is valid on any NSURLAuthenticationChallenge.
    let space: *const AnyObject = unsafe { msg_send![challenge, protectionSpace] };
    // SAFETY: host/port/realm/authenticationMethod are valid on any
    // NSURLProtectionSpace.
    let ns_host: *const AnyObject = unsafe { msg_send![space, host] };
    // SAFETY: see above.
    let port: NSInteger = unsafe { msg_send![space, port] };
    // SAFETY: see above.
    let realm: *const AnyObject = unsafe { msg_send![space, realm] };
    // SAFETY: see above.
    let method: *const AnyObject = unsafe { msg_send![space, authenticationMethod] };

    let protection_space = ProtectionSpace {
        host: string_from_ns(ns_host).unwrap_or_default(),
        port: port as u16,
        realm: string_from_ns(realm),
        authentication_method: string_from_ns(method),
    };

    host.forwarder.did_receive_authentication_challenge(
        &wrapper,
        protection_space,
        Box::new(move |response| {
            let disposition: NSInteger = match response.disposition {
                AuthDisposition::UseCredential => 0,
                AuthDisposition::PerformDefaultHandling => 1,
                AuthDisposition::CancelAuthenticationChallenge => 2,
                AuthDisposition::RejectProtectionSpace => 3,
            };
            let credential: *mut AnyObject = match &response.credential {
                Some(credential) => {
                    let user = NSString::from_str(&credential.user);
                    let password = NSString::from_str(&credential.password);
                    let persistence: NSInteger = match credential.persistence {
                        CredentialPersistence::None => 0,
                        CredentialPersistence::ForSession => 1,
                        CredentialPersistence::Permanent => 2,
                    };
                    let cls = AnyClass::get(c"NSURLCredential")
                        .expect("NSURLCredential is always available");
                    // SAFETY: standard convenience constructor; the
                    // autoreleased result is consumed synchronously by the
                    // handler.
                    unsafe {
                        msg_send![
                            cls,
                            credentialWithUser: &*user,
                            password: &*password,
                            persistence: persistence,
                        ]
                    }
                }
                None => std::ptr::null_mut(),
            };
            // SAFETY: the block takes (NSInteger, id).
            unsafe { handler.call((disposition, credential)) };
        }),
    );
}

/// Allocate a SkiffNavigationDelegate wired to `host`.
///
/// # Safety
///
/// `host` must outlive the returned object. Must be called from the main
/// thread.
pub(crate) unsafe fn new_navigation_delegate(
    host: &DelegateHost<NavigationForwarder>,
    _mtm: MainThreadMarker,
) -> Retained<AnyObject> {
    // SAFETY: per this function's contract.
    unsafe { instantiate(navigation_delegate_class(), host) }
}

// ---------------------------------------------------------------------------
// SkiffScriptMessageHandler (WKScriptMessageHandler)
// ---------------------------------------------------------------------------

fn script_message_handler_class() -> &'static AnyClass {
    delegate_class(
        c"SkiffScriptMessageHandler",
        Some(c"WKScriptMessageHandler"),
        |builder| {
            // SAFETY: the signature matches the WKScriptMessageHandler
            // protocol.
            unsafe {
                builder.add_method(
                    sel!(userContentController:didReceiveScriptMessage:),
                    did_receive_script_message
                        as unsafe extern "C-unwind" fn(
                            *mut AnyObject,
                            Sel,
                            *const AnyObject,
                            *const AnyObject,
                        ),
                );
            }
        },
    )
}

unsafe extern "C-unwind" fn did_receive_script_message(
    this: *mut AnyObject,
    _cmd: Sel,
    controller: *const AnyObject,
    message: *const AnyObject,
) {
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    // SAFETY: the ivar holds a live ScriptMessageForwarder host.
    let Some(host) =
        (unsafe { host_from_ivar::<ScriptMessageForwarder, UserContentController>(this) })
    else {
        return;
    };
    // The controller attached this handler at add time, so the wrapper the
    // peer knows resolves here.
    let Some(controller) = host.resolve(controller as *const NativeUserContentController) else {
        return;
    };

    // SAFETY: name/body are valid on any WKScriptMessage.
    let name: *const AnyObject = unsafe { msg_send![message, name] };
    // SAFETY: see above.
    let body: *const AnyObject = unsafe { msg_send![message, body] };

    host.forwarder.did_receive_script_message(
        &controller,
        ScriptMessage {
            name: string_from_ns(name).unwrap_or_default(),
            body: ns_object_to_json(body),
        },
    );
}

/// Allocate a SkiffScriptMessageHandler wired to `host`.
///
/// # Safety
///
/// `host` must outlive the returned object. Must be called from the main
/// thread.
pub(crate) unsafe fn new_script_message_handler(
    host: &DelegateHost<ScriptMessageForwarder, UserContentController>,
    _mtm: MainThreadMarker,
) -> Retained<AnyObject> {
    // SAFETY: per this function's contract.
    unsafe { instantiate(script_message_handler_class(), host) }
}

// ---------------------------------------------------------------------------
// SkiffUiDelegate (WKUIDelegate)
// ---------------------------------------------------------------------------

fn ui_delegate_class() -> &'static AnyClass {
    delegate_class(c"SkiffUiDelegate", Some(c"WKUIDelegate"), |builder| {
        // SAFETY: the signatures match the WKUIDelegate protocol.
        unsafe {
            builder.add_method(
                sel!(webView:createWebViewWithConfiguration:forNavigationAction:windowFeatures:),
                create_web_view_with_configuration
                    as unsafe extern "C-unwind" fn(
                        *mut AnyObject,
                        Sel,
                        *const AnyObject,
                        *const AnyObject,
                        *const AnyObject,
                        *const AnyObject,
                    ) -> *mut AnyObject,
            );
            builder.add_method(
                sel!(webView:requestMediaCapturePermissionForOrigin:initiatedByFrame:type:decisionHandler:),
                request_media_capture_permission
                    as unsafe extern "C-unwind" fn(
                        *mut AnyObject,
                        Sel,
                        *const AnyObject,
                        *const AnyObject,
                        *const AnyObject,
                        NSInteger,
                        *mut AnyObject,
                    ),
            );
        }
    })
}

unsafe extern "C-unwind" fn create_web_view_with_configuration(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    configuration: *const AnyObject,
    action: *const AnyObject,
    _window_features: *const AnyObject,
) -> *mut AnyObject {
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    // SAFETY: the ivar holds a live UiForwarder host.
    let Some(host) = (unsafe { host_from_ivar::<UiForwarder, WebView>(this) }) else {
        return std::ptr::null_mut();
    };
    let Some(wrapper) = host.resolve(webview as *const NativeWebView) else {
        return std::ptr::null_mut();
    };
    // The offered configuration is native-originated; wrap it fresh so the
    // forwarder can expose it to the peer.
    // SAFETY: WebKit hands a valid WKWebViewConfiguration.
    let offered = unsafe { WebViewConfiguration::from_native_ptr(configuration) };
    host.forwarder
        .on_create_web_view(&wrapper, &offered, action_from_ns(action));
    // The peer decides whether to build a view for the popup; nothing to
    // hand back synchronously.
    std::ptr::null_mut()
}

unsafe extern "C-unwind" fn request_media_capture_permission(
    this: *mut AnyObject,
    _cmd: Sel,
    webview: *const AnyObject,
    origin: *const AnyObject,
    _frame: *const AnyObject,
    capture_type: NSInteger,
    decision_handler: *mut AnyObject,
) {
    let handler = decision_handler as *mut Block<dyn Fn(NSInteger)>;
    // SAFETY: WebKit hands us a decision block; copied for the asynchronous
    // reply.
    let Some(handler) = (unsafe { RcBlock::copy(handler) }) else {
        return;
    };
    // SAFETY: WebKit provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    // SAFETY: the ivar holds a live UiForwarder host.
    let env = unsafe { host_from_ivar::<UiForwarder, WebView>(this) }
        .and_then(|host| Some((host, host.resolve(webview as *const NativeWebView)?)));
    let Some((host, wrapper)) = env else {
        // WKPermissionDecisionDeny.
        // SAFETY: the block takes one NSInteger.
        unsafe { handler.call((2,)) };
        return;
    };

    // SAFETY: host is valid on any WKSecurityOrigin.
    let origin_host: *const AnyObject = unsafe { msg_send![origin, host] };
    let capture = match capture_type {
        0 => MediaCaptureType::Camera,
        1 => MediaCaptureType::Microphone,
        _ => MediaCaptureType::CameraAndMicrophone,
    };
    host.forwarder.request_media_capture_permission(
        &wrapper,
        string_from_ns(origin_host).unwrap_or_default(),
        capture,
        Box::new(move |decision| {
            // WKPermissionDecision: prompt = 0, grant = 1, deny = 2.
            let native: NSInteger = match decision {
                crate::types::PermissionDecision::Prompt => 0,
                crate::types::PermissionDecision::Grant => 1,
                crate::types::PermissionDecision::Deny => 2,
            };
            // SAFETY: the block takes one NSInteger.
            unsafe { handler.call((native,)) };
        }),
    );
}

/// Allocate a SkiffUiDelegate wired to `host`.
///
/// # Safety
///
/// `host` must outlive the returned object. Must be called from the main
/// thread.
pub(crate) unsafe fn new_ui_delegate(
    host: &DelegateHost<UiForwarder>,
    _mtm: MainThreadMarker,
) -> Retained<AnyObject> {
    // SAFETY: per this function's contract.
    unsafe { instantiate(ui_delegate_class(), host) }
}

// ---------------------------------------------------------------------------
// SkiffKeyValueObserver
// ---------------------------------------------------------------------------

fn key_value_observer_class() -> &'static AnyClass {
    delegate_class(c"SkiffKeyValueObserver", None, |builder| {
        // SAFETY: the signature matches NSObject's KVO callback.
        unsafe {
            builder.add_method(
                sel!(observeValueForKeyPath:ofObject:change:context:),
                observe_value_for_key_path
                    as unsafe extern "C-unwind" fn(
                        *mut AnyObject,
                        Sel,
                        *const AnyObject,
                        *const AnyObject,
                        *const AnyObject,
                        *mut c_void,
                    ),
            );
        }
    })
}

unsafe extern "C-unwind" fn observe_value_for_key_path(
    this: *mut AnyObject,
    _cmd: Sel,
    key_path: *const AnyObject,
    object: *const AnyObject,
    change: *const AnyObject,
    _context: *mut c_void,
) {
    // SAFETY: the runtime provides a valid receiver.
    let this: &AnyObject = unsafe { &*this };
    // SAFETY: the ivar holds a live KvoForwarder host.
    let Some(host) = (unsafe { host_from_ivar::<KvoForwarder, WebView>(this) }) else {
        return;
    };
    let Some(wrapper) = host.resolve(object as *const NativeWebView) else {
        return;
    };
    let Some(key_path) = string_from_ns(key_path) else {
        return;
    };

    // The change dictionary uses the literal key strings behind
    // NSKeyValueChangeNewKey and NSKeyValueChangeOldKey.
    let mut changes = Vec::new();
    for (key, wire_key) in [
        ("new", KeyValueChangeKey::NewValue),
        ("old", KeyValueChangeKey::OldValue),
    ] {
        let ns_key = NSString::from_str(key);
        // SAFETY: objectForKey: is valid on any NSDictionary.
        let value: *const AnyObject = unsafe { msg_send![change, objectForKey: &*ns_key] };
        if !value.is_null() {
            changes.push(KeyValueChange {
                key: wire_key,
                value: ns_object_to_json(value),
            });
        }
    }

    host.forwarder.observe_value(&key_path, &wrapper, changes);
}

/// Allocate a SkiffKeyValueObserver wired to `host`.
///
/// # Safety
///
/// `host` must outlive the returned object. Must be called from the main
/// thread.
pub(crate) unsafe fn new_key_value_observer(
    host: &DelegateHost<KvoForwarder>,
    _mtm: MainThreadMarker,
) -> Retained<AnyObject> {
    // SAFETY: per this function's contract.
    unsafe { instantiate(key_value_observer_class(), host) }
}

// ---------------------------------------------------------------------------
// Block-based async operations
// ---------------------------------------------------------------------------

/// `evaluateJavaScript:completionHandler:` with the completion adapted to a
/// Rust callback.
pub(crate) fn evaluate_javascript_completion(
    webview: &NativeWebView,
    script: &str,
    completion: Box<dyn FnOnce(std::result::Result<Value, String>)>,
) {
    let script = NSString::from_str(script);
    // The ObjC block is Fn but the Rust completion is FnOnce; WebKit calls
    // the handler exactly once, so the slot is taken on first call.
    let slot = RefCell::new(Some(completion));
    let block = RcBlock::new(move |result: *mut AnyObject, error: *mut AnyObject| {
        let Some(completion) = slot.borrow_mut().take() else {
            return;
        };
        if error.is_null() {
            completion(Ok(ns_object_to_json(result)));
        } else {
            // SAFETY: localizedDescription is valid on any NSError.
            let description: *const AnyObject =
                unsafe { msg_send![error, localizedDescription] };
            completion(Err(
                string_from_ns(description).unwrap_or_else(|| "JavaScript error".into())
            ));
        }
    });
    // SAFETY: script and block are valid; WebKit copies the block.
    unsafe {
        let _: () = msg_send![
            webview,
            evaluateJavaScript: &*script,
            completionHandler: &*block,
        ];
    }
}

/// Fetch-then-remove so the reply can report whether matching records
/// existed, as the remote contract requires.
pub(crate) fn remove_data_of_types(
    store: &NativeDataStore,
    types: &objc2_foundation::NSSet<NSString>,
    modified_since: &objc2_foundation::NSDate,
    completion: Box<dyn FnOnce(bool)>,
) {
    let store: Retained<NativeDataStore> = store.retain();
    let types: Retained<objc2_foundation::NSSet<NSString>> = types.retain();
    let modified_since: Retained<objc2_foundation::NSDate> = modified_since.retain();
    let slot = RefCell::new(Some(completion));

    let fetch_block = RcBlock::new(move |records: *mut AnyObject| {
        // SAFETY: count is valid on any NSArray.
        let count: usize = unsafe { msg_send![records, count] };
        let had_records = count > 0;
        let Some(completion) = slot.borrow_mut().take() else {
            return;
        };
        let done_slot = RefCell::new(Some(completion));
        let done_block = RcBlock::new(move || {
            if let Some(completion) = done_slot.borrow_mut().take() {
                completion(had_records);
            }
        });
        // SAFETY: all arguments are retained above; WebKit copies the block.
        unsafe {
            let _: () = msg_send![
                &*store,
                removeDataOfTypes: &*types,
                modifiedSince: &*modified_since,
                completionHandler: &*done_block,
            ];
        }
    });
    // SAFETY: the set is valid; WebKit copies the block.
    unsafe {
        let _: () = msg_send![
            store,
            fetchDataRecordsOfTypes: types,
            completionHandler: &*fetch_block,
        ];
    }
}

/// Install a cookie into the store's HTTP cookie store.
pub(crate) fn set_cookie(
    store: &NativeDataStore,
    cookie: &HttpCookie,
    completion: Box<dyn FnOnce()>,
) {
    let properties_class =
        AnyClass::get(c"NSMutableDictionary").expect("NSMutableDictionary is always available");
    // SAFETY: standard collection construction.
    let properties: *mut AnyObject = unsafe { msg_send![properties_class, dictionary] };

    let set = |key: &str, value: &str| {
        let key = NSString::from_str(key);
        let value = NSString::from_str(value);
        // SAFETY: both arguments are valid NSStrings; the dictionary copies
        // keys and retains values.
        unsafe {
            let _: () = msg_send![properties, setObject: &*value, forKey: &*key];
        }
    };
    // Literal key strings behind the NSHTTPCookie property constants.
    set("Name", &cookie.name);
    set("Value", &cookie.value);
    set("Domain", &cookie.domain);
    set("Path", &cookie.path);
    if cookie.is_secure {
        set("Secure", "TRUE");
    }
    if cookie.is_http_only {
        set("HttpOnly", "TRUE");
    }
    if let Some(expires) = cookie.expires {
        // SAFETY: dateWithTimeIntervalSince1970 accepts any interval.
        let date = unsafe { objc2_foundation::NSDate::dateWithTimeIntervalSince1970(expires) };
        let key = NSString::from_str("Expires");
        // SAFETY: as for the string properties.
        unsafe {
            let _: () = msg_send![properties, setObject: &*date, forKey: &*key];
        }
    }

    let cookie_class = AnyClass::get(c"NSHTTPCookie").expect("NSHTTPCookie is always available");
    // SAFETY: cookieWithProperties returns nil for incomplete property sets.
    let native_cookie: *mut AnyObject =
        unsafe { msg_send![cookie_class, cookieWithProperties: properties] };
    if native_cookie.is_null() {
        log::error!("cookie properties rejected for {}", cookie.name);
        completion();
        return;
    }

    // SAFETY: httpCookieStore is valid on any WKWebsiteDataStore.
    let cookie_store: *mut AnyObject = unsafe { msg_send![store, httpCookieStore] };
    let slot = RefCell::new(Some(completion));
    let block = RcBlock::new(move || {
        if let Some(completion) = slot.borrow_mut().take() {
            completion();
        }
    });
    // SAFETY: the cookie is valid and the store copies the block.
    unsafe {
        let _: () = msg_send![
            cookie_store,
            setCookie: native_cookie,
            completionHandler: &*block,
        ];
    }
}
