//! Wire-facing data types.
//!
//! Everything a call carries besides identifiers: requests, scripts,
//! navigation metadata, errors, cookies, authentication shapes. All types
//! serialize to plain JSON so any transport codec can carry them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A URL request the peer asks a web view to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRequest {
    /// Request URL.
    pub url: String,
    /// HTTP method; `None` means GET.
    #[serde(default)]
    pub http_method: Option<String>,
    /// Raw request body.
    #[serde(default)]
    pub http_body: Option<Vec<u8>>,
    /// Additional request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl UrlRequest {
    /// A plain GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_method: None,
            http_body: None,
            headers: HashMap::new(),
        }
    }
}

/// When a user script is injected into a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserScriptInjectionTime {
    AtDocumentStart,
    AtDocumentEnd,
}

/// A script installed on a user content controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScript {
    /// JavaScript source.
    pub source: String,
    /// Injection point.
    pub injection_time: UserScriptInjectionTime,
    /// Whether the script runs only in the main frame.
    pub is_main_frame_only: bool,
}

/// A message posted from page JavaScript to a named handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMessage {
    /// Handler name the page posted to.
    pub name: String,
    /// Message body.
    pub body: serde_json::Value,
}

/// What triggered a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationType {
    LinkActivated,
    FormSubmitted,
    BackForward,
    Reload,
    FormResubmitted,
    Other,
}

/// The frame a navigation targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    /// Whether the frame is the page's main frame.
    pub is_main_frame: bool,
}

/// A navigation the delegate is asked to allow or cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationAction {
    /// The request that would be loaded.
    pub request: UrlRequest,
    /// The target frame.
    pub target_frame: FrameInfo,
    /// What triggered the navigation.
    pub navigation_type: NavigationType,
}

/// The peer's verdict on a navigation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationPolicy {
    Allow,
    Cancel,
}

/// A navigation failure reported by the web content process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebError {
    /// Numeric error code.
    pub code: i64,
    /// Error domain the code belongs to.
    pub domain: String,
    /// Localized description.
    pub description: String,
}

/// The protection space of an authentication challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionSpace {
    /// Challenged host.
    pub host: String,
    /// Challenged port.
    pub port: u16,
    /// Authentication realm, if the scheme has one.
    #[serde(default)]
    pub realm: Option<String>,
    /// Authentication method constant.
    #[serde(default)]
    pub authentication_method: Option<String>,
}

/// How the peer answers an authentication challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthDisposition {
    UseCredential,
    PerformDefaultHandling,
    CancelAuthenticationChallenge,
    RejectProtectionSpace,
}

/// How long a credential is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialPersistence {
    None,
    ForSession,
    Permanent,
}

/// A username/password credential supplied by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub user: String,
    pub password: String,
    pub persistence: CredentialPersistence,
}

/// The peer's full answer to an authentication challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// What to do with the challenge.
    pub disposition: AuthDisposition,
    /// Credential to use when the disposition requires one.
    #[serde(default)]
    pub credential: Option<Credential>,
}

/// Media capture a page may request permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaCaptureType {
    Camera,
    Microphone,
    CameraAndMicrophone,
}

/// The peer's answer to a media capture permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionDecision {
    Deny,
    Grant,
    Prompt,
}

/// Media types that require a user gesture before playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudiovisualMediaType {
    None,
    Audio,
    Video,
    All,
}

/// Website data kinds a data store can clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WebsiteDataType {
    Cookies,
    MemoryCache,
    DiskCache,
    OfflineWebApplicationCache,
    LocalStorage,
    SessionStorage,
    WebSqlDatabases,
    IndexedDbDatabases,
}

/// An HTTP cookie the peer installs into a data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub is_secure: bool,
    #[serde(default)]
    pub is_http_only: bool,
    /// Expiry as seconds since the Unix epoch; `None` for a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
}

/// Observation options for key-value observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyValueObservingOption {
    NewValue,
    OldValue,
    InitialValue,
    PriorNotification,
}

/// One entry of a key-value change dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyValueChangeKey {
    Kind,
    NewValue,
    OldValue,
    IndexSet,
    Notification,
}

/// A key-value change delivered to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueChange {
    pub key: KeyValueChangeKey,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_request_defaults_on_deserialize() {
        let request: UrlRequest =
            serde_json::from_value(json!({ "url": "https://example.com" })).unwrap();
        assert_eq!(request, UrlRequest::get("https://example.com"));
    }

    #[test]
    fn test_navigation_action_round_trips() {
        let action = NavigationAction {
            request: UrlRequest::get("https://example.com/a"),
            target_frame: FrameInfo {
                is_main_frame: true,
            },
            navigation_type: NavigationType::LinkActivated,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["navigationType"], json!("linkActivated"));
        assert_eq!(value["targetFrame"]["isMainFrame"], json!(true));
        let back: NavigationAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_auth_response_credential_is_optional() {
        let response: AuthResponse =
            serde_json::from_value(json!({ "disposition": "performDefaultHandling" })).unwrap();
        assert_eq!(response.disposition, AuthDisposition::PerformDefaultHandling);
        assert!(response.credential.is_none());
    }
}
