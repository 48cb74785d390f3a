//! Platform-specific WebKit implementations.
//!
//! Each backend exports the same set of wrapper types with identical
//! inherent APIs; the capability adapters compile against whichever one the
//! target selects. On macOS the wrappers hold real WebKit objects; the
//! headless backend stands in everywhere else.

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "macos")]
mod macos_delegates;

#[cfg(not(target_os = "macos"))]
pub mod headless;

#[cfg(target_os = "macos")]
pub use macos::{
    NavigationDelegate, Observer, ScriptMessageHandler, UiDelegate, UserContentController,
    WebView, WebViewConfiguration, WebsiteDataStore,
};

#[cfg(not(target_os = "macos"))]
pub use headless::{
    NavigationDelegate, Observer, ScriptMessageHandler, UiDelegate, UserContentController,
    WebView, WebViewConfiguration, WebsiteDataStore,
};
