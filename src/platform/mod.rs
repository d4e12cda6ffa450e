//! # Platform capability table
//!
//! Everything that differs between mini-program hosts lives behind the
//! [`Platform`] trait: reserved lifecycle names, which lifecycle mounts and
//! unmounts an element, how prop updates reach an instance, and the exact shape
//! of the definition object handed to `Page()` / `Component()`.
//!
//! A definition picks its platform once via [`platform_for`] and keeps the
//! `&'static dyn Platform` for its whole lifetime, so the core never branches on
//! the platform name itself.

pub mod alipay;
pub mod definition;
pub mod wechat;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::HostProbe;
use crate::host::HostInstance;
use crate::value::Props;
use crate::MiniResult;

pub use alipay::Alipay;
pub use definition::{DefinitionObject, DefinitionParts, HostMethod, Slot};
pub use wechat::Wechat;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlatformName {
    #[default]
    Alipay,
    Wechat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ElementKind {
    Page,
    Component,
}

/// How new props reach a mounted component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropsUpdate {
    /// A lifecycle method receives the next props (Alipay `deriveDataFromProps`).
    Lifecycle(&'static str),
    /// A data observer keyed by the declared prop names fires and props are read
    /// back from the instance (WeChat `observers`).
    Observers,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{name} is a reserved lifecycle method and cannot be registered as an event, use {hook} instead")]
    ReservedLifecycle { name: String, hook: String },

    #[error("{name} is a reserved property of the host, choose another event name")]
    ReservedProperty { name: String },

    #[error("expected platform {expected}, but the definition is configured for {configured}")]
    PlatformMismatch {
        expected: PlatformName,
        configured: PlatformName,
    },

    #[error("expected platform {expected}, but the current runtime is not {expected}")]
    RuntimeMismatch { expected: PlatformName },

    #[error("cannot define {tag}: component2 is not enabled, set compileOptions.component2 in mini.project.json")]
    Component2Disabled { tag: String },

    #[error("host instance cannot trigger event {name}")]
    TriggerEventUnavailable { name: String },
}

pub const COMMON_PAGE_EVENTS: &[&str] = &[
    "onLoad",
    "onShow",
    "onReady",
    "onHide",
    "onPullDownRefresh",
    "onReachBottom",
    "onShareAppMessage",
    "onPageScroll",
    "onTabItemTap",
    "onResize",
    "onUnload",
];

pub const COMMON_COMPONENT_EVENTS: &[&str] = &["created", "attached", "ready", "moved", "detached"];

/// Page events a component can listen to, in their platform-neutral spelling.
pub const COMPONENT_PAGE_EVENTS: &[&str] = &["page:show", "page:hide"];

/// Property names of the definition object users may never claim.
pub const BLOCKED_PROPERTIES: &[&str] = &["mixins", "methods", "observers", "pageEvents"];

pub trait Platform: Send + Sync + std::fmt::Debug {
    fn name(&self) -> PlatformName;

    /// Whether the running process looks like this platform's runtime.
    fn tell_if_in_this_platform(&self, probe: &dyn HostProbe) -> bool;

    fn page_events(&self) -> &'static [&'static str];

    fn component_events(&self) -> &'static [&'static str];

    fn component_page_events(&self) -> &'static [&'static str] {
        COMPONENT_PAGE_EVENTS
    }

    /// Host-side name of a component page event, e.g. `page:show` to `show`.
    fn map_component_page_event(&self, name: &str) -> Option<&'static str>;

    fn blocked_properties(&self) -> &'static [&'static str] {
        BLOCKED_PROPERTIES
    }

    fn mount_lifecycle(&self, kind: ElementKind) -> &'static str;

    fn unmount_lifecycle(&self, kind: ElementKind) -> &'static str;

    fn props_update(&self) -> PropsUpdate;

    /// Whether incoming props equal to the committed ones are skipped.
    fn skip_equal_props(&self) -> bool;

    /// Whether the host hands event handler results back to the caller.
    fn supports_event_result(&self) -> bool;

    fn read_input_from_host(&self, host: &dyn HostInstance, keys: &[String]) -> Props;

    fn assemble_definition(&self, parts: DefinitionParts) -> MiniResult<DefinitionObject>;

    /// Lifecycle names the host calls on an element of this kind.
    fn exposed_events(&self, kind: ElementKind) -> &'static [&'static str] {
        match kind {
            ElementKind::Page => self.page_events(),
            ElementKind::Component => self.component_events(),
        }
    }

    fn is_reserved_lifecycle(&self, name: &str) -> bool {
        self.page_events().contains(&name) || self.component_events().contains(&name)
    }

    fn is_blocked_property(&self, name: &str) -> bool {
        self.blocked_properties().contains(&name)
    }
}

static ALIPAY: Alipay = Alipay;
static WECHAT: Wechat = Wechat;

pub fn platform_for(name: PlatformName) -> &'static dyn Platform {
    match name {
        PlatformName::Alipay => &ALIPAY,
        PlatformName::Wechat => &WECHAT,
    }
}

/// Name of the dedicated hook for a lifecycle event, e.g. `onShow` to `useOnShow`.
pub fn lifecycle_hook_name(event: &str) -> String {
    let mut chars = event.chars();
    match chars.next() {
        Some(first) => format!("use{}{}", first.to_uppercase(), chars.as_str()),
        None => "use".to_string(),
    }
}
