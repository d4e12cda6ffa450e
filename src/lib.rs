//! # minifish
//!
//! Hooks-style components for Alipay and WeChat mini-program hosts.
//!
//! A component is a function of its input that reads state through hooks and
//! returns a data object. [`define_element`] turns it into the definition table a
//! mini-program runtime consumes (`Page()` / `Component()`); from then on the
//! host drives it through lifecycle calls:
//!
//! - [`HandlerRegistry`] routes every named host call to the handlers registered
//!   for the calling instance.
//! - [`LifecycleBinder`] maps mount, unmount and props-update onto each
//!   platform's lifecycle names and guards reserved names.
//! - [`InstanceMount`] keeps one record per live instance and renders them.
//! - [`DataSync`] pushes render output back with minimal `set_data` patches.
//!
//! The [`simulator`] module runs definitions in-process.

pub mod capability;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod handler_registry;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod mini_hooks;
pub mod mount;
pub mod platform;
pub mod renderer;
pub mod simulator;
pub mod sync;
pub mod value;

// Re-exports
pub use capability::{CapabilityCache, Component2Status, HostProbe, StaticProbe};
pub use config::MiniConfig;
pub use context::ElementContext;
pub use element::{
    alipay_component, alipay_page, define_element, wechat_component, wechat_page, Definition,
    ElementOptions,
};
pub use error::{Error, MiniResult};
pub use handler_registry::{DispatchOutcome, HandlerRegistry, HandlerReturn};
pub use host::{HostInstance, HostRef, InstanceMarker, InstanceSlot};
pub use identity::Identity;
pub use lifecycle::{LifecycleBinder, LifecycleHook};
pub use mini_hooks::{EventOptions, MiniHooks};
pub use mount::{InstanceMount, DATA_BYPASS_KEY};
pub use platform::{ElementKind, PlatformName};
pub use renderer::{Deps, Hooks};
pub use sync::DataSync;
pub use value::{DataMap, HostValue, Props};
