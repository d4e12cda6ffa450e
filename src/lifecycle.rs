//! # Lifecycle Binder
//!
//! Maps the abstract mount / unmount / props-update lifecycle of an element and
//! its user-facing hooks onto [`HandlerRegistry`] registrations, enforcing the
//! platform's reserved names.
//!
//! The binder moves through `Uninitialized → Registering → Locked`. Lifecycle
//! bindings are only accepted before the lock; once locked the registry's name
//! set is frozen and the host definition object can be assembled.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::capability::HostProbe;
use crate::handler_registry::{
    Binding, ContextFilter, HandlerError, HandlerFn, HandlerRegistry, Unregister,
};
use crate::host::HostRef;
use crate::identity::Identity;
use crate::platform::{
    lifecycle_hook_name, ElementKind, Platform, PlatformError, PlatformName, PropsUpdate,
};
use crate::MiniResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinderState {
    Uninitialized,
    Registering,
    Locked,
}

/// Named lifecycle hooks exposed to components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::EnumIter)]
pub enum LifecycleHook {
    #[strum(serialize = "onShow")]
    OnShow,
    #[strum(serialize = "onReady")]
    OnReady,
    #[strum(serialize = "onHide")]
    OnHide,
    #[strum(serialize = "onPullDownRefresh")]
    OnPullDownRefresh,
    #[strum(serialize = "onReachBottom")]
    OnReachBottom,
    #[strum(serialize = "onShareAppMessage")]
    OnShareAppMessage,
    #[strum(serialize = "onPageScroll")]
    OnPageScroll,
    #[strum(serialize = "onTabItemTap")]
    OnTabItemTap,
    #[strum(serialize = "onResize")]
    OnResize,
    #[strum(serialize = "onTitleClick")]
    OnTitleClick,
    #[strum(serialize = "onOptionMenuClick")]
    OnOptionMenuClick,
    #[strum(serialize = "beforeTabItemTap")]
    BeforeTabItemTap,
    #[strum(serialize = "onKeyboardHeight")]
    OnKeyboardHeight,
    #[strum(serialize = "onBack")]
    OnBack,
    #[strum(serialize = "onSelectedTabItemTap")]
    OnSelectedTabItemTap,
    #[strum(serialize = "beforeReload")]
    BeforeReload,
    #[strum(serialize = "created")]
    Created,
    #[strum(serialize = "attached")]
    Attached,
    #[strum(serialize = "ready")]
    Ready,
    #[strum(serialize = "moved")]
    Moved,
    #[strum(serialize = "detached")]
    Detached,
    #[strum(serialize = "didMount")]
    DidMount,
    #[strum(serialize = "error")]
    Error,
    #[strum(serialize = "page:show")]
    PageShow,
    #[strum(serialize = "page:hide")]
    PageHide,
}

impl LifecycleHook {
    /// Host event name this hook listens to.
    pub fn event_name(self) -> &'static str {
        self.into()
    }

    /// Platform the hook is restricted to, if any.
    pub fn required_platform(self) -> Option<PlatformName> {
        use LifecycleHook::*;
        match self {
            OnTitleClick | OnOptionMenuClick | BeforeTabItemTap | OnKeyboardHeight | OnBack
            | OnSelectedTabItemTap | BeforeReload | DidMount => Some(PlatformName::Alipay),
            Error => Some(PlatformName::Wechat),
            _ => None,
        }
    }

    /// Exclusive hooks accept one handler per instance.
    pub fn is_exclusive(self) -> bool {
        matches!(self, LifecycleHook::OnShareAppMessage)
    }
}

pub struct LifecycleBinder {
    tag: String,
    platform: &'static dyn Platform,
    kind: ElementKind,
    registry: HandlerRegistry<HostRef>,
    probe: Arc<dyn HostProbe>,
    state: Mutex<BinderState>,
}

impl LifecycleBinder {
    pub fn new(
        tag: &str,
        platform: &'static dyn Platform,
        kind: ElementKind,
        registry: HandlerRegistry<HostRef>,
        probe: Arc<dyn HostProbe>,
    ) -> Self {
        Self {
            tag: tag.to_string(),
            platform,
            kind,
            registry,
            probe,
            state: Mutex::new(BinderState::Uninitialized),
        }
    }

    pub fn state(&self) -> BinderState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(BinderState::Locked)
    }

    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn registry(&self) -> &HandlerRegistry<HostRef> {
        &self.registry
    }

    fn begin_registering(&self) -> MiniResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| HandlerError::Poisoned(e.to_string()))?;
        match *state {
            BinderState::Locked => Err(HandlerError::BindingsLocked {
                tag: self.tag.clone(),
            }
            .into()),
            _ => {
                *state = BinderState::Registering;
                Ok(())
            }
        }
    }

    fn bind(
        &self,
        name: &str,
        filter: ContextFilter,
        implementation: HandlerFn<HostRef>,
    ) -> MiniResult<()> {
        self.begin_registering()?;
        let binding = Binding {
            filter,
            implementation,
        };
        // definition-level handlers live as long as the definition
        let _handle = self.registry.register(name, Some(binding), false)?;
        debug!(tag = %self.tag, name, "lifecycle bound");
        Ok(())
    }

    /// Binds the mount lifecycle; it only fires for identities without a live record.
    pub fn bind_mount_handler<P>(
        &self,
        is_unknown: P,
        implementation: HandlerFn<HostRef>,
    ) -> MiniResult<()>
    where
        P: Fn(&Identity) -> bool + Send + Sync + 'static,
    {
        let name = self.platform.mount_lifecycle(self.kind);
        self.bind(name, ContextFilter::predicate(is_unknown), implementation)
    }

    pub fn bind_unmount_handler(&self, implementation: HandlerFn<HostRef>) -> MiniResult<()> {
        let name = self.platform.unmount_lifecycle(self.kind);
        self.bind(name, ContextFilter::any(), implementation)
    }

    /// Binds the props-update lifecycle when the platform delivers props through
    /// one. Returns `false` for observer-based platforms.
    pub fn bind_props_handler(&self, implementation: HandlerFn<HostRef>) -> MiniResult<bool> {
        match self.platform.props_update() {
            PropsUpdate::Lifecycle(name) => {
                self.bind(name, ContextFilter::any(), implementation)?;
                Ok(true)
            }
            PropsUpdate::Observers => Ok(false),
        }
    }

    pub fn check_user_event(&self, name: &str) -> MiniResult<()> {
        if self.platform.is_reserved_lifecycle(name) {
            return Err(PlatformError::ReservedLifecycle {
                name: name.to_string(),
                hook: lifecycle_hook_name(name),
            }
            .into());
        }
        if self.platform.is_blocked_property(name) {
            return Err(PlatformError::ReservedProperty {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Registers a user event handler bound to one instance.
    pub fn register_user_event(
        &self,
        name: &str,
        identity: Identity,
        implementation: HandlerFn<HostRef>,
    ) -> MiniResult<Unregister<HostRef>> {
        self.check_user_event(name)?;
        self.register_lifecycle(name, identity, implementation, true)
    }

    pub fn register_lifecycle(
        &self,
        name: &str,
        identity: Identity,
        implementation: HandlerFn<HostRef>,
        exclusive: bool,
    ) -> MiniResult<Unregister<HostRef>> {
        let binding = Binding {
            filter: ContextFilter::Identity(identity),
            implementation,
        };
        self.registry.register(name, Some(binding), exclusive)
    }

    /// Introduces a name during pre-render.
    pub fn declare(&self, name: &str) -> MiniResult<()> {
        self.registry.declare(name)
    }

    pub fn guard_platform(&self, required: PlatformName) -> MiniResult<()> {
        let configured = self.platform.name();
        if configured != required {
            return Err(PlatformError::PlatformMismatch {
                expected: required,
                configured,
            }
            .into());
        }
        if !self.platform.tell_if_in_this_platform(self.probe.as_ref()) {
            return Err(PlatformError::RuntimeMismatch { expected: required }.into());
        }
        Ok(())
    }

    /// Locks the binder and the registry's name set. Only succeeds once.
    pub fn lock(&self) -> MiniResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| HandlerError::Poisoned(e.to_string()))?;
        if *state == BinderState::Locked {
            return Err(HandlerError::BindingsLocked {
                tag: self.tag.clone(),
            }
            .into());
        }
        self.registry.lock()?;
        *state = BinderState::Locked;
        info!(tag = %self.tag, names = ?self.registry.names(), "definition locked");
        Ok(())
    }
}
