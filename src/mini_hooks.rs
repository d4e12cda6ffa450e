//! # Mini hooks
//!
//! Hooks a component uses to talk to its host instance. Every hook declares its
//! event name during the definition-time pre-render, then registers a handler
//! bound to the instance identity in a mount-once effect; the effect cleanup
//! unregisters it. Registered handlers always call the closure passed on the
//! latest render.
//!
//! ```ignore
//! let page = alipay_page("Index", |hooks: &mut Hooks, _props: &Props| {
//!     let (count, set_count) = hooks.use_state(|| 0)?;
//!     hooks.use_event("onTap", move |_| {
//!         set_count.set(count + 1)?;
//!         Ok(HandlerReturn::Unit)
//!     }, EventOptions::default())?;
//!     hooks.use_lifecycle(LifecycleHook::OnShow, |_| Ok(().into()))?;
//!     Ok(json!({ "count": count }))
//! })?;
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::context::ElementContext;
use crate::handler_registry::{HandlerFn, HandlerReturn};
use crate::host::HostRef;
use crate::lifecycle::LifecycleHook;
use crate::mount::MountError;
use crate::platform::PlatformName;
use crate::renderer::{Deps, Hooks, RefHandle};
use crate::sync::DataSync;
use crate::value::{DataMap, HostValue};
use crate::{Error, MiniResult};

/// Handler passed to [`MiniHooks::use_event`] and [`MiniHooks::use_lifecycle`].
pub type EventHandler = Arc<dyn Fn(&[Value]) -> MiniResult<HandlerReturn> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOptions {
    /// The caller consumes the handler's return value.
    pub handle_result: bool,
}

/// Emits events to the parent of a WeChat component.
#[derive(Clone)]
pub struct TriggerEvent {
    host: HostRef,
}

impl TriggerEvent {
    pub fn emit(&self, name: &str, payload: Value, options: Value) -> MiniResult<()> {
        self.host.trigger_event(name, payload, options)
    }
}

#[derive(Clone, Copy)]
enum Registration {
    UserEvent,
    Lifecycle { exclusive: bool },
}

pub trait MiniHooks {
    fn element_context(&self) -> MiniResult<Arc<ElementContext>>;

    fn use_event<F>(&mut self, name: &str, handler: F, options: EventOptions) -> MiniResult<()>
    where
        F: Fn(&[Value]) -> MiniResult<HandlerReturn> + Send + Sync + 'static;

    fn use_lifecycle<F>(&mut self, hook: LifecycleHook, handler: F) -> MiniResult<()>
    where
        F: Fn(&[Value]) -> MiniResult<HandlerReturn> + Send + Sync + 'static;

    /// The host instance the component is rendered for.
    fn use_instance(&self) -> MiniResult<HostRef>;

    fn use_trigger_event(&mut self) -> MiniResult<TriggerEvent>;

    /// Pushes `data` into host state after every render.
    fn use_sync_data(&mut self, data: &DataMap) -> MiniResult<()>;
}

fn use_latest(hooks: &mut Hooks, handler: EventHandler) -> MiniResult<RefHandle<EventHandler>> {
    let latest = hooks.use_ref(|| handler.clone())?;
    *latest
        .lock()
        .map_err(|e| Error::internal(format!("handler cell poisoned: {}", e)))? = handler;
    Ok(latest)
}

fn current(latest: &RefHandle<EventHandler>) -> MiniResult<EventHandler> {
    latest
        .lock()
        .map(|handler| handler.clone())
        .map_err(|e| Error::internal(format!("handler cell poisoned: {}", e)))
}

fn use_event_call(
    hooks: &mut Hooks,
    name: &str,
    handler: EventHandler,
    registration: Registration,
) -> MiniResult<()> {
    let ctx = hooks.element_context()?;
    let latest = use_latest(hooks, handler)?;
    if ctx.server_render {
        ctx.binder.declare(name)?;
    }

    let name = name.to_string();
    hooks.use_effect(Deps::Once, move || {
        let implementation: HandlerFn<HostRef> =
            Arc::new(move |_host: &HostRef, args: &[Value]| current(&latest)?(args));
        let identity = ctx.identity.clone();
        let off = match registration {
            Registration::UserEvent => {
                ctx.binder
                    .register_user_event(&name, identity, implementation)
            }
            Registration::Lifecycle { exclusive } => {
                ctx.binder
                    .register_lifecycle(&name, identity, implementation, exclusive)
            }
        }
        .map_err(|e| e.tagged(&ctx.tag))?;
        Ok(Some(off.into_cleanup()))
    })
}

impl MiniHooks for Hooks {
    fn element_context(&self) -> MiniResult<Arc<ElementContext>> {
        self.context::<ElementContext>()
            .ok_or_else(|| Error::user("mini hooks can only be called inside a mini element"))
    }

    fn use_event<F>(&mut self, name: &str, handler: F, options: EventOptions) -> MiniResult<()>
    where
        F: Fn(&[Value]) -> MiniResult<HandlerReturn> + Send + Sync + 'static,
    {
        let ctx = self.element_context()?;
        ctx.binder
            .check_user_event(name)
            .map_err(|e| e.tagged(&ctx.tag))?;

        let handler: EventHandler = Arc::new(handler);
        if !options.handle_result || ctx.platform().supports_event_result() {
            return use_event_call(self, name, handler, Registration::UserEvent);
        }

        // the host cannot hand results back, so the handler goes on data as a method
        let latest = use_latest(self, handler)?;
        let name = name.to_string();
        self.use_effect(Deps::Once, move || {
            if ctx.instance.slot().prop_keys().contains(&name) {
                return Err(Error::from(MountError::EventResultConflict { name }).tagged(&ctx.tag));
            }
            let method_name = name.clone();
            let method = HostValue::method(move |args: &[Value]| match current(&latest)?(args)? {
                HandlerReturn::Value(value) => Ok(value),
                HandlerReturn::Pending(_) => {
                    warn!(name = %method_name, "pending result cannot be returned through data");
                    Ok(Value::Null)
                }
                HandlerReturn::Unit | HandlerReturn::Cleanup(_) => Ok(Value::Null),
            });
            let mut patch = DataMap::new();
            patch.insert(name, method);
            ctx.instance.set_data(patch)?;
            Ok(None)
        })
    }

    fn use_lifecycle<F>(&mut self, hook: LifecycleHook, handler: F) -> MiniResult<()>
    where
        F: Fn(&[Value]) -> MiniResult<HandlerReturn> + Send + Sync + 'static,
    {
        let ctx = self.element_context()?;
        if let Some(required) = hook.required_platform() {
            ctx.binder
                .guard_platform(required)
                .map_err(|e| e.tagged(&ctx.tag))?;
        }
        use_event_call(
            self,
            hook.event_name(),
            Arc::new(handler),
            Registration::Lifecycle {
                exclusive: hook.is_exclusive(),
            },
        )
    }

    fn use_instance(&self) -> MiniResult<HostRef> {
        Ok(self.element_context()?.instance.clone())
    }

    fn use_trigger_event(&mut self) -> MiniResult<TriggerEvent> {
        let ctx = self.element_context()?;
        ctx.binder
            .guard_platform(PlatformName::Wechat)
            .map_err(|e| e.tagged(&ctx.tag))?;
        Ok(TriggerEvent {
            host: ctx.instance.clone(),
        })
    }

    fn use_sync_data(&mut self, data: &DataMap) -> MiniResult<()> {
        let ctx = self.element_context()?;
        let sync = self.use_ref(DataSync::new)?;
        if ctx.server_render {
            ctx.instance.set_data(data.clone())?;
        }

        let data = data.clone();
        self.use_effect(Deps::Always, move || {
            let mut state = sync
                .lock()
                .map_err(|e| Error::internal(format!("sync state poisoned: {}", e)))?
                .clone();
            let declared = ctx.instance.slot().prop_keys();
            state
                .sync(&data, ctx.instance.as_ref(), &declared)
                .map_err(|e| e.tagged(&ctx.tag))?;
            *sync
                .lock()
                .map_err(|e| Error::internal(format!("sync state poisoned: {}", e)))? = state;
            Ok(None)
        })
    }
}
