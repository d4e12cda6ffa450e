//! # Host simulator
//!
//! An in-process stand-in for the Alipay and WeChat runtimes. A [`SimHost`]
//! owns one instance of a [`Definition`], keeps its data and props, and calls the
//! definition object's methods in the order the real runtime would:
//!
//! | element           | mount                                                   | unmount              |
//! |-------------------|---------------------------------------------------------|----------------------|
//! | page              | `onLoad(query)`, `onShow`, `onReady`                    | `onUnload`           |
//! | Alipay component  | `lifetimes.created`, `onInit`, `deriveDataFromProps`, `didMount` | `didUnmount` |
//! | WeChat component  | `lifetimes.created`, properties applied, `lifetimes.attached`, `lifetimes.ready` | `lifetimes.detached` |
//!
//! Like Alipay, the simulator calls `deriveDataFromProps` after every `set_data`
//! on a mounted component; like WeChat, it fires every observer whose keys are
//! touched by a props update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use crate::element::Definition;
use crate::handler_registry::DispatchOutcome;
use crate::host::{HostInstance, HostRef, InstanceMarker, InstanceSlot};
use crate::platform::{DefinitionObject, ElementKind, HostMethod, PlatformName};
use crate::value::{data_map_from_json, data_map_to_json, DataMap, HostValue, Props};
use crate::{Error, MiniResult};

/// An event emitted through `trigger_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredEvent {
    pub name: String,
    pub payload: Value,
    pub options: Value,
}

#[derive(Default)]
struct SimState {
    data: DataMap,
    props: Props,
    set_data_calls: Vec<DataMap>,
    events: Vec<TriggeredEvent>,
}

pub struct SimHost {
    this: Weak<SimHost>,
    object: DefinitionObject,
    platform: PlatformName,
    kind: ElementKind,
    default_props: Props,
    marker: InstanceMarker,
    slot: InstanceSlot,
    state: Mutex<SimState>,
    mounted: AtomicBool,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::internal(format!("simulator state poisoned: {}", e))
}

fn object_of(value: Value) -> Props {
    match value {
        Value::Object(map) => map,
        _ => Props::new(),
    }
}

impl SimHost {
    /// A new, unmounted instance of `definition`.
    pub fn new(definition: &Definition) -> Arc<Self> {
        let platform = definition.platform().name();
        let marker = match platform {
            PlatformName::Alipay => InstanceMarker {
                id: Some(Uuid::new_v4().to_string()),
                page_view_id: Some("sim".to_string()),
                definition_type: match definition.kind() {
                    ElementKind::Component => Some(definition.tag().to_string()),
                    ElementKind::Page => None,
                },
            },
            PlatformName::Wechat => InstanceMarker::default(),
        };
        Self::with_marker(definition, marker)
    }

    pub fn with_marker(definition: &Definition, marker: InstanceMarker) -> Arc<Self> {
        let object = definition.object().clone();
        let default_props = definition.mount().default_props().clone();
        let mut data = data_map_from_json(definition.init_data());
        if definition.platform().name() == PlatformName::Wechat {
            for (key, value) in &default_props {
                data.entry(key.clone())
                    .or_insert_with(|| HostValue::Data(value.clone()));
            }
        }

        Arc::new_cyclic(|this| SimHost {
            this: this.clone(),
            object,
            platform: definition.platform().name(),
            kind: definition.kind(),
            default_props,
            marker,
            slot: InstanceSlot::new(),
            state: Mutex::new(SimState {
                data,
                ..Default::default()
            }),
            mounted: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MiniResult<MutexGuard<'_, SimState>> {
        self.state.lock().map_err(poisoned)
    }

    fn host_ref(&self) -> MiniResult<HostRef> {
        let this: Arc<SimHost> = self
            .this
            .upgrade()
            .ok_or_else(|| Error::internal("simulated host dropped"))?;
        Ok(this)
    }

    fn invoke(&self, method: Option<HostMethod>, args: &[Value]) -> MiniResult<DispatchOutcome> {
        match method {
            Some(method) => method(&self.host_ref()?, args),
            None => Ok(DispatchOutcome::Empty),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn is_component(&self) -> bool {
        self.kind == ElementKind::Component
    }

    /// Mounts the instance. `input` is the page query or the component props.
    pub fn mount(&self, input: Value) -> MiniResult<DispatchOutcome> {
        let input = object_of(input);
        match (self.kind, self.platform) {
            (ElementKind::Page, _) => {
                let outcome = self.call_lifecycle("onLoad", &[Value::Object(input)])?;
                self.mounted.store(true, Ordering::SeqCst);
                self.call_lifecycle("onShow", &[])?;
                self.call_lifecycle("onReady", &[])?;
                Ok(outcome)
            }
            (ElementKind::Component, PlatformName::Alipay) => {
                let mut props = self.default_props.clone();
                props.extend(input);
                self.state()?.props = props.clone();
                self.call_lifecycle("created", &[])?;
                let outcome = self.call_lifecycle("onInit", &[])?;
                self.mounted.store(true, Ordering::SeqCst);
                self.call_lifecycle("deriveDataFromProps", &[Value::Object(props)])?;
                self.call_lifecycle("didMount", &[])?;
                Ok(outcome)
            }
            (ElementKind::Component, PlatformName::Wechat) => {
                self.call_lifecycle("created", &[])?;
                let declared = self.declared(input);
                self.state()?.data.extend(data_map_from_json(&Value::Object(declared)));
                let outcome = self.call_lifecycle("attached", &[])?;
                self.mounted.store(true, Ordering::SeqCst);
                self.call_lifecycle("ready", &[])?;
                Ok(outcome)
            }
        }
    }

    fn declared(&self, input: Props) -> Props {
        input
            .into_iter()
            .filter(|(key, _)| self.default_props.contains_key(key))
            .collect()
    }

    /// Delivers new props from the parent.
    pub fn update_props(&self, next: Value) -> MiniResult<()> {
        let next = object_of(next);
        match self.platform {
            PlatformName::Alipay => {
                let mut props = self.default_props.clone();
                props.extend(next);
                self.state()?.props = props.clone();
                self.call_lifecycle("deriveDataFromProps", &[Value::Object(props)])?;
            }
            PlatformName::Wechat => {
                let declared = self.declared(next);
                let touched: Vec<String> = declared.keys().cloned().collect();
                self.state()?.data.extend(data_map_from_json(&Value::Object(declared)));
                self.fire_observers(&touched)?;
            }
        }
        Ok(())
    }

    fn fire_observers(&self, touched: &[String]) -> MiniResult<()> {
        let Some(observers) = self.object.table("observers") else {
            return Ok(());
        };
        for key in observers.keys() {
            if key.split(", ").any(|k| touched.iter().any(|t| t == k)) {
                trace!(observer = key, "firing observer");
                self.invoke(observers.method(key), &[])?;
            }
        }
        Ok(())
    }

    pub fn unmount(&self) -> MiniResult<DispatchOutcome> {
        let name = match (self.kind, self.platform) {
            (ElementKind::Page, _) => "onUnload",
            (ElementKind::Component, PlatformName::Alipay) => "didUnmount",
            (ElementKind::Component, PlatformName::Wechat) => "detached",
        };
        self.mounted.store(false, Ordering::SeqCst);
        self.call_lifecycle(name, &[])
    }

    /// Calls a lifecycle the way the host would; absent lifecycles are not called.
    pub fn call_lifecycle(&self, name: &str, args: &[Value]) -> MiniResult<DispatchOutcome> {
        let method = match (self.kind, self.platform) {
            (ElementKind::Page, _) => self.object.method(name),
            (ElementKind::Component, PlatformName::Alipay) => self
                .object
                .method(name)
                .or_else(|| self.object.method_at(&["lifetimes", name])),
            (ElementKind::Component, PlatformName::Wechat) => {
                self.object.method_at(&["lifetimes", name])
            }
        };
        self.invoke(method, args)
    }

    /// Calls a component page event by its neutral name (`page:show`).
    pub fn call_page_event(&self, name: &str, args: &[Value]) -> MiniResult<DispatchOutcome> {
        let (table, host_name) = match (self.platform, name) {
            (PlatformName::Alipay, "page:show") => ("pageEvents", "onShow"),
            (PlatformName::Alipay, "page:hide") => ("pageEvents", "onHide"),
            (PlatformName::Wechat, "page:show") => ("pageLifetimes", "show"),
            (PlatformName::Wechat, "page:hide") => ("pageLifetimes", "hide"),
            _ => return Ok(DispatchOutcome::Empty),
        };
        self.invoke(self.object.method_at(&[table, host_name]), args)
    }

    /// Calls a user handler, as a template event binding would.
    pub fn call_method(&self, name: &str, args: &[Value]) -> MiniResult<DispatchOutcome> {
        let method = if self.is_component() {
            self.object.method_at(&["methods", name])
        } else {
            self.object.method(name)
        };
        match method {
            Some(method) => method(&self.host_ref()?, args),
            None => Err(Error::user(format!("no method named {}", name))),
        }
    }

    /// Calls a method stored on instance data.
    pub fn call_data_method(&self, name: &str, args: &[Value]) -> MiniResult<Value> {
        let method = self
            .state()?
            .data
            .get(name)
            .and_then(|value| value.as_method().cloned());
        match method {
            Some(method) => method(args),
            None => Err(Error::user(format!("no data method named {}", name))),
        }
    }

    /// Data entries as JSON; methods are left out.
    pub fn data_json(&self) -> Value {
        self.state
            .lock()
            .map(|state| data_map_to_json(&state.data))
            .unwrap_or(Value::Null)
    }

    pub fn set_data_calls(&self) -> Vec<DataMap> {
        self.state
            .lock()
            .map(|state| state.set_data_calls.clone())
            .unwrap_or_default()
    }

    pub fn triggered_events(&self) -> Vec<TriggeredEvent> {
        self.state
            .lock()
            .map(|state| state.events.clone())
            .unwrap_or_default()
    }
}

impl HostInstance for SimHost {
    fn set_data(&self, patch: DataMap) -> MiniResult<()> {
        let props = {
            let mut state = self.state()?;
            state.data.extend(patch.clone());
            state.set_data_calls.push(patch);
            state.props.clone()
        };
        if self.is_mounted() && self.is_component() && self.platform == PlatformName::Alipay {
            self.call_lifecycle("deriveDataFromProps", &[Value::Object(props)])?;
        }
        Ok(())
    }

    fn data(&self) -> DataMap {
        self.state
            .lock()
            .map(|state| state.data.clone())
            .unwrap_or_default()
    }

    fn props(&self) -> Props {
        self.state
            .lock()
            .map(|state| state.props.clone())
            .unwrap_or_default()
    }

    fn marker(&self) -> InstanceMarker {
        self.marker.clone()
    }

    fn slot(&self) -> &InstanceSlot {
        &self.slot
    }

    fn trigger_event(&self, name: &str, payload: Value, options: Value) -> MiniResult<()> {
        if self.platform != PlatformName::Wechat {
            return Err(crate::platform::PlatformError::TriggerEventUnavailable {
                name: name.to_string(),
            }
            .into());
        }
        self.state()?.events.push(TriggeredEvent {
            name: name.to_string(),
            payload,
            options,
        });
        Ok(())
    }
}
