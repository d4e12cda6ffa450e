//! # Instance Mount
//!
//! Keeps one record per live host instance of a definition and turns host
//! lifecycle calls into render passes.
//!
//! - `on_host_mount` creates the record, renders it and then re-dispatches the
//!   mount lifecycle so handlers registered by the first render fire.
//! - `dispatch_new_input` stores new props and renders, unless the platform
//!   policy says they are equal to what was committed.
//! - `on_host_unmount` marks the record unmounted and renders once more so the
//!   renderer tears the instance down and runs its effect cleanups.
//!
//! A render pass hands every live record's node to the renderer inside one
//! batching scope. Requests arriving while a pass is running (a `set_data` that
//! makes the host call back in, for instance) are coalesced into one more pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::context::ElementContext;
use crate::handler_registry::{DispatchOutcome, HandlerFn, HandlerReturn};
use crate::host::HostRef;
use crate::identity::{CallContext, Identity};
use crate::lifecycle::LifecycleBinder;
use crate::mini_hooks::MiniHooks;
use crate::platform::{ElementKind, HostMethod, Platform, PropsUpdate};
use crate::renderer::{Component, Hooks, MountHandle, RenderContext, RenderNode, Renderer};
use crate::value::{data_map_from_json, percent_decode, shallow_equal, Props, ValueKind};
use crate::{Error, MiniResult};

/// Input key that replaces the component call with the data it carries.
pub const DATA_BYPASS_KEY: &str = "DANGER_ZONE_BYPASS_FUNCTION_CALL_WITH_DATA";

/// A user component: reads hooks and input, returns the data object to render.
pub type ElementFn = Arc<dyn Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync>;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("duplicate identity of host instance: {identity}")]
    DuplicateIdentity { identity: String },

    #[error("component must return a data object, got {kind}")]
    InvalidOutput { kind: ValueKind },

    #[error("render data collides with input keys: {keys}")]
    KeyCollision { keys: String },

    #[error("event {name} cannot be both an input key and a result-handling event")]
    EventResultConflict { name: String },

    #[error("bypass data cannot be decoded: {reason}")]
    BypassDecode { reason: String },
}

/// Behaviour switches resolved from configuration and platform policy.
#[derive(Debug, Clone)]
pub struct MountSettings {
    pub skip_equal_props: bool,
    pub volatile_prop_keys: Vec<String>,
    pub allow_data_bypass: bool,
}

struct InstanceRecord {
    /// Dropped on unmount so a retired record does not pin the host instance.
    context: Option<Arc<ElementContext>>,
    pending_input: Option<Props>,
    committed_input: Props,
    unmounted: bool,
    node: Option<RenderNode>,
}

struct MountInner {
    tag: String,
    binder: Arc<LifecycleBinder>,
    settings: MountSettings,
    default_props: Props,
    prop_keys: Vec<String>,
    component: Component,
    renderer: Arc<dyn Renderer>,
    records: Mutex<IndexMap<Identity, InstanceRecord>>,
    root: Mutex<Option<Arc<dyn MountHandle>>>,
    rendering: AtomicBool,
    rerun: AtomicBool,
}

/// Live instances of one definition. Cheap to clone.
#[derive(Clone)]
pub struct InstanceMount {
    inner: Arc<MountInner>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::internal(format!("instance records poisoned: {}", e))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn decode_bypass(payload: &Value) -> MiniResult<Value> {
    match payload {
        Value::String(s) if s.starts_with("%7B") => {
            let decoded = percent_decode(s).ok_or_else(|| MountError::BypassDecode {
                reason: "malformed percent encoding".to_string(),
            })?;
            serde_json::from_str(&decoded).map_err(|e| {
                MountError::BypassDecode {
                    reason: e.to_string(),
                }
                .into()
            })
        }
        other => Ok(other.clone()),
    }
}

/// Wraps a user component with bypass handling, output validation and data sync.
fn wrap_element(element: ElementFn, tag: String, allow_data_bypass: bool) -> Component {
    Arc::new(move |hooks: &mut Hooks| {
        let props = hooks.props().clone();
        let bypass = props
            .get(DATA_BYPASS_KEY)
            .filter(|payload| allow_data_bypass && is_truthy(payload));
        let output = match bypass {
            Some(payload) => {
                warn!(tag = %tag, "rendering bypass data instead of the component");
                decode_bypass(payload).map_err(|e| e.tagged(&tag))?
            }
            None => element(hooks, &props).map_err(|e| {
                error!(tag = %tag, error = %e, "render failed");
                e.tagged(&tag)
            })?,
        };

        let output = match output {
            Value::Null => {
                info!(tag = %tag, "component returned no data");
                Map::new()
            }
            Value::Object(map) => map,
            other => {
                let err = Error::from(MountError::InvalidOutput {
                    kind: ValueKind::of(&other),
                })
                .tagged(&tag);
                error!("{}", err);
                return Err(err);
            }
        };

        let collisions: Vec<&str> = props
            .keys()
            .filter(|key| output.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();
        if !collisions.is_empty() {
            let err = Error::from(MountError::KeyCollision {
                keys: collisions.join(", "),
            })
            .tagged(&tag);
            error!("{}", err);
            return Err(err);
        }

        hooks.use_sync_data(&data_map_from_json(&Value::Object(output)))
    })
}

/// Mount-time configuration of an [`InstanceMount`].
pub struct MountSetup {
    pub tag: String,
    pub binder: Arc<LifecycleBinder>,
    pub settings: MountSettings,
    pub default_props: Props,
    pub element: ElementFn,
    pub renderer: Arc<dyn Renderer>,
}

impl InstanceRecord {
    fn retire(&mut self) {
        self.unmounted = true;
        self.context = None;
        self.pending_input = None;
        self.committed_input = Props::new();
        self.node = None;
    }
}

impl InstanceMount {
    pub fn new(setup: MountSetup) -> Self {
        let component = wrap_element(
            setup.element,
            setup.tag.clone(),
            setup.settings.allow_data_bypass,
        );
        let prop_keys = setup.default_props.keys().cloned().collect();
        Self {
            inner: Arc::new(MountInner {
                tag: setup.tag,
                binder: setup.binder,
                settings: setup.settings,
                default_props: setup.default_props,
                prop_keys,
                component,
                renderer: setup.renderer,
                records: Mutex::new(IndexMap::new()),
                root: Mutex::new(None),
                rendering: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
            }),
        }
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub fn kind(&self) -> ElementKind {
        self.inner.binder.kind()
    }

    fn platform(&self) -> &'static dyn Platform {
        self.inner.binder.platform()
    }

    pub fn default_props(&self) -> &Props {
        &self.inner.default_props
    }

    /// Declared input keys, in default-props order.
    pub fn prop_keys(&self) -> &[String] {
        &self.inner.prop_keys
    }

    fn records(&self) -> MiniResult<MutexGuard<'_, IndexMap<Identity, InstanceRecord>>> {
        self.inner.records.lock().map_err(poisoned)
    }

    /// Whether the identity has no live record.
    pub fn is_unknown(&self, identity: &Identity) -> bool {
        self.inner
            .records
            .lock()
            .map(|records| records.get(identity).map_or(true, |r| r.unmounted))
            .unwrap_or(false)
    }

    pub fn is_live(&self, identity: &Identity) -> bool {
        !self.is_unknown(identity)
    }

    pub fn live_count(&self) -> usize {
        self.inner
            .records
            .lock()
            .map(|records| records.values().filter(|r| !r.unmounted).count())
            .unwrap_or(0)
    }

    /// Input committed by the last render of a live instance.
    pub fn committed_input(&self, identity: &Identity) -> Option<Props> {
        self.inner.records.lock().ok().and_then(|records| {
            records
                .get(identity)
                .filter(|r| !r.unmounted)
                .map(|r| r.committed_input.clone())
        })
    }

    fn context_for(&self, host: &HostRef, identity: Identity, server_render: bool) -> ElementContext {
        ElementContext {
            instance: host.clone(),
            identity,
            binder: self.inner.binder.clone(),
            server_render,
            tag: self.inner.tag.clone(),
        }
    }

    fn initial_input(&self, host: &HostRef, args: &[Value]) -> Props {
        match self.kind() {
            ElementKind::Component => {
                let mut input = self.inner.default_props.clone();
                input.extend(
                    self.platform()
                        .read_input_from_host(host.as_ref(), &self.inner.prop_keys),
                );
                input
            }
            ElementKind::Page => args
                .first()
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Handles the host's mount lifecycle for a new instance.
    pub fn on_host_mount(&self, host: &HostRef, args: &[Value]) -> MiniResult<DispatchOutcome> {
        let identity = host.identity()?;
        host.slot().set_prop_keys(self.inner.prop_keys.clone())?;
        let input = self.initial_input(host, args);
        let context = Arc::new(self.context_for(host, identity.clone(), false));

        {
            let mut records = self.records()?;
            if records.get(&identity).map_or(false, |r| !r.unmounted) {
                let err = Error::from(MountError::DuplicateIdentity {
                    identity: identity.to_string(),
                })
                .tagged(&self.inner.tag);
                error!("{}", err);
                return Err(err);
            }
            records.insert(
                identity.clone(),
                InstanceRecord {
                    context: Some(context),
                    pending_input: Some(input),
                    committed_input: Props::new(),
                    unmounted: false,
                    node: None,
                },
            );
        }
        info!(tag = %self.inner.tag, identity = %identity, "mounting instance");

        if let Err(e) = self.render() {
            self.discard_failed_mount(&identity);
            return Err(e);
        }

        let name = self.platform().mount_lifecycle(self.kind());
        debug!(tag = %self.inner.tag, identity = %identity, name, "instance mounted, dispatching mount lifecycle");
        self.inner.binder.registry().dispatch(name, host, args)
    }

    /// Delivers new input to a live instance.
    pub fn dispatch_new_input(&self, host: &HostRef, next: Props) -> MiniResult<()> {
        let identity = host.identity()?;
        {
            let mut records = self.records()?;
            let Some(record) = records.get_mut(&identity).filter(|r| !r.unmounted) else {
                trace!(tag = %self.inner.tag, identity = %identity, "input for an instance that is not live");
                return Ok(());
            };
            if self.inner.settings.skip_equal_props
                && shallow_equal(
                    &next,
                    &record.committed_input,
                    &self.inner.settings.volatile_prop_keys,
                )
            {
                trace!(tag = %self.inner.tag, identity = %identity, "input unchanged, skipped");
                return Ok(());
            }
            record.pending_input = Some(next);
        }
        self.render()
    }

    pub fn on_host_unmount(&self, host: &HostRef) -> MiniResult<()> {
        let identity = host.identity()?;
        {
            let mut records = self.records()?;
            match records.get_mut(&identity) {
                Some(record) => record.retire(),
                None => {
                    warn!(
                        tag = %self.inner.tag,
                        identity = %identity,
                        "no instance to unmount, is component2 enabled?"
                    );
                    return Ok(());
                }
            }
        }
        info!(tag = %self.inner.tag, identity = %identity, "unmounting instance");
        self.render()
    }

    /// Unmounts whatever the failed first render left in the renderer, so effect
    /// cleanups unregister its handlers, then forgets the record.
    fn discard_failed_mount(&self, identity: &Identity) {
        match self.records() {
            Ok(mut records) => {
                if let Some(record) = records.get_mut(identity) {
                    record.retire();
                }
            }
            Err(_) => return,
        }
        warn!(tag = %self.inner.tag, identity = %identity, "mount failed, tearing the instance down");
        if let Err(e) = self.render() {
            warn!(tag = %self.inner.tag, identity = %identity, error = %e, "teardown of a failed mount failed");
        }
        if let Ok(mut records) = self.records() {
            records.shift_remove(identity);
        }
    }

    /// Runs a render pass, or schedules one more if a pass is already running.
    pub fn render(&self) -> MiniResult<()> {
        if self.inner.rendering.swap(true, Ordering::SeqCst) {
            self.inner.rerun.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let result = loop {
            self.inner.rerun.store(false, Ordering::SeqCst);
            if let Err(e) = self.render_pass() {
                break Err(e);
            }
            if !self.inner.rerun.load(Ordering::SeqCst) {
                break Ok(());
            }
        };
        self.inner.rendering.store(false, Ordering::SeqCst);
        result
    }

    /// Returns the nodes to render, and the previously committed input of every
    /// record that got a fresh node.
    fn collect_nodes(&self) -> MiniResult<(Vec<RenderNode>, Vec<(Identity, Props)>)> {
        let mut records = self.records()?;
        let mut nodes = Vec::with_capacity(records.len());
        let mut fresh = Vec::new();
        for (identity, record) in records.iter_mut() {
            if record.unmounted {
                continue;
            }
            if let (Some(node), None) = (&record.node, &record.pending_input) {
                nodes.push(node.clone());
                continue;
            }
            let Some(context) = record.context.clone() else {
                continue;
            };
            let context: RenderContext = context;
            let input = record
                .pending_input
                .take()
                .unwrap_or_else(|| record.committed_input.clone());
            fresh.push((
                identity.clone(),
                std::mem::replace(&mut record.committed_input, input.clone()),
            ));
            let node = self.inner.renderer.create_node(
                identity.as_str(),
                self.inner.component.clone(),
                input,
                Some(context),
            );
            record.node = Some(node.clone());
            nodes.push(node);
        }
        Ok((nodes, fresh))
    }

    /// Puts back the input committed before a failed pass. The node is dropped so
    /// the next pass rebuilds it from that input.
    fn revert_inputs(&self, fresh: Vec<(Identity, Props)>) {
        let Ok(mut records) = self.records() else {
            return;
        };
        for (identity, previous) in fresh {
            if let Some(record) = records.get_mut(&identity).filter(|r| !r.unmounted) {
                record.committed_input = previous;
                record.node = None;
            }
        }
    }

    fn render_pass(&self) -> MiniResult<()> {
        let (nodes, fresh) = self.collect_nodes()?;
        trace!(tag = %self.inner.tag, count = nodes.len(), "render pass");
        let mut nodes = Some(nodes);
        let renderer = self.inner.renderer.clone();
        let result = renderer.batch(&mut || {
            let nodes = nodes.take().unwrap_or_default();
            let root = self.inner.root.lock().map_err(poisoned)?.clone();
            match root {
                Some(handle) => handle.update(nodes),
                None => {
                    let handle = self.inner.renderer.mount(nodes)?;
                    *self.inner.root.lock().map_err(poisoned)? = Some(handle);
                    Ok(())
                }
            }
        });
        if result.is_err() {
            self.revert_inputs(fresh);
        }
        result
    }

    /// Renders once against a pre-render host to discover names and initial data.
    pub fn pre_render(&self, host: &HostRef) -> MiniResult<()> {
        let identity = host.identity()?;
        let context: RenderContext = Arc::new(self.context_for(host, identity.clone(), true));
        let node = self.inner.renderer.create_node(
            identity.as_str(),
            self.inner.component.clone(),
            self.inner.default_props.clone(),
            Some(context),
        );
        self.inner.renderer.render_static(node)
    }

    /// Registers the mount, unmount and props-update lifecycles on the binder and
    /// returns the data observers the host should install, if any.
    pub fn bind_lifecycles(&self) -> MiniResult<IndexMap<String, HostMethod>> {
        let binder = &self.inner.binder;

        let lookup = self.clone();
        let mount = self.clone();
        let on_mount: HandlerFn<HostRef> = Arc::new(move |host: &HostRef, args: &[Value]| {
            mount.on_host_mount(host, args).map(HandlerReturn::from)
        });
        binder.bind_mount_handler(move |identity| lookup.is_unknown(identity), on_mount)?;

        let unmount = self.clone();
        let on_unmount: HandlerFn<HostRef> = Arc::new(move |host: &HostRef, _args: &[Value]| {
            unmount.on_host_unmount(host).map(|_| HandlerReturn::Unit)
        });
        binder.bind_unmount_handler(on_unmount)?;

        let mut observers = IndexMap::new();
        if self.kind() != ElementKind::Component {
            return Ok(observers);
        }
        match self.platform().props_update() {
            PropsUpdate::Lifecycle(_) => {
                let update = self.clone();
                let on_props: HandlerFn<HostRef> =
                    Arc::new(move |host: &HostRef, args: &[Value]| {
                        let next = args
                            .first()
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_else(|| host.props());
                        update.dispatch_new_input(host, next).map(|_| HandlerReturn::Unit)
                    });
                binder.bind_props_handler(on_props)?;
            }
            PropsUpdate::Observers => {
                if !self.inner.prop_keys.is_empty() {
                    let key = self.inner.prop_keys.join(", ");
                    debug!(tag = %self.inner.tag, observer = %key, "observing props");
                    let update = self.clone();
                    let observer: HostMethod = Arc::new(move |host: &HostRef, _args: &[Value]| {
                        let next = update
                            .platform()
                            .read_input_from_host(host.as_ref(), update.prop_keys());
                        update.dispatch_new_input(host, next)?;
                        Ok(DispatchOutcome::Empty)
                    });
                    observers.insert(key, observer);
                }
            }
        }
        Ok(observers)
    }
}
