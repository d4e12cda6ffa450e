//! # Handler Registry
//!
//! Central, append-ordered store of named event implementations shared by every
//! instance of one element definition.
//!
//! ## Model
//!
//! - Each event name owns an ordered list of entries; insertion order is dispatch
//!   order and there is no priority mechanism.
//! - Every entry carries a [`ContextFilter`]: either an exact [`Identity`] or a
//!   predicate over identities. Dispatch only runs entries whose filter matches the
//!   identity of the call context.
//! - Names can be introduced until the registry is locked. After [`HandlerRegistry::lock`]
//!   the set of names is frozen, because the host consumes the generated method
//!   table exactly once; entries under known names stay mutable.
//!
//! ## Dispatch semantics
//!
//! All matching entries run synchronously, in order, and the value returned to the
//! caller is the one produced by the *first* matching entry. An error from any
//! entry is logged with the registry tag and returned immediately; entries after it
//! do not run and side effects of earlier entries are not rolled back.
//!
//! ```ignore
//! let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[page/Index]");
//! let off = registry.register(
//!     "onTap",
//!     Some(Binding::new(ContextFilter::identity("a"), |_, _| Ok(json!(1).into()))),
//!     false,
//! )?;
//! registry.lock()?;
//! let outcome = registry.dispatch("onTap", &Identity::new("a"), &[])?;
//! off.call()?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::identity::{CallContext, Identity};
use crate::MiniResult;

/// Implementation of a handler: receives the call context and the host arguments.
pub type HandlerFn<C> = Arc<dyn Fn(&C, &[Value]) -> MiniResult<HandlerReturn> + Send + Sync>;

/// Cleanup callable returned by an implementation, run when its entry is unregistered.
pub type CleanupFn = Box<dyn FnOnce() -> MiniResult<()> + Send>;

pub type IdentityPredicate = Arc<dyn Fn(&Identity) -> bool + Send + Sync>;

/// Host-callable method produced for each known name by [`HandlerRegistry::build_host_proxy`].
pub type Trampoline<C> = Arc<dyn Fn(&C, &[Value]) -> MiniResult<DispatchOutcome> + Send + Sync>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{tag} handler names are locked, cannot add: {name}")]
    NamesLocked { tag: String, name: String },

    #[error("{tag} {name} already has an implementation for this context")]
    DuplicateExclusive { tag: String, name: String },

    #[error("{tag} handler names must be locked before building the host proxy")]
    NotLocked { tag: String },

    #[error("handler name must not be empty")]
    EmptyName,

    #[error("call context is required to match handlers")]
    MissingContext,

    #[error("{tag} no implementation of {name} to unregister, was the registry reset?")]
    StaleUnregister { tag: String, name: String },

    #[error("{tag} lifecycle bindings are locked")]
    BindingsLocked { tag: String },

    #[error("registry state poisoned: {0}")]
    Poisoned(String),
}

/// What an implementation hands back to dispatch.
pub enum HandlerReturn {
    /// No value.
    Unit,
    Value(Value),
    /// A cleanup callable; stored on the entry and run on unregister. Counts as no value.
    Cleanup(CleanupFn),
    /// An asynchronous result. The core never awaits it.
    Pending(BoxFuture<'static, MiniResult<Value>>),
}

impl HandlerReturn {
    pub fn cleanup<F>(f: F) -> Self
    where
        F: FnOnce() -> MiniResult<()> + Send + 'static,
    {
        HandlerReturn::Cleanup(Box::new(f))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = MiniResult<Value>> + Send + 'static,
    {
        HandlerReturn::Pending(Box::pin(future))
    }
}

impl From<Value> for HandlerReturn {
    fn from(value: Value) -> Self {
        HandlerReturn::Value(value)
    }
}

impl From<()> for HandlerReturn {
    fn from(_: ()) -> Self {
        HandlerReturn::Unit
    }
}

impl From<DispatchOutcome> for HandlerReturn {
    fn from(outcome: DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Empty => HandlerReturn::Unit,
            DispatchOutcome::Value(v) => HandlerReturn::Value(v),
            DispatchOutcome::Pending(f) => HandlerReturn::Pending(f),
        }
    }
}

impl fmt::Debug for HandlerReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerReturn::Unit => write!(f, "Unit"),
            HandlerReturn::Value(v) => write!(f, "Value({})", v),
            HandlerReturn::Cleanup(_) => write!(f, "Cleanup"),
            HandlerReturn::Pending(_) => write!(f, "Pending"),
        }
    }
}

/// Result of one dispatch: the first matching entry's return value.
pub enum DispatchOutcome {
    Empty,
    Value(Value),
    Pending(BoxFuture<'static, MiniResult<Value>>),
}

impl DispatchOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, DispatchOutcome::Empty)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            DispatchOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            DispatchOutcome::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Empty => write!(f, "Empty"),
            DispatchOutcome::Value(v) => write!(f, "Value({})", v),
            DispatchOutcome::Pending(_) => write!(f, "Pending"),
        }
    }
}

/// Which call contexts an entry answers to.
#[derive(Clone)]
pub enum ContextFilter {
    Identity(Identity),
    Predicate(IdentityPredicate),
}

impl ContextFilter {
    pub fn identity<I: Into<Identity>>(identity: I) -> Self {
        ContextFilter::Identity(identity.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Identity) -> bool + Send + Sync + 'static,
    {
        ContextFilter::Predicate(Arc::new(f))
    }

    /// Matches every identity.
    pub fn any() -> Self {
        Self::predicate(|_| true)
    }

    pub fn matches(&self, identity: &Identity) -> bool {
        match self {
            ContextFilter::Identity(bound) => bound == identity,
            ContextFilter::Predicate(f) => f(identity),
        }
    }

    /// Whether `existing` already covers what this filter would bind to.
    fn covered_by(&self, existing: &ContextFilter) -> bool {
        match self {
            ContextFilter::Identity(identity) => existing.matches(identity),
            ContextFilter::Predicate(p) => match existing {
                ContextFilter::Predicate(q) => Arc::ptr_eq(p, q),
                ContextFilter::Identity(_) => false,
            },
        }
    }
}

impl fmt::Debug for ContextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextFilter::Identity(identity) => write!(f, "Identity({})", identity),
            ContextFilter::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

/// A filter together with the implementation it guards.
pub struct Binding<C> {
    pub filter: ContextFilter,
    pub implementation: HandlerFn<C>,
}

impl<C> Binding<C> {
    pub fn new<F>(filter: ContextFilter, implementation: F) -> Self
    where
        F: Fn(&C, &[Value]) -> MiniResult<HandlerReturn> + Send + Sync + 'static,
    {
        Self {
            filter,
            implementation: Arc::new(implementation),
        }
    }
}

pub struct HandlerEntry<C> {
    name: String,
    filter: ContextFilter,
    implementation: HandlerFn<C>,
    unregister_hook: Mutex<Option<CleanupFn>>,
}

impl<C> HandlerEntry<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &ContextFilter {
        &self.filter
    }

    pub fn has_unregister_hook(&self) -> bool {
        self.unregister_hook
            .lock()
            .map(|hook| hook.is_some())
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct NameTable {
    locked: bool,
    names: Vec<String>,
}

struct RegistryInner<C> {
    tag: String,
    names: RwLock<NameTable>,
    entries: DashMap<String, Vec<Arc<HandlerEntry<C>>>>,
}

pub struct HandlerRegistry<C> {
    inner: Arc<RegistryInner<C>>,
}

impl<C> Clone for HandlerRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: CallContext + 'static> HandlerRegistry<C> {
    /// Creates an empty, unlocked registry. `tag` is used in logs and error messages.
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tag: tag.into(),
                names: RwLock::new(NameTable::default()),
                entries: DashMap::new(),
            }),
        }
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub fn is_locked(&self) -> bool {
        self.inner
            .names
            .read()
            .map(|table| table.locked)
            .unwrap_or(true)
    }

    /// Known names in the order they were introduced.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .names
            .read()
            .map(|table| table.names.clone())
            .unwrap_or_default()
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.inner
            .names
            .read()
            .map(|table| table.names.iter().any(|n| n == name))
            .unwrap_or(false)
    }

    /// Registers an implementation under `name`.
    ///
    /// Without a binding only the name is introduced and the returned handle does
    /// nothing. With `exclusive`, registration fails when an entry already answers
    /// to the same filter.
    pub fn register(
        &self,
        name: &str,
        binding: Option<Binding<C>>,
        exclusive: bool,
    ) -> MiniResult<Unregister<C>> {
        if name.is_empty() {
            return Err(HandlerError::EmptyName.into());
        }
        self.introduce_name(name)?;

        let Some(binding) = binding else {
            return Ok(Unregister::noop(name));
        };

        if exclusive {
            let existing = self.snapshot(name);
            if existing.iter().any(|e| binding.filter.covered_by(&e.filter)) {
                return Err(HandlerError::DuplicateExclusive {
                    tag: self.inner.tag.clone(),
                    name: name.to_string(),
                }
                .into());
            }
        }

        let entry = Arc::new(HandlerEntry {
            name: name.to_string(),
            filter: binding.filter,
            implementation: binding.implementation,
            unregister_hook: Mutex::new(None),
        });
        self.inner
            .entries
            .entry(name.to_string())
            .or_default()
            .push(entry.clone());
        trace!(tag = %self.inner.tag, name, "handler registered");

        Ok(Unregister {
            registry: Some(self.clone()),
            entry: Some(entry),
            name: name.to_string(),
        })
    }

    /// Introduces a name without an implementation.
    pub fn declare(&self, name: &str) -> MiniResult<()> {
        self.register(name, None, false).map(|_| ())
    }

    fn introduce_name(&self, name: &str) -> MiniResult<()> {
        let mut table = self
            .inner
            .names
            .write()
            .map_err(|e| HandlerError::Poisoned(e.to_string()))?;
        if table.names.iter().any(|n| n == name) {
            return Ok(());
        }
        if table.locked {
            return Err(HandlerError::NamesLocked {
                tag: self.inner.tag.clone(),
                name: name.to_string(),
            }
            .into());
        }
        table.names.push(name.to_string());
        Ok(())
    }

    /// Freezes the set of names. Irreversible.
    pub fn lock(&self) -> MiniResult<()> {
        self.inner
            .names
            .write()
            .map_err(|e| HandlerError::Poisoned(e.to_string()))?
            .locked = true;
        debug!(tag = %self.inner.tag, "handler names locked");
        Ok(())
    }

    /// Drops every entry. Names and the lock are kept.
    pub fn reset(&self) {
        self.inner.entries.clear();
        debug!(tag = %self.inner.tag, "all handler implementations reset");
    }

    fn snapshot(&self, name: &str) -> Vec<Arc<HandlerEntry<C>>> {
        self.inner
            .entries
            .get(name)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Entries under `name` whose filter matches `identity`, in registration order.
    pub fn list_matching(
        &self,
        name: &str,
        identity: &Identity,
    ) -> MiniResult<Vec<Arc<HandlerEntry<C>>>> {
        if identity.is_empty() {
            return Err(HandlerError::MissingContext.into());
        }
        // filters may run user predicates, so they are evaluated on a copy
        Ok(self
            .snapshot(name)
            .into_iter()
            .filter(|entry| entry.filter.matches(identity))
            .collect())
    }

    /// Runs every entry under `name` matching the context, in order.
    pub fn dispatch(&self, name: &str, ctx: &C, args: &[Value]) -> MiniResult<DispatchOutcome> {
        let identity = ctx.identity()?;
        let handlers = self.list_matching(name, &identity)?;
        let count = handlers.len();
        debug!(
            tag = %self.inner.tag,
            name,
            identity = %identity,
            count,
            "dispatching handlers"
        );

        let mut outcome = DispatchOutcome::Empty;
        for (index, entry) in handlers.iter().enumerate() {
            let started = Instant::now();
            trace!(tag = %self.inner.tag, name, "executing {}/{}", index + 1, count);

            let returned = (entry.implementation)(ctx, args).map_err(|e| {
                error!(tag = %self.inner.tag, name, error = %e, "handler failed");
                e
            })?;
            let value = match returned {
                HandlerReturn::Unit => DispatchOutcome::Empty,
                HandlerReturn::Value(v) => DispatchOutcome::Value(v),
                HandlerReturn::Pending(f) => DispatchOutcome::Pending(f),
                HandlerReturn::Cleanup(cleanup) => {
                    if let Ok(mut hook) = entry.unregister_hook.lock() {
                        *hook = Some(cleanup);
                    }
                    DispatchOutcome::Empty
                }
            };
            if index == 0 {
                outcome = value;
            }
            trace!(
                tag = %self.inner.tag,
                name,
                elapsed_us = started.elapsed().as_micros() as u64,
                "handler finished"
            );
        }
        Ok(outcome)
    }

    /// Builds one trampoline per known name. Requires the registry to be locked.
    pub fn build_host_proxy(&self) -> MiniResult<IndexMap<String, Trampoline<C>>> {
        if !self.is_locked() {
            return Err(HandlerError::NotLocked {
                tag: self.inner.tag.clone(),
            }
            .into());
        }
        let proxy = self
            .names()
            .into_iter()
            .map(|name| {
                let registry = self.clone();
                let bound = name.clone();
                let trampoline: Trampoline<C> =
                    Arc::new(move |ctx: &C, args: &[Value]| registry.dispatch(&bound, ctx, args));
                (name, trampoline)
            })
            .collect();
        Ok(proxy)
    }
}

/// Handle returned by [`HandlerRegistry::register`]; the only cancellation primitive.
#[must_use = "dropping the handle leaves the handler registered"]
pub struct Unregister<C> {
    registry: Option<HandlerRegistry<C>>,
    entry: Option<Arc<HandlerEntry<C>>>,
    name: String,
}

impl<C> Unregister<C> {
    fn noop(name: &str) -> Self {
        Self {
            registry: None,
            entry: None,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the entry and runs its captured cleanup, if any, exactly once.
    pub fn call(self) -> MiniResult<()> {
        let (Some(registry), Some(entry)) = (self.registry, self.entry) else {
            return Ok(());
        };
        let tag = registry.inner.tag.clone();
        debug!(tag = %tag, name = %self.name, "unregistering handler");

        let removed = registry
            .inner
            .entries
            .get_mut(&self.name)
            .and_then(|mut list| {
                let position = list.iter().position(|e| Arc::ptr_eq(e, &entry));
                position.map(|index| list.remove(index))
            });
        if removed.is_none() {
            let err = HandlerError::StaleUnregister {
                tag,
                name: self.name.clone(),
            };
            error!("{}", err);
            return Err(err.into());
        }

        let hook = entry.unregister_hook.lock().ok().and_then(|mut h| h.take());
        if let Some(cleanup) = hook {
            cleanup().map_err(|e| {
                error!(tag = %tag, name = %self.name, error = %e, "cleanup failed");
                e
            })?;
        }
        Ok(())
    }
}

impl<C: 'static> Unregister<C> {
    pub fn into_cleanup(self) -> CleanupFn {
        Box::new(move || self.call())
    }
}
