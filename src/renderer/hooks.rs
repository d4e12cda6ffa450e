use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use super::{RenderContext, RenderNode};
use crate::handler_registry::CleanupFn;
use crate::value::Props;
use crate::{Error, MiniResult};

/// Effect body; may hand back a cleanup run before the next execution or on unmount.
pub type EffectFn = Box<dyn FnOnce() -> MiniResult<Option<CleanupFn>> + Send>;

/// Mutable cell kept across renders.
pub type RefHandle<T> = Arc<Mutex<T>>;

/// When a memo or effect is recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum Deps {
    /// Every render.
    Always,
    /// First render only.
    Once,
    /// Whenever the values differ from the previous render.
    Values(Vec<Value>),
}

impl Deps {
    fn changed_since(&self, previous: &Deps) -> bool {
        match (self, previous) {
            (Deps::Always, _) => true,
            (Deps::Once, _) => false,
            (Deps::Values(next), Deps::Values(prev)) => next != prev,
            (Deps::Values(_), _) => true,
        }
    }
}

pub(crate) enum HookSlot {
    Value(Box<dyn Any + Send>),
    Memo { deps: Deps, value: Box<dyn Any + Send> },
    Effect { deps: Deps },
}

pub(crate) struct QueuedEffect {
    pub key: String,
    pub index: usize,
    pub effect: EffectFn,
}

/// Receives re-render requests from state setters.
pub(crate) trait Scheduler: Send + Sync {
    fn schedule(&self, key: &str) -> MiniResult<()>;
}

pub(crate) struct Finished {
    pub slots: Vec<HookSlot>,
    pub effects: Vec<QueuedEffect>,
    pub used: usize,
}

/// Setter returned by [`Hooks::use_state`].
pub struct StateSetter<T> {
    cell: RefHandle<T>,
    scheduler: Option<Weak<dyn Scheduler>>,
    key: String,
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            scheduler: self.scheduler.clone(),
            key: self.key.clone(),
        }
    }
}

impl<T: Send + 'static> StateSetter<T> {
    /// Stores the value and schedules a re-render. Outside a batch the re-render
    /// happens before this returns.
    pub fn set(&self, value: T) -> MiniResult<()> {
        self.update(|current| *current = value)
    }

    pub fn update<F: FnOnce(&mut T)>(&self, f: F) -> MiniResult<()> {
        {
            let mut current = self
                .cell
                .lock()
                .map_err(|e| Error::internal(format!("state poisoned: {}", e)))?;
            f(&mut current);
        }
        match self.scheduler.as_ref().and_then(Weak::upgrade) {
            Some(scheduler) => scheduler.schedule(&self.key),
            None => Ok(()),
        }
    }
}

/// Hook state of one node during one render.
///
/// Hooks are matched to their state by call order, so a component must call the
/// same hooks in the same order on every render.
pub struct Hooks {
    key: String,
    props: Props,
    context: Option<RenderContext>,
    scheduler: Option<Weak<dyn Scheduler>>,
    slots: Vec<HookSlot>,
    cursor: usize,
    effects: Vec<QueuedEffect>,
}

impl Hooks {
    pub(crate) fn new(
        node: &RenderNode,
        slots: Vec<HookSlot>,
        scheduler: Option<Weak<dyn Scheduler>>,
    ) -> Self {
        Self {
            key: node.key().to_string(),
            props: node.props().clone(),
            context: node.context().cloned(),
            scheduler,
            slots,
            cursor: 0,
            effects: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> Finished {
        Finished {
            slots: self.slots,
            effects: self.effects,
            used: self.cursor,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    /// A static render never commits: effects are skipped and setters do nothing.
    pub fn is_static(&self) -> bool {
        self.scheduler.is_none()
    }

    pub fn context<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context.clone()?.downcast::<T>().ok()
    }

    fn next_index(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    fn mismatch(&self, index: usize, hook: &str) -> Error {
        Error::internal(format!(
            "{} at position {} of {} does not match the previous render",
            hook, index, self.key
        ))
    }

    pub fn use_ref<T, F>(&mut self, init: F) -> MiniResult<RefHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        let index = self.next_index();
        if index == self.slots.len() {
            let handle: RefHandle<T> = Arc::new(Mutex::new(init()));
            self.slots.push(HookSlot::Value(Box::new(handle)));
        }
        match &self.slots[index] {
            HookSlot::Value(value) => (**value)
                .downcast_ref::<RefHandle<T>>()
                .cloned()
                .ok_or_else(|| self.mismatch(index, "use_ref")),
            _ => Err(self.mismatch(index, "use_ref")),
        }
    }

    pub fn use_state<T, F>(&mut self, init: F) -> MiniResult<(T, StateSetter<T>)>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T,
    {
        let cell = self.use_ref(init)?;
        let value = cell
            .lock()
            .map_err(|e| Error::internal(format!("state poisoned: {}", e)))?
            .clone();
        let setter = StateSetter {
            cell,
            scheduler: self.scheduler.clone(),
            key: self.key.clone(),
        };
        Ok((value, setter))
    }

    pub fn use_memo<T, F>(&mut self, deps: Deps, compute: F) -> MiniResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T,
    {
        let index = self.next_index();
        let recompute = match self.slots.get(index) {
            None => true,
            Some(HookSlot::Memo { deps: previous, .. }) => deps.changed_since(previous),
            Some(_) => return Err(self.mismatch(index, "use_memo")),
        };
        if recompute {
            let value = compute();
            let slot = HookSlot::Memo {
                deps,
                value: Box::new(value.clone()),
            };
            if index == self.slots.len() {
                self.slots.push(slot);
            } else {
                self.slots[index] = slot;
            }
            return Ok(value);
        }
        match &self.slots[index] {
            HookSlot::Memo { value, .. } => (**value)
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| self.mismatch(index, "use_memo")),
            _ => Err(self.mismatch(index, "use_memo")),
        }
    }

    /// Schedules `effect` to run after the current batch has been rendered.
    pub fn use_effect<F>(&mut self, deps: Deps, effect: F) -> MiniResult<()>
    where
        F: FnOnce() -> MiniResult<Option<CleanupFn>> + Send + 'static,
    {
        let index = self.next_index();
        let run = match self.slots.get(index) {
            None => true,
            Some(HookSlot::Effect { deps: previous }) => deps.changed_since(previous),
            Some(_) => return Err(self.mismatch(index, "use_effect")),
        };
        if index == self.slots.len() {
            self.slots.push(HookSlot::Effect { deps });
        } else if run {
            self.slots[index] = HookSlot::Effect { deps };
        }
        if run && !self.is_static() {
            self.effects.push(QueuedEffect {
                key: self.key.clone(),
                index,
                effect: Box::new(effect),
            });
        }
        Ok(())
    }
}
