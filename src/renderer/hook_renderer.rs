use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace, warn};

use super::hooks::{Finished, HookSlot, Hooks, QueuedEffect, Scheduler};
use super::{MountHandle, RenderNode, Renderer};
use crate::handler_registry::CleanupFn;
use crate::{Error, MiniResult};

/// Upper bound on render/effect rounds within one flush.
const MAX_FLUSH_ROUNDS: usize = 64;

struct Fiber {
    node: RenderNode,
    slots: Vec<HookSlot>,
    cleanups: BTreeMap<usize, CleanupFn>,
    dirty: bool,
}

impl Fiber {
    fn new(node: RenderNode) -> Self {
        Self {
            node,
            slots: Vec::new(),
            cleanups: BTreeMap::new(),
            dirty: false,
        }
    }
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    dirty: IndexSet<String>,
    effects: Vec<QueuedEffect>,
}

struct RendererShared {
    fibers: Mutex<IndexMap<String, Fiber>>,
    batch: Mutex<BatchState>,
    this: Weak<RendererShared>,
}

/// Keyed, flat hooks renderer.
///
/// Children are matched by key only; there is no element tree. A node handed in
/// again unchanged (same `Arc`) is skipped unless one of its setters marked it
/// dirty. No lock is held while component code, effects or cleanups run.
pub struct HookRenderer {
    shared: Arc<RendererShared>,
}

impl Default for HookRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRenderer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new_cyclic(|this| RendererShared {
                fibers: Mutex::new(IndexMap::new()),
                batch: Mutex::new(BatchState::default()),
                this: this.clone(),
            }),
        }
    }

    /// Keys of the currently mounted children.
    pub fn live_keys(&self) -> Vec<String> {
        self.shared
            .fibers()
            .map(|fibers| fibers.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Renderer for HookRenderer {
    fn mount(&self, nodes: Vec<RenderNode>) -> MiniResult<Arc<dyn MountHandle>> {
        self.shared.reconcile(&nodes)?;
        Ok(Arc::new(HookMount {
            shared: self.shared.clone(),
        }))
    }

    fn batch(&self, scope: &mut dyn FnMut() -> MiniResult<()>) -> MiniResult<()> {
        self.shared.batch(scope)
    }

    fn render_static(&self, node: RenderNode) -> MiniResult<()> {
        trace!(key = node.key(), "static render");
        let mut hooks = Hooks::new(&node, Vec::new(), None);
        (node.component())(&mut hooks)
    }
}

struct HookMount {
    shared: Arc<RendererShared>,
}

impl MountHandle for HookMount {
    fn update(&self, nodes: Vec<RenderNode>) -> MiniResult<()> {
        self.shared.reconcile(&nodes)
    }

    fn unmount(&self) -> MiniResult<()> {
        self.shared.reconcile(&[])
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::internal(format!("renderer state poisoned: {}", e))
}

impl Scheduler for RendererShared {
    fn schedule(&self, key: &str) -> MiniResult<()> {
        {
            let mut fibers = self.fibers()?;
            match fibers.get_mut(key) {
                Some(fiber) => fiber.dirty = true,
                None => return Ok(()),
            }
        }
        let idle = {
            let mut batch = self.batch_state()?;
            batch.dirty.insert(key.to_string());
            batch.depth == 0
        };
        if idle {
            self.flush()?;
        }
        Ok(())
    }
}

impl RendererShared {
    fn fibers(&self) -> MiniResult<MutexGuard<'_, IndexMap<String, Fiber>>> {
        self.fibers.lock().map_err(poisoned)
    }

    fn batch_state(&self) -> MiniResult<MutexGuard<'_, BatchState>> {
        self.batch.lock().map_err(poisoned)
    }

    fn scheduler(&self) -> Weak<dyn Scheduler> {
        self.this.clone()
    }

    fn enter(&self) -> MiniResult<()> {
        self.batch_state()?.depth += 1;
        Ok(())
    }

    /// Returns whether the outermost scope was left.
    fn leave(&self) -> MiniResult<bool> {
        let mut batch = self.batch_state()?;
        batch.depth = batch.depth.saturating_sub(1);
        Ok(batch.depth == 0)
    }

    fn discard_pending(&self) {
        if let Ok(mut batch) = self.batch.lock() {
            if !batch.effects.is_empty() {
                warn!(count = batch.effects.len(), "discarding effects of a failed batch");
            }
            batch.effects.clear();
            batch.dirty.clear();
        }
    }

    fn batch(&self, scope: &mut dyn FnMut() -> MiniResult<()>) -> MiniResult<()> {
        self.enter()?;
        let result = scope();
        let outermost = self.leave()?;
        match result {
            Err(e) => {
                if outermost {
                    self.discard_pending();
                }
                Err(e)
            }
            Ok(()) if outermost => self.flush(),
            Ok(()) => Ok(()),
        }
    }

    /// Re-renders dirty fibers and runs queued effects until both are exhausted.
    fn flush(&self) -> MiniResult<()> {
        self.enter()?;
        let result = self.flush_rounds();
        self.leave()?;
        if result.is_err() {
            self.discard_pending();
        }
        result
    }

    fn flush_rounds(&self) -> MiniResult<()> {
        for _ in 0..MAX_FLUSH_ROUNDS {
            let dirty = std::mem::take(&mut self.batch_state()?.dirty);
            for key in &dirty {
                self.rerender(key)?;
            }
            let effects = std::mem::take(&mut self.batch_state()?.effects);
            if dirty.is_empty() && effects.is_empty() {
                return Ok(());
            }
            trace!(effects = effects.len(), rerendered = dirty.len(), "flush round");
            for effect in effects {
                self.run_effect(effect)?;
            }
        }
        Err(Error::internal(
            "too many nested updates, an effect keeps scheduling renders",
        ))
    }

    fn reconcile(&self, nodes: &[RenderNode]) -> MiniResult<()> {
        self.batch(&mut || {
            let removed: Vec<(String, Fiber)> = {
                let mut fibers = self.fibers()?;
                let stale: Vec<String> = fibers
                    .keys()
                    .filter(|key| !nodes.iter().any(|n| n.key() == key.as_str()))
                    .cloned()
                    .collect();
                stale
                    .into_iter()
                    .filter_map(|key| fibers.shift_remove(&key).map(|f| (key, f)))
                    .collect()
            };
            for (key, fiber) in removed {
                self.unmount_fiber(&key, fiber)?;
            }

            for node in nodes {
                let skip = self
                    .fibers()?
                    .get(node.key())
                    .map_or(false, |f| f.node.same(node) && !f.dirty);
                if !skip {
                    self.render_fiber(node.clone())?;
                }
            }
            Ok(())
        })
    }

    fn rerender(&self, key: &str) -> MiniResult<()> {
        let node = self
            .fibers()?
            .get(key)
            .filter(|f| f.dirty)
            .map(|f| f.node.clone());
        match node {
            Some(node) => self.render_fiber(node),
            None => Ok(()),
        }
    }

    fn render_fiber(&self, node: RenderNode) -> MiniResult<()> {
        let key = node.key().to_string();
        let (slots, is_new) = {
            let mut fibers = self.fibers()?;
            match fibers.get_mut(&key) {
                Some(fiber) => {
                    fiber.dirty = false;
                    (std::mem::take(&mut fiber.slots), false)
                }
                None => {
                    fibers.insert(key.clone(), Fiber::new(node.clone()));
                    (Vec::new(), true)
                }
            }
        };
        let previous = slots.len();
        trace!(key = %key, is_new, "rendering");

        let mut hooks = Hooks::new(&node, slots, Some(self.scheduler()));
        let result = (node.component())(&mut hooks);
        let Finished {
            slots,
            effects,
            used,
        } = hooks.finish();
        let result = result.and_then(|_| {
            if previous > 0 && used != slots.len() {
                Err(Error::internal(format!(
                    "{} rendered {} hooks, expected {}",
                    key,
                    used,
                    slots.len()
                )))
            } else {
                Ok(())
            }
        });

        {
            let mut fibers = self.fibers()?;
            match (&result, is_new) {
                (Err(_), true) => {
                    fibers.shift_remove(&key);
                }
                (Err(_), false) => {
                    if let Some(fiber) = fibers.get_mut(&key) {
                        fiber.slots = slots;
                    }
                }
                (Ok(()), _) => {
                    if let Some(fiber) = fibers.get_mut(&key) {
                        fiber.slots = slots;
                        fiber.node = node;
                    }
                }
            }
        }
        result?;
        self.batch_state()?.effects.extend(effects);
        Ok(())
    }

    fn run_effect(&self, queued: QueuedEffect) -> MiniResult<()> {
        let QueuedEffect { key, index, effect } = queued;
        let previous = {
            let mut fibers = self.fibers()?;
            match fibers.get_mut(&key) {
                Some(fiber) => fiber.cleanups.remove(&index),
                // unmounted before its effects ran
                None => return Ok(()),
            }
        };
        if let Some(cleanup) = previous {
            cleanup()?;
        }

        let Some(cleanup) = effect()? else {
            return Ok(());
        };
        let orphan = {
            let mut fibers = self.fibers()?;
            match fibers.get_mut(&key) {
                Some(fiber) => {
                    fiber.cleanups.insert(index, cleanup);
                    None
                }
                None => Some(cleanup),
            }
        };
        match orphan {
            Some(cleanup) => cleanup(),
            None => Ok(()),
        }
    }

    fn unmount_fiber(&self, key: &str, fiber: Fiber) -> MiniResult<()> {
        debug!(key, cleanups = fiber.cleanups.len(), "unmounting");
        if let Ok(mut batch) = self.batch.lock() {
            batch.effects.retain(|e| e.key != key);
            batch.dirty.shift_remove(key);
        }
        let mut first_error = None;
        for (_, cleanup) in fiber.cleanups {
            if let Err(e) = cleanup() {
                warn!(key, error = %e, "effect cleanup failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
