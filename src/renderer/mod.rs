//! # Renderer capability
//!
//! The mount layer drives component functions through the [`Renderer`] trait:
//! it creates keyed nodes, mounts or updates the flat list of live nodes inside a
//! batching scope, and renders a node statically once at definition time.
//!
//! [`HookRenderer`] is the implementation shipped with the crate. It keeps one
//! fiber per key, with hook state stored in call order, and runs effects after
//! every node of a batch has been rendered.

mod hook_renderer;
mod hooks;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::value::Props;
use crate::MiniResult;

pub use hook_renderer::HookRenderer;
pub use hooks::{Deps, EffectFn, Hooks, RefHandle, StateSetter};

/// A component as seen by the renderer. Input is read through [`Hooks::props`].
pub type Component = Arc<dyn Fn(&mut Hooks) -> MiniResult<()> + Send + Sync>;

/// Opaque value handed to every render of a node, read back with [`Hooks::context`].
pub type RenderContext = Arc<dyn Any + Send + Sync>;

/// A keyed, immutable render request. Cloning shares the node; a node that is
/// handed to the renderer again unchanged is not re-rendered.
#[derive(Clone)]
pub struct RenderNode(Arc<NodeInner>);

struct NodeInner {
    key: String,
    component: Component,
    props: Props,
    context: Option<RenderContext>,
}

impl RenderNode {
    pub fn new(
        key: &str,
        component: Component,
        props: Props,
        context: Option<RenderContext>,
    ) -> Self {
        Self(Arc::new(NodeInner {
            key: key.to_string(),
            component,
            props,
            context,
        }))
    }

    pub fn key(&self) -> &str {
        &self.0.key
    }

    pub fn props(&self) -> &Props {
        &self.0.props
    }

    pub fn component(&self) -> &Component {
        &self.0.component
    }

    pub fn context(&self) -> Option<&RenderContext> {
        self.0.context.as_ref()
    }

    pub fn same(&self, other: &RenderNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderNode")
            .field("key", &self.0.key)
            .field("props", &Value::Object(self.0.props.clone()))
            .finish()
    }
}

pub trait Renderer: Send + Sync {
    fn create_node(
        &self,
        key: &str,
        component: Component,
        props: Props,
        context: Option<RenderContext>,
    ) -> RenderNode {
        RenderNode::new(key, component, props, context)
    }

    /// Mounts the given root children and returns the handle used for later passes.
    fn mount(&self, nodes: Vec<RenderNode>) -> MiniResult<Arc<dyn MountHandle>>;

    /// Runs `scope`; effects scheduled inside run once the outermost scope ends.
    fn batch(&self, scope: &mut dyn FnMut() -> MiniResult<()>) -> MiniResult<()>;

    /// Renders a node once without committing it or running effects.
    fn render_static(&self, node: RenderNode) -> MiniResult<()>;
}

pub trait MountHandle: Send + Sync {
    /// Reconciles the live children against `nodes` by key.
    fn update(&self, nodes: Vec<RenderNode>) -> MiniResult<()>;

    fn unmount(&self) -> MiniResult<()>;
}
