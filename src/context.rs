use std::sync::Arc;

use crate::handler_registry::HandlerRegistry;
use crate::host::HostRef;
use crate::identity::Identity;
use crate::lifecycle::LifecycleBinder;
use crate::platform::Platform;

/// Everything a hook needs to know about the instance it runs for.
///
/// Passed explicitly to every render of an instance; never inferred from a
/// receiver.
pub struct ElementContext {
    pub instance: HostRef,
    pub identity: Identity,
    pub binder: Arc<LifecycleBinder>,
    /// Set while rendering once at definition time to discover names and initial data.
    pub server_render: bool,
    pub tag: String,
}

impl ElementContext {
    pub fn registry(&self) -> &HandlerRegistry<HostRef> {
        self.binder.registry()
    }

    pub fn platform(&self) -> &'static dyn Platform {
        self.binder.platform()
    }
}
