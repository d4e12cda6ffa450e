mod alipay_component_test;
mod page_test;
mod wechat_component_test;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use minifish::simulator::SimHost;
use minifish::HostRef;

/// Counts component renders across all instances of a definition.
#[derive(Clone, Default)]
pub struct RenderCount(Arc<AtomicUsize>);

impl RenderCount {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn host_ref(host: &Arc<SimHost>) -> HostRef {
    host.clone()
}
