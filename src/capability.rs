//! Runtime probing and the memoized `component2` status.

use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::platform::PlatformName;

/// Questions asked of the surrounding mini-program runtime.
#[cfg_attr(test, mockall::automock)]
pub trait HostProbe: Send + Sync {
    /// Whether a global such as `my` or `wx` exists.
    fn has_global(&self, name: &str) -> bool;

    /// Host `canIUse` answer for a capability.
    fn can_i_use(&self, capability: &str) -> bool;
}

/// Probe answering from a fixed list, usually loaded from [`ProbeConfig`].
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    globals: Vec<String>,
    capabilities: Vec<String>,
}

impl StaticProbe {
    pub fn new(globals: Vec<String>, capabilities: Vec<String>) -> Self {
        Self {
            globals,
            capabilities,
        }
    }

    /// A probe reporting the runtime of `platform`, with `component2` enabled on Alipay.
    pub fn for_platform(platform: PlatformName) -> Self {
        match platform {
            PlatformName::Alipay => Self::new(vec!["my".into()], vec!["component2".into()]),
            PlatformName::Wechat => Self::new(vec!["wx".into()], vec![]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty() && self.capabilities.is_empty()
    }
}

impl From<&ProbeConfig> for StaticProbe {
    fn from(config: &ProbeConfig) -> Self {
        Self::new(config.globals.clone(), config.capabilities.clone())
    }
}

impl HostProbe for StaticProbe {
    fn has_global(&self, name: &str) -> bool {
        self.globals.iter().any(|g| g == name)
    }

    fn can_i_use(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Component2Status {
    Valid,
    Invalid,
    Unknown,
}

/// Memoizes whether Alipay `component2` is enabled.
#[derive(Debug)]
pub struct CapabilityCache {
    status: Mutex<Component2Status>,
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(Component2Status::Unknown),
        }
    }

    pub fn get(&self) -> Component2Status {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(Component2Status::Unknown)
    }

    pub fn invalidate(&self) {
        self.force_set(Component2Status::Unknown);
    }

    pub fn force_set(&self, status: Component2Status) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    /// Probes once while the status is unknown. Outside Alipay the status stays unknown.
    pub fn resolve(&self, probe: &dyn HostProbe) -> Component2Status {
        let Ok(mut status) = self.status.lock() else {
            return Component2Status::Unknown;
        };
        if *status == Component2Status::Unknown && probe.has_global("my") {
            *status = if probe.can_i_use("component2") {
                Component2Status::Valid
            } else {
                Component2Status::Invalid
            };
            debug!(status = %*status, "component2 status resolved");
        }
        *status
    }
}

lazy_static! {
    static ref SHARED_CACHE: Arc<CapabilityCache> = Arc::new(CapabilityCache::new());
}

/// The process-wide cache used by definitions that are not given their own.
pub fn shared() -> Arc<CapabilityCache> {
    SHARED_CACHE.clone()
}
