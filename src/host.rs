//! The host instance capability: the mini-program runtime object a definition is
//! attached to.

use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;

use crate::identity::Identity;
use crate::platform::PlatformError;
use crate::value::{DataMap, Props};
use crate::{Error, MiniResult};

/// Instance-identifying fields a host may expose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceMarker {
    /// Alipay `$id`.
    pub id: Option<String>,
    /// `$page.$viewId` of the page owning the instance.
    pub page_view_id: Option<String>,
    /// Definition type path (`is`); absent for pages.
    pub definition_type: Option<String>,
}

/// Book-keeping the core stores on each host instance.
#[derive(Debug, Default)]
pub struct InstanceSlot {
    identity: OnceLock<Identity>,
    prop_keys: Mutex<Vec<String>>,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub(crate) fn identity_or_init(&self, init: impl FnOnce() -> Identity) -> &Identity {
        self.identity.get_or_init(init)
    }

    /// Declared input keys recorded at mount.
    pub fn prop_keys(&self) -> Vec<String> {
        self.prop_keys
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    pub fn set_prop_keys(&self, keys: Vec<String>) -> MiniResult<()> {
        *self
            .prop_keys
            .lock()
            .map_err(|e| Error::internal(format!("instance slot poisoned: {}", e)))? = keys;
        Ok(())
    }
}

/// A live host instance.
///
/// The host invokes the generated definition table at times outside this crate's
/// control; in return the crate only needs to read and write instance state.
pub trait HostInstance: Send + Sync {
    /// Persists a patch into instance state. The host has no delete primitive.
    fn set_data(&self, patch: DataMap) -> MiniResult<()>;

    /// The host's own mirror of instance state.
    fn data(&self) -> DataMap;

    /// Props reported by the host (Alipay `this.props`).
    fn props(&self) -> Props {
        Props::new()
    }

    fn marker(&self) -> InstanceMarker {
        InstanceMarker::default()
    }

    fn slot(&self) -> &InstanceSlot;

    /// Emits an event upwards (WeChat `triggerEvent`).
    fn trigger_event(&self, name: &str, _payload: Value, _options: Value) -> MiniResult<()> {
        Err(PlatformError::TriggerEventUnavailable {
            name: name.to_string(),
        }
        .into())
    }
}

pub type HostRef = Arc<dyn HostInstance>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_keys_round_trip_and_poisoning() {
        let slot = InstanceSlot::new();
        slot.set_prop_keys(vec!["title".to_string()]).unwrap();
        assert_eq!(slot.prop_keys(), vec!["title".to_string()]);

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = slot.prop_keys.lock().unwrap();
            panic!("slot dropped mid-update");
        }));
        assert!(matches!(
            slot.set_prop_keys(Vec::new()),
            Err(Error::Internal(_))
        ));
    }
}
