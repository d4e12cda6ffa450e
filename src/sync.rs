//! # DataSync
//!
//! Pushes render output into host state with the smallest possible patch.
//!
//! Each pass compares the current output against the host's own view of its
//! data, and against what this instance pushed last time. Keys that disappeared
//! from the output are written as `null` because the host has no delete
//! primitive; declared input keys are left alone since the host mirrors props
//! into data on some platforms.

use thiserror::Error;
use tracing::debug;

use crate::host::HostInstance;
use crate::value::{DataMap, HostValue};
use crate::MiniResult;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{key} - functions cannot be pushed as data")]
    FunctionValue { key: String },

    #[error("{key} - cannot overwrite a function already held in data")]
    HostFunctionOverwrite { key: String },
}

#[derive(Debug, Clone, Default)]
pub struct DataSync {
    last_pushed: Option<DataMap>,
}

impl DataSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_pushed(&self) -> Option<&DataMap> {
        self.last_pushed.as_ref()
    }

    /// Computes the patch that brings `host_state` in line with `current`.
    pub fn diff(
        &self,
        current: &DataMap,
        host_state: &DataMap,
        declared_keys: &[String],
    ) -> MiniResult<DataMap> {
        let mut staged = DataMap::new();
        for (key, value) in current {
            if matches!(value, HostValue::Method(_)) {
                return Err(SyncError::FunctionValue { key: key.clone() }.into());
            }
            match host_state.get(key) {
                Some(HostValue::Method(_)) => {
                    return Err(SyncError::HostFunctionOverwrite { key: key.clone() }.into())
                }
                Some(existing) if existing == value => {}
                _ => {
                    staged.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(last) = &self.last_pushed {
            for key in last.keys() {
                if declared_keys.contains(key) || current.contains_key(key) {
                    continue;
                }
                staged.insert(key.clone(), HostValue::Data(serde_json::Value::Null));
            }
        }
        Ok(staged)
    }

    /// Diffs and pushes. Returns whether `set_data` was called.
    pub fn sync(
        &mut self,
        current: &DataMap,
        host: &dyn HostInstance,
        declared_keys: &[String],
    ) -> MiniResult<bool> {
        let staged = self.diff(current, &host.data(), declared_keys)?;
        let pushed = !staged.is_empty();
        if pushed {
            debug!(keys = ?staged.keys().collect::<Vec<_>>(), "calling set_data");
            host.set_data(staged)?;
        }
        self.last_pushed = Some(current.clone());
        Ok(pushed)
    }
}
