//! Per-instance identity derivation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::handler_registry::HandlerError;
use crate::host::{HostInstance, HostRef};
use crate::MiniResult;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

/// Stable key naming one live instance across repeated lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The receiver a dispatch runs against.
///
/// Dispatch never relies on implicit receiver binding: every call carries a
/// context value that can name its own identity.
pub trait CallContext: Send + Sync {
    fn identity(&self) -> MiniResult<Identity>;
}

impl CallContext for Identity {
    fn identity(&self) -> MiniResult<Identity> {
        if self.is_empty() {
            return Err(HandlerError::MissingContext.into());
        }
        Ok(self.clone())
    }
}

impl CallContext for HostRef {
    fn identity(&self) -> MiniResult<Identity> {
        derive_identity(self.as_ref())
    }
}

/// Derives the identity of a host instance.
///
/// Marker fields win; otherwise an identity cached on the instance slot is reused,
/// and as a last resort a counter-based identity is assigned and cached.
pub fn derive_identity(host: &dyn HostInstance) -> MiniResult<Identity> {
    let marker = host.marker();
    let identity = match marker.id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => Identity::new(format!(
            "{}-{}-{}",
            id,
            marker.page_view_id.as_deref().unwrap_or(""),
            marker.definition_type.as_deref().unwrap_or("page"),
        )),
        None => host
            .slot()
            .identity_or_init(|| {
                let n = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
                Identity::new(format!("instance-{}", n))
            })
            .clone(),
    };
    if identity.is_empty() {
        return Err(HandlerError::MissingContext.into());
    }
    Ok(identity)
}
