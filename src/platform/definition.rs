//! The host-consumable definition object.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::handler_registry::Trampoline;
use crate::host::HostRef;
use crate::platform::ElementKind;
use crate::value::Props;

/// A method the host calls with the instance it belongs to.
pub type HostMethod = Trampoline<HostRef>;

#[derive(Clone)]
pub enum Slot {
    Data(Value),
    Method(HostMethod),
    Table(DefinitionObject),
}

/// Ordered table of data, methods and nested tables; the argument of
/// `Page()` / `Component()`.
#[derive(Clone, Default)]
pub struct DefinitionObject {
    entries: IndexMap<String, Slot>,
}

impl DefinitionObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, slot: Slot) -> &mut Self {
        self.entries.insert(key.into(), slot);
        self
    }

    pub fn insert_data<K: Into<String>>(&mut self, key: K, value: Value) -> &mut Self {
        self.insert(key, Slot::Data(value))
    }

    pub fn insert_table<K: Into<String>>(&mut self, key: K, table: DefinitionObject) -> &mut Self {
        self.insert(key, Slot::Table(table))
    }

    pub fn extend_methods(&mut self, methods: IndexMap<String, HostMethod>) -> &mut Self {
        for (name, method) in methods {
            self.entries.insert(name, Slot::Method(method));
        }
        self
    }

    pub fn from_methods(methods: IndexMap<String, HostMethod>) -> Self {
        let mut table = Self::new();
        table.extend_methods(methods);
        table
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.entries.get(key)
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(Slot::Data(value)) => Some(value),
            _ => None,
        }
    }

    pub fn table(&self, key: &str) -> Option<&DefinitionObject> {
        match self.entries.get(key) {
            Some(Slot::Table(table)) => Some(table),
            _ => None,
        }
    }

    pub fn method(&self, key: &str) -> Option<HostMethod> {
        match self.entries.get(key) {
            Some(Slot::Method(method)) => Some(method.clone()),
            _ => None,
        }
    }

    /// Looks a method up through nested tables, e.g. `["lifetimes", "attached"]`.
    pub fn method_at(&self, path: &[&str]) -> Option<HostMethod> {
        match path {
            [] => None,
            [last] => self.method(last),
            [head, rest @ ..] => self.table(head)?.method_at(rest),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON view for logs and assertions; methods show up as `"[method]"`.
    pub fn describe(&self) -> Value {
        let object: Map<String, Value> = self
            .entries
            .iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Data(value) => value.clone(),
                    Slot::Method(_) => Value::String("[method]".to_string()),
                    Slot::Table(table) => table.describe(),
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(object)
    }
}

impl fmt::Debug for DefinitionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Inputs of [`Platform::assemble_definition`](crate::platform::Platform::assemble_definition).
pub struct DefinitionParts {
    pub kind: ElementKind,
    pub default_props: Props,
    /// Initial data collected by the pre-render.
    pub data: Value,
    /// Extra host options merged into `options`.
    pub options: Props,
    pub lifecycles: IndexMap<String, HostMethod>,
    /// Component page events, still under their neutral names (`page:show`).
    pub component_page_events: IndexMap<String, HostMethod>,
    pub user_handlers: IndexMap<String, HostMethod>,
    /// Data observers keyed by the joined prop names.
    pub observers: IndexMap<String, HostMethod>,
}

/// `{data, options, <lifecycles>, <user handlers>}`, shared by every platform.
pub(crate) fn page_definition(parts: DefinitionParts) -> DefinitionObject {
    let mut object = DefinitionObject::new();
    object
        .insert_data("data", parts.data)
        .insert_data("options", Value::Object(parts.options))
        .extend_methods(parts.lifecycles)
        .extend_methods(parts.user_handlers);
    object
}
