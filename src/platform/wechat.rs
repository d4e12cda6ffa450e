use serde_json::{json, Value};

use super::definition::{page_definition, DefinitionObject, DefinitionParts};
use super::{ElementKind, Platform, PlatformName, PropsUpdate, COMMON_PAGE_EVENTS};
use crate::capability::HostProbe;
use crate::host::HostInstance;
use crate::value::{Props, ValueKind};
use crate::MiniResult;

const COMPONENT_EVENTS: &[&str] = &["created", "attached", "ready", "moved", "detached", "error"];

/// WeChat mini-program runtime (`wx` global, `lifetimes` / `observers`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Wechat;

/// Constructor name WeChat expects in `properties[key].type`; `null` accepts any type.
pub fn property_type(value: &Value) -> Value {
    match ValueKind::of(value) {
        ValueKind::String => json!("String"),
        ValueKind::Number => json!("Number"),
        ValueKind::Boolean => json!("Boolean"),
        ValueKind::Array => json!("Array"),
        ValueKind::Mapping => json!("Object"),
        ValueKind::Null | ValueKind::Function => Value::Null,
    }
}

impl Platform for Wechat {
    fn name(&self) -> PlatformName {
        PlatformName::Wechat
    }

    fn tell_if_in_this_platform(&self, probe: &dyn HostProbe) -> bool {
        probe.has_global("wx")
    }

    fn page_events(&self) -> &'static [&'static str] {
        COMMON_PAGE_EVENTS
    }

    fn component_events(&self) -> &'static [&'static str] {
        COMPONENT_EVENTS
    }

    fn map_component_page_event(&self, name: &str) -> Option<&'static str> {
        match name {
            "page:show" => Some("show"),
            "page:hide" => Some("hide"),
            _ => None,
        }
    }

    fn mount_lifecycle(&self, kind: ElementKind) -> &'static str {
        match kind {
            ElementKind::Page => "onLoad",
            ElementKind::Component => "attached",
        }
    }

    fn unmount_lifecycle(&self, kind: ElementKind) -> &'static str {
        match kind {
            ElementKind::Page => "onUnload",
            ElementKind::Component => "detached",
        }
    }

    fn props_update(&self) -> PropsUpdate {
        PropsUpdate::Observers
    }

    fn skip_equal_props(&self) -> bool {
        false
    }

    fn supports_event_result(&self) -> bool {
        false
    }

    /// WeChat mixes properties into `data`, so declared keys are read from there.
    fn read_input_from_host(&self, host: &dyn HostInstance, keys: &[String]) -> Props {
        let data = host.data();
        keys.iter()
            .map(|key| {
                let value = data
                    .get(key)
                    .and_then(|v| v.as_data().cloned())
                    .unwrap_or(Value::Null);
                (key.clone(), value)
            })
            .collect()
    }

    fn assemble_definition(&self, parts: DefinitionParts) -> MiniResult<DefinitionObject> {
        if parts.kind == ElementKind::Page {
            return Ok(page_definition(parts));
        }

        let mut properties = Props::new();
        for (key, value) in &parts.default_props {
            properties.insert(
                key.clone(),
                json!({"type": property_type(value), "value": value}),
            );
        }

        let page_lifetimes = parts
            .component_page_events
            .into_iter()
            .filter_map(|(name, method)| {
                self.map_component_page_event(&name)
                    .map(|host_name| (host_name.to_string(), method))
            })
            .collect();

        let mut object = DefinitionObject::new();
        object
            .insert_table(
                "pageLifetimes",
                DefinitionObject::from_methods(page_lifetimes),
            )
            .insert_data("properties", Value::Object(properties))
            .insert_data("data", parts.data)
            .insert_data("options", Value::Object(parts.options))
            .insert_table("observers", DefinitionObject::from_methods(parts.observers))
            .insert_table("lifetimes", DefinitionObject::from_methods(parts.lifecycles))
            .insert_table(
                "methods",
                DefinitionObject::from_methods(parts.user_handlers),
            );
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_registry::DispatchOutcome;
    use crate::host::InstanceSlot;
    use crate::platform::HostMethod;
    use crate::value::{data_map_from_json, DataMap};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct DataOnly {
        data: DataMap,
        slot: InstanceSlot,
    }

    impl HostInstance for DataOnly {
        fn set_data(&self, _patch: DataMap) -> MiniResult<()> {
            Ok(())
        }
        fn data(&self) -> DataMap {
            self.data.clone()
        }
        fn slot(&self) -> &InstanceSlot {
            &self.slot
        }
    }

    #[test]
    fn test_property_types_follow_default_values() {
        assert_eq!(property_type(&json!("a")), json!("String"));
        assert_eq!(property_type(&json!(1.5)), json!("Number"));
        assert_eq!(property_type(&json!(false)), json!("Boolean"));
        assert_eq!(property_type(&json!([])), json!("Array"));
        assert_eq!(property_type(&json!({})), json!("Object"));
        assert_eq!(property_type(&Value::Null), Value::Null);
    }

    #[test]
    fn test_component_definition_shape() {
        let method: HostMethod = Arc::new(|_, _| Ok(DispatchOutcome::Empty));
        let mut lifecycles = IndexMap::new();
        lifecycles.insert("attached".to_string(), method.clone());
        let mut observers = IndexMap::new();
        observers.insert("a, b".to_string(), method.clone());
        let mut page_events = IndexMap::new();
        page_events.insert("page:hide".to_string(), method);

        let object = Wechat
            .assemble_definition(DefinitionParts {
                kind: ElementKind::Component,
                default_props: json!({"a": 1, "b": "x"}).as_object().cloned().unwrap(),
                data: json!({}),
                options: Props::new(),
                lifecycles,
                component_page_events: page_events,
                user_handlers: IndexMap::new(),
                observers,
            })
            .unwrap();

        assert_eq!(
            object.describe(),
            json!({
                "pageLifetimes": {"hide": "[method]"},
                "properties": {
                    "a": {"type": "Number", "value": 1},
                    "b": {"type": "String", "value": "x"},
                },
                "data": {},
                "options": {},
                "observers": {"a, b": "[method]"},
                "lifetimes": {"attached": "[method]"},
                "methods": {},
            })
        );
    }

    #[test]
    fn test_props_are_read_from_data() {
        let host = DataOnly {
            data: data_map_from_json(&json!({"a": 2, "internal": true})),
            slot: InstanceSlot::new(),
        };
        let keys = vec!["a".to_string(), "b".to_string()];
        let props = Wechat.read_input_from_host(&host, &keys);
        assert_eq!(Value::Object(props), json!({"a": 2, "b": null}));
    }
}
