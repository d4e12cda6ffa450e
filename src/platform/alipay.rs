use indexmap::IndexMap;
use serde_json::Value;

use super::definition::{page_definition, DefinitionObject, DefinitionParts};
use super::{ElementKind, Platform, PlatformName, PropsUpdate, COMMON_COMPONENT_EVENTS};
use crate::capability::HostProbe;
use crate::host::HostInstance;
use crate::value::Props;
use crate::MiniResult;

const PAGE_EVENTS: &[&str] = &[
    "onLoad",
    "onShow",
    "onReady",
    "onHide",
    "onPullDownRefresh",
    "onReachBottom",
    "onShareAppMessage",
    "onPageScroll",
    "onTabItemTap",
    "onResize",
    "onUnload",
    "onTitleClick",
    "onOptionMenuClick",
    "beforeTabItemTap",
    "onKeyboardHeight",
    "onBack",
    "onSelectedTabItemTap",
    "beforeReload",
];

const COMPONENT_EVENTS: &[&str] = &[
    "created",
    "attached",
    "ready",
    "moved",
    "detached",
    "onInit",
    "didMount",
    "didUpdate",
    "deriveDataFromProps",
    "didUnmount",
];

/// Alipay mini-program runtime (`my` global, component2 lifecycles).
#[derive(Debug, Default, Clone, Copy)]
pub struct Alipay;

impl Platform for Alipay {
    fn name(&self) -> PlatformName {
        PlatformName::Alipay
    }

    fn tell_if_in_this_platform(&self, probe: &dyn HostProbe) -> bool {
        probe.has_global("my")
    }

    fn page_events(&self) -> &'static [&'static str] {
        PAGE_EVENTS
    }

    fn component_events(&self) -> &'static [&'static str] {
        COMPONENT_EVENTS
    }

    fn map_component_page_event(&self, name: &str) -> Option<&'static str> {
        match name {
            "page:show" => Some("onShow"),
            "page:hide" => Some("onHide"),
            _ => None,
        }
    }

    fn mount_lifecycle(&self, kind: ElementKind) -> &'static str {
        match kind {
            ElementKind::Page => "onLoad",
            ElementKind::Component => "onInit",
        }
    }

    fn unmount_lifecycle(&self, kind: ElementKind) -> &'static str {
        match kind {
            ElementKind::Page => "onUnload",
            ElementKind::Component => "didUnmount",
        }
    }

    fn props_update(&self) -> PropsUpdate {
        PropsUpdate::Lifecycle("deriveDataFromProps")
    }

    // deriveDataFromProps also fires after every setData
    fn skip_equal_props(&self) -> bool {
        true
    }

    fn supports_event_result(&self) -> bool {
        true
    }

    fn read_input_from_host(&self, host: &dyn HostInstance, _keys: &[String]) -> Props {
        host.props()
    }

    fn assemble_definition(&self, parts: DefinitionParts) -> MiniResult<DefinitionObject> {
        if parts.kind == ElementKind::Page {
            return Ok(page_definition(parts));
        }

        let mut common = IndexMap::new();
        let mut own = IndexMap::new();
        for (name, method) in parts.lifecycles {
            if COMMON_COMPONENT_EVENTS.contains(&name.as_str()) {
                common.insert(name, method);
            } else {
                own.insert(name, method);
            }
        }

        let page_events = parts
            .component_page_events
            .into_iter()
            .filter_map(|(name, method)| {
                self.map_component_page_event(&name)
                    .map(|host_name| (host_name.to_string(), method))
            })
            .collect();

        let mut options = Props::new();
        options.insert("lifetimes".to_string(), Value::Bool(true));
        options.extend(parts.options);

        let mut object = DefinitionObject::new();
        object
            .insert_table("pageEvents", DefinitionObject::from_methods(page_events))
            .insert_data("props", Value::Object(parts.default_props))
            .insert_data("data", parts.data)
            .insert_data("options", Value::Object(options))
            .insert_table("lifetimes", DefinitionObject::from_methods(common))
            .extend_methods(own)
            .insert_table(
                "methods",
                DefinitionObject::from_methods(parts.user_handlers),
            );
        Ok(object)
    }
}
