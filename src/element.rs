//! # Element definition
//!
//! Turns a component function into the definition object a host runtime
//! consumes. Defining an element wires up a registry, a lifecycle binder and an
//! instance mount, runs the component once statically with default props to
//! discover its event names and initial data, then locks the name set and hands
//! the resulting trampolines to the platform for assembly.

use std::fmt;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::{self, CapabilityCache, Component2Status, HostProbe, StaticProbe};
use crate::config::MiniConfig;
use crate::handler_registry::HandlerRegistry;
use crate::host::{HostInstance, HostRef, InstanceMarker, InstanceSlot};
use crate::lifecycle::LifecycleBinder;
use crate::mount::{ElementFn, InstanceMount, MountSettings, MountSetup};
use crate::platform::{
    platform_for, DefinitionObject, DefinitionParts, ElementKind, HostMethod, Platform,
    PlatformError, PlatformName,
};
use crate::renderer::{HookRenderer, Hooks, Renderer};
use crate::value::{data_map_to_json, DataMap, Props};
use crate::{Error, MiniResult};

/// How to define an element.
#[derive(Clone)]
pub struct ElementOptions {
    pub display_name: String,
    pub kind: ElementKind,
    /// Overrides `config.platform`.
    pub platform: Option<PlatformName>,
    pub default_props: Props,
    /// Merged into the definition's `options`.
    pub host_options: Props,
    pub config: MiniConfig,
    pub probe: Option<Arc<dyn HostProbe>>,
    pub capability_cache: Option<Arc<CapabilityCache>>,
    pub renderer: Option<Arc<dyn Renderer>>,
}

impl ElementOptions {
    pub fn new(display_name: &str, kind: ElementKind) -> Self {
        Self {
            display_name: display_name.to_string(),
            kind,
            platform: None,
            default_props: Props::new(),
            host_options: Props::new(),
            config: MiniConfig::default(),
            probe: None,
            capability_cache: None,
            renderer: None,
        }
    }

    pub fn page(display_name: &str) -> Self {
        Self::new(display_name, ElementKind::Page)
    }

    pub fn component(display_name: &str) -> Self {
        Self::new(display_name, ElementKind::Component)
    }

    pub fn with_platform(mut self, platform: PlatformName) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Default props; non-object values are ignored.
    pub fn with_default_props(mut self, props: Value) -> Self {
        if let Value::Object(map) = props {
            self.default_props = map;
        }
        self
    }

    pub fn with_host_options(mut self, options: Value) -> Self {
        if let Value::Object(map) = options {
            self.host_options = map;
        }
        self
    }

    pub fn with_config(mut self, config: MiniConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HostProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_capability_cache(mut self, cache: Arc<CapabilityCache>) -> Self {
        self.capability_cache = Some(cache);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    fn platform_name(&self) -> PlatformName {
        self.platform.unwrap_or(self.config.platform)
    }

    fn tag(&self) -> String {
        let name = if self.display_name.is_empty() {
            "(unnamed)"
        } else {
            self.display_name.as_str()
        };
        format!("[{}/{}]", self.kind, name)
    }

    fn resolve_probe(&self) -> Arc<dyn HostProbe> {
        match &self.probe {
            Some(probe) => probe.clone(),
            None => {
                let configured = StaticProbe::from(&self.config.probe);
                if configured.is_empty() {
                    Arc::new(StaticProbe::for_platform(self.platform_name()))
                } else {
                    Arc::new(configured)
                }
            }
        }
    }
}

/// A defined page or component.
pub struct Definition {
    tag: String,
    kind: ElementKind,
    platform: &'static dyn Platform,
    object: DefinitionObject,
    init_data: Value,
    registry: HandlerRegistry<HostRef>,
    mount: InstanceMount,
}

impl Definition {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    /// The table handed to `Page()` / `Component()`.
    pub fn object(&self) -> &DefinitionObject {
        &self.object
    }

    /// Data collected by the static pre-render.
    pub fn init_data(&self) -> &Value {
        &self.init_data
    }

    pub fn registry(&self) -> &HandlerRegistry<HostRef> {
        &self.registry
    }

    pub fn mount(&self) -> &InstanceMount {
        &self.mount
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("tag", &self.tag)
            .field("platform", &self.platform.name())
            .field("object", &self.object)
            .finish()
    }
}

/// Host stand-in for the definition-time render: collects everything pushed.
struct PreRenderHost {
    marker: InstanceMarker,
    data: Mutex<DataMap>,
    slot: InstanceSlot,
}

impl PreRenderHost {
    fn new(prop_keys: Vec<String>) -> MiniResult<Self> {
        let slot = InstanceSlot::new();
        slot.set_prop_keys(prop_keys)?;
        Ok(Self {
            marker: InstanceMarker {
                id: Some(format!("_pre_render_{}", Uuid::new_v4())),
                ..Default::default()
            },
            data: Mutex::new(DataMap::new()),
            slot,
        })
    }
}

impl HostInstance for PreRenderHost {
    fn set_data(&self, patch: DataMap) -> MiniResult<()> {
        self.data
            .lock()
            .map_err(|e| Error::internal(format!("pre-render data poisoned: {}", e)))?
            .extend(patch);
        Ok(())
    }

    fn data(&self) -> DataMap {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn marker(&self) -> InstanceMarker {
        self.marker.clone()
    }

    fn slot(&self) -> &InstanceSlot {
        &self.slot
    }
}

fn check_component2(options: &ElementOptions, tag: &str, probe: &dyn HostProbe) -> MiniResult<()> {
    if options.kind != ElementKind::Component || options.platform_name() != PlatformName::Alipay {
        return Ok(());
    }
    let cache = options
        .capability_cache
        .clone()
        .unwrap_or_else(capability::shared);
    match cache.resolve(probe) {
        Component2Status::Invalid => Err(PlatformError::Component2Disabled {
            tag: tag.to_string(),
        }
        .into()),
        Component2Status::Unknown => {
            debug!(tag = %tag, "component2 status unknown");
            Ok(())
        }
        Component2Status::Valid => Ok(()),
    }
}

struct Classified {
    lifecycles: IndexMap<String, HostMethod>,
    component_page_events: IndexMap<String, HostMethod>,
    user_handlers: IndexMap<String, HostMethod>,
}

fn classify(
    platform: &dyn Platform,
    kind: ElementKind,
    proxy: IndexMap<String, HostMethod>,
) -> Classified {
    let mut classified = Classified {
        lifecycles: IndexMap::new(),
        component_page_events: IndexMap::new(),
        user_handlers: IndexMap::new(),
    };
    for (name, method) in proxy {
        if kind == ElementKind::Component && platform.component_page_events().contains(&name.as_str())
        {
            classified.component_page_events.insert(name, method);
        } else if platform.exposed_events(kind).contains(&name.as_str()) {
            classified.lifecycles.insert(name, method);
        } else {
            classified.user_handlers.insert(name, method);
        }
    }
    classified
}

/// Defines a page or component from a component function.
pub fn define_element<F>(element: F, options: ElementOptions) -> MiniResult<Definition>
where
    F: Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync + 'static,
{
    let tag = options.tag();
    if options.display_name.is_empty() {
        warn!(tag = %tag, "element has no display name, errors will be hard to trace");
    }

    let platform = platform_for(options.platform_name());
    let probe = options.resolve_probe();
    check_component2(&options, &tag, probe.as_ref())?;

    let registry = HandlerRegistry::new(&tag);
    let binder = Arc::new(LifecycleBinder::new(
        &tag,
        platform,
        options.kind,
        registry.clone(),
        probe,
    ));
    let renderer = options
        .renderer
        .clone()
        .unwrap_or_else(|| Arc::new(HookRenderer::new()));
    let element: ElementFn = Arc::new(element);
    let mount = InstanceMount::new(MountSetup {
        tag: tag.clone(),
        binder: binder.clone(),
        settings: MountSettings {
            skip_equal_props: options
                .config
                .skip_equal_props
                .unwrap_or_else(|| platform.skip_equal_props()),
            volatile_prop_keys: options.config.volatile_prop_keys.clone(),
            allow_data_bypass: options.config.allow_data_bypass,
        },
        default_props: options.default_props.clone(),
        element,
        renderer,
    });
    let observers = mount.bind_lifecycles().map_err(|e| e.tagged(&tag))?;

    let pre_render = Arc::new(PreRenderHost::new(mount.prop_keys().to_vec()).map_err(|e| e.tagged(&tag))?);
    let host: HostRef = pre_render.clone();
    mount.pre_render(&host).map_err(|e| e.tagged(&tag))?;
    let init_data = data_map_to_json(&pre_render.data());

    binder.lock().map_err(|e| e.tagged(&tag))?;

    let proxy = registry.build_host_proxy().map_err(|e| e.tagged(&tag))?;
    let classified = classify(platform, options.kind, proxy);
    debug!(
        tag = %tag,
        lifecycles = ?classified.lifecycles.keys().collect::<Vec<_>>(),
        handlers = ?classified.user_handlers.keys().collect::<Vec<_>>(),
        "handler names locked"
    );

    let object = platform
        .assemble_definition(DefinitionParts {
            kind: options.kind,
            default_props: options.default_props,
            data: init_data.clone(),
            options: options.host_options,
            lifecycles: classified.lifecycles,
            component_page_events: classified.component_page_events,
            user_handlers: classified.user_handlers,
            observers,
        })
        .map_err(|e| e.tagged(&tag))?;
    info!(tag = %tag, platform = %platform.name(), "element defined");

    Ok(Definition {
        tag,
        kind: options.kind,
        platform,
        object,
        init_data,
        registry,
        mount,
    })
}

fn define_with<F>(element: F, options: ElementOptions, platform: PlatformName) -> MiniResult<Definition>
where
    F: Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync + 'static,
{
    define_element(element, options.with_platform(platform))
}

pub fn alipay_page<F>(display_name: &str, element: F) -> MiniResult<Definition>
where
    F: Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync + 'static,
{
    define_with(element, ElementOptions::page(display_name), PlatformName::Alipay)
}

pub fn wechat_page<F>(display_name: &str, element: F) -> MiniResult<Definition>
where
    F: Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync + 'static,
{
    define_with(element, ElementOptions::page(display_name), PlatformName::Wechat)
}

pub fn alipay_component<F>(display_name: &str, element: F, default_props: Value) -> MiniResult<Definition>
where
    F: Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync + 'static,
{
    define_with(
        element,
        ElementOptions::component(display_name).with_default_props(default_props),
        PlatformName::Alipay,
    )
}

pub fn wechat_component<F>(display_name: &str, element: F, default_props: Value) -> MiniResult<Definition>
where
    F: Fn(&mut Hooks, &Props) -> MiniResult<Value> + Send + Sync + 'static,
{
    define_with(
        element,
        ElementOptions::component(display_name).with_default_props(default_props),
        PlatformName::Wechat,
    )
}
