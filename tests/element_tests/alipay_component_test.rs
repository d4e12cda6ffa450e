use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use minifish::handler_registry::CleanupFn;
use minifish::identity::CallContext;
use minifish::mount::MountError;
use minifish::platform::PlatformError;
use minifish::simulator::SimHost;
use minifish::{
    alipay_component, define_element, CapabilityCache, Component2Status, Definition, Deps,
    ElementOptions, Error, Hooks, InstanceMarker, LifecycleHook, MiniConfig, MiniHooks,
    PlatformName, Props, StaticProbe,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use super::{host_ref, RenderCount};

fn label(_hooks: &mut Hooks, props: &Props) -> minifish::MiniResult<Value> {
    let title = props.get("title").and_then(Value::as_str).unwrap_or_default();
    let size = props.get("size").and_then(Value::as_i64).unwrap_or_default();
    Ok(json!({"label": format!("{}:{}", title, size)}))
}

fn label_component(renders: &RenderCount, config: MiniConfig) -> Definition {
    let counter = renders.clone();
    define_element(
        move |hooks: &mut Hooks, props: &Props| {
            counter.hit();
            label(hooks, props)
        },
        ElementOptions::component("Label")
            .with_platform(PlatformName::Alipay)
            .with_default_props(json!({"title": "t", "size": 1}))
            .with_config(config),
    )
    .unwrap()
}

#[test]
fn test_props_merge_and_equal_props_are_skipped() {
    let renders = RenderCount::default();
    let component = label_component(&renders, MiniConfig::default());
    assert_eq!(component.init_data(), &json!({"label": "t:1"}));
    assert_eq!(renders.get(), 1);

    let sim = SimHost::new(&component);
    sim.mount(json!({"size": 2})).unwrap();
    assert_eq!(sim.data_json()["label"], json!("t:2"));
    assert_eq!(renders.get(), 2);

    sim.update_props(json!({"size": 3})).unwrap();
    assert_eq!(sim.data_json()["label"], json!("t:3"));
    assert_eq!(renders.get(), 3);

    sim.update_props(json!({"size": 3})).unwrap();
    sim.update_props(json!({"size": 3, "$slots": {"default": true}}))
        .unwrap();
    assert_eq!(renders.get(), 3);
    assert_eq!(sim.set_data_calls().len(), 2);

    let committed = component
        .mount()
        .committed_input(&host_ref(&sim).identity().unwrap())
        .unwrap();
    assert_eq!(Value::Object(committed), json!({"title": "t", "size": 3}));
}

#[test]
fn test_failed_render_does_not_commit_its_input() {
    let failing = Arc::new(AtomicBool::new(false));
    let flag = failing.clone();
    let component = alipay_component(
        "Flaky",
        move |hooks: &mut Hooks, props: &Props| {
            if flag.load(Ordering::SeqCst) {
                return Err(Error::user("label unavailable"));
            }
            label(hooks, props)
        },
        json!({"title": "t", "size": 1}),
    )
    .unwrap();
    let sim = SimHost::new(&component);
    sim.mount(json!({"size": 2})).unwrap();
    let identity = host_ref(&sim).identity().unwrap();

    failing.store(true, Ordering::SeqCst);
    assert!(sim.update_props(json!({"size": 3})).is_err());
    let committed = component.mount().committed_input(&identity).unwrap();
    assert_eq!(Value::Object(committed), json!({"title": "t", "size": 2}));

    failing.store(false, Ordering::SeqCst);
    sim.update_props(json!({"size": 3})).unwrap();
    assert_eq!(sim.data_json()["label"], json!("t:3"));
}

#[test]
fn test_unmounted_instance_releases_its_host() {
    let component = label_component(&RenderCount::default(), MiniConfig::default());
    let sim = SimHost::new(&component);
    sim.mount(json!({})).unwrap();
    let identity = host_ref(&sim).identity().unwrap();
    sim.unmount().unwrap();
    assert!(!component.mount().is_live(&identity));

    let weak = Arc::downgrade(&sim);
    drop(sim);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_skip_policy_can_be_overridden() {
    let renders = RenderCount::default();
    let config = MiniConfig {
        skip_equal_props: Some(false),
        ..Default::default()
    };
    let component = label_component(&renders, config);
    let sim = SimHost::new(&component);
    sim.mount(json!({"size": 2})).unwrap();

    let before = renders.get();
    sim.update_props(json!({"size": 2})).unwrap();
    assert_eq!(renders.get(), before + 1);
    assert_eq!(sim.set_data_calls().len(), 1);
}

#[test]
fn test_output_keys_must_not_shadow_props() {
    let err = alipay_component("Clash", |_, _| Ok(json!({"foo": 2})), json!({"foo": 1}))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("[component/Clash]"), "{}", message);
    assert!(matches!(
        err.root(),
        Error::Mount(MountError::KeyCollision { keys }) if keys == "foo"
    ));
}

#[test]
fn test_component2_must_be_enabled() {
    let options = ElementOptions::component("Card")
        .with_platform(PlatformName::Alipay)
        .with_probe(Arc::new(StaticProbe::new(vec!["my".into()], vec![])))
        .with_capability_cache(Arc::new(CapabilityCache::new()));
    let err = define_element(label, options.clone()).unwrap_err();
    assert!(matches!(
        err,
        Error::Platform(PlatformError::Component2Disabled { ref tag }) if tag == "[component/Card]"
    ));

    // a resolved status is not probed again
    let cache = Arc::new(CapabilityCache::new());
    cache.force_set(Component2Status::Valid);
    assert!(define_element(label, options.with_capability_cache(cache)).is_ok());
}

#[test]
fn test_unmount_runs_effect_cleanups() {
    let cleanups = RenderCount::default();
    let counter = cleanups.clone();
    let component = alipay_component(
        "Effects",
        move |hooks, _| {
            let counter = counter.clone();
            hooks.use_effect(Deps::Once, move || {
                let cleanup: CleanupFn = Box::new(move || {
                    counter.hit();
                    Ok(())
                });
                Ok(Some(cleanup))
            })?;
            Ok(json!({}))
        },
        json!({}),
    )
    .unwrap();

    let sim = SimHost::new(&component);
    sim.mount(json!({})).unwrap();
    assert_eq!(cleanups.get(), 0);
    sim.unmount().unwrap();
    assert_eq!(cleanups.get(), 1);

    // late props for an unmounted instance are dropped
    sim.update_props(json!({"x": 1})).unwrap();
    assert_eq!(component.mount().live_count(), 0);
}

#[test]
fn test_duplicate_live_identity_is_fatal() {
    let renders = RenderCount::default();
    let component = label_component(&renders, MiniConfig::default());
    let marker = InstanceMarker {
        id: Some("1".into()),
        page_view_id: Some("view".into()),
        definition_type: Some("label".into()),
    };
    let first = SimHost::with_marker(&component, marker.clone());
    let second = SimHost::with_marker(&component, marker);
    first.mount(json!({})).unwrap();

    let err = component
        .mount()
        .on_host_mount(&host_ref(&second), &[])
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Mount(MountError::DuplicateIdentity { identity }) if identity == "1-view-label"
    ));
    assert_eq!(component.mount().live_count(), 1);
}

#[test]
fn test_component_page_events_and_definition_shape() {
    let shows = RenderCount::default();
    let counter = shows.clone();
    let component = alipay_component(
        "Visible",
        move |hooks, _| {
            let counter = counter.clone();
            hooks.use_lifecycle(LifecycleHook::PageShow, move |_| {
                counter.hit();
                Ok(().into())
            })?;
            Ok(json!({}))
        },
        json!({"title": "t"}),
    )
    .unwrap();

    assert_eq!(
        component.object().keys().collect::<Vec<_>>(),
        vec![
            "pageEvents",
            "props",
            "data",
            "options",
            "lifetimes",
            "onInit",
            "didUnmount",
            "deriveDataFromProps",
            "methods",
        ]
    );
    assert_eq!(component.object().data("options"), Some(&json!({"lifetimes": true})));
    assert!(component.object().method_at(&["pageEvents", "onShow"]).is_some());

    let sim = SimHost::new(&component);
    sim.mount(json!({})).unwrap();
    sim.call_page_event("page:show", &[]).unwrap();
    assert_eq!(shows.get(), 1);
}
