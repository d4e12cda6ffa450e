use minifish::handler_registry::HandlerError;
use minifish::identity::CallContext;
use minifish::mount::MountError;
use minifish::platform::PlatformError;
use minifish::simulator::SimHost;
use minifish::{
    alipay_page, define_element, wechat_page, Definition, ElementOptions, Error, EventOptions,
    HandlerReturn, Hooks, LifecycleHook, MiniConfig, MiniHooks, PlatformName, Props,
    DATA_BYPASS_KEY,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use super::{host_ref, RenderCount};

fn counter_page() -> Definition {
    alipay_page("Counter", |hooks: &mut Hooks, props: &Props| {
        let (count, set_count) = hooks.use_state(|| 0i64)?;
        hooks.use_event(
            "onTap",
            move |_| {
                set_count.set(count + 1)?;
                Ok(HandlerReturn::Unit)
            },
            EventOptions::default(),
        )?;
        Ok(json!({
            "count": count,
            "from": props.get("from").cloned().unwrap_or(Value::Null),
        }))
    })
    .unwrap()
}

#[test]
fn test_page_lifecycle_round_trip() {
    let page = counter_page();
    assert_eq!(page.init_data(), &json!({"count": 0, "from": null}));

    let sim = SimHost::new(&page);
    sim.mount(json!({"from": "home"})).unwrap();
    assert_eq!(sim.data_json(), json!({"count": 0, "from": "home"}));
    assert_eq!(sim.set_data_calls().len(), 1);

    sim.call_method("onTap", &[]).unwrap();
    sim.call_method("onTap", &[]).unwrap();
    assert_eq!(sim.data_json()["count"], json!(2));
    assert_eq!(sim.set_data_calls().len(), 3);

    sim.unmount().unwrap();
    assert_eq!(page.mount().live_count(), 0);

    // handlers were unregistered by the final render
    sim.call_method("onTap", &[]).unwrap();
    page.mount()
        .dispatch_new_input(&host_ref(&sim), Props::new())
        .unwrap();
    assert_eq!(sim.data_json()["count"], json!(2));
    assert_eq!(sim.set_data_calls().len(), 3);
}

#[test]
fn test_instances_do_not_share_state() {
    let page = counter_page();
    let x = SimHost::new(&page);
    let y = SimHost::new(&page);
    x.mount(json!({})).unwrap();
    y.mount(json!({})).unwrap();
    assert_eq!(page.mount().live_count(), 2);

    x.call_method("onTap", &[]).unwrap();
    assert_eq!(x.data_json()["count"], json!(1));
    assert_eq!(y.data_json()["count"], json!(0));

    y.unmount().unwrap();
    x.call_method("onTap", &[]).unwrap();
    assert_eq!(x.data_json()["count"], json!(2));
}

#[test]
fn test_reserved_names_are_rejected() {
    let err = alipay_page("Bad", |hooks, _| {
        hooks.use_event("onLoad", |_| Ok(().into()), EventOptions::default())?;
        Ok(json!({}))
    })
    .unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("[page/Bad]"), "{}", message);
    assert!(message.contains("useOnLoad"), "{}", message);
    assert!(matches!(
        err.root(),
        Error::Platform(PlatformError::ReservedLifecycle { .. })
    ));

    let err = wechat_page("Bad", |hooks, _| {
        hooks.use_event("methods", |_| Ok(().into()), EventOptions::default())?;
        Ok(json!({}))
    })
    .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Platform(PlatformError::ReservedProperty { name }) if name == "methods"
    ));
}

#[test]
fn test_lifecycle_hooks_fire_for_their_instance() {
    let shows = RenderCount::default();
    let counter = shows.clone();
    let page = alipay_page("Shows", move |hooks, _| {
        let counter = counter.clone();
        hooks.use_lifecycle(LifecycleHook::OnShow, move |_| {
            counter.hit();
            Ok(().into())
        })?;
        hooks.use_lifecycle(LifecycleHook::OnShareAppMessage, |_| {
            Ok(json!({"title": "share"}).into())
        })?;
        Ok(json!({}))
    })
    .unwrap();

    let sim = SimHost::new(&page);
    sim.mount(json!({})).unwrap();
    assert_eq!(shows.get(), 1);

    let outcome = sim.call_lifecycle("onShareAppMessage", &[]).unwrap();
    assert_eq!(outcome.value(), Some(&json!({"title": "share"})));

    sim.call_lifecycle("onShow", &[]).unwrap();
    assert_eq!(shows.get(), 2);
}

#[test]
fn test_exclusive_hook_rejects_second_handler() {
    let page = alipay_page("Twice", |hooks, _| {
        hooks.use_lifecycle(LifecycleHook::OnShareAppMessage, |_| Ok(().into()))?;
        hooks.use_lifecycle(LifecycleHook::OnShareAppMessage, |_| Ok(().into()))?;
        Ok(json!({}))
    })
    .unwrap();

    let err = SimHost::new(&page).mount(json!({})).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Handler(HandlerError::DuplicateExclusive { .. })
    ));
    assert_eq!(page.mount().live_count(), 0);
}

#[test]
fn test_failed_mount_unregisters_its_handlers() {
    let shows = RenderCount::default();
    let counter = shows.clone();
    let page = alipay_page("Broken", move |hooks, _| {
        let counter = counter.clone();
        hooks.use_lifecycle(LifecycleHook::OnShow, move |_| {
            counter.hit();
            Ok(().into())
        })?;
        hooks.use_lifecycle(LifecycleHook::OnShareAppMessage, |_| Ok(().into()))?;
        hooks.use_lifecycle(LifecycleHook::OnShareAppMessage, |_| Ok(().into()))?;
        Ok(json!({}))
    })
    .unwrap();

    let sim = SimHost::new(&page);
    assert!(sim.mount(json!({})).is_err());
    assert_eq!(page.mount().live_count(), 0);
    assert!(page.mount().is_unknown(&host_ref(&sim).identity().unwrap()));

    sim.call_lifecycle("onShow", &[]).unwrap();
    assert_eq!(shows.get(), 0);

    // mounting again starts from fresh hook state, so the effects run again
    let err = sim.mount(json!({})).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Handler(HandlerError::DuplicateExclusive { .. })
    ));
    assert_eq!(page.mount().live_count(), 0);
}

#[test]
fn test_unmount_without_mount_is_ignored() {
    let renders = RenderCount::default();
    let counter = renders.clone();
    let page = alipay_page("Idle", move |_, _| {
        counter.hit();
        Ok(json!({}))
    })
    .unwrap();
    assert_eq!(renders.get(), 1);

    let sim = SimHost::new(&page);
    sim.unmount().unwrap();
    page.mount().on_host_unmount(&host_ref(&sim)).unwrap();

    assert_eq!(renders.get(), 1);
    assert!(sim.set_data_calls().is_empty());
    assert_eq!(page.mount().live_count(), 0);
}

#[test]
fn test_platform_specific_hooks_are_guarded() {
    let err = wechat_page("Title", |hooks, _| {
        hooks.use_lifecycle(LifecycleHook::OnTitleClick, |_| Ok(().into()))?;
        Ok(json!({}))
    })
    .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Platform(PlatformError::PlatformMismatch {
            expected: PlatformName::Alipay,
            configured: PlatformName::Wechat,
        })
    ));
}

#[test]
fn test_pre_render_collects_initial_data_and_names() {
    let page = wechat_page("Init", |hooks, _| {
        let (n, _) = hooks.use_state(|| 5)?;
        hooks.use_event("onTap", |_| Ok(().into()), EventOptions::default())?;
        Ok(json!({"n": n}))
    })
    .unwrap();

    assert_eq!(page.init_data(), &json!({"n": 5}));
    assert_eq!(page.object().data("data"), Some(&json!({"n": 5})));
    assert_eq!(
        page.object().keys().collect::<Vec<_>>(),
        vec!["data", "options", "onLoad", "onUnload", "onTap"]
    );
    assert!(page.registry().is_locked());
}

#[test]
fn test_output_shape_is_validated() {
    let err = alipay_page("Number", |_, _| Ok(json!(42))).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Mount(MountError::InvalidOutput { .. })
    ));

    let page = alipay_page("Nothing", |_, _| Ok(Value::Null)).unwrap();
    assert_eq!(page.init_data(), &json!({}));
}

fn bypass_query() -> Value {
    let mut query = Map::new();
    query.insert(
        DATA_BYPASS_KEY.to_string(),
        json!("%7B%22a%22%3A1%7D"),
    );
    Value::Object(query)
}

#[test]
fn test_bypass_input_replaces_the_component_call() {
    let renders = RenderCount::default();
    let counter = renders.clone();
    let page = alipay_page("Bypass", move |_, _| {
        counter.hit();
        Ok(json!({"a": 0}))
    })
    .unwrap();
    assert_eq!(renders.get(), 1);

    let sim = SimHost::new(&page);
    sim.mount(bypass_query()).unwrap();
    assert_eq!(renders.get(), 1);
    assert_eq!(sim.data_json(), json!({"a": 1}));
}

#[test]
fn test_bypass_can_be_disabled() {
    let renders = RenderCount::default();
    let counter = renders.clone();
    let config = MiniConfig {
        allow_data_bypass: false,
        ..Default::default()
    };
    let page = define_element(
        move |_: &mut Hooks, _: &Props| {
            counter.hit();
            Ok(json!({"a": 0}))
        },
        ElementOptions::page("NoBypass")
            .with_platform(PlatformName::Alipay)
            .with_config(config),
    )
    .unwrap();

    let sim = SimHost::new(&page);
    sim.mount(bypass_query()).unwrap();
    assert_eq!(renders.get(), 2);
    assert_eq!(sim.data_json(), json!({"a": 0}));
}

#[test]
fn test_event_results_go_through_data_on_wechat() {
    let page = wechat_page("Result", |hooks, _| {
        hooks.use_event(
            "validate",
            |args| Ok(json!(args.len()).into()),
            EventOptions {
                handle_result: true,
            },
        )?;
        Ok(json!({}))
    })
    .unwrap();
    assert!(page.object().method("validate").is_none());

    let sim = SimHost::new(&page);
    sim.mount(json!({})).unwrap();
    assert_eq!(
        sim.call_data_method("validate", &[json!(1), json!(2)]).unwrap(),
        json!(2)
    );
}

#[test]
fn test_event_results_are_returned_directly_on_alipay() {
    let page = alipay_page("Result", |hooks, _| {
        hooks.use_event(
            "validate",
            |_| Ok(json!("ok").into()),
            EventOptions {
                handle_result: true,
            },
        )?;
        Ok(json!({}))
    })
    .unwrap();

    let sim = SimHost::new(&page);
    sim.mount(json!({})).unwrap();
    let outcome = sim.call_method("validate", &[]).unwrap();
    assert_eq!(outcome.into_value(), Some(json!("ok")));
}
