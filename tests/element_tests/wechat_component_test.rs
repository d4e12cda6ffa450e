use minifish::mount::MountError;
use minifish::platform::PlatformError;
use minifish::simulator::{SimHost, TriggeredEvent};
use minifish::{
    alipay_component, wechat_component, Definition, Error, EventOptions, Hooks, MiniHooks, Props,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use super::RenderCount;

fn badge(renders: &RenderCount) -> Definition {
    let counter = renders.clone();
    wechat_component(
        "Badge",
        move |_: &mut Hooks, props: &Props| {
            counter.hit();
            let label = props.get("label").and_then(Value::as_str).unwrap_or_default();
            let count = props.get("count").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!({"text": format!("{} x{}", label, count)}))
        },
        json!({"label": "hi", "count": 0}),
    )
    .unwrap()
}

#[test]
fn test_definition_shape() {
    let component = badge(&RenderCount::default());
    let object = component.object();
    assert_eq!(
        object.keys().collect::<Vec<_>>(),
        vec![
            "pageLifetimes",
            "properties",
            "data",
            "options",
            "observers",
            "lifetimes",
            "methods",
        ]
    );
    assert_eq!(
        object.data("properties"),
        Some(&json!({
            "label": {"type": "String", "value": "hi"},
            "count": {"type": "Number", "value": 0},
        }))
    );
    assert_eq!(
        object.table("observers").unwrap().keys().collect::<Vec<_>>(),
        vec!["label, count"]
    );
    assert!(object.method_at(&["lifetimes", "attached"]).is_some());
    assert!(object.method_at(&["lifetimes", "detached"]).is_some());
    assert_eq!(object.data("data"), Some(&json!({"text": "hi x0"})));
}

#[test]
fn test_observers_deliver_props_without_skipping() {
    let renders = RenderCount::default();
    let component = badge(&renders);
    let sim = SimHost::new(&component);

    sim.mount(json!({"count": 2})).unwrap();
    assert_eq!(sim.data_json()["text"], json!("hi x2"));
    assert_eq!(renders.get(), 2);

    sim.update_props(json!({"label": "yo"})).unwrap();
    assert_eq!(sim.data_json()["text"], json!("yo x2"));
    assert_eq!(renders.get(), 3);

    // equal props still render, but push nothing
    sim.update_props(json!({"label": "yo"})).unwrap();
    assert_eq!(renders.get(), 4);
    assert_eq!(sim.set_data_calls().len(), 2);

    // undeclared keys never reach the component
    sim.update_props(json!({"other": 1})).unwrap();
    assert_eq!(renders.get(), 4);

    sim.unmount().unwrap();
    sim.update_props(json!({"label": "late"})).unwrap();
    assert_eq!(renders.get(), 4);
    assert_eq!(component.mount().live_count(), 0);
}

#[test]
fn test_trigger_event_reaches_the_parent() {
    let component = wechat_component(
        "Emitter",
        |hooks, _| {
            let trigger = hooks.use_trigger_event()?;
            hooks.use_event(
                "onTap",
                move |args| {
                    let payload = args.first().cloned().unwrap_or(Value::Null);
                    trigger.emit("change", payload, json!({"bubbles": true}))?;
                    Ok(().into())
                },
                EventOptions::default(),
            )?;
            Ok(json!({}))
        },
        json!({}),
    )
    .unwrap();

    let sim = SimHost::new(&component);
    sim.mount(json!({})).unwrap();
    sim.call_method("onTap", &[json!(5)]).unwrap();
    assert_eq!(
        sim.triggered_events(),
        vec![TriggeredEvent {
            name: "change".to_string(),
            payload: json!(5),
            options: json!({"bubbles": true}),
        }]
    );
}

#[test]
fn test_trigger_event_is_wechat_only() {
    let err = alipay_component(
        "Emitter",
        |hooks, _| {
            hooks.use_trigger_event()?;
            Ok(json!({}))
        },
        json!({}),
    )
    .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Platform(PlatformError::PlatformMismatch { .. })
    ));
}

#[test]
fn test_result_events_cannot_shadow_props() {
    let component = wechat_component(
        "Form",
        |hooks, _| {
            hooks.use_event(
                "validate",
                |_| Ok(json!(true).into()),
                EventOptions {
                    handle_result: true,
                },
            )?;
            Ok(json!({}))
        },
        json!({"validate": ""}),
    )
    .unwrap();

    let err = SimHost::new(&component).mount(json!({})).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Mount(MountError::EventResultConflict { name }) if name == "validate"
    ));
}

#[test]
fn test_instances_get_distinct_identities() {
    let renders = RenderCount::default();
    let component = badge(&renders);
    let a = SimHost::new(&component);
    let b = SimHost::new(&component);
    a.mount(json!({"count": 1})).unwrap();
    b.mount(json!({"count": 2})).unwrap();
    assert_eq!(component.mount().live_count(), 2);
    assert_eq!(a.data_json()["text"], json!("hi x1"));
    assert_eq!(b.data_json()["text"], json!("hi x2"));
}
