use std::sync::{Arc, Mutex};

use minifish::handler_registry::{Binding, ContextFilter, HandlerError};
use minifish::{DispatchOutcome, Error, HandlerRegistry, HandlerReturn, Identity};
use proptest::prelude::*;
use serde_json::json;

fn recording(log: &Arc<Mutex<Vec<usize>>>, index: usize, fail: bool) -> Binding<Identity> {
    let log = log.clone();
    Binding::new(ContextFilter::identity("me"), move |_, _| {
        log.lock().unwrap().push(index);
        if fail {
            return Err(Error::user(format!("handler {} failed", index)));
        }
        Ok(json!(index).into())
    })
}

proptest! {
    #[test]
    fn prop_names_are_frozen_by_lock(
        before in prop::collection::hash_set("[a-z]{1,8}", 1..8),
        after in "[A-Z]{1,8}",
    ) {
        let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[prop]");
        for name in &before {
            registry.declare(name).unwrap();
        }
        registry.lock().unwrap();

        for name in &before {
            let off = registry.register(name, Some(recording(&Default::default(), 0, false)), false);
            prop_assert!(off.is_ok());
        }
        let err = registry.declare(&after).unwrap_err();
        let names_locked = matches!(err, Error::Handler(HandlerError::NamesLocked { .. }));
        prop_assert!(names_locked);
        prop_assert_eq!(registry.names().len(), before.len());
    }

    #[test]
    fn prop_dispatch_runs_in_order_and_returns_first(count in 1usize..10) {
        let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[prop]");
        let log = Arc::new(Mutex::new(Vec::new()));
        for index in 0..count {
            let _off = registry.register("tap", Some(recording(&log, index, false)), false).unwrap();
        }
        let _other = registry.register("tap", Some(Binding::new(ContextFilter::identity("other"), |_, _| {
            Ok(json!("not me").into())
        })), false).unwrap();

        let outcome = registry.dispatch("tap", &Identity::new("me"), &[]).unwrap();
        prop_assert_eq!(outcome.into_value(), Some(json!(0)));
        prop_assert_eq!(log.lock().unwrap().clone(), (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn prop_error_truncates_remaining_handlers(count in 2usize..10, failing in 0usize..10) {
        let failing = failing % count;
        let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[prop]");
        let log = Arc::new(Mutex::new(Vec::new()));
        for index in 0..count {
            let _off = registry
                .register("tap", Some(recording(&log, index, index == failing)), false)
                .unwrap();
        }

        let result = registry.dispatch("tap", &Identity::new("me"), &[]);
        prop_assert!(result.is_err());
        prop_assert_eq!(log.lock().unwrap().clone(), (0..=failing).collect::<Vec<_>>());
    }
}

#[test]
fn test_unregister_twice_is_stale() {
    let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[test]");
    let off = registry
        .register("tap", Some(recording(&Default::default(), 0, false)), false)
        .unwrap();
    let again = registry
        .register("tap", Some(recording(&Default::default(), 1, false)), false)
        .unwrap();
    registry.reset();

    assert!(matches!(
        off.call(),
        Err(Error::Handler(HandlerError::StaleUnregister { .. }))
    ));
    assert!(again.call().is_err());
}

#[test]
fn test_cleanup_return_runs_on_unregister() {
    let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[test]");
    let cleaned = Arc::new(Mutex::new(false));
    let flag = cleaned.clone();
    let off = registry
        .register(
            "mount",
            Some(Binding::new(ContextFilter::any(), move |_, _| {
                let flag = flag.clone();
                Ok(HandlerReturn::cleanup(move || {
                    *flag.lock().unwrap() = true;
                    Ok(())
                }))
            })),
            false,
        )
        .unwrap();

    let outcome = registry.dispatch("mount", &Identity::new("x"), &[]).unwrap();
    assert!(outcome.is_empty());
    assert!(!*cleaned.lock().unwrap());
    off.call().unwrap();
    assert!(*cleaned.lock().unwrap());
}

#[tokio::test]
async fn test_pending_value_is_returned_unawaited() {
    let registry: HandlerRegistry<Identity> = HandlerRegistry::new("[test]");
    let _off = registry
        .register(
            "load",
            Some(Binding::new(ContextFilter::identity("me"), |_, _| {
                Ok(HandlerReturn::pending(async {
                    tokio::task::yield_now().await;
                    Ok(json!({"loaded": true}))
                }))
            })),
            false,
        )
        .unwrap();

    let outcome = registry.dispatch("load", &Identity::new("me"), &[]).unwrap();
    match outcome {
        DispatchOutcome::Pending(future) => {
            assert_eq!(future.await.unwrap(), json!({"loaded": true}))
        }
        other => panic!("expected a pending outcome, got {:?}", other),
    }
}
