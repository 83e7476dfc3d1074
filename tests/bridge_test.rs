mod common;

use common::{FakeSession, Harness};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use worldbridge::engine::ScriptFunction;
use worldbridge::error::{error_domains, ErrorKind};
use worldbridge::native::NativeObject;
use worldbridge::{
    BridgeError, NativeError, Script, ScriptApi, ScriptObject, ScriptValue, Session, SessionApi, World,
};

fn recorder() -> (ScriptFunction, Arc<Mutex<Vec<Vec<ScriptValue>>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let listener = ScriptFunction::new("listener", move |info| {
        let args = (0..info.len()).map(|i| info.arg(i).clone()).collect();
        sink.lock().push(args);
        Ok(ScriptValue::Undefined)
    });
    (listener, calls)
}

fn events_of(object: &ScriptObject) -> ScriptObject {
    object.get("events").as_object().cloned().unwrap()
}

#[test]
fn test_detach_resolves_and_restores_refcount() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1234);
    let session = harness.session(&fake)?;
    harness.barrier()?;
    let before = Arc::strong_count(&fake);

    let promise = session.call_method("detach", vec![])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    harness.barrier()?;

    assert_eq!(Arc::strong_count(&fake), before);
    assert!(fake.is_detached());
    assert!(!session.internal::<Session>().unwrap().is_monitored());
    Ok(())
}

#[test]
fn test_create_script_error_propagates() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    fake.failures.set("createScript", NativeError::io(42, "boom"));
    let session = harness.session(&fake)?;
    harness.barrier()?;
    let before = Arc::strong_count(&fake);

    let promise = session.call_method(
        "createScript",
        vec![ScriptValue::from("agent"), ScriptValue::from("send(1)")],
    )?;
    let err = harness.settle(promise)?.unwrap_err();
    harness.barrier()?;
    assert_eq!(Arc::strong_count(&fake), before);
    assert!(fake.created.lock().is_empty());

    assert_eq!(err.kind, ErrorKind::Error);
    assert_eq!(err.message, "boom");
    assert_eq!(err.domain.as_deref(), Some(error_domains::IO_ERROR));
    assert_eq!(err.code, Some(42));
    assert_eq!(
        harness.runtime.metrics().errors_by_domain().get(error_domains::IO_ERROR),
        Some(&1)
    );
    Ok(())
}

#[test]
fn test_enable_debugger_type_error_schedules_nothing() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;
    harness.barrier()?;

    let metrics = harness.runtime.metrics();
    let scheduled = metrics.scheduled(World::Native);
    let err = session
        .call_method("enableDebugger", vec![ScriptValue::from("not-a-number")])
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Bad argument, expected port number");
    assert_eq!(metrics.scheduled(World::Native), scheduled);
    assert_eq!(metrics.operations_started(), 0);
    Ok(())
}

#[test]
fn test_native_perform_on_script_world() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let script = harness.runtime.script().clone();
    let loop_thread = std::thread::current().id();
    let counter = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(None));

    script.increase_usage();
    {
        let script = script.clone();
        let counter = counter.clone();
        let observed = observed.clone();
        harness.runtime.native().schedule(move || {
            let inner = counter.clone();
            let result = script.perform(move || {
                inner.fetch_add(1, Ordering::SeqCst);
                std::thread::current().id()
            });
            *observed.lock() = Some((result.ok(), counter.load(Ordering::SeqCst)));
        })?;
    }
    assert!(harness.event_loop.run_until(|| observed.lock().is_some()));
    script.decrease_usage();

    let (ran_on, seen) = observed.lock().take().unwrap();
    assert_eq!(ran_on, Some(loop_thread));
    assert_eq!(seen, 1);

    // the loop thread cannot wait on itself
    assert!(matches!(
        script.perform(|| ()),
        Err(BridgeError::WouldDeadlock(World::Script))
    ));
    Ok(())
}

#[test]
fn test_usage_counter_lifecycle() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let script = harness.runtime.script().clone();
    let fakes: Vec<_> = (0..10).map(FakeSession::new).collect();

    let wrappers = fakes
        .iter()
        .map(|fake| harness.session(fake))
        .collect::<anyhow::Result<Vec<_>>>()?;
    assert_eq!(script.usage_count(), 10);
    assert!(script.is_referenced());

    drop(wrappers);
    assert_eq!(script.usage_count(), 0);
    assert!(!script.is_referenced());

    harness.event_loop.run();
    assert!(!harness.event_loop.is_alive());

    let stats = harness.runtime.metrics().snapshot();
    assert_eq!(stats.wrappers_created, 10);
    assert_eq!(stats.usage_refs, 1);
    assert_eq!(stats.usage_unrefs, 1);
    Ok(())
}

#[test]
fn test_reentrant_schedule_runs_in_same_drain() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let script = harness.runtime.script().clone();
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let log = log.clone();
        let nested = script.clone();
        script.schedule(move || {
            log.lock().push("outer");
            let log = log.clone();
            nested.schedule(move || log.lock().push("nested")).unwrap();
        })?;
    }

    assert_eq!(script.process_pending(), 2);
    assert_eq!(*log.lock(), vec!["outer", "nested"]);
    assert_eq!(script.pending(), 0);
    Ok(())
}

#[test]
fn test_session_wrapper_identity_and_pid() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(4321);

    let first = harness.session(&fake)?;
    let second = harness.session(&fake)?;
    assert!(first.ptr_eq(&second));
    assert_eq!(first.class_name(), Some(Session::CLASS_NAME));
    assert_eq!(first.get("pid"), ScriptValue::Number(4321.0));
    assert!(!first.set("events", ScriptValue::Null));
    assert_eq!(harness.runtime.script().usage_count(), 1);

    drop(first);
    drop(second);
    assert_eq!(harness.runtime.script().usage_count(), 0);

    let third = harness.session(&fake)?;
    assert_eq!(third.get("pid"), ScriptValue::Number(4321.0));
    Ok(())
}

#[test]
fn test_session_constructor_rejects_bad_arguments() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let ctor = harness.exports.get("Session").as_function().cloned().unwrap();

    let err = ctor.construct(vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Bad argument, expected raw handle");

    let err = ctor.construct(vec![ScriptValue::from(7.0)]).unwrap_err();
    assert_eq!(err.message, "Bad argument, expected raw handle");

    // a plain call is treated like a construct call with no handle
    let err = ctor.call(None, vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Bad argument, expected raw handle");
    assert_eq!(harness.runtime.script().usage_count(), 0);
    Ok(())
}

#[test]
fn test_create_script_rejects_bad_arguments() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;

    for args in [
        vec![],
        vec![ScriptValue::from(1.0), ScriptValue::from("source")],
        vec![ScriptValue::Null],
        vec![ScriptValue::from("name"), ScriptValue::Null],
    ] {
        let err = session.call_method("createScript", args).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(err.message, "Bad argument, expected string|null and string");
    }
    assert_eq!(harness.runtime.metrics().operations_started(), 0);
    Ok(())
}

#[test]
fn test_extra_arguments_are_ignored() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;

    let promise = session.call_method(
        "createScript",
        vec![ScriptValue::from("a"), ScriptValue::from("src"), ScriptValue::Null],
    )?;
    assert!(matches!(harness.settle(promise)?, Ok(ScriptValue::Object(_))));
    assert_eq!(fake.created.lock()[0].name.as_deref(), Some("a"));

    let promise = session.call_method(
        "enableDebugger",
        vec![ScriptValue::from(5858.0), ScriptValue::Null],
    )?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    assert_eq!(*fake.debugger_port.lock(), Some(5858));
    Ok(())
}

#[test]
fn test_monitor_on_detached_session_releases_loop() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    fake.mark_detached();

    let session = harness.session(&fake)?;
    assert_eq!(harness.runtime.script().usage_count(), 1);
    harness.barrier()?;

    assert_eq!(harness.runtime.script().usage_count(), 0);
    assert!(!session.internal::<Session>().unwrap().is_monitored());
    assert_eq!(fake.signals().handler_count("detached"), 0);
    Ok(())
}

#[test]
fn test_debugger_port_is_truncated() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;

    let promise = session.call_method("enableDebugger", vec![ScriptValue::from(70000.7)])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    assert_eq!(*fake.debugger_port.lock(), Some(4464));

    let promise = session.call_method("disableDebugger", vec![])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    assert_eq!(*fake.debugger_port.lock(), None);
    Ok(())
}

#[test]
fn test_session_events_deliver_detached() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;
    let events = events_of(&session);
    let (listener, calls) = recorder();

    events.call_method(
        "listen",
        vec![ScriptValue::from("detached"), listener.clone().into()],
    )?;
    assert_eq!(harness.runtime.script().usage_count(), 2);

    let promise = session.call_method("detach", vec![])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    harness.barrier()?;

    assert_eq!(
        *calls.lock(),
        vec![vec![ScriptValue::from("application-requested")]]
    );
    assert_eq!(harness.runtime.script().usage_count(), 1);

    events.call_method(
        "unlisten",
        vec![ScriptValue::from("detached"), listener.into()],
    )?;
    assert_eq!(harness.runtime.script().usage_count(), 0);
    harness.barrier()?;
    assert_eq!(fake.signals().handler_count("detached"), 0);
    Ok(())
}

#[test]
fn test_events_reject_bad_arguments() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;
    let events = events_of(&session);

    let err = events
        .call_method("listen", vec![ScriptValue::from(1.0), ScriptValue::Null])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "Bad argument, expected string and function");
    assert_eq!(harness.runtime.script().usage_count(), 1);
    Ok(())
}

#[test]
fn test_create_script_and_post_message() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;

    let promise = session.call_method(
        "createScript",
        vec![ScriptValue::Null, ScriptValue::from("recv(onMessage)")],
    )?;
    let script = match harness.settle(promise)? {
        Ok(ScriptValue::Object(script)) => script,
        other => anyhow::bail!("unexpected settlement: {:?}", other),
    };
    assert_eq!(script.class_name(), Some(Script::CLASS_NAME));

    let native = fake.created.lock()[0].clone();
    assert_eq!(native.name, None);
    assert_eq!(native.source, "recv(onMessage)");
    let handle: Arc<dyn ScriptApi> = native.clone();
    assert!(Script::new_instance(&handle, &harness.runtime)?.ptr_eq(&script));
    drop(handle);

    let (listener, calls) = recorder();
    events_of(&script).call_method(
        "listen",
        vec![ScriptValue::from("message"), listener.into()],
    )?;

    let payload = ScriptObject::new();
    payload.set("type", ScriptValue::from("ping"));
    let promise = script.call_method("postMessage", vec![payload.into()])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    harness.barrier()?;

    assert_eq!(*native.messages.lock(), vec![r#"{"type":"ping"}"#.to_string()]);
    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let message = calls[0][0].as_object().cloned().unwrap();
    assert_eq!(message.get("type"), ScriptValue::from("ping"));
    assert_eq!(calls[0][1], ScriptValue::Null);
    Ok(())
}

#[test]
fn test_undecodable_message_reaches_listener_as_error() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;
    let promise = session.call_method(
        "createScript",
        vec![ScriptValue::Null, ScriptValue::from("")],
    )?;
    let script = harness.settle(promise)?.unwrap().as_object().cloned().unwrap();

    let (listener, calls) = recorder();
    events_of(&script).call_method(
        "listen",
        vec![ScriptValue::from("message"), listener.into()],
    )?;
    harness.barrier()?;

    let native = fake.created.lock()[0].clone();
    harness.runtime.native().perform(move || {
        native
            .signals()
            .emit("message", &[serde_json::json!("{oops"), serde_json::Value::Null]);
    })?;
    harness.barrier()?;

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    match &calls[0][0] {
        ScriptValue::Error(err) => assert_eq!(err.kind, ErrorKind::SyntaxError),
        other => panic!("expected an error value, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_script_unload_ends_monitor() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;

    let promise = session.call_method(
        "createScript",
        vec![ScriptValue::from("agent"), ScriptValue::from("1 + 1")],
    )?;
    let script = harness.settle(promise)?.unwrap().as_object().cloned().unwrap();
    assert_eq!(harness.runtime.script().usage_count(), 2);

    let promise = script.call_method("load", vec![])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));

    let promise = script.call_method("unload", vec![])?;
    assert_eq!(harness.settle(promise)?, Ok(ScriptValue::Undefined));
    harness.barrier()?;

    assert!(fake.created.lock()[0].is_destroyed());
    assert!(!script.internal::<Script>().unwrap().is_monitored());
    assert_eq!(harness.runtime.script().usage_count(), 1);
    Ok(())
}

#[test]
fn test_post_message_rejects_unserializable_value() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    let session = harness.session(&fake)?;
    let promise = session.call_method(
        "createScript",
        vec![ScriptValue::Null, ScriptValue::from("")],
    )?;
    let script = harness.settle(promise)?.unwrap().as_object().cloned().unwrap();

    let err = script
        .call_method("postMessage", vec![ScriptValue::Undefined])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(fake.created.lock()[0].messages.lock().is_empty());
    Ok(())
}

#[test]
fn test_teardown_pumps_script_work_posted_by_native() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let ran = Arc::new(AtomicBool::new(false));
    {
        let script = harness.runtime.script().clone();
        let ran = ran.clone();
        harness.runtime.native().schedule(move || {
            std::thread::sleep(Duration::from_millis(20));
            let flag = ran.clone();
            let _ = script.perform(move || flag.store(true, Ordering::SeqCst));
        })?;
    }

    let handle = harness.runtime.handle();
    drop(harness);

    assert!(ran.load(Ordering::SeqCst));
    assert!(handle.is_torn_down());
    assert!(handle.native().is_terminated());
    assert!(matches!(
        handle.script().schedule(|| ()),
        Err(BridgeError::ContextClosed(World::Script))
    ));
    assert!(matches!(
        handle.native().schedule(|| ()),
        Err(BridgeError::ContextClosed(World::Native))
    ));
    Ok(())
}

#[test]
fn test_operation_metrics() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let fake = FakeSession::new(1);
    fake.failures.set("disableDebugger", NativeError::io(5, "not enabled"));
    let session = harness.session(&fake)?;

    let promise = session.call_method("enableDebugger", vec![ScriptValue::from(5858.0)])?;
    harness.settle(promise)?.unwrap();
    let promise = session.call_method("disableDebugger", vec![])?;
    assert_eq!(harness.settle(promise)?.unwrap_err().message, "not enabled");

    let metrics = harness.runtime.metrics();
    assert_eq!(metrics.operations_started(), 2);
    assert_eq!(metrics.operations_resolved(), 1);
    assert_eq!(metrics.operations_rejected(), 1);
    assert_eq!(metrics.operations_in_flight(), 0);

    let text = metrics.to_prometheus();
    assert!(text.contains("worldbridge_operations_total{status=\"started\"} 2"));
    assert!(text.contains("worldbridge_operations_total{status=\"rejected\"} 1"));
    Ok(())
}
