//! Proxy round trips, error propagation and owner-thread behavior

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::thread;

use marshal_core::{
    CallError, ContextId, ExceptionHandler, MarshalError, MethodTable, TargetError, Value, args,
};

use crate::common::{Calculator, Failure, Harness, wait_until};

#[test]
fn three_threads_square_concurrently() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let proxy = harness.marshal.build_proxy(ContextId::ROOT).proxy(Arc::clone(&calc));

    let results = harness.run_workers(move || {
        let workers: Vec<_> = (1..=3_i64)
            .map(|n| {
                let proxy = proxy.clone();
                thread::spawn(move || proxy.call(move |c| Ok::<_, Infallible>(c.square(n))))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(results, vec![1, 4, 9]);
    assert_eq!(harness.marshal.pending_len(), 0);
    assert_eq!(calc.calls(), 3);
    let owner = thread::current().id();
    assert!(calc.threads().iter().all(|id| *id == owner));
}

#[test]
fn nested_values_round_trip() {
    let mut harness = Harness::new();
    let proxy = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .proxy(Arc::new(()));

    let expected: BTreeMap<String, Vec<(u8, Option<String>)>> = BTreeMap::from([
        ("a".to_string(), vec![(1, None), (2, Some("b".to_string()))]),
        ("c".to_string(), Vec::new()),
    ]);
    let sent = expected.clone();

    let received = harness.run_workers(move || {
        thread::spawn(move || proxy.call(move |()| Ok::<_, Infallible>(sent)))
            .join()
            .unwrap()
    });

    assert_eq!(received.unwrap(), expected);
}

#[test]
fn target_error_is_the_same_instance() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let proxy = harness.marshal.build_proxy(ContextId::ROOT).proxy(Arc::clone(&calc));

    let outcome = harness.run_workers(move || {
        thread::spawn(move || proxy.call(|c| c.fail("divide by zero")))
            .join()
            .unwrap()
    });

    let err = outcome.unwrap_err().into_target().expect("target error");
    assert_eq!(err.reason, "divide by zero");
    let original = calc.last_failure().expect("failure recorded on owner");
    assert!(Arc::ptr_eq(&err, &original));
}

#[test]
fn panic_on_owner_thread_reaches_caller() {
    let mut harness = Harness::new();
    let proxy = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .proxy(Arc::new(()));

    let outcome = harness.run_workers(move || {
        thread::spawn(move || {
            proxy.call(|()| -> Result<(), Infallible> { panic!("owner blew up") })
        })
        .join()
        .unwrap()
    });

    match outcome {
        Err(CallError::Panicked(panic)) => assert_eq!(panic.message(), "owner blew up"),
        other => panic!("expected a captured panic, got {other:?}"),
    }
}

#[test]
fn mute_call_to_failing_method_is_silent() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let mute = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .mute_proxy(Arc::clone(&calc), None);

    harness.run_workers(move || {
        let () = mute.call(|c| c.fail("ignored"));
    });

    assert_eq!(calc.calls(), 1);
    assert_eq!(harness.marshal.pending_len(), 0);
}

#[test]
fn mute_error_handler_runs_once_on_owner_thread() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let seen: Arc<Mutex<Vec<(thread::ThreadId, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: ExceptionHandler = Arc::new(move |err: TargetError| {
        sink.lock()
            .unwrap()
            .push((thread::current().id(), err.to_string()));
    });
    let mute = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .mute_proxy(Arc::clone(&calc), Some(handler));

    harness.run_workers(move || {
        mute.call(|c| c.fail("bad state"));
        mute.call(|c| Ok::<_, Failure>(c.square(2)));
    });

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, thread::current().id());
    assert_eq!(seen[0].1, "calculator failure: bad state");
    assert_eq!(calc.calls(), 2);
}

#[test]
fn owner_thread_sync_call_bypasses_queue() {
    let harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let proxy = harness.marshal.build_proxy(ContextId::ROOT).proxy(Arc::clone(&calc));

    let scheduled_before = harness.marshal.scheduled_count();
    let value = proxy.call(|c| Ok::<_, Infallible>(c.square(7))).unwrap();

    assert_eq!(value, 49);
    assert_eq!(harness.marshal.pending_len(), 0);
    assert_eq!(harness.marshal.scheduled_count(), scheduled_before);
    assert_eq!(harness.marshal.return_cell_count(), 0);
}

#[test]
fn owner_thread_mute_call_is_queued() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let mute = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .mute_proxy(Arc::clone(&calc), None);

    mute.call(|c| Ok::<_, Infallible>(c.square(3)));
    assert_eq!(harness.marshal.pending_len(), 1);
    assert_eq!(calc.calls(), 0);

    harness.run_loop.poll(8);
    assert_eq!(harness.marshal.pending_len(), 0);
    assert_eq!(calc.calls(), 1);
}

#[test]
fn sync_call_inside_owner_work_does_not_deadlock() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let builder = harness.marshal.build_proxy(ContextId::ROOT);
    let inner = builder.proxy(Arc::clone(&calc));
    let outer = builder.mute_proxy(Arc::new(()), None);
    let result = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);

    harness.run_workers(move || {
        outer.call(move |()| {
            let value = inner.call(|c| Ok::<_, Infallible>(c.square(5)));
            *slot.lock().unwrap() = Some(value.ok());
            Ok::<_, Infallible>(())
        });
    });

    assert_eq!(*result.lock().unwrap(), Some(Some(25)));
}

#[test]
fn return_cell_is_reused_per_thread() {
    let mut harness = Harness::new();
    let calc = Arc::new(Calculator::default());
    let proxy = harness.marshal.build_proxy(ContextId::ROOT).proxy(Arc::clone(&calc));
    let marshal = harness.marshal.clone();

    let cell_counts = harness.run_workers(move || {
        thread::spawn(move || {
            (1..=10_i64)
                .map(|n| {
                    proxy.call(move |c| Ok::<_, Infallible>(c.square(n))).unwrap();
                    marshal.return_cell_count()
                })
                .collect::<Vec<_>>()
        })
        .join()
        .unwrap()
    });

    assert_eq!(cell_counts, vec![1; 10]);
    assert_eq!(calc.calls(), 10);
}

#[test]
fn return_cells_are_freed_when_threads_exit() {
    let mut harness = Harness::new();
    let proxy = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .proxy(Arc::new(()));

    let total = harness.run_workers(move || {
        (0..50)
            .map(|_| {
                let proxy = proxy.clone();
                thread::spawn(move || proxy.call(|()| Ok::<_, Infallible>(1)).unwrap())
                    .join()
                    .unwrap()
            })
            .sum::<i32>()
    });

    assert_eq!(total, 50);
    assert_eq!(harness.marshal.return_cell_count(), 0);
}

#[test]
fn proxies_report_their_context_and_method_name() {
    let harness = Harness::new();
    let context = ContextId::new(9);
    let builder = harness.marshal.build_proxy(context);
    assert_eq!(builder.context(), context);

    let table = Arc::new(MethodTable::new(()));
    let proxy = builder.proxy(Arc::clone(&table));
    let mute = builder.mute_proxy(table, None);
    assert_eq!(proxy.context(), context);
    assert_eq!(mute.context(), context);
    assert_eq!(proxy.method("ham").name(), "ham");
    assert_eq!(mute.method(String::from("eggs")).name(), "eggs");
}

#[test]
fn named_methods_resolve_at_call_time() {
    let mut harness = Harness::new();
    let table = Arc::new(MethodTable::new(()).with_method("ham", |(), mut args| {
        let foo: String = args.take()?;
        let bar: String = args.take_or(String::new())?;
        Ok(Box::new(format!("{bar}{foo}{bar}")) as Value)
    }));
    let proxy = harness.marshal.build_proxy(ContextId::ROOT).proxy(Arc::clone(&table));

    let (first, second, missing) = harness.run_workers(move || {
        thread::spawn(move || {
            let ham = proxy.method("ham");
            let first = ham.invoke(args!["oof".to_string(), "--".to_string()]);
            proxy
                .target()
                .define("ham", |(), _| Ok(Box::new("redefined".to_string()) as Value));
            let second = ham.invoke(args![]);
            let missing = proxy.method("eggs").invoke(args![]);
            (first, second, missing)
        })
        .join()
        .unwrap()
    });

    let first = first.unwrap().downcast::<String>().unwrap();
    assert_eq!(*first, "--oof--");
    let second = second.unwrap().downcast::<String>().unwrap();
    assert_eq!(*second, "redefined");
    let missing = missing.unwrap_err().into_target().expect("target error");
    assert_eq!(missing.to_string(), "target has no method named 'eggs'");
}

#[test]
fn abandoned_calls_wake_their_callers() {
    let harness = Harness::new();
    let proxy = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .proxy(Arc::new(()));

    let waiter = thread::spawn(move || proxy.call(|()| Ok::<_, Infallible>(1)));
    wait_until(|| harness.marshal.pending_len() == 1);

    assert_eq!(harness.marshal.abandon_pending(), 1);
    let outcome = waiter.join().unwrap();
    assert!(outcome.unwrap_err().is_abandoned());
}

#[test]
fn closed_loop_reports_why_sync_call_failed() {
    let Harness {
        run_loop, marshal, ..
    } = Harness::new();
    let proxy = marshal.build_proxy(ContextId::ROOT).proxy(Arc::new(()));
    drop(run_loop);

    let outcome = thread::spawn(move || proxy.call(|()| Ok::<_, Infallible>(1)))
        .join()
        .unwrap();
    assert!(matches!(
        outcome,
        Err(CallError::Marshal(MarshalError::LoopClosed))
    ));
    assert_eq!(marshal.pending_len(), 0);
    assert_eq!(marshal.scheduled_count(), 1);
}
