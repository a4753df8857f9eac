//! Config-driven engine options

use std::convert::Infallible;
use std::fs;
use std::sync::Arc;
use std::thread;

use marshal_config::MarshalConfig;
use marshal_core::{ContextId, MarshalOptions};
use tempfile::TempDir;

use crate::common::{Harness, event};

#[test]
fn custom_call_event_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[marshal]
call_event = "<<custom-call>>"
queue_warn_depth = 2
"#,
    )
    .unwrap();

    let config = MarshalConfig::load_from(&path).unwrap();
    let options = MarshalOptions::from_config(&config.marshal);
    assert_eq!(options.call_event, event("<<custom-call>>"));
    assert_eq!(options.queue_warn_depth, 2);

    let mut harness = Harness::with_options(options);
    let proxy = harness
        .marshal
        .build_proxy(ContextId::ROOT)
        .proxy(Arc::new(6_i32));

    // Past the warning depth; calls still complete.
    let results = harness.run_workers(move || {
        let workers: Vec<_> = (1..=4)
            .map(|n| {
                let proxy = proxy.clone();
                thread::spawn(move || proxy.call(move |v| Ok::<_, Infallible>(*v * n)))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(results, vec![6, 12, 18, 24]);
}

#[test]
fn default_options_use_default_call_event() {
    let options = MarshalOptions::default();
    assert_eq!(options.call_event.as_str(), "<<marshal-call>>");
    assert_eq!(options.queue_warn_depth, 1024);
}
