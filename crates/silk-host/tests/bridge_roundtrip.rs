//! End-to-end Mode A: a real runtime forwarding to the demo host binary
//! over the newline-delimited stdio protocol.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use silk_runtime::{Runtime, RuntimeConfig, UiWebview};

#[derive(Default)]
struct RecordingWebview {
    posted: Mutex<Vec<String>>,
    schedules: AtomicUsize,
}

impl UiWebview for RecordingWebview {
    fn post_script(&self, script: &str) {
        self.posted.lock().unwrap().push(script.to_string());
    }

    fn schedule_flush(&self) {
        self.schedules.fetch_add(1, Ordering::SeqCst);
    }
}

/// Acts as the UI thread: flush until `count` scripts have been posted.
fn wait_for_scripts(webview: &Arc<RecordingWebview>, runtime: &Runtime, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        runtime.flush_replies();
        {
            let posted = webview.posted.lock().unwrap();
            if posted.len() >= count {
                return posted.clone();
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} scripts"
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn demo_host_runtime(webview: Arc<RecordingWebview>) -> Runtime {
    let config = RuntimeConfig::from_toml_str(
        r#"
        [permissions]
        allow_commands = ["ts"]
        "#,
    )
    .unwrap();
    Runtime::builder()
        .config(&config)
        .host_bridge(vec![env!("CARGO_BIN_EXE_silk-demo-host").to_string()])
        .build(webview)
        .unwrap()
}

#[test]
fn forwarded_command_round_trips_through_the_host() {
    let webview = Arc::new(RecordingWebview::default());
    let mut runtime = demo_host_runtime(webview.clone());

    runtime.handle_webview_message(
        r#"{"kind":"invoke","callback":9,"cmd":"ts:echo","args":{"x":1}}"#,
    );

    let posted = wait_for_scripts(&webview, &runtime, 1);
    assert_eq!(
        posted[0],
        r#"window.__silk && window.__silk.__dispatch({"kind":"response","callback":9,"ok":true,"result":{"x":1}});"#
    );

    runtime.shutdown();
}

#[test]
fn host_handler_failure_surfaces_as_error_response() {
    let webview = Arc::new(RecordingWebview::default());
    let mut runtime = demo_host_runtime(webview.clone());

    runtime.handle_webview_message(
        r#"{"kind":"invoke","callback":3,"cmd":"ts:fail","args":null}"#,
    );

    let posted = wait_for_scripts(&webview, &runtime, 1);
    assert!(posted[0].contains(r#""callback":3"#), "{}", posted[0]);
    assert!(posted[0].contains(r#""ok":false"#), "{}", posted[0]);
    assert!(posted[0].contains("MissingText"), "{}", posted[0]);

    runtime.shutdown();
}

#[test]
fn host_answers_unknown_commands_with_errors() {
    let webview = Arc::new(RecordingWebview::default());
    let mut runtime = demo_host_runtime(webview.clone());

    runtime.handle_webview_message(
        r#"{"kind":"invoke","callback":4,"cmd":"ts:unknown","args":null}"#,
    );

    let posted = wait_for_scripts(&webview, &runtime, 1);
    assert!(posted[0].contains(r#""ok":false"#), "{}", posted[0]);
    assert!(posted[0].contains("ts:unknown"), "{}", posted[0]);

    runtime.shutdown();
}

#[test]
fn forwarded_requests_are_served_in_order() {
    let webview = Arc::new(RecordingWebview::default());
    let mut runtime = demo_host_runtime(webview.clone());

    for callback in 1..=4u64 {
        runtime.handle_webview_message(
            &json!({
                "kind": "invoke",
                "callback": callback,
                "cmd": "ts:echo",
                "args": {"seq": callback},
            })
            .to_string(),
        );
    }

    let posted = wait_for_scripts(&webview, &runtime, 4);
    for (index, script) in posted.iter().enumerate() {
        let callback = index as u64 + 1;
        assert!(script.contains(&format!(r#""callback":{callback}"#)), "{script}");
        assert!(script.contains(&format!(r#""seq":{callback}"#)), "{script}");
    }

    runtime.shutdown();
}

#[test]
fn local_routes_win_over_the_host() {
    let webview = Arc::new(RecordingWebview::default());
    let config = RuntimeConfig::from_toml_str(
        r#"
        [permissions]
        allow_commands = ["ts", "silk:ping"]
        "#,
    )
    .unwrap();
    let mut runtime = Runtime::builder()
        .config(&config)
        .register("ts:echo", Arc::new(|_, _| Ok(json!("local"))), None)
        .host_bridge(vec![env!("CARGO_BIN_EXE_silk-demo-host").to_string()])
        .build(webview.clone())
        .unwrap();

    runtime.handle_webview_message(
        r#"{"kind":"invoke","callback":1,"cmd":"ts:echo","args":{"x":1}}"#,
    );

    let posted = wait_for_scripts(&webview, &runtime, 1);
    assert!(posted[0].contains(r#""result":"local""#), "{}", posted[0]);

    runtime.shutdown();
}

#[test]
fn shutdown_with_idle_host_completes_quickly() {
    let webview = Arc::new(RecordingWebview::default());
    let mut runtime = demo_host_runtime(webview.clone());

    runtime.handle_webview_message(
        r#"{"kind":"invoke","callback":1,"cmd":"ts:echo","args":null}"#,
    );
    wait_for_scripts(&webview, &runtime, 1);

    let started = Instant::now();
    runtime.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
}
