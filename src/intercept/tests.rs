// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use super::*;
use crate::config::InterceptorConfig;
use crate::event::{listener, EventKind, Listener};
use crate::hook::{HookId, HookInstance, HookRegistry, XhrHook};
use crate::transport::{
    ReadyState, ResponseType, ResponseValue, ScriptedXhr, ScriptedXhrConstructor, TransportCall, Xhr,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

fn interceptor() -> Interceptor {
    Interceptor::new(Arc::new(ScriptedXhrConstructor::new()))
}

fn intercepted(interceptor: &Interceptor) -> (InterceptedXhr, Arc<ScriptedXhr>) {
    let transport = Arc::new(ScriptedXhr::new());
    (interceptor.wrap(transport.clone()), transport)
}

/// Listener logging `kind` and, for ready-state changes, the state read from `xhr`
fn logging_listener(log: &Log, xhr: &InterceptedXhr, kind: EventKind) -> Listener {
    let log = log.clone();
    let xhr = xhr.clone();
    listener(move |event| {
        let entry = match kind {
            EventKind::ReadyStateChange => format!("rsc:{}", xhr.ready_state().as_u8()),
            _ => kind.as_str().to_string(),
        };
        assert!(event.is_trusted);
        log.lock().push(entry);
    })
}

fn log_all_events(log: &Log, xhr: &InterceptedXhr) {
    for kind in [
        EventKind::LoadStart,
        EventKind::ReadyStateChange,
        EventKind::Progress,
        EventKind::Abort,
        EventKind::Error,
        EventKind::Load,
        EventKind::LoadEnd,
    ] {
        xhr.add_event_listener(kind, logging_listener(log, xhr, kind));
    }
}

/// Channel receiving every event of `kind`
fn event_channel(xhr: &InterceptedXhr, kind: EventKind) -> mpsc::UnboundedReceiver<EventKind> {
    let (tx, rx) = mpsc::unbounded_channel();
    xhr.add_event_listener(
        kind,
        listener(move |event| {
            let _ = tx.send(event.kind);
        }),
    );
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<EventKind>) -> EventKind {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event not delivered in time")
        .expect("event channel closed")
}

/// Hook logging every checkpoint it sees
struct Probe {
    name: &'static str,
    log: Log,
    observe: bool,
    response_delay: Option<Duration>,
}

impl Probe {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            observe: true,
            response_delay: None,
        }
    }

    fn ignoring_responses(mut self) -> Self {
        self.observe = false;
        self
    }

    fn slow_response(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }
}

#[async_trait]
impl XhrHook for Probe {
    fn name(&self) -> &str {
        self.name
    }

    fn on_config(
        &self,
        _hook: &HookInstance,
        _xhr: &InterceptedXhr,
        _config: &mut RequestConfig,
    ) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:config", self.name));
        Ok(())
    }

    async fn on_request(
        &self,
        _hook: &HookInstance,
        _xhr: &InterceptedXhr,
        _config: &SharedConfig,
    ) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:request", self.name));
        Ok(())
    }

    async fn on_response(
        &self,
        _hook: &HookInstance,
        xhr: &InterceptedXhr,
        _config: &SharedConfig,
    ) -> anyhow::Result<()> {
        if let Some(delay) = self.response_delay {
            tokio::time::sleep(delay).await;
        }
        self.log
            .lock()
            .push(format!("{}:response:{}", self.name, xhr.status()));
        Ok(())
    }

    fn observes_response(&self) -> bool {
        self.observe
    }
}

/// Hook answering every request with a fabricated response
struct Fabricate(FabricatedResponse);

#[async_trait]
impl XhrHook for Fabricate {
    async fn on_request(
        &self,
        _hook: &HookInstance,
        _xhr: &InterceptedXhr,
        config: &SharedConfig,
    ) -> anyhow::Result<()> {
        config.lock().response = Some(self.0.clone());
        Ok(())
    }

    fn observes_response(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_on_config_runs_once_per_open_in_order() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("a", &log)));
    interceptor.register(Arc::new(Probe::new("b", &log)));

    let (xhr, transport) = intercepted(&interceptor);
    let opened = log.clone();
    transport.event_target().add_listener(
        EventKind::ReadyStateChange,
        listener(move |_| opened.lock().push("transport:open".to_string())),
    );

    assert_ok!(xhr.open("GET", "/first", true, None, None));
    assert_ok!(xhr.open("GET", "/second", true, None, None));

    assert_eq!(
        entries(&log),
        vec![
            "a:config",
            "b:config",
            "transport:open",
            "a:config",
            "b:config",
            "transport:open"
        ]
    );
}

#[tokio::test]
async fn test_on_config_rewrites_open_arguments() {
    struct Rewrite;

    impl XhrHook for Rewrite {
        fn on_config(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &mut RequestConfig,
        ) -> anyhow::Result<()> {
            config.method = "POST".to_string();
            config.url = config.url.replace("/v1/", "/v2/");
            config.user = Some("svc".to_string());
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(Rewrite));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "https://api.example/v1/items", false, None, None)
        .unwrap();

    assert_eq!(
        transport.calls()[0],
        TransportCall::Open {
            method: "POST".to_string(),
            url: "https://api.example/v2/items".to_string(),
            is_async: false,
            user: Some("svc".to_string()),
            password: None,
        }
    );
    assert_eq!(xhr.config().lock().method, "POST");
}

#[tokio::test]
async fn test_header_record_shared_between_checkpoints() {
    struct Headers {
        seen: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl XhrHook for Headers {
        fn on_config(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &mut RequestConfig,
        ) -> anyhow::Result<()> {
            config.headers.insert("x-test".to_string(), "1".to_string());
            Ok(())
        }

        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &SharedConfig,
        ) -> anyhow::Result<()> {
            *self.seen.lock() = config.lock().header("x-test").map(String::from);
            Ok(())
        }
    }

    let seen = Arc::new(Mutex::new(None));
    let interceptor = interceptor();
    interceptor.register(Arc::new(Headers { seen: seen.clone() }));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/h", false, None, None).unwrap();
    assert_eq!(xhr.config().lock().header("x-test"), Some("1"));

    xhr.set_request_header("X-Test", "2").unwrap();
    xhr.send(None).await.unwrap();

    assert_eq!(seen.lock().as_deref(), Some("2"));
    assert!(transport.calls().contains(&TransportCall::SetRequestHeader {
        name: "X-Test".to_string(),
        value: "2".to_string(),
    }));
}

#[tokio::test]
async fn test_prevent_open_keeps_logical_configuration() {
    struct Block;

    impl XhrHook for Block {
        fn on_config(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &mut RequestConfig,
        ) -> anyhow::Result<()> {
            config.prevent_open = true;
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(Block));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/never", true, None, None).unwrap();

    assert!(!transport.was_opened());
    assert_eq!(xhr.ready_state(), ReadyState::Unsent);
    assert_eq!(xhr.config().lock().url, "/never");
}

#[tokio::test]
async fn test_prevent_send_from_config_skips_request_hooks() {
    struct Block;

    impl XhrHook for Block {
        fn on_config(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &mut RequestConfig,
        ) -> anyhow::Result<()> {
            config.prevent_send = true;
            Ok(())
        }
    }

    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Block));
    interceptor.register(Arc::new(Probe::new("probe", &log)));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("POST", "/p", false, None, None).unwrap();
    xhr.send(Some("payload".into())).await.unwrap();

    assert_eq!(transport.send_count(), 0);
    assert_eq!(entries(&log), vec!["probe:config"]);
    assert_eq!(xhr.config().lock().body.as_deref(), Some(&b"payload"[..]));
}

#[tokio::test]
async fn test_prevent_send_from_request_hook() {
    struct Block;

    #[async_trait]
    impl XhrHook for Block {
        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &SharedConfig,
        ) -> anyhow::Result<()> {
            config.lock().prevent_send = true;
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(Block));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/p", false, None, None).unwrap();
    xhr.send(None).await.unwrap();

    assert_eq!(transport.send_count(), 0);
    assert_eq!(xhr.transport().ready_state(), ReadyState::Opened);
}

#[tokio::test]
async fn test_request_body_rewritten_by_hook() {
    struct Rewrite;

    #[async_trait]
    impl XhrHook for Rewrite {
        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &SharedConfig,
        ) -> anyhow::Result<()> {
            config.lock().body = Some("rewritten".into());
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(Rewrite));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("POST", "/p", false, None, None).unwrap();
    xhr.send(Some("original".into())).await.unwrap();

    assert!(transport.calls().contains(&TransportCall::Send {
        body: Some("rewritten".into())
    }));
}

#[tokio::test]
async fn test_fabricated_response_replayed_without_transport() {
    let interceptor = interceptor();
    interceptor.register(Arc::new(Fabricate(FabricatedResponse::text("hello"))));
    let (xhr, transport) = intercepted(&interceptor);
    let log = new_log();

    xhr.open("GET", "/mock", false, None, None).unwrap();
    log_all_events(&log, &xhr);
    xhr.send(None).await.unwrap();

    assert_eq!(
        entries(&log),
        vec!["loadstart", "rsc:2", "rsc:3", "progress", "rsc:4", "load", "loadend"]
    );
    assert_eq!(xhr.response(), ResponseValue::Text("hello".to_string()));
    assert_eq!(xhr.response_text(), "hello");
    assert_eq!(xhr.status(), 200);
    assert_eq!(xhr.status_text(), "OK");
    assert_eq!(xhr.ready_state(), ReadyState::Done);
    assert_eq!(xhr.response_type(), ResponseType::Text);
    assert_eq!(xhr.get_response_header("Content-Type").as_deref(), Some("text/plain"));
    assert_eq!(xhr.get_all_response_headers(), "content-type: text/plain\r\n");
    assert_eq!(xhr.done_marker(), DoneMarker::Replaying);

    assert_eq!(transport.send_count(), 0);
    assert_eq!(transport.ready_state(), ReadyState::Opened);
}

#[tokio::test]
async fn test_fabricated_response_async_mode() {
    let interceptor = interceptor();
    interceptor.register(Arc::new(Fabricate(
        FabricatedResponse::json(serde_json::json!({"id": 7})).status(201),
    )));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/mock", true, None, None).unwrap();
    let mut done = event_channel(&xhr, EventKind::LoadEnd);
    xhr.send(None).await.unwrap();

    // Dispatch happens on a later tick
    assert_eq!(xhr.ready_state(), ReadyState::Opened);

    assert_eq!(next_event(&mut done).await, EventKind::LoadEnd);
    assert_eq!(xhr.status(), 201);
    assert_eq!(xhr.status_text(), "Created");
    assert_eq!(xhr.xh_json(), Some(serde_json::json!({"id": 7})));
    assert_eq!(transport.send_count(), 0);
}

#[tokio::test]
async fn test_replay_status_text_fallback() {
    let interceptor = Interceptor::with_config(
        Arc::new(ScriptedXhrConstructor::new()),
        InterceptorConfig::new().replay_status_text("Mocked"),
    );
    interceptor.register(Arc::new(Fabricate(FabricatedResponse::text("x"))));
    let (xhr, _transport) = intercepted(&interceptor);

    xhr.open("GET", "/mock", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    assert_eq!(xhr.status_text(), "Mocked");
}

#[tokio::test]
async fn test_response_sweep_runs_once_before_terminal_listener() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("hook", &log)));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/real", false, None, None).unwrap();
    xhr.add_event_listener(
        EventKind::ReadyStateChange,
        logging_listener(&log, &xhr, EventKind::ReadyStateChange),
    );
    xhr.add_event_listener(EventKind::ReadyStateChange, listener(|_| {}));
    xhr.send(None).await.unwrap();

    transport.complete(200, "body");
    xhr.settled().await;

    assert_eq!(
        entries(&log),
        vec![
            "hook:config",
            "hook:request",
            "rsc:2",
            "rsc:3",
            "hook:response:200",
            "rsc:4"
        ]
    );
    assert_eq!(xhr.done_marker(), DoneMarker::Completed);
    assert_eq!(transport.send_count(), 1);
}

#[tokio::test]
async fn test_no_sweep_for_network_error() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("hook", &log)));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/down", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    transport.fail();
    xhr.settled().await;

    assert_eq!(entries(&log), vec!["hook:config", "hook:request"]);
    assert_eq!(xhr.done_marker(), DoneMarker::Observing);
    assert_eq!(xhr.status(), 0);
}

#[tokio::test]
async fn test_slow_response_hook_delays_load() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(
        Probe::new("slow", &log).slow_response(Duration::from_millis(30)),
    ));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/slow", false, None, None).unwrap();
    xhr.add_event_listener(EventKind::Load, logging_listener(&log, &xhr, EventKind::Load));
    xhr.add_event_listener(
        EventKind::LoadEnd,
        logging_listener(&log, &xhr, EventKind::LoadEnd),
    );
    xhr.send(None).await.unwrap();

    transport.complete(200, "late");
    xhr.settled().await;

    assert_eq!(
        entries(&log),
        vec![
            "slow:config",
            "slow:request",
            "slow:response:200",
            "load",
            "loadend"
        ]
    );
}

#[tokio::test]
async fn test_response_rewritten_in_sweep_is_stable() {
    struct Rewrite;

    #[async_trait]
    impl XhrHook for Rewrite {
        async fn on_response(
            &self,
            _hook: &HookInstance,
            xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            let mut value = xhr.xh_json().unwrap_or_default();
            value["patched"] = serde_json::Value::Bool(true);
            xhr.set_xh_json(value);
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(Rewrite));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/data", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    transport.complete(200, r#"{"ok":true}"#);
    xhr.settled().await;

    let expected = r#"{"ok":true,"patched":true}"#;
    assert_eq!(xhr.response_text(), expected);
    assert_eq!(xhr.response_text(), expected);
    assert_eq!(xhr.response(), ResponseValue::Text(expected.to_string()));
}

#[tokio::test]
async fn test_terminal_reads_are_idempotent() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("hook", &log)));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/stable", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    transport.complete(200, "payload");
    xhr.settled().await;

    let first = (xhr.ready_state(), xhr.status(), xhr.response(), xhr.response_text());
    // The transport moving on does not leak through
    transport.abort();
    let second = (xhr.response_text(), xhr.response(), xhr.status(), xhr.ready_state());

    assert_eq!(first.0, ReadyState::Done);
    assert_eq!(first.1, 200);
    assert_eq!((first.0, first.1), (second.3, second.2));
    assert_eq!(first.2, second.1);
    assert_eq!(first.3, second.0);
    assert_eq!(transport.ready_state(), ReadyState::Unsent);
}

#[tokio::test]
async fn test_empty_values_before_completion() {
    let interceptor = interceptor();
    let (xhr, _transport) = intercepted(&interceptor);

    xhr.open("GET", "/pending", false, None, None).unwrap();
    assert_eq!(xhr.response(), ResponseValue::Text(String::new()));
    assert_eq!(xhr.response_text(), "");

    xhr.set_response_type(ResponseType::Json).unwrap();
    assert_eq!(xhr.response(), ResponseValue::Null);
    assert_eq!(xhr.response_type(), ResponseType::Json);
}

#[tokio::test]
async fn test_declared_response_type_wins() {
    let interceptor = interceptor();
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/t", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    transport.complete(200, "[1,2]");

    // The transport refuses changes once done, the declared type still wins
    xhr.set_response_type(ResponseType::Json).unwrap();
    assert_eq!(transport.response_type(), ResponseType::Default);
    assert_eq!(xhr.response_type(), ResponseType::Json);
}

#[tokio::test]
async fn test_hook_failures_are_isolated() {
    struct Failing;

    #[async_trait]
    impl XhrHook for Failing {
        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            anyhow::bail!("backend unavailable")
        }
    }

    struct Panicking;

    #[async_trait]
    impl XhrHook for Panicking {
        fn on_config(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            _config: &mut RequestConfig,
        ) -> anyhow::Result<()> {
            panic!("config bug")
        }

        async fn on_response(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            panic!("response bug")
        }
    }

    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Failing));
    interceptor.register(Arc::new(Panicking));
    interceptor.register(Arc::new(Probe::new("survivor", &log)));
    let (xhr, transport) = intercepted(&interceptor);

    xhr.open("GET", "/x", false, None, None).unwrap();
    xhr.add_event_listener(EventKind::Load, logging_listener(&log, &xhr, EventKind::Load));
    xhr.send(None).await.unwrap();
    transport.complete(200, "ok");
    xhr.settled().await;

    assert_eq!(
        entries(&log),
        vec![
            "survivor:config",
            "survivor:request",
            "survivor:response:200",
            "load"
        ]
    );
    assert_eq!(transport.send_count(), 1);
}

#[tokio::test]
async fn test_bypassed_hook_skips_later_checkpoints() {
    struct OptOut {
        log: Log,
    }

    #[async_trait]
    impl XhrHook for OptOut {
        fn on_config(
            &self,
            hook: &HookInstance,
            _xhr: &InterceptedXhr,
            config: &mut RequestConfig,
        ) -> anyhow::Result<()> {
            if config.url.starts_with("/static") {
                hook.set_bypass_request(true);
            }
            Ok(())
        }

        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            self.log.lock().push("request".to_string());
            Ok(())
        }
    }

    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(OptOut { log: log.clone() }));

    let (skipped, _) = intercepted(&interceptor);
    skipped.open("GET", "/static/app.js", false, None, None).unwrap();
    skipped.send(None).await.unwrap();
    assert!(entries(&log).is_empty());
    // Nobody wants the response, so no observer was installed
    assert_eq!(skipped.done_marker(), DoneMarker::Unobserved);

    let (watched, _) = intercepted(&interceptor);
    watched.open("GET", "/api", false, None, None).unwrap();
    watched.send(None).await.unwrap();
    assert_eq!(entries(&log), vec!["request"]);
    assert_eq!(watched.done_marker(), DoneMarker::Observing);
}

#[tokio::test]
async fn test_hook_removed_mid_sweep_is_skipped() {
    struct Remover {
        registry: Arc<HookRegistry>,
        victim: Arc<Mutex<Option<HookId>>>,
    }

    #[async_trait]
    impl XhrHook for Remover {
        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            if let Some(id) = *self.victim.lock() {
                self.registry.unregister(id);
            }
            Ok(())
        }
    }

    let interceptor = interceptor();
    let log = new_log();
    let victim = Arc::new(Mutex::new(None));
    interceptor.register(Arc::new(Remover {
        registry: interceptor.hooks().clone(),
        victim: victim.clone(),
    }));
    *victim.lock() = Some(interceptor.register(Arc::new(Probe::new("victim", &log))));

    let (xhr, _) = intercepted(&interceptor);
    xhr.open("GET", "/r", false, None, None).unwrap();
    xhr.send(None).await.unwrap();

    assert_eq!(entries(&log), vec!["victim:config"]);
    assert_eq!(interceptor.hooks().len(), 1);
}

#[tokio::test]
async fn test_listener_identity_preserved() {
    let interceptor = interceptor();
    let (xhr, transport) = intercepted(&interceptor);
    let on_change = listener(|_| {});
    let on_load = listener(|_| {});

    xhr.add_event_listener(EventKind::ReadyStateChange, on_change.clone());
    xhr.add_event_listener(EventKind::ReadyStateChange, on_change.clone());
    assert_eq!(transport.event_target().listener_count(EventKind::ReadyStateChange), 1);

    xhr.set_handler(EventKind::Load, Some(on_load.clone()));
    let handler = xhr.handler(EventKind::Load).unwrap();
    assert!(Arc::ptr_eq(&handler, &on_load));

    xhr.remove_event_listener(EventKind::ReadyStateChange, &on_change);
    assert_eq!(transport.event_target().listener_count(EventKind::ReadyStateChange), 0);

    // Unwrapped kinds reach the transport untouched
    let on_error = listener(|_| {});
    xhr.set_handler(EventKind::Error, Some(on_error.clone()));
    let raw = transport.handler(EventKind::Error).unwrap();
    assert!(Arc::ptr_eq(&raw, &on_error));
}

#[tokio::test]
async fn test_removed_listeners_are_forgotten() {
    let interceptor = interceptor();
    let (xhr, transport) = intercepted(&interceptor);

    for _ in 0..16 {
        let on_load = listener(|_| {});
        xhr.add_event_listener(EventKind::Load, on_load.clone());
        xhr.remove_event_listener(EventKind::Load, &on_load);
    }
    assert_eq!(xhr.tracked_listeners(), 0);

    // Shared by the handler slot, so removing the listener keeps the wrapper
    let on_change = listener(|_| {});
    xhr.add_event_listener(EventKind::ReadyStateChange, on_change.clone());
    xhr.set_handler(EventKind::ReadyStateChange, Some(on_change.clone()));
    xhr.remove_event_listener(EventKind::ReadyStateChange, &on_change);
    assert_eq!(xhr.tracked_listeners(), 1);
    let handler = xhr.handler(EventKind::ReadyStateChange).unwrap();
    assert!(Arc::ptr_eq(&handler, &on_change));

    xhr.set_handler(EventKind::ReadyStateChange, Some(listener(|_| {})));
    assert_eq!(xhr.tracked_listeners(), 1);
    xhr.set_handler(EventKind::ReadyStateChange, None);
    assert_eq!(xhr.tracked_listeners(), 0);
    assert!(transport.handler(EventKind::ReadyStateChange).is_none());
}

#[tokio::test]
async fn test_ready_state_handlers_never_overlap() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(
        Probe::new("slow", &log).slow_response(Duration::from_millis(20)),
    ));
    let (xhr, transport) = intercepted(&interceptor);

    let active = Arc::new(Mutex::new(false));
    let handler_log = log.clone();
    let flag = active.clone();
    let reader = xhr.clone();
    xhr.set_handler(
        EventKind::ReadyStateChange,
        Some(listener(move |_| {
            let mut busy = flag.lock();
            assert!(!*busy, "handlers overlapped");
            *busy = true;
            handler_log
                .lock()
                .push(format!("rsc:{}", reader.ready_state().as_u8()));
            *busy = false;
        })),
    );

    xhr.open("GET", "/o", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    transport.respond_headers(200, &[("content-type", "text/plain")]);
    transport.respond_body("a");
    transport.respond_body("b");
    transport.finish();
    xhr.settled().await;

    let states: Vec<String> = entries(&log)
        .into_iter()
        .filter(|e| e.starts_with("rsc"))
        .collect();
    assert_eq!(states, vec!["rsc:1", "rsc:2", "rsc:3", "rsc:4"]);
    assert_eq!(xhr.response_text(), "ab");
}

#[tokio::test]
async fn test_xh_json_accessor() {
    let interceptor = interceptor();
    interceptor.register(Arc::new(Fabricate(FabricatedResponse::text(r#"{"a":1}"#))));
    let (xhr, _) = intercepted(&interceptor);
    xhr.open("GET", "/j", false, None, None).unwrap();
    xhr.send(None).await.unwrap();

    assert_eq!(xhr.xh_json(), Some(serde_json::json!({"a": 1})));
    xhr.set_xh_json(serde_json::json!({"b": 2}));
    assert_eq!(xhr.response(), ResponseValue::Text(r#"{"b":2}"#.to_string()));
    assert_eq!(xhr.response_text(), r#"{"b":2}"#);

    let interceptor = self::interceptor();
    interceptor.register(Arc::new(Fabricate(FabricatedResponse::json(
        serde_json::json!([1, 2]),
    ))));
    let (xhr, _) = intercepted(&interceptor);
    xhr.open("GET", "/j", false, None, None).unwrap();
    xhr.send(None).await.unwrap();

    assert_eq!(xhr.xh_json(), Some(serde_json::json!([1, 2])));
    xhr.set_xh_json(serde_json::json!({"c": 3}));
    assert_eq!(xhr.response(), ResponseValue::Json(serde_json::json!({"c": 3})));
    assert_eq!(xhr.response_text(), "");

    let interceptor = self::interceptor();
    interceptor.register(Arc::new(Fabricate(FabricatedResponse::text("not json"))));
    let (xhr, _) = intercepted(&interceptor);
    xhr.open("GET", "/j", false, None, None).unwrap();
    xhr.send(None).await.unwrap();
    assert_eq!(xhr.xh_json(), None);
}

#[tokio::test]
async fn test_abort_during_replay() {
    let interceptor = Interceptor::with_config(
        Arc::new(ScriptedXhrConstructor::new()),
        InterceptorConfig::new().replay_step_delay(Duration::from_millis(20)),
    );
    interceptor.register(Arc::new(Fabricate(FabricatedResponse::text("never"))));
    let (xhr, transport) = intercepted(&interceptor);
    let log = new_log();

    xhr.open("GET", "/mock", true, None, None).unwrap();
    log_all_events(&log, &xhr);
    let mut started = event_channel(&xhr, EventKind::LoadStart);
    let mut done = event_channel(&xhr, EventKind::LoadEnd);
    xhr.send(None).await.unwrap();

    next_event(&mut started).await;
    xhr.abort();
    next_event(&mut done).await;
    // The replay resets the state once loadend listeners have run
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(entries(&log), vec!["loadstart", "rsc:4", "abort", "loadend"]);
    assert_eq!(xhr.ready_state(), ReadyState::Unsent);
    assert_eq!(xhr.status(), 0);
    assert_eq!(xhr.response_text(), "");
    assert_eq!(transport.send_count(), 0);
}

#[tokio::test]
async fn test_abort_before_dispatch_suppresses_send() {
    struct Slow;

    #[async_trait]
    impl XhrHook for Slow {
        async fn on_request(
            &self,
            _hook: &HookInstance,
            _xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(Slow));
    let (xhr, transport) = intercepted(&interceptor);
    let log = new_log();

    xhr.open("GET", "/a", true, None, None).unwrap();
    log_all_events(&log, &xhr);
    let mut done = event_channel(&xhr, EventKind::LoadEnd);
    xhr.send(None).await.unwrap();
    xhr.abort();

    next_event(&mut done).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    xhr.settled().await;

    assert_eq!(entries(&log), vec!["rsc:4", "abort", "loadend"]);
    assert_eq!(xhr.ready_state(), ReadyState::Unsent);
    assert_eq!(xhr.status(), 0);
    assert_eq!(transport.send_count(), 0);
    assert!(transport.calls().contains(&TransportCall::Abort));
}

#[tokio::test]
async fn test_sync_send_aborted_by_hook_returns_error() {
    struct AbortOnRequest;

    #[async_trait]
    impl XhrHook for AbortOnRequest {
        async fn on_request(
            &self,
            _hook: &HookInstance,
            xhr: &InterceptedXhr,
            _config: &SharedConfig,
        ) -> anyhow::Result<()> {
            xhr.abort();
            Ok(())
        }
    }

    let interceptor = interceptor();
    interceptor.register(Arc::new(AbortOnRequest));
    let (xhr, transport) = intercepted(&interceptor);
    let log = new_log();

    xhr.open("GET", "/a", false, None, None).unwrap();
    log_all_events(&log, &xhr);
    let err = xhr.send(None).await.unwrap_err();

    assert!(matches!(err, crate::error::Error::Aborted));
    assert_eq!(entries(&log), vec!["rsc:4", "abort", "loadend"]);
    assert_eq!(transport.send_count(), 0);
}

#[test]
fn test_sync_send_without_runtime_delivers_listeners() {
    let interceptor = Interceptor::new(Arc::new(ScriptedXhrConstructor::responding(200, "canned")));
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("hook", &log)));

    let xhr = interceptor.create();
    xhr.open("GET", "/offline", false, None, None).unwrap();
    log_all_events(&log, &xhr);
    futures::executor::block_on(xhr.send(None)).unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "hook:config",
            "hook:request",
            "loadstart",
            "progress",
            "rsc:2",
            "rsc:3",
            "hook:response:200",
            "rsc:4",
            "load",
            "loadend"
        ]
    );
    assert_eq!(xhr.response_text(), "canned");
    assert_eq!(xhr.done_marker(), DoneMarker::Completed);
}

#[tokio::test]
async fn test_disposed_instance_degrades() {
    let interceptor = interceptor();
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("hook", &log)));
    let (xhr, transport) = intercepted(&interceptor);
    assert_eq!(interceptor.live_instances(), 1);

    xhr.dispose();
    assert!(xhr.is_disposed());
    assert!(xhr.config().lock().disposed());
    assert_eq!(interceptor.live_instances(), 0);

    xhr.open("GET", "/after", false, None, None).unwrap();
    assert!(transport.was_opened());
    assert_eq!(xhr.ready_state(), ReadyState::Opened);
}

#[tokio::test]
async fn test_shadow_state_released_on_drop() {
    let interceptor = interceptor();
    let (xhr, transport) = intercepted(&interceptor);
    xhr.add_event_listener(EventKind::Load, listener(|_| {}));
    assert_eq!(interceptor.live_instances(), 1);

    drop(xhr);
    assert_eq!(interceptor.live_instances(), 0);

    // Wrappers left on the transport still reach the consumer listener
    transport.event_target().dispatch(&crate::event::XhrEvent::new(EventKind::Load));
}

#[tokio::test]
async fn test_interceptor_as_constructor() {
    let original = Arc::new(ScriptedXhrConstructor::responding(200, "canned"));
    let interceptor = Interceptor::new(original.clone());
    let log = new_log();
    interceptor.register(Arc::new(Probe::new("hook", &log).ignoring_responses()));

    let xhr = crate::transport::XhrConstructor::construct(&interceptor);
    xhr.open("GET", "/c", false, None, None).unwrap();
    xhr.send(None).await.unwrap();

    assert_eq!(xhr.response_text(), "canned");
    assert_eq!(xhr.status(), 200);
    assert_eq!(original.instances().len(), 1);
    assert_eq!(entries(&log), vec!["hook:config", "hook:request"]);
}
