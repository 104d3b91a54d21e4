//! Host and client talking over an in-process bus.

use framework_core::{
    Failure, MainThreadExecutor, PipelineDefinition, PipelineType, Plugin, PluginDefinition,
    PluginInput, PluginKind, PluginOutput, RunOptions, StageDefinition, Status, StepDefinition,
};
use framework_event::{LocalBus, Session};
use framework_host::{
    topics, Client, ClientError, FrameworkConfig, Host, HostConnection, LogItemEvent, UiHookRequest,
};
use framework_registry::PluginRegistry;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const DISCOVERY: Duration = Duration::from_millis(400);
const RUN_TIMEOUT: Duration = Duration::from_secs(10);

struct Collect;

impl Plugin for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Collector
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        Ok(input.option("items").cloned().unwrap_or_else(|| json!([])).into())
    }

    fn has_ui_hook(&self) -> bool {
        true
    }

    fn ui_hook(&self, payload: &Value, _options: &Map<String, Value>) -> Result<Value, Failure> {
        match payload.get("prefix").and_then(Value::as_str) {
            Some(prefix) => Ok(json!([format!("{}_cam1", prefix), format!("{}_cam2", prefix)])),
            None => Err(Failure::ui_hook("prefix is required")),
        }
    }
}

struct NonEmpty;

impl Plugin for NonEmpty {
    fn name(&self) -> &str {
        "non_empty"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Validator
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        Ok(json!(!input.data().is_empty()).into())
    }
}

struct Finalize;

impl Plugin for Finalize {
    fn name(&self) -> &str {
        "finalize"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Finalizer
    }

    fn run(&self, _input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        Ok(json!({}).into())
    }
}

struct Slow;

impl Plugin for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Generic
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        let millis = input.option("millis").and_then(Value::as_u64).unwrap_or(0);
        thread::sleep(Duration::from_millis(millis));
        Ok(Value::Null.into())
    }
}

struct ThreadReporter;

impl Plugin for ThreadReporter {
    fn name(&self) -> &str {
        "thread_report"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Generic
    }

    fn requires_main_thread(&self) -> bool {
        true
    }

    fn run(&self, _input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        Ok(json!(format!("{:?}", thread::current().id())).into())
    }
}

fn registry() -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    for plugin in [
        Arc::new(Collect) as Arc<dyn Plugin>,
        Arc::new(NonEmpty),
        Arc::new(Finalize),
        Arc::new(Slow),
        Arc::new(ThreadReporter),
    ] {
        registry.register(plugin).unwrap();
    }
    Arc::new(registry)
}

fn publisher() -> PipelineDefinition {
    PipelineDefinition::new("scene-publisher", PipelineType::Publisher)
        .step(
            StepDefinition::new("components")
                .stage(StageDefinition::new("collector").plugin(PluginDefinition::new("collect", PluginKind::Collector)))
                .stage(StageDefinition::new("validator").plugin(PluginDefinition::new("non_empty", PluginKind::Validator))),
        )
        .step(
            StepDefinition::new("finalizers")
                .stage(StageDefinition::new("finalizer").plugin(PluginDefinition::new("finalize", PluginKind::Finalizer))),
        )
}

fn single(name: &str, pipeline_type: PipelineType, plugin: &str) -> PipelineDefinition {
    PipelineDefinition::new(name, pipeline_type).step(
        StepDefinition::new("main")
            .stage(StageDefinition::new(plugin).plugin(PluginDefinition::new(plugin, PluginKind::Generic))),
    )
}

struct Fixture {
    _bus: LocalBus,
    host_session: Session,
    client_session: Session,
}

impl Fixture {
    fn new() -> Self {
        let bus = LocalBus::new();
        Self {
            host_session: Session::local(&bus).unwrap(),
            client_session: Session::local(&bus).unwrap(),
            _bus: bus,
        }
    }

    fn host(&self, dcc: &str, config: FrameworkConfig) -> Host {
        Host::builder(dcc)
            .with_registry(registry())
            .with_config(config)
            .with_definition(publisher())
            .with_definition(single("slow-loader", PipelineType::Loader, "slow"))
            .start(&self.host_session)
            .unwrap()
    }

    fn client(&self) -> Client {
        Client::new(&self.client_session).unwrap()
    }
}

fn find(client: &Client, host_id: &str) -> HostConnection {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(found) = client
            .discover_hosts(DISCOVERY)
            .unwrap()
            .into_iter()
            .find(|h| h.host_id == host_id)
        {
            return found;
        }
    }
    panic!("host {} never answered discovery", host_id);
}

#[test]
fn test_discovery_without_hosts_is_empty_after_timeout() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let start = Instant::now();
    let hosts = client.discover_hosts(Duration::from_millis(300)).unwrap();
    let elapsed = start.elapsed();
    assert!(hosts.is_empty());
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
}

#[test]
fn test_two_hosts_are_discovered_with_their_types() {
    let fixture = Fixture::new();
    let maya = fixture.host("maya", FrameworkConfig::default());
    let nuke = fixture.host("nuke", FrameworkConfig::default());
    let client = fixture.client();

    let maya_connection = find(&client, maya.id());
    let nuke_connection = find(&client, nuke.id());
    assert_eq!(maya_connection.host_types, vec!["maya", "qt"]);
    assert_eq!(nuke_connection.dcc(), Some("nuke"));
    assert!(maya_connection.supports(PipelineType::Publisher));
    assert!(maya_connection.definition("scene-publisher").is_some());
    assert_eq!(client.hosts().len(), 2);
}

#[test]
fn test_end_to_end_run_reports_validator_failure() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();

    let items: Arc<Mutex<Vec<LogItemEvent>>> = Arc::default();
    let debug_count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&items);
    fixture
        .client_session
        .hub()
        .subscribe(topics::LOG_ITEM, move |event| {
            if let Ok(item) = serde_json::from_value(event.data.clone()) {
                sink.lock().unwrap().push(item);
            }
            None
        })
        .unwrap();
    let debug_sink = Arc::clone(&debug_count);
    fixture
        .client_session
        .hub()
        .subscribe(topics::DEBUG_INFORMATION, move |_| {
            *debug_sink.lock().unwrap() += 1;
            None
        })
        .unwrap();

    let connection = find(&client, host.id());
    let report = client
        .run(&connection, PipelineType::Publisher, Some("scene-publisher"), RunOptions::new(), RUN_TIMEOUT)
        .unwrap();

    let statuses: Vec<Status> = report.log_items().iter().map(|i| i.status).collect();
    assert_eq!(statuses, vec![Status::Success, Status::Error, Status::Success]);
    assert!(!report.status());
    assert!(report.first_failure().unwrap().starts_with("invalid output"));
    assert!(report.to_string().contains("[ERROR] components/validator non_empty"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while items.lock().unwrap().len() < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let seen = items.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|e| e.request_id == report.request_id));
    assert_eq!(*debug_count.lock().unwrap(), 1);
}

#[test]
fn test_run_options_reach_plugins() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let connection = find(&client, host.id());

    let options = RunOptions::new().with_plugin_option("collect", "items", json!(["/tmp/scene.mb"]));
    let report = client
        .run(&connection, PipelineType::Publisher, None, options, RUN_TIMEOUT)
        .unwrap();
    assert!(report.status());
    assert!(report.first_failure().is_none());
    assert_eq!(report.log_items().len(), 3);
}

#[test]
fn test_unknown_definition_is_a_hard_failure() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let connection = find(&client, host.id());

    let err = client
        .run(&connection, PipelineType::Publisher, Some("missing"), RunOptions::new(), RUN_TIMEOUT)
        .unwrap_err();
    match err {
        ClientError::RunFailed { host_id, message } => {
            assert_eq!(host_id, host.id());
            assert!(message.contains("missing"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_timed_out_request_drops_late_result() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let connection = find(&client, host.id());

    let slow = RunOptions::new().with_plugin_option("slow", "millis", json!(400));
    let err = client
        .run(&connection, PipelineType::Loader, None, slow, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }));

    // the host still finishes the abandoned run; the next request is unaffected
    let quick = RunOptions::new().with_plugin_option("slow", "millis", json!(0));
    let report = client
        .run(&connection, PipelineType::Loader, None, quick, RUN_TIMEOUT)
        .unwrap();
    assert!(report.status());

    let deadline = Instant::now() + Duration::from_secs(5);
    while host.history().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(host.history().len(), 2);
}

#[test]
fn test_submit_returns_ticket() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let connection = find(&client, host.id());

    let ticket = client
        .submit(&connection, PipelineType::Loader, Some("slow-loader"), RunOptions::new())
        .unwrap();
    assert!(!ticket.request_id().is_empty());
    let report = ticket.wait(RUN_TIMEOUT).unwrap();
    assert_eq!(report.pipeline_type, PipelineType::Loader);
}

#[test]
fn test_ui_hook_round_trip_and_failure() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let connection = find(&client, host.id());

    let request = UiHookRequest::new(&connection.host_id, PipelineType::Publisher, "scene-publisher", "collect");
    let cameras = client
        .ui_hook(request.clone().with_payload(json!({"prefix": "shot"})), RUN_TIMEOUT)
        .unwrap();
    assert_eq!(cameras, json!(["shot_cam1", "shot_cam2"]));

    let err = client.ui_hook(request, RUN_TIMEOUT).unwrap_err();
    assert!(matches!(err, ClientError::UiHook(ref m) if m.contains("prefix is required")));

    // ui hook failures never show up in the run history
    assert!(host.history().is_empty());
}

#[test]
fn test_log_viewer_answers_from_history() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let connection = find(&client, host.id());

    client
        .run(&connection, PipelineType::Publisher, None, RunOptions::new(), RUN_TIMEOUT)
        .unwrap();
    client
        .run(&connection, PipelineType::Loader, None, RunOptions::new(), RUN_TIMEOUT)
        .unwrap();

    let all = client.history(&connection, None, RUN_TIMEOUT).unwrap();
    assert_eq!(all.len(), 2);
    let publishes = client.history(&connection, Some("scene-publisher"), RUN_TIMEOUT).unwrap();
    assert_eq!(publishes.len(), 1);
    assert!(!publishes[0].status);
}

#[test]
fn test_disconnect_removes_host_connection() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let host_id = find(&client, host.id()).host_id;
    assert!(client.host(&host_id).is_some());

    drop(host);

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.host(&host_id).is_some() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(client.host(&host_id).is_none());
    assert!(client.discover_hosts(DISCOVERY).unwrap().is_empty());
}

#[test]
fn test_silent_host_is_dropped_by_next_discovery() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    let host_id = find(&client, host.id()).host_id;

    // the session goes first, so no disconnect notice is ever sent
    fixture.host_session.close();
    drop(host);
    assert!(client.host(&host_id).is_some());

    assert!(client.discover_hosts(DISCOVERY).unwrap().is_empty());
    assert!(client.host(&host_id).is_none());
    assert!(client.hosts().is_empty());
}

#[test]
fn test_single_threaded_host_still_answers() {
    let fixture = Fixture::new();
    let config = FrameworkConfig {
        multithreading: false,
        ..FrameworkConfig::default()
    };
    let host = fixture.host("houdini", config);
    let client = fixture.client();
    let connection = find(&client, host.id());

    let report = client
        .run(&connection, PipelineType::Loader, None, RunOptions::new(), RUN_TIMEOUT)
        .unwrap();
    assert!(report.status());
}

#[test]
fn test_main_thread_plugins_run_on_the_main_thread() {
    let fixture = Fixture::new();
    let executor = MainThreadExecutor::new();
    let host = Host::builder("maya")
        .with_registry(registry())
        .with_main_thread(executor.handle())
        .with_definition(single("thread-manager", PipelineType::AssetManager, "thread_report"))
        .start(&fixture.host_session)
        .unwrap();
    let client = fixture.client();
    let connection = find(&client, host.id());

    let ticket = client
        .submit(&connection, PipelineType::AssetManager, None, RunOptions::new())
        .unwrap();
    let mut outcome = None;
    let finished = executor
        .process_until(RUN_TIMEOUT, || {
            outcome = ticket.try_result();
            outcome.is_some()
        })
        .unwrap();
    assert!(finished);

    let report = outcome.unwrap().unwrap();
    let result = report.result.unwrap();
    let ran_on = &result.store.components().unwrap()["main"]["thread_report"]["thread_report"];
    assert_eq!(ran_on, &json!(format!("{:?}", thread::current().id())));
}

#[test]
fn test_on_ready_fires_once_with_hosts() {
    let fixture = Fixture::new();
    let host = fixture.host("maya", FrameworkConfig::default());
    let client = fixture.client();
    // warm up so the host is known to answer
    find(&client, host.id());

    let (tx, rx) = crossbeam_channel::bounded(1);
    let handle = client
        .on_ready(move |hosts| tx.send(hosts).unwrap(), DISCOVERY)
        .unwrap();
    let hosts = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert!(hosts.iter().any(|h| h.host_id == host.id()));
}
