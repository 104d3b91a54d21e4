//! Subcommand bodies.
use anyhow::{anyhow, bail, Context, Result};
use framework_core::{
    EngineRunner, LogItem, PipelineDefinition, PipelineResult, PipelineType, PluginExecutor,
    RunOptions,
};
use framework_event::{Broker, Session};
use framework_host::{Client, FrameworkConfig, Host, HostConnection};
use framework_plugins::standard_registry;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn load_config(path: Option<&Path>) -> Result<FrameworkConfig> {
    match path {
        Some(path) => {
            let mut config = FrameworkConfig::load_from(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(FrameworkConfig::load()?),
    }
}

/// Splits `KEY=VALUE`; the value is read as JSON when it parses, as a plain
/// string otherwise.
pub(crate) fn parse_assignment(text: &str) -> Result<(String, Value)> {
    let (key, raw) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", text))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{}'", text);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

pub(crate) fn run_options(context: &[String], options: &[String]) -> Result<RunOptions> {
    let mut run = RunOptions::new();
    for entry in context {
        let (key, value) = parse_assignment(entry)?;
        run = run.with_context(key, value);
    }
    for entry in options {
        let (path, value) = parse_assignment(entry)?;
        let (plugin, key) = path
            .split_once('.')
            .ok_or_else(|| anyhow!("expected PLUGIN.KEY=VALUE, got '{}'", entry))?;
        run = run.with_plugin_option(plugin, key, value);
    }
    Ok(run)
}

fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Runs `definition` in-process against the standard plugins.
pub(crate) fn run_local(
    definition: &Path,
    options: &RunOptions,
    host_types: Vec<String>,
    observer: &dyn Fn(&LogItem),
) -> Result<PipelineResult> {
    let definition = PipelineDefinition::from_path(definition)?;
    let registry = Arc::new(standard_registry()?);
    let runner = EngineRunner::new(
        definition.pipeline_type,
        host_types,
        registry,
        PluginExecutor::new("local"),
    );
    Ok(runner.run_observed(&definition, options, observer)?)
}

pub fn run(
    definition: &Path,
    context: &[String],
    options: &[String],
    host_types: Vec<String>,
    json: bool,
) -> Result<ExitCode> {
    let options = run_options(context, options)?;
    let print_item = |item: &LogItem| {
        if !json {
            println!("{}", item.summary());
        }
    };
    let result = run_local(definition, &options, host_types, &print_item)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let verdict = if result.status { "passed" } else { "FAILED" };
        println!(
            "{} '{}': {} ({:.4}s)",
            result.pipeline_type, result.definition, verdict, result.execution_time
        );
        if let Some(message) = &result.first_failure {
            println!("first failure: {}", message);
        }
        for fix in &result.fixes {
            println!("fix available for {}: {}", fix.plugin_name, fix.action.label());
        }
    }
    Ok(exit_code(result.status))
}

fn connect(config: &FrameworkConfig, broker: Option<String>) -> Result<Session> {
    let address = broker
        .or_else(|| config.broker.clone())
        .context("no broker address; pass --broker or set `broker` in the config")?;
    let session = Session::remote(&address, config.connect_timeout())
        .with_context(|| format!("connecting to broker {}", address))?;
    Ok(session)
}

fn wait_for_interrupt() -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

pub fn host(
    config: Option<&Path>,
    dcc: &str,
    broker: Option<String>,
    definitions: Vec<PathBuf>,
) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    config.definition_paths.extend(definitions);
    let session = connect(&config, broker)?;

    let host = Host::builder(dcc)
        .with_registry(Arc::new(standard_registry()?))
        .with_config(config)
        .load_definitions()?
        .start(&session)?;
    info!(host_id = host.id(), definitions = host.definitions().len(), "serving, press ctrl-c to stop");
    println!("{}", host.id());

    wait_for_interrupt()?;
    host.shutdown();
    session.close();
    Ok(ExitCode::SUCCESS)
}

fn describe(connection: &HostConnection) -> String {
    let definitions: Vec<String> = connection
        .definitions
        .iter()
        .map(|d| format!("{}:{}", d.pipeline_type, d.name))
        .collect();
    format!(
        "{}  [{}]  v{}  {}",
        connection.host_id,
        connection.host_types.join(", "),
        connection.framework_version,
        definitions.join(" ")
    )
}

pub fn discover(
    config: Option<&Path>,
    broker: Option<String>,
    timeout: Option<u64>,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(config)?;
    let session = connect(&config, broker)?;
    let client = Client::new(&session)?;
    let timeout = timeout
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.discovery_timeout());

    let hosts = client.discover_hosts(timeout)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hosts)?);
    } else if hosts.is_empty() {
        println!("no hosts answered within {:?}", timeout);
    } else {
        for connection in &hosts {
            println!("{}", describe(connection));
        }
    }
    drop(client);
    session.close();
    Ok(ExitCode::SUCCESS)
}

pub fn request(
    config: Option<&Path>,
    broker: Option<String>,
    host: &str,
    pipeline_type: PipelineType,
    definition: Option<&str>,
    context: &[String],
    options: &[String],
) -> Result<ExitCode> {
    let config = load_config(config)?;
    let options = run_options(context, options)?;
    let session = connect(&config, broker)?;
    let client = Client::new(&session)?;

    let hosts = client.discover_hosts(config.discovery_timeout())?;
    let target = hosts
        .iter()
        .find(|h| h.host_id == host)
        .or_else(|| hosts.iter().find(|h| h.dcc() == Some(host)))
        .with_context(|| format!("no host '{}' among {} discovered", host, hosts.len()))?;
    if !target.supports(pipeline_type) {
        bail!("host {} has no {} definitions", target.host_id, pipeline_type);
    }

    let report = client.run(target, pipeline_type, definition, options, config.run_timeout())?;
    print!("{}", report);
    for record in &report.history {
        let verdict = if record.status { "passed" } else { "FAILED" };
        println!("{}  {}  {}  {}", record.finished, record.definition, verdict, record.run_id);
    }
    drop(client);
    session.close();
    Ok(exit_code(report.status()))
}

pub fn broker(listen: &str) -> Result<ExitCode> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let broker = Broker::bind(listen).await?;
        info!(address = %broker.local_addr()?, "broker listening");
        broker
            .run_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Runs `uv` with inherited stdio and hands back its exit status.
pub fn uv(args: &[String]) -> Result<ExitCode> {
    let status = std::process::Command::new("uv")
        .args(args)
        .status()
        .context("failed to start uv; is it on PATH?")?;
    let code = status.code().unwrap_or(1);
    info!(code, "uv finished");
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
