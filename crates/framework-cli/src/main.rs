//! `framework`: run pipeline definitions locally, serve a DCC host, or
//! drive remote hosts through the event broker.
//!
//! # Environment
//!
//! - `RUST_LOG`: log filter (defaults to `info`, `debug` with `--verbose`)
//! - `FTRACK_CONNECT_CONFIG_PATH`: directory holding `ftrack_connect.yaml`
//! - `FTRACK_FRAMEWORK_MULTITHREADING`: `0/false/no/off` runs requests on the
//!   event thread
//! - `FRAMEWORK_DEPENDENCIES`: extra definition directory

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use framework_core::PipelineType;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "framework")]
#[command(version, about = "DCC content pipeline framework", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a definition file in this process with the standard plugins
    Run {
        /// Definition file (yaml or json)
        definition: PathBuf,

        /// Run context value, repeatable
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Plugin option override, repeatable
        #[arg(long = "option", value_name = "PLUGIN.KEY=VALUE")]
        options: Vec<String>,

        /// Host type tags used to pick plugin implementations
        #[arg(long = "host-type", default_value = "python")]
        host_types: Vec<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve a host for one DCC until interrupted
    Host {
        /// DCC tag advertised by the host
        #[arg(long, default_value = "python")]
        dcc: String,

        /// Broker address (overrides the config)
        #[arg(long)]
        broker: Option<String>,

        /// Extra definition directory, repeatable
        #[arg(long = "definitions", value_name = "DIR")]
        definitions: Vec<PathBuf>,
    },
    /// List the hosts answering on the broker
    Discover {
        /// Broker address (overrides the config)
        #[arg(long)]
        broker: Option<String>,

        /// How long to collect replies, in milliseconds
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Print hosts as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask a discovered host to run one of its definitions
    Request {
        /// Host id or DCC tag
        host: String,

        /// Pipeline type (publisher, loader, opener, asset_manager, resolver, log_viewer)
        #[arg(long = "type", value_name = "TYPE")]
        pipeline_type: PipelineType,

        /// Definition name; the host's first one of the type otherwise
        #[arg(long)]
        definition: Option<String>,

        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        #[arg(long = "option", value_name = "PLUGIN.KEY=VALUE")]
        options: Vec<String>,

        #[arg(long)]
        broker: Option<String>,
    },
    /// Relay events between hosts and clients
    Broker {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:9090")]
        listen: String,
    },
    /// Run `uv`, relaying its output and exit status
    Uv {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.config.as_deref();
    match args.command {
        Command::Run {
            definition,
            context,
            options,
            host_types,
            json,
        } => commands::run(&definition, &context, &options, host_types, json),
        Command::Host {
            dcc,
            broker,
            definitions,
        } => commands::host(config, &dcc, broker, definitions),
        Command::Discover {
            broker,
            timeout,
            json,
        } => commands::discover(config, broker, timeout, json),
        Command::Request {
            host,
            pipeline_type,
            definition,
            context,
            options,
            broker,
        } => commands::request(
            config,
            broker,
            &host,
            pipeline_type,
            definition.as_deref(),
            &context,
            &options,
        ),
        Command::Broker { listen } => commands::broker(&listen),
        Command::Uv { args } => commands::uv(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_repeated_flags() {
        let args = Args::try_parse_from([
            "framework",
            "-v",
            "run",
            "publish.yaml",
            "--context",
            "context_id=task-1",
            "--option",
            "collector.paths=[\"a.mb\"]",
            "--option",
            "exporter.output=out.json",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Run {
                definition,
                context,
                options,
                host_types,
                json,
            } => {
                assert_eq!(definition, PathBuf::from("publish.yaml"));
                assert_eq!(context, vec!["context_id=task-1"]);
                assert_eq!(options.len(), 2);
                assert_eq!(host_types, vec!["python"]);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_request_parses_pipeline_type() {
        let args = Args::try_parse_from(["framework", "request", "maya", "--type", "asset_manager"]).unwrap();
        match args.command {
            Command::Request {
                host,
                pipeline_type,
                definition,
                ..
            } => {
                assert_eq!(host, "maya");
                assert_eq!(pipeline_type, PipelineType::AssetManager);
                assert!(definition.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Args::try_parse_from(["framework", "request", "maya", "--type", "renderer"]).is_err());
    }

    #[test]
    fn test_uv_keeps_hyphenated_arguments() {
        let args = Args::try_parse_from(["framework", "uv", "pip", "install", "--upgrade", "pyyaml"]).unwrap();
        match args.command {
            Command::Uv { args } => assert_eq!(args, vec!["pip", "install", "--upgrade", "pyyaml"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let args = Args::try_parse_from(["framework", "discover", "--config", "/tmp/f.yaml", "--json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/f.yaml")));
    }
}
