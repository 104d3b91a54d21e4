//! Status, plugin kind and pipeline type enums.
//!
//! The status tables here are pipeline-wide invariants: every status maps to
//! exactly one boolean and one user-facing label.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution status of a plugin invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Unknown,
    Success,
    Warning,
    Error,
    Exception,
    Running,
    /// Paused / not yet run.
    Default,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Unknown,
        Status::Success,
        Status::Warning,
        Status::Error,
        Status::Exception,
        Status::Running,
        Status::Default,
    ];

    /// Boolean mapping: only SUCCESS and RUNNING are ok.
    pub fn is_ok(self) -> bool {
        match self {
            Status::Success | Status::Running => true,
            Status::Unknown
            | Status::Warning
            | Status::Error
            | Status::Exception
            | Status::Default => false,
        }
    }

    /// Label shown to users.
    pub fn label(self) -> &'static str {
        match self {
            Status::Unknown => "Not started",
            Status::Success => "Success",
            Status::Warning => "Warning",
            Status::Error => "ERROR",
            Status::Exception => "EXCEPTION",
            Status::Running => "Running",
            Status::Default => "Pause",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Unknown
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a plugin does inside a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Context,
    Collector,
    Validator,
    Exporter,
    Importer,
    PostImporter,
    Finalizer,
    PreFinalizer,
    PostFinalizer,
    Discover,
    Resolver,
    Action,
    Generic,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Context => "context",
            PluginKind::Collector => "collector",
            PluginKind::Validator => "validator",
            PluginKind::Exporter => "exporter",
            PluginKind::Importer => "importer",
            PluginKind::PostImporter => "post_importer",
            PluginKind::Finalizer => "finalizer",
            PluginKind::PreFinalizer => "pre_finalizer",
            PluginKind::PostFinalizer => "post_finalizer",
            PluginKind::Discover => "discover",
            PluginKind::Resolver => "resolver",
            PluginKind::Action => "action",
            PluginKind::Generic => "generic",
        }
    }

    /// Finalizer-family plugins still run after a halt and never flip the
    /// overall status under [`crate::FinalizerPolicy::ReportOnly`].
    pub fn is_finalizer_family(self) -> bool {
        matches!(
            self,
            PluginKind::PreFinalizer | PluginKind::Finalizer | PluginKind::PostFinalizer
        )
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline flavour a definition belongs to; a host owns one engine per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    Publisher,
    Loader,
    Opener,
    AssetManager,
    Resolver,
    LogViewer,
}

impl PipelineType {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineType::Publisher => "publisher",
            PipelineType::Loader => "loader",
            PipelineType::Opener => "opener",
            PipelineType::AssetManager => "asset_manager",
            PipelineType::Resolver => "resolver",
            PipelineType::LogViewer => "log_viewer",
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publisher" => Ok(PipelineType::Publisher),
            "loader" => Ok(PipelineType::Loader),
            "opener" => Ok(PipelineType::Opener),
            "asset_manager" => Ok(PipelineType::AssetManager),
            "resolver" => Ok(PipelineType::Resolver),
            "log_viewer" => Ok(PipelineType::LogViewer),
            other => Err(format!("unknown pipeline type '{}'", other)),
        }
    }
}
