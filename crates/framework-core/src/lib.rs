//! Framework core: plugin contract, store, and the sequential engine.
//!
//! ```text
//! PipelineDefinition ─► EngineRunner ─► PluginExecutor ─► Plugin::run(store)
//!                            │                 │
//!                            │           MainThreadHandle (DCC main thread)
//!                            ▼
//!                    PipelineResult { status, log_items, store }
//! ```
//!
//! Plugins run strictly in declaration order. A failing non-finalizer plugin
//! halts the run; finalizer-family plugins still get their turn.

pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod log_item;
pub mod main_thread;
pub mod plugin;
pub mod status;
pub mod store;
pub mod validation;

pub use definition::{
    load_definitions, PipelineDefinition, PluginDefinition, Reference, StageDefinition,
    StepDefinition,
};
pub use engine::{EngineRunner, FinalizerPolicy, PendingFix, PipelineResult, PluginResolver, RunOptions};
pub use error::CoreError;
pub use executor::{PluginExecution, PluginExecutor};
pub use log_item::LogItem;
pub use main_thread::{MainThreadExecutor, MainThreadHandle};
pub use plugin::{
    Failure, FailureKind, FixAction, OutputContract, OutputType, Plugin, PluginInput,
    PluginOutput, COMMON_HOST_TYPE,
};
pub use status::{PipelineType, PluginKind, Status};
pub use store::{Store, CONTEXT_KEYS};
pub use validation::{merge_template, validate_output};

/// Version of the engine, reported by hosts during discovery.
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");
