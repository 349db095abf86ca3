// Public modules
pub mod builtin;
pub mod config;
pub mod connection;
pub mod context;
pub mod engine;
pub mod environment;
pub mod error;
pub mod executor;
pub mod extension;
pub mod output;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod sink;
pub mod ssh;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use config::{Config, Settings};
pub use connection::{ConnectionManager, ScopedConnection};
pub use context::{Context, Scope};
pub use engine::{Engine, Invocation};
pub use environment::{ConnectionParams, Environment};
pub use error::{Error, ErrorCode, Result};
pub use executor::CommandExecutor;
pub use extension::{Extension, ExtensionHost};
pub use output::{ExecutionRecord, RecordError, RunReport, RunSummary};
pub use process::{ProcessOutput, ProcessRunner, ShellProcess, StreamKind};
pub use registry::{Method, Operation, Parameter, Registry, Task, TaskArgs};
pub use runtime::TaskContext;
pub use sink::{ConsoleSink, MemorySink, OutputSink, Severity};
pub use ssh::{RemoteShell, SshClient};
