//! Run orchestration: one task, every scope of the selected environment.
//!
//! Setup errors (unknown environment, unknown task, missing arguments)
//! abort before any scope runs. After that, each scope gets exactly one
//! `ExecutionRecord` and a failure on one host never stops the next.

use crate::builtin;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::context::{Context, Scope};
use crate::error::{Error, Result};
use crate::extension::{self, Extension, ExtensionHost};
use crate::output::{ExecutionRecord, RunReport};
use crate::process::{ProcessRunner, ShellProcess};
use crate::registry::{AttachReport, Operation, Registry, Task, TaskArgs};
use crate::runtime::TaskContext;
use crate::sink::OutputSink;
use crate::ssh::{RemoteShell, SshClient};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One request to run a task.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub task: String,
    pub args: TaskArgs,
    pub environment: Option<String>,
    pub dry_run: bool,
    /// Local command timeout; falls back to the configured one. Zero disables it.
    pub timeout: Option<Duration>,
    /// Variables overlaid on every scope (`--set key=value`).
    pub overrides: Map<String, Value>,
}

impl Invocation {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args = self.args.arg(value);
        self
    }

    pub fn named(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args = self.args.named(key, value);
        self
    }

    pub fn env(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

pub struct Engine {
    config: Config,
    registry: Registry,
    connection: ConnectionManager,
    process: Box<dyn ProcessRunner>,
    sink: Arc<dyn OutputSink>,
}

impl Engine {
    /// Engine with the built-in tasks registered and no extensions attached.
    pub fn new(config: Config, transport: Box<dyn RemoteShell>, sink: Arc<dyn OutputSink>) -> Self {
        let mut registry = Registry::new();
        for task in builtin::tasks() {
            registry.add_task(task);
        }

        Self {
            config,
            registry,
            connection: ConnectionManager::new(transport),
            process: Box::new(ShellProcess::new()),
            sink,
        }
    }

    /// System `ssh` transport plus every extension the config names.
    pub fn from_config(config: Config, sink: Arc<dyn OutputSink>) -> Result<Self> {
        let mut engine = Self::new(config, Box::new(SshClient::new()), sink);
        engine.attach_configured()?;
        Ok(engine)
    }

    pub fn with_process_runner(mut self, process: Box<dyn ProcessRunner>) -> Self {
        self.process = process;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sink(&self) -> &dyn OutputSink {
        self.sink.as_ref()
    }

    /// False between runs; every scope closes its connection.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Register a task; an existing name wins and a warning is printed.
    pub fn add_task(&mut self, task: Task) -> bool {
        let name = task.name().to_string();
        let added = self.registry.add_task(task);
        if !added {
            self.sink.error(&format!(
                "Warning: task '{}' is already registered; keeping the first definition",
                name
            ));
        }
        added
    }

    pub fn attach_extension(&mut self, extension: &mut dyn Extension) -> Result<AttachReport> {
        let host = ExtensionHost::new(self.sink.as_ref(), &self.config.environments);
        let report = self.registry.attach_extension(extension, &host)?;
        log_status!(
            "engine",
            "Attached extension '{}' ({} tasks)",
            report.extension,
            report.tasks_added.len()
        );
        Ok(report)
    }

    /// Attach the built-in extensions listed in the config, in order.
    pub fn attach_configured(&mut self) -> Result<Vec<AttachReport>> {
        let names = self.config.extensions.clone();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            let mut extension = extension::builtin(&name)?;
            reports.push(self.attach_extension(extension.as_mut())?);
        }
        Ok(reports)
    }

    /// Run the invocation on every scope and return the per-scope records,
    /// failed or not. Only setup errors are returned as `Err`.
    pub fn execute(&mut self, invocation: &Invocation) -> Result<RunReport> {
        let context = Context::resolve(
            invocation.environment.as_deref(),
            &self.config.environments,
        )?;

        match self.registry.lookup(&invocation.task) {
            None => return Err(Error::unknown_operation(&invocation.task)),
            // Fail on missing arguments once, not once per host.
            Some(Operation::Task(task)) => {
                task.bind_args(&invocation.args)?;
                if task.is_local_only() && context.is_bound() {
                    return Err(Error::validation_invalid_argument(
                        "env",
                        format!("Task '{}' runs locally and takes no environment", task.name()),
                        context.environment_name().map(str::to_string),
                    )
                    .with_hint(format!("Run 'hostrun run {}' without --env", task.name())));
                }
            }
            Some(Operation::Method(_)) => {}
        }

        let dry_run = invocation.dry_run || self.config.settings.dry_run;
        let timeout = invocation
            .timeout
            .or_else(|| self.config.settings.timeout())
            .filter(|t| !t.is_zero());

        self.registry.reset_once();
        let mut report = RunReport::new(
            &invocation.task,
            context.environment_name().map(str::to_string),
            dry_run,
        );

        log_status!(
            "engine",
            "Running '{}' on {} scope(s){}",
            invocation.task,
            context.len(),
            if dry_run { " (dry run)" } else { "" }
        );

        let Self {
            registry,
            connection,
            process,
            sink,
            ..
        } = self;
        let runner = ScopeRunner {
            registry: &*registry,
            process: process.as_ref(),
            sink: sink.as_ref(),
            dry_run,
            timeout,
        };

        for scope in context.scopes() {
            let scope = scope.with_overrides(&invocation.overrides);
            report.record(runner.run(connection, &scope, invocation));
        }

        Ok(report)
    }

    /// `execute`, turning any failed scope into `RunFailed`.
    pub fn run(&mut self, invocation: &Invocation) -> Result<RunReport> {
        self.execute(invocation)?.into_result()
    }
}

struct ScopeRunner<'a> {
    registry: &'a Registry,
    process: &'a dyn ProcessRunner,
    sink: &'a dyn OutputSink,
    dry_run: bool,
    timeout: Option<Duration>,
}

impl ScopeRunner<'_> {
    fn run(
        &self,
        connection: &mut ConnectionManager,
        scope: &Scope,
        invocation: &Invocation,
    ) -> ExecutionRecord {
        let started_at = Utc::now();
        let clock = Instant::now();
        let host = scope.host().map(str::to_string);

        self.sink
            .info(&format!("Task '{}' on {}", invocation.task, scope.label()));

        let (outcome, output) = match scope.host() {
            Some(host) => {
                match connection.open_scoped(host, scope.connection_params(), self.dry_run) {
                    // The guard closes the connection when this arm ends.
                    Ok(mut guard) => self.dispatch(&mut guard, scope, invocation),
                    Err(err) => (Err(err), String::new()),
                }
            }
            None => self.dispatch(connection, scope, invocation),
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        match outcome {
            Ok(value) => ExecutionRecord::success(
                &invocation.task,
                host,
                output,
                value,
                started_at,
                duration_ms,
            ),
            Err(err) => {
                self.sink.error(&format!(
                    "Task '{}' failed on {}: {}",
                    invocation.task,
                    scope.label(),
                    err.message
                ));
                for hint in &err.hints {
                    self.sink.error(&format!("Hint: {}", hint.message));
                }
                ExecutionRecord::failure(
                    &invocation.task,
                    host,
                    output,
                    &err,
                    started_at,
                    duration_ms,
                )
            }
        }
    }

    fn dispatch(
        &self,
        connection: &mut ConnectionManager,
        scope: &Scope,
        invocation: &Invocation,
    ) -> (Result<Value>, String) {
        let mut ctx = TaskContext::new(self.registry, connection, self.process, self.sink, scope)
            .with_dry_run(self.dry_run)
            .with_timeout(self.timeout);
        let outcome = self
            .registry
            .invoke(&invocation.task, &invocation.args, &mut ctx);
        (outcome, ctx.into_transcript())
    }
}
