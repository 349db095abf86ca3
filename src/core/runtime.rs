//! What task and method bodies see while they run.

use crate::connection::ConnectionManager;
use crate::context::Scope;
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::process::ProcessRunner;
use crate::registry::{value_to_string, Registry, TaskArgs};
use crate::sink::OutputSink;
use crate::utils::template;
use serde_json::{Map, Value};
use std::time::Duration;

/// Per-scope handle passed to every handler. Exposes the current scope,
/// command execution, output and nested task calls; nothing else of the
/// engine is reachable from task code.
pub struct TaskContext<'a> {
    registry: &'a Registry,
    executor: CommandExecutor<'a>,
    scope: &'a Scope,
    dry_run: bool,
    timeout: Option<Duration>,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        registry: &'a Registry,
        connection: &'a mut ConnectionManager,
        process: &'a dyn ProcessRunner,
        sink: &'a dyn OutputSink,
        scope: &'a Scope,
    ) -> Self {
        Self {
            registry,
            executor: CommandExecutor::new(connection, process, sink),
            scope,
            dry_run: false,
            timeout: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scope(&self) -> &Scope {
        self.scope
    }

    pub fn host(&self) -> Option<&str> {
        self.scope.host()
    }

    pub fn environment(&self) -> Option<&str> {
        self.scope.environment()
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.scope.variable(key)
    }

    pub fn var_str(&self, key: &str) -> Option<String> {
        self.variable(key).and_then(value_to_string)
    }

    /// Like `var_str`, failing with `ConfigMissingKey` when unset.
    pub fn require_var(&self, key: &str) -> Result<String> {
        self.var_str(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                let mut err = Error::config_missing_key(key, None);
                if let Some(env) = self.environment() {
                    err = err.with_hint(format!(
                        "Add '{}' to environment '{}' in the config file",
                        key, env
                    ));
                }
                err
            })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.executor.connection().is_connected()
    }

    /// Run another task or method with the same scope.
    pub fn run_task(&mut self, name: &str, args: &TaskArgs) -> Result<Value> {
        let registry = self.registry;
        registry.invoke(name, args, self)
    }

    /// Run a task or method at most once per run; later calls from any scope
    /// get the first outcome.
    pub fn run_task_once(&mut self, name: &str, args: &TaskArgs) -> Result<Value> {
        let registry = self.registry;
        registry.invoke_once(name, args, self)
    }

    pub fn local(&mut self, command: &str) -> Result<String> {
        self.executor.run_local(command, self.dry_run, self.timeout)
    }

    /// `local` with per-call overrides. A global dry run always wins.
    pub fn local_with(
        &mut self,
        command: &str,
        dry_run: bool,
        timeout: Option<Duration>,
    ) -> Result<String> {
        self.executor.run_local(
            command,
            self.dry_run || dry_run,
            timeout.or(self.timeout),
        )
    }

    pub fn remote(&mut self, command: &str) -> Result<String> {
        self.executor.run_remote(command, self.dry_run)
    }

    pub fn sudo(&mut self, command: &str) -> Result<String> {
        self.executor.run_sudo(command, self.dry_run)
    }

    /// Render `{{var}}` placeholders from the scope variables overlaid with
    /// the bound task arguments. Substituted values are shell-quoted.
    pub fn render(&self, command: &str, args: &TaskArgs) -> Result<String> {
        template::render_quoted(command, &self.template_vars(args))
    }

    fn template_vars(&self, args: &TaskArgs) -> Map<String, Value> {
        let mut vars = self.scope.variables().clone();
        if let Some(host) = self.host() {
            vars.insert("host".to_string(), Value::String(host.to_string()));
        }
        if let Some(env) = self.environment() {
            vars.insert("env".to_string(), Value::String(env.to_string()));
        }
        for (key, value) in args.named_values() {
            vars.insert(key.clone(), value.clone());
        }
        vars
    }

    pub fn info(&self, message: &str) {
        self.executor.sink().info(message);
    }

    pub fn error(&self, message: &str) {
        self.executor.sink().error(message);
    }

    /// Output captured from commands run in this scope so far.
    pub fn transcript(&self) -> &str {
        self.executor.transcript()
    }

    pub fn into_transcript(self) -> String {
        self.executor.into_transcript()
    }
}
