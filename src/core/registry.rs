//! Task and method registry.
//!
//! Tasks are uniquely named, user-invocable units with declared parameters.
//! Methods are helpers contributed by extensions and callable from task
//! bodies. Both follow a first-registration-wins policy; a second
//! registration under the same name is ignored with a warning.

use crate::error::{Error, Result};
use crate::extension::{Extension, ExtensionHost};
use crate::runtime::TaskContext;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

pub type Handler = Arc<dyn Fn(&mut TaskContext<'_>, &TaskArgs) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Arguments as supplied by the caller, or as bound to a task's parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArgs {
    positional: Vec<Value>,
    named: Map<String, Value>,
}

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positional<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            positional: values.into_iter().map(|v| Value::String(v.into())).collect(),
            named: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn named(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(key.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named_values(&self) -> &Map<String, Value> {
        &self.named
    }

    /// Named value, falling back to nothing. After binding every declared
    /// parameter is present here.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// String form of a value; numbers and booleans are stringified.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name).and_then(value_to_string)
    }

    /// Positional values left over after binding.
    pub fn rest(&self) -> Vec<String> {
        self.positional.iter().filter_map(value_to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        other => Some(other.to_string()),
    }
}

#[derive(Clone)]
pub struct Task {
    name: String,
    description: Option<String>,
    parameters: Vec<Parameter>,
    origin: Option<String>,
    local_only: bool,
    handler: Handler,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("origin", &self.origin)
            .field("local_only", &self.local_only)
            .finish()
    }
}

impl Task {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>, &TaskArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            origin: None,
            local_only: false,
            handler: Arc::new(handler),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Refuse to run with an environment selected.
    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    pub(crate) fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_local_only(&self) -> bool {
        self.local_only
    }

    /// Extension that contributed the task; `None` for built-ins.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Map caller arguments onto declared parameters.
    ///
    /// Positionals fill parameters in declaration order, named values
    /// override, defaults fill the rest. Surplus positionals stay available
    /// through `TaskArgs::rest`.
    pub fn bind_args(&self, input: &TaskArgs) -> Result<TaskArgs> {
        let mut positional = input.positional.iter();
        let mut named = Map::new();
        let mut missing = Vec::new();

        for param in &self.parameters {
            let value = match input.named.get(&param.name) {
                Some(value) => Some(value.clone()),
                None => positional.next().cloned().or_else(|| param.default.clone()),
            };
            match value {
                Some(value) => {
                    named.insert(param.name.clone(), value);
                }
                None => missing.push(param.name.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(Error::validation_missing_argument(
                missing,
                Some(self.name.clone()),
            ));
        }

        // Undeclared named options pass through untouched.
        for (key, value) in &input.named {
            named.entry(key.clone()).or_insert_with(|| value.clone());
        }

        Ok(TaskArgs {
            positional: positional.cloned().collect(),
            named,
        })
    }
}

/// A named helper contributed by an extension. Methods receive the caller's
/// arguments unbound.
#[derive(Clone)]
pub struct Method {
    name: String,
    handler: Handler,
}

impl Method {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>, &TaskArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What a name resolves to.
#[derive(Clone)]
pub enum Operation {
    Task(Task),
    Method(Method),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::Task(task) => task.name(),
            Operation::Method(method) => method.name(),
        }
    }
}

/// Outcome of attaching one extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachReport {
    pub extension: String,
    pub tasks_added: Vec<String>,
    pub tasks_shadowed: Vec<String>,
    pub methods_added: Vec<String>,
    pub methods_shadowed: Vec<String>,
}

#[derive(Default)]
pub struct Registry {
    tasks: IndexMap<String, Task>,
    methods: IndexMap<String, Method>,
    executed: Mutex<HashMap<String, Result<Value>>>,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_:.\-]*$").unwrap_or_else(|e| panic!("bad regex: {}", e))
    })
}

/// Task and method names: a letter, then letters, digits, `_ : . -`.
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns false when the name is already taken (the
    /// existing task is kept).
    pub fn add_task(&mut self, task: Task) -> bool {
        if self.tasks.contains_key(task.name()) {
            return false;
        }
        self.tasks.insert(task.name().to_string(), task);
        true
    }

    fn add_method(&mut self, method: Method) -> bool {
        if self.methods.contains_key(method.name()) {
            return false;
        }
        self.methods.insert(method.name().to_string(), method);
        true
    }

    /// Merge an extension's tasks and methods. The host is handed to the
    /// extension before its tasks are read.
    pub fn attach_extension(
        &mut self,
        extension: &mut dyn Extension,
        host: &ExtensionHost<'_>,
    ) -> Result<AttachReport> {
        extension.on_attach(host)?;

        let name = extension.name().to_string();
        let mut report = AttachReport {
            extension: name.clone(),
            ..Default::default()
        };

        let tasks = extension.tasks();
        let methods = extension.methods();

        // Reject the whole extension before anything is registered.
        let names = tasks
            .iter()
            .map(|t| ("task", t.name()))
            .chain(methods.iter().map(|m| ("method", m.name())));
        for (kind, op_name) in names {
            if !is_valid_name(op_name) {
                return Err(Error::validation_invalid_argument(
                    kind,
                    format!("Invalid {} name '{}'", kind, op_name),
                    Some(name),
                ));
            }
        }

        for task in tasks {
            let task_name = task.name().to_string();
            if self.add_task(task.with_origin(name.clone())) {
                report.tasks_added.push(task_name);
            } else {
                host.output().error(&format!(
                    "Warning: task '{}' from extension '{}' is shadowed by an earlier registration",
                    task_name, name
                ));
                report.tasks_shadowed.push(task_name);
            }
        }

        for method in methods {
            let method_name = method.name().to_string();
            if self.add_method(method) {
                report.methods_added.push(method_name);
            } else {
                host.output().error(&format!(
                    "Warning: method '{}' from extension '{}' is shadowed by an earlier registration",
                    method_name, name
                ));
                report.methods_shadowed.push(method_name);
            }
        }

        Ok(report)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Resolve a name to a task, else a method.
    pub fn lookup(&self, name: &str) -> Option<Operation> {
        if let Some(task) = self.tasks.get(name) {
            return Some(Operation::Task(task.clone()));
        }
        self.methods.get(name).cloned().map(Operation::Method)
    }

    /// Run a task (arguments bound to its parameters) or a method.
    pub fn invoke(&self, name: &str, args: &TaskArgs, ctx: &mut TaskContext<'_>) -> Result<Value> {
        match self.lookup(name) {
            Some(Operation::Task(task)) => {
                let bound = task.bind_args(args)?;
                (task.handler)(ctx, &bound)
            }
            Some(Operation::Method(method)) => (method.handler)(ctx, args),
            None => Err(Error::unknown_operation(name)),
        }
    }

    /// Like `invoke`, but the first outcome for `name` is cached and returned
    /// for every later call in the same run, whatever the arguments.
    pub fn invoke_once(
        &self,
        name: &str,
        args: &TaskArgs,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Value> {
        if let Some(cached) = self.lock_executed().get(name) {
            return cached.clone();
        }
        if self.lookup(name).is_none() {
            return Err(Error::unknown_operation(name));
        }

        let outcome = self.invoke(name, args, ctx);
        self.lock_executed()
            .entry(name.to_string())
            .or_insert(outcome)
            .clone()
    }

    /// Names that already ran through `invoke_once`.
    pub fn executed_once(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_executed().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget all run-once outcomes. Called at the start of every run.
    pub fn reset_once(&self) {
        self.lock_executed().clear();
    }

    fn lock_executed(&self) -> MutexGuard<'_, HashMap<String, Result<Value>>> {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::context::Scope;
    use crate::environment::ConnectionParams;
    use crate::error::ErrorCode;
    use crate::process::ShellProcess;
    use crate::sink::MemorySink;
    use crate::ssh::RemoteShell;
    use indexmap::IndexMap;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoShell;

    impl RemoteShell for NoShell {
        fn connect(&mut self, host: &str, _params: &ConnectionParams) -> Result<()> {
            Err(Error::connection_failed(host, "no transport in tests"))
        }
        fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn exec(&mut self, _command: &str) -> bool {
            false
        }
        fn sudo_exec(&mut self, _command: &str) -> bool {
            false
        }
        fn last_output(&self) -> &str {
            ""
        }
        fn last_error(&self) -> &str {
            ""
        }
    }

    fn with_context<T>(registry: &Registry, f: impl FnOnce(&mut TaskContext<'_>) -> T) -> T {
        let mut connection = ConnectionManager::new(Box::new(NoShell));
        let process = ShellProcess::new();
        let sink = MemorySink::new();
        let scope = Scope::default();
        let mut ctx = TaskContext::new(registry, &mut connection, &process, &sink, &scope);
        f(&mut ctx)
    }

    struct Bundle {
        name: &'static str,
        value: &'static str,
        attached: Arc<AtomicUsize>,
    }

    impl Extension for Bundle {
        fn name(&self) -> &str {
            self.name
        }

        fn on_attach(&mut self, _host: &ExtensionHost<'_>) -> Result<()> {
            self.attached.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn tasks(&self) -> Vec<Task> {
            let value = self.value;
            vec![Task::new("greet", move |_, _| Ok(json!(value)))]
        }

        fn methods(&self) -> Vec<Method> {
            let value = self.value;
            vec![Method::new("helper", move |_, _| Ok(json!(value)))]
        }
    }

    fn host_parts() -> (MemorySink, IndexMap<String, crate::environment::Environment>) {
        (MemorySink::new(), IndexMap::new())
    }

    #[test]
    fn add_task_is_first_wins() {
        let mut registry = Registry::new();
        assert!(registry.add_task(Task::new("build", |_, _| Ok(json!("first")))));
        assert!(!registry.add_task(Task::new("build", |_, _| Ok(json!("second")))));

        let out = with_context(&registry, |ctx| {
            registry.invoke("build", &TaskArgs::new(), ctx)
        });
        assert_eq!(out.unwrap(), json!("first"));
        assert_eq!(registry.tasks().count(), 1);
    }

    #[test]
    fn attach_extension_keeps_existing_names_and_warns() {
        let (sink, envs) = host_parts();
        let host = ExtensionHost::new(&sink, &envs);
        let attached = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();

        let mut first = Bundle {
            name: "one",
            value: "one",
            attached: attached.clone(),
        };
        let mut second = Bundle {
            name: "two",
            value: "two",
            attached: attached.clone(),
        };

        let report = registry.attach_extension(&mut first, &host).unwrap();
        assert_eq!(report.tasks_added, vec!["greet"]);
        let report = registry.attach_extension(&mut second, &host).unwrap();
        assert_eq!(report.tasks_shadowed, vec!["greet"]);
        assert_eq!(report.methods_shadowed, vec!["helper"]);
        assert_eq!(attached.load(Ordering::SeqCst), 2);

        assert_eq!(registry.task("greet").unwrap().origin(), Some("one"));
        let out = with_context(&registry, |ctx| {
            registry.invoke("helper", &TaskArgs::new(), ctx)
        });
        assert_eq!(out.unwrap(), json!("one"));
        assert!(sink.contains("task 'greet' from extension 'two' is shadowed"));
    }

    struct HalfValid;

    impl Extension for HalfValid {
        fn name(&self) -> &str {
            "half"
        }

        fn tasks(&self) -> Vec<Task> {
            vec![
                Task::new("fine", |_, _| Ok(Value::Null)),
                Task::new("not valid", |_, _| Ok(Value::Null)),
            ]
        }

        fn methods(&self) -> Vec<Method> {
            vec![Method::new("helper", |_, _| Ok(Value::Null))]
        }
    }

    #[test]
    fn invalid_name_rejects_the_whole_extension() {
        let (sink, envs) = host_parts();
        let host = ExtensionHost::new(&sink, &envs);
        let mut registry = Registry::new();

        let err = registry
            .attach_extension(&mut HalfValid, &host)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
        assert!(!registry.has("fine"));
        assert!(!registry.has_method("helper"));
        assert_eq!(registry.tasks().count(), 0);
    }

    #[test]
    fn invoke_falls_back_to_methods_then_fails_typed() {
        let (sink, envs) = host_parts();
        let host = ExtensionHost::new(&sink, &envs);
        let mut registry = Registry::new();
        let mut bundle = Bundle {
            name: "one",
            value: "v",
            attached: Arc::new(AtomicUsize::new(0)),
        };
        registry.attach_extension(&mut bundle, &host).unwrap();

        assert!(!registry.has("helper"));
        assert!(registry.has_method("helper"));

        let err = with_context(&registry, |ctx| {
            registry.invoke("missing", &TaskArgs::new(), ctx)
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperation);
    }

    #[test]
    fn failing_method_is_distinct_from_missing_method() {
        let mut registry = Registry::new();
        registry.add_task(Task::new("broken", |_, _| {
            Err(Error::internal_unexpected("kaput"))
        }));

        let err = with_context(&registry, |ctx| {
            registry.invoke("broken", &TaskArgs::new(), ctx)
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalUnexpected);
    }

    #[test]
    fn invoke_once_runs_handler_a_single_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = Registry::new();
        registry.add_task(
            Task::new("build", move |_, args| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "call": n, "arg": args.get("target") }))
            })
            .param(Parameter::optional("target", json!("all"))),
        );

        let results: Vec<Value> = (0..3)
            .map(|i| {
                with_context(&registry, |ctx| {
                    registry.invoke_once("build", &TaskArgs::new().arg(format!("t{}", i)), ctx)
                })
                .unwrap()
            })
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &json!({ "call": 0, "arg": "t0" })));
        assert_eq!(registry.executed_once(), vec!["build"]);

        registry.reset_once();
        with_context(&registry, |ctx| {
            registry.invoke_once("build", &TaskArgs::new(), ctx)
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invoke_once_caches_failures_too() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = Registry::new();
        registry.add_task(Task::new("flaky", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::internal_unexpected("nope"))
        }));

        for _ in 0..2 {
            let err = with_context(&registry, |ctx| {
                registry.invoke_once("flaky", &TaskArgs::new(), ctx)
            })
            .unwrap_err();
            assert_eq!(err.code, ErrorCode::InternalUnexpected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invoke_once_does_not_cache_unknown_names() {
        let registry = Registry::new();
        let err = with_context(&registry, |ctx| {
            registry.invoke_once("ghost", &TaskArgs::new(), ctx)
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperation);
        assert!(registry.executed_once().is_empty());
    }

    #[test]
    fn bind_args_maps_positional_named_and_defaults() {
        let task = Task::new("deploy", |_, _| Ok(Value::Null))
            .param(Parameter::required("branch"))
            .param(Parameter::optional("force", json!(false)));

        let bound = task
            .bind_args(&TaskArgs::new().arg("main").arg("extra"))
            .unwrap();
        assert_eq!(bound.get_str("branch").as_deref(), Some("main"));
        assert_eq!(bound.get("force"), Some(&json!(false)));
        assert_eq!(bound.rest(), vec!["extra"]);

        let bound = task
            .bind_args(&TaskArgs::new().named("branch", "dev").named("force", true))
            .unwrap();
        assert_eq!(bound.get_str("branch").as_deref(), Some("dev"));
        assert_eq!(bound.get_str("force").as_deref(), Some("true"));
    }

    #[test]
    fn bind_args_reports_missing_parameters() {
        let task = Task::new("deploy", |_, _| Ok(Value::Null))
            .param(Parameter::required("branch"))
            .param(Parameter::required("tag"));

        let err = task.bind_args(&TaskArgs::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationMissingArgument);
        assert_eq!(err.details["args"], json!(["branch", "tag"]));
        assert_eq!(err.details["task"], "deploy");
    }

    #[test]
    fn name_validation() {
        assert!(is_valid_name("deploy"));
        assert!(is_valid_name("db:migrate"));
        assert!(is_valid_name("createPhar"));
        assert!(!is_valid_name("9lives"));
        assert!(!is_valid_name("has space"));
    }
}
