use clap::Args;
use hostrun::config::parse_overrides;
use hostrun::{Error, Invocation, RunReport};
use serde_json::Value;
use std::time::Duration;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Task (or method) to run
    pub task: String,

    /// Positional task arguments, bound to the task's parameters in order.
    ///
    /// Put `--` before arguments that start with a dash:
    ///   hostrun run remote --env prod -- ls -la /srv
    pub args: Vec<String>,

    /// Environment whose hosts the task runs on (omit for local-only)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Print every command instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Local command timeout in seconds (0 disables; default from config)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Named task argument, repeatable
    #[arg(short = 'o', long = "opt", value_name = "NAME=VALUE")]
    pub options: Vec<String>,

    /// Override a scope variable, repeatable (dotted keys allowed)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunReport> {
    let mut engine = global.engine()?;

    let mut invocation = Invocation::new(args.task).dry_run(args.dry_run);
    invocation.environment = args.env;
    invocation.overrides = parse_overrides(&args.set)?;
    if let Some(secs) = args.timeout {
        invocation = invocation.timeout(Duration::from_secs(secs));
    }
    for value in args.args {
        invocation = invocation.arg(value);
    }
    for (key, value) in parse_overrides(&args.options)? {
        invocation = invocation.named(key, value);
    }

    let report = engine.execute(&invocation)?;
    let records = serde_json::to_value(&report.records).unwrap_or(Value::Null);
    match report.into_result() {
        Ok(report) => Ok((report, 0)),
        Err(err) => Err(attach_records(err, records)),
    }
}

/// Keep per-host records in the failure envelope.
fn attach_records(mut err: Error, records: Value) -> Error {
    if let Value::Object(details) = &mut err.details {
        details.insert("records".to_string(), records);
    }
    err
}
