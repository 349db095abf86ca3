use clap::Args;
use hostrun::Parameter;
use serde::Serialize;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct TasksArgs {
    /// Only list tasks contributed by this extension
    #[arg(long)]
    pub origin: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksOutput {
    pub tasks: Vec<TaskSummary>,
    pub methods: Vec<String>,
}

pub fn run(args: TasksArgs, global: &GlobalArgs) -> CmdResult<TasksOutput> {
    let engine = global.engine()?;
    let registry = engine.registry();

    let tasks = registry
        .tasks()
        .filter(|task| match args.origin.as_deref() {
            Some(origin) => task.origin() == Some(origin),
            None => true,
        })
        .map(|task| TaskSummary {
            name: task.name().to_string(),
            description: task.description().map(str::to_string),
            parameters: task.parameters().to_vec(),
            origin: task.origin().map(str::to_string),
        })
        .collect();

    let methods = registry.method_names().map(str::to_string).collect();

    Ok((TasksOutput { tasks, methods }, 0))
}
