use clap::Args;
use serde::Serialize;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct EnvsArgs {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSummary {
    pub name: String,
    pub hosts: Vec<String>,
    pub host_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvsOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub environments: Vec<EnvSummary>,
    pub extensions: Vec<String>,
}

pub fn run(_args: EnvsArgs, global: &GlobalArgs) -> CmdResult<EnvsOutput> {
    let config = global.load_config()?;

    let environments = config
        .environments()
        .iter()
        .map(|(name, env)| EnvSummary {
            name: name.clone(),
            hosts: env.hosts.clone(),
            host_count: env.hosts.len(),
            user: env.ssh_params.user.clone(),
            port: env.ssh_params.port,
        })
        .collect();

    Ok((
        EnvsOutput {
            source: config
                .source
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            environments,
            extensions: config.extensions().to_vec(),
        },
        0,
    ))
}
