use hostrun::{
    Config, ConnectionParams, Engine, Invocation, MemorySink, ProcessOutput, ProcessRunner,
    RemoteShell, Severity, StreamKind,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
extensions: [shell, deploy]
environments:
  staging:
    hosts: [web1, web2]
    ssh_params:
      user: deploy
      port: 2222
    deploy:
      remote_dir: /srv/app
      local_dir: dist
      build_command: npm run build
      keep_releases: 3
  scratch:
    hosts: [tmp1]
"#;

/// Transport that must never be reached in a dry run.
struct Unreachable;

impl RemoteShell for Unreachable {
    fn connect(&mut self, host: &str, _params: &ConnectionParams) -> hostrun::Result<()> {
        panic!("dry run connected to {}", host)
    }
    fn disconnect(&mut self) -> hostrun::Result<()> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        false
    }
    fn exec(&mut self, command: &str) -> bool {
        panic!("dry run executed {}", command)
    }
    fn sudo_exec(&mut self, command: &str) -> bool {
        panic!("dry run executed sudo {}", command)
    }
    fn last_output(&self) -> &str {
        ""
    }
    fn last_error(&self) -> &str {
        ""
    }
}

struct NoSpawn;

impl ProcessRunner for NoSpawn {
    fn run(
        &self,
        command: &str,
        _timeout: Option<Duration>,
        _on_line: &mut dyn FnMut(StreamKind, &str),
    ) -> hostrun::Result<ProcessOutput> {
        panic!("dry run spawned {}", command)
    }
}

fn engine() -> (Engine, Arc<MemorySink>) {
    let config = Config::parse(CONFIG, "yml", "hostrun.yml").unwrap();
    let sink = Arc::new(MemorySink::new());
    let mut engine =
        Engine::new(config, Box::new(Unreachable), sink.clone()).with_process_runner(Box::new(NoSpawn));
    engine.attach_configured().unwrap();
    (engine, sink)
}

#[test]
fn attaching_deploy_warns_about_unconfigured_environments() {
    let (engine, sink) = engine();
    assert!(engine.registry().has("deploy"));
    assert!(engine.registry().has_method("remote_sync"));
    assert!(sink.contains("environment 'scratch' has no deploy.remote_dir"));
}

#[test]
fn dry_run_deploy_builds_once_and_prints_every_step() {
    let (mut engine, sink) = engine();
    let report = engine
        .run(&Invocation::new("deploy").env("staging").dry_run(true))
        .unwrap();

    assert_eq!(report.records.len(), 2);
    let releases: Vec<_> = report
        .records
        .iter()
        .map(|r| r.result.as_ref().unwrap()["release"].clone())
        .collect();
    assert_eq!(releases[0], releases[1]);
    assert_eq!(
        report.records[1].result.as_ref().unwrap()["host"],
        json!("web2")
    );

    let lines = sink.messages(Severity::Info);
    let builds = lines
        .iter()
        .filter(|l| l.as_str() == "[dry-run] Local: npm run build")
        .count();
    assert_eq!(builds, 1);
    assert!(lines
        .iter()
        .any(|l| l.contains("rsync -az --delete -e 'ssh -p 2222' dist/ deploy@web1:/srv/app/releases/")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("[dry-run] Remote: ln -sfn /srv/app/releases/")));
    assert!(lines.iter().any(|l| l.contains("tail -n +4")));
    assert!(!engine.is_connected());
}

#[test]
fn keep_argument_must_be_positive() {
    let (mut engine, _) = engine();
    let report = engine
        .execute(
            &Invocation::new("deploy")
                .env("staging")
                .named("keep", 0)
                .dry_run(true),
        )
        .unwrap();
    assert_eq!(report.summary.failed, 2);
}

#[test]
fn deploy_without_remote_dir_fails_per_host() {
    let (mut engine, _) = engine();
    let err = engine
        .run(&Invocation::new("deploy").env("scratch").dry_run(true))
        .unwrap_err();
    assert_eq!(err.details["failedHosts"], json!(["tmp1"]));
}
