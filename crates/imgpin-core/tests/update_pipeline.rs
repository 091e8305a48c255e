//! ---
//! imgpin_section: "06-orchestration"
//! imgpin_subsection: "tests"
//! imgpin_type: "test"
//! imgpin_scope: "code"
//! imgpin_description: "Per-service pipeline behaviour against a recording command runner."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use imgpin_common::{ErrorKind, RestartMethod, RunStatus, Settings};
use imgpin_core::{ServiceOutcome, Updater};
use imgpin_resolver::{DigestCache, RegistryInspector};
use imgpin_snapshot::Snapper;
use imgpin_tools::fake::RecordingRunner;
use imgpin_tools::{ToolCommand, ToolOutput};
use tempfile::TempDir;

const APP_INSPECT: &str = "skopeo inspect --no-tags docker://registry/app:release";
const APP_DIGEST: &str = "registry/app@sha256:deadbeef";

struct Fixture {
    root: TempDir,
    runner: Arc<RecordingRunner>,
    settings: Settings,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::from_vars(
            vec![
                ("IMGPIN_SERVICES_ROOT".to_owned(), root.path().display().to_string()),
                (
                    "IMGPIN_CACHE_LOCATION".to_owned(),
                    root.path().join("cache.json").display().to_string(),
                ),
            ],
            None,
        )
        .unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            APP_INSPECT,
            ToolOutput::ok(r#"{"Name": "registry/app", "Digest": "sha256:deadbeef"}"#),
        );
        Self {
            root,
            runner,
            settings,
        }
    }

    fn service(&self, name: &str, env: &str) -> PathBuf {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("compose.yml"), "services: {}\n").unwrap();
        fs::write(dir.join(".env"), env).unwrap();
        dir
    }

    fn updater(&self, services: &[&PathBuf]) -> Updater {
        let runner: Arc<RecordingRunner> = self.runner.clone();
        let inspector = RegistryInspector::new(runner.clone(), ToolCommand::parse("skopeo").unwrap(), "docker");
        let cache = DigestCache::open(
            &self.settings.cache_location,
            self.settings.cache_duration,
            inspector,
        );
        let snapper = self.settings.service_snapshot.then(|| {
            let configs: Vec<String> = services
                .iter()
                .map(|dir| {
                    format!(
                        r#"{{"config": "{}", "subvolume": {}}}"#,
                        dir.file_name().unwrap().to_string_lossy(),
                        serde_json::to_string(&dir.display().to_string()).unwrap()
                    )
                })
                .collect();
            runner.respond(
                "snapper --jsonout list-configs",
                ToolOutput::ok(format!(r#"{{"configs": [{}]}}"#, configs.join(","))),
            );
            Snapper::load(runner.clone(), ToolCommand::parse("snapper").unwrap()).unwrap()
        });
        self.runner.clear_log();
        Updater::new(self.settings.clone(), runner, cache, snapper).unwrap()
    }
}

fn env_of(dir: &Path) -> String {
    fs::read_to_string(dir.join(".env")).unwrap()
}

#[test]
fn resolves_writes_and_restarts_a_changed_service() -> Result<()> {
    let fx = Fixture::new();
    let app = fx.service("app", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    let mut updater = fx.updater(&[&app]);

    let report = updater.update_all(&[app.clone()]);
    assert_eq!(report.status(), RunStatus::Success);
    let service = report.service("app").unwrap();
    assert_eq!(service.outcome, ServiceOutcome::Updated);
    assert_eq!(service.changes[0].current, APP_DIGEST);
    assert_eq!(service.changes[0].previous, None);
    assert_eq!(
        env_of(&app),
        format!("SERVICE_APP_IMAGE_TAGGED=registry/app:release\nSERVICE_APP_IMAGE_HASHED={APP_DIGEST}")
    );

    let lines = fx.runner.command_lines();
    assert_eq!(lines.len(), 6, "{lines:?}");
    assert_eq!(lines[0], APP_INSPECT);
    assert_eq!(lines[1], "podman-compose ps");
    assert!(lines[2].starts_with("snapper -c app create --description Update container images "));
    assert_eq!(&lines[3..], ["podman-compose pull", "podman-compose down", "podman-compose up -d"]);

    let invocations = fx.runner.invocations();
    assert_eq!(invocations[1].cwd.as_deref(), Some(app.as_path()));
    Ok(())
}

#[test]
fn second_run_on_current_service_is_a_no_op() {
    let fx = Fixture::new();
    let app = fx.service("app", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    fx.updater(&[&app]).update_all(&[app.clone()]);
    let written = env_of(&app);

    let report = fx.updater(&[&app]).update_all(&[app.clone()]);
    assert_eq!(report.service("app").unwrap().outcome, ServiceOutcome::Unchanged);
    assert!(fx.runner.command_lines().is_empty(), "{:?}", fx.runner.command_lines());
    assert_eq!(env_of(&app), written);
}

#[test]
fn disabled_steps_and_restart_methods_shape_the_invocation_log() {
    let cases: [(Option<RestartMethod>, &[&str]); 4] = [
        (
            Some(RestartMethod::Compose),
            &["podman-compose down", "podman-compose up -d"],
        ),
        (
            Some(RestartMethod::SystemdSystem),
            &["systemctl restart podman-compose@app"],
        ),
        (
            Some(RestartMethod::SystemdUser),
            &["systemctl --user restart podman-compose@app"],
        ),
        (None, &[]),
    ];

    for (method, restart_lines) in cases {
        let mut fx = Fixture::new();
        fx.settings.service_snapshot = false;
        fx.settings.service_pull = false;
        match method {
            Some(method) => fx.settings.stop_start_method = method,
            None => fx.settings.service_stop_start = false,
        }
        let app = fx.service("app", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
        let report = fx.updater(&[&app]).update_all(&[app.clone()]);
        assert_eq!(report.status(), RunStatus::Success);

        let mut expected = vec![APP_INSPECT, "podman-compose ps"];
        expected.extend_from_slice(restart_lines);
        assert_eq!(fx.runner.command_lines(), expected);
        assert_eq!(fx.runner.count("snapper"), 0);
        assert_eq!(fx.runner.count("podman-compose pull"), 0);
    }
}

#[test]
fn systemd_unit_uses_joined_compose_tokens() {
    let mut fx = Fixture::new();
    fx.settings.compose_tool = "docker compose".to_owned();
    fx.settings.stop_start_method = RestartMethod::SystemdSystem;
    fx.settings.service_snapshot = false;
    let app = fx.service("immich", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(
        fx.runner.command_lines()[1..],
        [
            "docker compose ps",
            "docker compose pull",
            "systemctl restart docker-compose@immich"
        ]
    );
}

#[test]
fn placeholders_resolve_within_the_record_only() {
    let fx = Fixture::new();
    let app = fx.service(
        "app",
        "TAG=release\nSERVICE_APP_IMAGE_TAGGED=registry/app:${TAG}\nSERVICE_DB_IMAGE_TAGGED=registry/db:${HOME}",
    );
    fx.runner.respond(
        "skopeo inspect --no-tags docker://registry/db:${HOME}",
        ToolOutput::ok(r#"{"Name": "registry/db", "Digest": "sha256:0b"}"#),
    );
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);
    assert_eq!(report.status(), RunStatus::Success);

    let lines = fx.runner.command_lines();
    assert_eq!(lines[0], APP_INSPECT);
    assert_eq!(lines[1], "skopeo inspect --no-tags docker://registry/db:${HOME}");
    assert!(env_of(&app).contains("SERVICE_DB_IMAGE_HASHED=registry/db@sha256:0b"));
}

#[test]
fn failed_stop_skips_start() {
    let fx = Fixture::new();
    fx.runner.respond("podman-compose down", ToolOutput::failed(1, ""));
    let app = fx.service("app", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(report.status(), RunStatus::Failed(ErrorKind::ServiceRestartError));
    assert_eq!(fx.runner.count("podman-compose up"), 0);
    assert!(env_of(&app).contains(APP_DIGEST));
}

#[test]
fn unknown_restart_method_runs_no_restart_tool() {
    let mut fx = Fixture::new();
    fx.settings.stop_start_method = RestartMethod::Unknown("runit".to_owned());
    let app = fx.service("app", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(report.status().exit_code(), 34);
    assert_eq!(fx.runner.count("podman-compose down"), 0);
    assert_eq!(fx.runner.count("systemctl"), 0);
}

#[test]
fn failed_permission_probe_stops_before_snapshot() {
    let fx = Fixture::new();
    fx.runner.respond("podman-compose ps", ToolOutput::failed(125, "permission denied"));
    let original = "SERVICE_APP_IMAGE_TAGGED=registry/app:release";
    let app = fx.service("app", original);
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(report.status(), RunStatus::Failed(ErrorKind::ToolError));
    assert_eq!(fx.runner.count("snapper"), 0);
    assert_eq!(env_of(&app), original);
}

#[test]
fn failed_snapshot_leaves_environment_untouched() {
    let fx = Fixture::new();
    fx.runner.respond("snapper -c", ToolOutput::failed(1, ""));
    let original = "SERVICE_APP_IMAGE_TAGGED=registry/app:release";
    let app = fx.service("app", original);
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(report.status(), RunStatus::Failed(ErrorKind::SnapshotError));
    assert_eq!(env_of(&app), original);
    assert_eq!(fx.runner.count("podman-compose pull"), 0);
}

#[test]
fn failed_environment_write_skips_pull_and_restart() {
    let fx = Fixture::new();
    let original = "SERVICE_APP_IMAGE_TAGGED=registry/app:release";
    let app = fx.service("app", original);
    let env_path = app.join(".env");
    fx.runner.on_run("snapper -c", move |_| {
        fs::remove_file(&env_path).unwrap();
        fs::create_dir(&env_path).unwrap();
    });
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(
        report.service("app").unwrap().outcome,
        ServiceOutcome::Failed(ErrorKind::EnvError)
    );
    assert_eq!(fx.runner.count("snapper -c app create"), 1);
    assert_eq!(fx.runner.count("podman-compose pull"), 0);
    assert_eq!(fx.runner.count("podman-compose down"), 0);
    assert!(app.join(".env").is_dir());
}

#[test]
fn failed_pull_keeps_new_digest_on_disk() {
    let fx = Fixture::new();
    fx.runner.respond("podman-compose pull", ToolOutput::failed(1, ""));
    let app = fx.service("app", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(report.status(), RunStatus::Failed(ErrorKind::ImagePullError));
    assert!(env_of(&app).contains(&format!("SERVICE_APP_IMAGE_HASHED={APP_DIGEST}")));
    assert_eq!(fx.runner.count("podman-compose down"), 0);
}

#[test]
fn resolution_failure_changes_nothing() {
    let fx = Fixture::new();
    fx.runner.respond("skopeo", ToolOutput::failed(1, "unauthorized"));
    let original = "SERVICE_APP_IMAGE_TAGGED=registry/app:release";
    let app = fx.service("app", original);
    let report = fx.updater(&[&app]).update_all(&[app.clone()]);

    assert_eq!(report.status(), RunStatus::Failed(ErrorKind::ResolutionError));
    assert_eq!(fx.runner.command_lines(), vec![APP_INSPECT]);
    assert_eq!(env_of(&app), original);
}

#[test]
fn environment_problems_are_classified() {
    let fx = Fixture::new();
    let broken = fx.service("broken", "this line has no separator");
    let gone = fx.service("gone", "A=1");
    fs::remove_file(gone.join(".env")).unwrap();
    let mut updater = fx.updater(&[]);

    assert_eq!(
        updater.update_service(&broken).outcome,
        ServiceOutcome::Failed(ErrorKind::EnvError)
    );
    assert_eq!(
        updater.update_service(&gone).outcome,
        ServiceOutcome::Failed(ErrorKind::FileNotFound)
    );
}

#[test]
fn one_failing_service_does_not_stop_the_others() {
    let fx = Fixture::new();
    fx.runner.respond("skopeo inspect --no-tags docker://registry/bad:1", ToolOutput::failed(1, ""));
    let a = fx.service("a", "SERVICE_APP_IMAGE_TAGGED=registry/bad:1");
    let b = fx.service("b", "no separator");
    let c = fx.service("c", "SERVICE_APP_IMAGE_TAGGED=registry/app:release");
    let report = fx.updater(&[&a, &b, &c]).update_all(&[a.clone(), b.clone(), c.clone()]);

    assert_eq!(report.services.len(), 3);
    assert_eq!(report.service("c").unwrap().outcome, ServiceOutcome::Updated);
    assert_eq!(report.status(), RunStatus::MultipleErrors);
    assert_eq!(report.status().exit_code(), 255);
    assert!(env_of(&c).contains(APP_DIGEST));
}
