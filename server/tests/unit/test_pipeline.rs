//! Deploy pipeline tests against in-memory adapters and a canned command runner

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deploy_server::coord::{CoordConnector, KeyValueClient};
use deploy_server::deploy::executor::{
    CommandRunner, ExecError, StepOutput, DEPLOY_CONTAINERS, DEPLOY_METADATA, DESIRED_COUNT_ACHIEVED,
    DOWNLOAD_IMAGE, DOWNLOAD_METADATA,
};
use deploy_server::deploy::pipeline::{
    DeployPipeline, PipelineOptions, RunOutcome, MSG_DEPLOY_KEYS, MSG_LAUNCH, MSG_NO_COMPOSE,
    MSG_STARTED, MSG_SUCCESS, MSG_TRACKER_READ,
};
use deploy_server::deploy::publisher::UPDATE_FAILED;
use deploy_server::errors::ServerError;
use deploy_server::models::deployment::{DeployRequest, DeployStatusCode};
use deploy_server::store::memory::MemoryStore;
use deploy_server::store::StatusStore;
use deploy_server::tracker::memory::MemoryTracker;
use deploy_server::tracker::LastDeployTracker;
use tempfile::TempDir;

const GIT_REPO: &str = "provision";

// ================================ FAKES ===================================== //

#[derive(Default)]
struct FakeRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    skip_compose: bool,
    metadata: Vec<(String, String)>,
    stderr: HashMap<String, String>,
}

impl FakeRunner {
    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    fn step_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    fn launch_args(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .find(|(name, _)| name == DEPLOY_CONTAINERS)
            .map(|(_, args)| args)
            .expect("launch step was not run")
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run_step(&self, name: &str, args: &[String]) -> Result<StepOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.to_vec()));

        // The workspace is always the last argument
        let ws = PathBuf::from(args.last().unwrap());
        match name {
            DOWNLOAD_IMAGE if !self.skip_compose => {
                std::fs::write(ws.join("docker-compose.yml"), "version: '2'\n").unwrap();
            }
            DOWNLOAD_METADATA => {
                for (path, body) in &self.metadata {
                    let path = ws.join(path);
                    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                    std::fs::write(path, body).unwrap();
                }
            }
            _ => {}
        }

        if let Some(stderr) = self.stderr.get(name) {
            return Err(ExecError::Stderr {
                stderr: stderr.clone(),
            });
        }
        Ok(StepOutput {
            stdout: format!("{} done\n", name),
            stderr: String::new(),
        })
    }
}

#[derive(Default)]
struct RecordingConnector {
    keys: Arc<Mutex<Vec<(String, String)>>>,
    connects: Mutex<Vec<String>>,
    fail_key: Option<String>,
}

struct RecordingClient {
    keys: Arc<Mutex<Vec<(String, String)>>>,
    fail_key: Option<String>,
}

#[async_trait]
impl KeyValueClient for RecordingClient {
    async fn set(&self, key: &str, value: &str) -> Result<(), ServerError> {
        if self.fail_key.as_deref() == Some(key) {
            return Err(ServerError::CoordError("key rejected".to_string()));
        }
        self.keys
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

impl CoordConnector for RecordingConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn KeyValueClient>, ServerError> {
        self.connects.lock().unwrap().push(endpoint.to_string());
        Ok(Box::new(RecordingClient {
            keys: self.keys.clone(),
            fail_key: self.fail_key.clone(),
        }))
    }
}

// =============================== HARNESS ==================================== //

struct Harness {
    tmp: TempDir,
    store: MemoryStore,
    tracker: MemoryTracker,
    runner: Arc<FakeRunner>,
    connector: Arc<RecordingConnector>,
    pipeline: DeployPipeline,
}

impl Harness {
    fn new(runner: FakeRunner) -> Self {
        Self::with_connector(runner, RecordingConnector::default())
    }

    fn with_connector(runner: FakeRunner, connector: RecordingConnector) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let tracker = MemoryTracker::new();
        let runner = Arc::new(runner);
        let connector = Arc::new(connector);

        let options = PipelineOptions {
            temp_path: tmp.path().join("work"),
            git_root: "git@example.com:ops".to_string(),
            git_repo: GIT_REPO.to_string(),
            project: "docker".to_string(),
        };
        let pipeline = DeployPipeline::new(
            options,
            Arc::new(store.clone()),
            Arc::new(tracker.clone()),
            runner.clone(),
            connector.clone(),
        );

        Self {
            tmp,
            store,
            tracker,
            runner,
            connector,
            pipeline,
        }
    }

    async fn submit(&self, request: &DeployRequest) -> RunOutcome {
        self.store
            .queue_deploy(
                &request.deploy_id,
                &request.environment,
                &request.image_name,
                &request.image_tag,
            )
            .await
            .unwrap();
        self.pipeline.run(request).await
    }

    fn env_dir(&self, environment: &str) -> PathBuf {
        self.tmp.path().join("work").join(environment)
    }
}

fn request(id: &str, environment: &str, image: &str, tag: &str) -> DeployRequest {
    DeployRequest {
        deploy_id: id.to_string(),
        image_name: image.to_string(),
        image_tag: tag.to_string(),
        environment: environment.to_string(),
        env_tag: format!("{}-tag", environment),
        machine: format!("{}-master", environment),
        meta_mount: "/opt/meta".to_string(),
        num_cont: 2,
        registry: "registry.local:5000".to_string(),
        ..Default::default()
    }
}

fn is_empty_dir(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

// ================================ TESTS ===================================== //

#[tokio::test]
async fn test_first_deploy_uses_current_tag_as_previous() {
    let h = Harness::new(FakeRunner::default());

    let outcome = h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Success);

    let args = h.runner.launch_args();
    assert_eq!(args[0], "foo");
    assert_eq!(args[1], "v2");
    assert_eq!(args[2], "v2");
    assert_eq!(h.tracker.get("qa", "foo").await.unwrap().as_deref(), Some("v2"));

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert_eq!(row.status, DeployStatusCode::Success);
    assert_eq!(row.message, MSG_SUCCESS);
    assert!(row.log.starts_with("Queued deploy.\nStarted Deploy.\n"));
    assert!(row.log.ends_with("SUCCESS: Containers deployed successfully.\n"));
}

#[tokio::test]
async fn test_prior_tag_is_passed_to_launch() {
    let h = Harness::new(FakeRunner::default());
    h.tracker.set("qa", "foo", "v1").await.unwrap();

    let outcome = h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Success);

    let args = h.runner.launch_args();
    assert_eq!(args[1], "v2");
    assert_eq!(args[2], "v1");
    assert_eq!(h.tracker.get("qa", "foo").await.unwrap().as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_step_order_and_arguments() {
    let mut r = request("d1", "prod", "web-app", "1.4");
    r.swarm = true;
    let h = Harness::new(FakeRunner::default());
    assert_eq!(h.submit(&r).await, RunOutcome::Success);

    assert_eq!(
        h.runner.step_names(),
        vec![DOWNLOAD_IMAGE, DOWNLOAD_METADATA, DEPLOY_METADATA, DEPLOY_CONTAINERS]
    );

    let calls = h.runner.calls();
    let ws = calls[0].1[3].clone();
    assert_eq!(calls[0].1, vec!["1.4", "registry.local:5000", "web-app", ws.as_str()]);
    assert_eq!(
        calls[1].1,
        vec!["provision", "git@example.com:ops", ws.as_str()]
    );
    assert_eq!(
        calls[2].1,
        vec!["prod-tag", "provision", "/opt/meta", ws.as_str()]
    );
    assert_eq!(
        calls[3].1,
        vec![
            "web-app",
            "1.4",
            "1.4",
            "registry.local:5000",
            "web_app",
            "prod-master",
            "2",
            "docker",
            "true",
            ws.as_str(),
        ]
    );

    // Every step shares the same workspace, named after env and image
    assert!(calls.iter().all(|(_, args)| args.last() == Some(&ws)));
    assert!(Path::new(&ws).starts_with(h.env_dir("prod")));
    assert!(Path::new(&ws)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("web-app-"));
}

#[tokio::test]
async fn test_missing_compose_file_fails_run() {
    let h = Harness::new(FakeRunner {
        skip_compose: true,
        ..Default::default()
    });

    let outcome = h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Failed);

    // No later step executes
    assert_eq!(h.runner.step_names(), vec![DOWNLOAD_IMAGE]);

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert_eq!(row.status, DeployStatusCode::Failed);
    assert_eq!(row.message, MSG_NO_COMPOSE);
    assert!(row.log.contains(&format!("ERR: {}\n", MSG_NO_COMPOSE)));
    assert_eq!(h.tracker.get("qa", "foo").await.unwrap(), None);
}

#[tokio::test]
async fn test_desired_count_achieved_is_success() {
    let mut stderr = HashMap::new();
    stderr.insert(
        DEPLOY_CONTAINERS.to_string(),
        format!("{}\n", DESIRED_COUNT_ACHIEVED),
    );
    let h = Harness::new(FakeRunner {
        stderr,
        ..Default::default()
    });

    let outcome = h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(h.tracker.get("qa", "foo").await.unwrap().as_deref(), Some("v2"));

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert_eq!(row.status, DeployStatusCode::Success);
    assert!(row.log.contains(DESIRED_COUNT_ACHIEVED));
}

#[tokio::test]
async fn test_launch_stderr_fails_run() {
    let mut stderr = HashMap::new();
    stderr.insert(DEPLOY_CONTAINERS.to_string(), "no such service\n".to_string());
    let h = Harness::new(FakeRunner {
        stderr,
        ..Default::default()
    });
    h.tracker.set("qa", "foo", "v1").await.unwrap();

    let outcome = h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Failed);

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert_eq!(row.message, MSG_LAUNCH);
    assert!(row.log.ends_with("ERR: Starting up containers.\nno such service\n"));

    // Never written on failure
    assert_eq!(h.tracker.get("qa", "foo").await.unwrap().as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_earlier_step_stderr_stops_pipeline() {
    let mut stderr = HashMap::new();
    stderr.insert(DOWNLOAD_METADATA.to_string(), "git: auth failed".to_string());
    let h = Harness::new(FakeRunner {
        stderr,
        ..Default::default()
    });

    assert_eq!(
        h.submit(&request("d1", "qa", "foo", "v2")).await,
        RunOutcome::Failed
    );
    assert_eq!(h.runner.step_names(), vec![DOWNLOAD_IMAGE, DOWNLOAD_METADATA]);
}

#[tokio::test]
async fn test_workspace_removed_after_every_run() {
    let h = Harness::new(FakeRunner::default());
    assert_eq!(
        h.submit(&request("ok", "qa", "foo", "v1")).await,
        RunOutcome::Success
    );

    let failing = Harness::new(FakeRunner {
        skip_compose: true,
        ..Default::default()
    });
    assert_eq!(
        failing.submit(&request("bad", "qa", "foo", "v1")).await,
        RunOutcome::Failed
    );

    for harness in [&h, &failing] {
        let ws = harness.runner.calls()[0].1[3].clone();
        assert!(!Path::new(&ws).exists());
        assert!(is_empty_dir(&harness.env_dir("qa")));
    }
}

#[tokio::test]
async fn test_log_is_append_only() {
    let h = Harness::new(FakeRunner::default());
    h.submit(&request("d1", "qa", "foo", "v2")).await;

    let history = h.store.history("d1").await;
    assert!(history.len() > 3);
    assert_eq!(history[0].status, DeployStatusCode::Queued);
    assert_eq!(history[1].status, DeployStatusCode::Started);
    assert_eq!(history[1].message, MSG_STARTED);

    for pair in history.windows(2) {
        assert!(pair[1].log.starts_with(&pair[0].log));
        assert!(pair[1].log.len() > pair[0].log.len());
    }

    let terminal: Vec<_> = history.iter().filter(|row| row.status.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(history.last().unwrap().status, DeployStatusCode::Success);
}

#[tokio::test]
async fn test_missing_row_aborts_before_any_step() {
    let h = Harness::new(FakeRunner::default());

    let outcome = h.pipeline.run(&request("ghost", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Aborted);
    assert!(h.runner.calls().is_empty());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_finished_row_is_not_rerun() {
    let h = Harness::new(FakeRunner::default());
    let r = request("d1", "qa", "foo", "v2");
    assert_eq!(h.submit(&r).await, RunOutcome::Success);

    assert_eq!(h.pipeline.run(&r).await, RunOutcome::Aborted);
    assert_eq!(h.runner.step_names().len(), 4);
}

#[tokio::test]
async fn test_tracker_unreachable_fails_run() {
    let h = Harness::new(FakeRunner::default());
    h.tracker.set_offline(true);

    let outcome = h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(outcome, RunOutcome::Failed);
    assert!(h.runner.calls().is_empty());

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert_eq!(row.message, MSG_TRACKER_READ);
}

#[tokio::test]
async fn test_container_count_from_metadata() {
    let h = Harness::new(FakeRunner {
        metadata: vec![
            (
                format!("{}/roles/common/meta/main.yml", GIT_REPO),
                "environments:\n  qa:\n    containers: 3\n".to_string(),
            ),
            (
                format!("{}/roles/foo/meta/main.yml", GIT_REPO),
                "environments:\n  qa:\n    containers: 5\n".to_string(),
            ),
        ],
        ..Default::default()
    });
    h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(h.runner.launch_args()[6], "5");

    // Falls back to common, then to the request
    let h = Harness::new(FakeRunner {
        metadata: vec![(
            format!("{}/roles/common/meta/main.yml", GIT_REPO),
            "environments:\n  qa:\n    containers: 3\n".to_string(),
        )],
        ..Default::default()
    });
    h.submit(&request("d1", "qa", "foo", "v2")).await;
    assert_eq!(h.runner.launch_args()[6], "3");

    let h = Harness::new(FakeRunner::default());
    let mut r = request("d1", "qa", "foo", "v2");
    r.num_cont = 7;
    h.submit(&r).await;
    assert_eq!(h.runner.launch_args()[6], "7");
}

fn key_metadata() -> Vec<(String, String)> {
    vec![
        (
            format!("{}/roles/common/meta/qa.etcd2.yml", GIT_REPO),
            "- key: /app/db\n  value: shared\n- key: /app/region\n  value: eu\n".to_string(),
        ),
        (
            format!("{}/roles/foo/meta/qa.etcd2.yml", GIT_REPO),
            "- key: /app/db\n  value: dedicated\n".to_string(),
        ),
    ]
}

#[tokio::test]
async fn test_image_keys_override_common_keys() {
    let h = Harness::new(FakeRunner {
        metadata: key_metadata(),
        ..Default::default()
    });
    let mut r = request("d1", "qa", "foo", "v2");
    r.etcd_endpoint = "etcd.qa:2379".to_string();

    assert_eq!(h.submit(&r).await, RunOutcome::Success);
    assert_eq!(
        h.connector.connects.lock().unwrap().clone(),
        vec!["etcd.qa:2379"]
    );

    let keys: HashMap<String, String> = h.connector.keys.lock().unwrap().iter().cloned().collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys["/app/db"], "dedicated");
    assert_eq!(keys["/app/region"], "eu");

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert!(row.log.contains(MSG_DEPLOY_KEYS));
}

#[tokio::test]
async fn test_key_publish_failure_aborts_run() {
    let connector = RecordingConnector {
        fail_key: Some("/app/region".to_string()),
        ..Default::default()
    };
    let h = Harness::with_connector(
        FakeRunner {
            metadata: key_metadata(),
            ..Default::default()
        },
        connector,
    );
    let mut r = request("d1", "qa", "foo", "v2");
    r.etcd_endpoint = "etcd.qa:2379".to_string();

    assert_eq!(h.submit(&r).await, RunOutcome::Failed);
    assert!(!h.runner.step_names().contains(&DEPLOY_CONTAINERS.to_string()));

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert_eq!(row.message, UPDATE_FAILED);
}

#[tokio::test]
async fn test_no_endpoint_skips_key_publish() {
    let h = Harness::new(FakeRunner {
        metadata: key_metadata(),
        ..Default::default()
    });

    assert_eq!(
        h.submit(&request("d1", "qa", "foo", "v2")).await,
        RunOutcome::Success
    );
    assert!(h.connector.connects.lock().unwrap().is_empty());

    let row = h.store.query_deploy("d1").await.unwrap().unwrap();
    assert!(!row.log.contains(MSG_DEPLOY_KEYS));
}

#[tokio::test]
async fn test_empty_key_set_does_not_connect() {
    let h = Harness::new(FakeRunner::default());
    let mut r = request("d1", "qa", "foo", "v2");
    r.etcd_endpoint = "etcd.qa:2379".to_string();

    assert_eq!(h.submit(&r).await, RunOutcome::Success);
    assert!(h.connector.connects.lock().unwrap().is_empty());
}
