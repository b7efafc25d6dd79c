//! Deploy worker loop tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deploy_server::coord::etcd::EtcdConnector;
use deploy_server::deploy::executor::{
    CommandRunner, ExecError, StepOutput, DEPLOY_CONTAINERS, DOWNLOAD_IMAGE,
};
use deploy_server::deploy::pipeline::{DeployPipeline, PipelineOptions, RunOutcome};
use deploy_server::models::deployment::{DeployRequest, DeployStatusCode};
use deploy_server::queue::memory::MemoryQueue;
use deploy_server::queue::JobQueue;
use deploy_server::store::memory::MemoryStore;
use deploy_server::store::StatusStore;
use deploy_server::tracker::memory::MemoryTracker;
use deploy_server::workers::deployer::{self, process_next};
use tempfile::TempDir;
use tokio::sync::{oneshot, Notify};

/// Holds the container launch until released
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

/// Records which image each run downloaded; always succeeds
#[derive(Default)]
struct OrderRunner {
    images: Mutex<Vec<String>>,
    gate: Option<Arc<Gate>>,
}

#[async_trait]
impl CommandRunner for OrderRunner {
    async fn run_step(&self, name: &str, args: &[String]) -> Result<StepOutput, ExecError> {
        if name == DOWNLOAD_IMAGE {
            self.images.lock().unwrap().push(args[2].clone());
            let ws = std::path::Path::new(&args[3]);
            std::fs::write(ws.join("docker-compose.yml"), "version: '2'\n").unwrap();
        }
        if name == DEPLOY_CONTAINERS {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
        Ok(StepOutput::default())
    }
}

struct Fixture {
    _tmp: TempDir,
    store: MemoryStore,
    queue: MemoryQueue,
    runner: Arc<OrderRunner>,
    pipeline: Arc<DeployPipeline>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_runner(OrderRunner::default())
    }

    fn with_runner(runner: OrderRunner) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let runner = Arc::new(runner);
        let pipeline = Arc::new(DeployPipeline::new(
            PipelineOptions {
                temp_path: tmp.path().to_path_buf(),
                git_repo: "provision".to_string(),
                ..Default::default()
            },
            Arc::new(store.clone()),
            Arc::new(MemoryTracker::new()),
            runner.clone(),
            Arc::new(EtcdConnector),
        ));

        Self {
            _tmp: tmp,
            store,
            queue: MemoryQueue::new(),
            runner,
            pipeline,
        }
    }

    async fn accept(&self, id: &str, image: &str) {
        let request = DeployRequest {
            deploy_id: id.to_string(),
            image_name: image.to_string(),
            image_tag: "v1".to_string(),
            environment: "qa".to_string(),
            num_cont: 2,
            ..Default::default()
        };
        self.store
            .queue_deploy(id, "qa", image, "v1")
            .await
            .unwrap();
        self.queue
            .enqueue(&request.to_payload().unwrap())
            .await
            .unwrap();
    }

    async fn status(&self, id: &str) -> DeployStatusCode {
        self.store.query_deploy(id).await.unwrap().unwrap().status
    }
}

fn spawn_worker(
    fixture: &Fixture,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let queue = fixture.queue.clone();
    let pipeline = fixture.pipeline.clone();
    let options = deployer::Options {
        interval: Duration::from_millis(10),
    };

    let handle = tokio::spawn(async move {
        deployer::run(
            &options,
            &queue,
            pipeline.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = rx.await;
            }),
        )
        .await;
    });
    (tx, handle)
}

async fn wait_for_terminal(fixture: &Fixture, ids: &[&str]) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut done = true;
            for id in ids {
                done &= fixture.status(id).await.is_terminal();
            }
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deploys did not finish in time");
}

#[tokio::test]
async fn test_worker_runs_requests_in_fifo_order() {
    let fixture = Fixture::new();
    fixture.accept("d1", "alpha").await;
    fixture.accept("d2", "beta").await;
    fixture.accept("d3", "gamma").await;

    let (tx, handle) = spawn_worker(&fixture);
    wait_for_terminal(&fixture, &["d1", "d2", "d3"]).await;

    assert_eq!(
        fixture.runner.images.lock().unwrap().clone(),
        vec!["alpha", "beta", "gamma"]
    );
    for id in ["d1", "d2", "d3"] {
        assert_eq!(fixture.status(id).await, DeployStatusCode::Success);
    }
    assert!(fixture.queue.is_empty().await);

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_worker_stops_on_shutdown_signal() {
    let fixture = Fixture::new();
    let (tx, handle) = spawn_worker(&fixture);

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    // Items queued after shutdown stay queued
    fixture.accept("late", "alpha").await;
    assert_eq!(fixture.queue.len().await, 1);
    assert_eq!(fixture.status("late").await, DeployStatusCode::Queued);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_deploy() {
    let gate = Arc::new(Gate::default());
    let fixture = Fixture::with_runner(OrderRunner {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    fixture.accept("d1", "alpha").await;
    fixture.accept("d2", "beta").await;

    let (tx, handle) = spawn_worker(&fixture);
    tokio::time::timeout(Duration::from_secs(5), gate.entered.notified())
        .await
        .expect("launch step never started");

    // Signal while the launch step is blocked
    tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    assert_eq!(fixture.status("d1").await, DeployStatusCode::Started);

    gate.release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fixture.status("d1").await, DeployStatusCode::Success);
    // The next item is not picked up once shutdown was requested
    assert_eq!(fixture.status("d2").await, DeployStatusCode::Queued);
    assert_eq!(fixture.queue.len().await, 1);
}

#[tokio::test]
async fn test_worker_sleeps_interval_between_every_poll() {
    let fixture = Fixture::new();
    fixture.accept("d1", "alpha").await;
    fixture.accept("d2", "beta").await;

    let waits = Arc::new(Mutex::new(Vec::new()));
    let recorded = waits.clone();
    let (tx, rx) = oneshot::channel::<()>();
    let queue = fixture.queue.clone();
    let pipeline = fixture.pipeline.clone();
    let handle = tokio::spawn(async move {
        let options = deployer::Options {
            interval: Duration::from_millis(7),
        };
        deployer::run(
            &options,
            &queue,
            pipeline.as_ref(),
            move |wait| {
                recorded.lock().unwrap().push(wait);
                tokio::time::sleep(Duration::from_millis(1))
            },
            Box::pin(async move {
                let _ = rx.await;
            }),
        )
        .await;
    });

    wait_for_terminal(&fixture, &["d1", "d2"]).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    let waits = waits.lock().unwrap().clone();
    assert!(waits.len() >= 2);
    assert_eq!(waits[0], Duration::ZERO);
    assert!(waits[1..].iter().all(|w| *w == Duration::from_millis(7)));
}

#[tokio::test]
async fn test_worker_survives_queue_outage() {
    let fixture = Fixture::new();
    fixture.accept("d1", "alpha").await;
    fixture.queue.set_offline(true);

    let (tx, handle) = spawn_worker(&fixture);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.status("d1").await, DeployStatusCode::Queued);

    fixture.queue.set_offline(false);
    wait_for_terminal(&fixture, &["d1"]).await;
    assert_eq!(fixture.status("d1").await, DeployStatusCode::Success);

    tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_is_discarded() {
    let fixture = Fixture::new();
    fixture.queue.enqueue("{not json").await.unwrap();
    fixture.accept("d1", "alpha").await;

    let queue: &dyn JobQueue = &fixture.queue;
    assert_eq!(
        process_next(queue, &fixture.pipeline).await,
        Some(RunOutcome::Aborted)
    );
    assert_eq!(
        process_next(queue, &fixture.pipeline).await,
        Some(RunOutcome::Success)
    );
    assert_eq!(process_next(queue, &fixture.pipeline).await, None);
}
