//! Ordered deploy workflow for a single request

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::settings::Settings;
use crate::coord::CoordConnector;
use crate::deploy::executor::{
    CommandRunner, StepOutput, DEPLOY_CONTAINERS, DEPLOY_METADATA, DOWNLOAD_IMAGE,
    DOWNLOAD_METADATA,
};
use crate::deploy::fsm::{DeployEvent, DeployFsm};
use crate::deploy::metadata::MetadataLayout;
use crate::deploy::publisher::KeyPublisher;
use crate::deploy::workspace::Workspace;
use crate::deploy::StepFailure;
use crate::models::deployment::DeployRequest;
use crate::store::StatusStore;
use crate::tracker::LastDeployTracker;

pub const MSG_STARTED: &str = "Started Deploy.";
pub const MSG_TRACKER_READ: &str = "Unable to access redis server for last deploy validation.";
pub const MSG_WORKSPACE: &str = "Creating working temp directory for this deploy.";
pub const MSG_WORKSPACE_FAILED: &str = "Unable to create temporary work directory on server.";
pub const MSG_DOWNLOAD_IMAGE: &str = "Extracting meta-data from Docker image in registry.";
pub const MSG_NO_COMPOSE: &str = "docker-compose.yml file doesn't exist for this launch.";
pub const MSG_DOWNLOAD_METADATA: &str = "Downloading meta-data from git.";
pub const MSG_CONTAINERS: &str = "Extracting number of containers to launch.";
pub const MSG_DEPLOY_METADATA: &str = "Deploying meta-data.";
pub const MSG_DEPLOY_KEYS: &str = "Deploying etcd2 keys.";
pub const MSG_LAUNCH: &str = "Starting up containers.";
pub const MSG_TRACKER_WRITE: &str = "Unable to access redis server to set last deploy image tag.";
pub const MSG_SUCCESS: &str = "Containers deployed successfully.";

/// Manifest the image download must leave in the workspace
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,

    /// The status row could not be read or was already terminal; no step ran
    Aborted,
}

/// Server-wide inputs to every run
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub temp_path: PathBuf,
    pub git_root: String,
    pub git_repo: String,
    pub project: String,
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            temp_path: settings.temp_path.clone(),
            git_root: settings.git.root.clone(),
            git_repo: settings.git.repo.clone(),
            project: settings.project.clone(),
        }
    }
}

/// Accumulates the run log and mirrors every transition into the status store
struct StatusRecorder {
    store: Arc<dyn StatusStore>,
    deploy_id: String,
    fsm: DeployFsm,
    log: String,
}

impl StatusRecorder {
    async fn step(&mut self, message: &str) {
        self.log.push_str(message);
        self.log.push('\n');
        self.transition(DeployEvent::Step(message.to_string()), message)
            .await;
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.log.push_str(text);
        if !text.ends_with('\n') {
            self.log.push('\n');
        }
    }

    fn append_output(&mut self, output: &StepOutput) {
        self.append(&output.stdout);
        if !output.stderr.is_empty() {
            self.append(&format!("WARN: {}", output.stderr));
        }
    }

    async fn fail(&mut self, failure: &StepFailure) {
        self.log.push_str(&format!("ERR: {}\n", failure.message));
        self.append(&failure.detail);
        self.transition(DeployEvent::Fail(failure.detail.clone()), &failure.message)
            .await;
    }

    async fn succeed(&mut self, message: &str) {
        self.log.push_str(&format!("SUCCESS: {}\n", message));
        self.transition(DeployEvent::Succeed, message).await;
    }

    async fn transition(&mut self, event: DeployEvent, message: &str) {
        let status = match self.fsm.process(event) {
            Ok(status) => status,
            Err(e) => {
                error!("Skipping status write: {}", e);
                return;
            }
        };

        match self
            .store
            .update_deploy(&self.deploy_id, status, message, &self.log)
            .await
        {
            Ok(true) => debug!("Status {} - {}", status, message),
            Ok(false) => warn!("Status row vanished while writing {}", status),
            Err(e) => warn!("Failed to write status {}: {}", status, e),
        }
    }
}

/// Drives one request through every deploy step
#[derive(Clone)]
pub struct DeployPipeline {
    options: PipelineOptions,
    store: Arc<dyn StatusStore>,
    tracker: Arc<dyn LastDeployTracker>,
    runner: Arc<dyn CommandRunner>,
    publisher: KeyPublisher,
}

impl DeployPipeline {
    pub fn new(
        options: PipelineOptions,
        store: Arc<dyn StatusStore>,
        tracker: Arc<dyn LastDeployTracker>,
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn CoordConnector>,
    ) -> Self {
        Self {
            options,
            store,
            tracker,
            runner,
            publisher: KeyPublisher::new(connector),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run every step for a request and record the result
    pub async fn run(&self, request: &DeployRequest) -> RunOutcome {
        let span = info_span!(
            "deploy",
            deploy_id = %request.deploy_id,
            env = %request.environment,
            image = %request.image_name,
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &DeployRequest) -> RunOutcome {
        let row = match self.store.query_deploy(&request.deploy_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                error!("No status row for deploy, dropping request");
                return RunOutcome::Aborted;
            }
            Err(e) => {
                error!("Unable to read status row: {}", e);
                return RunOutcome::Aborted;
            }
        };

        let fsm = DeployFsm::resume(row.status);
        if fsm.is_terminal() {
            error!("Deploy already finished with {}, dropping request", row.status);
            return RunOutcome::Aborted;
        }

        let mut recorder = StatusRecorder {
            store: self.store.clone(),
            deploy_id: request.deploy_id.clone(),
            fsm,
            log: row.log,
        };

        info!("Deploying {}:{}", request.image_name, request.image_tag);
        recorder.step(MSG_STARTED).await;

        match self.execute(request, &mut recorder).await {
            Ok(()) => {
                recorder.succeed(MSG_SUCCESS).await;
                info!("Deploy succeeded");
                RunOutcome::Success
            }
            Err(failure) => {
                error!("Deploy failed: {}", failure);
                recorder.fail(&failure).await;
                RunOutcome::Failed
            }
        }
    }

    async fn execute(
        &self,
        request: &DeployRequest,
        recorder: &mut StatusRecorder,
    ) -> Result<(), StepFailure> {
        let previous_tag = self
            .tracker
            .get(&request.environment, &request.image_name)
            .await
            .map_err(|e| StepFailure::new(MSG_TRACKER_READ, e))?
            .unwrap_or_else(|| request.image_tag.clone());

        recorder.step(MSG_WORKSPACE).await;
        let workspace = Workspace::create(
            &self.options.temp_path,
            &request.environment,
            &request.image_name,
        )
        .await
        .map_err(|e| StepFailure::new(MSG_WORKSPACE_FAILED, e))?;

        let result = self
            .execute_in_workspace(request, &previous_tag, &workspace, recorder)
            .await;
        if let Err(e) = workspace.release().await {
            warn!("Unable to remove workspace: {}", e);
        }
        result?;

        self.tracker
            .set(&request.environment, &request.image_name, &request.image_tag)
            .await
            .map_err(|e| StepFailure::new(MSG_TRACKER_WRITE, e))
    }

    async fn execute_in_workspace(
        &self,
        request: &DeployRequest,
        previous_tag: &str,
        workspace: &Workspace,
        recorder: &mut StatusRecorder,
    ) -> Result<(), StepFailure> {
        let ws = workspace.arg();
        let options = &self.options;

        recorder.step(MSG_DOWNLOAD_IMAGE).await;
        self.run_step(
            recorder,
            MSG_DOWNLOAD_IMAGE,
            DOWNLOAD_IMAGE,
            vec![
                request.image_tag.clone(),
                request.registry.clone(),
                request.image_name.clone(),
                ws.clone(),
            ],
        )
        .await?;

        let compose = workspace.file(COMPOSE_FILE);
        if !compose.exists().await {
            return Err(StepFailure::new(
                MSG_NO_COMPOSE,
                format!("{} not found", compose.path().display()),
            ));
        }

        recorder.step(MSG_DOWNLOAD_METADATA).await;
        self.run_step(
            recorder,
            MSG_DOWNLOAD_METADATA,
            DOWNLOAD_METADATA,
            vec![options.git_repo.clone(), options.git_root.clone(), ws.clone()],
        )
        .await?;

        recorder.step(MSG_CONTAINERS).await;
        let layout = MetadataLayout::new(workspace.path(), &options.git_repo, &request.image_name);
        let containers = layout
            .container_count(&request.environment, request.num_cont)
            .await;
        debug!("Launching {} containers", containers);

        recorder.step(MSG_DEPLOY_METADATA).await;
        self.run_step(
            recorder,
            MSG_DEPLOY_METADATA,
            DEPLOY_METADATA,
            vec![
                request.env_tag.clone(),
                options.git_repo.clone(),
                request.meta_mount.clone(),
                ws.clone(),
            ],
        )
        .await?;

        if !request.etcd_endpoint.is_empty() {
            recorder.step(MSG_DEPLOY_KEYS).await;
            self.publisher
                .publish(&request.etcd_endpoint, &layout, &request.environment)
                .await?;
        }

        recorder.step(MSG_LAUNCH).await;
        let args = vec![
            request.image_name.clone(),
            request.image_tag.clone(),
            previous_tag.to_string(),
            request.registry.clone(),
            request.service_name(),
            request.machine.clone(),
            containers.to_string(),
            options.project.clone(),
            request.swarm.to_string(),
            ws,
        ];
        match self.runner.run_step(DEPLOY_CONTAINERS, &args).await {
            Ok(output) => recorder.append_output(&output),
            Err(e) if e.is_desired_count_achieved() => {
                info!("Service already at desired scale");
                recorder.append(e.output_text());
            }
            Err(e) => return Err(StepFailure::new(MSG_LAUNCH, e)),
        }

        Ok(())
    }

    async fn run_step(
        &self,
        recorder: &mut StatusRecorder,
        message: &str,
        name: &str,
        args: Vec<String>,
    ) -> Result<(), StepFailure> {
        let output = self
            .runner
            .run_step(name, &args)
            .await
            .map_err(|e| StepFailure::new(message, e))?;
        recorder.append_output(&output);
        Ok(())
    }
}
