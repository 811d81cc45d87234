//! Orchestrator Registry — process-wide map of project id to Pipeline.
//! Double-checked locking mirrors the teacher's session-registry idiom:
//! a cheap read-lock check first, then a write-lock re-check before
//! inserting, so concurrent callers never construct two pipelines for the
//! same project.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::approval::ApprovalOracle;
use crate::broadcast::Broadcast;
use crate::config::Settings;
use crate::llm::LlmBackend;
use crate::models::{Project, ProjectStatus};
use crate::pipeline::{Pipeline, PipelineParams};
use crate::store::Store;

/// A pipeline plus the stop signal that reaches it without locking it.
struct PipelineHandle {
    pipeline: Arc<Mutex<Pipeline>>,
    stop_flag: Arc<AtomicBool>,
}

pub struct Registry {
    store: Arc<Store>,
    broadcast: Broadcast,
    llm: Arc<dyn LlmBackend>,
    syntax_checker: String,
    approval: ApprovalOracle,
    pipelines: RwLock<HashMap<String, PipelineHandle>>,
}

impl Registry {
    pub fn new(
        store: Arc<Store>,
        broadcast: Broadcast,
        llm: Arc<dyn LlmBackend>,
        syntax_checker: String,
        approval: ApprovalOracle,
    ) -> Self {
        Self {
            store,
            broadcast,
            llm,
            syntax_checker,
            approval,
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Return the existing Pipeline for `project_id`, constructing one
    /// from `project`/`settings` if none yet exists.
    pub async fn get_or_create(&self, project: &Project, settings: &Settings) -> Arc<Mutex<Pipeline>> {
        if let Some(existing) = self.pipelines.read().await.get(&project.id) {
            return existing.pipeline.clone();
        }

        let mut pipelines = self.pipelines.write().await;
        if let Some(existing) = pipelines.get(&project.id) {
            return existing.pipeline.clone();
        }

        let params = PipelineParams::from_settings(settings, project);
        let pipeline = Pipeline::new(
            project.id.clone(),
            project.root_path.clone(),
            self.llm.clone(),
            self.syntax_checker.clone(),
            self.approval.clone(),
            self.store.clone(),
            self.broadcast.clone(),
            params,
        );
        let stop_flag = pipeline.stop_flag();
        let handle = PipelineHandle {
            pipeline: Arc::new(Mutex::new(pipeline)),
            stop_flag,
        };
        let pipeline_arc = handle.pipeline.clone();
        pipelines.insert(project.id.clone(), handle);
        pipeline_arc
    }

    pub async fn get(&self, project_id: &str) -> Option<Arc<Mutex<Pipeline>>> {
        self.pipelines.read().await.get(project_id).map(|h| h.pipeline.clone())
    }

    pub async fn remove(&self, project_id: &str) {
        self.pipelines.write().await.remove(project_id);
    }

    /// Spawn the pipeline's run loop as a background task.
    pub async fn start(&self, project: &Project, settings: &Settings) {
        let handle = self.get_or_create(project, settings).await;
        let project_id = project.id.clone();
        tokio::spawn(async move {
            let mut pipeline = handle.lock().await;
            if let Err(e) = pipeline.run().await {
                warn!("pipeline for {project_id} terminated: {e}");
            }
        });
    }

    /// Signal the project's pipeline to stop. Flips the shared stop flag
    /// directly instead of locking the pipeline, so it takes effect even
    /// while `run()` is mid-iteration and holding its own mutex.
    pub async fn stop(&self, project_id: &str) {
        if let Some(handle) = self.pipelines.read().await.get(project_id) {
            handle.stop_flag.store(true, Ordering::SeqCst);
            self.approval.cancel_all().await;
        }
    }

    /// Scan Store for projects left in `running` status (e.g. after a
    /// crash) and restart their pipelines.
    pub async fn resume_on_start(&self) {
        let settings = self.store.get_settings().await;
        for project in self.store.get_projects().await {
            if project.status == ProjectStatus::Running {
                info!("resuming pipeline for project {}", project.id);
                self.start(&project, &settings).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, Role};
    use crate::models::Plan;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct NullLlm;

    #[async_trait]
    impl LlmBackend for NullLlm {
        async fn complete(&self, _role: Role, _prompt: String) -> Result<String, LlmError> {
            Ok("REVIEW_PASSED".to_string())
        }
    }

    async fn registry(dir: &std::path::Path) -> (Registry, Arc<Store>) {
        let store = Arc::new(Store::load(dir.join("db.json")).await.unwrap());
        let registry = Registry::new(
            store.clone(),
            Broadcast::new(),
            Arc::new(NullLlm),
            "node".to_string(),
            ApprovalOracle::new(false),
        );
        (registry, store)
    }

    #[tokio::test]
    async fn get_or_create_returns_same_handle_for_same_project() {
        let dir = tempdir().unwrap();
        let (registry, _store) = registry(dir.path()).await;
        let project = Project::new("p1".into(), PathBuf::from("/tmp/p1"), Plan::new(), false);
        let settings = Settings::default();

        let first = registry.get_or_create(&project, &settings).await;
        let second = registry.get_or_create(&project, &settings).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn resume_on_start_restarts_running_projects() {
        let dir = tempdir().unwrap();
        let (registry, store) = registry(dir.path()).await;

        let mut project = Project::new("p1".into(), dir.path().to_path_buf(), Plan::new(), false);
        project.status = ProjectStatus::Running;
        store.save_project(project).await.unwrap();

        registry.resume_on_start().await;
        assert!(registry.get("p1").await.is_some());
    }
}
