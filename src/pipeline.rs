//! Pipeline — the per-project state machine: iteration loop,
//! retry/backoff/skip/rollback, context assembly, and the
//! developer+reviewer+human cascade.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::approval::ApprovalOracle;
use crate::broadcast::{Broadcast, Envelope};
use crate::config::{HardChecklist, Settings};
use crate::llm::{
    apply_file_blocks, build_developer_prompt, build_reviewer_prompt, build_self_heal_prompt,
    build_subtask_split_prompt, extract_json, promise_met, reviewer_passed, role_instructions,
    truncate_tail, DeveloperPromptInputs, LlmBackend, Role,
};
use crate::models::{
    mark_stage_complete_if_done, mark_story_passed, mark_story_skipped, replace_story, Lesson,
    Plan, Priority, Project, ProjectStatus, Stage, Story,
};
use crate::store::Store;
use crate::syntax_gate::SyntaxGate;
use crate::vcs::{rollback_best_effort, VcsGate};
use crate::workspace::Workspace;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fatal pipeline error: {0}")]
    Fatal(String),
}

/// Parameters snapshotted from Settings at pipeline start.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub max_iterations: u32,
    pub max_retries_per_task: u32,
    pub base_sleep_time: u64,
    pub backoff_multiplier: f64,
    pub use_reviewer_agent: bool,
    pub use_human_review: bool,
    pub chat_enabled: bool,
}

impl PipelineParams {
    pub fn from_settings(settings: &Settings, project: &Project) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            max_retries_per_task: settings.max_retries_per_task,
            base_sleep_time: settings.base_sleep_time,
            backoff_multiplier: settings.backoff_multiplier,
            use_reviewer_agent: settings.use_reviewer_agent,
            use_human_review: project.use_human_review,
            chat_enabled: settings.chat.enabled,
        }
    }
}

/// Per-run mutable state.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub is_running: bool,
    pub iteration: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub manual_change_log: Option<String>,
}

pub struct Pipeline {
    project_id: String,
    workspace: Workspace,
    vcs: VcsGate,
    llm: Arc<dyn LlmBackend>,
    syntax_gate: SyntaxGate,
    approval: ApprovalOracle,
    store: Arc<Store>,
    broadcast: Broadcast,
    params: PipelineParams,
    state: PipelineState,
    checklist: HardChecklist,
    stop_flag: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        project_id: String,
        root: std::path::PathBuf,
        llm: Arc<dyn LlmBackend>,
        syntax_checker: String,
        approval: ApprovalOracle,
        store: Arc<Store>,
        broadcast: Broadcast,
        params: PipelineParams,
    ) -> Self {
        Self {
            workspace: Workspace::new(root.clone()),
            vcs: VcsGate::new(root),
            llm,
            syntax_gate: SyntaxGate::new(syntax_checker),
            approval,
            store,
            broadcast,
            params,
            state: PipelineState::default(),
            project_id,
            checklist: HardChecklist::default(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the stop signal `run()`'s loop polls directly. Lets a
    /// caller (e.g. the Registry) request cancellation without locking the
    /// pipeline, which `run()` holds for its entire duration.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    fn emit(&self, message: &str, status: Option<&str>) {
        self.broadcast.send(Envelope {
            envelope_type: "status".to_string(),
            project_id: self.project_id.clone(),
            status: status.map(str::to_string),
            iteration: Some(self.state.iteration),
            current_task: None,
            message: message.to_string(),
            prd: None,
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    fn load_plan(&self) -> anyhow::Result<Plan> {
        let raw = self.workspace.read_to_string("plans/prd.json")?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn persist_plan(&self, plan: &Plan) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(plan)?;
        self.workspace.write("plans/prd.json", &json)
    }

    async fn mark_completed(&self) -> anyhow::Result<()> {
        if let Some(mut project) = self.store.get_project(&self.project_id).await {
            project.status = ProjectStatus::Completed;
            project.iteration = self.state.iteration;
            self.store.save_project(project).await?;
        }
        Ok(())
    }

    async fn mark_error(&self) -> anyhow::Result<()> {
        if let Some(mut project) = self.store.get_project(&self.project_id).await {
            project.status = ProjectStatus::Error;
            project.iteration = self.state.iteration;
            self.store.save_project(project).await?;
        }
        Ok(())
    }

    /// Sync `Project.iteration` in the Store with the pipeline's own
    /// counter, so dashboard/chat readers see current progress.
    async fn sync_iteration(&self) -> anyhow::Result<()> {
        if let Some(mut project) = self.store.get_project(&self.project_id).await {
            project.iteration = self.state.iteration;
            self.store.save_project(project).await?;
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.state.is_running = false;
        self.stop_flag.store(true, Ordering::SeqCst);
        let approval = self.approval.clone();
        tokio::spawn(async move { approval.cancel_all().await });
    }

    /// Run the pipeline's main loop until completion, a stop request, or
    /// a terminal error.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        self.state.is_running = true;
        self.stop_flag.store(false, Ordering::SeqCst);
        info!(project = %self.project_id, "pipeline starting");

        while self.state.is_running
            && !self.stop_flag.load(Ordering::SeqCst)
            && self.state.iteration < self.params.max_iterations
        {
            if self.stop_flag.load(Ordering::SeqCst) {
                self.state.is_running = false;
                self.emit("stop requested", Some("paused"));
                break;
            }

            match self.run_iteration().await {
                Ok(IterationOutcome::Done) => {
                    self.mark_completed().await.map_err(|e| PipelineError::Fatal(e.to_string()))?;
                    self.emit("all stages complete", Some("completed"));
                    break;
                }
                Ok(IterationOutcome::Continue) => {}
                Ok(IterationOutcome::Terminated) => {
                    self.mark_error().await.map_err(|e| PipelineError::Fatal(e.to_string()))?;
                    self.emit("terminal error, rolled back", Some("error"));
                    break;
                }
                Err(e) => {
                    self.mark_error().await.map_err(|e| PipelineError::Fatal(e.to_string()))?;
                    self.emit(&format!("fatal: {e}"), Some("error"));
                    return Err(PipelineError::Fatal(e.to_string()));
                }
            }

            tokio::time::sleep(Duration::from_millis(self.params.base_sleep_time)).await;
        }

        Ok(())
    }

    async fn run_iteration(&mut self) -> anyhow::Result<IterationOutcome> {
        self.state.iteration += 1;

        let mut plan = self.load_plan()?;

        let Some(stage_idx) = plan.stages.iter().position(|s| !s.is_completed) else {
            return Ok(IterationOutcome::Done);
        };

        let story_idx = plan.stages[stage_idx]
            .stories
            .iter()
            .position(|s| !s.is_terminal());

        let Some(story_idx) = story_idx else {
            mark_stage_complete_if_done(&mut plan.stages[stage_idx]);
            self.persist_plan(&plan)?;
            return Ok(IterationOutcome::Continue);
        };

        // Subtask split: stories with a long description that have not yet
        // been subtasked are split before consuming an iteration slot.
        if plan.stages[stage_idx].stories[story_idx].description.len() > 300
            && plan.stages[stage_idx].stories[story_idx].is_subtasked != Some(true)
        {
            if let Some(subtasks) = self.try_subtask_split(&plan.stages[stage_idx].stories[story_idx]).await {
                replace_story(&mut plan.stages[stage_idx], story_idx, subtasks);
                self.persist_plan(&plan)?;
                self.state.iteration -= 1; // does not consume an iteration slot
                return Ok(IterationOutcome::Continue);
            }
        }

        let manual_change_note = self.prepare_context()?;

        let mission = plan.stages[stage_idx].mission.clone();
        let progress = self.workspace.read_to_string("progress.txt").unwrap_or_default();
        let dev_outcome = self
            .run_developer(&plan.stages[stage_idx], story_idx, manual_change_note.as_deref(), &progress)
            .await?;

        let (dev_response, dev_prompt) = match dev_outcome {
            // An LLM-transport or LLM-format error: no file writes happened,
            // but the iteration still proceeds as a reviewer-fail rather
            // than a fatal error (spec: retry-with-backoff, never fatal).
            DeveloperOutcome::LlmFailed { error, .. } => {
                let feedback = format!("developer LLM error: {error}");
                return self.on_failure(&mut plan, stage_idx, story_idx, feedback).await;
            }
            DeveloperOutcome::Responded { response, prompt, .. } => (response, prompt),
        };

        let gate_result = self.syntax_gate.validate(&self.workspace.root);
        let dev_response = if !gate_result.valid {
            let file = gate_result.file.map(|f| f.display().to_string()).unwrap_or_default();
            let error = gate_result.error.unwrap_or_default();
            let heal_prompt = build_self_heal_prompt(&dev_prompt, &file, &error);
            self.llm.complete(Role::Developer, heal_prompt).await.map(|r| {
                apply_file_blocks(&self.workspace, &r);
                r
            }).unwrap_or(dev_response)
        } else {
            dev_response
        };

        let checklist_failures: Vec<String> = self
            .checklist
            .run_all(&plan)
            .into_iter()
            .filter(|r| !r.passed)
            .map(|r| format!("[{}] {}", r.check_name, r.message))
            .collect();

        let (mut is_valid, mut feedback) = if !checklist_failures.is_empty() {
            (false, checklist_failures.join("\n"))
        } else if self.params.use_reviewer_agent {
            let (passed, review_text) = self
                .run_reviewer(&mission, &plan.stages[stage_idx].stories[story_idx].title, &dev_response)
                .await?;
            (passed, if passed { String::new() } else { review_text })
        } else {
            let passed = promise_met(&dev_response);
            (passed, if passed { String::new() } else { dev_response.clone() })
        };

        if is_valid && self.params.chat_enabled && self.params.use_human_review {
            let approved = self
                .approval
                .ask(&plan.stages[stage_idx].mission, &plan.stages[stage_idx].stories[story_idx].title)
                .await;
            if !approved {
                is_valid = false;
                feedback = "USER REJECTED via Telegram Mobile.".to_string();
            }
        }

        if is_valid {
            self.on_success(&mut plan, stage_idx, story_idx).await?;
            Ok(IterationOutcome::Continue)
        } else {
            self.on_failure(&mut plan, stage_idx, story_idx, feedback).await
        }
    }

    async fn try_subtask_split(&self, story: &Story) -> Option<Vec<Story>> {
        let suffix = role_instructions(Role::Prd, &self.workspace.root);
        let prompt = build_subtask_split_prompt(&story.title, &story.description, &suffix);
        let response = self.llm.complete(Role::Prd, prompt).await.ok()?;
        let value = extract_json(&response).ok()?;
        let array = value.as_array()?;
        if array.is_empty() {
            return None;
        }
        let subtasks: Vec<Story> = array
            .iter()
            .filter_map(|entry| {
                let title = entry.get("title")?.as_str()?.to_string();
                let description = entry.get("description")?.as_str()?.to_string();
                let mut s = Story::new(title, description, story.priority);
                s.is_subtasked = Some(true);
                Some(s)
            })
            .collect();
        if subtasks.is_empty() {
            None
        } else {
            Some(subtasks)
        }
    }

    /// Detect and reconcile manual edits; returns the manual-change note
    /// (comma-joined paths) if any were found.
    fn prepare_context(&mut self) -> anyhow::Result<Option<String>> {
        if self.vcs.has_uncommitted_changes().unwrap_or(false) {
            let committed = self.vcs.commit_manual_changes().unwrap_or_default();
            if committed.contains(&"package.json".to_string()) {
                fire_and_forget_dependency_install(&self.workspace.root);
            }
            let note = committed.join(", ");
            self.state.manual_change_log = Some(note.clone());
            Ok(Some(note))
        } else {
            self.state.manual_change_log = None;
            Ok(None)
        }
    }

    async fn run_developer(
        &self,
        stage: &Stage,
        story_idx: usize,
        manual_change_note: Option<&str>,
        progress: &str,
    ) -> anyhow::Result<DeveloperOutcome> {
        let story = &stage.stories[story_idx];
        let agents_log = self.workspace.read_to_string("agents.md").unwrap_or_default();
        let agents_log = truncate_tail(&agents_log, 3000);
        let tree = self.workspace.render_tree();
        let code_excerpts = self.collect_code_excerpts();
        let lessons = self.recent_lesson_strings().await;
        let strategy = if self.state.retry_count > 2 { "REWRITE" } else { "PATCH" };

        let suffix = role_instructions(Role::Developer, &self.workspace.root);
        let inputs = DeveloperPromptInputs {
            mission: &stage.mission,
            story_title: &story.title,
            story_description: &story.description,
            priority: match story.priority {
                Priority::Critical => "critical",
                Priority::Standard => "standard",
            },
            strategy,
            manual_change_note,
            lessons: &lessons,
            agents_log: &agents_log,
            code_excerpts: &code_excerpts,
            tree: &tree,
            progress,
        };
        let prompt = build_developer_prompt(&inputs, &suffix);

        // A transport or empty-response error here is an LLM-format
        // failure, not a pipeline bug: no file writes happen and the
        // caller folds it into a reviewer-fail/retry instead of a fatal
        // loop error.
        let response = match self.llm.complete(Role::Developer, prompt.clone()).await {
            Ok(r) => r,
            Err(e) => return Ok(DeveloperOutcome::LlmFailed { prompt, error: e.to_string() }),
        };
        apply_file_blocks(&self.workspace, &response);

        let log_path = self.write_raw_log("developer", &prompt, &response)?;
        let summary = extract_summary(&response);
        self.workspace.append(
            "agents.md",
            &format!("\n## {}\n{}\n(raw: {})\n", story.title, summary, log_path.display()),
        )?;

        Ok(DeveloperOutcome::Responded { response, prompt, log_path })
    }

    /// Returns `(passed, feedback_text)`. `feedback_text` is the reviewer's
    /// full response on either outcome (used as retry feedback on
    /// rejection), or a synthetic error message if the reviewer LLM call
    /// itself failed — that failure is folded into a reviewer-fail rather
    /// than propagated, per the same disposition as developer LLM errors.
    async fn run_reviewer(&self, mission: &str, story_title: &str, dev_response: &str) -> anyhow::Result<(bool, String)> {
        let compact_tree = truncate_tail(&self.workspace.render_tree(), 1000);
        let suffix = role_instructions(Role::Reviewer, &self.workspace.root);
        let prompt = build_reviewer_prompt(mission, story_title, dev_response, &compact_tree, &suffix);
        match self.llm.complete(Role::Reviewer, prompt).await {
            Ok(response) => {
                apply_file_blocks(&self.workspace, &response);
                Ok((reviewer_passed(&response), response))
            }
            Err(e) => Ok((false, format!("reviewer LLM error: {e}"))),
        }
    }

    async fn on_success(&mut self, plan: &mut Plan, stage_idx: usize, story_idx: usize) -> anyhow::Result<()> {
        mark_story_passed(&mut plan.stages[stage_idx], story_idx);
        self.state.retry_count = 0;
        self.state.last_error = None;

        self.persist_plan(plan)?;

        // VCS commit precedes the Store update for this iteration, so a
        // crash between the two never leaves the Store ahead of what's
        // actually committed to the workspace.
        let message = format!("Completed: {} - {}", plan.stages[stage_idx].name, plan.stages[stage_idx].stories[story_idx].title);
        if let Err(e) = self.vcs.add_and_commit(&message) {
            warn!("commit failed after successful story: {e}");
        }

        self.store.update_plan(&self.project_id, plan.clone()).await?;
        self.sync_iteration().await?;

        self.emit(&message, None);
        Ok(())
    }

    async fn on_failure(
        &mut self,
        plan: &mut Plan,
        stage_idx: usize,
        story_idx: usize,
        feedback: String,
    ) -> anyhow::Result<IterationOutcome> {
        self.state.retry_count += 1;
        self.state.last_error = Some(feedback.clone());

        if feedback.len() > 20 {
            self.store
                .save_lesson(Lesson {
                    project: self.project_id.clone(),
                    stage: plan.stages[stage_idx].name.clone(),
                    task: plan.stages[stage_idx].stories[story_idx].title.clone(),
                    error: feedback.chars().take(500).collect(),
                    timestamp: Utc::now().to_rfc3339(),
                })
                .await?;
        }

        if self.state.retry_count >= self.params.max_retries_per_task {
            let priority = plan.stages[stage_idx].stories[story_idx].priority;
            if priority != Priority::Critical {
                mark_story_skipped(&mut plan.stages[stage_idx], story_idx, feedback);
                self.state.retry_count = 0;
                self.persist_plan(plan)?;
                self.store.update_plan(&self.project_id, plan.clone()).await?;
                self.sync_iteration().await?;
                self.emit("story skipped after max retries", None);
                return Ok(IterationOutcome::Continue);
            } else {
                rollback_best_effort(&self.workspace.root);
                self.state.is_running = false;
                return Ok(IterationOutcome::Terminated);
            }
        }

        let wait_ms = (self.params.base_sleep_time as f64
            * self.params.backoff_multiplier.powi(self.state.retry_count as i32 - 1)) as u64;
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        Ok(IterationOutcome::Continue)
    }

    fn collect_code_excerpts(&self) -> String {
        let mut out = String::new();
        let mut count = 0;
        for path in self.workspace.list_files() {
            if count >= 15 {
                break;
            }
            let ext_ok = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("ts") | Some("js") | Some("css") | Some("html")
            );
            let name = path.to_string_lossy();
            if !ext_ok || name.contains(".test.") {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                let excerpt: String = content.chars().take(5000).collect();
                out.push_str(&format!("### {}\n{}\n", path.display(), excerpt));
                count += 1;
            }
        }
        out
    }

    async fn recent_lesson_strings(&self) -> Vec<String> {
        let lessons = self.store.get_lessons().await;
        lessons
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|l| format!("{}: {}", l.task, l.error))
            .collect()
    }

    fn write_raw_log(&self, role: &str, prompt: &str, response: &str) -> anyhow::Result<std::path::PathBuf> {
        let ts = Utc::now().format("%Y%m%dT%H%M%S%.f");
        let relative = format!(".ralph/logs/{ts}_{role}.md");
        let content = format!("# Prompt\n{prompt}\n\n# Response\n{response}\n");
        self.workspace.write(&relative, &content)?;
        Ok(self.workspace.root.join(relative))
    }
}

enum IterationOutcome {
    Done,
    Continue,
    Terminated,
}

enum DeveloperOutcome {
    Responded {
        response: String,
        prompt: String,
        #[allow(dead_code)]
        log_path: std::path::PathBuf,
    },
    LlmFailed {
        #[allow(dead_code)]
        prompt: String,
        error: String,
    },
}

/// From the raw response, find the first line whose lowercase form
/// contains `summary:`, `findings:`, or `criteria:`; capture from there
/// until a fenced code block begins. Falls back to the first 5 non-empty
/// lines, then to a 500-char prefix if the capture is trivially short.
fn extract_summary(response: &str) -> String {
    let markers = ["summary:", "findings:", "criteria:"];
    let lines: Vec<&str> = response.lines().collect();

    let marker_idx = lines
        .iter()
        .position(|line| markers.iter().any(|m| line.to_lowercase().contains(m)));

    let captured = if let Some(start) = marker_idx {
        lines[start..]
            .iter()
            .take_while(|line| !line.trim_start().starts_with("```"))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        lines.iter().filter(|l| !l.trim().is_empty()).take(5).cloned().collect::<Vec<_>>().join("\n")
    };

    if captured.trim().len() <= 10 {
        let prefix: String = response.chars().take(500).collect();
        format!("{prefix}...")
    } else {
        captured
    }
}

/// Fire-and-forget dependency install, invoked only when manual changes
/// touch the dependency manifest. The pipeline must never block on the
/// outcome.
fn fire_and_forget_dependency_install(root: &Path) {
    let root = root.to_path_buf();
    tokio::spawn(async move {
        let result = tokio::process::Command::new("npm").arg("install").current_dir(&root).output().await;
        if let Err(e) = result {
            warn!("dependency install failed (fire-and-forget): {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct ScriptedLlm {
        developer_responses: Vec<String>,
        reviewer_responses: Vec<String>,
        dev_call: AtomicUsize,
        review_call: AtomicUsize,
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn complete(&self, role: Role, _prompt: String) -> Result<String, crate::llm::LlmError> {
            match role {
                Role::Developer => {
                    let i = self.dev_call.fetch_add(1, Ordering::SeqCst);
                    Ok(self.developer_responses[i.min(self.developer_responses.len() - 1)].clone())
                }
                Role::Reviewer => {
                    let i = self.review_call.fetch_add(1, Ordering::SeqCst);
                    Ok(self.reviewer_responses[i.min(self.reviewer_responses.len() - 1)].clone())
                }
                _ => Ok("{}".to_string()),
            }
        }
    }

    fn setup_workspace(plan: &Plan) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let ws = Workspace::new(dir.path().to_path_buf());
        ws.init().unwrap();
        ws.write("plans/prd.json", &serde_json::to_string(plan).unwrap()).unwrap();
        VcsGate::new(dir.path().to_path_buf()).init().unwrap();
        dir
    }

    fn default_params() -> PipelineParams {
        PipelineParams {
            max_iterations: 10,
            max_retries_per_task: 3,
            base_sleep_time: 1,
            backoff_multiplier: 2.0,
            use_reviewer_agent: false,
            use_human_review: false,
            chat_enabled: false,
        }
    }

    #[tokio::test]
    async fn empty_plan_completes_immediately() {
        let plan = Plan::new();
        let dir = setup_workspace(&plan);
        let store = Arc::new(Store::load(dir.path().join("db.json")).await.unwrap());
        store
            .save_project(Project::new("p".into(), dir.path().to_path_buf(), plan, false))
            .await
            .unwrap();

        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm {
            developer_responses: vec![],
            reviewer_responses: vec![],
            dev_call: AtomicUsize::new(0),
            review_call: AtomicUsize::new(0),
        });

        let mut pipeline = Pipeline::new(
            "p".into(),
            dir.path().to_path_buf(),
            llm,
            "node".into(),
            ApprovalOracle::new(false),
            store.clone(),
            Broadcast::new(),
            default_params(),
        );
        pipeline.run().await.unwrap();

        let project = store.get_project("p").await.unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
    }

    #[tokio::test]
    async fn single_story_developer_succeeds_first_try() {
        let plan = Plan {
            stages: vec![crate::models::Stage {
                name: "S".into(),
                mission: "m".into(),
                is_completed: false,
                stories: vec![Story::new("t".into(), "d".into(), Priority::Standard)],
            }],
        };
        let dir = setup_workspace(&plan);
        let store = Arc::new(Store::load(dir.path().join("db.json")).await.unwrap());
        store
            .save_project(Project::new("p".into(), dir.path().to_path_buf(), plan, false))
            .await
            .unwrap();

        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm {
            developer_responses: vec!["### FILE: progress.txt\n```\nPROMISE_MET\n```".to_string()],
            reviewer_responses: vec![],
            dev_call: AtomicUsize::new(0),
            review_call: AtomicUsize::new(0),
        });

        let mut pipeline = Pipeline::new(
            "p".into(),
            dir.path().to_path_buf(),
            llm,
            "node".into(),
            ApprovalOracle::new(false),
            store.clone(),
            Broadcast::new(),
            default_params(),
        );
        pipeline.run().await.unwrap();

        let project = store.get_project("p").await.unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
        assert!(project.plan.stages[0].is_completed);
        assert!(project.plan.stages[0].stories[0].passes);
    }

    #[tokio::test]
    async fn non_critical_task_skipped_after_max_retries() {
        let plan = Plan {
            stages: vec![crate::models::Stage {
                name: "S".into(),
                mission: "m".into(),
                is_completed: false,
                stories: vec![Story::new("t".into(), "d".into(), Priority::Standard)],
            }],
        };
        let dir = setup_workspace(&plan);
        let store = Arc::new(Store::load(dir.path().join("db.json")).await.unwrap());
        store
            .save_project(Project::new("p".into(), dir.path().to_path_buf(), plan, false))
            .await
            .unwrap();

        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm {
            developer_responses: vec!["still working, no sentinel here".to_string()],
            reviewer_responses: vec![],
            dev_call: AtomicUsize::new(0),
            review_call: AtomicUsize::new(0),
        });

        let mut params = default_params();
        params.max_retries_per_task = 2;

        let mut pipeline = Pipeline::new(
            "p".into(),
            dir.path().to_path_buf(),
            llm,
            "node".into(),
            ApprovalOracle::new(false),
            store.clone(),
            Broadcast::new(),
            params,
        );
        pipeline.run().await.unwrap();

        let project = store.get_project("p").await.unwrap();
        assert!(project.plan.stages[0].stories[0].is_skipped);
        assert_eq!(project.status, ProjectStatus::Completed);
    }

    #[test]
    fn extract_summary_uses_marker_line() {
        let response = "blah\nSummary: did the thing\nmore text\n```\ncode\n```";
        let summary = extract_summary(response);
        assert!(summary.to_lowercase().contains("summary:"));
        assert!(!summary.contains("```"));
    }

    #[test]
    fn extract_summary_falls_back_to_first_lines() {
        let response = "line one\nline two\nline three";
        let summary = extract_summary(response);
        assert!(summary.contains("line one"));
    }
}
