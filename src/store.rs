//! Store — the durable, atomic JSON document holding projects, global
//! settings, and the lessons log.
//!
//! Persistence follows the teacher's orchestration-state pattern: the whole
//! document is serialised, written to a `.tmp` sibling, then renamed over
//! the target so a crash mid-write never leaves a corrupt document on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::{Lesson, LessonLog, Project};

/// Current schema version for the persisted document. Bump when
/// adding/removing/modifying top-level fields.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub lessons: LessonLog,
    #[serde(default)]
    pub settings: crate::config::Settings,
}

fn schema_version_default() -> u32 {
    SCHEMA_VERSION
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            projects: Vec::new(),
            lessons: LessonLog::new(),
            settings: crate::config::Settings::default(),
        }
    }
}

/// The Store itself. All mutations are serialised through an internal
/// mutex so concurrent Pipelines behave as a single writer, per the
/// process-wide single-writer requirement.
pub struct Store {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl Store {
    /// Load the document from `path`, or start from an empty default if it
    /// does not yet exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let doc = if path.exists() {
            let raw = fs::read_to_string(&path).context("Failed to read store document")?;
            let mut doc: StoreDocument =
                serde_json::from_str(&raw).context("Failed to parse store document")?;
            doc.settings = doc.settings.migrate();
            doc
        } else {
            StoreDocument::default()
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Atomic write: serialise, write to a `.tmp` sibling, rename over the
    /// target.
    async fn save_locked(&self, doc: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create store directory")?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc).context("Failed to serialize store document")?;
        fs::write(&tmp_path, &json).context("Failed to write temp store file")?;
        fs::rename(&tmp_path, &self.path).context("Failed to rename store file")?;
        Ok(())
    }

    pub async fn get_projects(&self) -> Vec<Project> {
        self.doc.lock().await.projects.clone()
    }

    pub async fn get_project(&self, id: &str) -> Option<Project> {
        self.doc.lock().await.projects.iter().find(|p| p.id == id).cloned()
    }

    /// Insert-or-merge a project by id, bumping `updated_at`.
    pub async fn save_project(&self, mut project: Project) -> Result<()> {
        project.touch();
        let mut doc = self.doc.lock().await;
        match doc.projects.iter_mut().find(|p| p.id == project.id) {
            Some(slot) => *slot = project,
            None => doc.projects.push(project),
        }
        self.save_locked(&doc).await
    }

    pub async fn update_plan(&self, id: &str, plan: crate::models::Plan) -> Result<()> {
        let mut doc = self.doc.lock().await;
        let project = doc
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .with_context(|| format!("No such project: {id}"))?;
        project.plan = plan;
        project.touch();
        self.save_locked(&doc).await
    }

    pub async fn get_settings(&self) -> crate::config::Settings {
        self.doc.lock().await.settings.clone()
    }

    pub async fn update_settings(&self, settings: crate::config::Settings) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.settings = settings.migrate();
        self.save_locked(&doc).await
    }

    pub async fn get_lessons(&self) -> Vec<Lesson> {
        self.doc.lock().await.lessons.all().cloned().collect()
    }

    pub async fn save_lesson(&self, lesson: Lesson) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.lessons.push(lesson);
        self.save_locked(&doc).await
    }

    pub async fn delete_lesson(&self, timestamp: &str) -> Result<bool> {
        let mut doc = self.doc.lock().await;
        let removed = doc.lessons.remove(timestamp).is_some();
        if removed {
            self.save_locked(&doc).await?;
        }
        Ok(removed)
    }
}
