use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::plan::Plan;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Created,
    Initialized,
    Running,
    Paused,
    Completed,
    Error,
}

/// A project identified by a human-chosen `id`, also used as its name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub root_path: PathBuf,
    pub plan: Plan,
    pub status: ProjectStatus,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default = "default_true")]
    pub use_human_review: bool,
    pub created_at: String,
    pub updated_at: String,
}

fn default_true() -> bool {
    true
}

impl Project {
    pub fn new(id: String, root_path: PathBuf, plan: Plan, use_human_review: bool) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            root_path,
            plan,
            status: ProjectStatus::Created,
            iteration: 0,
            use_human_review,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_project_starts_created_at_iteration_zero() {
        let p = Project::new("demo".into(), PathBuf::from("/tmp/demo"), Plan::new(), true);
        assert_eq!(p.status, ProjectStatus::Created);
        assert_eq!(p.iteration, 0);
        assert_eq!(p.created_at, p.updated_at);
    }
}
