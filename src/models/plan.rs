use serde::{Deserialize, Serialize};

/// A staged development plan: an ordered sequence of stages, each an ordered
/// sequence of stories. Stages are processed in order; within a stage,
/// stories are processed in order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    pub mission: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub stories: Vec<Story>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub is_skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_subtasked: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    Standard,
}

impl Story {
    pub fn new(title: String, description: String, priority: Priority) -> Self {
        Self {
            title,
            description,
            priority,
            passes: false,
            is_skipped: false,
            skip_reason: None,
            is_subtasked: None,
        }
    }

    /// A story is terminal once it has passed or been skipped.
    pub fn is_terminal(&self) -> bool {
        self.passes || self.is_skipped
    }
}

impl Stage {
    /// A stage is complete iff every contained story has reached a terminal
    /// state. Recomputed rather than trusted, so callers should call
    /// `recompute_completion` after any story mutation.
    pub fn all_stories_terminal(&self) -> bool {
        self.stories.iter().all(Story::is_terminal)
    }
}

impl Plan {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// The first non-completed stage, or None if every stage is complete.
    pub fn active_stage(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| !s.is_completed)
    }

    pub fn active_stage_mut(&mut self) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| !s.is_completed)
    }

    /// Whether every stage in the plan has completed.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.is_completed)
    }
}

/// The first story in a stage with neither terminal flag set.
pub fn active_story(stage: &Stage) -> Option<&Story> {
    stage.stories.iter().find(|s| !s.is_terminal())
}

pub fn active_story_mut(stage: &mut Stage) -> Option<&mut Story> {
    stage.stories.iter_mut().find(|s| !s.is_terminal())
}

/// Mark the given story index in the given stage as passed, resetting
/// nothing else — callers are responsible for `retryCount`/`lastError`.
pub fn mark_story_passed(stage: &mut Stage, index: usize) {
    if let Some(story) = stage.stories.get_mut(index) {
        story.passes = true;
        story.is_skipped = false;
    }
    mark_stage_complete_if_done(stage);
}

pub fn mark_story_skipped(stage: &mut Stage, index: usize, reason: String) {
    if let Some(story) = stage.stories.get_mut(index) {
        story.is_skipped = true;
        story.skip_reason = Some(reason);
    }
    mark_stage_complete_if_done(stage);
}

/// Recompute `is_completed` for the stage from its stories' terminal state.
pub fn mark_stage_complete_if_done(stage: &mut Stage) {
    stage.is_completed = stage.all_stories_terminal();
}

/// Replace one story in place with N subtasks, preserving the order of the
/// remaining stories. Stories have no stable id; identity is positional
/// within the stage, so this must not renumber siblings.
pub fn replace_story(stage: &mut Stage, index: usize, subtasks: Vec<Story>) {
    if index >= stage.stories.len() || subtasks.is_empty() {
        return;
    }
    stage.stories.splice(index..=index, subtasks);
}
