pub mod lesson;
pub mod plan;
pub mod project;

pub use lesson::{Lesson, LessonLog, LESSONS_CAP};
pub use plan::{
    active_story, active_story_mut, mark_stage_complete_if_done, mark_story_passed,
    mark_story_skipped, replace_story, Plan, Priority, Stage, Story,
};
pub use project::{Project, ProjectStatus};
