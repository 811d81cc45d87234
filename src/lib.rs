pub mod approval;
pub mod broadcast;
pub mod chat;
pub mod config;
pub mod http;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod syntax_gate;
pub mod vcs;
pub mod workspace;

pub use approval::ApprovalOracle;
pub use broadcast::{Broadcast, Envelope};
pub use config::{HardChecklist, LlmClientConfig, Provider, Settings};
pub use models::{Lesson, LessonLog, Plan, Priority, Project, ProjectStatus, Stage, Story};
pub use pipeline::{Pipeline, PipelineParams, PipelineState};
pub use registry::Registry;
pub use store::Store;
pub use vcs::VcsGate;
pub use workspace::Workspace;
