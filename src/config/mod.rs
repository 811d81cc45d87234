pub mod checklist;
pub mod recipes;
pub mod settings;

pub use checklist::{CheckDefinition, HardCheckResult, HardChecklist};
pub use recipes::{resolve_recipe, RecipeDocument, RecipeSource};
pub use settings::{ChatSettings, LlmClientConfig, Provider, Settings};
