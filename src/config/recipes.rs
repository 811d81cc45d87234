//! Bundled default prompt-suffix recipes.
//!
//! Recipes are embedded in the binary using `include_str!` and used as
//! fallbacks when no project-local or explicit recipe file is found. They
//! let an operator override the instruction suffix the LLM Client appends
//! per role without recompiling.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeDocument {
    pub instructions: String,
}

pub const DEFAULT_DEVELOPER_RECIPE: &str = include_str!("../../recipes/developer.yaml");
pub const DEFAULT_REVIEWER_RECIPE: &str = include_str!("../../recipes/reviewer.yaml");
pub const DEFAULT_PRD_RECIPE: &str = include_str!("../../recipes/prd.yaml");

pub enum RecipeSource {
    File(PathBuf),
    Bundled(&'static str),
}

impl RecipeSource {
    pub fn content(&self) -> std::io::Result<String> {
        match self {
            RecipeSource::File(path) => std::fs::read_to_string(path),
            RecipeSource::Bundled(content) => Ok(content.to_string()),
        }
    }

    pub fn load(&self) -> Result<RecipeDocument> {
        let raw = self.content().context("Failed to read recipe content")?;
        serde_yaml::from_str(&raw).context("Failed to parse recipe YAML")
    }
}

/// Resolve a recipe, falling back to the bundled default if not found.
///
/// Resolution priority:
/// 1. Explicit path if it exists.
/// 2. Project-local `.ralph/recipes/<name>.yaml`.
/// 3. Bundled default.
pub fn resolve_recipe(explicit_path: Option<&Path>, base_dir: &Path, recipe_name: &str) -> RecipeSource {
    if let Some(path) = explicit_path {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        if resolved.exists() {
            debug!("Using recipe from explicit path: {:?}", resolved);
            return RecipeSource::File(resolved);
        }
    }

    let project_local = base_dir.join(".ralph/recipes").join(format!("{}.yaml", recipe_name));
    if project_local.exists() {
        debug!("Using recipe from .ralph/recipes: {:?}", project_local);
        return RecipeSource::File(project_local);
    }

    debug!("Using bundled default recipe for: {}", recipe_name);
    match recipe_name {
        "developer" => RecipeSource::Bundled(DEFAULT_DEVELOPER_RECIPE),
        "reviewer" => RecipeSource::Bundled(DEFAULT_REVIEWER_RECIPE),
        "prd" => RecipeSource::Bundled(DEFAULT_PRD_RECIPE),
        _ => RecipeSource::Bundled(DEFAULT_DEVELOPER_RECIPE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_recipes_not_empty() {
        assert!(!DEFAULT_DEVELOPER_RECIPE.is_empty());
        assert!(!DEFAULT_REVIEWER_RECIPE.is_empty());
        assert!(!DEFAULT_PRD_RECIPE.is_empty());
    }

    #[test]
    fn bundled_recipes_valid_yaml() {
        for raw in [DEFAULT_DEVELOPER_RECIPE, DEFAULT_REVIEWER_RECIPE, DEFAULT_PRD_RECIPE] {
            let doc: RecipeDocument = serde_yaml::from_str(raw).expect("recipe should parse");
            assert!(!doc.instructions.is_empty());
        }
    }

    #[test]
    fn resolve_recipe_falls_back_to_bundled() {
        let source = resolve_recipe(Some(Path::new("nonexistent/path.yaml")), Path::new("/tmp"), "developer");
        assert!(matches!(source, RecipeSource::Bundled(_)));
    }
}
