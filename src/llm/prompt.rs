//! Role-aware prompt assembly. The caller supplies a role; the client
//! appends a role-specific instruction block loaded from the bundled or
//! project-overridden recipe for that role.

use std::path::Path;

use crate::config::recipes::resolve_recipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Developer,
    Reviewer,
    Prd,
    Json,
}

impl Role {
    fn recipe_name(self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Reviewer => "reviewer",
            Role::Prd | Role::Json => "prd",
        }
    }
}

/// Load the role-specific instruction suffix, falling back to the bundled
/// default if no override is present under `base_dir`.
pub fn role_instructions(role: Role, base_dir: &Path) -> String {
    let source = resolve_recipe(None, base_dir, role.recipe_name());
    source
        .load()
        .map(|doc| doc.instructions)
        .unwrap_or_default()
}

pub struct DeveloperPromptInputs<'a> {
    pub mission: &'a str,
    pub story_title: &'a str,
    pub story_description: &'a str,
    pub priority: &'a str,
    pub strategy: &'a str,
    pub manual_change_note: Option<&'a str>,
    pub lessons: &'a [String],
    pub agents_log: &'a str,
    pub code_excerpts: &'a str,
    pub tree: &'a str,
    pub progress: &'a str,
}

/// Assemble the developer-role prompt embedding everything §4.8's
/// `run_developer` step specifies.
pub fn build_developer_prompt(inputs: &DeveloperPromptInputs, role_suffix: &str) -> String {
    let manual_change = inputs
        .manual_change_note
        .map(|n| format!("\n## Manual Changes Detected\nUser modified: {n}\n"))
        .unwrap_or_default();

    let failures = if inputs.lessons.is_empty() {
        String::new()
    } else {
        format!(
            "\n## FAILURES TO AVOID\n{}\n",
            inputs
                .lessons
                .iter()
                .map(|l| format!("- {l}"))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    format!(
        r#"## Role
DEVELOPER

## Mission
{mission}

## Task
{title}
{description}

## Priority
{priority}

## Strategy
{strategy}
{manual_change}{failures}
## Agent Log
{agents_log}

## Current Progress
{progress}

## Relevant Source
{code_excerpts}

## Project Tree
{tree}

## Success
Write `PROMISE_MET` into progress.txt once the task is complete.

{role_suffix}
"#,
        mission = inputs.mission,
        title = inputs.story_title,
        description = inputs.story_description,
        priority = inputs.priority,
        strategy = inputs.strategy,
        manual_change = manual_change,
        failures = failures,
        agents_log = inputs.agents_log,
        progress = inputs.progress,
        code_excerpts = inputs.code_excerpts,
        tree = inputs.tree,
        role_suffix = role_suffix,
    )
}

/// Append a self-healing block to an existing developer prompt, naming the
/// offending file and syntax-gate error. Not counted against the retry
/// budget — the pipeline re-invokes the developer once, in place.
pub fn build_self_heal_prompt(original_prompt: &str, file: &str, error: &str) -> String {
    format!(
        "{original_prompt}\n\n## SELF-HEALING\nThe previous attempt produced a syntax error in `{file}`:\n{error}\nFix this file and resubmit full file blocks for anything you change.\n"
    )
}

/// Assemble the reviewer-role prompt.
pub fn build_reviewer_prompt(mission: &str, story_title: &str, dev_result: &str, compact_tree: &str, role_suffix: &str) -> String {
    format!(
        r#"## Role
REVIEWER

## Mission
{mission}

## Story
{story_title}

## Developer Result
{dev_result}

## Project Tree (compact)
{compact_tree}

{role_suffix}
"#
    )
}

/// Assemble a subtask-split prompt requesting 3-5 sequential subtasks as a
/// JSON array.
pub fn build_subtask_split_prompt(story_title: &str, story_description: &str, role_suffix: &str) -> String {
    format!(
        r#"## Role
PRD

Split the following story into 3 to 5 sequential subtasks. Return a JSON
array of objects, each with `title` and `description` fields, and nothing
else.

## Story
{story_title}
{story_description}

{role_suffix}
"#
    )
}

/// Truncate `text` to the last `max_chars` characters, prefixing a marker
/// if truncation occurred.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }
    let skip = char_count - max_chars;
    let tail: String = text.chars().skip(skip).collect();
    format!("... [Truncated] ...\n{tail}")
}
