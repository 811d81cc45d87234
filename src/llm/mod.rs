pub mod client;
pub mod extract;
pub mod prompt;

pub use client::{apply_file_blocks, promise_met, reviewer_passed, HttpLlmClient, LlmBackend, LlmError};
pub use extract::{extract_file_blocks, extract_json, FileBlock, JsonExtractError};
pub use prompt::{
    build_developer_prompt, build_reviewer_prompt, build_self_heal_prompt, build_subtask_split_prompt,
    role_instructions, truncate_tail, DeveloperPromptInputs, Role,
};
