//! Extraction grammars applied to raw LLM responses: the file-block
//! grammar (role-agnostic) and the three-stage JSON recovery used for
//! PRD/subtask-split responses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// `### FILE: <path>` followed by a fenced code block. Non-overlapping,
/// greedy-inside, left-to-right — mirrors the teacher's markdown-fence
/// extraction idiom generalised to multiple blocks per response.
static FILE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)### FILE: (.*?)\n+```[^\n]*\n(.*?)```").expect("static file-block regex is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

/// Extract every file block from a response, in order of appearance.
pub fn extract_file_blocks(response: &str) -> Vec<FileBlock> {
    FILE_BLOCK_RE
        .captures_iter(response)
        .map(|caps| FileBlock {
            path: caps[1].trim().to_string(),
            content: caps[2].to_string(),
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("response is not valid JSON (prefix: {0:?})")]
    Unparseable(String),
}

/// Three-stage JSON recovery:
/// 1. Parse the whole trimmed response.
/// 2. Find the first `{` or `[`, then from the last matching closer work
///    backwards, attempting a parse at each candidate end position.
/// 3. Fail with a parse error carrying the response prefix.
pub fn extract_json(response: &str) -> Result<Value, JsonExtractError> {
    let trimmed = response.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let Some(start) = trimmed.find(['{', '[']) else {
        return Err(JsonExtractError::Unparseable(prefix(trimmed)));
    };

    let opener = trimmed.as_bytes()[start];
    let closer = if opener == b'{' { '}' } else { ']' };

    // Work backwards from every occurrence of the matching closer,
    // attempting a parse of `trimmed[start..=end]` until one succeeds.
    let candidate_ends: Vec<usize> = trimmed
        .char_indices()
        .filter(|(_, c)| *c == closer)
        .map(|(i, _)| i)
        .collect();

    for end in candidate_ends.into_iter().rev() {
        if end < start {
            continue;
        }
        let slice = &trimmed[start..=end];
        if let Ok(value) = serde_json::from_str::<Value>(slice) {
            return Ok(value);
        }
    }

    Err(JsonExtractError::Unparseable(prefix(trimmed)))
}

fn prefix(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_file_blocks_finds_single_block() {
        let response = "### FILE: progress.txt\n```\nPROMISE_MET\n```";
        let blocks = extract_file_blocks(response);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].path, "progress.txt");
        assert_eq!(blocks[0].content.trim(), "PROMISE_MET");
    }

    #[test]
    fn extract_file_blocks_finds_multiple_non_overlapping() {
        let response = "### FILE: a.ts\n```ts\nconst a = 1;\n```\nSome prose.\n### FILE: b.ts\n```ts\nconst b = 2;\n```";
        let blocks = extract_file_blocks(response);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].path, "a.ts");
        assert_eq!(blocks[1].path, "b.ts");
    }

    #[test]
    fn extract_json_parses_direct() {
        let value = extract_json(r#"{"a":1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_json_recovers_fenced_block() {
        let response = "Here is the plan:\n```json\n{\"a\":1}\n```\nThanks.";
        let value = extract_json(response).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_json_recovers_with_trailing_prose() {
        let response = r#"{"a": [1,2,3]} — that's the plan."#;
        let value = extract_json(response).unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn extract_json_fails_on_garbage() {
        let err = extract_json("not json at all").unwrap_err();
        assert!(matches!(err, JsonExtractError::Unparseable(_)));
    }

    #[test]
    fn extract_json_idempotent_on_generator_output() {
        let obj = serde_json::json!({"stages": [{"name": "s"}]});
        let serialised = serde_json::to_string(&obj).unwrap();
        let recovered = extract_json(&serialised).unwrap();
        assert_eq!(obj, recovered);
    }
}
