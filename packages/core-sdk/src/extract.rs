use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RUN_CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)RUN-CODE\n```(?:python)?\n(.*?)\n```").expect("valid RUN-CODE regex")
});

static JSON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\n(.*?)\n```").expect("valid json block regex"));

/**
 * \brief Code a model asked to run: fenced blocks preceded by a `RUN-CODE` line.
 */
pub fn extract_code_blocks(content: &str) -> Vec<String> {
    if !content.contains("RUN-CODE") {
        return Vec::new();
    }
    RUN_CODE_BLOCK
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/**
 * \brief Parsed ```json fences; blocks that fail to parse are skipped.
 */
pub fn extract_json_blocks(content: &str) -> Vec<Value> {
    JSON_BLOCK
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .filter_map(|m| serde_json::from_str(m.as_str()).ok())
        .collect()
}
