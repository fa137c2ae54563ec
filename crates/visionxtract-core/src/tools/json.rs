use serde_json::Value;

/// Removes a surrounding ```json (or bare ```) fence from model output.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

/// Parses model output as JSON after stripping a code fence.
pub fn parse_model_json(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fence(text))
}
