//! Structured output: JSON-schema format instructions and a tolerant decoder.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("model answer contains no JSON value")]
    NoJson,
    #[error("model answer does not match the expected structure: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Instructions appended to the user message asking the model to answer
/// with JSON matching `T`'s schema.
pub fn format_instructions<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        "\n\nRespond with JSON only: a single RFC 8259 compliant value and no explanations.\n\
         Do not wrap the response in markdown code fences.\n\
         The JSON must conform to this JSON Schema:\n{}\n",
        schema
    )
}

/// Decode a model answer into `T`.
///
/// Accepts bare JSON, JSON inside a markdown code fence, and JSON
/// surrounded by prose (the outermost object or array is used).
pub fn decode_entity<T: DeserializeOwned>(text: &str) -> Result<T, OutputError> {
    let trimmed = strip_fences(text.trim());
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find(['{', '[']).ok_or(OutputError::NoJson)?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(close).filter(|&end| end > start).ok_or(OutputError::NoJson)?;
    Ok(serde_json::from_str(&trimmed[start..=end])?)
}

fn strip_fences(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string (e.g. "json") on the opening fence line
    let body = body.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
