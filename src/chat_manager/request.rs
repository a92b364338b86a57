use serde_json::Value;

use crate::serde_utils::summarize_json;
use crate::utils::log_warn;

pub type Extractor = fn(&Value) -> Option<String>;

fn first_choice(data: &Value) -> Option<&Value> {
    data.get("choices").and_then(|c| c.as_array()).and_then(|c| c.first())
}

fn message_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        // Some providers return content as an array of typed parts.
        Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn choices_message_content(data: &Value) -> Option<String> {
    first_choice(data)
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(message_content)
}

fn choices_text(data: &Value) -> Option<String> {
    first_choice(data)
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

fn results_text(data: &Value) -> Option<String> {
    data.get("results")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .and_then(|r| r.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

fn top_level(key: &'static str) -> impl Fn(&Value) -> Option<String> {
    move |data| data.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn response_field(data: &Value) -> Option<String> {
    top_level("response")(data)
}

fn text_field(data: &Value) -> Option<String> {
    top_level("text")(data)
}

/// Response shapes in priority order. The first one that yields
/// non-empty text wins.
pub const RESPONSE_EXTRACTORS: &[(&str, Extractor)] = &[
    ("choices[].message.content", choices_message_content),
    ("choices[].text", choices_text),
    ("results[].text", results_text),
    ("response", response_field),
    ("text", text_field),
];

pub fn extract_text(data: &Value) -> Option<String> {
    RESPONSE_EXTRACTORS
        .iter()
        .find_map(|(_, extract)| extract(data).filter(|s| !s.is_empty()))
}

/// Like [`extract_text`] but yields an empty string, with a warning, when
/// no known shape matches.
pub fn extract_text_or_empty(data: &Value) -> String {
    match extract_text(data) {
        Some(text) => text,
        None => {
            log_warn(
                "generation",
                format!("unrecognized response shape: {}", summarize_json(data)),
            );
            String::new()
        }
    }
}

/// Error carried inside a 2xx body, e.g. `{"error": {...}}` from the proxy.
pub fn error_in_payload(data: &Value) -> Option<String> {
    let error = data.get("error")?;
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        _ => Some(
            crate::providers::util::extract_error_message(data)
                .unwrap_or_else(|| summarize_json(error)),
        ),
    }
}
