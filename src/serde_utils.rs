use serde_json::Value;

pub fn parse_body_to_value(text: &str) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    }
}

pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

pub fn sanitize_header_value(key: &str, value: &str) -> String {
    let lowered = key.to_ascii_lowercase();
    if lowered.contains("authorization")
        || lowered.contains("api-key")
        || lowered.contains("apikey")
        || lowered.contains("secret")
        || lowered.contains("token")
        || lowered.contains("cookie")
    {
        "***".into()
    } else {
        truncate_for_log(value, 64)
    }
}

pub fn summarize_json(value: &Value) -> String {
    truncate_for_log(&value.to_string(), 512)
}

/// Reads a string field, treating blank strings as absent.
pub fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Removes `key=...` query parameters from a URL before logging it.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, query)) => {
            let redacted = query
                .split('&')
                .map(|pair| match pair.split_once('=') {
                    Some((k, _)) if k.eq_ignore_ascii_case("key") => format!("{}=***", k),
                    _ => pair.to_string(),
                })
                .collect::<Vec<_>>()
                .join("&");
            format!("{}?{}", base, redacted)
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secrets_are_masked_in_headers() {
        assert_eq!(sanitize_header_value("Authorization", "Bearer abc"), "***");
        assert_eq!(sanitize_header_value("X-CSRF-Token", "abc"), "***");
        assert_eq!(sanitize_header_value("Content-Type", "application/json"), "application/json");
    }

    #[test]
    fn query_keys_are_redacted() {
        assert_eq!(
            redact_url("https://example.com/models?key=secret&alt=json"),
            "https://example.com/models?key=***&alt=json"
        );
        assert_eq!(redact_url("https://example.com"), "https://example.com");
    }

    #[test]
    fn blank_strings_read_as_missing() {
        let v = json!({ "a": "  ", "b": " x " });
        assert_eq!(non_empty_str(&v, "a"), None);
        assert_eq!(non_empty_str(&v, "b"), Some("x"));
        assert_eq!(non_empty_str(&v, "c"), None);
    }
}
