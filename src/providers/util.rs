use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use super::config::AuthScheme;

/// Builds request headers for a key-authenticated call. Query-string
/// schemes add nothing here; see [`apply_query_key`].
pub fn build_headers(auth: AuthScheme, api_key: Option<&str>) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let key = match api_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => return Ok(headers),
    };

    match auth {
        AuthScheme::Bearer => {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e| {
                    crate::utils::err_msg(
                        module_path!(),
                        line!(),
                        format!("invalid authorization header: {e}"),
                    )
                })?,
            );
        }
        AuthScheme::Header(name) => {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                crate::utils::err_msg(module_path!(), line!(), format!("invalid header name: {e}"))
            })?;
            headers.insert(
                header,
                HeaderValue::from_str(key).map_err(|e| {
                    crate::utils::err_msg(
                        module_path!(),
                        line!(),
                        format!("invalid {} header: {e}", name),
                    )
                })?,
            );
        }
        AuthScheme::QueryKey(_) | AuthScheme::None => {}
    }
    Ok(headers)
}

pub fn apply_query_key(url: &str, auth: AuthScheme, api_key: Option<&str>) -> String {
    match (auth, api_key.map(str::trim).filter(|k| !k.is_empty())) {
        (AuthScheme::QueryKey(param), Some(key)) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!(
                "{}{}{}={}",
                url,
                sep,
                urlencoding::encode(param),
                urlencoding::encode(key)
            )
        }
        _ => url.to_string(),
    }
}

/// Best-effort human message from a provider error body.
pub fn extract_error_message(payload: &Value) -> Option<String> {
    if let Some(s) = payload.as_str() {
        let trimmed = s.trim();
        return (!trimmed.is_empty()).then(|| trimmed.to_string());
    }
    if let Some(error) = payload.get("error") {
        if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
        if error.as_bool() == Some(true) {
            if let Some(message) = payload.get("message").and_then(|m| m.as_str()) {
                return Some(message.to_string());
            }
        }
    }
    payload
        .get("message")
        .or_else(|| payload.get("detail"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}
