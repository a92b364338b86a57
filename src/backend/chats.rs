use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::BackendClient;
use crate::error::AppError;
use crate::utils::log_info;

/// One entry of a character's chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChatSummary {
    pub file_name: String,
    pub file_id: Option<String>,
    pub file_size: Option<String>,
    pub message_count: Option<u64>,
    pub chat_items: Option<u64>,
    pub mes: Option<String>,
    pub last_mes: Option<Value>,
    pub preview_message: Option<String>,
    pub avatar: Option<String>,
}

fn parse_summaries(data: &Value) -> Vec<ChatSummary> {
    data.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<ChatSummary>(item.clone()).ok())
                .filter(|s| !s.file_name.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub async fn save_chat(
    client: &BackendClient,
    character_id: &str,
    file_name: &str,
    records: Vec<Value>,
) -> Result<(), AppError> {
    let count = records.len();
    let data = client
        .post_json(
            "/api/chats/save",
            &json!({ "avatar_url": character_id, "file_name": file_name, "chat": records }),
        )
        .await?;
    if data.get("result").and_then(|r| r.as_str()) != Some("ok") {
        return Err(AppError::Other(format!(
            "chat save for {} was not acknowledged",
            file_name
        )));
    }
    log_info("backend", format!("saved {} ({} records)", file_name, count));
    Ok(())
}

pub async fn get_chat(
    client: &BackendClient,
    character_id: &str,
    file_name: &str,
) -> Result<Vec<Value>, AppError> {
    let data = client
        .post_json(
            "/api/chats/get",
            &json!({ "avatar_url": character_id, "file_name": file_name }),
        )
        .await?;
    Ok(data.as_array().cloned().unwrap_or_default())
}

/// Chat files for one character, most recent first.
pub async fn search_chats(client: &BackendClient, character_id: &str) -> Result<Vec<ChatSummary>, AppError> {
    let data = client
        .post_json(
            "/api/chats/search",
            &json!({ "avatar_url": character_id, "query": "" }),
        )
        .await?;
    Ok(parse_summaries(&data))
}

pub async fn recent_chats(client: &BackendClient, max: usize) -> Result<Vec<ChatSummary>, AppError> {
    let data = client
        .post_json("/api/chats/recent", &json!({ "max": max }))
        .await?;
    Ok(parse_summaries(&data))
}

pub async fn delete_chat(client: &BackendClient, character_id: &str, file_name: &str) -> Result<(), AppError> {
    client
        .post_json(
            "/api/chats/delete",
            &json!({ "avatar_url": character_id, "chatfile": file_name }),
        )
        .await?;
    Ok(())
}

pub async fn rename_chat(
    client: &BackendClient,
    character_id: &str,
    original_file: &str,
    renamed_file: &str,
) -> Result<(), AppError> {
    client
        .post_json(
            "/api/chats/rename",
            &json!({
                "avatar_url": character_id,
                "original_file": original_file,
                "renamed_file": renamed_file,
            }),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn client_for(server: &mockito::ServerGuard) -> BackendClient {
        let client = BackendClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        client.set_csrf_token("t").await;
        client
    }

    #[tokio::test]
    async fn save_requires_ok_result() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server).await;
        let _m = server
            .mock("POST", "/api/chats/save")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"avatar_url":"alice.png","file_name":"Alice - 2025-1-2 @3h 4m 5s 6ms"}"#.into(),
            ))
            .with_body(r#"{"result":"ok"}"#)
            .create_async()
            .await;
        save_chat(&client, "alice.png", "Alice - 2025-1-2 @3h 4m 5s 6ms", vec![json!({})])
            .await
            .unwrap();

        let _m = server
            .mock("POST", "/api/chats/save")
            .match_body(mockito::Matcher::PartialJsonString(r#"{"file_name":"other"}"#.into()))
            .with_body(r#"{"result":"nope"}"#)
            .create_async()
            .await;
        assert!(save_chat(&client, "alice.png", "other", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn search_parses_summaries() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server).await;
        let _m = server
            .mock("POST", "/api/chats/search")
            .with_body(
                r#"[{"file_name":"Alice - 2025-1-2.jsonl","message_count":4,"file_size":"2 kb"},{"bogus":true}]"#,
            )
            .create_async()
            .await;
        let list = search_chats(&client, "alice.png").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].file_name, "Alice - 2025-1-2.jsonl");
        assert_eq!(list[0].message_count, Some(4));
    }

    #[tokio::test]
    async fn recent_chats_sends_limit() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server).await;
        let _m = server
            .mock("POST", "/api/chats/recent")
            .match_body(mockito::Matcher::Json(json!({ "max": 3 })))
            .with_body(r#"[{"file_name":"b.jsonl","avatar":"bob.png"}]"#)
            .create_async()
            .await;
        let list = recent_chats(&client, 3).await.unwrap();
        assert_eq!(list[0].avatar.as_deref(), Some("bob.png"));
    }

    #[tokio::test]
    async fn rename_and_delete_post_expected_fields() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server).await;
        let rename = server
            .mock("POST", "/api/chats/rename")
            .match_body(mockito::Matcher::Json(json!({
                "avatar_url": "alice.png",
                "original_file": "a.jsonl",
                "renamed_file": "b.jsonl"
            })))
            .with_body("{}")
            .create_async()
            .await;
        let delete = server
            .mock("POST", "/api/chats/delete")
            .match_body(mockito::Matcher::Json(json!({
                "avatar_url": "alice.png",
                "chatfile": "b.jsonl"
            })))
            .with_body("{}")
            .create_async()
            .await;
        rename_chat(&client, "alice.png", "a.jsonl", "b.jsonl").await.unwrap();
        delete_chat(&client, "alice.png", "b.jsonl").await.unwrap();
        rename.assert_async().await;
        delete.assert_async().await;
    }
}
