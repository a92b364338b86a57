//! Remote chat-file records and the naming/date conventions of the backend.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::backend::{ChatArchive, ChatSummary};
use crate::chat_manager::types::{Message, Role};
use crate::error::AppError;
use crate::utils::{log_info, log_warn};

const SEND_DATE_FORMAT: &str = "%B %-d, %Y %-I:%M %p";
const SEND_DATE_PARSE: &str = "%B %d, %Y %I:%M %p";
const CREATE_DATE_FORMAT: &str = "%Y-%m-%d@%Hh%Mh%Ss";
const CHAT_EXTENSION: &str = ".jsonl";

fn local_time(ms: u64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(ms as i64)
        .earliest()
        .unwrap_or_else(Local::now)
}

/// `Month D, YYYY H:MM AM` in local time. Seconds are dropped.
pub fn format_send_date(ms: u64) -> String {
    local_time(ms).format(SEND_DATE_FORMAT).to_string()
}

pub fn parse_send_date(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<u64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return u64::try_from(dt.timestamp_millis()).ok();
    }
    let normalized = raw.replacen(" at ", " ", 1);
    let naive = NaiveDateTime::parse_from_str(&normalized, SEND_DATE_PARSE).ok()?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    u64::try_from(local.timestamp_millis()).ok()
}

/// Serializes a transcript into backend chat records: one header record,
/// then one record per message. The thinking placeholder is never written.
pub fn to_records(messages: &[Message], user_name: &str, character_name: &str, now_ms: u64) -> Vec<Value> {
    let created = Utc
        .timestamp_millis_opt(now_ms as i64)
        .earliest()
        .unwrap_or_else(Utc::now);
    let mut records = Vec::with_capacity(messages.len() + 1);
    records.push(json!({
        "user_name": user_name,
        "character_name": character_name,
        "create_date": created.format(CREATE_DATE_FORMAT).to_string(),
        "chat_metadata": { "integrity": uuid::Uuid::new_v4().to_string() },
    }));
    for message in messages.iter().filter(|m| !m.is_thinking) {
        let is_user = message.role == Role::User;
        records.push(json!({
            "name": if is_user { user_name } else { character_name },
            "is_user": is_user,
            "is_system": false,
            "send_date": format_send_date(message.timestamp),
            "mes": message.content,
            "extra": {},
        }));
    }
    records
}

/// Maps records back to messages, discarding the header. Dates that fail to
/// parse fall back to `now_ms`.
pub fn from_records(records: &[Value], now_ms: u64) -> Vec<Message> {
    records
        .iter()
        .filter_map(|record| {
            let content = record.get("mes")?.as_str()?;
            Some((record, content))
        })
        .enumerate()
        .map(|(i, (record, content))| {
            let is_user = record.get("is_user").and_then(|v| v.as_bool()).unwrap_or(false);
            let timestamp = match record.get("send_date") {
                Some(Value::Number(n)) => n.as_u64(),
                Some(Value::String(s)) => parse_send_date(s),
                _ => None,
            }
            .unwrap_or(now_ms);
            Message {
                id: format!("msg-{}-{}", i, now_ms),
                role: if is_user { Role::User } else { Role::Model },
                content: content.to_string(),
                timestamp,
                is_thinking: false,
            }
        })
        .collect()
}

/// `{name} - {Y}-{M}-{D} @{H}h {m}m {s}s {ms}ms`, local time, no padding.
pub fn new_chat_file_name(character_name: &str, now_ms: u64) -> String {
    let t = local_time(now_ms);
    t.format(&format!(
        "{} - %Y-%-m-%-d @%-Hh %-Mm %-Ss {}ms",
        character_name.replace('%', "%%"),
        now_ms % 1000
    ))
    .to_string()
}

pub fn strip_chat_extension(file_name: &str) -> &str {
    file_name.strip_suffix(CHAT_EXTENSION).unwrap_or(file_name)
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

/// Human age of a snapshot for the restore prompt.
pub fn describe_since(last_updated_ms: u64, now_ms: u64) -> String {
    let minutes = now_ms.saturating_sub(last_updated_ms) / 60_000;
    let hours = minutes / 60;
    let days = hours / 24;
    if days > 0 {
        plural(days, "day")
    } else if hours > 0 {
        plural(hours, "hour")
    } else if minutes > 0 {
        plural(minutes, "minute")
    } else {
        "just now".to_string()
    }
}

pub async fn save_remote(
    archive: &dyn ChatArchive,
    character_id: &str,
    file_name: &str,
    messages: &[Message],
    user_name: &str,
    character_name: &str,
    now_ms: u64,
) -> Result<(), AppError> {
    let records = to_records(messages, user_name, character_name, now_ms);
    archive
        .save_chat(character_id, strip_chat_extension(file_name), records)
        .await
}

pub async fn load_remote(
    archive: &dyn ChatArchive,
    character_id: &str,
    file_name: &str,
    now_ms: u64,
) -> Result<Vec<Message>, AppError> {
    let records = archive
        .load_chat(character_id, strip_chat_extension(file_name))
        .await?;
    let messages = from_records(&records, now_ms);
    log_info(
        "chat_files",
        format!("loaded {} messages from {}", messages.len(), file_name),
    );
    Ok(messages)
}

/// Chat files for a character, most recent first. Failures yield an empty
/// list so a character switch can still start a fresh transcript.
pub async fn list_remote(archive: &dyn ChatArchive, character_id: &str) -> Vec<ChatSummary> {
    match archive.list_chats(character_id).await {
        Ok(list) => list,
        Err(err) => {
            log_warn("chat_files", format!("listing chats for {} failed: {}", character_id, err));
            Vec::new()
        }
    }
}
