use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SERVICE: &str = "romanbath";

pub fn ensure_data_dir(base: &Path) -> Result<PathBuf, String> {
    let dir = base.join(SERVICE);
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    Ok(dir)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn err_msg(module: &str, line: u32, msg: impl AsRef<str>) -> String {
    format!("[{}:{}] {}", module, line, msg.as_ref())
}

pub fn log_info(component: &str, message: impl AsRef<str>) {
    tracing::info!(component = component, "{}", message.as_ref());
}

pub fn log_warn(component: &str, message: impl AsRef<str>) {
    tracing::warn!(component = component, "{}", message.as_ref());
}

pub fn log_error(component: &str, message: impl AsRef<str>) {
    tracing::error!(component = component, "{}", message.as_ref());
}

pub fn log_debug(component: &str, message: impl AsRef<str>) {
    tracing::debug!(component = component, "{}", message.as_ref());
}
