pub mod abort_manager;
pub mod backend;
pub mod chat_manager;
pub mod coalescer;
pub mod error;
pub mod logger;
pub mod providers;
pub mod secrets;
pub mod serde_utils;
pub mod settings;
pub mod storage_manager;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

pub use backend::BackendClient;
pub use chat_manager::{ChatConfig, ChatService, SendOutcome};
pub use error::{AppError, ChatError, GenerationError, GenerationErrorKind};
pub use settings::ClientSettings;

use backend::{ChatArchive, SecretSink, SettingsStore};
use chat_manager::{ChatServiceParts, GenerationClient};
use providers::ConnectionTester;
use secrets::{EnvDefaults, KeyStore};
use storage_manager::LocalStore;

/// Wires the service against the configured backend and local database,
/// then loads the chat config. Logging is installed first so startup
/// problems land in the log.
pub async fn connect(settings: &ClientSettings) -> Result<ChatService> {
    logger::init_logging(settings.log_filter.as_deref(), settings.log_dir.as_deref())
        .map_err(anyhow::Error::msg)
        .context("failed to initialize logging")?;

    let data_dir = utils::ensure_data_dir(&settings.data_dir)
        .map_err(anyhow::Error::msg)
        .context("failed to prepare data directory")?;
    let local = LocalStore::open(&data_dir.join("local.db"))
        .map_err(anyhow::Error::msg)
        .context("failed to open local store")?;

    let timeout = Duration::from_millis(settings.request_timeout_ms);
    let backend = Arc::new(
        BackendClient::new(&settings.backend_url, timeout).context("failed to build backend client")?,
    );
    let generator = GenerationClient::new(backend.clone(), timeout)
        .context("failed to build generation client")?;

    let secret_sink: Arc<dyn SecretSink> = backend.clone();
    let archive: Arc<dyn ChatArchive> = backend.clone();
    let settings_store: Arc<dyn SettingsStore> = backend;

    let service = ChatService::new(ChatServiceParts {
        keys: KeyStore::new(local.clone(), Some(secret_sink), EnvDefaults::from_process_env()),
        local,
        archive,
        settings: settings_store,
        generator: Arc::new(generator),
        tester: ConnectionTester::new(),
    });
    service.load_config().await;
    utils::log_info(
        "startup",
        format!("connected to {}", settings.backend_url),
    );
    Ok(service)
}
