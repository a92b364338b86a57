pub mod config;
pub mod generation;
pub mod job_poller;
pub mod lorebook_matcher;
pub mod prompt_engine;
pub mod provider_adapter;
pub mod request;
pub mod service;
pub mod types;

pub use config::ChatConfig;
pub use generation::{GenerationClient, TextGenerator};
pub use service::{ChatService, ChatServiceParts, RestoreOffer, SendOutcome, FAILURE_MESSAGE};
