pub mod chat_files;
pub mod local_store;
pub mod personas;
pub mod snapshot;

pub use local_store::LocalStore;
pub use personas::{PersonaLibrary, PersonaUpdate};
pub use snapshot::SnapshotWriter;
