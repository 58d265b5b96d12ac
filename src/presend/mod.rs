//! Pre-send local message handling: construction of provisional drafts and
//! the authoritative snapshot store that tracks them until their send
//! resolves.

pub mod factory;
pub mod manager;

pub use factory::{FactoryProps, PresendMessageFactory, UploadHandle};
pub use manager::PresendEventsManager;
