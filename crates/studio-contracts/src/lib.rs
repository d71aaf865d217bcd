pub mod chat;
pub mod conversation;
pub mod error;
pub mod events;
pub mod gallery;
pub mod jobs;
pub mod media;
pub mod models;
pub mod settings;

pub use error::{ErrorKind, StudioError, StudioResult};
