//! Generation engine: provider adapters behind a local proxy, the job
//! queue, the media gallery and the streaming chat tool loop.

pub mod chat;
pub mod config;
pub mod gallery;
pub mod generator;
pub mod http;
pub mod polling;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod sse;
pub mod studio;
pub mod tool_loop;

pub use config::{resolve_credential, SharedSettings, StudioConfig};
pub use gallery::{Gallery, SaveOutcome};
pub use generator::Generator;
pub use queue::{JobQueue, JobWorker};
pub use studio::{ChatSession, SessionReply, Studio, StudioParts};
