pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ffmpeg;
pub mod jobs;
pub mod pipeline;
pub mod probe;
pub mod types;

pub use api::{router, AppState};
pub use config::Config;
pub use jobs::JobRegistry;
