pub mod batch;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod jobs;
pub mod media;
pub mod plan;
pub mod predict;
pub mod settings;
pub mod sidecar_api;
