//! Core library for burning translated subtitles into videos.
//!
//! A job takes a source video through transcription, translation,
//! bidi shaping, rasterization and re-encoding. [`pipeline::SubtitlePipeline`]
//! is the entry point; the other modules are usable on their own.

pub mod composite;
pub mod config;
pub mod error;
pub mod job;
pub mod layout;
pub mod media;
pub mod openai;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod schedule;
pub mod session;
pub mod shape;
pub mod srt;
pub mod transcribe;
pub mod transcript;
pub mod translate;

pub use config::PipelineConfig;
pub use error::{ErrorKind, JobError, SubmitError};
pub use job::{JobId, JobReport, JobRequest, MediaSource};
pub use pipeline::{JobHandle, SubtitlePipeline};
