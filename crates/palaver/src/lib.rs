//! Command-line runner for the deliberation core: input loading, an
//! OpenAI-compatible completion client and the run's output sinks.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod openai;
pub mod personas;
pub mod plan;
pub mod telemetry;

pub use error::LoadError;
