//! Local-first email intelligence engine: multi-account ingestion,
//! on-device summarization/classification, hybrid retrieval, and
//! retrieval-augmented chat, with zero data leaving the device.

pub mod config;
pub mod credentials;
pub mod db;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod oauth;
pub mod pipeline;
pub mod retrieval;
pub mod transport;
pub mod types;
pub mod vectordb;

pub use config::{init_logging, AppPaths, Settings};
pub use engine::{AccountCredential, Engine, NewAccount};
pub use error::{EngineError, EngineResult};
