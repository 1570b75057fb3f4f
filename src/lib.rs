//! # Agent Bridge
//!
//! Uniform streaming interface over CLI coding-agent backends
//! (Claude Code, Cursor, Codex, OpenCode).
//!
//! This library provides:
//! - A provider registry that routes a model id to the backend that serves it
//! - Installation and authentication detection for each backend CLI
//! - Subprocess execution with JSONL stream normalization into one message shape
//! - An HTTP API that exposes executions as Server-Sent Events
//!
//! ## Architecture
//!
//! ```text
//!   ExecuteOptions ──► ProviderRegistry ──► Provider (claude | cursor | codex | opencode)
//!                                               │
//!                             Detector ◄────────┤ locate CLI, build args
//!                                               ▼
//!                                        CLI subprocess (stdin: prompt)
//!                                               │ JSONL
//!                                               ▼
//!                      EventNormalizer ─► TextDedup ─► session backfill ─► ProviderMessage
//! ```
//!
//! ## Modules
//! - `backend`: providers, discovery, process streaming and normalization
//! - `exec`: native and WSL command construction
//! - `api`: HTTP surface
//! - `config`: environment configuration

pub mod api;
pub mod backend;
pub mod config;
pub mod exec;
pub mod util;

pub use backend::events::{ContentBlock, ProviderMessage};
pub use backend::registry::{register_all_backends, ProviderRegistry};
pub use backend::{execute, ExecuteOptions, Provider};
pub use config::Config;
