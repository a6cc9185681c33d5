//! HTTP client for the bot messaging API.
//!
//! Every endpoint lives under a per-bot base path and answers with a JSON
//! envelope: `{"ok": true, "result": ...}` on success, or
//! `{"ok": false, "error_code": ..., "description": ...}` on failure.
//! The client exposes the three calls the delivery pipeline needs (identity
//! check, long-poll fetch, send) and classifies every failure into the
//! taxonomy in [`Error`].

pub mod chunk;
pub mod client;
pub mod error;
pub mod types;

pub use {
    chunk::{MAX_MESSAGE_LEN, chunk_text},
    client::ApiClient,
    error::{Error, Result},
    types::{BotIdentity, Envelope, RawUpdate},
};
