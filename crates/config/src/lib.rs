//! Configuration loading for the courier pipeline.
//!
//! A single TOML file (`courier.toml`, project-local or in the user config
//! directory) with `${ENV_VAR}` substitution in string values. Every knob
//! has a default, so a missing file yields a runnable configuration — only
//! the API token has to come from somewhere (file or environment).

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, find_config_file, load_config},
    schema::{ApiSection, CourierConfig, PipelineSection, StorageSection},
};
