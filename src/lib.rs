//! pack - build OCI images from source with Cloud Native Buildpacks
//!
//! Selects a builder, runs the CNB lifecycle phases in ephemeral
//! containers and exports an app image on top of a run image. Also
//! assembles builders, buildpack packages and manifest lists.

pub mod archive;
pub mod build;
pub mod builder;
pub mod buildpack;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod creds;
pub mod error;
pub mod image;
pub mod inspect;
pub mod lifecycle;
pub mod manifest;
pub mod orchestration;
pub mod package;
pub mod rebase;
pub mod trust;
pub mod ui;

pub use client::Client;
pub use error::{PackError, PackResult};
