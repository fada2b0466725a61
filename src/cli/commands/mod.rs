//! CLI command implementations
//!
//! Each command parses its flags into library options, calls one
//! [`Client`] operation and renders the result.

pub mod build;
pub mod builder;
pub mod buildpack;
pub mod completion;
pub mod config;
pub mod inspect_image;
pub mod manifest;
pub mod rebase;

pub use build::execute as build;
pub use builder::execute as builder;
pub use buildpack::execute as buildpack;
pub use completion::execute as completion;
pub use config::execute as config;
pub use inspect_image::execute as inspect_image;
pub use manifest::execute as manifest;
pub use rebase::execute as rebase;

use crate::client::Client;
use crate::config::{Config, ConfigManager};
use crate::error::{PackError, PackResult};
use crate::image::PullPolicy;
use crate::lifecycle::Interrupt;
use std::collections::BTreeMap;

/// Client wired to Ctrl-C; the listener lives as long as the process
pub(crate) async fn connect(manager: &ConfigManager, config: Config, docker_host: Option<&str>) -> PackResult<Client> {
    let interrupt = Interrupt::new();
    interrupt.listen_for_signals();
    Ok(Client::new(manager, config, docker_host).await?.with_interrupt(interrupt))
}

/// `--pull-policy` value, else the configured default
pub(crate) fn pull_policy(flag: Option<&str>, config: &Config) -> PackResult<PullPolicy> {
    match flag.or(config.pull_policy.as_deref()) {
        Some(raw) => raw.parse(),
        None => Ok(PullPolicy::default()),
    }
}

/// `KEY=VALUE` items into a map; later keys win
pub(crate) fn parse_pairs(items: &[String], what: &str) -> PackResult<BTreeMap<String, String>> {
    items
        .iter()
        .map(|item| match item.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(PackError::invalid(format!("{} '{}' must be KEY=VALUE", what, item))),
        })
        .collect()
}
