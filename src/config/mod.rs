//! Configuration module for Sumi-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every table except `[site]` may be omitted; omitted keys take the defaults
//! the harvester was tuned with (42 items per page, 3 s between downloads, ...).
//!
//! # Example
//!
//! ```no_run
//! use sumi_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting tags: {}", config.site.tags);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{Config, CrawlerConfig, HttpConfig, OutputConfig, SiteConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
