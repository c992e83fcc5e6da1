//! domstats Common Library
//!
//! This crate provides the shared datasource model, system constants and
//! configuration loading utilities for all domstats workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide constants (paths, bounds, sampling defaults)
//! - [`ds`] - Datasource descriptors, owners and samples
//! - [`config`] - Configuration loading traits and types
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! domstats = { package = "domstats_common", path = "../domstats_common" }
//! ```
//!
//! Then import:
//! ```rust,ignore
//! use domstats::consts::*;
//! use domstats::config::{ConfigLoader, DaemonConfig};
//! ```

pub mod config;
pub mod consts;
pub mod ds;
