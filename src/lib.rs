//! Download maps from fastdownload mirrors.
//!
//! The pieces, leaves first:
//!
//! - [`progress`]: listener lists and per-stage progress runs
//! - [`download`]: the transfer and bzip2 stages, and the single-flight job queue
//! - [`filtered_list`]: a cached view over a list, through a chain of stateful filters
//! - [`maps`]: the map model, its filters, mirror discovery and the installed maps
//! - [`catalog`]: the standard filter chain over every listed map
//!
//! [`commands`] wires them together for the `mapdl` binary.

pub mod catalog;
pub mod commands;
pub mod config;
pub mod download;
pub mod filtered_list;
pub mod maps;
pub mod progress;
pub mod status;
pub mod util;
