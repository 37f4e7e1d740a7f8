//! `roadseg`: patch-based road segmentation tooling.
//!
//! This crate ties the workspace together: backend selection, the run
//! configuration and the commands behind the `roadseg` binary.

pub mod backend;
pub mod commands;
pub mod config;

pub use config::{write_config_file, ConfigOverrides, RunConfig};

#[doc(inline)]
pub use roadseg_data as data;
#[doc(inline)]
pub use roadseg_submission as submission;
#[doc(inline)]
pub use roadseg_util as util;
