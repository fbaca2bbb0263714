//! Assetpack library
//!
//! Core functionality of the Assetpack bundler: resolution, the transform
//! pipeline and its cache, the asset graph, bundling, runtime injection,
//! naming and packaging.

pub mod assetpack;
pub mod bundler;
pub mod cache;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod graph;
pub mod namer;
pub mod packager;
pub mod plugins;
pub mod reporter;
pub mod resolver;
pub mod runtime;
pub mod transform;
pub mod types;
pub mod utils;
pub mod worker;

pub use assetpack::{Assetpack, BuildResult, BundleInfo};
pub use cli::Cli;
pub use config::{BuildOptions, Config};
pub use error::{BuildError, BuildFailure, Diagnostic};
