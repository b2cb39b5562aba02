//! GPU pipeline provisioning for Slang shaders.
//!
//! This library keeps a render loop supplied with pipeline objects built from
//! `.slang` files, compiling on worker threads and reloading when files change.
//!
//! # How it works
//!
//! * a [`PipelineRecipe`](descriptor::PipelineRecipe) names the shader files of each
//!   stage and the fixed-function state,
//! * the [`Provisioner`](provisioner::Provisioner) resolves the shaders to module
//!   fingerprints, compiles them through the
//!   [`slang-module-cache`](slang_module_cache) module cache and builds the
//!   [pipeline](builder::PipelineBuilder) through the host's
//!   [graphics backend](backend::GraphicsBackend),
//! * built pipelines are kept in the [pipeline cache](pipeline_cache::PipelineCache)
//!   and destroyed only once no frame in flight uses them,
//! * the [hot-reload watcher](watcher::HotReloadWatcher) invalidates whatever was
//!   derived from a file that changed, while the render loop keeps drawing with the
//!   last pipeline that worked.

#![expect(clippy::pub_use, reason = "part of public API")]

pub use slang_module_cache;

pub mod backend;
pub mod builder;
pub mod config;
pub mod descriptor;
pub mod frame;
pub mod pipeline_cache;
pub mod provisioner;
pub mod task;
pub mod watcher;
