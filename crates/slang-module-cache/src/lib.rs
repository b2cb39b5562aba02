//! Compiler and cache of Slang shader modules.
//!
//! This library turns `.slang` source files into SPIR-V modules and makes sure
//! the same source is never compiled twice.
//!
//! # How it works
//!
//! * the [source store](source::SourceStore) loads a shader file, walks its
//!   `#include` graph and flattens it into a single text,
//! * the flattened text together with the [compile options](options::CompileOptions)
//!   is digested into a [`CompileFingerprint`](fingerprint::CompileFingerprint),
//! * the [module cache](module_cache::ModuleCache) hands out the module stored under
//!   that fingerprint, or runs a [compiler](compiler::ShaderCompiler) exactly once
//!   to produce it, no matter how many threads ask at the same time,
//! * compiled modules can optionally be [persisted on disk](disk::DiskModuleCache)
//!   and [exported](manifest) for build scripts.

pub mod coalesce;
pub mod command;
pub mod compiler;
pub mod diagnostic;
pub mod disk;
pub mod fingerprint;
pub mod manifest;
pub mod module;
pub mod module_cache;
pub mod options;
pub mod reflection;
pub mod source;
