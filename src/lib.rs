//! Build pipeline that turns sketch projects into installable Android APKs.
//!
//! The crate drives the Android SDK command-line tools through a fixed
//! sequence of stages and preprocesses sketch sources into Java:
//!
//! - **Preprocessor** - wraps a sketch in a class and hoists its imports
//! - **Stages** - clean, aapt2 compile/link, javac, d8/r8, packaging,
//!   optimize, zipalign, apksigner
//! - **Pipeline** - ordering, cancellation, listeners, statistics, worker thread
//! - **Preflight checks** - paths and tool binaries validated before a run
//! - **Project** - on-disk sketch project layout and `build.properties`
//!
//! # Architecture
//!
//! ```text
//! Project::prepare ──> BuildConfig
//!                          │
//! ApkBuilder::build ───────┤
//!     ├── preflight::validate_environment
//!     └── stages (in order) ──> ToolchainInvoker ──> aapt2, javac, d8, ...
//!                          │
//!                          └──> BuildListener events, RunStatistics, report
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use apk_builder::pipeline::{ApkBuilder, ChannelListener, OutputSink};
//! use apk_builder::project::Project;
//! use apk_builder::toolchain::Toolchain;
//!
//! let toolchain = Toolchain::resolve(&home)?;
//! let config = Project::open(&dir)?.prepare(&toolchain)?;
//!
//! let mut builder = ApkBuilder::new(toolchain, OutputSink::stdout());
//! let (listener, events) = ChannelListener::new();
//! builder.add_listener(Arc::new(listener));
//! let run = builder.build(config)?;
//! ```

pub mod config;
pub mod pipeline;
pub mod preflight;
pub mod preprocess;
pub mod process;
pub mod project;
pub mod stages;
pub mod toolchain;

#[cfg(test)]
mod testutil;

pub use config::{BuildConfig, BuildLayout};
pub use pipeline::{ApkBuilder, BuildError, BuildOutcome, BuildWorker};
pub use preprocess::preprocess;
