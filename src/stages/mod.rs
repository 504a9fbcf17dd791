//! Pipeline stages.
//!
//! Each stage is one step of the fixed APK pipeline. Stages are stateless:
//! everything they need comes from the [`StageContext`], and they hand their
//! results to later stages through the directories in
//! [`BuildLayout`](crate::config::BuildLayout) plus the current package path.
//!
//! | # | Stage | Tool |
//! |---|-------|------|
//! | 1 | [`clean::Clean`] | none |
//! | 2 | [`compile_resources::CompileResources`] | `aapt2 compile` |
//! | 3 | [`link_resources::LinkResources`] | `aapt2 link` |
//! | 4 | [`compile_sources::CompileSources`] | `javac` |
//! | 5 | [`convert_bytecode::ConvertBytecode`] | `d8` / `r8` |
//! | 6 | [`package_resources::PackageResources`] | in-process zip |
//! | 7 | [`optimize::Optimize`] | `aapt2 optimize` |
//! | 8 | [`align::Align`] | `zipalign` |
//! | 9 | [`sign::Sign`] | `apksigner` |

pub mod align;
pub mod clean;
pub mod compile_resources;
pub mod compile_sources;
pub mod convert_bytecode;
pub mod link_resources;
pub mod optimize;
pub mod package_resources;
pub mod sign;

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::{BuildConfig, BuildLayout};
use crate::pipeline::{CancellationToken, OutputSink};
use crate::process::{Cmd, ToolOutput, ToolchainInvoker};
use crate::toolchain::Toolchain;

/// One step of the pipeline.
pub trait Stage: Send + Sync {
    /// Stable identifier used in statistics and failures.
    fn name(&self) -> &'static str;

    /// Human-readable progress label.
    fn label(&self) -> &'static str;

    /// Fixed progress percentage reported before the stage runs.
    fn progress(&self) -> u8;

    /// Config-gated stages return false when switched off; they are skipped.
    fn enabled(&self, _config: &BuildConfig) -> bool {
        true
    }

    /// Run the stage, returning the artifacts it produced.
    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>>;
}

/// The nine stages in pipeline order.
pub fn standard_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(clean::Clean),
        Box::new(compile_resources::CompileResources),
        Box::new(link_resources::LinkResources),
        Box::new(compile_sources::CompileSources),
        Box::new(convert_bytecode::ConvertBytecode),
        Box::new(package_resources::PackageResources),
        Box::new(optimize::Optimize),
        Box::new(align::Align),
        Box::new(sign::Sign),
    ]
}

/// Everything a stage may read, plus the package handoff slot.
pub struct StageContext<'a> {
    pub config: &'a BuildConfig,
    pub layout: &'a BuildLayout,
    pub toolchain: &'a Toolchain,
    invoker: &'a dyn ToolchainInvoker,
    cancel: &'a CancellationToken,
    sink: &'a OutputSink,
    /// Latest package written by a packaging stage; the next one reads it.
    pub package: Option<PathBuf>,
}

impl<'a> StageContext<'a> {
    pub fn new(
        config: &'a BuildConfig,
        layout: &'a BuildLayout,
        toolchain: &'a Toolchain,
        invoker: &'a dyn ToolchainInvoker,
        cancel: &'a CancellationToken,
        sink: &'a OutputSink,
    ) -> Self {
        Self {
            config,
            layout,
            toolchain,
            invoker,
            cancel,
            sink,
            package: None,
        }
    }

    /// Run a tool, echoing the command line and its output in debug mode.
    pub fn run(&self, cmd: Cmd) -> Result<ToolOutput> {
        let invocation = cmd.invocation();
        info!(tool = %invocation.tool_name(), "invoking tool");
        if self.config.debug_mode {
            self.sink.line(format_args!("  $ {}", invocation.command_line()));
        }
        let output = cmd.run_with(self.invoker, self.cancel)?;
        if self.config.debug_mode {
            for text in [&output.stdout, &output.stderr] {
                let text = text.trim_end();
                if !text.is_empty() {
                    self.sink.line(text);
                }
            }
        }
        Ok(output)
    }

    pub fn sink(&self) -> &OutputSink {
        self.sink
    }

    /// Package produced by an earlier stage.
    pub fn current_package(&self) -> Result<PathBuf> {
        let package = self
            .package
            .clone()
            .context("no package was produced by an earlier stage")?;
        crate::process::ensure_exists(&package, "Input package")?;
        Ok(package)
    }
}

/// All files under `root` with extension `ext`, sorted for stable tool input.
pub fn collect_files(root: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(ext)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Add every file under `root` to `writer`, named `prefix` + the path relative
/// to `root` with `/` separators. Returns the number of entries written.
pub(crate) fn add_tree<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    root: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        add_file(writer, entry.path(), &format!("{prefix}{name}"), options)?;
        count += 1;
    }
    Ok(count)
}

pub(crate) fn add_file<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    writer
        .start_file(name, options)
        .with_context(|| format!("adding '{name}' to archive"))?;
    let mut file =
        File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    io::copy(&mut file, writer).with_context(|| format!("writing '{name}' to archive"))?;
    Ok(())
}

/// Create the parent directory of an output file.
pub(crate) fn prepare_output(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale output '{}'", path.display()))?;
    }
    Ok(())
}
