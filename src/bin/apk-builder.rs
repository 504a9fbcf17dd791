use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use apk_builder::pipeline::{ApkBuilder, BuildListener, BuildOutcome, BuildWorker, OutputSink};
use apk_builder::preprocess::Preprocessor;
use apk_builder::project::Project;
use apk_builder::toolchain::Toolchain;
use tracing_subscriber::EnvFilter;

/// Overrides the default toolchain home.
const HOME_ENV: &str = "APK_BUILDER_HOME";

fn usage() -> &'static str {
    "Usage:\n  apk-builder build <project_dir>\n  apk-builder preprocess <sketch.pde>\n  apk-builder new <parent_dir> <name>"
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [cmd, project] if cmd == "build" => build(Path::new(project)),
        [cmd, sketch] if cmd == "preprocess" => preprocess(Path::new(sketch)),
        [cmd, parent, name] if cmd == "new" => new_project(Path::new(parent), name),
        _ => bail!(usage()),
    }
}

/// Prints lifecycle events as they arrive on the build thread.
struct ProgressPrinter;

impl BuildListener for ProgressPrinter {
    fn on_build_started(&self) {
        println!("Build started");
    }

    fn on_build_progress(&self, label: &str, percent: u8) {
        println!("[{percent:>3}%] {label}");
    }

    fn on_build_completed(&self, _success: bool, message: &str) {
        println!("{message}");
    }

    fn on_build_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

fn toolchain_home() -> Result<PathBuf> {
    match std::env::var_os(HOME_ENV) {
        Some(home) => Ok(PathBuf::from(home)),
        None => Toolchain::default_home()
            .context("cannot determine the toolchain directory; set APK_BUILDER_HOME"),
    }
}

fn build(project_dir: &Path) -> Result<()> {
    let project = Project::open(project_dir)?;
    let toolchain = Toolchain::resolve(&toolchain_home()?)?;
    let config = project
        .prepare(&toolchain)
        .with_context(|| format!("preparing project '{}'", project_dir.display()))?;

    let mut builder = ApkBuilder::new(toolchain, OutputSink::stdout());
    builder.add_listener(Arc::new(ProgressPrinter));
    let worker = BuildWorker::new(Arc::new(builder));

    let handle = worker.start(config)?;
    let run = match handle.join() {
        Ok(run) => run,
        Err(_) => bail!("build worker panicked"),
    };

    match run.outcome {
        BuildOutcome::Success { package } => {
            println!("APK: {}", package.display());
            Ok(())
        }
        BuildOutcome::Failed(err) => Err(err.into()),
        BuildOutcome::Stopped => bail!("build stopped"),
    }
}

fn preprocess(sketch: &Path) -> Result<()> {
    let java = Preprocessor::default().preprocess_file(sketch)?;
    print!("{java}");
    Ok(())
}

fn new_project(parent: &Path, name: &str) -> Result<()> {
    let project = Project::create(parent, name)?;
    println!("Created project at {}", project.root.display());
    Ok(())
}
