//! Build orchestration.
//!
//! [`ApkBuilder`] owns the toolchain, the output sink and the listener list,
//! and runs the fixed stage sequence for one [`BuildConfig`] at a time:
//!
//! ```text
//! Idle -> Running -> Completed | Failed | Stopped
//! ```
//!
//! Preflight runs first; an environment problem fails the build before any
//! stage. Stages then run strictly in order with a cancellation check before
//! each one and once after the last. The first failing stage ends the run.
//! Statistics are printed to the sink at the end of every run, and a JSON
//! report is written to the build directory once preflight has passed.
//!
//! [`BuildWorker`] runs the same thing on a dedicated thread.

mod cancel;
mod error;
mod listener;
pub(crate) mod paths;
mod report;
mod sink;
mod stats;
mod worker;

pub use cancel::CancellationToken;
pub use error::BuildError;
pub use listener::{BuildEvent, BuildListener, ChannelListener};
pub use report::RunReport;
pub use sink::OutputSink;
pub use stats::{RunStatistics, StageOutcome, StageRecord};
pub use worker::BuildWorker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{BuildConfig, BuildLayout};
use crate::preflight;
use crate::process::{Interrupted, SystemInvoker, ToolchainInvoker};
use crate::stages::{standard_stages, Stage, StageContext};
use crate::toolchain::Toolchain;
use listener::Listeners;

/// Lifecycle state of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Every enabled stage completed; `package` is the final archive.
    Success { package: PathBuf },
    Failed(BuildError),
    Stopped,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn package(&self) -> Option<&Path> {
        match self {
            Self::Success { package } => Some(package),
            _ => None,
        }
    }
}

/// Outcome plus per-stage statistics of a finished run.
#[derive(Debug, Clone)]
pub struct BuildRun {
    pub outcome: BuildOutcome,
    pub statistics: RunStatistics,
}

/// Proof that the caller holds the builder's in-progress flag. The flag is
/// cleared when the claim is dropped.
pub struct RunClaim {
    flag: Arc<AtomicBool>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs the APK pipeline.
pub struct ApkBuilder {
    toolchain: Toolchain,
    invoker: Arc<dyn ToolchainInvoker>,
    sink: OutputSink,
    listeners: Listeners,
    stages: Vec<Box<dyn Stage>>,
    building: Arc<AtomicBool>,
    cancel: CancellationToken,
    state: Mutex<BuildState>,
}

impl ApkBuilder {
    pub fn new(toolchain: Toolchain, sink: OutputSink) -> Self {
        Self {
            toolchain,
            invoker: Arc::new(SystemInvoker),
            sink,
            listeners: Listeners::default(),
            stages: standard_stages(),
            building: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            state: Mutex::new(BuildState::Idle),
        }
    }

    /// Replace the process runner.
    pub fn with_invoker(mut self, invoker: Arc<dyn ToolchainInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn BuildListener>) {
        self.listeners.add(listener);
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Request cancellation of the running build.
    pub fn stop(&self) {
        info!("stop requested");
        self.cancel.cancel();
    }

    /// Token observed by the running build; cancelling it equals [`stop`](Self::stop).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BuildState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a build on the calling thread.
    ///
    /// Fails only when another build holds this builder; every other problem
    /// is reported through the returned [`BuildRun`] and the listeners.
    pub fn build(&self, config: BuildConfig) -> Result<BuildRun, BuildError> {
        let claim = self.claim()?;
        Ok(self.run_claimed(claim, config))
    }

    /// Take the in-progress flag and clear any stale stop request.
    pub fn claim(&self) -> Result<RunClaim, BuildError> {
        if self
            .building
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("build rejected, another build is in progress");
            return Err(BuildError::AlreadyBuilding);
        }
        self.cancel.reset();
        Ok(RunClaim {
            flag: Arc::clone(&self.building),
        })
    }

    /// Run a build with a claim obtained from [`claim`](Self::claim).
    pub fn run_claimed(&self, claim: RunClaim, config: BuildConfig) -> BuildRun {
        let run_id = report::new_run_id();
        let started_at = report::now_utc_compact();
        self.set_state(BuildState::Running);
        info!(run_id = %run_id, package = %config.app_package, "build started");
        self.listeners.started();

        let mut statistics = RunStatistics::default();
        let outcome = match preflight::validate_environment(&config, &self.toolchain) {
            Err(err) => BuildOutcome::Failed(BuildError::Environment(format!("{err:#}"))),
            Ok(()) => {
                let layout = config.layout();
                let outcome = self.run_stages(&config, &layout, &mut statistics);
                match RunReport::new(run_id, started_at, &outcome, &statistics)
                    .and_then(|report| report.write(&layout.report))
                {
                    Ok(()) => debug!(path = %layout.report.display(), "build report written"),
                    Err(err) => warn!(error = %format!("{err:#}"), "could not write build report"),
                }
                outcome
            }
        };

        statistics.print(&self.sink);
        self.finish(&outcome);
        drop(claim);
        BuildRun {
            outcome,
            statistics,
        }
    }

    fn run_stages(
        &self,
        config: &BuildConfig,
        layout: &BuildLayout,
        statistics: &mut RunStatistics,
    ) -> BuildOutcome {
        let mut ctx = StageContext::new(
            config,
            layout,
            &self.toolchain,
            self.invoker.as_ref(),
            &self.cancel,
            &self.sink,
        );

        for stage in &self.stages {
            if self.cancel.is_cancelled() {
                return BuildOutcome::Stopped;
            }
            if !stage.enabled(config) {
                debug!(stage = stage.name(), "stage disabled, skipping");
                statistics.record(stage.name(), stage.label(), Duration::ZERO, StageOutcome::Skipped);
                continue;
            }

            self.listeners.progress(stage.label(), stage.progress());
            info!(stage = stage.name(), "stage started");
            let started = Instant::now();
            let result = stage.execute(&mut ctx);
            let elapsed = started.elapsed();

            match result {
                Ok(artifacts) => {
                    debug!(stage = stage.name(), artifacts = artifacts.len(), "stage completed");
                    statistics.record(stage.name(), stage.label(), elapsed, StageOutcome::Completed);
                }
                Err(err)
                    if self.cancel.is_cancelled()
                        || err.chain().any(|cause| cause.is::<Interrupted>()) =>
                {
                    info!(stage = stage.name(), "stage interrupted");
                    statistics.record(stage.name(), stage.label(), elapsed, StageOutcome::Interrupted);
                    return BuildOutcome::Stopped;
                }
                Err(err) => {
                    statistics.record(stage.name(), stage.label(), elapsed, StageOutcome::Failed);
                    return BuildOutcome::Failed(BuildError::Stage {
                        stage: stage.name(),
                        detail: format!("{err:#}"),
                    });
                }
            }
        }

        if self.cancel.is_cancelled() {
            return BuildOutcome::Stopped;
        }
        match ctx.package {
            Some(package) => BuildOutcome::Success { package },
            None => BuildOutcome::Failed(BuildError::Stage {
                stage: "package-resources",
                detail: "no package was produced".to_string(),
            }),
        }
    }

    fn finish(&self, outcome: &BuildOutcome) {
        match outcome {
            BuildOutcome::Success { package } => {
                info!(package = %package.display(), "build completed");
                self.set_state(BuildState::Completed);
                self.listeners.completed(true, "Build completed successfully");
            }
            BuildOutcome::Failed(err) => {
                error!(error = %err, "build failed");
                self.set_state(BuildState::Failed);
                let message = err.to_string();
                self.listeners.error(&message);
                self.listeners
                    .completed(false, &format!("Build failed: {message}"));
            }
            BuildOutcome::Stopped => {
                info!("build stopped");
                self.set_state(BuildState::Stopped);
                self.listeners.completed(false, "Build stopped");
            }
        }
    }

    fn set_state(&self, state: BuildState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Keystore;
    use crate::testutil::Fixture;
    use std::fs;
    use std::sync::mpsc::Receiver;
    use std::thread;

    fn subscribe(builder: &mut ApkBuilder) -> Receiver<BuildEvent> {
        let (listener, rx) = ChannelListener::new();
        builder.add_listener(Arc::new(listener));
        rx
    }

    fn progress(events: &[BuildEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                BuildEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn full_build_succeeds_with_ordered_events() {
        let fixture = Fixture::new();
        let mut builder = fixture.builder();
        let rx = subscribe(&mut builder);

        let run = builder.build(fixture.config.clone()).unwrap();
        let layout = fixture.config.layout();
        assert_eq!(
            run.outcome,
            BuildOutcome::Success {
                package: layout.signed_package()
            }
        );
        assert_eq!(builder.state(), BuildState::Completed);
        assert!(!builder.is_building());

        let events: Vec<BuildEvent> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&BuildEvent::Started));
        assert_eq!(progress(&events), vec![10, 20, 30, 40, 50, 60, 70, 80, 90]);
        assert_eq!(
            events.last(),
            Some(&BuildEvent::Completed {
                success: true,
                message: "Build completed successfully".into()
            })
        );
        assert!(layout.report.is_file());
    }

    #[test]
    fn disabled_align_is_skipped_without_progress() {
        let mut fixture = Fixture::new();
        let keystore = fixture.root().join("keys/release.jks");
        fs::write(&keystore, "ks").unwrap();
        fixture.config.align_enabled = false;
        fixture.config.sign_enabled = true;
        fixture.config.signing.use_keystore = true;
        fixture.config.signing.keystore = Keystore {
            path: Some(keystore),
            alias: Some("release".into()),
            store_password: Some("hunter2".into()),
            key_password: None,
        };
        let mut builder = fixture.builder();
        let rx = subscribe(&mut builder);

        let run = builder.build(fixture.config.clone()).unwrap();
        let layout = fixture.config.layout();
        let package = run.outcome.package().unwrap().to_path_buf();
        assert_eq!(package, layout.signed_package());
        assert_eq!(package.file_name(), layout.unsigned_package().file_name());
        assert!(package.is_file());
        assert_eq!(run.statistics.outcome_of("align"), Some(StageOutcome::Skipped));
        assert_eq!(run.statistics.outcome_of("sign"), Some(StageOutcome::Completed));
        assert!(fixture
            .invoker
            .calls()
            .iter()
            .any(|call| call.tool_name() == "apksigner"
                && call.args_lossy().contains(&"--ks".to_string())));

        let events: Vec<BuildEvent> = rx.try_iter().collect();
        assert!(!progress(&events).contains(&80));
        assert!(fixture
            .invoker
            .calls()
            .iter()
            .all(|call| call.tool_name() != "zipalign"));
    }

    #[test]
    fn failing_stage_short_circuits() {
        let fixture = Fixture::new();
        fixture.invoker.fail("javac", "Main.java:3: error: ';' expected");
        let mut builder = fixture.builder();
        let rx = subscribe(&mut builder);

        let run = builder.build(fixture.config.clone()).unwrap();
        match &run.outcome {
            BuildOutcome::Failed(err) => {
                assert_eq!(err.stage(), Some("compile-sources"));
                assert!(err.to_string().contains("';' expected"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(builder.state(), BuildState::Failed);
        assert_eq!(run.statistics.stages.len(), 4);
        assert!(fixture
            .invoker
            .calls()
            .iter()
            .all(|call| call.tool_name() != "d8"));

        let events: Vec<BuildEvent> = rx.try_iter().collect();
        assert_eq!(progress(&events), vec![10, 20, 30, 40]);
        let n = events.len();
        assert!(matches!(&events[n - 2], BuildEvent::Error(msg) if msg.contains("compile-sources")));
        assert!(matches!(
            &events[n - 1],
            BuildEvent::Completed { success: false, message } if message.starts_with("Build failed: ")
        ));
    }

    #[test]
    fn environment_error_runs_no_stage() {
        let mut fixture = Fixture::new();
        fixture.config.java_sources.clear();
        let mut builder = fixture.builder();
        let rx = subscribe(&mut builder);

        let run = builder.build(fixture.config.clone()).unwrap();
        assert_eq!(
            run.outcome,
            BuildOutcome::Failed(BuildError::Environment("No Java sources specified".into()))
        );
        assert!(run.statistics.stages.is_empty());
        assert!(fixture.invoker.calls().is_empty());

        let events: Vec<BuildEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(progress(&events).is_empty());
        assert!(matches!(&events[1], BuildEvent::Error(_)));
    }

    #[test]
    fn stop_during_tool_ends_stopped_without_error() {
        let fixture = Fixture::new();
        fixture.invoker.block("javac");
        let mut builder = fixture.builder();
        let rx = subscribe(&mut builder);
        let builder = Arc::new(builder);

        let worker = BuildWorker::new(Arc::clone(&builder));
        let handle = worker.start(fixture.config.clone()).unwrap();
        fixture.invoker.wait_until_blocked();
        worker.stop();
        let run = handle.join().unwrap();

        assert_eq!(run.outcome, BuildOutcome::Stopped);
        assert_eq!(builder.state(), BuildState::Stopped);
        assert_eq!(
            run.statistics.outcome_of("compile-sources"),
            Some(StageOutcome::Interrupted)
        );
        let events: Vec<BuildEvent> = rx.try_iter().collect();
        assert!(!events.iter().any(|e| matches!(e, BuildEvent::Error(_))));
        assert_eq!(
            events.last(),
            Some(&BuildEvent::Completed {
                success: false,
                message: "Build stopped".into()
            })
        );
    }

    #[test]
    fn concurrent_build_is_rejected() {
        let fixture = Fixture::new();
        fixture.invoker.block("aapt2");
        let builder = Arc::new(fixture.builder());
        let worker = BuildWorker::new(Arc::clone(&builder));

        let handle = worker.start(fixture.config.clone()).unwrap();
        fixture.invoker.wait_until_blocked();
        assert!(worker.is_building());
        assert_eq!(
            builder.build(fixture.config.clone()).unwrap_err(),
            BuildError::AlreadyBuilding
        );
        assert!(matches!(
            worker.start(fixture.config.clone()),
            Err(BuildError::AlreadyBuilding)
        ));

        fixture.invoker.release();
        assert!(handle.join().unwrap().outcome.is_success());
        assert!(!builder.is_building());
        assert!(builder.build(fixture.config.clone()).is_ok());
    }

    #[test]
    fn stop_between_stages_skips_the_rest() {
        struct StopAt(CancellationToken, u8);
        impl BuildListener for StopAt {
            fn on_build_progress(&self, _label: &str, percent: u8) {
                if percent == self.1 {
                    self.0.cancel();
                }
            }
        }

        let fixture = Fixture::new();
        let mut builder = fixture.builder();
        let token = builder.cancellation_token();
        builder.add_listener(Arc::new(StopAt(token, 20)));

        let run = builder.build(fixture.config.clone()).unwrap();
        assert_eq!(run.outcome, BuildOutcome::Stopped);
        assert_eq!(run.statistics.stages.len(), 2);
        assert_eq!(fixture.invoker.calls().len(), 1);
    }

    #[test]
    fn stop_while_idle_does_not_leak_into_next_build() {
        let fixture = Fixture::new();
        let builder = fixture.builder();
        builder.stop();
        let run = builder.build(fixture.config.clone()).unwrap();
        assert!(run.outcome.is_success());
    }

    #[test]
    fn statistics_printed_for_every_outcome() {
        let fixture = Fixture::new();
        fixture.invoker.fail("d8", "bad class file");
        let builder = fixture.builder();
        builder.build(fixture.config.clone()).unwrap();

        let text = fixture.output.contents();
        assert!(text.contains("Build statistics:"));
        assert!(text.contains("convert-bytecode"));
        assert!(text.contains("FAILED"));
    }

    #[test]
    fn debug_mode_echoes_commands() {
        let fixture = Fixture::new();
        fixture.builder().build(fixture.config.clone()).unwrap();
        let text = fixture.output.contents();
        assert!(text.contains("  $ "));
        assert!(text.contains("aapt2 compile"));
    }

    #[test]
    fn report_records_failure() {
        let fixture = Fixture::new();
        fixture.invoker.fail("zipalign", "corrupt archive");
        fixture.builder().build(fixture.config.clone()).unwrap();

        let report = fs::read_to_string(fixture.config.layout().report).unwrap();
        let json: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["error"].as_str().unwrap().contains("align"));
    }

    #[test]
    fn builder_is_reusable_from_another_thread() {
        let fixture = Fixture::new();
        let builder = Arc::new(fixture.builder());
        let config = fixture.config.clone();
        let remote = Arc::clone(&builder);
        let run = thread::spawn(move || remote.build(config).unwrap())
            .join()
            .unwrap();
        assert!(run.outcome.is_success());
        assert_eq!(builder.state(), BuildState::Completed);
    }
}
