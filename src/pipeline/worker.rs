use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{ApkBuilder, BuildError, BuildRun};
use crate::config::BuildConfig;

/// Runs builds on a dedicated thread.
///
/// The in-progress flag is taken on the calling thread, so a second
/// [`start`](Self::start) fails immediately with
/// [`BuildError::AlreadyBuilding`] instead of racing the first.
#[derive(Clone)]
pub struct BuildWorker {
    builder: Arc<ApkBuilder>,
}

impl BuildWorker {
    pub fn new(builder: Arc<ApkBuilder>) -> Self {
        Self { builder }
    }

    pub fn start(&self, config: BuildConfig) -> Result<JoinHandle<BuildRun>, BuildError> {
        let claim = self.builder.claim()?;
        let builder = Arc::clone(&self.builder);
        let handle = thread::Builder::new()
            .name("build-worker".to_string())
            .spawn(move || builder.run_claimed(claim, config))
            .map_err(|err| BuildError::Environment(format!("spawning build worker: {err}")))?;
        debug!("build worker started");
        Ok(handle)
    }

    pub fn stop(&self) {
        self.builder.stop();
    }

    pub fn is_building(&self) -> bool {
        self.builder.is_building()
    }

    pub fn builder(&self) -> &Arc<ApkBuilder> {
        &self.builder
    }
}
