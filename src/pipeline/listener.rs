use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Observer of build lifecycle events.
///
/// Callbacks run on the build thread. Every run emits `on_build_started`
/// first, progress in increasing percent, and exactly one
/// `on_build_completed` last; a failure emits `on_build_error` just before
/// it.
pub trait BuildListener: Send + Sync {
    fn on_build_started(&self) {}

    fn on_build_progress(&self, _label: &str, _percent: u8) {}

    fn on_build_completed(&self, _success: bool, _message: &str) {}

    fn on_build_error(&self, _message: &str) {}
}

/// Owned form of a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Started,
    Progress { label: String, percent: u8 },
    Completed { success: bool, message: String },
    Error(String),
}

/// Forwards every callback as a [`BuildEvent`] over an mpsc channel.
pub struct ChannelListener {
    tx: Sender<BuildEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<BuildEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BuildEvent) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.tx.send(event);
    }
}

impl BuildListener for ChannelListener {
    fn on_build_started(&self) {
        self.send(BuildEvent::Started);
    }

    fn on_build_progress(&self, label: &str, percent: u8) {
        self.send(BuildEvent::Progress {
            label: label.to_string(),
            percent,
        });
    }

    fn on_build_completed(&self, success: bool, message: &str) {
        self.send(BuildEvent::Completed {
            success,
            message: message.to_string(),
        });
    }

    fn on_build_error(&self, message: &str) {
        self.send(BuildEvent::Error(message.to_string()));
    }
}

/// Subscriber list, notified in registration order.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    inner: Vec<Arc<dyn BuildListener>>,
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: Arc<dyn BuildListener>) {
        self.inner.push(listener);
    }

    pub(crate) fn started(&self) {
        self.inner.iter().for_each(|l| l.on_build_started());
    }

    pub(crate) fn progress(&self, label: &str, percent: u8) {
        self.inner.iter().for_each(|l| l.on_build_progress(label, percent));
    }

    pub(crate) fn completed(&self, success: bool, message: &str) {
        self.inner
            .iter()
            .for_each(|l| l.on_build_completed(success, message));
    }

    pub(crate) fn error(&self, message: &str) {
        self.inner.iter().for_each(|l| l.on_build_error(message));
    }
}
