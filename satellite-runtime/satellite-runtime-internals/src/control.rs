//! Hand-off of shutdown and reload intents to the host's control loop.
//!
//! Intents arrive from runtime callbacks on arbitrary managed threads, and from signal handling.
//! They are posted into a process-wide channel drained by a single [`ControlLoop`]. Only the first
//! intent is delivered; later ones are dropped, since the host is already on its way out.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// Placeholder logged when the runtime reports a failure without a message.
pub const NO_MESSAGE: &str = "(no message)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop the runtime and exit with the restart code so the supervisor starts a fresh host.
    Reload,
    /// Stop the runtime and exit with its exit code.
    Shutdown,
}

lazy_static! {
    static ref CONTROL: Mutex<Option<Sender<ControlEvent>>> = Mutex::new(None);
}

static REQUESTED: AtomicBool = AtomicBool::new(false);

/// The receiving end of the control channel.
pub struct ControlLoop {
    rx: Receiver<ControlEvent>,
}

impl ControlLoop {
    /// Block until an intent arrives. A closed channel reads as [`ControlEvent::Shutdown`].
    pub fn wait(&self) -> ControlEvent {
        self.rx.recv().unwrap_or(ControlEvent::Shutdown)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<ControlEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(ControlEvent::Shutdown),
        }
    }

    pub fn try_next(&self) -> Option<ControlEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        uninstall();
    }
}

/// Open the process-wide control channel, replacing any previous one.
pub fn install() -> ControlLoop {
    let (tx, rx) = mpsc::channel();
    *CONTROL.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    REQUESTED.store(false, Ordering::SeqCst);
    ControlLoop { rx }
}

fn uninstall() {
    CONTROL.lock().unwrap_or_else(|e| e.into_inner()).take();
}

/// Post an intent. Returns `false` if one was already posted or no control loop is installed.
pub fn post(event: ControlEvent) -> bool {
    let control = CONTROL.lock().unwrap_or_else(|e| e.into_inner());
    let tx = match control.as_ref() {
        Some(tx) => tx,
        None => {
            tracing::warn!("no control loop to receive {:?}", event);
            return false;
        }
    };
    if REQUESTED.swap(true, Ordering::SeqCst) {
        tracing::debug!("{:?} ignored, shutdown already in progress", event);
        return false;
    }
    tx.send(event).is_ok()
}

/// Whether an intent has been posted since the control loop was installed.
pub fn requested() -> bool {
    REQUESTED.load(Ordering::SeqCst)
}

/// The runtime asked the host to go away; `reload` asks for a restart.
pub fn on_shutdown(reload: bool) {
    if reload {
        tracing::debug!("reload requested by the runtime");
        post(ControlEvent::Reload);
    } else {
        tracing::debug!("shutdown requested by the runtime");
        post(ControlEvent::Shutdown);
    }
}

/// The runtime reported a fatal failure.
pub fn on_failed(message: Option<String>) {
    tracing::error!(
        "Failed: {}",
        message.as_deref().unwrap_or(NO_MESSAGE)
    );
    post(ControlEvent::Shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_ex;

    #[test]
    fn first_intent_wins() {
        test_ex(|| {
            let control = install();
            on_shutdown(true);
            on_shutdown(false);
            on_failed(None);
            assert_eq!(control.try_next(), Some(ControlEvent::Reload));
            assert_eq!(control.try_next(), None);
        })
    }

    #[test]
    fn failure_requests_shutdown() {
        test_ex(|| {
            let control = install();
            on_failed(Some("boom".to_owned()));
            assert_eq!(
                control.wait_timeout(Duration::from_millis(100)),
                Some(ControlEvent::Shutdown)
            );
        })
    }

    #[test]
    fn posting_without_a_loop_is_dropped() {
        test_ex(|| {
            drop(install());
            assert!(!post(ControlEvent::Shutdown));
            assert!(!requested());
        })
    }

    #[test]
    fn intents_cross_threads() {
        test_ex(|| {
            let control = install();
            std::thread::spawn(|| on_shutdown(false)).join().unwrap();
            assert_eq!(control.wait(), ControlEvent::Shutdown);
        })
    }
}
