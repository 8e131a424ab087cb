//! Turning termination and hangup signals into control intents.

use anyhow::Error;

/// Block the handled signals in the calling thread, and wait for them on a dedicated thread.
///
/// Must run before any other thread is spawned, so that every thread inherits the mask and only
/// the waiting thread ever sees these signals.
#[cfg(unix)]
pub fn install() -> Result<(), Error> {
    use nix::sys::signal::{SigSet, Signal};
    use satellite_runtime::control::{self, ControlEvent};

    let mut set = SigSet::empty();
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGINT);
    set.add(Signal::SIGHUP);
    set.thread_block()?;

    std::thread::Builder::new()
        .name("satellite-signals".to_owned())
        .spawn(move || loop {
            match set.wait() {
                Ok(Signal::SIGHUP) => {
                    tracing::info!("SIGHUP received, reloading");
                    control::post(ControlEvent::Reload);
                }
                Ok(sig) => {
                    tracing::info!("{:?} received, shutting down", sig);
                    control::post(ControlEvent::Shutdown);
                }
                Err(e) => {
                    tracing::warn!("cannot wait for signals: {}", e);
                    break;
                }
            }
        })?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install() -> Result<(), Error> {
    Ok(())
}
