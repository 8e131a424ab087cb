//! Bounded-time destruction of the runtime instance.
//!
//! Destroying the runtime waits for every non-daemon managed thread, which may take forever. The
//! destroy call therefore runs on a dedicated thread, and the host stops waiting for it after a
//! timeout.

use crate::attach;
use crate::embedding::{JValue, Receiver, ReturnType};
use crate::error::Error;
use crate::fault::Checked;
use crate::hooks::vm_exit_code;
use crate::vm::{Origin, VmInstance};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Release the global reference to the loader, if there is one.
pub fn release_loader(instance: &mut VmInstance) -> Result<(), Error> {
    if let Some(loader) = instance.loader.take() {
        let env = instance.env()?;
        env.delete_global_ref(loader.object());
        tracing::debug!("loader reference released");
    }
    Ok(())
}

/// Ask the runtime to exit with `exit_code`, then destroy it as [`forced`] does.
///
/// The managed exit entry point normally does not return; if it does, teardown carries on. Returns
/// the exit code reported by the runtime.
pub fn graceful(mut instance: VmInstance, exit_code: i32, timeout: Duration) -> Result<i32, Error> {
    release_loader(&mut instance)?;
    {
        let env = instance.env()?;
        let checked = Checked::new(&*env);
        let exited = checked.find_class("java/lang/System").and_then(|system| {
            let exit = checked.method_id(system, "exit", "(I)V", true)?;
            tracing::debug!("calling System.exit({})", exit_code);
            checked.call(
                Receiver::Static(system),
                exit,
                ReturnType::Void,
                &[JValue::Int(exit_code)],
            )
        });
        if exited.is_none() {
            tracing::warn!("cannot call System.exit");
        }
    }
    forced(instance, timeout)
}

/// Destroy the runtime on a dedicated thread, waiting at most `timeout` for it.
///
/// Returns the exit code reported by the runtime, or [`Error::TeardownTimeout`] if the destroy call
/// was still running when the wait ran out. In that case the destroy thread is left behind and the
/// runtime library stays loaded. An instance this host only attached to is released, not
/// destroyed.
pub fn forced(mut instance: VmInstance, timeout: Duration) -> Result<i32, Error> {
    if let Err(e) = release_loader(&mut instance) {
        tracing::warn!("cannot release loader: {}", e);
    }
    if instance.origin() == Origin::Attached {
        release(instance);
        return Ok(vm_exit_code());
    }
    attach::detach(&**instance.vm())?;

    let (tx, rx) = mpsc::channel();
    let vm = instance.vm().clone();
    let mut builder = thread::Builder::new().name("satellite-teardown".to_owned());
    if let Some(size) = instance.library().default_stack_size() {
        builder = builder.stack_size(size);
    }
    builder.spawn(move || {
        tracing::debug!("destroying runtime");
        let _ = tx.send(vm.destroy());
    })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => {
            tracing::debug!("runtime destroyed");
            instance.destroyed = true;
            release(instance);
            Ok(vm_exit_code())
        }
        Ok(Err(status)) => {
            tracing::error!("Cannot destroy runtime: {}", status);
            drop(instance);
            sat_bail!("cannot destroy runtime: {}", status);
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::error!("Runtime teardown did not finish within {:?}", timeout);
            drop(instance);
            Err(Error::TeardownTimeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            drop(instance);
            sat_bail!("teardown thread exited without reporting");
        }
    }
}

/// Drop the instance, unloading the runtime library only if this host created the runtime and
/// has destroyed it.
pub fn release(instance: VmInstance) {
    let _ = attach::detach(&**instance.vm());
    match instance.origin() {
        Origin::Created if instance.destroyed => tracing::debug!("unloading runtime library"),
        Origin::Created => tracing::debug!("runtime was not destroyed; keeping the library"),
        Origin::Attached => tracing::debug!("runtime was not created here; keeping the library"),
    }
    drop(instance);
}
