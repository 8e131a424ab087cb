//! Per-thread attachment to the runtime.
//!
//! A native thread must be attached before it calls into the runtime. Attachment state is cached
//! per thread, keyed by the runtime instance, so repeated attaches are free and detaching a thread
//! that never attached is a no-op.

use crate::embedding::{Env, JniStatus, JniVersion, Vm};
use crate::error::Error;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
struct Attachment {
    version: JniVersion,
}

thread_local! {
    static ATTACHED: RefCell<HashMap<usize, Attachment>> = RefCell::new(HashMap::new());
}

fn cached(vm: &dyn Vm) -> Option<Attachment> {
    ATTACHED.with(|a| a.borrow().get(&vm.key()).copied())
}

fn remember(vm: &dyn Vm, version: JniVersion) {
    ATTACHED.with(|a| {
        a.borrow_mut().insert(vm.key(), Attachment { version });
    })
}

fn forget(vm: &dyn Vm) -> bool {
    ATTACHED.with(|a| a.borrow_mut().remove(&vm.key()).is_some())
}

/// Whether the calling thread is attached to `vm` as far as this host knows.
pub fn is_attached(vm: &dyn Vm) -> bool {
    cached(vm).is_some()
}

/// Record that the calling thread is already attached to `vm`, as the creating thread is.
pub fn adopt(vm: &dyn Vm, version: JniVersion) {
    remember(vm, version);
}

/// Attach the calling thread to `vm`, or return its existing context if it already is.
pub fn attach(vm: &dyn Vm, version: JniVersion) -> Result<Box<dyn Env>, Error> {
    attach_tracked(vm, version).map(|(env, _)| env)
}

/// Like [`attach`], also reporting whether this call performed the attach.
fn attach_tracked(vm: &dyn Vm, version: JniVersion) -> Result<(Box<dyn Env>, bool), Error> {
    if let Some(existing) = cached(vm) {
        match vm.get_env(existing.version) {
            Ok(env) => return Ok((env, false)),
            Err(status) => {
                tracing::debug!("cached attachment is stale ({}), attaching again", status);
                forget(vm);
            }
        }
    }
    // attached behind our back, e.g. a managed thread calling down into the host
    if let Ok(env) = vm.get_env(version) {
        remember(vm, version);
        return Ok((env, false));
    }

    let env = match vm.attach_current_thread(version) {
        Ok(env) => {
            remember(vm, version);
            env
        }
        Err(JniStatus::Version) if version > JniVersion::MINIMUM => {
            tracing::debug!(
                "runtime rejected version {} on attach, retrying with {}",
                version,
                JniVersion::MINIMUM
            );
            let env = vm
                .attach_current_thread(JniVersion::MINIMUM)
                .map_err(|status| Error::NotAttached(status.to_string()))?;
            remember(vm, JniVersion::MINIMUM);
            env
        }
        Err(status) => return Err(Error::NotAttached(status.to_string())),
    };
    tracing::debug!("attached thread {:?}", std::thread::current().id());
    Ok((env, true))
}

/// Detach the calling thread from `vm`. Does nothing if it is not attached.
pub fn detach(vm: &dyn Vm) -> Result<(), Error> {
    if !forget(vm) {
        return Ok(());
    }
    vm.detach_current_thread()
        .map_err(|status| Error::NotAttached(format!("cannot detach: {}", status)))?;
    tracing::debug!("detached thread {:?}", std::thread::current().id());
    Ok(())
}

/// Keeps the calling thread attached for its lifetime.
///
/// Dropping the guard detaches the thread only if creating the guard performed the attach.
pub struct AttachGuard {
    vm: Arc<dyn Vm>,
    env: Box<dyn Env>,
    performed: bool,
}

impl AttachGuard {
    pub fn new(vm: Arc<dyn Vm>, version: JniVersion) -> Result<AttachGuard, Error> {
        let (env, performed) = attach_tracked(&*vm, version)?;
        Ok(AttachGuard { vm, env, performed })
    }

    pub fn env(&self) -> &dyn Env {
        &*self.env
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if self.performed {
            if let Err(e) = detach(&*self.vm) {
                tracing::warn!("{}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::{MockRuntime, MockRuntimeBuilder};
    use crate::embedding::RuntimeLibrary;
    use std::thread;

    fn existing(runtime: &MockRuntime) -> Arc<dyn Vm> {
        runtime
            .created_vms()
            .expect("mock enumeration succeeds")
            .pop()
            .expect("mock has a runtime")
    }

    #[test]
    fn attach_is_idempotent() {
        let runtime = MockRuntimeBuilder::new().with_existing_vm().build();
        let vm = existing(&runtime);
        thread::spawn(move || {
            attach(&*vm, JniVersion::V1_8).expect("first attach");
            attach(&*vm, JniVersion::V1_8).expect("second attach");
            assert!(is_attached(&*vm));
        })
        .join()
        .unwrap();
        assert_eq!(runtime.attaches(), 1);
    }

    #[test]
    fn detach_without_attach_is_a_no_op() {
        let runtime = MockRuntimeBuilder::new().with_existing_vm().build();
        let vm = existing(&runtime);
        thread::spawn(move || detach(&*vm).expect("no-op detach"))
            .join()
            .unwrap();
        assert_eq!(runtime.detaches(), 0);
    }

    #[test]
    fn version_mismatch_downgrades_once() {
        let runtime = MockRuntimeBuilder::new()
            .with_existing_vm()
            .with_attach_rejection(JniVersion::V1_8)
            .build();
        let vm = existing(&runtime);
        thread::spawn(move || {
            attach(&*vm, JniVersion::V1_8).expect("downgraded attach");
            assert!(is_attached(&*vm));
        })
        .join()
        .unwrap();
        assert_eq!(runtime.attaches(), 1);
    }

    #[test]
    fn second_rejection_is_not_attached() {
        let runtime = MockRuntimeBuilder::new()
            .with_existing_vm()
            .with_attach_rejection(JniVersion::V1_8)
            .with_attach_rejection(JniVersion::V1_2)
            .build();
        let vm = existing(&runtime);
        thread::spawn(move || {
            assert!(matches!(
                attach(&*vm, JniVersion::V1_8),
                Err(Error::NotAttached(_))
            ));
            assert!(!is_attached(&*vm));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn stale_attachment_is_renewed() {
        let runtime = MockRuntimeBuilder::new().with_existing_vm().build();
        let vm = existing(&runtime);
        let rt = runtime.clone();
        thread::spawn(move || {
            attach(&*vm, JniVersion::V1_8).expect("first attach");
            // detached behind the cache's back
            vm.detach_current_thread().expect("raw detach");
            assert!(is_attached(&*vm));
            assert!(!rt.is_thread_attached());
            attach(&*vm, JniVersion::V1_8).expect("attach again");
            assert!(rt.is_thread_attached());
        })
        .join()
        .unwrap();
        assert_eq!(runtime.attaches(), 2);
    }

    #[test]
    fn guard_detaches_only_what_it_attached() {
        let runtime = MockRuntimeBuilder::new().with_existing_vm().build();
        let vm = existing(&runtime);
        let rt = runtime.clone();
        thread::spawn(move || {
            {
                let _outer = AttachGuard::new(vm.clone(), JniVersion::V1_8).expect("attach");
                {
                    let inner = AttachGuard::new(vm.clone(), JniVersion::V1_8).expect("attach");
                    assert!(inner.env().version() >= JniVersion::MINIMUM.as_raw());
                }
                assert!(is_attached(&*vm));
                assert!(rt.is_thread_attached());
            }
            assert!(!is_attached(&*vm));
            assert!(!rt.is_thread_attached());
        })
        .join()
        .unwrap();
        assert_eq!(runtime.attaches(), 1);
        assert_eq!(runtime.detaches(), 1);
    }
}
