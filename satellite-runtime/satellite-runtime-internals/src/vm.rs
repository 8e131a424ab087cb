//! Creating, or attaching to, the process-wide runtime instance.

use crate::attach;
use crate::bootstrap::LoaderHandle;
use crate::config::VmConfig;
use crate::embedding::{Env, JniStatus, JniVersion, RuntimeLibrary, Vm};
use crate::error::Error;
use crate::hooks::OptionHook;
use crate::options::{build_options, VmOption};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Versions requested at creation, in order. A version error moves to the next one.
pub const CREATE_LADDER: [JniVersion; 2] = [JniVersion::MINIMUM, JniVersion::ESCALATED];

/// Set while a [`VmInstance`] is alive in this process.
static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

/// Whether a [`VmInstance`] is currently alive in this process.
pub fn instance_live() -> bool {
    INSTANCE_LIVE.load(Ordering::SeqCst)
}

/// How the instance came to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// This host created it, and owns its destruction and the library.
    Created,
    /// It already existed in the process; this host attached to it.
    Attached,
}

/// The host's handle to the runtime instance.
///
/// At most one is alive per process. The loader handle, once bootstrapped, is owned here and
/// valid only while the instance is.
pub struct VmInstance {
    library: Arc<dyn RuntimeLibrary>,
    vm: Arc<dyn Vm>,
    version: JniVersion,
    origin: Origin,
    pub(crate) loader: Option<LoaderHandle>,
    /// Set once the runtime has been destroyed. Until then dropping the instance never unloads
    /// the library.
    pub(crate) destroyed: bool,
}

impl VmInstance {
    pub fn vm(&self) -> &Arc<dyn Vm> {
        &self.vm
    }

    pub fn library(&self) -> &Arc<dyn RuntimeLibrary> {
        &self.library
    }

    /// The protocol version negotiated for this instance.
    pub fn version(&self) -> JniVersion {
        self.version
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn loader(&self) -> Option<&LoaderHandle> {
        self.loader.as_ref()
    }

    /// The calling thread's context, attaching it first if needed.
    pub fn env(&self) -> Result<Box<dyn Env>, Error> {
        attach::attach(&*self.vm, self.version)
    }
}

impl Drop for VmInstance {
    fn drop(&mut self) {
        if let Some(loader) = self.loader.take() {
            tracing::debug!("dropping runtime instance with a live loader reference");
            if let Ok(env) = self.vm.get_env(self.version) {
                env.delete_global_ref(loader.object());
            }
        }
        if !self.destroyed {
            if self.origin == Origin::Created {
                tracing::warn!("runtime dropped before it was destroyed; keeping the library");
            }
            std::mem::forget(self.library.clone());
        }
        INSTANCE_LIVE.store(false, Ordering::SeqCst);
    }
}

/// Creates the process-wide runtime instance from a loaded runtime library.
pub struct VmFactory {
    library: Arc<dyn RuntimeLibrary>,
}

impl VmFactory {
    pub fn new(library: Arc<dyn RuntimeLibrary>) -> VmFactory {
        VmFactory { library }
    }

    /// The full option list for `config`: explicit options, host identity properties, the abort
    /// hook when crash restart is on, then the fixed suffix.
    pub fn options(&self, config: &VmConfig) -> Vec<VmOption> {
        let mut options: Vec<VmOption> =
            config.options.iter().cloned().map(VmOption::plain).collect();
        options.extend(identity_options());
        if config.crash_restart {
            options.push(VmOption::hooked(OptionHook::Abort));
        }
        options.extend(build_options(
            &[],
            config.classpath.as_deref(),
            config.heap_min_mb,
            config.heap_max_mb,
            config.stack_kb,
            config.diagnostic_hook,
        ));
        options
    }

    pub fn create_with(&self, config: &VmConfig) -> Result<VmInstance, Error> {
        config.validate()?;
        self.create(&self.options(config))
    }

    /// Attach to the runtime instance already living in this process, or create one with
    /// `options`.
    pub fn create(&self, options: &[VmOption]) -> Result<VmInstance, Error> {
        if INSTANCE_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail_creation!("a runtime instance is already live in this process");
        }
        let res = self.create_or_attach(options);
        if res.is_err() {
            INSTANCE_LIVE.store(false, Ordering::SeqCst);
        }
        res
    }

    fn create_or_attach(&self, options: &[VmOption]) -> Result<VmInstance, Error> {
        if let Some(vm) = self.library.created_vms()?.into_iter().next() {
            return self.attach_existing(vm);
        }

        for (i, option) in options.iter().enumerate() {
            match option.hook {
                Some(hook) => tracing::debug!("option {}: {} ({:?} hook)", i, option.text, hook),
                None => tracing::debug!("option {}: {}", i, option.text),
            }
        }

        for version in CREATE_LADDER.iter().copied() {
            match self.library.create_vm(version, options) {
                Ok((vm, _env)) => {
                    attach::adopt(&*vm, version);
                    tracing::debug!("runtime created with version {}", version);
                    return Ok(VmInstance {
                        library: self.library.clone(),
                        vm,
                        version,
                        origin: Origin::Created,
                        loader: None,
                        destroyed: false,
                    });
                }
                Err(JniStatus::Version) => {
                    tracing::debug!("runtime rejected version {}", version);
                }
                Err(status) => {
                    tracing::error!("Cannot create runtime: {}", status);
                    bail_creation!("cannot create runtime: {}", status);
                }
            }
        }
        tracing::error!("Cannot create runtime: no supported protocol version");
        bail_creation!("runtime rejected every supported protocol version");
    }

    fn attach_existing(&self, vm: Arc<dyn Vm>) -> Result<VmInstance, Error> {
        tracing::debug!("runtime already exists in this process, attaching");
        let env = attach::attach(&*vm, JniVersion::MINIMUM).map_err(|e| {
            Error::CreationFailure(format!("cannot attach to existing runtime: {}", e))
        })?;
        let reported = env.version();
        if reported < JniVersion::MINIMUM.as_raw() {
            let _ = attach::detach(&*vm);
            bail_creation!(
                "existing runtime reports version {:#08x}, below {}",
                reported,
                JniVersion::MINIMUM
            );
        }
        Ok(VmInstance {
            library: self.library.clone(),
            vm,
            version: JniVersion::MINIMUM,
            origin: Origin::Attached,
            loader: None,
            destroyed: false,
        })
    }
}

fn identity_options() -> Vec<VmOption> {
    let mut options = vec![VmOption::plain(format!(
        "-Dsatellite.process.id={}",
        std::process::id()
    ))];
    #[cfg(unix)]
    options.push(VmOption::plain(format!(
        "-Dsatellite.process.parent={}",
        unsafe { libc::getppid() }
    )));
    options.push(VmOption::plain(format!(
        "-Dsatellite.version={}",
        env!("CARGO_PKG_VERSION")
    )));
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockRuntimeBuilder;
    use crate::test_helpers::test_ex;

    #[test]
    fn identity_and_abort_sit_between_explicit_and_suffix() {
        let factory = VmFactory::new(MockRuntimeBuilder::new().build());
        let config = VmConfig::default()
            .with_options(vec!["-Dexplicit=1".to_owned()])
            .with_heap_max_mb(256);
        let options = factory.options(&config);
        let texts: Vec<&str> = options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts[0], "-Dexplicit=1");
        assert!(texts[1].starts_with("-Dsatellite.process.id="));
        let abort = texts.iter().position(|t| *t == "abort").expect("abort hook present");
        let exit = texts.iter().position(|t| *t == "exit").expect("exit hook present");
        assert!(texts[..abort].iter().any(|t| t.starts_with("-Dsatellite.version=")));
        assert!(abort < exit);
        assert_eq!(texts.last(), Some(&"-Xmx256m"));
    }

    #[test]
    fn crash_restart_off_drops_the_abort_hook() {
        let factory = VmFactory::new(MockRuntimeBuilder::new().build());
        let options = factory.options(&VmConfig::default().with_crash_restart(false));
        assert!(options.iter().all(|o| o.hook != Some(OptionHook::Abort)));
    }

    #[test]
    fn second_live_instance_is_refused() {
        test_ex(|| {
            let first = VmFactory::new(MockRuntimeBuilder::new().build())
                .create(&[])
                .expect("first instance");
            let second = VmFactory::new(MockRuntimeBuilder::new().build()).create(&[]);
            assert!(matches!(second, Err(Error::CreationFailure(_))));
            drop(first);
            assert!(!instance_live());
        })
    }

    #[test]
    fn failed_creation_releases_the_guard() {
        test_ex(|| {
            let runtime = MockRuntimeBuilder::new()
                .with_create_failure(JniStatus::NoMem)
                .build();
            let res = VmFactory::new(runtime.clone()).create(&[]);
            assert!(matches!(res, Err(Error::CreationFailure(_))));
            assert_eq!(runtime.creations(), 1);
            assert!(!instance_live());
        })
    }
}
