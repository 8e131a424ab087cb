use crate::error::Error;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for creating and tearing down the runtime instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Name of the runtime variant to load. (default: the first one found)
    pub runtime: Option<String>,
    /// Options passed to the runtime ahead of everything the host adds.
    pub options: Vec<String>,
    /// `;`-separated classpath; segments ending in `*` are expanded. (default none)
    pub classpath: Option<String>,
    /// Initial heap in megabytes; 0 leaves the runtime's default. (default 0)
    pub heap_min_mb: u32,
    /// Maximum heap in megabytes; 0 leaves the runtime's default. (default 0)
    pub heap_max_mb: u32,
    /// Managed thread stack size in kilobytes; 0 leaves the runtime's default. (default 0)
    pub stack_kb: u32,
    /// Route the runtime's own diagnostic output into the host log. (default false)
    pub diagnostic_hook: bool,
    /// Exit with the restart code if the runtime aborts. (default true)
    pub crash_restart: bool,
    /// Redirect the managed standard output here.
    pub stdout: Option<PathBuf>,
    /// Redirect the managed standard error here.
    pub stderr: Option<PathBuf>,
    /// How long teardown waits for the runtime to be destroyed. (default 60s)
    pub teardown_timeout: Duration,
}

impl VmConfig {
    pub const fn default() -> VmConfig {
        VmConfig {
            runtime: None,
            options: Vec::new(),
            classpath: None,
            heap_min_mb: 0,
            heap_max_mb: 0,
            stack_kb: 0,
            diagnostic_hook: false,
            crash_restart: true,
            stdout: None,
            stderr: None,
            teardown_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_runtime<S: Into<String>>(mut self, runtime: S) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_classpath<S: Into<String>>(mut self, classpath: S) -> Self {
        self.classpath = Some(classpath.into());
        self
    }

    pub const fn with_heap_min_mb(mut self, heap_min_mb: u32) -> Self {
        self.heap_min_mb = heap_min_mb;
        self
    }

    pub const fn with_heap_max_mb(mut self, heap_max_mb: u32) -> Self {
        self.heap_max_mb = heap_max_mb;
        self
    }

    pub const fn with_stack_kb(mut self, stack_kb: u32) -> Self {
        self.stack_kb = stack_kb;
        self
    }

    pub const fn with_diagnostic_hook(mut self, diagnostic_hook: bool) -> Self {
        self.diagnostic_hook = diagnostic_hook;
        self
    }

    pub const fn with_crash_restart(mut self, crash_restart: bool) -> Self {
        self.crash_restart = crash_restart;
        self
    }

    pub fn with_stdout<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn with_stderr<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.stderr = Some(path.into());
        self
    }

    pub const fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Check that the sizes are consistent with each other.
    pub fn validate(&self) -> Result<(), Error> {
        if self.heap_max_mb != 0 && self.heap_min_mb > self.heap_max_mb {
            return Err(Error::InvalidArgument(
                "initial heap must not exceed the maximum heap",
            ));
        }
        if self.teardown_timeout == Duration::from_secs(0) {
            return Err(Error::InvalidArgument("teardown timeout must be positive"));
        }
        Ok(())
    }
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig::default()
    }
}
