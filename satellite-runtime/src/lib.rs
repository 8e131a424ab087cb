pub use satellite_runtime_internals::attach::{self, AttachGuard};
pub use satellite_runtime_internals::bootstrap::{self, bootstrap, LoaderHandle};
pub use satellite_runtime_internals::bridge::{self, LifecycleBridge, LifecycleOp};
pub use satellite_runtime_internals::config::VmConfig;
pub use satellite_runtime_internals::control::{self, ControlEvent, ControlLoop};
pub use satellite_runtime_internals::embedding::{self, JniVersion, RuntimeLibrary, Vm};
pub use satellite_runtime_internals::error::Error;
pub use satellite_runtime_internals::hooks::{vm_exit_code, RESTART_EXIT_CODE};
pub use satellite_runtime_internals::library::{self, DlRuntime, RuntimeDescriptor};
pub use satellite_runtime_internals::options::{self, VmOption};
pub use satellite_runtime_internals::redirect::{self, Stream};
pub use satellite_runtime_internals::teardown;
pub use satellite_runtime_internals::vm::{Origin, VmFactory, VmInstance};
