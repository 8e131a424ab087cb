use lazy_static::lazy_static;
use satellite_runtime::embedding::mock::{MockRuntime, ARCHIVE_MAGIC};
use satellite_runtime::{bootstrap, Error, LifecycleBridge, VmFactory, VmInstance};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref EXCLUSIVE_TEST: RwLock<()> = RwLock::default();
}

/// Run a test non-exclusively with other `test_nonex` tests.
///
/// This function _must_ wrap any test that only inspects values and never creates a runtime
/// instance.
#[allow(dead_code)]
pub fn test_nonex<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = EXCLUSIVE_TEST.read().unwrap_or_else(|e| e.into_inner());
    let r = f();
    drop(lock);
    r
}

/// Run a test exclusively, so that no other `test_nonex` or `test_ex` tests will run concurrently.
///
/// This function _must_ wrap any test that creates a runtime instance or installs the control
/// channel, as both are process-wide.
#[allow(dead_code)]
pub fn test_ex<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = EXCLUSIVE_TEST.write().unwrap_or_else(|e| e.into_inner());
    let r = f();
    drop(lock);
    r
}

pub const LOADER_CLASS: &str = "io/satellite/Loader";

#[allow(dead_code)]
pub const LOADER_BYTES: &[u8] = b"\xca\xfe\xba\xbe\x00\x00\x00\x34";

#[allow(dead_code)]
pub fn archive_bytes() -> Vec<u8> {
    let mut bytes = ARCHIVE_MAGIC.to_vec();
    bytes.extend_from_slice(b"META-INF/MANIFEST.MF");
    bytes
}

/// Create an instance on `runtime`, bootstrap the loader and register its callbacks.
#[allow(dead_code)]
pub fn started(runtime: &Arc<MockRuntime>) -> Result<VmInstance, Error> {
    let mut instance = VmFactory::new(runtime.clone()).create(&[])?;
    bootstrap(&mut instance, LOADER_CLASS, LOADER_BYTES, &archive_bytes())?;
    LifecycleBridge::new(&instance)?.register_callbacks()?;
    Ok(instance)
}

/// The runtime home to run the real-runtime smoke tests against, if one is configured.
#[allow(dead_code)]
pub fn test_java_home() -> Option<PathBuf> {
    env::var_os("SATELLITE_TEST_JAVA_HOME").map(PathBuf::from)
}
