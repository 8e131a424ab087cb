use crate::embedding::jni::{JniEnv, JniVm};
use crate::embedding::{Env, JniStatus, JniVersion, RuntimeLibrary, Vm};
use crate::error::Error;
use crate::library::{load_with, RuntimeDescriptor, SystemOpener};
use crate::options::{PendingOptionBuffer, VmOption};
use jni_sys::{jint, jsize, JNIEnv, JavaVM, JNI_OK};
use libc::c_void;
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

pub(crate) type CreateJavaVm =
    unsafe extern "system" fn(*mut *mut JavaVM, *mut *mut c_void, *mut c_void) -> jint;
pub(crate) type GetCreatedJavaVms =
    unsafe extern "system" fn(*mut *mut JavaVM, jsize, *mut jsize) -> jint;
pub(crate) type GetDefaultJavaVmInitArgs = unsafe extern "system" fn(*mut c_void) -> jint;
pub(crate) type DumpAllStacks = unsafe extern "system" fn(*mut JNIEnv, *mut c_void);

/// Largest default thread stack size taken at face value.
const MAX_SANE_STACK: usize = 2 * 1024 * 1024;

/// The version 1.1 initialization block, the only one that reports default sizes.
#[repr(C)]
#[allow(non_snake_case)]
struct Jdk11InitArgs {
    version: jint,
    properties: *mut *mut libc::c_char,
    checkSource: jint,
    nativeStackSize: jint,
    javaStackSize: jint,
    minHeapSize: jint,
    maxHeapSize: jint,
    verifyMode: jint,
    classpath: *mut libc::c_char,
    vfprintf: *mut c_void,
    exit: *mut c_void,
    abort: *mut c_void,
    enableClassGC: jint,
    enableVerboseGC: jint,
    disableAsyncGC: jint,
    verbose: jint,
    debugging: u8,
    debugPort: jint,
}

/// A runtime library linked through the platform loader, with its entry points resolved.
pub struct DlRuntime {
    path: PathBuf,
    create: CreateJavaVm,
    created: GetCreatedJavaVms,
    default_args: GetDefaultJavaVmInitArgs,
    dump: Option<DumpAllStacks>,
    // the entry points above point into these; they are declared last so they drop last
    _companions: Vec<Library>,
    _lib: Library,
}

impl DlRuntime {
    /// Load the library at `path`, preloading any of `companions` the load ladder finds useful.
    pub fn load<P: AsRef<Path>>(path: P, companions: &[String]) -> Result<Arc<DlRuntime>, Error> {
        let path = path.as_ref();
        let loaded = load_with(&SystemOpener, path, companions)?;
        let lib = loaded.handle;

        let create = match unsafe { required::<CreateJavaVm>(&lib, b"JNI_CreateJavaVM\0") } {
            Ok(f) => f,
            Err(e) => loaded
                .companions
                .iter()
                .find_map(|c| unsafe { required::<CreateJavaVm>(c, b"JNI_CreateJavaVM\0") }.ok())
                .ok_or(e)?,
        };
        let created = unsafe { required::<GetCreatedJavaVms>(&lib, b"JNI_GetCreatedJavaVMs\0") }?;
        let default_args = unsafe {
            required::<GetDefaultJavaVmInitArgs>(&lib, b"JNI_GetDefaultJavaVMInitArgs\0")
        }?;
        let dump = unsafe { lib.get::<DumpAllStacks>(b"JVM_DumpAllStacks\0") }
            .map(|sym| *sym)
            .ok();
        if dump.is_none() {
            tracing::warn!("runtime does not export JVM_DumpAllStacks; thread dumps are disabled");
        }

        Ok(Arc::new(DlRuntime {
            path: path.to_owned(),
            create,
            created,
            default_args,
            dump,
            _companions: loaded.companions,
            _lib: lib,
        }))
    }

    /// Select a variant of `descriptor` and load it.
    pub fn load_descriptor(
        descriptor: &RuntimeDescriptor,
        selector: Option<&str>,
    ) -> Result<Arc<DlRuntime>, Error> {
        let variant = descriptor.locate(selector)?;
        DlRuntime::load(&variant.library, &variant.companions)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn required<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, Error> {
    let sym: Symbol<'_, T> = lib.get(name).map_err(|e| {
        tracing::error!("cannot resolve {}: {}", symbol_name(name), e);
        Error::MissingEntryPoint(symbol_name(name))
    })?;
    Ok(*sym)
}

fn symbol_name(name: &'static [u8]) -> &'static str {
    std::str::from_utf8(&name[..name.len() - 1]).unwrap_or("(invalid symbol)")
}

impl RuntimeLibrary for DlRuntime {
    fn created_vms(&self) -> Result<Vec<Arc<dyn Vm>>, Error> {
        let mut vm: *mut JavaVM = ptr::null_mut();
        let mut count: jsize = 0;
        let status = unsafe { (self.created)(&mut vm, 1, &mut count) };
        if status != JNI_OK {
            bail_creation!("cannot enumerate runtimes: {}", JniStatus::from(status));
        }
        if count == 0 || vm.is_null() {
            return Ok(vec![]);
        }
        Ok(vec![Arc::new(JniVm::new(vm, self.dump)) as Arc<dyn Vm>])
    }

    fn create_vm(
        &self,
        version: JniVersion,
        options: &[VmOption],
    ) -> Result<(Arc<dyn Vm>, Box<dyn Env>), JniStatus> {
        let mut buffer = PendingOptionBuffer::new(options).map_err(|e| {
            tracing::error!("invalid creation option: {}", e);
            JniStatus::Invalid
        })?;
        let mut args = buffer.init_args(version.as_raw());
        let mut vm: *mut JavaVM = ptr::null_mut();
        let mut env: *mut c_void = ptr::null_mut();
        let status = unsafe {
            (self.create)(&mut vm, &mut env, &mut args as *mut _ as *mut c_void)
        };
        drop(buffer);
        if status != JNI_OK {
            return Err(JniStatus::from(status));
        }
        if vm.is_null() || env.is_null() {
            return Err(JniStatus::Err);
        }
        Ok((
            Arc::new(JniVm::new(vm, self.dump)),
            Box::new(JniEnv::from_raw(env as *mut JNIEnv)),
        ))
    }

    fn default_stack_size(&self) -> Option<usize> {
        let mut args: Jdk11InitArgs = unsafe { std::mem::zeroed() };
        args.version = JniVersion::V1_1.as_raw();
        let status = unsafe { (self.default_args)(&mut args as *mut _ as *mut c_void) };
        if status != JNI_OK {
            tracing::debug!("runtime reports no default initialization arguments");
            return None;
        }
        let size = args.javaStackSize as usize;
        if args.javaStackSize > 0 && size <= MAX_SANE_STACK {
            Some(size)
        } else {
            None
        }
    }

    fn supports_stack_dump(&self) -> bool {
        self.dump.is_some()
    }
}
