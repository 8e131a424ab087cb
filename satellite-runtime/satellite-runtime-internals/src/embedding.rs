//! The embedding API seam.
//!
//! Everything the host does with the managed runtime goes through three traits:
//! [`RuntimeLibrary`] for the process-level entry points exported by the runtime's shared
//! library, [`Vm`] for one runtime instance, and [`Env`] for the execution context a single
//! attached thread uses to call into that instance.
//!
//! The production implementation lives in [`jni`](jni/index.html) and talks to a real JVM through
//! `jni-sys`. [`mock`](mock/index.html) provides a scriptable in-process stand-in so the host
//! logic can be exercised without a runtime installed.

pub mod jni;
pub mod mock;

use crate::error::Error;
use crate::options::VmOption;
use libc::c_void;
use std::fmt;
use std::sync::Arc;

/// A non-null reference to a managed object or class.
///
/// Whether the reference is local to the current frame or global is tracked by the caller; the
/// runtime treats both the same way at the call sites used here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ref(*mut c_void);

// Global references are valid on any attached thread, and local references never leave the
// thread that produced them in this crate.
unsafe impl Send for Ref {}
unsafe impl Sync for Ref {}

impl Ref {
    pub fn from_raw(ptr: *mut c_void) -> Option<Ref> {
        if ptr.is_null() {
            None
        } else {
            Some(Ref(ptr))
        }
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0
    }
}

/// A resolved method identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(*mut c_void);

impl MethodId {
    pub fn from_raw(ptr: *mut c_void) -> Option<MethodId> {
        if ptr.is_null() {
            None
        } else {
            Some(MethodId(ptr))
        }
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0
    }
}

/// Embedding protocol versions understood by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum JniVersion {
    V1_1,
    V1_2,
    V1_4,
    V1_6,
    V1_8,
}

impl JniVersion {
    /// The lowest version the host will run against.
    pub const MINIMUM: JniVersion = JniVersion::V1_2;

    /// The version requested after the runtime rejects [`MINIMUM`](#associatedconstant.MINIMUM)
    /// at creation time.
    pub const ESCALATED: JniVersion = JniVersion::V1_8;

    pub fn as_raw(self) -> i32 {
        match self {
            JniVersion::V1_1 => 0x0001_0001,
            JniVersion::V1_2 => 0x0001_0002,
            JniVersion::V1_4 => 0x0001_0004,
            JniVersion::V1_6 => 0x0001_0006,
            JniVersion::V1_8 => 0x0001_0008,
        }
    }

    /// Map a version reported by the runtime to the highest known version not above it.
    pub fn from_raw(raw: i32) -> Option<JniVersion> {
        [
            JniVersion::V1_8,
            JniVersion::V1_6,
            JniVersion::V1_4,
            JniVersion::V1_2,
            JniVersion::V1_1,
        ]
        .iter()
        .copied()
        .find(|v| v.as_raw() <= raw)
    }
}

impl fmt::Display for JniVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.as_raw())
    }
}

/// Status codes returned by the invocation interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JniStatus {
    Ok,
    Err,
    Detached,
    Version,
    NoMem,
    Exists,
    Invalid,
    Other(i32),
}

impl From<i32> for JniStatus {
    fn from(raw: i32) -> JniStatus {
        match raw {
            0 => JniStatus::Ok,
            -1 => JniStatus::Err,
            -2 => JniStatus::Detached,
            -3 => JniStatus::Version,
            -4 => JniStatus::NoMem,
            -5 => JniStatus::Exists,
            -6 => JniStatus::Invalid,
            other => JniStatus::Other(other),
        }
    }
}

impl fmt::Display for JniStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JniStatus::Ok => write!(f, "ok"),
            JniStatus::Err => write!(f, "unknown error"),
            JniStatus::Detached => write!(f, "thread detached"),
            JniStatus::Version => write!(f, "version not supported"),
            JniStatus::NoMem => write!(f, "out of memory"),
            JniStatus::Exists => write!(f, "runtime already created"),
            JniStatus::Invalid => write!(f, "invalid arguments"),
            JniStatus::Other(code) => write!(f, "status {}", code),
        }
    }
}

/// Argument and return values crossing into managed calls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JValue {
    Void,
    Bool(bool),
    Int(i32),
    Long(i64),
    Object(Option<Ref>),
}

impl JValue {
    pub fn as_bool(&self) -> bool {
        matches!(self, JValue::Bool(true))
    }

    pub fn as_object(&self) -> Option<Ref> {
        match self {
            JValue::Object(obj) => *obj,
            _ => None,
        }
    }
}

impl From<bool> for JValue {
    fn from(x: bool) -> JValue {
        JValue::Bool(x)
    }
}

impl From<i32> for JValue {
    fn from(x: i32) -> JValue {
        JValue::Int(x)
    }
}

impl From<i64> for JValue {
    fn from(x: i64) -> JValue {
        JValue::Long(x)
    }
}

impl From<Ref> for JValue {
    fn from(x: Ref) -> JValue {
        JValue::Object(Some(x))
    }
}

/// The return kind of a method, taken from the character after `)` in its descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Bool,
    Int,
    Long,
    Object,
}

impl ReturnType {
    pub fn from_descriptor(descriptor: &str) -> Result<ReturnType, Error> {
        let ret = descriptor
            .find(')')
            .and_then(|i| descriptor[i + 1..].chars().next())
            .ok_or(Error::InvalidArgument("method descriptor has no return type"))?;
        match ret {
            'V' => Ok(ReturnType::Void),
            'Z' => Ok(ReturnType::Bool),
            'I' => Ok(ReturnType::Int),
            'J' => Ok(ReturnType::Long),
            'L' | '[' => Ok(ReturnType::Object),
            _ => Err(Error::InvalidArgument("unsupported method return type")),
        }
    }
}

/// Which side of a call is the receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receiver {
    Static(Ref),
    Instance(Ref),
}

/// A native function registered on a managed class.
#[derive(Clone, Copy, Debug)]
pub struct NativeMethod {
    pub name: &'static str,
    pub signature: &'static str,
    pub fn_ptr: *mut c_void,
}

/// The execution context of one attached thread.
///
/// Methods mirror the embedding API one-to-one. None of them check for a pending fault; that is
/// the job of [`Checked`](../fault/struct.Checked.html), which every caller in this crate goes
/// through.
pub trait Env {
    /// The raw context pointer, for entry points that are not part of the function table.
    fn as_raw(&self) -> *mut c_void;

    fn version(&self) -> i32;

    fn find_class(&self, name: &str) -> Option<Ref>;

    fn define_class(&self, name: &str, bytes: &[u8]) -> Option<Ref>;

    fn object_class(&self, obj: Ref) -> Option<Ref>;

    fn method_id(&self, class: Ref, name: &str, descriptor: &str, is_static: bool)
        -> Option<MethodId>;

    fn call(&self, receiver: Receiver, method: MethodId, ret: ReturnType, args: &[JValue])
        -> JValue;

    fn new_object(&self, class: Ref, ctor: MethodId, args: &[JValue]) -> Option<Ref>;

    fn new_string(&self, s: &str) -> Option<Ref>;

    /// Allocate a managed byte array and copy `bytes` into it.
    fn new_byte_array(&self, bytes: &[u8]) -> Option<Ref>;

    fn new_object_array(&self, element_class: Ref, items: &[Ref]) -> Option<Ref>;

    fn new_global_ref(&self, obj: Ref) -> Option<Ref>;

    fn delete_global_ref(&self, obj: Ref);

    fn delete_local_ref(&self, obj: Ref);

    fn register_natives(&self, class: Ref, methods: &[NativeMethod]) -> bool;

    fn fault_pending(&self) -> bool;

    fn describe_fault(&self);

    fn clear_fault(&self);
}

/// One runtime instance.
pub trait Vm: Send + Sync {
    /// A stable identity for this instance, used to key per-thread attachment state.
    fn key(&self) -> usize;

    /// Get the context of the current thread if it is already attached.
    fn get_env(&self, version: JniVersion) -> Result<Box<dyn Env>, JniStatus>;

    fn attach_current_thread(&self, version: JniVersion) -> Result<Box<dyn Env>, JniStatus>;

    fn detach_current_thread(&self) -> Result<(), JniStatus>;

    /// Destroy the instance. This may block until every non-daemon managed thread finishes.
    fn destroy(&self) -> Result<(), JniStatus>;

    /// Print every managed thread's stack, if the runtime exports the diagnostic entry point.
    ///
    /// Returns `false` when the entry point is unavailable.
    fn dump_all_stacks(&self, env: &dyn Env) -> bool;
}

/// The process-level entry points of a loaded runtime library.
pub trait RuntimeLibrary: Send + Sync {
    /// Enumerate the runtime instances already living in this process.
    fn created_vms(&self) -> Result<Vec<Arc<dyn Vm>>, Error>;

    /// Create the process-wide runtime instance. The calling thread comes back attached.
    fn create_vm(
        &self,
        version: JniVersion,
        options: &[VmOption],
    ) -> Result<(Arc<dyn Vm>, Box<dyn Env>), JniStatus>;

    /// The runtime's default thread stack size in bytes, if it reports a sane one.
    fn default_stack_size(&self) -> Option<usize>;

    fn supports_stack_dump(&self) -> bool;
}
