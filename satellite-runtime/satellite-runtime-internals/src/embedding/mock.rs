//! A scriptable in-process runtime.
//!
//! [`MockRuntime`] implements the embedding traits with plain Rust state, so host logic can be
//! driven through creation, bootstrap, the lifecycle protocol and teardown without a runtime
//! installed. Behavior is chosen up front with [`MockRuntimeBuilder`]; what the host did is
//! recorded and can be inspected afterwards.

use crate::embedding::{
    Env, JValue, JniStatus, JniVersion, MethodId, NativeMethod, Receiver, Ref, ReturnType,
    RuntimeLibrary, Vm,
};
use crate::error::Error;
use crate::hooks::OptionHook;
use crate::options::VmOption;
use jni_sys::{jboolean, jint, jobject, jstring, JNIEnv, JNINativeInterface_, JNI_FALSE};
use libc::c_void;
use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// The leading bytes every valid archive starts with.
pub const ARCHIVE_MAGIC: &[u8] = b"PK\x03\x04";

/// What a scripted managed method does when called.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodBehavior {
    Returns(bool),
    /// The method completes without producing a value, whatever its descriptor says.
    ReturnsVoid,
    /// The method cannot be resolved.
    Missing,
    /// The method raises a managed fault.
    Faults,
}

/// What `System.exit` does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitBehavior {
    /// Report the status to the exit hook, then return to the caller.
    ReportAndReturn,
    /// Return without doing anything.
    Ignore,
}

#[derive(Clone, Debug)]
struct Script {
    existing_vm: bool,
    create_rejections: Vec<JniVersion>,
    create_failure: Option<JniStatus>,
    attach_rejections: Vec<JniVersion>,
    env_version: i32,
    destroy_delay: Duration,
    exit: ExitBehavior,
    methods: HashMap<String, MethodBehavior>,
    stack_dump: bool,
    reject_classes: bool,
    reject_natives: bool,
    default_stack_size: Option<usize>,
}

pub struct MockRuntimeBuilder {
    script: Script,
}

impl MockRuntimeBuilder {
    pub fn new() -> Self {
        MockRuntimeBuilder {
            script: Script {
                existing_vm: false,
                create_rejections: vec![],
                create_failure: None,
                attach_rejections: vec![],
                env_version: JniVersion::V1_8.as_raw(),
                destroy_delay: Duration::from_millis(0),
                exit: ExitBehavior::ReportAndReturn,
                methods: HashMap::new(),
                stack_dump: true,
                reject_classes: false,
                reject_natives: false,
                default_stack_size: Some(1024 * 1024),
            },
        }
    }

    /// Pretend a runtime instance was already created in this process by someone else.
    pub fn with_existing_vm(mut self) -> Self {
        self.script.existing_vm = true;
        self
    }

    /// Reject creation at `version` with a version error.
    pub fn with_create_rejection(mut self, version: JniVersion) -> Self {
        self.script.create_rejections.push(version);
        self
    }

    /// Fail every creation with `status`.
    pub fn with_create_failure(mut self, status: JniStatus) -> Self {
        self.script.create_failure = Some(status);
        self
    }

    /// Reject thread attachment at `version` with a version error.
    pub fn with_attach_rejection(mut self, version: JniVersion) -> Self {
        self.script.attach_rejections.push(version);
        self
    }

    /// The version every execution context reports.
    pub fn with_env_version(mut self, version: i32) -> Self {
        self.script.env_version = version;
        self
    }

    pub fn with_destroy_delay(mut self, delay: Duration) -> Self {
        self.script.destroy_delay = delay;
        self
    }

    pub fn with_exit_behavior(mut self, exit: ExitBehavior) -> Self {
        self.script.exit = exit;
        self
    }

    /// Script the loader method `name`. Unscripted methods return `true`.
    pub fn with_method(mut self, name: &str, behavior: MethodBehavior) -> Self {
        self.script.methods.insert(name.to_owned(), behavior);
        self
    }

    pub fn without_stack_dump(mut self) -> Self {
        self.script.stack_dump = false;
        self
    }

    /// Make class definition fail with a format fault.
    pub fn with_class_rejection(mut self) -> Self {
        self.script.reject_classes = true;
        self
    }

    pub fn with_native_rejection(mut self) -> Self {
        self.script.reject_natives = true;
        self
    }

    pub fn with_default_stack_size(mut self, size: Option<usize>) -> Self {
        self.script.default_stack_size = size;
        self
    }

    pub fn build(self) -> Arc<MockRuntime> {
        let mut table: Box<JNINativeInterface_> = Box::new(unsafe { std::mem::zeroed() });
        table.GetStringUTFChars = Some(get_string_utf_chars);
        table.ReleaseStringUTFChars = Some(release_string_utf_chars);
        let env = Box::new(&*table as *const JNINativeInterface_);
        Arc::new(MockRuntime {
            state: Arc::new(MockState {
                script: self.script,
                live: AtomicBool::new(false),
                creations: AtomicUsize::new(0),
                attaches: AtomicUsize::new(0),
                detaches: AtomicUsize::new(0),
                destroys: AtomicUsize::new(0),
                described: AtomicUsize::new(0),
                next_handle: AtomicUsize::new(0x1000),
                inner: Mutex::new(Inner::default()),
                raw: RawEnv { env, _table: table },
            }),
        })
    }
}

impl Default for MockRuntimeBuilder {
    fn default() -> Self {
        MockRuntimeBuilder::new()
    }
}

/// Objects living in the mock heap.
#[derive(Clone, Debug, PartialEq)]
pub enum MockObject {
    Class(String),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Ref>),
    Loader,
    /// An output stream writing to the given path.
    Stream(String),
}

#[derive(Clone, Debug)]
struct MockMethod {
    class: String,
    name: String,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<usize, MockObject>,
    classes: HashMap<String, Ref>,
    defined: HashSet<String>,
    methods: HashMap<usize, MockMethod>,
    globals: HashSet<usize>,
    attached: HashSet<ThreadId>,
    fault: Option<String>,
    calls: Vec<String>,
    natives: Vec<(String, String, usize)>,
    deleted_locals: HashSet<usize>,
    options: Vec<VmOption>,
    exit_hook: Option<usize>,
}

/// A function table that implements only what native callbacks need to read their arguments.
struct RawEnv {
    env: Box<*const JNINativeInterface_>,
    _table: Box<JNINativeInterface_>,
}

// The table is never written after construction.
unsafe impl Send for RawEnv {}
unsafe impl Sync for RawEnv {}

unsafe extern "system" fn get_string_utf_chars(
    _env: *mut JNIEnv,
    s: jstring,
    is_copy: *mut jboolean,
) -> *const c_char {
    if !is_copy.is_null() {
        *is_copy = JNI_FALSE;
    }
    // mock strings handed to callbacks are NUL-terminated buffers
    s as *const c_char
}

unsafe extern "system" fn release_string_utf_chars(
    _env: *mut JNIEnv,
    _s: jstring,
    _chars: *const c_char,
) {
}

struct MockState {
    script: Script,
    live: AtomicBool,
    creations: AtomicUsize,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    destroys: AtomicUsize,
    described: AtomicUsize,
    next_handle: AtomicUsize,
    inner: Mutex<Inner>,
    raw: RawEnv,
}

impl MockState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn alloc(&self, obj: MockObject) -> Ref {
        let handle = self.next_handle.fetch_add(16, Ordering::SeqCst);
        self.lock().objects.insert(handle, obj);
        Ref(handle as *mut c_void)
    }

    fn object(&self, r: Ref) -> Option<MockObject> {
        self.lock().objects.get(&(r.as_raw() as usize)).cloned()
    }

    fn raise(&self, fault: String) {
        self.lock().fault = Some(fault);
    }

    fn class(&self, name: &str) -> Ref {
        if let Some(c) = self.lock().classes.get(name) {
            return *c;
        }
        let c = self.alloc(MockObject::Class(name.to_owned()));
        self.lock().classes.insert(name.to_owned(), c);
        c
    }

    fn env(self: &Arc<Self>) -> Box<dyn Env> {
        Box::new(MockEnv {
            state: self.clone(),
        })
    }

    fn attach_current(&self) {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.lock().attached.insert(thread::current().id());
    }

    fn behavior(&self, method: &str) -> MethodBehavior {
        self.script
            .methods
            .get(method)
            .copied()
            .unwrap_or(MethodBehavior::Returns(true))
    }

    fn render(&self, value: &JValue) -> String {
        match value {
            JValue::Void => "void".to_owned(),
            JValue::Bool(b) => b.to_string(),
            JValue::Int(i) => i.to_string(),
            JValue::Long(j) => j.to_string(),
            JValue::Object(None) => "null".to_owned(),
            JValue::Object(Some(r)) => match self.object(*r) {
                Some(MockObject::Str(s)) | Some(MockObject::Stream(s)) => s,
                Some(MockObject::Array(items)) => {
                    let items: Vec<String> = items
                        .iter()
                        .map(|i| self.render(&JValue::Object(Some(*i))))
                        .collect();
                    format!("[{}]", items.join(", "))
                }
                Some(other) => format!("{:?}", other),
                None => "dangling".to_owned(),
            },
        }
    }
}

/// A scripted runtime library.
pub struct MockRuntime {
    state: Arc<MockState>,
}

impl MockRuntime {
    pub fn creations(&self) -> usize {
        self.state.creations.load(Ordering::SeqCst)
    }

    pub fn attaches(&self) -> usize {
        self.state.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.state.detaches.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.state.destroys.load(Ordering::SeqCst)
    }

    /// How many managed faults were described to the runtime's error stream.
    pub fn faults_described(&self) -> usize {
        self.state.described.load(Ordering::SeqCst)
    }

    pub fn fault_pending(&self) -> bool {
        self.state.lock().fault.is_some()
    }

    /// Managed calls made by the host, in order, rendered as `name(args)`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// The options the runtime was last created with.
    pub fn options(&self) -> Vec<VmOption> {
        self.state.lock().options.clone()
    }

    /// Names and signatures of the registered native methods.
    pub fn natives(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .natives
            .iter()
            .map(|(n, s, _)| (n.clone(), s.clone()))
            .collect()
    }

    pub fn live_global_refs(&self) -> usize {
        self.state.lock().globals.len()
    }

    /// Whether the host deleted a local reference to `r`.
    pub fn local_ref_deleted(&self, r: Ref) -> bool {
        self.state.lock().deleted_locals.contains(&(r.as_raw() as usize))
    }

    /// The reference the runtime hands out for the class `name`, if it has one.
    pub fn class_ref(&self, name: &str) -> Option<Ref> {
        self.state.lock().classes.get(name).copied()
    }

    /// Whether the calling thread is attached, as far as the runtime knows.
    pub fn is_thread_attached(&self) -> bool {
        self.state.lock().attached.contains(&thread::current().id())
    }

    pub fn object(&self, r: Ref) -> Option<MockObject> {
        self.state.object(r)
    }

    fn native(&self, name: &str) -> Option<usize> {
        self.state
            .lock()
            .natives
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, f)| *f)
    }

    /// Invoke the registered `shutdown` native from the calling thread, as a managed thread
    /// would. Returns `false` when nothing is registered under that name.
    pub fn fire_shutdown(&self, reload: bool) -> bool {
        match self.native("shutdown") {
            Some(f) => {
                let f: extern "system" fn(*mut JNIEnv, jobject, jboolean) =
                    unsafe { std::mem::transmute(f) };
                f(self.raw_env(), std::ptr::null_mut(), reload as jboolean);
                true
            }
            None => false,
        }
    }

    /// Invoke the registered `failed` native, with `message` as a managed string or null.
    pub fn fire_failed(&self, message: Option<&str>) -> bool {
        match self.native("failed") {
            Some(f) => {
                let f: extern "system" fn(*mut JNIEnv, jobject, jstring) =
                    unsafe { std::mem::transmute(f) };
                let message = message.map(|m| CString::new(m).unwrap_or_default());
                let arg = message
                    .as_ref()
                    .map(|m| m.as_ptr() as jstring)
                    .unwrap_or(std::ptr::null_mut());
                f(self.raw_env(), std::ptr::null_mut(), arg);
                true
            }
            None => false,
        }
    }

    fn raw_env(&self) -> *mut JNIEnv {
        &*self.state.raw.env as *const *const JNINativeInterface_ as *mut JNIEnv
    }

    fn vm(&self) -> Arc<dyn Vm> {
        Arc::new(MockVm {
            state: self.state.clone(),
        })
    }
}

impl RuntimeLibrary for MockRuntime {
    fn created_vms(&self) -> Result<Vec<Arc<dyn Vm>>, Error> {
        if self.state.script.existing_vm || self.state.live.load(Ordering::SeqCst) {
            Ok(vec![self.vm()])
        } else {
            Ok(vec![])
        }
    }

    fn create_vm(
        &self,
        version: JniVersion,
        options: &[VmOption],
    ) -> Result<(Arc<dyn Vm>, Box<dyn Env>), JniStatus> {
        self.state.creations.fetch_add(1, Ordering::SeqCst);
        if self.state.script.create_rejections.contains(&version) {
            return Err(JniStatus::Version);
        }
        if let Some(status) = self.state.script.create_failure {
            return Err(status);
        }
        if self.state.live.swap(true, Ordering::SeqCst) {
            return Err(JniStatus::Exists);
        }
        {
            let mut inner = self.state.lock();
            inner.options = options.to_vec();
            inner.exit_hook = options
                .iter()
                .find(|o| o.hook == Some(OptionHook::Exit))
                .map(|_| OptionHook::Exit.fn_ptr() as usize);
        }
        self.state.attach_current();
        Ok((self.vm(), self.state.env()))
    }

    fn default_stack_size(&self) -> Option<usize> {
        self.state.script.default_stack_size
    }

    fn supports_stack_dump(&self) -> bool {
        self.state.script.stack_dump
    }
}

pub struct MockVm {
    state: Arc<MockState>,
}

impl Vm for MockVm {
    fn key(&self) -> usize {
        Arc::as_ptr(&self.state) as usize
    }

    fn get_env(&self, _version: JniVersion) -> Result<Box<dyn Env>, JniStatus> {
        if self.state.lock().attached.contains(&thread::current().id()) {
            Ok(self.state.env())
        } else {
            Err(JniStatus::Detached)
        }
    }

    fn attach_current_thread(&self, version: JniVersion) -> Result<Box<dyn Env>, JniStatus> {
        if self.state.script.attach_rejections.contains(&version) {
            return Err(JniStatus::Version);
        }
        self.state.attach_current();
        Ok(self.state.env())
    }

    fn detach_current_thread(&self) -> Result<(), JniStatus> {
        self.state.detaches.fetch_add(1, Ordering::SeqCst);
        self.state.lock().attached.remove(&thread::current().id());
        Ok(())
    }

    fn destroy(&self) -> Result<(), JniStatus> {
        thread::sleep(self.state.script.destroy_delay);
        self.state.destroys.fetch_add(1, Ordering::SeqCst);
        self.state.live.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn dump_all_stacks(&self, _env: &dyn Env) -> bool {
        if self.state.script.stack_dump {
            self.state.lock().calls.push("dumpAllStacks()".to_owned());
            true
        } else {
            false
        }
    }
}

pub struct MockEnv {
    state: Arc<MockState>,
}

impl MockEnv {
    fn create_bootstrap(&self, args: &[JValue]) -> JValue {
        let archive = args
            .first()
            .and_then(JValue::as_object)
            .and_then(|r| self.state.object(r));
        match archive {
            Some(MockObject::Bytes(ref bytes)) if bytes.starts_with(ARCHIVE_MAGIC) => {
                self.state.lock().calls.push("createBootstrap()".to_owned());
                JValue::Object(Some(self.state.alloc(MockObject::Loader)))
            }
            _ => {
                self.state
                    .raise("java.util.zip.ZipException: not an archive".to_owned());
                JValue::Object(None)
            }
        }
    }

    fn system_exit(&self, args: &[JValue]) -> JValue {
        let status = match args.first() {
            Some(JValue::Int(i)) => *i,
            _ => 0,
        };
        let hook = {
            let mut inner = self.state.lock();
            inner.calls.push(format!("System.exit({})", status));
            inner.exit_hook
        };
        if let (ExitBehavior::ReportAndReturn, Some(hook)) = (self.state.script.exit, hook) {
            let hook: extern "system" fn(jint) = unsafe { std::mem::transmute(hook) };
            hook(status);
        }
        JValue::Void
    }

    fn lifecycle(&self, name: &str, ret: ReturnType, args: &[JValue]) -> JValue {
        let rendered: Vec<String> = args.iter().map(|a| self.state.render(a)).collect();
        self.state
            .lock()
            .calls
            .push(format!("{}({})", name, rendered.join(", ")));
        let result = match self.state.behavior(name) {
            MethodBehavior::Returns(b) => b,
            MethodBehavior::ReturnsVoid => return JValue::Void,
            MethodBehavior::Faults => {
                self.state
                    .raise(format!("java.lang.IllegalStateException: {} failed", name));
                false
            }
            MethodBehavior::Missing => false,
        };
        match ret {
            ReturnType::Bool => JValue::Bool(result),
            _ => JValue::Void,
        }
    }
}

impl Env for MockEnv {
    fn as_raw(&self) -> *mut c_void {
        &*self.state.raw.env as *const *const JNINativeInterface_ as *mut c_void
    }

    fn version(&self) -> i32 {
        self.state.script.env_version
    }

    fn find_class(&self, name: &str) -> Option<Ref> {
        let known = [
            "java/lang/System",
            "java/lang/String",
            "java/io/PrintStream",
            "java/io/FileOutputStream",
        ];
        if known.contains(&name) || self.state.lock().defined.contains(name) {
            Some(self.state.class(name))
        } else {
            self.state
                .raise(format!("java.lang.NoClassDefFoundError: {}", name));
            None
        }
    }

    fn define_class(&self, name: &str, bytes: &[u8]) -> Option<Ref> {
        if self.state.script.reject_classes || bytes.is_empty() {
            self.state
                .raise(format!("java.lang.ClassFormatError: {}", name));
            return None;
        }
        self.state.lock().defined.insert(name.to_owned());
        Some(self.state.class(name))
    }

    fn object_class(&self, obj: Ref) -> Option<Ref> {
        match self.state.object(obj)? {
            MockObject::Loader => {
                let name = self.state.lock().defined.iter().next().cloned()?;
                Some(self.state.class(&name))
            }
            MockObject::Str(_) => Some(self.state.class("java/lang/String")),
            _ => None,
        }
    }

    fn method_id(
        &self,
        class: Ref,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Option<MethodId> {
        let class_name = match self.state.object(class) {
            Some(MockObject::Class(c)) => c,
            _ => return None,
        };
        let known = match (class_name.as_str(), name, is_static) {
            ("java/lang/System", "exit", true) => descriptor == "(I)V",
            ("java/lang/System", "setOut", true) | ("java/lang/System", "setErr", true) => {
                descriptor == "(Ljava/io/PrintStream;)V"
            }
            ("java/io/FileOutputStream", "<init>", false) => descriptor == "(Ljava/lang/String;Z)V",
            ("java/io/PrintStream", "<init>", false) => descriptor == "(Ljava/io/OutputStream;Z)V",
            (c, "createBootstrap", true) => {
                self.state.lock().defined.contains(c)
                    && descriptor == "([B)Ljava/lang/Object;"
                    && self.state.behavior(name) != MethodBehavior::Missing
            }
            (c, _, false) => {
                self.state.lock().defined.contains(c)
                    && self.state.behavior(name) != MethodBehavior::Missing
            }
            _ => false,
        };
        if !known {
            self.state
                .raise(format!("java.lang.NoSuchMethodError: {}", name));
            return None;
        }
        let id = self.state.next_handle.fetch_add(16, Ordering::SeqCst);
        self.state.lock().methods.insert(
            id,
            MockMethod {
                class: class_name,
                name: name.to_owned(),
            },
        );
        Some(MethodId(id as *mut c_void))
    }

    fn call(
        &self,
        _receiver: Receiver,
        method: MethodId,
        ret: ReturnType,
        args: &[JValue],
    ) -> JValue {
        let method = match self.state.lock().methods.get(&(method.as_raw() as usize)) {
            Some(m) => m.clone(),
            None => return JValue::Void,
        };
        match (method.class.as_str(), method.name.as_str()) {
            (_, "createBootstrap") => self.create_bootstrap(args),
            ("java/lang/System", "exit") => self.system_exit(args),
            ("java/lang/System", stream) => {
                let target = args.first().map(|a| self.state.render(a)).unwrap_or_default();
                self.state
                    .lock()
                    .calls
                    .push(format!("System.{}({})", stream, target));
                JValue::Void
            }
            (_, name) => self.lifecycle(name, ret, args),
        }
    }

    fn new_object(&self, class: Ref, _ctor: MethodId, args: &[JValue]) -> Option<Ref> {
        match self.state.object(class)? {
            MockObject::Class(ref c)
                if c == "java/io/FileOutputStream" || c == "java/io/PrintStream" =>
            {
                let target = args.first().map(|a| self.state.render(a)).unwrap_or_default();
                Some(self.state.alloc(MockObject::Stream(target)))
            }
            _ => None,
        }
    }

    fn new_string(&self, s: &str) -> Option<Ref> {
        Some(self.state.alloc(MockObject::Str(s.to_owned())))
    }

    fn new_byte_array(&self, bytes: &[u8]) -> Option<Ref> {
        Some(self.state.alloc(MockObject::Bytes(bytes.to_vec())))
    }

    fn new_object_array(&self, _element_class: Ref, items: &[Ref]) -> Option<Ref> {
        Some(self.state.alloc(MockObject::Array(items.to_vec())))
    }

    fn new_global_ref(&self, obj: Ref) -> Option<Ref> {
        self.state.lock().globals.insert(obj.as_raw() as usize);
        Some(obj)
    }

    fn delete_global_ref(&self, obj: Ref) {
        self.state.lock().globals.remove(&(obj.as_raw() as usize));
    }

    fn delete_local_ref(&self, obj: Ref) {
        self.state
            .lock()
            .deleted_locals
            .insert(obj.as_raw() as usize);
    }

    fn register_natives(&self, _class: Ref, methods: &[NativeMethod]) -> bool {
        if self.state.script.reject_natives {
            return false;
        }
        let mut inner = self.state.lock();
        for m in methods {
            inner
                .natives
                .push((m.name.to_owned(), m.signature.to_owned(), m.fn_ptr as usize));
        }
        true
    }

    fn fault_pending(&self) -> bool {
        self.state.lock().fault.is_some()
    }

    fn describe_fault(&self) {
        if let Some(fault) = self.state.lock().fault.as_ref() {
            tracing::debug!("mock fault: {}", fault);
            self.state.described.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn clear_fault(&self) {
        self.state.lock().fault = None;
    }
}
