//! The embedding API over a real runtime, through `jni-sys`.

use crate::embedding::{
    Env, JValue, JniStatus, JniVersion, MethodId, NativeMethod, Receiver, Ref, ReturnType, Vm,
};
use crate::library::dl::DumpAllStacks;
use jni_sys::{
    jboolean, jbyte, jmethodID, jobject, jsize, jstring, jvalue, JNIEnv, JNINativeMethod, JavaVM,
    JavaVMAttachArgs, JNI_OK, JNI_TRUE,
};
use libc::c_void;
use std::convert::TryFrom;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

/// Call an entry of a JNI function table, yielding `None` when the entry is absent.
macro_rules! jni {
    ($raw:expr, $name:ident $(, $arg:expr)*) => {
        match (**$raw).$name {
            Some(f) => Some(f($raw $(, $arg)*)),
            None => {
                tracing::error!("function table has no {}", stringify!($name));
                None
            }
        }
    };
}

pub struct JniVm {
    raw: *mut JavaVM,
    dump: Option<DumpAllStacks>,
}

// The invocation interface may be used from any thread.
unsafe impl Send for JniVm {}
unsafe impl Sync for JniVm {}

impl JniVm {
    pub(crate) fn new(raw: *mut JavaVM, dump: Option<DumpAllStacks>) -> JniVm {
        JniVm { raw, dump }
    }

    fn status(rv: Option<i32>) -> Result<(), JniStatus> {
        match rv {
            Some(JNI_OK) => Ok(()),
            Some(code) => Err(JniStatus::from(code)),
            None => Err(JniStatus::Err),
        }
    }
}

impl Vm for JniVm {
    fn key(&self) -> usize {
        self.raw as usize
    }

    fn get_env(&self, version: JniVersion) -> Result<Box<dyn Env>, JniStatus> {
        let mut env: *mut c_void = ptr::null_mut();
        let rv = unsafe { jni!(self.raw, GetEnv, &mut env, version.as_raw()) };
        JniVm::status(rv)?;
        Ok(Box::new(JniEnv::from_raw(env as *mut JNIEnv)))
    }

    fn attach_current_thread(&self, version: JniVersion) -> Result<Box<dyn Env>, JniStatus> {
        let mut env: *mut c_void = ptr::null_mut();
        let mut args = JavaVMAttachArgs {
            version: version.as_raw(),
            name: ptr::null_mut(),
            group: ptr::null_mut(),
        };
        let rv = unsafe {
            jni!(
                self.raw,
                AttachCurrentThread,
                &mut env,
                &mut args as *mut _ as *mut c_void
            )
        };
        JniVm::status(rv)?;
        Ok(Box::new(JniEnv::from_raw(env as *mut JNIEnv)))
    }

    fn detach_current_thread(&self) -> Result<(), JniStatus> {
        JniVm::status(unsafe { jni!(self.raw, DetachCurrentThread) })
    }

    fn destroy(&self) -> Result<(), JniStatus> {
        JniVm::status(unsafe { jni!(self.raw, DestroyJavaVM) })
    }

    fn dump_all_stacks(&self, env: &dyn Env) -> bool {
        match self.dump {
            Some(dump) => {
                unsafe { dump(env.as_raw() as *mut JNIEnv, ptr::null_mut()) };
                true
            }
            None => false,
        }
    }
}

/// The context of one attached thread.
pub struct JniEnv {
    raw: *mut JNIEnv,
}

impl JniEnv {
    pub(crate) fn from_raw(raw: *mut JNIEnv) -> JniEnv {
        JniEnv { raw }
    }
}

fn obj(r: Ref) -> jobject {
    r.as_raw() as jobject
}

fn wrap(o: jobject) -> Option<Ref> {
    Ref::from_raw(o as *mut c_void)
}

fn cstring(s: &str) -> Option<CString> {
    CString::new(s).ok()
}

fn raw_args(args: &[JValue]) -> Vec<jvalue> {
    args.iter()
        .map(|arg| {
            let mut v: jvalue = unsafe { std::mem::zeroed() };
            match *arg {
                JValue::Void => {}
                JValue::Bool(b) => v.z = b as jboolean,
                JValue::Int(i) => v.i = i,
                JValue::Long(j) => v.j = j,
                JValue::Object(o) => v.l = o.map(obj).unwrap_or(ptr::null_mut()),
            }
            v
        })
        .collect()
}

impl Env for JniEnv {
    fn as_raw(&self) -> *mut c_void {
        self.raw as *mut c_void
    }

    fn version(&self) -> i32 {
        unsafe { jni!(self.raw, GetVersion) }.unwrap_or(0)
    }

    fn find_class(&self, name: &str) -> Option<Ref> {
        let name = cstring(name)?;
        wrap(unsafe { jni!(self.raw, FindClass, name.as_ptr()) }?)
    }

    fn define_class(&self, name: &str, bytes: &[u8]) -> Option<Ref> {
        let name = cstring(name)?;
        let len = jsize::try_from(bytes.len()).ok()?;
        wrap(unsafe {
            jni!(
                self.raw,
                DefineClass,
                name.as_ptr(),
                ptr::null_mut(),
                bytes.as_ptr() as *const jbyte,
                len
            )
        }?)
    }

    fn object_class(&self, o: Ref) -> Option<Ref> {
        wrap(unsafe { jni!(self.raw, GetObjectClass, obj(o)) }?)
    }

    fn method_id(
        &self,
        class: Ref,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Option<MethodId> {
        let name = cstring(name)?;
        let sig = cstring(descriptor)?;
        let id = if is_static {
            unsafe { jni!(self.raw, GetStaticMethodID, obj(class), name.as_ptr(), sig.as_ptr()) }
        } else {
            unsafe { jni!(self.raw, GetMethodID, obj(class), name.as_ptr(), sig.as_ptr()) }
        }?;
        MethodId::from_raw(id as *mut c_void)
    }

    fn call(
        &self,
        receiver: Receiver,
        method: MethodId,
        ret: ReturnType,
        args: &[JValue],
    ) -> JValue {
        let args = raw_args(args);
        let a = args.as_ptr();
        let m = method.as_raw() as jmethodID;
        let env = self.raw;
        let value = unsafe {
            match (receiver, ret) {
                (Receiver::Static(c), ReturnType::Void) => {
                    jni!(env, CallStaticVoidMethodA, obj(c), m, a).map(|_| JValue::Void)
                }
                (Receiver::Static(c), ReturnType::Bool) => {
                    jni!(env, CallStaticBooleanMethodA, obj(c), m, a)
                        .map(|z| JValue::Bool(z == JNI_TRUE))
                }
                (Receiver::Static(c), ReturnType::Int) => {
                    jni!(env, CallStaticIntMethodA, obj(c), m, a).map(JValue::Int)
                }
                (Receiver::Static(c), ReturnType::Long) => {
                    jni!(env, CallStaticLongMethodA, obj(c), m, a).map(JValue::Long)
                }
                (Receiver::Static(c), ReturnType::Object) => {
                    jni!(env, CallStaticObjectMethodA, obj(c), m, a)
                        .map(|o| JValue::Object(wrap(o)))
                }
                (Receiver::Instance(o), ReturnType::Void) => {
                    jni!(env, CallVoidMethodA, obj(o), m, a).map(|_| JValue::Void)
                }
                (Receiver::Instance(o), ReturnType::Bool) => {
                    jni!(env, CallBooleanMethodA, obj(o), m, a)
                        .map(|z| JValue::Bool(z == JNI_TRUE))
                }
                (Receiver::Instance(o), ReturnType::Int) => {
                    jni!(env, CallIntMethodA, obj(o), m, a).map(JValue::Int)
                }
                (Receiver::Instance(o), ReturnType::Long) => {
                    jni!(env, CallLongMethodA, obj(o), m, a).map(JValue::Long)
                }
                (Receiver::Instance(o), ReturnType::Object) => {
                    jni!(env, CallObjectMethodA, obj(o), m, a).map(|r| JValue::Object(wrap(r)))
                }
            }
        };
        value.unwrap_or(JValue::Void)
    }

    fn new_object(&self, class: Ref, ctor: MethodId, args: &[JValue]) -> Option<Ref> {
        let args = raw_args(args);
        let ctor = ctor.as_raw() as jmethodID;
        wrap(unsafe { jni!(self.raw, NewObjectA, obj(class), ctor, args.as_ptr()) }?)
    }

    fn new_string(&self, s: &str) -> Option<Ref> {
        let s = cstring(s)?;
        wrap(unsafe { jni!(self.raw, NewStringUTF, s.as_ptr()) }?)
    }

    fn new_byte_array(&self, bytes: &[u8]) -> Option<Ref> {
        let len = jsize::try_from(bytes.len()).ok()?;
        let array = wrap(unsafe { jni!(self.raw, NewByteArray, len) }?)?;
        unsafe {
            jni!(
                self.raw,
                SetByteArrayRegion,
                obj(array),
                0,
                len,
                bytes.as_ptr() as *const jbyte
            )
        }?;
        Some(array)
    }

    fn new_object_array(&self, element_class: Ref, items: &[Ref]) -> Option<Ref> {
        let len = jsize::try_from(items.len()).ok()?;
        let array = wrap(unsafe {
            jni!(self.raw, NewObjectArray, len, obj(element_class), ptr::null_mut())
        }?)?;
        for (i, item) in items.iter().enumerate() {
            unsafe { jni!(self.raw, SetObjectArrayElement, obj(array), i as jsize, obj(*item)) }?;
        }
        Some(array)
    }

    fn new_global_ref(&self, o: Ref) -> Option<Ref> {
        wrap(unsafe { jni!(self.raw, NewGlobalRef, obj(o)) }?)
    }

    fn delete_global_ref(&self, o: Ref) {
        unsafe { jni!(self.raw, DeleteGlobalRef, obj(o)) };
    }

    fn delete_local_ref(&self, o: Ref) {
        unsafe { jni!(self.raw, DeleteLocalRef, obj(o)) };
    }

    fn register_natives(&self, class: Ref, methods: &[NativeMethod]) -> bool {
        let mut keep = Vec::with_capacity(methods.len());
        let mut raw = Vec::with_capacity(methods.len());
        for m in methods {
            let (name, sig) = match (cstring(m.name), cstring(m.signature)) {
                (Some(name), Some(sig)) => (name, sig),
                _ => return false,
            };
            raw.push(JNINativeMethod {
                name: name.as_ptr() as *mut c_char,
                signature: sig.as_ptr() as *mut c_char,
                fnPtr: m.fn_ptr,
            });
            keep.push((name, sig));
        }
        let count = raw.len() as i32;
        let rv = unsafe { jni!(self.raw, RegisterNatives, obj(class), raw.as_ptr(), count) };
        rv == Some(JNI_OK)
    }

    fn fault_pending(&self) -> bool {
        let pending = unsafe { jni!(self.raw, ExceptionCheck) };
        pending == Some(JNI_TRUE)
    }

    fn describe_fault(&self) {
        unsafe { jni!(self.raw, ExceptionDescribe) };
    }

    fn clear_fault(&self) {
        unsafe { jni!(self.raw, ExceptionClear) };
    }
}

/// Read a managed string handed to a native callback.
///
/// # Safety
///
/// `env` must be the context of the calling thread, and `s` a live string reference or null.
pub(crate) unsafe fn read_string(env: *mut JNIEnv, s: jstring) -> Option<String> {
    if env.is_null() || s.is_null() {
        return None;
    }
    let chars = jni!(env, GetStringUTFChars, s, ptr::null_mut())?;
    if chars.is_null() {
        return None;
    }
    let out = CStr::from_ptr(chars).to_string_lossy().into_owned();
    jni!(env, ReleaseStringUTFChars, s, chars);
    Some(out)
}
