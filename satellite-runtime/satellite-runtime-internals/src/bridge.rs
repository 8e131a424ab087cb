//! The lifecycle protocol spoken with the bootstrapped loader object.
//!
//! Outbound, the host calls a fixed set of methods on the loader. Inbound, the loader's class gets
//! two native methods, `shutdown(Z)V` and `failed(Ljava/lang/String;)V`, which may be called on
//! any managed thread and only post events to the [control channel](../control/index.html).

use crate::attach::AttachGuard;
use crate::control;
use crate::embedding::jni::read_string;
use crate::embedding::{JValue, NativeMethod, Receiver, Ref, ReturnType};
use crate::error::Error;
use crate::fault::Checked;
use crate::vm::VmInstance;
use jni_sys::{jboolean, jobject, jstring, JNIEnv, JNI_TRUE};

/// One operation of the lifecycle protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    Load,
    Resume,
    Pause,
    Destroy,
    Version,
    Check,
}

impl LifecycleOp {
    pub fn method_name(self) -> &'static str {
        match self {
            LifecycleOp::Load => "load",
            LifecycleOp::Resume => "resume",
            LifecycleOp::Pause => "pause",
            LifecycleOp::Destroy => "destroy",
            LifecycleOp::Version => "version",
            LifecycleOp::Check => "check",
        }
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            LifecycleOp::Load => "(Ljava/lang/String;[Ljava/lang/String;)Z",
            LifecycleOp::Resume | LifecycleOp::Pause | LifecycleOp::Destroy => "()Z",
            LifecycleOp::Version => "()V",
            LifecycleOp::Check => "(Ljava/lang/String;)Z",
        }
    }

    pub fn failure_message(self) -> &'static str {
        match self {
            LifecycleOp::Load => "Cannot load the daemon",
            LifecycleOp::Resume => "Cannot start",
            LifecycleOp::Pause => "Cannot stop",
            LifecycleOp::Destroy => "Cannot destroy",
            LifecycleOp::Version => "Cannot print the version",
            LifecycleOp::Check => "Invalid daemon",
        }
    }

    /// Whether a failure of this operation aborts host startup.
    pub fn fatal_to_startup(self) -> bool {
        match self {
            LifecycleOp::Load | LifecycleOp::Version => true,
            _ => false,
        }
    }

    fn return_type(self) -> ReturnType {
        match self {
            LifecycleOp::Version => ReturnType::Void,
            _ => ReturnType::Bool,
        }
    }
}

/// Name and descriptor of each native callback registered on the loader's class.
pub const CALLBACKS: [(&str, &str); 2] = [
    ("shutdown", "(Z)V"),
    ("failed", "(Ljava/lang/String;)V"),
];

extern "system" fn shutdown_callback(_env: *mut JNIEnv, _source: jobject, reload: jboolean) {
    control::on_shutdown(reload == JNI_TRUE);
}

extern "system" fn failed_callback(env: *mut JNIEnv, _source: jobject, message: jstring) {
    let message = unsafe { read_string(env, message) };
    control::on_failed(message);
}

/// Drives the lifecycle protocol over a bootstrapped [`VmInstance`].
pub struct LifecycleBridge<'a> {
    instance: &'a VmInstance,
    loader: Ref,
}

impl<'a> LifecycleBridge<'a> {
    pub fn new(instance: &'a VmInstance) -> Result<LifecycleBridge<'a>, Error> {
        let loader = instance
            .loader()
            .map(|l| l.object())
            .ok_or(Error::InvalidArgument("runtime instance has no loader"))?;
        Ok(LifecycleBridge { instance, loader })
    }

    fn invoke(&self, op: LifecycleOp, args: &[&str], extra: &[String]) -> Result<(), Error> {
        let env = self.instance.env()?;
        let checked = Checked::new(&*env);

        let class = checked
            .object_class(self.loader)
            .ok_or(Error::ProtocolFailure(op))?;
        let method = checked.method_id(class, op.method_name(), op.descriptor(), false);
        checked.env().delete_local_ref(class);
        let method = match method {
            Some(m) => m,
            None => {
                tracing::error!("Cannot find loader \"{}\" entry point", op.method_name());
                return Err(Error::ProtocolFailure(op));
            }
        };

        let mut locals = vec![];
        let mut values = vec![];
        for arg in args {
            let s = checked
                .new_string(arg)
                .ok_or(Error::InvocationFailure(op))?;
            locals.push(s);
            values.push(JValue::from(s));
        }
        if op == LifecycleOp::Load {
            let array = string_array(&checked, extra).ok_or(Error::InvocationFailure(op))?;
            locals.push(array);
            values.push(JValue::from(array));
        }

        let result = checked.call(
            Receiver::Instance(self.loader),
            method,
            op.return_type(),
            &values,
        );
        for local in locals {
            checked.env().delete_local_ref(local);
        }
        let succeeded = match (op.return_type(), result) {
            (ReturnType::Void, Some(JValue::Void)) => true,
            (ReturnType::Bool, Some(JValue::Bool(true))) => true,
            _ => false,
        };
        if succeeded {
            tracing::debug!("loader {} succeeded", op.method_name());
            Ok(())
        } else {
            tracing::error!("{}", op.failure_message());
            Err(Error::InvocationFailure(op))
        }
    }

    /// Hand the archive and its arguments to the loader.
    pub fn load(&self, archive: &str, args: &[String]) -> Result<(), Error> {
        self.invoke(LifecycleOp::Load, &[archive], args)
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.invoke(LifecycleOp::Resume, &[], &[])
    }

    pub fn pause(&self) -> Result<(), Error> {
        self.invoke(LifecycleOp::Pause, &[], &[])
    }

    pub fn destroy(&self) -> Result<(), Error> {
        self.invoke(LifecycleOp::Destroy, &[], &[])
    }

    /// Have the managed side print its version.
    pub fn version(&self) -> Result<(), Error> {
        self.invoke(LifecycleOp::Version, &[], &[])
    }

    /// Ask the loader whether `archive` is a valid daemon.
    pub fn check(&self, archive: &str) -> Result<(), Error> {
        self.invoke(LifecycleOp::Check, &[archive], &[])
    }

    /// Register the inbound `shutdown` and `failed` callbacks on the loader's class.
    pub fn register_callbacks(&self) -> Result<(), Error> {
        let env = self.instance.env()?;
        let checked = Checked::new(&*env);
        let class = checked
            .object_class(self.loader)
            .ok_or_else(|| Error::BootstrapFailure("cannot find the loader class".to_owned()))?;
        let methods = [
            NativeMethod {
                name: CALLBACKS[0].0,
                signature: CALLBACKS[0].1,
                fn_ptr: shutdown_callback as *const () as *mut libc::c_void,
            },
            NativeMethod {
                name: CALLBACKS[1].0,
                signature: CALLBACKS[1].1,
                fn_ptr: failed_callback as *const () as *mut libc::c_void,
            },
        ];
        let registered = checked.register_natives(class, &methods);
        checked.env().delete_local_ref(class);
        if registered {
            tracing::debug!("native callbacks registered");
            Ok(())
        } else {
            tracing::error!("Cannot register native methods");
            Err(Error::BootstrapFailure(
                "cannot register native callbacks".to_owned(),
            ))
        }
    }

    /// Print every managed thread's stack. Returns `false` when the runtime cannot.
    pub fn dump_stacks(&self) -> Result<bool, Error> {
        dump_stacks(self.instance)
    }
}

/// Print every managed thread's stack, attaching the calling thread for the duration if needed.
pub fn dump_stacks(instance: &VmInstance) -> Result<bool, Error> {
    if !instance.library().supports_stack_dump() {
        tracing::warn!("runtime cannot dump thread stacks");
        return Ok(false);
    }
    let guard = AttachGuard::new(instance.vm().clone(), instance.version())?;
    Ok(instance.vm().dump_all_stacks(guard.env()))
}

fn string_array(checked: &Checked<'_>, items: &[String]) -> Option<Ref> {
    let class = checked.find_class("java/lang/String")?;
    let mut strings = Vec::with_capacity(items.len());
    for item in items {
        strings.push(checked.new_string(item)?);
    }
    let array = checked.new_object_array(class, &strings);
    for s in strings {
        checked.env().delete_local_ref(s);
    }
    checked.env().delete_local_ref(class);
    array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_table() {
        let ops = [
            (LifecycleOp::Load, "load", "(Ljava/lang/String;[Ljava/lang/String;)Z"),
            (LifecycleOp::Resume, "resume", "()Z"),
            (LifecycleOp::Pause, "pause", "()Z"),
            (LifecycleOp::Destroy, "destroy", "()Z"),
            (LifecycleOp::Version, "version", "()V"),
            (LifecycleOp::Check, "check", "(Ljava/lang/String;)Z"),
        ];
        for (op, name, descriptor) in ops.iter() {
            assert_eq!(op.method_name(), *name);
            assert_eq!(op.descriptor(), *descriptor);
        }
    }

    #[test]
    fn only_load_and_version_abort_startup() {
        assert!(LifecycleOp::Load.fatal_to_startup());
        assert!(LifecycleOp::Version.fatal_to_startup());
        assert!(!LifecycleOp::Resume.fatal_to_startup());
        assert!(!LifecycleOp::Check.fatal_to_startup());
        assert_eq!(
            Error::InvocationFailure(LifecycleOp::Resume).to_string(),
            "Cannot start"
        );
        assert_eq!(
            Error::ProtocolFailure(LifecycleOp::Pause).to_string(),
            "Cannot find loader \"pause\" entry point"
        );
    }
}
