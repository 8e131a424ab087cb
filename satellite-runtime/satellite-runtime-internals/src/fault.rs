//! Managed fault discipline.
//!
//! Every call into the runtime may leave a fault pending, and almost no embedding function may be
//! called while one is. [`Checked`] wraps an [`Env`] so that each operation checks for a fault as
//! soon as it returns, describes it to the runtime's error stream and clears it. A fault turns the
//! operation's result into `None`.

use crate::embedding::{Env, JValue, MethodId, NativeMethod, Receiver, Ref, ReturnType};

#[derive(Clone, Copy)]
pub struct Checked<'a> {
    env: &'a dyn Env,
}

impl<'a> Checked<'a> {
    pub fn new(env: &'a dyn Env) -> Checked<'a> {
        Checked { env }
    }

    pub fn env(&self) -> &'a dyn Env {
        self.env
    }

    /// Describe and clear the pending fault, if any. Returns whether there was one.
    pub fn take_fault(&self) -> bool {
        if self.env.fault_pending() {
            self.env.describe_fault();
            self.env.clear_fault();
            true
        } else {
            false
        }
    }

    fn checked<T>(&self, value: Option<T>) -> Option<T> {
        if self.take_fault() {
            None
        } else {
            value
        }
    }

    pub fn find_class(&self, name: &str) -> Option<Ref> {
        self.checked(self.env.find_class(name))
    }

    pub fn define_class(&self, name: &str, bytes: &[u8]) -> Option<Ref> {
        self.checked(self.env.define_class(name, bytes))
    }

    pub fn object_class(&self, obj: Ref) -> Option<Ref> {
        self.checked(self.env.object_class(obj))
    }

    pub fn method_id(
        &self,
        class: Ref,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Option<MethodId> {
        self.checked(self.env.method_id(class, name, descriptor, is_static))
    }

    pub fn call(
        &self,
        receiver: Receiver,
        method: MethodId,
        ret: ReturnType,
        args: &[JValue],
    ) -> Option<JValue> {
        let value = self.env.call(receiver, method, ret, args);
        self.checked(Some(value))
    }

    pub fn new_object(&self, class: Ref, ctor: MethodId, args: &[JValue]) -> Option<Ref> {
        self.checked(self.env.new_object(class, ctor, args))
    }

    pub fn new_string(&self, s: &str) -> Option<Ref> {
        self.checked(self.env.new_string(s))
    }

    pub fn new_byte_array(&self, bytes: &[u8]) -> Option<Ref> {
        self.checked(self.env.new_byte_array(bytes))
    }

    pub fn new_object_array(&self, element_class: Ref, items: &[Ref]) -> Option<Ref> {
        self.checked(self.env.new_object_array(element_class, items))
    }

    pub fn new_global_ref(&self, obj: Ref) -> Option<Ref> {
        self.checked(self.env.new_global_ref(obj))
    }

    pub fn register_natives(&self, class: Ref, methods: &[NativeMethod]) -> bool {
        let ok = self.env.register_natives(class, methods);
        !self.take_fault() && ok
    }
}
