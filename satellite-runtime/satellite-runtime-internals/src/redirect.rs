//! Pointing the managed standard streams at files.

use crate::embedding::{JValue, Receiver, Ref, ReturnType};
use crate::error::Error;
use crate::fault::Checked;
use crate::vm::VmInstance;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

impl Stream {
    fn setter(self) -> &'static str {
        match self {
            Stream::Out => "setOut",
            Stream::Err => "setErr",
        }
    }
}

/// Replace the managed `System.out` or `System.err` with an appending stream writing to `path`.
pub fn redirect(instance: &VmInstance, stream: Stream, path: &Path) -> Result<(), Error> {
    let env = instance.env()?;
    let checked = Checked::new(&*env);
    let target = path.to_string_lossy();

    let mut locals = vec![];
    let res = set_stream(checked, stream, &target, &mut locals);
    for local in locals {
        env.delete_local_ref(local);
    }
    if res.is_ok() {
        tracing::debug!("managed {:?} stream redirected to {}", stream, target);
    }
    res
}

fn set_stream(
    checked: Checked<'_>,
    stream: Stream,
    target: &str,
    locals: &mut Vec<Ref>,
) -> Result<(), Error> {
    let print_stream = match open_print_stream(checked, target, locals) {
        Some(s) => s,
        None => {
            sat_bail!("cannot open {} for the managed {:?} stream", target, stream);
        }
    };

    let system = keep(locals, checked.find_class("java/lang/System"));
    let setter = system.and_then(|system| {
        checked.method_id(system, stream.setter(), "(Ljava/io/PrintStream;)V", true)
    });
    let done = match (system, setter) {
        (Some(system), Some(setter)) => checked.call(
            Receiver::Static(system),
            setter,
            ReturnType::Void,
            &[JValue::from(print_stream)],
        ),
        _ => None,
    };
    sat_ensure!(done.is_some(), "cannot redirect the managed {:?} stream", stream);
    Ok(())
}

fn open_print_stream(checked: Checked<'_>, target: &str, locals: &mut Vec<Ref>) -> Option<Ref> {
    let file_class = keep(locals, checked.find_class("java/io/FileOutputStream"))?;
    let file_ctor = checked.method_id(file_class, "<init>", "(Ljava/lang/String;Z)V", false)?;
    let name = keep(locals, checked.new_string(target))?;
    let file_args = [JValue::from(name), JValue::Bool(true)];
    let file = keep(locals, checked.new_object(file_class, file_ctor, &file_args))?;
    let print_class = keep(locals, checked.find_class("java/io/PrintStream"))?;
    let print_ctor =
        checked.method_id(print_class, "<init>", "(Ljava/io/OutputStream;Z)V", false)?;
    let print_args = [JValue::from(file), JValue::Bool(true)];
    keep(locals, checked.new_object(print_class, print_ctor, &print_args))
}

fn keep(locals: &mut Vec<Ref>, r: Option<Ref>) -> Option<Ref> {
    if let Some(r) = r {
        locals.push(r);
    }
    r
}
