//! Process-wide hooks handed to the runtime as option extra info, and the exit code cell the exit
//! hook writes to.

use jni_sys::jint;
use libc::c_void;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicI32, Ordering};

/// Exit status used to ask the external supervisor for a restart, both when the runtime aborts and
/// when the managed side requests a reload.
///
/// The supervisor recognizes this exact value; it must not change.
pub const RESTART_EXIT_CODE: i32 = 123;

static VM_EXIT_CODE: AtomicI32 = AtomicI32::new(0);

/// The exit code last reported by the runtime's exit hook, or 0.
pub fn vm_exit_code() -> i32 {
    VM_EXIT_CODE.load(Ordering::SeqCst)
}

pub fn set_vm_exit_code(code: i32) {
    VM_EXIT_CODE.store(code, Ordering::SeqCst)
}

/// Hooks that can be attached to a creation option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionHook {
    /// Redirects the runtime's own diagnostic printing into the host log.
    Vfprintf,
    /// Records the status passed to the managed process-exit entry point.
    Exit,
    /// Exits the host with [`RESTART_EXIT_CODE`] when the runtime aborts.
    Abort,
}

impl OptionHook {
    /// The reserved option string the runtime matches the hook by.
    pub fn option_text(self) -> &'static str {
        match self {
            OptionHook::Vfprintf => "vfprintf",
            OptionHook::Exit => "exit",
            OptionHook::Abort => "abort",
        }
    }

    pub fn fn_ptr(self) -> *mut c_void {
        match self {
            OptionHook::Vfprintf => print_hook as *const () as *mut c_void,
            OptionHook::Exit => exit_hook as *const () as *mut c_void,
            OptionHook::Abort => abort_hook as *const () as *mut c_void,
        }
    }
}

extern "system" fn exit_hook(code: jint) {
    tracing::debug!("Exit hook with exit code {}", code);
    set_vm_exit_code(code);
}

extern "system" fn abort_hook() {
    std::process::exit(RESTART_EXIT_CODE);
}

const PRINT_BUFFER_LEN: usize = 1024 + 16;

extern "system" fn print_hook(
    _fp: *mut libc::FILE,
    format: *const c_char,
    args: *mut c_void,
) -> jint {
    if format.is_null() {
        return 0;
    }
    let mut buf = [0 as c_char; PRINT_BUFFER_LEN];
    let written = unsafe { format_message(&mut buf, format, args) };
    let msg = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    tracing::info!(target: "satellite::vm", "{}", msg.to_string_lossy().trim_end());
    written
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, target_arch = "x86_64"))] {
        extern "C" {
            // `va_list` decays to a pointer to the register save area on this ABI
            fn vsnprintf(
                s: *mut c_char,
                n: libc::size_t,
                format: *const c_char,
                ap: *mut c_void,
            ) -> libc::c_int;
        }

        unsafe fn format_message(
            buf: &mut [c_char],
            format: *const c_char,
            args: *mut c_void,
        ) -> jint {
            vsnprintf(buf.as_mut_ptr(), buf.len(), format, args)
        }
    } else if #[cfg(windows)] {
        extern "C" {
            fn _vsnprintf(
                s: *mut c_char,
                n: libc::size_t,
                format: *const c_char,
                ap: *mut c_void,
            ) -> libc::c_int;
        }

        unsafe fn format_message(
            buf: &mut [c_char],
            format: *const c_char,
            args: *mut c_void,
        ) -> jint {
            let rv = _vsnprintf(buf.as_mut_ptr(), buf.len() - 1, format, args);
            buf[buf.len() - 1] = 0;
            rv
        }
    } else {
        // `va_list` is passed by value here, which stable Rust cannot express; log the template
        unsafe fn format_message(
            buf: &mut [c_char],
            format: *const c_char,
            _args: *mut c_void,
        ) -> jint {
            let template = std::ffi::CStr::from_ptr(format).to_bytes();
            let n = template.len().min(buf.len() - 1);
            std::ptr::copy_nonoverlapping(format, buf.as_mut_ptr(), n);
            buf[n] = 0;
            n as jint
        }
    }
}
