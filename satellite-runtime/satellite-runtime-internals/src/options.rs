//! Construction of the runtime creation options.
//!
//! Options are built as plain [`VmOption`] values so their order can be inspected and tested;
//! [`PendingOptionBuffer`] turns them into the NUL-terminated strings and raw option records the
//! creation entry point consumes, and frees them as soon as it is dropped.

use crate::error::Error;
use crate::hooks::OptionHook;
use jni_sys::{jint, JavaVMInitArgs, JavaVMOption, JNI_FALSE};
use std::ffi::CString;
use std::fs;
use std::os::raw::c_char;
use std::path::Path;
use std::ptr;

/// The property key every classpath option starts with.
pub const CLASSPATH_KEY: &str = "-Djava.class.path=";

/// Separator between classpath segments.
pub const CLASSPATH_SEPARATOR: char = ';';

/// One runtime creation option: its text, and the hook passed as its extra info, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmOption {
    pub text: String,
    pub hook: Option<OptionHook>,
}

impl VmOption {
    pub fn plain<S: Into<String>>(text: S) -> VmOption {
        VmOption {
            text: text.into(),
            hook: None,
        }
    }

    pub fn hooked(hook: OptionHook) -> VmOption {
        VmOption {
            text: hook.option_text().to_owned(),
            hook: Some(hook),
        }
    }
}

/// Build the ordered option list.
///
/// The explicit options come first, in the order given. They are followed by a fixed suffix:
/// classpath, diagnostic print hook (when enabled), exit hook, minimum heap, maximum heap and
/// thread stack size. The exit hook is always present. A size of zero, or an empty classpath,
/// leaves its slot out.
pub fn build_options(
    explicit: &[String],
    classpath: Option<&str>,
    heap_min_mb: u32,
    heap_max_mb: u32,
    stack_kb: u32,
    enable_diagnostic_hook: bool,
) -> Vec<VmOption> {
    let mut options: Vec<VmOption> = explicit.iter().cloned().map(VmOption::plain).collect();

    if let Some(cp) = classpath.filter(|cp| !cp.is_empty()) {
        options.push(VmOption::plain(expand_classpath(cp)));
    }
    if enable_diagnostic_hook {
        options.push(VmOption::hooked(OptionHook::Vfprintf));
    }
    options.push(VmOption::hooked(OptionHook::Exit));
    if heap_min_mb > 0 {
        options.push(VmOption::plain(format!("-Xms{}m", heap_min_mb)));
    }
    if heap_max_mb > 0 {
        options.push(VmOption::plain(format!("-Xmx{}m", heap_max_mb)));
    }
    if stack_kb > 0 {
        options.push(VmOption::plain(format!("-Xss{}k", stack_kb)));
    }
    options
}

/// Expand wildcard segments of `classpath` against the filesystem, and prefix the result with
/// [`CLASSPATH_KEY`].
pub fn expand_classpath(classpath: &str) -> String {
    expand_classpath_with(classpath, list_dir)
}

/// Like [`expand_classpath`], with the directory listing supplied by the caller.
///
/// `list` returns the file names found in a directory, in discovery order.
pub fn expand_classpath_with<F>(classpath: &str, mut list: F) -> String
where
    F: FnMut(&Path) -> Vec<String>,
{
    let segments: Vec<String> = classpath
        .split(CLASSPATH_SEPARATOR)
        .map(|segment| {
            if segment.ends_with('*') {
                expand_segment(segment, &mut list).unwrap_or_else(|| segment.to_owned())
            } else {
                segment.to_owned()
            }
        })
        .collect();
    format!("{}{}", CLASSPATH_KEY, segments.join(&CLASSPATH_SEPARATOR.to_string()))
}

fn expand_segment<F>(segment: &str, list: &mut F) -> Option<String>
where
    F: FnMut(&Path) -> Vec<String>,
{
    let pattern = &segment[..segment.len() - 1];
    let split = pattern.rfind(|c| c == '/' || c == '\\').map(|i| i + 1).unwrap_or(0);
    let (dir, prefix) = pattern.split_at(split);
    let lookup = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };

    let jars: Vec<String> = list(lookup)
        .into_iter()
        .filter(|name| name.starts_with(prefix) && name.ends_with(".jar"))
        .map(|name| format!("{}{}", dir, name))
        .collect();
    if jars.is_empty() {
        tracing::debug!("classpath segment {} matched no archives", segment);
        None
    } else {
        Some(jars.join(&CLASSPATH_SEPARATOR.to_string()))
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(e) => {
            tracing::debug!("cannot list classpath directory {}: {}", dir.display(), e);
            vec![]
        }
    }
}

/// Owns the duplicated option strings and the raw option records until creation.
pub struct PendingOptionBuffer {
    // `raw` points into these; a `CString`'s heap buffer does not move when the vector grows
    _strings: Vec<CString>,
    raw: Vec<JavaVMOption>,
}

impl PendingOptionBuffer {
    pub fn new(options: &[VmOption]) -> Result<PendingOptionBuffer, Error> {
        let mut strings = Vec::with_capacity(options.len());
        let mut raw = Vec::with_capacity(options.len());
        for option in options {
            let s = CString::new(option.text.as_str())?;
            raw.push(JavaVMOption {
                optionString: s.as_ptr() as *mut c_char,
                extraInfo: option.hook.map(OptionHook::fn_ptr).unwrap_or(ptr::null_mut()),
            });
            strings.push(s);
        }
        Ok(PendingOptionBuffer {
            _strings: strings,
            raw,
        })
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The creation argument block. It borrows this buffer, which must outlive the creation call.
    pub fn init_args(&mut self, version: jint) -> JavaVMInitArgs {
        JavaVMInitArgs {
            version,
            nOptions: self.raw.len() as jint,
            options: self.raw.as_mut_ptr(),
            ignoreUnrecognized: JNI_FALSE,
        }
    }
}
