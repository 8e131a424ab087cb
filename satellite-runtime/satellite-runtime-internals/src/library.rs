//! Locating and dynamically loading the runtime's shared library.

pub(crate) mod dl;

pub use crate::library::dl::DlRuntime;

use crate::error::Error;
use std::path::{Path, PathBuf};

/// One installable flavor of the runtime found under a runtime home.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeVariant {
    /// Selector name, e.g. `server` or `client`.
    pub name: Option<String>,
    /// The shared library exporting the creation entry points.
    pub library: PathBuf,
    /// File names of support libraries that may have to be loaded before `library` links.
    pub companions: Vec<String>,
}

/// Everything the loader needs to know about the installed runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub home: Option<PathBuf>,
    /// Candidate variants in preference order.
    pub variants: Vec<RuntimeVariant>,
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        const LIBRARY_LAYOUT: &[(&str, &str)] = &[
            ("server", "bin/server/jvm.dll"),
            ("client", "bin/client/jvm.dll"),
            ("server", "jre/bin/server/jvm.dll"),
            ("client", "jre/bin/client/jvm.dll"),
        ];
        const COMPANIONS: &[&str] = &["msvcrt71.dll", "vcruntime140.dll"];
    } else if #[cfg(target_os = "macos")] {
        const LIBRARY_LAYOUT: &[(&str, &str)] = &[
            ("server", "lib/server/libjvm.dylib"),
            ("client", "lib/client/libjvm.dylib"),
            ("server", "jre/lib/server/libjvm.dylib"),
        ];
        const COMPANIONS: &[&str] = &["libjli.dylib", "libverify.dylib", "libjvm_compat.dylib"];
    } else {
        const LIBRARY_LAYOUT: &[(&str, &str)] = &[
            ("server", "lib/server/libjvm.so"),
            ("client", "lib/client/libjvm.so"),
            ("server", "jre/lib/amd64/server/libjvm.so"),
            ("client", "jre/lib/i386/client/libjvm.so"),
            ("server", "jre/lib/aarch64/server/libjvm.so"),
        ];
        const COMPANIONS: &[&str] = &["libjli.so"];
    }
}

impl RuntimeDescriptor {
    /// A descriptor with a single variant pointing at an explicit library path.
    pub fn from_library<P: Into<PathBuf>>(library: P) -> RuntimeDescriptor {
        RuntimeDescriptor {
            home: None,
            variants: vec![RuntimeVariant {
                name: None,
                library: library.into(),
                companions: COMPANIONS.iter().map(|s| s.to_string()).collect(),
            }],
        }
    }

    /// Look through the well-known library locations under `home` for the current platform.
    pub fn discover<P: AsRef<Path>>(home: P) -> RuntimeDescriptor {
        let home = home.as_ref();
        let variants = LIBRARY_LAYOUT
            .iter()
            .filter_map(|(name, rel)| {
                let library = home.join(rel);
                if library.is_file() {
                    tracing::debug!("found {} runtime in {}", name, library.display());
                    Some(RuntimeVariant {
                        name: Some(name.to_string()),
                        library,
                        companions: COMPANIONS.iter().map(|s| s.to_string()).collect(),
                    })
                } else {
                    None
                }
            })
            .collect();
        RuntimeDescriptor {
            home: Some(home.to_owned()),
            variants,
        }
    }

    /// Select a variant: the first one when `selector` is absent, otherwise the one named exactly
    /// `selector`.
    pub fn locate(&self, selector: Option<&str>) -> Result<&RuntimeVariant, Error> {
        let home = self
            .home
            .as_ref()
            .map(|h| h.display().to_string())
            .unwrap_or_else(|| "(unset)".to_owned());
        let first = self.variants.first().ok_or_else(|| {
            Error::LocateFailure(format!("cannot find any runtime in home {}", home))
        })?;
        match selector {
            None => {
                tracing::debug!("using default runtime in {}", first.library.display());
                Ok(first)
            }
            Some(sel) => {
                let variant = self
                    .variants
                    .iter()
                    .find(|v| v.name.as_deref() == Some(sel))
                    .ok_or_else(|| {
                        Error::LocateFailure(format!("invalid runtime name specified {}", sel))
                    })?;
                tracing::debug!("using specific runtime in {}", variant.library.display());
                Ok(variant)
            }
        }
    }
}

/// The primitive operations the load ladder is built from.
pub trait LibraryOpener {
    type Handle;

    fn exists(&self, path: &Path) -> bool;

    /// Link the library with the platform's default lookup rules.
    fn open(&self, path: &Path) -> Result<Self::Handle, String>;

    /// Link the library letting its own directory take part in resolving its dependencies.
    fn open_altered(&self, path: &Path) -> Result<Self::Handle, String>;

    /// Link a support library so its symbols are available to libraries linked later.
    fn preload(&self, path: &Path) -> Result<Self::Handle, String>;

    /// Make `dir` take part in resolving libraries linked from now on, where the platform allows.
    fn add_search_dir(&self, dir: &Path);

    /// The path the library is linked through once the search path has been widened.
    fn resolve(&self, path: &Path) -> PathBuf {
        path.to_owned()
    }
}

/// How far up from the runtime library the ladder looks for companions and search directories.
pub const PARENT_LEVELS: usize = 2;

/// One step of the load ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStep {
    /// Link the library as is.
    Direct,
    /// Preload a companion found next to, or above, the library; then link it.
    CompanionPreload,
    /// Add the library's parent directories to the search path; then link it through its resolved
    /// path.
    ///
    /// On unix the running dynamic loader reads its search path only at process start, so the
    /// directories matter for the loader's children alone. What this step changes there is the
    /// path: linking through the symlink-free location lets `$ORIGIN` in the library's run path
    /// point into the real installation.
    SearchPath,
    /// Link it with the altered search path flavor.
    AlteredSearchPath,
}

/// The fixed ladder walked by [`load_with`]. It never loops.
pub const LOAD_LADDER: [LoadStep; 4] = [
    LoadStep::Direct,
    LoadStep::CompanionPreload,
    LoadStep::SearchPath,
    LoadStep::AlteredSearchPath,
];

impl LoadStep {
    pub fn attempt<O: LibraryOpener>(
        self,
        opener: &O,
        path: &Path,
        companions: &[String],
        preloaded: &mut Vec<O::Handle>,
    ) -> Result<O::Handle, String> {
        match self {
            LoadStep::Direct => opener.open(path),
            LoadStep::CompanionPreload => {
                let found = path
                    .ancestors()
                    .skip(1)
                    .take(PARENT_LEVELS)
                    .flat_map(|dir| companions.iter().map(move |name| dir.join(name)))
                    .filter(|candidate| opener.exists(candidate))
                    .find_map(|candidate| match opener.preload(&candidate) {
                        Ok(handle) => {
                            tracing::debug!("preloaded {}", candidate.display());
                            Some(handle)
                        }
                        Err(e) => {
                            tracing::debug!("cannot preload {}: {}", candidate.display(), e);
                            None
                        }
                    });
                match found {
                    Some(handle) => {
                        preloaded.push(handle);
                        opener.open(path)
                    }
                    None => Err("no companion library found".to_owned()),
                }
            }
            LoadStep::SearchPath => {
                for dir in path.ancestors().skip(1).take(PARENT_LEVELS) {
                    tracing::debug!("adding {} to the library search path", dir.display());
                    opener.add_search_dir(dir);
                }
                let resolved = opener.resolve(path);
                if resolved.as_path() != path {
                    tracing::debug!("linking through {}", resolved.display());
                }
                opener.open(&resolved)
            }
            LoadStep::AlteredSearchPath => opener.open_altered(path),
        }
    }
}

/// A linked runtime library together with the companions that had to be preloaded for it.
pub struct Loaded<H> {
    pub handle: H,
    pub companions: Vec<H>,
    pub step: LoadStep,
}

/// Walk [`LOAD_LADDER`] until one step links `path`.
pub fn load_with<O: LibraryOpener>(
    opener: &O,
    path: &Path,
    companions: &[String],
) -> Result<Loaded<O::Handle>, Error> {
    if !opener.exists(path) {
        return Err(Error::LoadFailure(
            path.display().to_string(),
            "no such file".to_owned(),
        ));
    }
    let mut preloaded = vec![];
    let mut last_error = String::new();
    for step in LOAD_LADDER.iter() {
        tracing::debug!("loading {} ({:?})", path.display(), step);
        match step.attempt(opener, path, companions, &mut preloaded) {
            Ok(handle) => {
                tracing::debug!("runtime library {} loaded", path.display());
                return Ok(Loaded {
                    handle,
                    companions: preloaded,
                    step: *step,
                });
            }
            Err(e) => {
                tracing::debug!("{:?} failed for {}: {}", step, path.display(), e);
                last_error = e;
            }
        }
    }
    tracing::error!("Cannot dynamically link to {}", path.display());
    Err(Error::LoadFailure(path.display().to_string(), last_error))
}

/// The platform dynamic loader.
pub struct SystemOpener;

impl LibraryOpener for SystemOpener {
    type Handle = libloading::Library;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open(&self, path: &Path) -> Result<Self::Handle, String> {
        unsafe { libloading::Library::new(path) }.map_err(|e| e.to_string())
    }

    #[cfg(unix)]
    fn open_altered(&self, path: &Path) -> Result<Self::Handle, String> {
        use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
        unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }
            .map(Into::into)
            .map_err(|e| e.to_string())
    }

    #[cfg(windows)]
    fn open_altered(&self, path: &Path) -> Result<Self::Handle, String> {
        use libloading::os::windows::{Library, LOAD_WITH_ALTERED_SEARCH_PATH};
        unsafe { Library::load_with_flags(path, LOAD_WITH_ALTERED_SEARCH_PATH) }
            .map(Into::into)
            .map_err(|e| e.to_string())
    }

    #[cfg(unix)]
    fn preload(&self, path: &Path) -> Result<Self::Handle, String> {
        self.open_altered(path)
    }

    #[cfg(windows)]
    fn preload(&self, path: &Path) -> Result<Self::Handle, String> {
        self.open(path)
    }

    #[cfg(unix)]
    fn add_search_dir(&self, dir: &Path) {
        #[cfg(target_os = "macos")]
        const VAR: &str = "DYLD_LIBRARY_PATH";
        #[cfg(not(target_os = "macos"))]
        const VAR: &str = "LD_LIBRARY_PATH";

        // not reread by this process's loader; inherited by processes the runtime spawns
        let mut dirs = vec![dir.to_owned()];
        if let Some(existing) = std::env::var_os(VAR) {
            dirs.extend(std::env::split_paths(&existing));
        }
        if let Ok(joined) = std::env::join_paths(dirs) {
            std::env::set_var(VAR, joined);
        }
    }

    #[cfg(windows)]
    fn add_search_dir(&self, dir: &Path) {
        use std::os::windows::ffi::OsStrExt;
        type SetDllDirectoryW = unsafe extern "system" fn(*const u16) -> i32;

        let wide: Vec<u16> = dir.as_os_str().encode_wide().chain(Some(0)).collect();
        let kernel32 = match unsafe { libloading::Library::new("kernel32.dll") } {
            Ok(lib) => lib,
            Err(e) => {
                tracing::warn!("cannot load kernel32: {}", e);
                return;
            }
        };
        match unsafe { kernel32.get::<SetDllDirectoryW>(b"SetDllDirectoryW\0") } {
            Ok(set) => {
                unsafe { set(wide.as_ptr()) };
            }
            Err(e) => tracing::warn!("cannot resolve SetDllDirectoryW: {}", e),
        }
    }

    #[cfg(unix)]
    fn resolve(&self, path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Records every operation, and links only what it has been told to.
    #[derive(Default)]
    struct ScriptedOpener {
        files: HashSet<PathBuf>,
        direct_ok_after_preload: bool,
        search_ok: bool,
        altered_ok: bool,
        real_path: Option<PathBuf>,
        log: RefCell<Vec<String>>,
        preloaded: RefCell<bool>,
    }

    impl LibraryOpener for ScriptedOpener {
        type Handle = String;

        fn exists(&self, path: &Path) -> bool {
            self.files.contains(path)
        }

        fn open(&self, path: &Path) -> Result<String, String> {
            self.log.borrow_mut().push(format!("open {}", path.display()));
            let searched = self.log.borrow().iter().any(|l| l.starts_with("search"));
            if (*self.preloaded.borrow() && self.direct_ok_after_preload)
                || (searched && self.search_ok)
            {
                Ok(path.display().to_string())
            } else {
                Err("cannot open".to_owned())
            }
        }

        fn open_altered(&self, path: &Path) -> Result<String, String> {
            self.log.borrow_mut().push(format!("altered {}", path.display()));
            if self.altered_ok {
                Ok(path.display().to_string())
            } else {
                Err("cannot open altered".to_owned())
            }
        }

        fn preload(&self, path: &Path) -> Result<String, String> {
            self.log.borrow_mut().push(format!("preload {}", path.display()));
            *self.preloaded.borrow_mut() = true;
            Ok(path.display().to_string())
        }

        fn add_search_dir(&self, dir: &Path) {
            self.log.borrow_mut().push(format!("search {}", dir.display()));
        }

        fn resolve(&self, path: &Path) -> PathBuf {
            self.real_path.clone().unwrap_or_else(|| path.to_owned())
        }
    }

    fn lib() -> PathBuf {
        PathBuf::from("/jdk/lib/server/libjvm.so")
    }

    fn opener_with(files: &[&str]) -> ScriptedOpener {
        ScriptedOpener {
            files: files.iter().map(PathBuf::from).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_explicit_path_fails_without_walking() {
        let opener = opener_with(&[]);
        match load_with(&opener, &lib(), &[]) {
            Err(Error::LoadFailure(_, reason)) => assert_eq!(reason, "no such file"),
            other => panic!("unexpected result: {:?}", other.map(|l| l.handle)),
        }
        assert!(opener.log.borrow().is_empty());
    }

    #[test]
    fn companion_found_two_levels_up_is_preloaded() {
        let mut opener = opener_with(&["/jdk/lib/server/libjvm.so", "/jdk/lib/libjli.so"]);
        opener.direct_ok_after_preload = true;
        let loaded = load_with(&opener, &lib(), &["libjli.so".to_owned()]).expect("loads");
        assert_eq!(loaded.step, LoadStep::CompanionPreload);
        assert_eq!(loaded.companions, vec!["/jdk/lib/libjli.so".to_owned()]);
        assert_eq!(
            *opener.log.borrow(),
            vec![
                "open /jdk/lib/server/libjvm.so",
                "preload /jdk/lib/libjli.so",
                "open /jdk/lib/server/libjvm.so",
            ]
        );
    }

    #[test]
    fn companions_above_two_levels_are_ignored() {
        let opener = opener_with(&["/jdk/lib/server/libjvm.so", "/jdk/libjli.so"]);
        let step = LoadStep::CompanionPreload;
        let mut preloaded = vec![];
        assert!(step
            .attempt(&opener, &lib(), &["libjli.so".to_owned()], &mut preloaded)
            .is_err());
        assert!(preloaded.is_empty());
    }

    #[test]
    fn search_path_step_adds_both_parents() {
        let mut opener = opener_with(&["/jdk/lib/server/libjvm.so"]);
        opener.search_ok = true;
        let loaded = load_with(&opener, &lib(), &[]).expect("loads");
        assert_eq!(loaded.step, LoadStep::SearchPath);
        let log = opener.log.borrow();
        assert!(log.contains(&"search /jdk/lib/server".to_owned()));
        assert!(log.contains(&"search /jdk/lib".to_owned()));
        assert!(!log.contains(&"search /jdk".to_owned()));
    }

    #[test]
    fn search_path_step_links_through_the_resolved_path() {
        let mut opener = opener_with(&["/jdk/lib/server/libjvm.so"]);
        opener.search_ok = true;
        opener.real_path = Some(PathBuf::from("/opt/jdk-11/lib/server/libjvm.so"));
        let loaded = load_with(&opener, &lib(), &[]).expect("loads");
        assert_eq!(loaded.step, LoadStep::SearchPath);
        assert_eq!(loaded.handle, "/opt/jdk-11/lib/server/libjvm.so");
        assert!(opener
            .log
            .borrow()
            .contains(&"open /opt/jdk-11/lib/server/libjvm.so".to_owned()));
    }

    #[test]
    fn ladder_is_bounded() {
        let opener = opener_with(&["/jdk/lib/server/libjvm.so"]);
        assert!(matches!(
            load_with(&opener, &lib(), &[]),
            Err(Error::LoadFailure(_, _))
        ));
        let log = opener.log.borrow();
        let attempts = log
            .iter()
            .filter(|l| l.starts_with("open") || l.starts_with("altered"))
            .count();
        // direct, search path, altered; the companion step found nothing to preload
        assert_eq!(attempts, 3);
        assert_eq!(log.last().map(String::as_str), Some("altered /jdk/lib/server/libjvm.so"));
    }

    #[test]
    fn altered_search_is_the_final_step() {
        let mut opener = opener_with(&["/jdk/lib/server/libjvm.so"]);
        opener.altered_ok = true;
        let loaded = load_with(&opener, &lib(), &[]).expect("loads");
        assert_eq!(loaded.step, LoadStep::AlteredSearchPath);
    }

    #[test]
    fn locate_defaults_to_first_variant() {
        let desc = RuntimeDescriptor {
            home: Some(PathBuf::from("/jdk")),
            variants: vec![
                RuntimeVariant {
                    name: Some("server".to_owned()),
                    library: PathBuf::from("/jdk/server/libjvm.so"),
                    companions: vec![],
                },
                RuntimeVariant {
                    name: Some("client".to_owned()),
                    library: PathBuf::from("/jdk/client/libjvm.so"),
                    companions: vec![],
                },
            ],
        };
        assert_eq!(desc.locate(None).unwrap().library, PathBuf::from("/jdk/server/libjvm.so"));
        assert_eq!(
            desc.locate(Some("client")).unwrap().library,
            PathBuf::from("/jdk/client/libjvm.so")
        );
        assert!(matches!(desc.locate(Some("zero")), Err(Error::LocateFailure(_))));
    }

    #[test]
    fn locate_without_variants_fails() {
        let desc = RuntimeDescriptor::default();
        assert!(matches!(desc.locate(None), Err(Error::LocateFailure(_))));
    }

    #[test]
    fn discover_finds_installed_layout() {
        let home = tempfile::tempdir().expect("tempdir can be created");
        let (name, rel) = LIBRARY_LAYOUT[0];
        let lib = home.path().join(rel);
        std::fs::create_dir_all(lib.parent().unwrap()).unwrap();
        std::fs::write(&lib, b"").unwrap();
        let desc = RuntimeDescriptor::discover(home.path());
        assert_eq!(desc.variants.len(), 1);
        assert_eq!(desc.variants[0].name.as_deref(), Some(name));
        assert_eq!(desc.variants[0].library, lib);
    }
}
