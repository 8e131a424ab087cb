use anyhow::{format_err, Error};
use clap::{App, AppSettings, Arg, ArgMatches};
use satellite_runtime::VmConfig;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Parse a human-readable size, reading a bare number in units of `bare_unit` bytes.
fn parse_humansized(desc: &str, bare_unit: u64) -> Result<u64, Error> {
    use human_size::{Byte, ParsingError, Size, SpecificSize};
    match desc.parse::<Size>() {
        Ok(s) => {
            let bytes: SpecificSize<Byte> = s.into();
            Ok(bytes.value() as u64)
        }
        Err(ParsingError::MissingMultiple) => desc
            .parse::<u64>()?
            .checked_mul(bare_unit)
            .ok_or_else(|| format_err!("size {:?} is too large", desc)),
        Err(e) => Err(format_err!("invalid size {:?}: {}", desc, e)),
    }
}

fn size_in(m: &ArgMatches<'_>, name: &str, unit: u64) -> Result<u32, Error> {
    match m.value_of(name) {
        Some(desc) => {
            let units = parse_humansized(desc, unit)? / unit;
            u32::try_from(units).map_err(|_| format_err!("size {:?} is too large", desc))
        }
        None => Ok(0),
    }
}

#[derive(Debug)]
pub struct Options {
    pub archive: String,
    pub args: Vec<String>,
    pub java_home: Option<PathBuf>,
    pub jvm_library: Option<PathBuf>,
    pub check: bool,
    pub print_version: bool,
    pub debug: bool,
    pub vm: VmConfig,
}

impl Options {
    pub fn from_args(m: &ArgMatches<'_>) -> Result<Self, Error> {
        let archive = m
            .value_of("archive")
            .ok_or_else(|| format_err!("an archive is required"))?
            .to_owned();
        let args = m
            .values_of("args")
            .map(|vals| vals.map(String::from).collect())
            .unwrap_or_default();

        let mut vm = VmConfig::default()
            .with_options(
                m.values_of("jvm_option")
                    .map(|vals| vals.map(String::from).collect())
                    .unwrap_or_default(),
            )
            .with_heap_min_mb(size_in(m, "heap_min", MIB)?)
            .with_heap_max_mb(size_in(m, "heap_max", MIB)?)
            .with_stack_kb(size_in(m, "stack_size", KIB)?)
            .with_diagnostic_hook(m.is_present("diagnostic"))
            .with_crash_restart(!m.is_present("no_restart"));
        if let Some(jvm) = m.value_of("jvm") {
            vm = vm.with_runtime(jvm);
        }
        if let Some(cp) = m.value_of("classpath") {
            vm = vm.with_classpath(cp);
        }
        if let Some(out) = m.value_of("stdout") {
            vm = vm.with_stdout(out);
        }
        if let Some(err) = m.value_of("stderr") {
            vm = vm.with_stderr(err);
        }
        if let Some(secs) = m.value_of("teardown_timeout") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| format_err!("invalid teardown timeout {:?}: {}", secs, e))?;
            vm = vm.with_teardown_timeout(Duration::from_secs(secs));
        }
        vm.validate()?;

        Ok(Options {
            archive,
            args,
            java_home: m.value_of("java_home").map(PathBuf::from),
            jvm_library: m.value_of("jvm_library").map(PathBuf::from),
            check: m.is_present("check"),
            print_version: m.is_present("version"),
            debug: m.is_present("debug"),
            vm,
        })
    }

    pub fn app() -> App<'static, 'static> {
        App::new("satellited")
            .about("Runs a JVM application as a daemon under an external supervisor")
            .setting(AppSettings::DisableVersion)
            .setting(AppSettings::TrailingVarArg)
            .arg(
                Arg::with_name("java_home")
                    .long("java-home")
                    .takes_value(true)
                    .help(
                        "runtime installation to look for the JVM library in (default: $JAVA_HOME)",
                    ),
            )
            .arg(
                Arg::with_name("jvm_library")
                    .long("jvm-library")
                    .takes_value(true)
                    .conflicts_with("java_home")
                    .help("explicit path of the JVM shared library"),
            )
            .arg(
                Arg::with_name("jvm")
                    .long("jvm")
                    .takes_value(true)
                    .help("JVM variant to use, e.g. server or client (default: first found)"),
            )
            .arg(
                Arg::with_name("classpath")
                    .long("classpath")
                    .visible_alias("cp")
                    .takes_value(true)
                    .help(
                        "';'-separated classpath; a segment ending in '*' expands to matching jars",
                    ),
            )
            .arg(
                Arg::with_name("jvm_option")
                    .long("jvm-option")
                    .short("J")
                    .takes_value(true)
                    .multiple(true)
                    .number_of_values(1)
                    .allow_hyphen_values(true)
                    .help("option passed to the JVM as is"),
            )
            .arg(
                Arg::with_name("heap_min")
                    .long("heap-min")
                    .takes_value(true)
                    .help("initial heap size, e.g. 64MiB (bare numbers are megabytes)"),
            )
            .arg(
                Arg::with_name("heap_max")
                    .long("heap-max")
                    .takes_value(true)
                    .help("maximum heap size, e.g. 1GiB (bare numbers are megabytes)"),
            )
            .arg(
                Arg::with_name("stack_size")
                    .long("stack-size")
                    .takes_value(true)
                    .help("managed thread stack size, e.g. 512KiB (bare numbers are kilobytes)"),
            )
            .arg(
                Arg::with_name("stdout")
                    .long("stdout")
                    .takes_value(true)
                    .help("file the managed standard output is appended to"),
            )
            .arg(
                Arg::with_name("stderr")
                    .long("stderr")
                    .takes_value(true)
                    .help("file the managed standard error is appended to"),
            )
            .arg(
                Arg::with_name("teardown_timeout")
                    .long("teardown-timeout")
                    .takes_value(true)
                    .help("seconds to wait for the JVM to be destroyed (default: 60)"),
            )
            .arg(
                Arg::with_name("diagnostic")
                    .long("diagnostic")
                    .help("route the JVM's own diagnostic output into the log"),
            )
            .arg(
                Arg::with_name("no_restart")
                    .long("no-restart")
                    .help("do not ask the supervisor for a restart when the JVM aborts"),
            )
            .arg(
                Arg::with_name("check")
                    .long("check")
                    .conflicts_with("version")
                    .help("only check that the archive is a valid daemon"),
            )
            .arg(
                Arg::with_name("version")
                    .long("version")
                    .help("print the daemon's version and exit"),
            )
            .arg(
                Arg::with_name("debug")
                    .long("debug")
                    .help("log at debug level regardless of SATELLITE_LOG"),
            )
            .arg(
                Arg::with_name("archive")
                    .required(true)
                    .help("the application archive to run"),
            )
            .arg(
                Arg::with_name("args")
                    .multiple(true)
                    .help(
                        "arguments handed to the application; \
                         put them after -- when they look like flags",
                    ),
            )
    }

    pub fn get() -> Result<Self, Error> {
        Self::from_args(&Self::app().get_matches())
    }
}
