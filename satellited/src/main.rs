mod options;
mod resources;
mod signals;

use crate::options::Options;
use crate::resources::Resources;
use anyhow::{format_err, Context, Error};
use satellite_runtime::{
    bootstrap, control, redirect, teardown, vm_exit_code, ControlEvent, DlRuntime,
    LifecycleBridge, RuntimeDescriptor, Stream, VmFactory, VmInstance, RESTART_EXIT_CODE,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("SATELLITE_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let opts = match Options::get() {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    init_logging(opts.debug);

    match run(&opts) {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!("{:#}", err);
            process::exit(1);
        }
    }
}

fn load_runtime(opts: &Options) -> Result<Arc<DlRuntime>, Error> {
    let descriptor = match opts.jvm_library {
        Some(ref library) => RuntimeDescriptor::from_library(library),
        None => {
            let home = opts
                .java_home
                .clone()
                .or_else(|| std::env::var_os("JAVA_HOME").map(PathBuf::from))
                .ok_or_else(|| format_err!("no runtime given; use --java-home or set JAVA_HOME"))?;
            RuntimeDescriptor::discover(home)
        }
    };
    let runtime = DlRuntime::load_descriptor(&descriptor, opts.vm.runtime.as_deref())?;
    info!("using runtime library {}", runtime.path().display());
    Ok(runtime)
}

fn start(opts: &Options, resources: &Resources) -> Result<VmInstance, Error> {
    let runtime = load_runtime(opts).context("loading the runtime library")?;
    let mut instance = VmFactory::new(runtime)
        .create_with(&opts.vm)
        .context("creating the runtime")?;
    if let Err(e) = prepare(&mut instance, opts, resources) {
        finish(instance, opts);
        return Err(e);
    }
    Ok(instance)
}

/// Bootstrap the loader into a fresh runtime and wire up callbacks and output streams.
fn prepare(instance: &mut VmInstance, opts: &Options, resources: &Resources) -> Result<(), Error> {
    bootstrap::bootstrap(
        instance,
        resources.loader_class,
        resources.class_bytes,
        resources.archive,
    )
    .context("bootstrapping the loader")?;
    LifecycleBridge::new(instance)?
        .register_callbacks()
        .context("registering callbacks")?;
    if let Some(ref path) = opts.vm.stdout {
        redirect::redirect(instance, Stream::Out, path)?;
    }
    if let Some(ref path) = opts.vm.stderr {
        redirect::redirect(instance, Stream::Err, path)?;
    }
    Ok(())
}

/// Destroy the runtime, falling back to the exit code it reported when the destroy call hangs.
fn finish(instance: VmInstance, opts: &Options) -> i32 {
    match teardown::forced(instance, opts.vm.teardown_timeout) {
        Ok(code) => code,
        Err(satellite_runtime::Error::TeardownTimeout(_)) => vm_exit_code(),
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

fn run(opts: &Options) -> Result<i32, Error> {
    let resources = Resources::embedded()?;
    let control = control::install();
    signals::install().context("installing signal handling")?;

    let instance = start(opts, &resources)?;

    if opts.check || opts.print_version {
        let outcome = {
            let bridge = LifecycleBridge::new(&instance)?;
            if opts.check {
                bridge.check(&opts.archive)
            } else {
                bridge.version()
            }
        };
        let code = finish(instance, opts);
        return match outcome {
            Ok(()) => Ok(code),
            Err(e) => {
                error!("{}", e);
                Ok(1)
            }
        };
    }

    {
        let bridge = LifecycleBridge::new(&instance)?;
        if let Err(e) = bridge.load(&opts.archive, &opts.args) {
            drop(bridge);
            finish(instance, opts);
            return Err(e.into());
        }
        if let Err(e) = bridge.resume() {
            error!("{}", e);
            drop(bridge);
            return Ok(
                teardown::graceful(instance, 1, opts.vm.teardown_timeout).unwrap_or_else(|e| {
                    warn!("{}", e);
                    1
                }),
            );
        }
    }
    info!("daemon started");

    let event = control.wait();
    info!("{:?} requested", event);
    {
        let bridge = LifecycleBridge::new(&instance)?;
        if let Err(e) = bridge.pause() {
            error!("{}", e);
        }
        if let Err(e) = bridge.destroy() {
            error!("{}", e);
        }
    }
    let code = finish(instance, opts);

    Ok(match event {
        ControlEvent::Reload => RESTART_EXIT_CODE,
        ControlEvent::Shutdown => code,
    })
}
