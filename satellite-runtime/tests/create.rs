mod test_helpers;

use crate::test_helpers::{test_ex, test_java_home};
use satellite_runtime::embedding::mock::MockRuntimeBuilder;
use satellite_runtime::embedding::JniStatus;
use satellite_runtime::{
    DlRuntime, Error, JniVersion, Origin, RuntimeDescriptor, RuntimeLibrary, VmConfig, VmFactory,
};

#[test]
fn existing_runtime_is_attached_not_created() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new().with_existing_vm().build();
        let instance = VmFactory::new(runtime.clone())
            .create(&[])
            .expect("attaches to the existing runtime");
        assert_eq!(instance.origin(), Origin::Attached);
        assert_eq!(instance.version(), JniVersion::MINIMUM);
        assert_eq!(runtime.creations(), 0);
        assert_eq!(runtime.attaches(), 1);
    })
}

#[test]
fn attached_runtime_below_minimum_is_refused() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_existing_vm()
            .with_env_version(JniVersion::V1_1.as_raw())
            .build();
        let res = VmFactory::new(runtime.clone()).create(&[]);
        assert!(matches!(res, Err(Error::CreationFailure(_))));
        assert_eq!(runtime.creations(), 0);
    })
}

#[test]
fn version_rejection_escalates_once() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_create_rejection(JniVersion::MINIMUM)
            .build();
        let instance = VmFactory::new(runtime.clone())
            .create(&[])
            .expect("created at the escalated version");
        assert_eq!(instance.origin(), Origin::Created);
        assert_eq!(instance.version(), JniVersion::ESCALATED);
        assert_eq!(runtime.creations(), 2);
    })
}

#[test]
fn second_version_rejection_is_fatal() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_create_rejection(JniVersion::MINIMUM)
            .with_create_rejection(JniVersion::ESCALATED)
            .build();
        let res = VmFactory::new(runtime.clone()).create(&[]);
        assert!(matches!(res, Err(Error::CreationFailure(_))));
        assert_eq!(runtime.creations(), 2);
    })
}

#[test]
fn other_failures_do_not_escalate() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_create_failure(JniStatus::Invalid)
            .build();
        let err = VmFactory::new(runtime.clone()).create(&[]).err().expect("fails");
        assert!(err.is_fatal_to_startup());
        assert_eq!(runtime.creations(), 1);
    })
}

#[test]
fn created_runtime_receives_the_full_option_list() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new().build();
        let config = VmConfig::default()
            .with_options(vec!["-Dapp.mode=batch".to_owned()])
            .with_classpath("lib/app.jar")
            .with_heap_min_mb(64)
            .with_heap_max_mb(512)
            .with_stack_kb(512)
            .with_diagnostic_hook(true);
        let _instance = VmFactory::new(runtime.clone())
            .create_with(&config)
            .expect("instance");
        let texts: Vec<String> = runtime.options().into_iter().map(|o| o.text).collect();
        assert_eq!(texts.first().map(String::as_str), Some("-Dapp.mode=batch"));
        let suffix = &texts[texts.len() - 6..];
        assert_eq!(
            suffix,
            &[
                "-Djava.class.path=lib/app.jar",
                "vfprintf",
                "exit",
                "-Xms64m",
                "-Xmx512m",
                "-Xss512k",
            ]
        );
        assert!(texts.contains(&"abort".to_owned()));
    })
}

#[test]
fn invalid_config_never_reaches_the_runtime() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new().build();
        let config = VmConfig::default().with_heap_min_mb(1024).with_heap_max_mb(64);
        let res = VmFactory::new(runtime.clone()).create_with(&config);
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
        assert_eq!(runtime.creations(), 0);
    })
}

#[test]
fn missing_explicit_library_is_a_load_failure() {
    let res = DlRuntime::load("/nonexistent/lib/server/libjvm.so", &[]);
    assert!(matches!(res, Err(Error::LoadFailure(_, _))));
}

#[test]
fn real_runtime_loads_when_available() {
    let home = match test_java_home() {
        Some(home) => home,
        None => return,
    };
    let descriptor = RuntimeDescriptor::discover(&home);
    let runtime = DlRuntime::load_descriptor(&descriptor, None).expect("runtime library loads");
    assert!(runtime.created_vms().expect("enumeration works").is_empty());
}
