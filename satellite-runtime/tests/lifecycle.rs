mod test_helpers;

use crate::test_helpers::{started, test_ex};
use satellite_runtime::embedding::mock::{MethodBehavior, MockRuntimeBuilder};
use satellite_runtime::{teardown, Error, LifecycleBridge, LifecycleOp};
use std::time::Duration;

#[test]
fn full_lifecycle_in_order() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new().build();
        let instance = started(&runtime).expect("instance starts");
        {
            let bridge = LifecycleBridge::new(&instance).expect("bridge");
            bridge
                .load("/srv/app.jar", &["--port".to_owned(), "8080".to_owned()])
                .expect("load");
            bridge.resume().expect("resume");
            bridge.pause().expect("pause");
            bridge.destroy().expect("destroy");
        }
        teardown::forced(instance, Duration::from_secs(5)).expect("teardown");
        assert_eq!(
            runtime.calls(),
            vec![
                "createBootstrap()",
                "load(/srv/app.jar, [--port, 8080])",
                "resume()",
                "pause()",
                "destroy()",
            ]
        );
        assert_eq!(runtime.live_global_refs(), 0);
        assert_eq!(runtime.destroys(), 1);
    })
}

#[test]
fn callbacks_are_registered_on_the_loader_class() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new().build();
        let _instance = started(&runtime).expect("instance starts");
        assert_eq!(
            runtime.natives(),
            vec![
                ("shutdown".to_owned(), "(Z)V".to_owned()),
                ("failed".to_owned(), "(Ljava/lang/String;)V".to_owned()),
            ]
        );
    })
}

#[test]
fn load_returning_false_is_fatal() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_method("load", MethodBehavior::Returns(false))
            .build();
        let instance = started(&runtime).expect("instance starts");
        let err = LifecycleBridge::new(&instance)
            .unwrap()
            .load("/srv/app.jar", &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvocationFailure(LifecycleOp::Load)));
        assert!(err.is_fatal_to_startup());
    })
}

#[test]
fn faulting_resume_cannot_start() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_method("resume", MethodBehavior::Faults)
            .build();
        let instance = started(&runtime).expect("instance starts");
        let err = LifecycleBridge::new(&instance).unwrap().resume().unwrap_err();
        assert_eq!(err.to_string(), "Cannot start");
        assert!(!err.is_fatal_to_startup());
        assert!(!runtime.fault_pending());
        assert_eq!(runtime.faults_described(), 1);
    })
}

#[test]
fn resume_without_a_result_cannot_start() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_method("resume", MethodBehavior::ReturnsVoid)
            .with_method("version", MethodBehavior::ReturnsVoid)
            .build();
        let instance = started(&runtime).expect("instance starts");
        let bridge = LifecycleBridge::new(&instance).unwrap();
        let err = bridge.resume().unwrap_err();
        assert!(matches!(err, Error::InvocationFailure(LifecycleOp::Resume)));
        assert_eq!(err.to_string(), "Cannot start");
        bridge.version().expect("version yields no value");
    })
}

#[test]
fn missing_method_is_a_protocol_failure() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_method("version", MethodBehavior::Missing)
            .build();
        let instance = started(&runtime).expect("instance starts");
        let err = LifecycleBridge::new(&instance).unwrap().version().unwrap_err();
        assert!(matches!(err, Error::ProtocolFailure(LifecycleOp::Version)));
        assert!(err.is_fatal_to_startup());
        assert!(!runtime.fault_pending());
    })
}

#[test]
fn check_reports_an_invalid_daemon() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_method("check", MethodBehavior::Returns(false))
            .build();
        let instance = started(&runtime).expect("instance starts");
        let bridge = LifecycleBridge::new(&instance).unwrap();
        let err = bridge.check("/srv/broken.jar").unwrap_err();
        assert_eq!(err.to_string(), "Invalid daemon");
        assert_eq!(
            runtime.calls().last().map(String::as_str),
            Some("check(/srv/broken.jar)")
        );
        bridge.version().expect("version still works");
    })
}

#[test]
fn pause_and_destroy_failures_are_reported() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new()
            .with_method("pause", MethodBehavior::Returns(false))
            .with_method("destroy", MethodBehavior::Returns(false))
            .build();
        let instance = started(&runtime).expect("instance starts");
        let bridge = LifecycleBridge::new(&instance).unwrap();
        assert_eq!(bridge.pause().unwrap_err().to_string(), "Cannot stop");
        assert_eq!(bridge.destroy().unwrap_err().to_string(), "Cannot destroy");
    })
}

#[test]
fn rejected_callbacks_fail_startup() {
    test_ex(|| {
        let runtime = MockRuntimeBuilder::new().with_native_rejection().build();
        match started(&runtime) {
            Err(Error::BootstrapFailure(_)) => (),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("startup should have failed"),
        }
    })
}
