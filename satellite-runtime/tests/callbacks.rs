mod test_helpers;

use crate::test_helpers::{started, test_ex};
use satellite_runtime::control::{self, ControlEvent};
use satellite_runtime::embedding::mock::MockRuntimeBuilder;
use std::thread;
use std::time::Duration;

#[test]
fn shutdown_callback_posts_reload() {
    test_ex(|| {
        let control = control::install();
        let runtime = MockRuntimeBuilder::new().build();
        let _instance = started(&runtime).expect("instance starts");
        assert!(runtime.fire_shutdown(true));
        assert_eq!(
            control.wait_timeout(Duration::from_secs(1)),
            Some(ControlEvent::Reload)
        );
    })
}

#[test]
fn shutdown_callback_is_idempotent() {
    test_ex(|| {
        let control = control::install();
        let runtime = MockRuntimeBuilder::new().build();
        let _instance = started(&runtime).expect("instance starts");
        let rt = runtime.clone();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let rt = rt.clone();
                thread::spawn(move || rt.fire_shutdown(false))
            })
            .collect();
        for w in workers {
            assert!(w.join().unwrap());
        }
        assert_eq!(control.try_next(), Some(ControlEvent::Shutdown));
        assert_eq!(control.wait_timeout(Duration::from_millis(100)), None);
    })
}

#[test]
fn failed_callback_reads_the_message_and_shuts_down() {
    test_ex(|| {
        let control = control::install();
        let runtime = MockRuntimeBuilder::new().build();
        let _instance = started(&runtime).expect("instance starts");
        assert!(runtime.fire_failed(Some("database unreachable")));
        assert_eq!(
            control.wait_timeout(Duration::from_secs(1)),
            Some(ControlEvent::Shutdown)
        );
    })
}

#[test]
fn failed_callback_without_message_still_shuts_down() {
    test_ex(|| {
        let control = control::install();
        let runtime = MockRuntimeBuilder::new().build();
        let _instance = started(&runtime).expect("instance starts");
        assert!(runtime.fire_failed(None));
        assert_eq!(
            control.wait_timeout(Duration::from_secs(1)),
            Some(ControlEvent::Shutdown)
        );
        assert_eq!(control::NO_MESSAGE, "(no message)");
    })
}

#[test]
fn callbacks_before_registration_do_nothing() {
    test_ex(|| {
        let control = control::install();
        let runtime = MockRuntimeBuilder::new().build();
        assert!(!runtime.fire_shutdown(false));
        assert_eq!(control.try_next(), None);
        assert!(!control::requested());
    })
}
