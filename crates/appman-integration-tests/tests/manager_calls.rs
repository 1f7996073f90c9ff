//! Protected manager operations and application lifecycle through a booted
//! manager.

mod common;

use appman_config::AccessPolicySection;
use appman_core::{ExitKind, ExitStatus, Value};
use appman_events::AppManEvent;
use appman_kernel::KernelError;
use appman_test::{MockCallers, MockSignal, test_application};

use common::{TestKernelBuilder, app_id, eventually, next_event, requester};

fn block_executable(operation: &str, exe: &str) -> impl FnOnce(&mut appman_config::Config) {
    let operation = operation.to_owned();
    let exe = exe.to_owned();
    move |config| {
        config.access_policy.insert(
            operation,
            AccessPolicySection {
                executables: vec![exe],
                ..AccessPolicySection::default()
            },
        );
    }
}

#[tokio::test]
async fn test_blocked_executable_is_denied() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.music", "native"))
        .app(test_application("com.example.admin", "native"))
        .callers(MockCallers::new().with_caller(std::process::id(), 1000, "/bin/evil"))
        .configure(block_executable("stopApplication", "/bin/evil"))
        .boot()
        .await;
    t.kernel
        .start_application(&app_id("com.example.music"), None)
        .await
        .unwrap();
    let mut admin = requester(&t.kernel, "com.example.admin");

    let denied = admin
        .call_manager(
            "stopApplication",
            vec![Value::from("com.example.music"), Value::from(false)],
        )
        .await
        .unwrap();
    assert!(!denied.succeeded);
    assert!(denied.message.contains("executable blocked"), "{}", denied.message);
    assert!(t.containers.signals().is_empty());

    // startApplication has no rule and stays open.
    let allowed = admin
        .call_manager("startApplication", vec![Value::from("com.example.admin"), Value::from("")])
        .await
        .unwrap();
    assert!(allowed.succeeded, "{}", allowed.message);
    assert_eq!(t.containers.started().len(), 2);
}

#[tokio::test]
async fn test_other_executables_pass_the_rule() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.music", "native"))
        .app(test_application("com.example.admin", "native"))
        .callers(MockCallers::new().with_caller(std::process::id(), 1000, "/usr/bin/launcher"))
        .configure(block_executable("stopApplication", "/bin/evil"))
        .boot()
        .await;
    t.kernel
        .start_application(&app_id("com.example.music"), None)
        .await
        .unwrap();
    let mut admin = requester(&t.kernel, "com.example.admin");

    let result = admin
        .call_manager(
            "stopApplication",
            vec![Value::from("com.example.music"), Value::from(false)],
        )
        .await
        .unwrap();
    assert!(result.succeeded, "{}", result.message);
    let pid = t.containers.started_pids()[0];
    assert_eq!(t.containers.signals(), vec![(pid, MockSignal::Terminate)]);
}

#[tokio::test]
async fn test_unknown_manager_operation_fails() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.admin", "native"))
        .boot()
        .await;
    let mut admin = requester(&t.kernel, "com.example.admin");

    let result = admin.call_manager("reboot", Vec::new()).await;
    // The schema rejects members the manager interface does not declare.
    assert!(result.is_err() || !result.unwrap().succeeded);
}

#[tokio::test]
async fn test_start_unknown_application_fails() {
    let t = TestKernelBuilder::new().boot().await;
    let err = t
        .kernel
        .start_application(&app_id("com.example.ghost"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::UnknownApplication(_)));
    assert!(t.kernel.fatal_error().is_none());
}

#[tokio::test]
async fn test_second_start_forwards_document() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.viewer", "native"))
        .boot()
        .await;
    let viewer = app_id("com.example.viewer");

    let first = t.kernel.start_application(&viewer, None).await.unwrap();
    let second = t
        .kernel
        .start_application(&viewer, Some("/media/photo.jpg".to_owned()))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(t.containers.started().len(), 1);
}

#[tokio::test]
async fn test_exit_is_reported_and_reaped() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.music", "native"))
        .boot()
        .await;
    let music = app_id("com.example.music");
    let mut events = t.kernel.bus().subscribe();

    let id = t.kernel.start_application(&music, None).await.unwrap();
    let pid = t.containers.started_pids()[0];
    assert!(t.containers.exit(pid, ExitStatus::Code(0)));

    let finished = next_event(&mut events, |e| matches!(e, AppManEvent::RuntimeFinished { .. }))
        .await
        .unwrap();
    let AppManEvent::RuntimeFinished {
        runtime_id,
        application_id,
        exit_code,
        exit_kind,
        ..
    } = finished.as_ref()
    else {
        unreachable!();
    };
    assert_eq!(*runtime_id, id);
    assert_eq!(application_id.as_ref(), Some(&music));
    assert_eq!(*exit_code, 0);
    assert_eq!(*exit_kind, ExitKind::Normal);

    let supervisor = t.kernel.supervisor().clone();
    let mut reaped = false;
    for _ in 0..200 {
        if supervisor.lock().await.runtime_for_application(&music).is_none() {
            reaped = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(reaped);
}

#[tokio::test]
async fn test_stop_before_handshake_terminates_immediately() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.music", "native"))
        .boot()
        .await;
    let music = app_id("com.example.music");

    t.kernel.start_application(&music, None).await.unwrap();
    assert!(t.kernel.stop_application(&music, false).await);

    let pid = t.containers.started_pids()[0];
    assert_eq!(t.containers.signals(), vec![(pid, MockSignal::Terminate)]);
    assert!(eventually(|| t.containers.running_pids().is_empty()).await);
    assert!(!t.kernel.stop_application(&app_id("com.example.idle"), false).await);
}

#[tokio::test]
async fn test_shutdown_stops_runtimes() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.music", "native"))
        .app(test_application("com.example.maps", "native"))
        .boot()
        .await;
    t.kernel
        .start_application(&app_id("com.example.music"), None)
        .await
        .unwrap();
    t.kernel
        .start_application(&app_id("com.example.maps"), None)
        .await
        .unwrap();

    t.kernel.shutdown(true).await;
    assert!(t.containers.running_pids().is_empty());
    assert!(
        t.containers
            .signals()
            .iter()
            .all(|(_, signal)| *signal == MockSignal::Kill)
    );
    t.kernel.wait_for_shutdown().await;
    assert!(t.kernel.fatal_error().is_none());
}
