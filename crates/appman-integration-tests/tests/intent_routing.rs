//! End-to-end intent routing through a booted manager.
//!
//! Requesters and handlers are in-process clients; applications that have
//! to be started run in a mock container backend.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use appman_core::{ParameterMap, Value};
use appman_events::AppManEvent;
use appman_intents::{IntentCatalog, IntentDefinition, IntentError, NO_MATCHING_HANDLER};
use appman_test::{RecordingHandler, test_application, test_application_with_capabilities};

use common::{TestKernelBuilder, app_id, eventually, next_event, requester, serve};

fn params(key: &str, value: &str) -> ParameterMap {
    ParameterMap::from([(key.to_owned(), Value::from(value))])
}

#[tokio::test]
async fn test_zero_candidates_fail_without_starting_anything() {
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.requester", "native"))
        .boot()
        .await;
    let mut client = requester(&t.kernel, "com.example.requester");

    let err = client
        .request("navigate", None, ParameterMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IntentError::RequestFailed(ref m) if m == NO_MATCHING_HANDLER));
    assert_eq!(t.containers.created(), 0);
    assert!(t.containers.started().is_empty());
}

#[tokio::test]
async fn test_disjoint_parameter_filters_route_to_the_right_handler() {
    let mut catalog = IntentCatalog::new();
    catalog
        .add(
            "com.example.gallery",
            IntentDefinition::new("share", app_id("com.example.gallery")).matching("mime", "image"),
        )
        .unwrap();
    catalog
        .add(
            "com.example.notes",
            IntentDefinition::new("share", app_id("com.example.notes")).matching("mime", "text"),
        )
        .unwrap();
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.gallery", "native"))
        .app(test_application("com.example.notes", "native"))
        .app(test_application("com.example.requester", "native"))
        .catalog(catalog)
        .boot()
        .await;

    let gallery = RecordingHandler::new().with_result(params("by", "gallery"));
    let notes = RecordingHandler::new().with_result(params("by", "notes"));
    let _g = serve(&t.kernel, "com.example.gallery", &["share"], Arc::new(gallery.clone()));
    let _n = serve(&t.kernel, "com.example.notes", &["share"], Arc::new(notes.clone()));
    let mut client = requester(&t.kernel, "com.example.requester");

    let result = client
        .request("share", None, params("mime", "text"))
        .await
        .unwrap();
    assert_eq!(result.get("by").and_then(Value::as_str), Some("notes"));

    let result = client
        .request("share", None, params("mime", "image"))
        .await
        .unwrap();
    assert_eq!(result.get("by").and_then(Value::as_str), Some("gallery"));

    assert_eq!(gallery.count(), 1);
    assert_eq!(notes.count(), 1);
    assert_eq!(
        notes.received()[0].requesting_application_id,
        app_id("com.example.requester")
    );
}

#[tokio::test]
async fn test_missing_capability_blocks_handler() {
    let mut catalog = IntentCatalog::new();
    catalog
        .add(
            "com.example.media",
            IntentDefinition::new("capture", app_id("com.example.media"))
                .requires(["media", "camera"]),
        )
        .unwrap();
    let t = TestKernelBuilder::new()
        .app(test_application_with_capabilities(
            "com.example.media",
            "native",
            &["media"],
        ))
        .app(test_application("com.example.requester", "native"))
        .catalog(catalog)
        .boot()
        .await;

    let handler = RecordingHandler::new();
    let _h = serve(&t.kernel, "com.example.media", &["capture"], Arc::new(handler.clone()));
    let mut client = requester(&t.kernel, "com.example.requester");

    let err = client
        .request("capture", None, ParameterMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IntentError::RequestFailed(ref m) if m == NO_MATCHING_HANDLER));
    assert_eq!(handler.count(), 0);
}

#[tokio::test]
async fn test_broadcast_reaches_everyone_but_the_sender() {
    let apps = [
        "com.example.a",
        "com.example.b",
        "com.example.c",
        "com.example.sender",
    ];
    let mut catalog = IntentCatalog::new();
    let mut builder = TestKernelBuilder::new();
    for app in apps {
        catalog
            .add(app, IntentDefinition::new("refresh", app_id(app)))
            .unwrap();
        builder = builder.app(test_application(app, "native"));
    }
    let t = builder.catalog(catalog).boot().await;

    let handlers: Vec<RecordingHandler> = apps.iter().map(|_| RecordingHandler::new()).collect();
    let _tasks: Vec<_> = apps[..3]
        .iter()
        .zip(&handlers)
        .map(|(app, h)| serve(&t.kernel, app, &["refresh"], Arc::new(h.clone())))
        .collect();

    let sender_handler = handlers[3].clone();
    let mut sender = requester(&t.kernel, "com.example.sender");
    sender.register_handler("refresh", Arc::new(sender_handler.clone()));

    sender.broadcast("refresh", params("scope", "all")).await.unwrap();

    assert!(eventually(|| handlers[..3].iter().all(|h| h.count() == 1)).await);
    for handler in &handlers[..3] {
        let incoming = &handler.received()[0];
        assert!(incoming.broadcast);
        assert!(incoming.requesting_application_id.is_broadcast());
    }
    sender.process_queued().await;
    assert_eq!(sender_handler.count(), 0);
    assert!(t.containers.started().is_empty());
}

#[tokio::test]
async fn test_handler_is_started_on_demand() {
    let mut catalog = IntentCatalog::new();
    catalog
        .add(
            "com.example.maps",
            IntentDefinition::new("navigate", app_id("com.example.maps")),
        )
        .unwrap();
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.maps", "native"))
        .app(test_application("com.example.requester", "native"))
        .catalog(catalog)
        .boot()
        .await;
    let mut events = t.kernel.bus().subscribe();

    let mut client = requester(&t.kernel, "com.example.requester");
    let request = tokio::spawn(async move {
        client
            .request("navigate", None, params("to", "home"))
            .await
    });

    assert!(eventually(|| !t.containers.started().is_empty()).await);
    assert_eq!(
        t.containers.started()[0].program,
        std::path::PathBuf::from("/opt/apps/com.example.maps/main")
    );

    // The started process connects and serves the intent.
    let handler = RecordingHandler::new().with_result(params("eta", "12"));
    let _h = serve(&t.kernel, "com.example.maps", &["navigate"], Arc::new(handler.clone()));

    let result = request.await.unwrap().unwrap();
    assert_eq!(result.get("eta").and_then(Value::as_str), Some("12"));
    assert_eq!(handler.count(), 1);

    let finished = next_event(&mut events, |e| {
        matches!(e, AppManEvent::IntentRequestFinished { .. })
    })
    .await
    .unwrap();
    let AppManEvent::IntentRequestFinished {
        succeeded,
        handling_application_id,
        ..
    } = finished.as_ref()
    else {
        unreachable!();
    };
    assert!(*succeeded);
    assert_eq!(handling_application_id.as_ref(), Some(&app_id("com.example.maps")));
}

#[tokio::test(start_paused = true)]
async fn test_handler_that_never_connects_times_out() {
    let mut catalog = IntentCatalog::new();
    catalog
        .add(
            "com.example.maps",
            IntentDefinition::new("navigate", app_id("com.example.maps")),
        )
        .unwrap();
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.maps", "native"))
        .app(test_application("com.example.requester", "native"))
        .catalog(catalog)
        .boot()
        .await;

    let mut client = requester(&t.kernel, "com.example.requester");
    let err = client
        .request("navigate", None, ParameterMap::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, IntentError::RequestFailed(ref m) if m.contains("com.example.maps")),
        "{err}"
    );
    assert_eq!(t.containers.started().len(), 1);
}

#[tokio::test]
async fn test_handler_error_reaches_requester() {
    let mut catalog = IntentCatalog::new();
    catalog
        .add(
            "com.example.dialer",
            IntentDefinition::new("call", app_id("com.example.dialer")),
        )
        .unwrap();
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.dialer", "native"))
        .app(test_application("com.example.requester", "native"))
        .catalog(catalog)
        .boot()
        .await;

    let handler = RecordingHandler::new().failing("no modem");
    let _h = serve(&t.kernel, "com.example.dialer", &["call"], Arc::new(handler));
    let mut client = requester(&t.kernel, "com.example.requester");

    let err = client
        .request("call", None, params("number", "112"))
        .await
        .unwrap_err();
    assert!(matches!(err, IntentError::RequestFailed(ref m) if m == "no modem"));
}

#[tokio::test]
async fn test_request_ids_do_not_collide() {
    let t = TestKernelBuilder::new().boot().await;
    let mut broker = t.kernel.broker().lock().await;

    let mut ids = HashSet::new();
    for _ in 0..10_000 {
        let (id, _outcome) = broker.request_from_system("nothing", None, ParameterMap::new());
        assert!(ids.insert(id));
    }
    assert_eq!(ids.len(), 10_000);
}

#[tokio::test]
async fn test_open_url_uses_the_open_url_intent() {
    let mut catalog = IntentCatalog::new();
    catalog
        .add(
            "com.example.browser",
            IntentDefinition::new("openUrl", app_id("com.example.browser")),
        )
        .unwrap();
    let t = TestKernelBuilder::new()
        .app(test_application("com.example.browser", "native"))
        .catalog(catalog)
        .boot()
        .await;

    let handler = RecordingHandler::new();
    let _h = serve(&t.kernel, "com.example.browser", &["openUrl"], Arc::new(handler.clone()));

    let (_id, outcome) = t.kernel.open_url("https://example.com").await;
    let outcome = outcome.await.unwrap();
    assert!(outcome.succeeded);
    let received = handler.received();
    assert_eq!(
        received[0].parameters.get("url").and_then(Value::as_str),
        Some("https://example.com")
    );
    assert!(received[0].requesting_application_id.is_system_ui());
}
