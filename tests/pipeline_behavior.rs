//! Behavior tests for the read/write/create pipeline.
//!
//! These tests verify HOW failures are absorbed or propagated and WHAT is put
//! on the wire, using the in-memory backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bckapi_core::models::{Encargo, Grupo};
use bckapi_core::{
    lock, shared, ApiError, ApiErrorKind, ApiObject, ApiService, HttpMethod, MockBackend,
    MockReply, OnError, Resource, ONLINE,
};
use bckapi_tests::{service, ROOT};
use serde_json::{json, Value};

const GRUPO_1: &str = "http://localhost:8000/api/grupo/1/";

fn backend() -> MockBackend {
    MockBackend::new().on_get(
        ROOT,
        json!({ "grupo": "/api/grupo/", "encargo": "/api/encargo/" }),
    )
}

fn grupo(service: &ApiService, id: u64) -> bckapi_core::Shared<Grupo> {
    let mut grupo = Grupo::new();
    grupo
        .locator_mut()
        .set_identifier(id, service.registry())
        .expect("identifier");
    shared(grupo)
}

fn sent_body(backend: &MockBackend, method: HttpMethod) -> Value {
    let request = backend
        .requests()
        .into_iter()
        .find(|request| request.method == method)
        .expect("request issued");
    serde_json::from_str(request.body.as_deref().expect("body")).expect("json body")
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn read_merges_answer_into_the_resource() {
    // Given: A located grupo and a backend that knows it
    let backend = Arc::new(backend().on_get(GRUPO_1, json!({ "id": 1, "nombre": "Norte", "numero": 3 })));
    let service = service(&backend).await;
    let resource = grupo(&service, 1);
    lock(&resource).visible = Some(true);

    // When: The resource is read
    let answer = service
        .read_async(&resource, OnError::Propagate)
        .await
        .expect("read");

    // Then: Sent fields are merged and local ones are kept
    assert_eq!(answer, Some(json!({ "id": 1, "nombre": "Norte", "numero": 3 })));
    let grupo = lock(&resource);
    assert_eq!(grupo.nombre.as_deref(), Some("Norte"));
    assert_eq!(grupo.numero, Some(3));
    assert_eq!(grupo.visible, Some(true));
}

#[tokio::test]
async fn when_read_fails_with_absorb_the_caller_gets_none_and_failure_is_recorded() {
    // Given: A backend without the requested item
    let backend = Arc::new(backend());
    let service = service(&backend).await;
    let resource = grupo(&service, 1);

    // When: The read fails in absorbing mode
    let answer = service
        .read_async(&resource, OnError::Absorb)
        .await
        .expect("absorbed");

    // Then: Nothing comes back, the ledger and connectivity note the failure
    assert_eq!(answer, None);
    assert_eq!(service.ledger().get("pipeline.read").map(|record| record.count), Some(1));
    assert_eq!(service.connectivity().quality(), ONLINE - 1);
    assert_eq!(lock(&resource).nombre, None);
}

#[tokio::test]
async fn when_read_fails_with_propagate_the_caller_sees_the_status() {
    // Given: A backend refusing the item with 404
    let backend = Arc::new(backend());
    let service = service(&backend).await;
    let resource = grupo(&service, 1);

    // When: The read fails in propagating mode
    let error = service
        .read_async(&resource, OnError::Propagate)
        .await
        .expect_err("propagated");

    // Then: The transport failure reaches the caller and the ledger stays clean
    assert_eq!(error.kind(), ApiErrorKind::TransportFailure);
    assert_eq!(error.status(), Some(404));
    assert!(service.ledger().is_empty());
}

#[tokio::test]
async fn handler_answer_replaces_the_failed_read() {
    // Given: A backend that is unreachable
    let backend = Arc::new(backend());
    backend.respond(HttpMethod::Get, GRUPO_1, MockReply::NetworkError);
    let service = service(&backend).await;
    let resource = grupo(&service, 1);

    // When: The failure is handed to a handler supplying cached data
    let on_error = OnError::handle(|error: ApiError| {
        Box::pin(async move {
            assert_eq!(error.status(), Some(0));
            Ok::<_, ApiError>(Some(json!({ "nombre": "cached" })))
        })
    });
    let answer = service.read_async(&resource, on_error).await.expect("handled");

    // Then: The substitute answer is merged like a real one
    assert_eq!(answer, Some(json!({ "nombre": "cached" })));
    assert_eq!(lock(&resource).nombre.as_deref(), Some("cached"));
}

#[tokio::test]
async fn unlocated_item_cannot_be_read() {
    let backend = Arc::new(backend());
    let service = service(&backend).await;
    let resource = shared(Grupo::new());

    let error = service
        .read_async(&resource, OnError::Propagate)
        .await
        .expect_err("no identifier");

    assert_eq!(error.kind(), ApiErrorKind::UnresolvedLocation);
    assert!(backend.requests().iter().all(|request| request.url == ROOT));
}

// =============================================================================
// Writes and creation
// =============================================================================

#[tokio::test]
async fn write_never_sends_internal_fields() {
    // Given: An encargo carrying server-computed and local fields
    let backend = Arc::new(
        backend().on_put(
            "http://localhost:8000/api/encargo/9/",
            json!({ "id": 9, "estado": 4, "_codigo": "E-0009" }),
        ),
    );
    let service = service(&backend).await;
    let mut encargo = Encargo::new();
    encargo
        .locator_mut()
        .set_identifier(9, service.registry())
        .expect("identifier");
    encargo.id = Some(9);
    encargo.estado = Some(4);
    encargo.codigo = Some(String::from("E-0009"));
    encargo.activo_html = Some(String::from("<b>A</b>"));
    let resource = shared(encargo);

    // When: The encargo is written
    let answer = service
        .write_async(&resource, OnError::Propagate)
        .await
        .expect("write")
        .expect("answer");

    // Then: Only public fields went out; the answer keeps everything
    assert_eq!(sent_body(&backend, HttpMethod::Put), json!({ "id": 9, "estado": 4 }));
    assert_eq!(answer.get("_codigo"), Some(&json!("E-0009")));
}

#[tokio::test]
async fn nested_internal_fields_are_stripped_too() {
    let backend = Arc::new(backend().on_put(GRUPO_1, json!({})));
    let service = service(&backend).await;
    let mut object = ApiObject::named("grupo");
    object
        .locator_mut()
        .set_identifier(1, service.registry())
        .expect("identifier");
    object
        .set("nombre", "Sur")
        .set("activos", json!([{ "id": 1, "_html": "<i>1</i>" }]))
        .set("_dirty", true);

    service
        .write_async(&shared(object), OnError::Propagate)
        .await
        .expect("write");

    assert_eq!(
        sent_body(&backend, HttpMethod::Put),
        json!({ "nombre": "Sur", "activos": [{ "id": 1 }] })
    );
}

#[tokio::test]
async fn create_posts_unlocated_items_to_the_collection() {
    // Given: A new grupo without identifier
    let backend = Arc::new(
        backend().on_post("http://localhost:8000/api/grupo/", json!({ "id": 5, "nombre": "Este" })),
    );
    let service = service(&backend).await;
    let mut grupo = Grupo::new();
    grupo.nombre = Some(String::from("Este"));
    let resource = shared(grupo);

    // When: It is created
    let created = service
        .create_async(&resource, OnError::Propagate)
        .await
        .expect("create")
        .expect("answer");

    // Then: The collection path receives it and the answer lands in a new object
    assert_eq!(created.get("id"), Some(&json!(5)));
    assert_eq!(sent_body(&backend, HttpMethod::Post), json!({ "nombre": "Este" }));
    assert_eq!(lock(&resource).id, None);
    assert!(!lock(&resource).locator().is_located());
}

#[tokio::test]
async fn validation_refusals_are_recognizable() {
    let backend = Arc::new(backend());
    backend.respond(
        HttpMethod::Post,
        "http://localhost:8000/api/grupo/",
        MockReply::Status(400),
    );
    let service = service(&backend).await;

    let error = service
        .create_async(&shared(Grupo::new()), OnError::Propagate)
        .await
        .expect_err("refused");

    assert!(error.is_validation_refusal());
}

// =============================================================================
// Detached calls
// =============================================================================

#[tokio::test(start_paused = true)]
async fn detached_read_fills_in_the_returned_resource() {
    // Given: A slow backend
    let backend = Arc::new(backend().on_get(GRUPO_1, json!({ "nombre": "Norte" })));
    let service = service(&backend).await;
    backend.set_latency(Duration::from_millis(50));

    // When: A detached read is issued
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let resource = service.read_then(grupo(&service, 1), OnError::Absorb, move |grupo: &mut Grupo| {
        *sink.lock().expect("lock") = grupo.nombre.clone();
    });

    // Then: The resource is returned empty and filled in later
    assert_eq!(lock(&resource).nombre, None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(lock(&resource).nombre.as_deref(), Some("Norte"));
    assert_eq!(seen.lock().expect("lock").as_deref(), Some("Norte"));
}

#[tokio::test(start_paused = true)]
async fn detached_calls_reach_the_backend_in_issue_order() {
    // Given: Routes for a creation and an update
    let backend = Arc::new(
        backend()
            .on_post("http://localhost:8000/api/grupo/", json!({ "id": 2 }))
            .on_put(GRUPO_1, json!({ "id": 1 })),
    );
    let service = service(&backend).await;
    let existing = grupo(&service, 1);

    // When: Both are issued back to back without awaiting
    let created = service.create(&shared(Grupo::new()), OnError::Absorb);
    let updated = service.write_then(&existing, OnError::Absorb, |answer| {
        answer.insert(String::from("_seen"), json!(true));
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Then: The backend saw them in the same order and both answers arrived
    let methods: Vec<HttpMethod> = backend
        .requests()
        .into_iter()
        .filter(|request| request.url != ROOT)
        .map(|request| request.method)
        .collect();
    assert_eq!(methods, vec![HttpMethod::Post, HttpMethod::Put]);
    assert_eq!(lock(&created).get("id"), Some(&json!(2)));
    assert_eq!(lock(&updated).get("_seen"), Some(&json!(true)));
    assert!(service.meter().per_second() >= 2);
}
