use std::sync::Arc;
use std::time::Duration;

use hookrelay_core::{
    DestinationCatalog, NewApp, NewBusinessAccount, NewDestination, NewPhoneNumber, UpsertMapping,
};
use hookrelay_delivery::{DeliveryQueueStorage, HttpChannel, JobStatus, WorkerPool};
use hookrelay_server::bootstrap::{SAMPLE_PHONE_NUMBER_ID, SAMPLE_VERIFY_TOKEN, seed_sample_data};
use hookrelay_server::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_server(state: AppState) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let app = build_app(state);

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

fn notification(phone_number_id: &str) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "123456789",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "15550001111",
                        "phone_number_id": phone_number_id
                    },
                    "messages": [{ "from": "15550002222", "id": "wamid.1", "type": "text" }]
                }
            }]
        }]
    })
}

#[tokio::test]
async fn server_endpoints_work() {
    hookrelay_server::metrics::init_metrics();
    let state = AppState::in_memory(AppConfig::default());
    let (base, shutdown_tx, handle) = start_server(state).await;
    let client = reqwest::Client::new();

    // GET /
    let resp = client.get(format!("{base}/")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "hookrelay");
    assert_eq!(body["status"], "ok");

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET /readyz
    let resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");

    // GET /metrics lists the requests above under their route template
    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(resp.status().is_success());
    let text = resp.text().await.unwrap();
    assert!(text.contains("hookrelay_http_requests_total"));
    assert!(text.contains("/healthz"));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn verification_handshake() {
    let state = AppState::in_memory(AppConfig::default());
    seed_sample_data(&state.resolver).await.expect("seed");
    let (base, shutdown_tx, handle) = start_server(state).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/meta/webhook");

    // Known token echoes the challenge
    let resp = client
        .get(&url)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", SAMPLE_VERIFY_TOKEN),
            ("hub.challenge", "1158201444"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "1158201444");

    // Unknown token is forbidden
    let resp = client
        .get(&url)
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "not-a-token"),
            ("hub.challenge", "1"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    // Missing token or wrong mode is a bad request
    let resp = client
        .get(&url)
        .query(&[("hub.mode", "subscribe"), ("hub.challenge", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .get(&url)
        .query(&[
            ("hub.mode", "unsubscribe"),
            ("hub.verify_token", SAMPLE_VERIFY_TOKEN),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn intake_acknowledges_without_queueing_when_nothing_matches() {
    let state = AppState::in_memory(AppConfig::default());
    let queue = state.queue.clone();
    let (base, shutdown_tx, handle) = start_server(state).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/meta/webhook");

    // Not a JSON object
    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("[1, 2, 3]")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client.post(&url).body("not json").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // No identifier in the payload is still acknowledged
    let resp = client
        .post(&url)
        .json(&json!({ "object": "whatsapp_business_account", "entry": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // Unknown identifier resolves to nothing
    let resp = client
        .post(&url)
        .json(&notification("000000000000000"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.waiting + stats.delayed + stats.active, 0);
    assert_eq!(stats.completed + stats.failed, 0);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn notification_fans_out_to_every_mapped_destination() {
    let mock = MockServer::start().await;
    for route in ["/promotions", "/appointments"] {
        Mock::given(method("POST"))
            .and(path(route))
            .and(header("content-type", "application/json"))
            .and(header("x-webhook-source", "relay-test"))
            .and(header("x-phone-number-id", SAMPLE_PHONE_NUMBER_ID))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock)
            .await;
    }

    let mut config = AppConfig::default();
    config.delivery.poll_interval_ms = 20;
    config.delivery.source_name = "relay-test".into();
    let state = AppState::in_memory(config);

    let catalog = state.catalog().clone();
    catalog
        .create_business_account(NewBusinessAccount {
            business_id: "123456789".into(),
            name: "Test Business".into(),
            timezone: "UTC".into(),
        })
        .await
        .unwrap();
    catalog
        .create_app(NewApp {
            id: "app-1".into(),
            business_id: "123456789".into(),
            name: "Test App".into(),
            verify_token: "token-1".into(),
        })
        .await
        .unwrap();
    catalog
        .create_phone_number(NewPhoneNumber {
            phone_number_id: SAMPLE_PHONE_NUMBER_ID.into(),
            app_id: "app-1".into(),
            phone_number: "+15550001111".into(),
            display_name: None,
        })
        .await
        .unwrap();
    for (name, route, priority) in [
        ("Promotions", "/promotions", 100),
        ("Appointments", "/appointments", 50),
    ] {
        let destination = catalog
            .create_destination(NewDestination {
                name: name.into(),
                endpoint: format!("{}{route}", mock.uri()),
                description: None,
                is_active: true,
            })
            .await
            .unwrap();
        state
            .resolver
            .upsert_mapping(UpsertMapping {
                phone_number_id: SAMPLE_PHONE_NUMBER_ID.into(),
                destination_id: destination.id,
                priority,
            })
            .await
            .unwrap();
    }

    let channel = Arc::new(HttpChannel::new(state.config.delivery.channel_config()).unwrap());
    let workers = WorkerPool::start(
        state.queue.clone(),
        channel,
        state.config.delivery.worker_config(),
    );
    let queue = state.queue.clone();
    let (base, shutdown_tx, handle) = start_server(state).await;

    let payload = serde_json::to_vec(&notification(SAMPLE_PHONE_NUMBER_ID)).unwrap();
    let resp = reqwest::Client::new()
        .post(format!("{base}/meta/webhook"))
        .header("content-type", "application/json")
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let mut completed = 0;
    for _ in 0..250 {
        completed = queue.stats().await.unwrap().completed;
        if completed >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(completed, 2);

    // Body reaches both destinations byte for byte
    let received = mock.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    for request in &received {
        assert_eq!(request.body, payload);
    }

    let jobs = queue.list_by_status(JobStatus::Completed, 10).await.unwrap();
    let mut names: Vec<_> = jobs.iter().map(|j| j.destination_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["Appointments", "Promotions"]);
    assert!(jobs.iter().all(|j| j.attempts == 1));

    assert!(workers.shutdown().await);
    let _ = shutdown_tx.send(());
    let _ = handle.await;
    mock.verify().await;
}
