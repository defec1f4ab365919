use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hookrelay_delivery::{
    DeliveryChannel, DeliveryJob, DeliveryQueueStorage, HttpChannel, HttpChannelConfig,
    InMemoryDeliveryQueue, JobStatus, NewDeliveryJob, RetryPolicy, WorkerConfig, WorkerPool,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAYLOAD: &[u8] = br#"{"object":"whatsapp_business_account","entry":[{"id":"1"}]}"#;

fn job_for(endpoint: String, name: &str) -> DeliveryJob {
    DeliveryJob::new(
        NewDeliveryJob {
            destination_id: 1,
            destination_name: name.into(),
            endpoint,
            phone_number_id: "542491768952983".into(),
            payload: Bytes::from_static(PAYLOAD),
        },
        3,
    )
}

fn channel(timeout: Duration) -> Arc<HttpChannel> {
    Arc::new(
        HttpChannel::new(HttpChannelConfig {
            timeout,
            source_name: "hookrelay".into(),
            ..Default::default()
        })
        .expect("http channel"),
    )
}

async fn wait_for_finished(queue: &InMemoryDeliveryQueue, expected: u64) {
    for _ in 0..300 {
        let stats = queue.stats().await.unwrap();
        if stats.completed + stats.failed >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn forwards_payload_unmodified_with_relay_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .and(header("x-webhook-source", "hookrelay"))
        .and(header("x-phone-number-id", "542491768952983"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let job = job_for(format!("{}/hook", server.uri()), "A");
    let result = channel(Duration::from_secs(5))
        .deliver(&job)
        .await
        .expect("deliver");
    assert!(result.success);
    assert_eq!(result.http_status, Some(200));

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, PAYLOAD);
    let ua = requests[0]
        .headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(ua.starts_with("hookrelay/"));
}

#[tokio::test]
async fn non_success_status_is_a_failed_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let job = job_for(format!("{}/hook", server.uri()), "A");
    let result = channel(Duration::from_secs(5))
        .deliver(&job)
        .await
        .expect("deliver");
    assert!(!result.success);
    assert_eq!(result.http_status, Some(502));
    assert!(result.error.unwrap().contains("bad gateway"));
}

#[tokio::test]
async fn large_error_page_is_cut_to_a_short_prefix() {
    let server = MockServer::start().await;
    let page = "x".repeat(256 * 1024);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string(page))
        .mount(&server)
        .await;

    let job = job_for(format!("{}/hook", server.uri()), "A");
    let result = channel(Duration::from_secs(5))
        .deliver(&job)
        .await
        .expect("deliver");
    assert_eq!(result.http_status, Some(500));
    let error = result.error.unwrap();
    let body = error.strip_prefix("HTTP 500: ").expect("status prefix");
    assert_eq!(body.len(), 512);
    assert!(body.bytes().all(|b| b == b'x'));
}

#[tokio::test]
async fn slow_destination_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let job = job_for(format!("{}/hook", server.uri()), "A");
    let result = channel(Duration::from_millis(100))
        .deliver(&job)
        .await
        .expect("deliver");
    assert!(!result.success);
    assert!(result.http_status.is_none());
    assert!(result.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn failing_destination_does_not_block_healthy_ones() {
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&healthy)
        .await;

    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&broken)
        .await;

    let queue = Arc::new(InMemoryDeliveryQueue::new());
    let stuck = job_for(format!("{}/hook", broken.uri()), "broken");
    let a = job_for(format!("{}/a", healthy.uri()), "A");
    let b = job_for(format!("{}/b", healthy.uri()), "B");
    queue.enqueue(&stuck).await.unwrap();
    queue.enqueue(&a).await.unwrap();
    queue.enqueue(&b).await.unwrap();

    let pool = WorkerPool::start(
        queue.clone(),
        channel(Duration::from_millis(200)),
        WorkerConfig {
            workers: 2,
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            ..Default::default()
        },
    );

    wait_for_finished(&queue, 3).await;
    pool.shutdown().await;

    assert_eq!(
        queue.get(a.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(
        queue.get(b.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    let stuck = queue.get(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Failed);
    assert_eq!(stuck.attempts, 3);
}
