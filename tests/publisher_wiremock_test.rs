use flate2::read::GzDecoder;
use mockall::mock;
use rask_telemetry::buffer::EventBuffer;
use rask_telemetry::domain::{MessageData, MetricData, SeverityLevel, StampedEnvelope};
use rask_telemetry::reliability::{ErrorHandler, RetryConfig};
use rask_telemetry::sender::{Publisher, PublisherBuilder, PublishResult, ResponseBody, WorkerPool};
use rask_telemetry::DraftEnvelope;
use serde_json::Value;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const IKEY: &str = "22a165b8-944e-4f74-9605-66e79223d0ac";

mock! {
    pub Handler {}

    impl ErrorHandler for Handler {
        fn on_failure(&self, batch: &[StampedEnvelope], result: &PublishResult);
    }
}

fn ack(received: usize) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "itemsReceived": received,
        "itemsAccepted": received,
        "errors": []
    }))
}

fn builder(server: &MockServer) -> PublisherBuilder {
    PublisherBuilder::new(IKEY)
        .ingestion_url(server.uri())
        .retry(RetryConfig {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        })
        .publish_timeout(Duration::from_secs(5))
}

fn filled_buffer(count: usize) -> EventBuffer {
    let buffer = EventBuffer::new(count.max(1)).unwrap();
    for i in 0..count {
        buffer
            .push(DraftEnvelope::new(MessageData::new(
                format!("message {i}"),
                SeverityLevel::Information,
            )))
            .unwrap();
    }
    buffer
}

fn decode_body(request: &Request) -> Vec<Value> {
    let gzipped = request
        .headers
        .get("content-encoding")
        .is_some_and(|v| v.to_str().unwrap() == "gzip");
    let json = if gzipped {
        let mut decoded = String::new();
        GzDecoder::new(request.body.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        decoded
    } else {
        String::from_utf8(request.body.clone()).unwrap()
    };
    serde_json::from_str(&json).unwrap()
}

fn counting_handler() -> (Arc<AtomicUsize>, impl ErrorHandler + 'static) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = move |_: &[StampedEnvelope], _: &PublishResult| {
        counter.fetch_add(1, Ordering::SeqCst);
    };
    (calls, handler)
}

#[tokio::test]
async fn test_small_buffer_is_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ack(5))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = builder(&server).build().unwrap();
    let buffer = filled_buffer(5);

    let results = publisher.publish(&buffer).await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.attempt, 1);
    assert_eq!(result.status_code, 200);
    assert_eq!(result.envelope_count, 5);
    assert_eq!(result.response_body.parsed().unwrap().items_accepted, 5);
    assert!(buffer.is_empty());
    assert!(result.to_error().is_none());
}

#[tokio::test]
async fn test_large_buffer_is_split_into_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/track"))
        .respond_with(ack(100))
        .expect(3)
        .mount(&server)
        .await;

    let publisher = builder(&server).batch_max_size(100).build().unwrap();
    let buffer = filled_buffer(250);

    let results = publisher.publish(&buffer).await;

    let sizes: Vec<usize> = results.iter().map(|r| r.envelope_count).collect();
    assert_eq!(sizes, [100, 100, 50]);
    assert!(results.iter().all(|r| r.success));
}

#[tokio::test]
async fn test_envelopes_are_stamped_with_key_and_increasing_seq() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ack(3))
        .mount(&server)
        .await;

    let publisher = builder(&server).gzip_threshold(-1).build().unwrap();
    publisher.publish(&filled_buffer(3)).await;

    let requests = server.received_requests().await.unwrap();
    let items = decode_body(&requests[0]);
    assert_eq!(items.len(), 3);

    let seqs: Vec<u64> = items
        .iter()
        .map(|item| {
            assert_eq!(item["iKey"], IKEY);
            assert_eq!(item["name"], "Microsoft.ApplicationInsights.Message");
            assert_eq!(item["data"]["baseType"], "MessageData");
            item["seq"].as_str().unwrap().parse().unwrap()
        })
        .collect();
    assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_retryable_status_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ack(1))
        .mount(&server)
        .await;

    let (calls, handler) = counting_handler();
    let publisher = builder(&server).error_handler(handler).build().unwrap();

    let results = publisher.publish(&filled_buffer(3)).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].attempt, 3);
    assert_eq!(results[0].envelope_count, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retries_are_spaced_by_the_configured_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let delay = Duration::from_millis(150);
    let publisher = builder(&server)
        .retry(RetryConfig {
            max_attempts: 3,
            delay,
        })
        .error_handler(|_: &[StampedEnvelope], _: &PublishResult| {})
        .build()
        .unwrap();

    let started = Instant::now();
    let results = publisher.publish(&filled_buffer(1)).await;

    assert_eq!(results[0].attempt, 3);
    assert!(started.elapsed() >= delay * 2, "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_exhausted_retries_reach_error_handler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let mut handler = MockHandler::new();
    handler
        .expect_on_failure()
        .withf(|batch, result| {
            batch.len() == 2
                && result.attempt == 3
                && result.status_code == 502
                && result.response_body == ResponseBody::Raw("bad gateway".to_string())
        })
        .times(1)
        .return_const(());
    let publisher = builder(&server).error_handler(handler).build().unwrap();

    let results = publisher.publish(&filled_buffer(2)).await;

    assert!(!results[0].success);
    let err = results[0].to_error().unwrap();
    assert!(err.to_string().contains("3 attempt(s)"));
}

#[tokio::test]
async fn test_non_retryable_status_is_sent_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let (calls, handler) = counting_handler();
    let publisher = builder(&server).error_handler(handler).build().unwrap();

    let results = publisher.publish(&filled_buffer(1)).await;

    assert!(!results[0].success);
    assert_eq!(results[0].attempt, 1);
    assert_eq!(results[0].status_code, 400);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_partial_acceptance_is_not_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(206).set_body_json(serde_json::json!({
            "itemsReceived": 2,
            "itemsAccepted": 1,
            "errors": [{"index": 1, "statusCode": 400, "message": "bad item"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (calls, handler) = counting_handler();
    let publisher = builder(&server).error_handler(handler).build().unwrap();

    let results = publisher.publish(&filled_buffer(2)).await;

    assert!(!results[0].success);
    assert_eq!(results[0].attempt, 1);
    let ack = results[0].response_body.parsed().unwrap();
    assert_eq!(ack.errors[0].index, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retries_disabled_sends_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let no_attempts = builder(&server)
        .retry(RetryConfig {
            max_attempts: 0,
            delay: Duration::from_millis(10),
        })
        .error_handler(|_: &[StampedEnvelope], _: &PublishResult| {})
        .build()
        .unwrap();
    let no_delay = builder(&server)
        .retry(RetryConfig {
            max_attempts: 5,
            delay: Duration::ZERO,
        })
        .error_handler(|_: &[StampedEnvelope], _: &PublishResult| {})
        .build()
        .unwrap();

    assert_eq!(no_attempts.publish(&filled_buffer(1)).await[0].attempt, 1);
    assert_eq!(no_delay.publish(&filled_buffer(1)).await[0].attempt, 1);
}

#[tokio::test]
async fn test_transport_failure_is_retried_as_status_zero() {
    let (calls, handler) = counting_handler();
    let publisher = PublisherBuilder::new(IKEY)
        .ingestion_url("http://127.0.0.1:9")
        .retry(RetryConfig {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        })
        .error_handler(handler)
        .build()
        .unwrap();

    let results = publisher.publish(&filled_buffer(1)).await;

    assert!(!results[0].success);
    assert_eq!(results[0].status_code, 0);
    assert_eq!(results[0].attempt, 2);
    assert!(results[0].error.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_payload_above_threshold_is_gzipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ack(20))
        .mount(&server)
        .await;

    let publisher = builder(&server).gzip_threshold(0).build().unwrap();
    let results = publisher.publish(&filled_buffer(20)).await;

    assert!(results[0].compressed);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("content-encoding").unwrap(),
        "gzip"
    );
    assert_eq!(decode_body(&requests[0]).len(), 20);
}

#[tokio::test]
async fn test_payload_below_threshold_is_plain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ack(1))
        .mount(&server)
        .await;

    let publisher = builder(&server).gzip_threshold(1_000_000).build().unwrap();
    let results = publisher.publish(&filled_buffer(1)).await;

    assert!(!results[0].compressed);
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("content-encoding").is_none());
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(decode_body(&requests[0]).len(), 1);
}

#[tokio::test]
async fn test_shared_pool_outlives_publishers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ack(1))
        .mount(&server)
        .await;

    let pool = WorkerPool::new(2).unwrap();
    let first: Publisher = builder(&server).shared_pool(pool.clone()).build().unwrap();
    let second: Publisher = builder(&server).shared_pool(pool.clone()).build().unwrap();

    first.close().await;
    assert!(!pool.is_closed());

    let results = second.publish(&filled_buffer(1)).await;
    assert!(results[0].success);
}

#[tokio::test]
async fn test_batch_waiting_for_closed_pool_reaches_error_handler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ack(1).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let (calls, handler) = counting_handler();
    let pool = WorkerPool::new(1).unwrap();
    let publisher = builder(&server)
        .batch_max_size(1)
        .shared_pool(pool.clone())
        .error_handler(handler)
        .build()
        .unwrap();
    let buffer = filled_buffer(2);

    let (results, ()) = tokio::join!(publisher.publish(&buffer), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.close();
    });

    assert_eq!(results.len(), 2);
    let failed: Vec<&PublishResult> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempt, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unencodable_envelopes_reach_error_handler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ack(2))
        .expect(1)
        .mount(&server)
        .await;

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let publisher = builder(&server)
        .gzip_threshold(-1)
        .error_handler(move |batch: &[StampedEnvelope], result: &PublishResult| {
            sink.lock().unwrap().push((batch.len(), result.rejected.len()));
        })
        .build()
        .unwrap();

    let buffer = EventBuffer::new(3).unwrap();
    for value in [1.0, 2.0, f64::NAN] {
        buffer
            .push(DraftEnvelope::new(MetricData::single("latency", value)))
            .unwrap();
    }

    let results = publisher.publish(&buffer).await;

    assert!(results[0].success);
    assert_eq!(results[0].rejected.len(), 1);
    assert_eq!(results[0].rejected[0].index, 2);
    assert_eq!(*reported.lock().unwrap(), [(1, 1)]);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(decode_body(&requests[0]).len(), 2);
}
