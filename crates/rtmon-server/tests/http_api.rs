mod common;

use axum::http::StatusCode;
use common::{
    build_file_context, build_signed_context, build_test_context, gzip, request_gzip_json,
    request_json, request_raw_json, request_text,
};
use rtmon_common::signing;
use rtmon_common::Metric;
use rtmon_storage::MetricsRepository;
use serde_json::json;

#[tokio::test]
async fn path_update_then_value_round_trip() {
    let ctx = build_test_context().unwrap();

    let (status, _, trace) = request_text(&ctx.app, "POST", "/update/counter/PollCount/5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace.map(|t| t.len()), Some(16));
    request_text(&ctx.app, "POST", "/update/counter/PollCount/3").await;

    let (status, body, _) = request_text(&ctx.app, "GET", "/value/counter/PollCount").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "8");

    request_text(&ctx.app, "POST", "/update/gauge/Alloc/1.5").await;
    request_text(&ctx.app, "POST", "/update/gauge/Alloc/9.9").await;
    let (_, body, _) = request_text(&ctx.app, "GET", "/value/gauge/Alloc").await;
    assert_eq!(body, "9.9");
}

#[tokio::test]
async fn path_update_rejects_bad_input() {
    let ctx = build_test_context().unwrap();

    let (status, _, _) = request_text(&ctx.app, "POST", "/update/histogram/x/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = request_text(&ctx.app, "POST", "/update/counter/x/1.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = request_text(&ctx.app, "POST", "/update/gauge/x/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = request_text(&ctx.app, "POST", "/update/gauge/x/NaN").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = request_text(&ctx.app, "POST", "/update/gauge/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn value_of_missing_or_mistyped_metric_is_404() {
    let ctx = build_test_context().unwrap();
    request_text(&ctx.app, "POST", "/update/gauge/x/1").await;

    let (status, _, _) = request_text(&ctx.app, "GET", "/value/gauge/absent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = request_text(&ctx.app, "GET", "/value/counter/x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn json_update_returns_stored_metric() {
    let ctx = build_test_context().unwrap();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/update/",
        json!({"id": "a", "type": "counter", "delta": 5}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": "a", "type": "counter", "delta": 5}));

    let (_, body, _) = request_json(
        &ctx.app,
        "POST",
        "/update/",
        json!({"id": "a", "type": "counter", "delta": 3}),
    )
    .await;
    assert_eq!(body["delta"], 8);

    let (status, body, _) =
        request_json(&ctx.app, "POST", "/value/", json!({"id": "a", "type": "counter"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delta"], 8);
}

#[tokio::test]
async fn json_update_rejects_mismatched_payload_and_garbage() {
    let ctx = build_test_context().unwrap();

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/update/",
        json!({"id": "g", "type": "gauge", "delta": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) =
        request_raw_json(&ctx.app, "POST", "/update/", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(ctx.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_update_accumulates_and_overwrites() {
    let ctx = build_test_context().unwrap();

    let batch = json!([
        {"id": "b", "type": "counter", "delta": 1},
        {"id": "a", "type": "counter", "delta": 1},
        {"id": "b", "type": "counter", "delta": 2},
        {"id": "g", "type": "gauge", "value": 0.5},
        {"id": "g", "type": "gauge", "value": 2.5}
    ]);
    let (status, _, _) = request_json(&ctx.app, "POST", "/updates/", batch).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(ctx.repo.get("a").await.unwrap(), Metric::counter("a", 1));
    assert_eq!(ctx.repo.get("b").await.unwrap(), Metric::counter("b", 3));
    assert_eq!(ctx.repo.get("g").await.unwrap(), Metric::gauge("g", 2.5));
}

#[tokio::test]
async fn index_lists_metrics_sorted_by_name() {
    let ctx = build_test_context().unwrap();
    request_text(&ctx.app, "POST", "/update/gauge/zeta/1").await;
    request_text(&ctx.app, "POST", "/update/counter/alpha/2").await;

    let (status, body, _) = request_text(&ctx.app, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    let alpha = body.find("alpha").unwrap();
    let zeta = body.find("zeta").unwrap();
    assert!(alpha < zeta);
    assert!(body.contains("<td>counter</td><td>2</td>"));
}

#[tokio::test]
async fn ping_reports_healthy_storage() {
    let ctx = build_test_context().unwrap();
    let (status, _, _) = request_text(&ctx.app, "GET", "/ping").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn synchronous_file_storage_is_durable_per_request() {
    let ctx = build_file_context().await.unwrap();

    request_text(&ctx.app, "POST", "/update/gauge/Alloc/42.5").await;
    let on_disk: Vec<Metric> =
        serde_json::from_slice(&std::fs::read(ctx.snapshot_path()).unwrap()).unwrap();
    assert_eq!(on_disk, vec![Metric::gauge("Alloc", 42.5)]);

    ctx.repo.shutdown().await.unwrap();
}

#[tokio::test]
async fn gzipped_batch_is_decompressed() {
    let ctx = build_test_context().unwrap();
    let body = json!([{"id": "PollCount", "type": "counter", "delta": 4}]).to_string();

    let (status, hash, _) =
        request_gzip_json(&ctx.app, "/updates/", gzip(body.as_bytes()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(hash.is_none());
    assert_eq!(ctx.repo.get("PollCount").await.unwrap(), Metric::counter("PollCount", 4));
}

#[tokio::test]
async fn signed_batch_is_verified_over_the_compressed_body() {
    let ctx = build_signed_context("s3cret").unwrap();
    let compressed = gzip(json!([{"id": "Alloc", "type": "gauge", "value": 2.5}]).to_string().as_bytes());
    let good = signing::sign(b"s3cret", &compressed).unwrap();

    let (status, hash, body) =
        request_gzip_json(&ctx.app, "/updates/", compressed.clone(), Some(good.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    let hash = hash.expect("response should be signed");
    assert!(signing::verify(b"s3cret", body.as_bytes(), &hash));
    assert_eq!(ctx.repo.get("Alloc").await.unwrap(), Metric::gauge("Alloc", 2.5));

    let forged = signing::sign(b"wrong", &compressed).unwrap();
    let (status, hash, _) =
        request_gzip_json(&ctx.app, "/updates/", compressed, Some(forged.as_str())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(hash.is_none());
}

#[tokio::test]
async fn unsigned_request_passes_a_keyed_server() {
    let ctx = build_signed_context("s3cret").unwrap();
    let (status, _, _) = request_text(&ctx.app, "POST", "/update/counter/c/1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn oversized_json_body_is_413() {
    let ctx = build_test_context().unwrap();
    let huge = format!("[{}]", " ".repeat(4 * 1024 * 1024 + 1));
    let (status, _, trace) = request_raw_json(&ctx.app, "POST", "/updates/", huge).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(trace.is_some());
}

#[tokio::test]
async fn overflowing_counter_is_a_bad_request() {
    let ctx = build_test_context().unwrap();
    ctx.repo.update_counter("c", i64::MAX).await.unwrap();
    let (status, _, _) = request_text(&ctx.app, "POST", "/update/counter/c/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ctx.repo.get("c").await.unwrap(), Metric::counter("c", i64::MAX));
}
