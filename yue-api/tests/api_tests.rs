//! HTTP API integration tests
//!
//! Requests go through the full router with `oneshot`; generation runs on
//! the real job queue against a scripted inference program.

mod helpers;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use helpers::{FakeInference, CUDA_OOM, NO_OUTPUT, RECORD_PROMPT, SLOW, TWO_SONGS};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use yue_api::{build_router, AppState};

fn app(fake: &FakeInference, script: &str) -> Router {
    build_router(AppState::new(fake.toml_config(script)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn get_bytes(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

fn song_payload() -> Value {
    json!({
        "genre_txt": "inspiring female uplifting pop",
        "lyrics_txt": "[verse]\nhello world",
    })
}

/// Poll a job until `done` accepts its state
async fn wait_for_job(app: &Router, job_id: &str, done: impl Fn(&str) -> bool) -> Value {
    for _ in 0..200 {
        let (status, body) = get(app, &format!("/api/jobs/{}", job_id)).await;
        assert_eq!(status, StatusCode::OK);
        if done(body["state"].as_str().unwrap()) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not reach the expected state", job_id);
}

#[tokio::test]
async fn test_health() {
    let fake = FakeInference::new();
    let app = app(&fake, NO_OUTPUT);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "yue-api");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_service_info_and_models() {
    let fake = FakeInference::new();
    let app = app(&fake, NO_OUTPUT);

    let (status, body) = get(&app, "/api").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workers"], json!(["0"]));
    assert!(body["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["path"] == "/api/generate/sync"));

    let (status, body) = get(&app, "/api/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage1"].as_array().unwrap().len(), 6);
    assert_eq!(body["default_stage1"], "m-a-p/YuE-s1-7B-anneal-en-icl");
    assert_eq!(body["default_stage2"], "m-a-p/YuE-s2-1B-general");

    let (status, body) = get(&app, "/api/tags").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"], json!([]));
}

#[tokio::test]
async fn test_root_serves_form() {
    let fake = FakeInference::new();
    let app = app(&fake, NO_OUTPUT);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.contains("text/html"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("name=\"prompt_mode\""));
    assert!(html.contains("id=\"audio_prompt_file\""));
    assert!(html.contains("/static/app.js"));
}

#[tokio::test]
async fn test_validation_failure_is_400_with_field() {
    let fake = FakeInference::new();
    let app = app(&fake, TWO_SONGS);

    let (status, body) = post_json(&app, "/api/generate", json!({ "run_n_segments": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["field"], "run_n_segments");

    let (status, body) = post_json(
        &app,
        "/api/generate/sync",
        json!({ "stage1_model": "m-a-p/not-a-model" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "stage1_model");
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let fake = FakeInference::new();
    let app = app(&fake, TWO_SONGS);

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_sync_success_returns_latest_artifact() {
    let fake = FakeInference::new();
    let app = app(&fake, TWO_SONGS);

    let (status, body) = post_json(&app, "/api/generate/sync", song_payload()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_count"], 2);
    assert!(body["artifact"].as_str().unwrap().ends_with("song2.mp3"));
    assert!(body["status"].as_str().unwrap().contains("Latest: song2.mp3"));
    assert!(body.get("error_code").is_none());

    let job_id = body["job_id"].as_str().unwrap();
    let artifact_url = body["artifact_url"].as_str().unwrap();
    assert_eq!(artifact_url, format!("/api/output/{}/song2.mp3", job_id));

    let response = app
        .clone()
        .oneshot(Request::builder().uri(artifact_url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("audio/"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ID3-new");

    let (_, record) = get(&app, &format!("/api/jobs/{}", job_id)).await;
    assert_eq!(record["state"], "succeeded");
    assert_eq!(record["artifact"], "song2.mp3");
    assert_eq!(record["device"], "0");
}

#[tokio::test]
async fn test_sync_failure_embeds_stderr_and_command() {
    let fake = FakeInference::new();
    let app = app(&fake, CUDA_OOM);

    let (status, body) = post_json(&app, "/api/generate/sync", song_payload()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["artifact"].is_null());
    assert!(body["artifact_url"].is_null());
    assert_eq!(body["error_code"], "INVOCATION_FAILED");

    let text = body["status"].as_str().unwrap();
    assert!(text.contains("CUDA OOM"));
    assert!(text.contains("Command: /bin/sh -c"));
    assert!(text.contains("--cuda_idx 0"));
    assert!(text.contains("--repetition_penalty 1.1"));

    let (_, health) = get(&app, "/health").await;
    assert!(health["last_error"].as_str().is_some());
    assert!(fake.staged_files().is_empty());
}

#[tokio::test]
async fn test_sync_no_artifact_has_distinct_code() {
    let fake = FakeInference::new();
    let app = app(&fake, NO_OUTPUT);

    let (status, body) = post_json(&app, "/api/generate/sync", song_payload()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error_code"], "NO_ARTIFACT");
    assert!(body["artifact"].is_null());
    assert!(body["status"]
        .as_str()
        .unwrap()
        .starts_with("Generation completed but no audio files found"));
}

#[tokio::test]
async fn test_async_generate_accepts_and_completes() {
    let fake = FakeInference::new();
    let app = app(&fake, TWO_SONGS);

    let (status, body) = post_json(&app, "/api/generate", song_payload()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert_eq!(body["status_url"], format!("/api/jobs/{}", job_id));
    assert!(body["output_dir"].as_str().unwrap().ends_with(&job_id));

    let record = wait_for_job(&app, &job_id, |state| state == "succeeded" || state == "failed").await;
    assert_eq!(record["state"], "succeeded");
    assert_eq!(record["file_count"], 2);
    assert_eq!(record["artifact"], "song2.mp3");
    assert!(record["started_at"].is_string());
    assert!(record["finished_at"].is_string());
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let fake = FakeInference::new();
    let app = app(&fake, NO_OUTPUT);
    let unknown = uuid::Uuid::new_v4();

    let (status, body) = get(&app, &format!("/api/jobs/{}", unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = post_json(&app, &format!("/api/jobs/{}/cancel", unknown), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/api/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let fake = FakeInference::new();
    let app = app(&fake, SLOW);

    let (_, body) = post_json(&app, "/api/generate", song_payload()).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    wait_for_job(&app, &job_id, |state| state == "running").await;

    let (status, _) = post_json(&app, &format!("/api/jobs/{}/cancel", job_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let record = wait_for_job(&app, &job_id, |state| state == "cancelled").await;
    assert_eq!(record["error_code"], "CANCELLED");

    let (status, body) = post_json(&app, &format!("/api/jobs/{}/cancel", job_id), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert!(fake.staged_files().is_empty());
}

#[tokio::test]
async fn test_full_queue_is_409() {
    let fake = FakeInference::new();
    let mut config = fake.toml_config(SLOW);
    config.inference.queue_capacity = 1;
    let app = build_router(AppState::new(config));

    let (_, running) = post_json(&app, "/api/generate", song_payload()).await;
    let running_id = running["job_id"].as_str().unwrap().to_string();
    wait_for_job(&app, &running_id, |state| state == "running").await;

    let (status, queued) = post_json(&app, "/api/generate", song_payload()).await;
    assert_eq!(status, StatusCode::OK);
    let queued_id = queued["job_id"].as_str().unwrap().to_string();

    let (status, body) = post_json(&app, "/api/generate", song_payload()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"].as_str().unwrap().contains("queue is full"));

    // Queued job is cancelled without ever running
    let (status, record) = post_json(&app, &format!("/api/jobs/{}/cancel", queued_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["state"], "cancelled");
    assert!(record["started_at"].is_null());

    // The cancelled job no longer holds the only waiting slot
    let (status, replacement) = post_json(&app, "/api/generate", song_payload()).await;
    assert_eq!(status, StatusCode::OK);
    let replacement_id = replacement["job_id"].as_str().unwrap().to_string();

    post_json(&app, &format!("/api/jobs/{}/cancel", replacement_id), json!({})).await;
    post_json(&app, &format!("/api/jobs/{}/cancel", running_id), json!({})).await;
}

#[tokio::test]
async fn test_output_fetch_by_name_finds_generated_file() {
    let fake = FakeInference::new();
    let app = app(&fake, TWO_SONGS);

    let (status, _) = post_json(&app, "/api/generate/sync", song_payload()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, bytes) = get_bytes(&app, "/api/output/song2.mp3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"ID3-new");

    let (status, bytes) = get_bytes(&app, "/api/output/song1.wav").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"RIFF-old");

    let (status, _) = get(&app, "/api/output/stage1.log").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_output_fetch_rejects_bad_names_and_missing_files() {
    let fake = FakeInference::new();
    let app = app(&fake, NO_OUTPUT);
    let job_id = uuid::Uuid::new_v4();

    let (status, body) = get(&app, "/api/output/missing.mp3").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = get(&app, "/api/output/notes.txt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/api/output/..%2Fsecret.mp3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, &format!("/api/output/{}/..", job_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&app, &format!("/api/output/{}/song.mp3", job_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

const BOUNDARY: &str = "yue-test-boundary";

fn multipart_body(request: &Value, files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"request\"\r\nContent-Type: application/json\r\n\r\n{}\r\n",
            BOUNDARY, request
        )
        .as_bytes(),
    );
    for (field, file_name, content) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/mpeg\r\n\r\n",
                BOUNDARY, field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn post_multipart(app: &Router, body: Vec<u8>) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/generate/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_uploaded_prompt_is_used_then_removed() {
    let fake = FakeInference::new();
    let app = app(&fake, RECORD_PROMPT);

    let mut request = song_payload();
    request["use_audio_prompt"] = json!(true);
    let body = multipart_body(&request, &[("audio_prompt_file", "reference.mp3", b"ID3-reference")]);

    let (status, body) = post_multipart(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_count"], 1);

    let job_dir = fake.output.path().join(body["job_id"].as_str().unwrap());
    let seen = std::fs::read(job_dir.join("prompt_seen.txt")).unwrap();
    assert_eq!(seen, b"ID3-reference");

    let prompt_path = std::fs::read_to_string(job_dir.join("prompt_path.txt")).unwrap();
    let prompt_path = std::path::PathBuf::from(prompt_path.trim());
    assert!(prompt_path.starts_with(fake.staging.path()));
    assert!(prompt_path.to_string_lossy().ends_with(".mp3"));
    assert!(!prompt_path.exists());
    assert!(fake.staged_files().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_bad_forms_without_leaving_files() {
    let fake = FakeInference::new();
    let app = app(&fake, RECORD_PROMPT);

    // Validation fails after the file was stored
    let mut request = song_payload();
    request["run_n_segments"] = json!(0);
    let body = multipart_body(&request, &[("vocal_track_prompt_file", "vocals.wav", b"RIFF")]);
    let (status, body) = post_multipart(&app, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(fake.staged_files().is_empty());

    let body = multipart_body(&song_payload(), &[("cover_art", "cover.png", b"PNG")]);
    let (status, body) = post_multipart(&app, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("cover_art"));

    let body = multipart_body(&json!("not an object"), &[]);
    let (status, _) = post_multipart(&app, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(fake.staged_files().is_empty());
}

#[tokio::test]
async fn test_upload_storage_failure_is_io_error() {
    let fake = FakeInference::new();
    let mut config = fake.toml_config(RECORD_PROMPT);
    config.inference.staging_dir = Some(fake.staging.path().join("missing"));
    let app = build_router(AppState::new(config));

    let body = multipart_body(&song_payload(), &[("audio_prompt_file", "reference.mp3", b"ID3")]);
    let (status, body) = post_multipart(&app, body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "IO_ERROR");
}
