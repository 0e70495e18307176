//! Integration tests for the full upload/download flow:
//! multipart upload -> keyed retrieval link -> streamed decryption,
//! plus auth, MIME policy, zero-width links, and the crawler shim.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use osmium::config::Config;
use osmium::routes::build_router;
use osmium::state::AppState;

const MASTER_KEY: &str = "test-master-key";

/// Minimal valid-signature PNG prefix, enough for content detection.
const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
    b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
];

/// Start the server on a random port over a fresh storage directory.
/// Returns the base URL and the tempdir guard (dropping it deletes storage).
async fn start_test_server(
    configure: impl FnOnce(&mut Config),
) -> (String, tempfile::TempDir) {
    let storage_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let mut config = Config::default();
    config.domain = base_url.clone();
    config.storage.directory = storage_dir.path().to_str().unwrap().to_string();
    config.security.master_key = MASTER_KEY.to_string();
    config.encryption.nonce = "integration-test-nonce".to_string();
    configure(&mut config);

    let app = build_router(AppState::new(config));

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (base_url, storage_dir)
}

async fn upload(
    base_url: &str,
    query: &str,
    file_name: &str,
    content: &[u8],
    auth: &str,
) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);

    reqwest::Client::new()
        .post(format!("{}/upload{}", base_url, query))
        .header("Authorization", auth)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    let content = b"the quick brown fox jumps over the lazy dog".repeat(100);
    let resp = upload(&base_url, "", "note.txt", &content, MASTER_KEY).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    let path = body["path"].as_str().unwrap();
    let file_name = body["file_name"].as_str().unwrap();
    let key = body["encryption_key"].as_str().unwrap();
    assert!(path.contains("?enc_key="));
    assert!(file_name.ends_with(".txt"));
    assert_eq!(key.len(), 12);

    let resp = reqwest::get(format!("{}/{}", base_url, path)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.content_length(), Some(content.len() as u64));
    assert_eq!(resp.bytes().await.unwrap().as_ref(), content.as_slice());
}

#[tokio::test]
async fn wrong_key_is_rejected_and_never_leaks_plaintext() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    let content = b"secret document contents";
    let resp = upload(&base_url, "", "doc.txt", content, MASTER_KEY).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let file_name = body["file_name"].as_str().unwrap();

    let resp = reqwest::get(format!(
        "{}/{}?enc_key=AAAAAAAAAAAA",
        base_url, file_name
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 400);

    let error: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        error["message"],
        "Invalid encryption key, or the file is corrupted."
    );
}

#[tokio::test]
async fn downloads_require_a_key_and_an_existing_object() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    // Missing key on any path is a validation failure.
    let resp = reqwest::get(format!("{}/abcde.txt", base_url)).await.unwrap();
    assert_eq!(resp.status(), 400);

    // Absent objects are not found regardless of the presented key.
    let resp = reqwest::get(format!("{}/abcde.txt?enc_key=whatever", base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn uploads_require_the_master_key() {
    let (base_url, storage) = start_test_server(|_| {}).await;

    let resp = upload(&base_url, "", "note.txt", b"hello", "wrong-key").await;
    assert_eq!(resp.status(), 401);

    // Nothing may be written for a rejected upload.
    let mut entries = tokio::fs::read_dir(storage.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn upload_without_a_file_field_is_rejected() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    let form = reqwest::multipart::Form::new().text("comment", "no file here");
    let resp = reqwest::Client::new()
        .post(format!("{}/upload", base_url))
        .header("Authorization", MASTER_KEY)
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let error: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(error["message"], "No files were sent.");
}

#[tokio::test]
async fn blacklisted_types_are_rejected_and_not_stored() {
    let (base_url, storage) = start_test_server(|config| {
        config.filter.blacklist = vec!["image/png".to_string()];
    })
    .await;

    let resp = upload(&base_url, "", "pic.png", PNG_BYTES, MASTER_KEY).await;
    assert_eq!(resp.status(), 400);
    let error: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(error["message"], "This file type is blacklisted.");

    let mut entries = tokio::fs::read_dir(storage.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn zero_width_links_round_trip() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    let content = b"obfuscated link payload";
    let resp = upload(&base_url, "?zerowidth=1", "z.txt", content, MASTER_KEY).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let path = body["path"].as_str().unwrap();
    // Every character of the obfuscated path is outside the visible range.
    assert!(path.chars().all(|c| c as u32 >= 0xE0000));

    let resp = reqwest::get(format!("{}/{}", base_url, path)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), content);
}

#[tokio::test]
async fn crawler_gets_a_preview_page_and_raw_query_escapes_it() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    let resp = upload(&base_url, "", "pic.png", PNG_BYTES, MASTER_KEY).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let path = body["path"].as_str().unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/{}", base_url, path))
        .header("User-Agent", "Mozilla/5.0 (compatible; Discordbot/2.0; +https://discordapp.com)")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = resp.text().await.unwrap();
    assert!(html.contains("twitter:image"));
    assert!(html.contains("raw=true"));

    // The same crawler with ?raw=true gets the actual bytes.
    let resp = client
        .get(format!("{}/{}&raw=true", base_url, path))
        .header("User-Agent", "Discordbot")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), PNG_BYTES);
}

#[tokio::test]
async fn sanitized_types_are_served_as_plain_text() {
    let (base_url, _storage) = start_test_server(|config| {
        config.filter.sanitize = vec!["image/png".to_string()];
    })
    .await;

    let resp = upload(&base_url, "", "pic.png", PNG_BYTES, MASTER_KEY).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let path = body["path"].as_str().unwrap();

    let resp = reqwest::get(format!("{}/{}", base_url, path)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );
}

#[tokio::test]
async fn sanitized_images_still_get_the_preview_shim() {
    let (base_url, _storage) = start_test_server(|config| {
        config.filter.sanitize = vec!["image/png".to_string()];
    })
    .await;

    let resp = upload(&base_url, "", "pic.png", PNG_BYTES, MASTER_KEY).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let path = body["path"].as_str().unwrap();

    // The crawler decision follows what the object is, not how it is served.
    let resp = reqwest::Client::new()
        .get(format!("{}/{}", base_url, path))
        .header("User-Agent", "Discordbot")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(resp.text().await.unwrap().contains("twitter:image"));
}

#[tokio::test]
async fn upload_route_rate_limit_applies() {
    let (base_url, _storage) = start_test_server(|config| {
        config.rate_limit.upload = 2;
    })
    .await;

    for _ in 0..2 {
        let resp = upload(&base_url, "", "a.txt", b"data", MASTER_KEY).await;
        assert_eq!(resp.status(), 200);
    }
    let resp = upload(&base_url, "", "a.txt", b"data", MASTER_KEY).await;
    assert_eq!(resp.status(), 429);
}

#[tokio::test]
async fn check_auth_and_ping() {
    let (base_url, _storage) = start_test_server(|_| {}).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/check_auth", base_url))
        .header("Authorization", MASTER_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{}/check_auth", base_url))
        .header("Authorization", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client.get(format!("{}/ping", base_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["max_size"], 50 * 1024 * 1024);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn extensions_longer_than_the_limit_are_rejected() {
    let (base_url, _storage) = start_test_server(|_| {}).await;

    let resp = upload(
        &base_url,
        "",
        "file.waytoolongext",
        b"data",
        MASTER_KEY,
    )
    .await;
    assert_eq!(resp.status(), 400);
    let error: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(error["message"], "File extension is too long.");
}
