//! Catch-all GET handler serving stored objects back as plaintext.
//!
//! The retrieval path is `/<name>?enc_key=<secret>`, possibly arriving as a
//! single zero-width obfuscated string. The object is decrypted chunk by
//! chunk straight into the response body; only the first chunk is buffered,
//! for MIME detection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES, PRAGMA, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Uri};
use bytes::Bytes;
use futures_util::stream;
use futures_util::{Stream, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::fs::File;
use tokio::time::Instant;

use crate::crypto::derive::derive_key;
use crate::crypto::stream::{
    plaintext_len, read_chunk, ChunkReadError, StreamDecryptor, HEADER_SIZE,
};
use crate::error::ApiError;
use crate::filter::{self, FilterOutcome};
use crate::limiter::bandwidth_download_scope;
use crate::limiter::middleware::client_ip;
use crate::state::AppState;
use crate::zerowidth;

/// Downloads held open past this long are aborted mid-stream so a slow
/// client cannot pin the file handle indefinitely.
const DOWNLOAD_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Link-preview crawlers get an HTML shim instead of raw image bytes.
const PREVIEW_USER_AGENT: &str = "discordbot";

/// MIME types the preview shim knows how to embed.
const PREVIEW_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/gif"];

pub async fn serve_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response<Body>, ApiError> {
    if method != Method::GET {
        return Err(ApiError::NotFound);
    }

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path());
    if path_and_query.len() > state.config.path_length_limit() {
        return Err(ApiError::Validation("Path is too long.".to_string()));
    }
    if uri.path().len() <= 1 {
        return Err(ApiError::Validation("Path is too short.".to_string()));
    }

    let (name, query) = split_request(&uri)?;

    let enc_key = query
        .get("enc_key")
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            ApiError::Validation("No encryption key was provided. (enc_key)".to_string())
        })?;

    // Absent objects and invalid names both read as not-found so probing
    // the namespace reveals nothing.
    if !crate::storage::FileStore::valid_name(&name) {
        return Err(ApiError::NotFound);
    }
    let encrypted_len = state
        .store
        .file_size(&name)
        .await?
        .ok_or(ApiError::NotFound)?;

    let ip = client_ip(&headers, Some(&addr));
    let bandwidth = &state.config.rate_limit.bandwidth;
    let admitted = state
        .limiter
        .try_acquire(
            &bandwidth_download_scope(&ip),
            bandwidth.download,
            bandwidth.reset_after_ms,
            encrypted_len as i64,
        )
        .await?;
    if !admitted {
        return Err(ApiError::RateLimited("bandwidth: download".to_string()));
    }

    let mut file = state.store.open(&name).await?;

    let mut header = [0u8; HEADER_SIZE];
    tokio::io::AsyncReadExt::read_exact(&mut file, &mut header)
        .await
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                ApiError::InvalidKey
            } else {
                ApiError::from(err)
            }
        })?;

    let key = derive_key(enc_key.as_bytes(), state.config.encryption.nonce.as_bytes())
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let mut decryptor = StreamDecryptor::new(&key, &header).map_err(|_| ApiError::InvalidKey)?;

    // The first chunk both proves the key and feeds MIME detection.
    let first = open_next_chunk(&mut file, &mut decryptor).await?;

    let detected = super::detect_mime(&first.plaintext);
    let content_type = match filter::evaluate(&state.config.filter, detected) {
        FilterOutcome::Deny(reason) => return Err(ApiError::Validation(reason.to_string())),
        FilterOutcome::Sanitize => "text/plain; charset=utf-8",
        FilterOutcome::Pass => detected,
    };

    let total_len = plaintext_len(encrypted_len).map_err(|_| ApiError::InvalidKey)?;

    // The shim decision is about what the object *is*, so it looks at the
    // detected type; sanitization only changes how it is served.
    if wants_preview_shim(&headers, &query, detected) {
        return Ok(preview_shim(&state, &name, enc_key));
    }

    let deadline = Instant::now() + DOWNLOAD_DEADLINE;
    let body = Body::from_stream(decrypt_stream(file, decryptor, first.plaintext, deadline));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, total_len)
        .header(
            CONTENT_DISPOSITION,
            format!("inline; filename=\"{name}\""),
        )
        .body(body)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(response)
}

/// Resolve the request into an object name and query map, undoing
/// percent-encoding and zero-width obfuscation first.
fn split_request(uri: &Uri) -> Result<(String, HashMap<String, String>), ApiError> {
    let raw = &uri.path()[1..];
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| ApiError::Validation("Path is not valid UTF-8.".to_string()))?
        .into_owned();

    let starts_obfuscated = decoded
        .chars()
        .next()
        .is_some_and(zerowidth::is_reference_codepoint);

    if starts_obfuscated {
        let visible = zerowidth::decode(&decoded).map_err(|_| ApiError::NotFound)?;
        match visible.split_once('?') {
            Some((name, query)) => Ok((name.to_string(), parse_query(query))),
            None => Ok((visible, HashMap::new())),
        }
    } else {
        let query = uri.query().map(parse_query).unwrap_or_default();
        Ok((decoded, query))
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Response body: the already-opened first chunk, then the remaining chunks
/// decrypted on demand. The stream aborts once `deadline` passes, whether the
/// delay came from storage or from a client draining the body slowly.
fn decrypt_stream(
    file: File,
    decryptor: StreamDecryptor,
    first: Vec<u8>,
    deadline: Instant,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream::once(async move { Ok::<Bytes, std::io::Error>(Bytes::from(first)) }).chain(stream::try_unfold(
        (file, decryptor),
        move |(mut file, mut decryptor)| async move {
            if decryptor.finished() {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "download deadline exceeded",
                ));
            }
            let opened = open_next_chunk(&mut file, &mut decryptor)
                .await
                .map_err(|err| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
                })?;
            if opened.is_final {
                return Ok(None);
            }
            Ok(Some((Bytes::from(opened.plaintext), (file, decryptor))))
        },
    ))
}

async fn open_next_chunk(
    file: &mut File,
    decryptor: &mut StreamDecryptor,
) -> Result<crate::crypto::stream::OpenedChunk, ApiError> {
    let body = read_chunk(file).await.map_err(|err| match err {
        ChunkReadError::Cipher(_) => ApiError::InvalidKey,
        ChunkReadError::Io(io_err) => ApiError::from(io_err),
    })?;
    decryptor.open_chunk(&body).map_err(|_| ApiError::InvalidKey)
}

/// Whether this request should get the crawler preview page: a detected
/// image, fetched by a link-preview bot, without the raw escape hatch.
fn wants_preview_shim(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    detected: &str,
) -> bool {
    let is_crawler = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.to_ascii_lowercase().contains(PREVIEW_USER_AGENT));
    is_crawler && !query.contains_key("raw") && PREVIEW_TYPES.contains(&detected)
}

/// Minimal HTML page whose meta tags point the crawler at the raw image,
/// so chat clients render an inline preview instead of a bare link.
fn preview_shim(state: &AppState, name: &str, enc_key: &str) -> Response<Body> {
    let raw_url = format!(
        "{}/{}?raw=true&enc_key={}",
        state.config.domain, name, enc_key
    );
    let html = format!(
        "<html><head>\
         <meta name=\"twitter:card\" content=\"summary_large_image\">\
         <meta name=\"twitter:image\" content=\"{raw_url}\">\
         </head></html>"
    );

    let mut response = Response::new(Body::from(html));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    // Previews must never be cached: the shim leaks the keyed URL to any
    // cache between the crawler and us.
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    response
}
