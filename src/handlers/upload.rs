//! POST /upload — authenticate, admit, allocate, encrypt, persist.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::multipart::Field;
use axum::extract::{ConnectInfo, Multipart, Query, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::EXTENSION_LENGTH_LIMIT;
use crate::crypto::derive::derive_key;
use crate::crypto::stream::{StreamEncryptor, CHUNK_SIZE};
use crate::error::ApiError;
use crate::filter::{self, FilterOutcome};
use crate::limiter::bandwidth_upload_scope;
use crate::limiter::middleware::client_ip;
use crate::response::UploadResponse;
use crate::state::AppState;
use crate::storage::allocator::{allocate, random_alphanumeric, AllocateError};
use crate::storage::FileStore;
use crate::zerowidth;

use super::{authorize, detect_mime, MIME_DETECT_PREFIX};

/// Uploads stalled past this long are aborted and their partial object
/// discarded.
const UPLOAD_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Multipart field the object bytes must arrive under.
const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// `?zerowidth=1` asks for an obfuscated link.
    pub zerowidth: Option<String>,
}

pub async fn serve_upload(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    authorize(&state.config, &headers)?;

    let ip = client_ip(&headers, Some(&addr));

    // Admit against the upload bandwidth budget using the declared request
    // size, before reading any of the body.
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    if declared > state.config.storage.max_size_bytes {
        return Err(ApiError::Validation("File is too large.".to_string()));
    }

    let bandwidth = &state.config.rate_limit.bandwidth;
    let admitted = state
        .limiter
        .try_acquire(
            &bandwidth_upload_scope(&ip),
            bandwidth.upload,
            bandwidth.reset_after_ms,
            declared as i64,
        )
        .await?;
    if !admitted {
        return Err(ApiError::RateLimited("bandwidth: upload".to_string()));
    }

    let want_zero_width =
        state.config.force_zero_width || params.zerowidth.as_deref() == Some("1");

    loop {
        let field = multipart.next_field().await.map_err(|err| {
            ApiError::Validation(format!("The multipart form couldn't be parsed. {err}"))
        })?;
        let Some(field) = field else {
            return Err(ApiError::Validation("No files were sent.".to_string()));
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let response = store_upload(&state, field, want_zero_width).await?;
        return Ok(Json(response));
    }
}

/// Everything past admission: validate, allocate, encrypt to disk.
async fn store_upload(
    state: &AppState,
    mut field: Field<'_>,
    want_zero_width: bool,
) -> Result<UploadResponse, ApiError> {
    let ext = field
        .file_name()
        .and_then(|name| name.rfind('.').map(|i| name[i..].to_string()))
        .unwrap_or_default();

    if ext.len() > EXTENSION_LENGTH_LIMIT {
        return Err(ApiError::Validation(
            "File extension is too long.".to_string(),
        ));
    }
    if !ext.is_empty() && !FileStore::valid_name(&format!("x{ext}")) {
        return Err(ApiError::Validation(
            "File extension contains unsupported characters.".to_string(),
        ));
    }

    // The deadline covers the whole body read, starting with the sniff
    // prefix: a client stalling before the first 8 KiB must not hold the
    // request open any longer than one stalling mid-stream.
    let deadline = Instant::now() + UPLOAD_DEADLINE;

    // Buffer just enough plaintext to classify the content before anything
    // touches storage.
    let mut pending: Vec<u8> = Vec::new();
    tokio::time::timeout_at(deadline, async {
        while pending.len() < MIME_DETECT_PREFIX {
            match next_chunk(&mut field).await? {
                Some(bytes) => pending.extend_from_slice(&bytes),
                None => break,
            }
        }
        Ok::<(), ApiError>(())
    })
    .await
    .map_err(|_| ApiError::Validation("Upload timed out.".to_string()))??;

    let mime = detect_mime(&pending);
    if let FilterOutcome::Deny(reason) = filter::evaluate(&state.config.filter, mime) {
        return Err(ApiError::Validation(reason.to_string()));
    }

    let file_name = claim_object_name(state, &ext).await?;
    let (file_name, mut dest) = file_name;

    let secret = random_alphanumeric(state.config.encryption.key_length);
    let key = derive_key(secret.as_bytes(), state.config.encryption.nonce.as_bytes())
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let written = tokio::time::timeout_at(
        deadline,
        encrypt_to_file(state, &mut dest, &key, pending, &mut field),
    )
    .await;

    match written {
        Ok(Ok(size)) => {
            tracing::info!("object {} stored, plaintext size: {}", file_name, size);
        }
        Ok(Err(err)) => {
            // Never leave a truncated, valid-looking object behind.
            let _ = state.store.remove(&file_name).await;
            return Err(err);
        }
        Err(_elapsed) => {
            let _ = state.store.remove(&file_name).await;
            return Err(ApiError::Validation("Upload timed out.".to_string()));
        }
    }

    let mut target_path = format!("{file_name}?enc_key={secret}");
    if want_zero_width {
        target_path = zerowidth::encode(&target_path)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }

    Ok(UploadResponse {
        status: "ok",
        uri: format!("{}/{}", state.config.domain, target_path),
        path: target_path,
        file_name,
        encryption_key: secret,
    })
}

/// Allocate an identifier and exclusively create `<id><ext>`. A name another
/// uploader claims between our draw and our create counts as a collision
/// against the same retry budget.
async fn claim_object_name(state: &AppState, ext: &str) -> Result<(String, File), ApiError> {
    let claimed: Arc<Mutex<Option<File>>> = Arc::new(Mutex::new(None));

    let storage = &state.config.storage;
    let id = allocate(storage.id_length, storage.collision_check_attempts, |candidate| {
        let store = state.store.clone();
        let ext = ext.to_string();
        let claimed = claimed.clone();
        async move {
            match store.create_new(&format!("{candidate}{ext}")).await? {
                Some(file) => {
                    *claimed.lock().await = Some(file);
                    Ok(false)
                }
                None => Ok(true),
            }
        }
    })
    .await
    .map_err(|err: AllocateError<std::io::Error>| match err {
        AllocateError::Exhausted => ApiError::ResourceExhausted,
        AllocateError::Check(io_err) => ApiError::from(io_err),
    })?;

    let file = claimed
        .lock()
        .await
        .take()
        .ok_or_else(|| ApiError::Internal("allocator returned an unclaimed name".to_string()))?;

    Ok((format!("{id}{ext}"), file))
}

/// Stream-encrypt the buffered prefix plus the rest of the multipart field
/// into `dest`. Returns the plaintext byte count.
async fn encrypt_to_file(
    state: &AppState,
    dest: &mut File,
    key: &[u8; 32],
    mut pending: Vec<u8>,
    field: &mut Field<'_>,
) -> Result<u64, ApiError> {
    let max_size = state.config.storage.max_size_bytes;
    let mut encryptor = StreamEncryptor::new(key);
    dest.write_all(&encryptor.header()).await?;

    let mut total: u64 = 0;
    let mut eof = false;
    loop {
        while pending.len() >= CHUNK_SIZE {
            let rest = pending.split_off(CHUNK_SIZE);
            let framed = encryptor
                .seal_chunk(&pending, false)
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            dest.write_all(&framed).await?;
            total += CHUNK_SIZE as u64;
            pending = rest;
        }

        // Declared sizes can lie; enforce the cap on actual bytes too.
        if total + pending.len() as u64 > max_size {
            return Err(ApiError::Validation("File is too large.".to_string()));
        }

        if eof {
            break;
        }
        match next_chunk(field).await? {
            Some(bytes) => pending.extend_from_slice(&bytes),
            None => eof = true,
        }
    }

    if !pending.is_empty() {
        total += pending.len() as u64;
        let framed = encryptor
            .seal_chunk(&pending, false)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        dest.write_all(&framed).await?;
    }

    let fin = encryptor
        .seal_chunk(&[], true)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    dest.write_all(&fin).await?;
    dest.flush().await?;

    Ok(total)
}

async fn next_chunk(field: &mut Field<'_>) -> Result<Option<bytes::Bytes>, ApiError> {
    field
        .chunk()
        .await
        .map_err(|err| ApiError::Validation(format!("The file could not be read. {err}")))
}
