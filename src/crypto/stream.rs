//! Chunked XChaCha20-Poly1305 stream cipher.
//!
//! Objects are stored as a 17-byte header (format version + random 16-byte
//! nonce prefix) followed by length-prefixed sealed chunks:
//!
//! ```text
//! header:  version (1) || nonce_prefix (16)
//! chunk:   len: u32 LE (4) || ciphertext || tag (16)
//! ```
//!
//! Each chunk's nonce is `nonce_prefix || chunk_counter (u64 LE)` and its
//! AAD binds the counter, a final-chunk flag, and the format version, so a
//! reordered, truncated, or duplicated chunk fails authentication at the
//! point it is consumed. The final chunk is always empty, which makes clean
//! truncation after a chunk boundary detectable too.
//!
//! The `StreamEncryptor`/`StreamDecryptor` types are pure chunk machines;
//! the async framing helpers at the bottom drive them against tokio I/O so
//! no caller ever buffers a whole object.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::derive::KEY_LEN;

/// Plaintext bytes per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Poly1305 tag bytes appended to every chunk.
pub const TAG_SIZE: usize = 16;
/// Stream header: version byte plus nonce prefix.
pub const HEADER_SIZE: usize = 1 + NONCE_PREFIX_SIZE;
/// Per-chunk framing cost: length prefix plus tag.
pub const CHUNK_OVERHEAD: usize = 4 + TAG_SIZE;

const NONCE_PREFIX_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;
const FORMAT_VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum CipherError {
    /// Wrong key, tampered data, truncation, or reordering. These are
    /// indistinguishable by design.
    #[error("authentication failed")]
    Authentication,

    /// The encryption primitive refused the operation.
    #[error("encryption failed")]
    Encryption,

    /// A chunk was pushed after the final chunk.
    #[error("stream already finalized")]
    Finalized,

    /// Caller handed the encryptor more than `CHUNK_SIZE` bytes at once.
    #[error("chunk exceeds maximum size")]
    OversizedChunk,
}

fn build_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn chunk_aad(counter: u64, is_final: bool) -> [u8; 10] {
    let mut aad = [0u8; 10];
    aad[..8].copy_from_slice(&counter.to_le_bytes());
    aad[8] = u8::from(is_final);
    aad[9] = FORMAT_VERSION;
    aad
}

/// Seals plaintext chunks in order. One encryptor per upload.
pub struct StreamEncryptor {
    cipher: XChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u64,
    finalized: bool,
}

impl StreamEncryptor {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
            nonce_prefix: rand::rng().random(),
            counter: 0,
            finalized: false,
        }
    }

    /// The stream header. Written to the destination before any chunk.
    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = FORMAT_VERSION;
        header[1..].copy_from_slice(&self.nonce_prefix);
        header
    }

    /// Seal one chunk into its framed wire form.
    ///
    /// Non-final chunks carry 1..=CHUNK_SIZE bytes; the final chunk is
    /// always empty and closes the stream.
    pub fn seal_chunk(&mut self, plaintext: &[u8], is_final: bool) -> Result<Vec<u8>, CipherError> {
        if self.finalized {
            return Err(CipherError::Finalized);
        }
        if plaintext.len() > CHUNK_SIZE || (is_final && !plaintext.is_empty()) {
            return Err(CipherError::OversizedChunk);
        }

        let nonce_bytes = build_nonce(&self.nonce_prefix, self.counter);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let aad = chunk_aad(self.counter, is_final);

        let mut framed = Vec::with_capacity(4 + plaintext.len() + TAG_SIZE);
        framed.extend_from_slice(&[0u8; 4]);
        framed.extend_from_slice(plaintext);

        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, &aad, &mut framed[4..])
            .map_err(|_| CipherError::Encryption)?;
        framed.extend_from_slice(&tag);

        let body_len = (framed.len() - 4) as u32;
        framed[..4].copy_from_slice(&body_len.to_le_bytes());

        self.counter += 1;
        if is_final {
            self.finalized = true;
        }
        Ok(framed)
    }
}

/// Opens sealed chunks in order. One decryptor per download.
pub struct StreamDecryptor {
    cipher: XChaCha20Poly1305,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u64,
    finished: bool,
}

/// One authenticated chunk of plaintext.
pub struct OpenedChunk {
    pub plaintext: Vec<u8>,
    pub is_final: bool,
}

impl StreamDecryptor {
    /// Parse the stream header and bind the decryptor to `key`.
    pub fn new(key: &[u8; KEY_LEN], header: &[u8]) -> Result<Self, CipherError> {
        if header.len() != HEADER_SIZE || header[0] != FORMAT_VERSION {
            return Err(CipherError::Authentication);
        }
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&header[1..]);
        Ok(Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
            nonce_prefix,
            counter: 0,
            finished: false,
        })
    }

    /// Whether the final chunk has been consumed.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Authenticate and decrypt one chunk body (ciphertext plus tag, without
    /// the length prefix).
    pub fn open_chunk(&mut self, body: &[u8]) -> Result<OpenedChunk, CipherError> {
        if self.finished {
            return Err(CipherError::Finalized);
        }
        if body.len() < TAG_SIZE || body.len() > CHUNK_SIZE + TAG_SIZE {
            return Err(CipherError::Authentication);
        }

        // The empty chunk is the end-of-stream marker; the flag is also
        // bound into the AAD so an attacker cannot forge an early end.
        let is_final = body.len() == TAG_SIZE;

        let nonce_bytes = build_nonce(&self.nonce_prefix, self.counter);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let aad = chunk_aad(self.counter, is_final);

        let (data, tag_bytes) = body.split_at(body.len() - TAG_SIZE);
        let tag = Tag::from_slice(tag_bytes);

        let mut plaintext = data.to_vec();
        self.cipher
            .decrypt_in_place_detached(nonce, &aad, &mut plaintext, tag)
            .map_err(|_| CipherError::Authentication)?;

        self.counter += 1;
        if is_final {
            self.finished = true;
        }
        Ok(OpenedChunk {
            plaintext,
            is_final,
        })
    }
}

/// Compute the plaintext size of an object from its on-disk size.
///
/// Fails when the size cannot correspond to any well-formed stream, which is
/// reported the same way as any other corruption.
pub fn plaintext_len(encrypted_len: u64) -> Result<u64, CipherError> {
    let fixed = (HEADER_SIZE + CHUNK_OVERHEAD) as u64; // header + final empty chunk
    let framed_full = (CHUNK_SIZE + CHUNK_OVERHEAD) as u64;

    let body = encrypted_len
        .checked_sub(fixed)
        .ok_or(CipherError::Authentication)?;

    let full_chunks = body / framed_full;
    let remainder = body % framed_full;
    if remainder == 0 {
        Ok(full_chunks * CHUNK_SIZE as u64)
    } else if remainder <= CHUNK_OVERHEAD as u64 {
        Err(CipherError::Authentication)
    } else {
        Ok(full_chunks * CHUNK_SIZE as u64 + remainder - CHUNK_OVERHEAD as u64)
    }
}

/// Read one framed chunk body from `reader`.
///
/// Any short read is corruption or truncation, reported as an
/// authentication failure; I/O errors pass through separately.
pub async fn read_chunk<R>(reader: &mut R) -> Result<Vec<u8>, ChunkReadError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(short_read_as_auth)?;

    let body_len = u32::from_le_bytes(len_buf) as usize;
    if body_len < TAG_SIZE || body_len > CHUNK_SIZE + TAG_SIZE {
        return Err(ChunkReadError::Cipher(CipherError::Authentication));
    }

    let mut body = vec![0u8; body_len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(short_read_as_auth)?;
    Ok(body)
}

fn short_read_as_auth(err: std::io::Error) -> ChunkReadError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ChunkReadError::Cipher(CipherError::Authentication)
    } else {
        ChunkReadError::Io(err)
    }
}

/// Failure while reading framed chunks from a source.
#[derive(Error, Debug)]
pub enum ChunkReadError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_all(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Vec<u8> {
        let mut encryptor = StreamEncryptor::new(key);
        let mut out = encryptor.header().to_vec();
        for chunk in plaintext.chunks(CHUNK_SIZE) {
            out.extend(encryptor.seal_chunk(chunk, false).unwrap());
        }
        out.extend(encryptor.seal_chunk(&[], true).unwrap());
        out
    }

    fn open_all(key: &[u8; KEY_LEN], encrypted: &[u8]) -> Result<Vec<u8>, CipherError> {
        let (header, mut rest) = encrypted.split_at(HEADER_SIZE);
        let mut decryptor = StreamDecryptor::new(key, header)?;
        let mut out = Vec::new();
        while !decryptor.finished() {
            if rest.len() < 4 {
                return Err(CipherError::Authentication);
            }
            let body_len = u32::from_le_bytes(rest[..4].try_into().unwrap()) as usize;
            if rest.len() < 4 + body_len {
                return Err(CipherError::Authentication);
            }
            let opened = decryptor.open_chunk(&rest[4..4 + body_len])?;
            out.extend(opened.plaintext);
            rest = &rest[4 + body_len..];
        }
        Ok(out)
    }

    #[test]
    fn round_trips_across_chunk_boundaries() {
        let key = [7u8; KEY_LEN];
        for size in [0usize, 1, 100, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let encrypted = seal_all(&key, &plaintext);
            assert_eq!(open_all(&key, &encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn wrong_key_fails_authentication_and_returns_no_data() {
        let encrypted = seal_all(&[1u8; KEY_LEN], b"attack at dawn");
        let result = open_all(&[2u8; KEY_LEN], &encrypted);
        assert!(matches!(result, Err(CipherError::Authentication)));
    }

    #[test]
    fn flipped_ciphertext_bit_fails_authentication() {
        let key = [3u8; KEY_LEN];
        let mut encrypted = seal_all(&key, b"some stored object bytes");
        let mid = HEADER_SIZE + 10;
        encrypted[mid] ^= 0x01;
        assert!(matches!(
            open_all(&key, &encrypted),
            Err(CipherError::Authentication)
        ));
    }

    #[test]
    fn truncation_after_a_chunk_boundary_is_detected() {
        let key = [4u8; KEY_LEN];
        let encrypted = seal_all(&key, &[9u8; 2 * CHUNK_SIZE]);
        // Drop the final empty chunk entirely.
        let truncated = &encrypted[..encrypted.len() - CHUNK_OVERHEAD];
        assert!(matches!(
            open_all(&key, truncated),
            Err(CipherError::Authentication)
        ));
    }

    #[test]
    fn chunks_cannot_be_reordered() {
        let key = [5u8; KEY_LEN];
        let a: Vec<u8> = vec![1u8; CHUNK_SIZE];
        let b: Vec<u8> = vec![2u8; CHUNK_SIZE];

        let mut encryptor = StreamEncryptor::new(&key);
        let header = encryptor.header().to_vec();
        let chunk_a = encryptor.seal_chunk(&a, false).unwrap();
        let chunk_b = encryptor.seal_chunk(&b, false).unwrap();
        let fin = encryptor.seal_chunk(&[], true).unwrap();

        let mut swapped = header;
        swapped.extend(chunk_b);
        swapped.extend(chunk_a);
        swapped.extend(fin);

        assert!(matches!(
            open_all(&key, &swapped),
            Err(CipherError::Authentication)
        ));
    }

    #[test]
    fn nothing_seals_after_the_final_chunk() {
        let mut encryptor = StreamEncryptor::new(&[6u8; KEY_LEN]);
        encryptor.seal_chunk(&[], true).unwrap();
        assert!(matches!(
            encryptor.seal_chunk(b"late", false),
            Err(CipherError::Finalized)
        ));
    }

    #[test]
    fn plaintext_len_inverts_the_framing() {
        let key = [8u8; KEY_LEN];
        for size in [0usize, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 5 * CHUNK_SIZE + 17] {
            let encrypted = seal_all(&key, &vec![0u8; size]);
            assert_eq!(plaintext_len(encrypted.len() as u64).unwrap(), size as u64);
        }
    }

    #[test]
    fn plaintext_len_rejects_impossible_sizes() {
        assert!(plaintext_len(0).is_err());
        assert!(plaintext_len((HEADER_SIZE + CHUNK_OVERHEAD - 1) as u64).is_err());
        // One byte past a bare stream cannot be a valid chunk boundary.
        assert!(plaintext_len((HEADER_SIZE + CHUNK_OVERHEAD + 1) as u64).is_err());
    }

    #[tokio::test]
    async fn read_chunk_reports_truncation_as_authentication() {
        let key = [9u8; KEY_LEN];
        let mut encryptor = StreamEncryptor::new(&key);
        let framed = encryptor.seal_chunk(b"hello", false).unwrap();

        let mut cursor = std::io::Cursor::new(&framed[..framed.len() - 3]);
        let result = read_chunk(&mut cursor).await;
        assert!(matches!(
            result,
            Err(ChunkReadError::Cipher(CipherError::Authentication))
        ));
    }
}
