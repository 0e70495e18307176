use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// File extensions longer than this (dot included) are rejected on upload.
pub const EXTENSION_LENGTH_LIMIT: usize = 12;

/// Bytes one tag character occupies once URL-escaped (`%F3%A0%81%90`-style),
/// used to bound the worst-case request path length.
const ESCAPED_TAG_CHAR_LEN: usize = 12;

/// osmium file host server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "osmium", version, about = "Encrypted-at-rest file host")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "OSMIUM_PORT", default_value = "3030")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "OSMIUM_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./osmium.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "OSMIUM_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Public domain used to construct retrieval URLs, e.g. "https://files.example.com"
    #[arg(long, env = "OSMIUM_DOMAIN", default_value = "")]
    pub domain: String,

    /// Always zero-width encode returned upload paths
    #[arg(long, env = "OSMIUM_FORCE_ZERO_WIDTH")]
    pub force_zero_width: bool,

    /// Storage configuration (loaded from [storage] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rate limit configuration (loaded from [rate_limit] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// MIME filter configuration (loaded from [filter] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub filter: FilterConfig,

    /// Security configuration (loaded from [security] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub security: SecurityConfig,

    /// Encryption configuration (loaded from [encryption] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

/// Configuration for the on-disk object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory objects are written to; must exist at boot (default: "files")
    #[serde(default = "default_storage_directory")]
    pub directory: String,

    /// Maximum upload size in bytes (default: 50 MiB)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Length of generated object identifiers (default: 5)
    #[serde(default = "default_id_length")]
    pub id_length: usize,

    /// Identifier collision retry budget (default: 3)
    #[serde(default = "default_collision_attempts")]
    pub collision_check_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
            max_size_bytes: default_max_size_bytes(),
            id_length: default_id_length(),
            collision_check_attempts: default_collision_attempts(),
        }
    }
}

fn default_storage_directory() -> String {
    "files".to_string()
}

fn default_max_size_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_id_length() -> usize {
    5
}

fn default_collision_attempts() -> u32 {
    3
}

/// Request-count and bandwidth admission control thresholds.
///
/// A threshold of 0 (or a zero window) disables that particular limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Fixed window length in milliseconds for request-count limits (default: 1 minute)
    #[serde(default = "default_reset_after_ms")]
    pub reset_after_ms: i64,

    /// Requests allowed per window across all routes (default: 60)
    #[serde(default = "default_global_limit")]
    pub global: i64,

    /// Uploads allowed per window (default: 10)
    #[serde(default = "default_upload_limit")]
    pub upload: i64,

    /// Byte-volume limits (loaded from [rate_limit.bandwidth])
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            reset_after_ms: default_reset_after_ms(),
            global: default_global_limit(),
            upload: default_upload_limit(),
            bandwidth: BandwidthConfig::default(),
        }
    }
}

fn default_reset_after_ms() -> i64 {
    60_000
}

fn default_global_limit() -> i64 {
    60
}

fn default_upload_limit() -> i64 {
    10
}

/// Bandwidth admission thresholds, weighted by bytes transferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    /// Fixed window length in milliseconds for bandwidth limits (default: 5 minutes)
    #[serde(default = "default_bandwidth_reset_after_ms")]
    pub reset_after_ms: i64,

    /// Download bytes allowed per window (default: 500 MiB)
    #[serde(default = "default_bandwidth_download")]
    pub download: i64,

    /// Upload bytes allowed per window (default: 1000 MiB)
    #[serde(default = "default_bandwidth_upload")]
    pub upload: i64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            reset_after_ms: default_bandwidth_reset_after_ms(),
            download: default_bandwidth_download(),
            upload: default_bandwidth_upload(),
        }
    }
}

fn default_bandwidth_reset_after_ms() -> i64 {
    5 * 60_000
}

fn default_bandwidth_download() -> i64 {
    500 * 1024 * 1024
}

fn default_bandwidth_upload() -> i64 {
    1000 * 1024 * 1024
}

/// MIME type filter lists. All comparisons are against the detected
/// (content-sniffed) type, never the caller-declared one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Types rejected outright
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// When non-empty, only these types are accepted
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Types served with a text/plain content type
    #[serde(default)]
    pub sanitize: Vec<String>,
}

/// Upload authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared secret required in the Authorization header to upload.
    /// Empty means anyone may upload (a warning is logged at boot).
    #[serde(default)]
    pub master_key: String,
}

/// Encryption-at-rest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Server-wide, non-secret value mixed into every key derivation.
    /// Changing it invalidates every previously issued key. Required.
    #[serde(default)]
    pub nonce: String,

    /// Length of the random per-upload secret handed back to the uploader (default: 12)
    #[serde(default = "default_key_length")]
    pub key_length: usize,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            nonce: String::new(),
            key_length: default_key_length(),
        }
    }
}

fn default_key_length() -> usize {
    12
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            bind_address: "0.0.0.0".to_string(),
            config: "./osmium.toml".to_string(),
            json_logs: false,
            generate_config: false,
            domain: String::new(),
            force_zero_width: false,
            storage: StorageConfig::default(),
            rate_limit: RateLimitConfig::default(),
            filter: FilterConfig::default(),
            security: SecurityConfig::default(),
            encryption: EncryptionConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (OSMIUM_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("OSMIUM_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Upper bound on a retrieval request's path-and-query length.
    ///
    /// A zero-width link escapes every character to 12 bytes, so the bound is
    /// domain + "/" + id + extension + "?enc_key=" + key, all at escaped width.
    pub fn path_length_limit(&self) -> usize {
        (self.domain.len() + 1)
            + self.storage.id_length * ESCAPED_TAG_CHAR_LEN
            + EXTENSION_LENGTH_LIMIT * ESCAPED_TAG_CHAR_LEN
            + "?enc_key=".len() * ESCAPED_TAG_CHAR_LEN
            + self.encryption.key_length * ESCAPED_TAG_CHAR_LEN
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# osmium file host configuration
# Place this file at ./osmium.toml or specify with --config <path>
# All top-level settings can be overridden via environment variables
# (OSMIUM_PORT, etc.) or CLI flags (--port, etc.)

# Public domain used to build retrieval URLs. Required.
# domain = "https://files.example.com"

# Server port (default: 3030)
# port = 3030

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Always zero-width encode returned upload paths
# force_zero_width = false

# ---- Object Storage ----
# [storage]

# Directory uploaded objects are written to. Must exist before boot.
# directory = "files"

# Maximum upload size in bytes (default: 50 MiB)
# max_size_bytes = 52428800

# Generated identifier length. Collision probability is controlled by
# making this large enough for the expected object count.
# id_length = 5

# How many identifier collisions to tolerate before giving up
# collision_check_attempts = 3

# ---- Admission Control ----
# [rate_limit]

# Fixed window length in milliseconds (default: 60000 = 1 minute)
# reset_after_ms = 60000

# Requests per window across all routes; 0 disables (default: 60)
# global = 60

# Uploads per window; 0 disables (default: 10)
# upload = 10

# [rate_limit.bandwidth]
# reset_after_ms = 300000   # 5 minutes
# download = 524288000      # 500 MiB per window
# upload = 1048576000       # 1000 MiB per window

# ---- MIME Filter ----
# [filter]
# blacklist = []   # detected types rejected outright
# whitelist = []   # when non-empty, only these types pass
# sanitize = []    # types served as text/plain

# ---- Security ----
# [security]
# Shared secret required to upload. Empty allows anonymous uploads.
# master_key = ""

# ---- Encryption ----
# [encryption]
# Server-wide nonce mixed into every derived key. Any string works and it
# does not need to be secret, but changing it invalidates every link ever
# issued. Required.
# nonce = ""

# Length of the random secret generated per upload (default: 12)
# key_length = 12
"#
    .to_string()
}
