//! Server configuration
//!
//! Configuration is loaded from environment variables. See `.env.example` for documentation.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::render::RenderCacheConfig;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Maximum request body size in bytes (image uploads, mask batches)
    pub max_upload_size: usize,
    /// Allow any origin in CORS responses
    pub cors_allow_any: bool,

    pub storage: StorageConfig,
    pub segmentation: SegmentationConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    /// One JSON document per image under `data_dir`
    File,
    /// Nothing survives a restart
    Memory,
}

impl StorageBackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "file" => Some(Self::File),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub data_dir: PathBuf,
}

/// External segmentation service configuration
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Service endpoint; generation is disabled when unset
    pub url: Option<String>,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Upper bound on one segmentation call
    pub timeout: Duration,
}

/// Render cache configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub cache_max_bytes: u64,
    pub cache_ttl: Duration,
    pub cache_tti: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_size: 50 * 1024 * 1024, // 50 MB
            cors_allow_any: true,
            storage: StorageConfig::default(),
            segmentation: SegmentationConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::File,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout: Duration::from_secs(150),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        let cache = RenderCacheConfig::default();
        Self {
            cache_max_bytes: cache.max_size_bytes,
            cache_ttl: cache.ttl,
            cache_tti: cache.tti,
        }
    }
}

impl RenderConfig {
    pub fn cache_config(&self) -> RenderCacheConfig {
        RenderCacheConfig {
            max_size_bytes: self.cache_max_bytes,
            ttl: self.cache_ttl,
            tti: self.cache_tti,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to
    /// defaults for missing or unparseable values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Server config
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Some(val) = lookup("MAX_UPLOAD_MB")
            && let Ok(mb) = val.parse::<usize>()
        {
            config.max_upload_size = mb * 1024 * 1024;
        }
        if let Some(val) = lookup("CORS_ALLOW_ANY") {
            config.cors_allow_any = val.to_lowercase() == "true" || val == "1";
        }

        // Storage config
        if let Some(val) = lookup("STORAGE_BACKEND")
            && let Some(kind) = StorageBackendKind::parse(&val)
        {
            config.storage.backend = kind;
        }
        if let Some(dir) = lookup("DATA_DIR")
            && !dir.is_empty()
        {
            config.storage.data_dir = PathBuf::from(dir);
        }

        // Segmentation config
        if let Some(url) = lookup("SAM_API_URL")
            && !url.is_empty()
        {
            config.segmentation.url = Some(url);
        }
        if let Some(token) = lookup("SAM_API_TOKEN")
            && !token.is_empty()
        {
            config.segmentation.token = Some(token);
        }
        if let Some(val) = lookup("SAM_API_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.segmentation.timeout = Duration::from_secs(secs);
        }

        // Render config
        if let Some(val) = lookup("RENDER_CACHE_MAX_MB")
            && let Ok(mb) = val.parse::<u64>()
        {
            config.render.cache_max_bytes = mb * 1024 * 1024;
        }

        config
    }
}
