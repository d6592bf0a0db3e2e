use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Per-form multipart limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormLimits {
    /// Maximum number of non-file fields
    pub max_fields: usize,

    /// Maximum size of a single field value in bytes
    pub max_field_size: usize,

    /// Maximum number of file parts
    pub max_files: usize,

    /// Maximum size of a single file in bytes
    pub max_file_size: u64,
}

impl Default for FormLimits {
    fn default() -> Self {
        Self {
            max_fields: 20,
            max_field_size: 5 * 1024 * 1024, // 5 MB
            max_files: 50,
            max_file_size: 100 * 1024 * 1024, // 100 MB
        }
    }
}

/// Ingest configuration for form uploads
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root directory that list and item directories are created under (default: "./uploads")
    pub storage_root: PathBuf,

    /// Limits applied when a schema does not declare its own
    pub limits: FormLimits,

    /// Chunks buffered per fan-out branch before the reader waits (default: 16)
    pub fanout_queue_depth: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./uploads"),
            limits: FormLimits::default(),
            fanout_queue_depth: 16,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.storage_root),

            limits: FormLimits {
                max_fields: env::var("MAX_FIELDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.limits.max_fields),

                max_field_size: env::var("MAX_FIELD_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.limits.max_field_size),

                max_files: env::var("MAX_FILES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.limits.max_files),

                max_file_size: env::var("MAX_FILE_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.limits.max_file_size),
            },

            fanout_queue_depth: env::var("FANOUT_QUEUE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|depth: &usize| *depth > 0)
                .unwrap_or(default.fanout_queue_depth),
        }
    }

    /// Create config for development (local directory, relaxed limits)
    pub fn development() -> Self {
        Self {
            storage_root: PathBuf::from("./uploads"),
            limits: FormLimits {
                max_fields: 100,
                max_field_size: 10 * 1024 * 1024,
                max_files: 100,
                max_file_size: 256 * 1024 * 1024,
            },
            fanout_queue_depth: 16,
        }
    }

    /// Create config for production (strict limits)
    pub fn production() -> Self {
        Self {
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/media-ingest")),
            limits: FormLimits::default(),
            fanout_queue_depth: 8,
        }
    }

    /// Upper bound for a whole request body under these limits
    pub fn body_limit(&self) -> usize {
        let files = (self.limits.max_file_size as usize).saturating_mul(self.limits.max_files);
        let fields = self.limits.max_field_size.saturating_mul(self.limits.max_fields);
        // 10MB buffer for multipart overhead
        files.saturating_add(fields).saturating_add(10 * 1024 * 1024)
    }
}

static ENCODER_CONFIG: OnceLock<EncoderConfig> = OnceLock::new();

/// Process-wide transcoder tuning, installed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Maximum bytes the decoder may allocate for one image (default: 256 MB)
    pub max_decode_alloc: u64,

    /// Maximum accepted width or height of a source image (default: 16384)
    pub max_dimension: u32,

    /// Files that may be buffered and encoded at once (default: 4)
    pub max_concurrent_encodes: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_decode_alloc: 256 * 1024 * 1024,
            max_dimension: 16_384,
            max_concurrent_encodes: 4,
        }
    }
}

impl EncoderConfig {
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_decode_alloc: env::var("ENCODER_MAX_ALLOC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_decode_alloc),

            max_dimension: env::var("ENCODER_MAX_DIMENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_dimension),

            max_concurrent_encodes: env::var("ENCODER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.max_concurrent_encodes),
        }
    }

    /// Installs the process-wide configuration. Returns false if one was already set.
    pub fn install(self) -> bool {
        ENCODER_CONFIG.set(self).is_ok()
    }

    /// The installed configuration, or the defaults if nothing was installed.
    pub fn current() -> &'static EncoderConfig {
        ENCODER_CONFIG.get_or_init(EncoderConfig::default)
    }
}
