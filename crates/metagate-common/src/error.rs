//! Error types for Metagate
//!
//! This module defines the common error type used throughout the
//! metadata plane, with mappings to S3 error codes and HTTP status
//! codes for the gateway layer.

use thiserror::Error;

/// Common result type for Metagate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Metagate
#[derive(Debug, Error)]
pub enum Error {
    // Input errors
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("no such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("no such version: {bucket}/{key}@{version}")]
    NoSuchVersion {
        bucket: String,
        key: String,
        version: String,
    },

    #[error("no such upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("invalid versioning state: {0}")]
    InvalidVersioning(String),

    #[error("invalid storage class: {0}")]
    InvalidStorageClass(String),

    #[error("invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("part {part_number} too small: {size} bytes, minimum {min}")]
    PartTooSmall {
        part_number: u32,
        size: u64,
        min: u64,
    },

    #[error("invalid part: {part_number}")]
    InvalidPart { part_number: u32 },

    #[error("invalid part order")]
    InvalidPartOrder,

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("entity too large: max {max_size} bytes")]
    EntityTooLarge { max_size: u64 },

    // SSE input errors
    #[error("invalid customer algorithm")]
    InvalidCustomerAlgorithm,

    #[error("missing customer key")]
    MissingCustomerKey,

    #[error("invalid customer key")]
    InvalidCustomerKey,

    #[error("customer key MD5 mismatch")]
    CustomerKeyMd5Mismatch,

    #[error("incompatible encryption method")]
    IncompatibleEncryptionMethod,

    #[error("invalid encryption method: {0}")]
    InvalidEncryptionMethod(String),

    // Auth errors
    #[error("secret key mismatch")]
    SecretKeyMismatch,

    #[error("access denied")]
    AccessDenied,

    // Crypto errors
    #[error("out of entropy")]
    OutOfEntropy,

    #[error("sealed key invalid: {0}")]
    SealedKeyInvalid(String),

    #[error("object row is missing its internal IV")]
    MissingInternalIv,

    #[error("invalid internal seal algorithm: {0}")]
    InvalidInternalSealAlgorithm(String),

    // QoS errors
    #[error("QoS misconfigured: {0}")]
    QosMisconfigured(String),

    // Transient errors
    #[error("request timeout")]
    Timeout,

    #[error("transaction conflict")]
    Conflict,

    #[error("lock not obtained: {0}")]
    LockNotObtained(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    // Store and backend errors
    #[error("kv store error: {0}")]
    Kv(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("kms error: {0}")]
    Kms(String),

    // Corruption: invalid row encoding or inconsistent key format.
    // Logged and surfaced, never auto-healed.
    #[error("metadata corruption: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a no-such-key error
    pub fn no_such_key(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NoSuchKey {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a kv store error
    pub fn kv(msg: impl Into<String>) -> Self {
        Self::Kv(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Conflict | Self::LockNotObtained(_) | Self::Unavailable(_)
        )
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchBucket(_)
                | Self::NoSuchKey { .. }
                | Self::NoSuchVersion { .. }
                | Self::NoSuchUpload { .. }
        )
    }

    /// Get HTTP status code for S3 API compatibility
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidVersioning(_)
            | Self::InvalidStorageClass(_)
            | Self::InvalidStatus(_)
            | Self::PartTooSmall { .. }
            | Self::InvalidPart { .. }
            | Self::InvalidPartOrder
            | Self::InvalidUploadId(_)
            | Self::InvalidCustomerAlgorithm
            | Self::MissingCustomerKey
            | Self::InvalidCustomerKey
            | Self::CustomerKeyMd5Mismatch
            | Self::IncompatibleEncryptionMethod
            | Self::InvalidEncryptionMethod(_)
            | Self::QosMisconfigured(_) => 400,

            // 403 Forbidden
            Self::AccessDenied | Self::SecretKeyMismatch => 403,

            // 404 Not Found
            Self::NoSuchBucket(_)
            | Self::NoSuchKey { .. }
            | Self::NoSuchVersion { .. }
            | Self::NoSuchUpload { .. } => 404,

            // 409 Conflict
            Self::BucketAlreadyExists(_) | Self::BucketNotEmpty(_) => 409,

            // 413 Payload Too Large
            Self::EntityTooLarge { .. } => 413,

            // 500 Internal Server Error
            Self::OutOfEntropy
            | Self::SealedKeyInvalid(_)
            | Self::MissingInternalIv
            | Self::InvalidInternalSealAlgorithm(_)
            | Self::Kv(_)
            | Self::Backend(_)
            | Self::Cache(_)
            | Self::Kms(_)
            | Self::Corruption(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Configuration(_) => 500,

            // 503 Service Unavailable
            Self::Timeout | Self::Conflict | Self::LockNotObtained(_) | Self::Unavailable(_) => 503,
        }
    }

    /// Get S3 error code for API compatibility
    #[must_use]
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::NoSuchVersion { .. } => "NoSuchVersion",
            Self::NoSuchUpload { .. } | Self::InvalidUploadId(_) => "NoSuchUpload",
            Self::InvalidVersioning(_) => "IllegalVersioningConfigurationException",
            Self::InvalidStorageClass(_) => "InvalidStorageClass",
            Self::PartTooSmall { .. } => "EntityTooSmall",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::EntityTooLarge { .. } => "EntityTooLarge",
            Self::InvalidCustomerAlgorithm => "InvalidEncryptionAlgorithmError",
            Self::MissingCustomerKey | Self::InvalidCustomerKey | Self::CustomerKeyMd5Mismatch => {
                "InvalidArgument"
            }
            Self::IncompatibleEncryptionMethod | Self::InvalidEncryptionMethod(_) => {
                "InvalidEncryptionMethod"
            }
            Self::QosMisconfigured(_) | Self::InvalidStatus(_) => "InvalidArgument",
            Self::AccessDenied => "AccessDenied",
            Self::SecretKeyMismatch => "SignatureDoesNotMatch",
            Self::Timeout | Self::Conflict | Self::LockNotObtained(_) | Self::Unavailable(_) => {
                "ServiceUnavailable"
            }
            _ => "InternalError",
        }
    }
}
