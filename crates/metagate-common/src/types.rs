//! Shared domain types
//!
//! Enumerations and small value types shared by every layer of the
//! metadata plane: versioning state, storage class, server-side
//! encryption scheme, object type and ACL carrier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Minimum size of a non-terminal multipart part (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Version id reported to clients for null-versioned objects.
pub const NULL_VERSION_EXTERNAL: &str = "null";

/// Internal sentinel stored for the null version slot.
pub const NULL_VERSION_INTERNAL: &str = "0";

/// Bucket versioning state. Once `Enabled`, a bucket can only move
/// to `Suspended`, never back to `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VersioningState {
    #[default]
    Disabled,
    Enabled,
    Suspended,
}

impl VersioningState {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Disabled" => Ok(Self::Disabled),
            "Enabled" => Ok(Self::Enabled),
            "Suspended" => Ok(Self::Suspended),
            other => Err(Error::InvalidVersioning(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
        }
    }
}

/// S3 storage class of an object version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StorageClass {
    #[default]
    Standard,
    StandardIa,
    IntelligentTiering,
    OnezoneIa,
    Glacier,
    DeepArchive,
    Rrs,
}

impl StorageClass {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "STANDARD" => Ok(Self::Standard),
            "STANDARD_IA" => Ok(Self::StandardIa),
            "INTELLIGENT_TIERING" => Ok(Self::IntelligentTiering),
            "ONEZONE_IA" => Ok(Self::OnezoneIa),
            "GLACIER" => Ok(Self::Glacier),
            "DEEP_ARCHIVE" => Ok(Self::DeepArchive),
            "REDUCED_REDUNDANCY" => Ok(Self::Rrs),
            other => Err(Error::InvalidStorageClass(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::StandardIa => "STANDARD_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::Glacier => "GLACIER",
            Self::DeepArchive => "DEEP_ARCHIVE",
            Self::Rrs => "REDUCED_REDUNDANCY",
        }
    }

    /// Archival classes require a restore before their bytes can be
    /// read and are skipped by the migration worker.
    #[must_use]
    pub fn is_archival(self) -> bool {
        matches!(self, Self::Glacier | Self::DeepArchive)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side encryption scheme of an object version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SseType {
    #[default]
    None,
    S3,
    Kms,
    Customer,
}

impl SseType {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Self::None),
            "SSE-S3" => Ok(Self::S3),
            "SSE-KMS" => Ok(Self::Kms),
            "SSE-C" => Ok(Self::Customer),
            other => Err(Error::InvalidEncryptionMethod(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::S3 => "SSE-S3",
            Self::Kms => "SSE-KMS",
            Self::Customer => "SSE-C",
        }
    }

    /// Schemes whose data key is sealed and persisted in the row.
    #[must_use]
    pub fn persists_key(self) -> bool {
        matches!(self, Self::S3 | Self::Kms)
    }
}

/// How the object's bytes were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ObjectType {
    #[default]
    Normal,
    Appendable,
    Multipart,
}

/// Owner plus canned ACL string, carried opaquely by the metadata
/// core on behalf of the policy layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Acl {
    pub canned_acl: String,
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioning_parse_roundtrip() {
        for v in [
            VersioningState::Disabled,
            VersioningState::Enabled,
            VersioningState::Suspended,
        ] {
            assert_eq!(VersioningState::parse(v.as_str()).unwrap(), v);
        }
        assert!(VersioningState::parse("enabled").is_err());
    }

    #[test]
    fn test_storage_class_archival() {
        assert!(StorageClass::Glacier.is_archival());
        assert!(StorageClass::DeepArchive.is_archival());
        assert!(!StorageClass::Standard.is_archival());
        assert_eq!(StorageClass::parse("").unwrap(), StorageClass::Standard);
    }

    #[test]
    fn test_sse_type_persists_key() {
        assert!(SseType::S3.persists_key());
        assert!(SseType::Kms.persists_key());
        assert!(!SseType::Customer.persists_key());
        assert!(!SseType::None.persists_key());
    }

    #[test]
    fn test_now_ns_monotonic_enough() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        assert!(a > 1_500_000_000_000_000_000);
    }
}
