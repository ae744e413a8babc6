//! Upload-id and version-id codecs
//!
//! Both ids are reversible encodings of a nanosecond timestamp:
//! stable across restarts, opaque enough that clients cannot
//! fabricate them. Null-versioned objects never pass through this
//! codec; they report the literal `"null"` to clients.

use metagate_common::{Error, Result};

use crate::xxtea;

/// Process-wide id obfuscation key. Not a secret.
const ID_KEY: &[u8] = b"hehehehe";

/// Encodes a multipart upload's `initial_time_ns` as a client-visible
/// upload id.
#[must_use]
pub fn encode_upload_id(initial_time_ns: u64) -> String {
    hex::encode(xxtea::encrypt(initial_time_ns.to_string().as_bytes(), ID_KEY))
}

/// Recovers `initial_time_ns` from a client-supplied upload id.
pub fn decode_upload_id(upload_id: &str) -> Result<u64> {
    let raw = hex::decode(upload_id)
        .map_err(|_| Error::InvalidUploadId(upload_id.to_string()))?;
    let plain =
        xxtea::decrypt(&raw, ID_KEY).map_err(|_| Error::InvalidUploadId(upload_id.to_string()))?;
    let text =
        String::from_utf8(plain).map_err(|_| Error::InvalidUploadId(upload_id.to_string()))?;
    text.parse()
        .map_err(|_| Error::InvalidUploadId(upload_id.to_string()))
}

/// Encodes an object's `create_time_ns` as a client-visible version
/// id. The encoded value is the reversed timestamp so that version
/// ids sort the same way the key codec does.
#[must_use]
pub fn encode_version_id(create_time_ns: u64) -> String {
    let reversed = u64::MAX - create_time_ns;
    hex::encode(xxtea::encrypt(reversed.to_string().as_bytes(), ID_KEY))
}

/// Recovers `create_time_ns` from a client-supplied version id.
pub fn decode_version_id(version_id: &str) -> Result<u64> {
    let raw = hex::decode(version_id).map_err(|_| Error::Corruption(format!(
        "version id not hex: {version_id}"
    )))?;
    let plain = xxtea::decrypt(&raw, ID_KEY)
        .map_err(|_| Error::Corruption(format!("version id undecodable: {version_id}")))?;
    let text = String::from_utf8(plain)
        .map_err(|_| Error::Corruption(format!("version id not utf8: {version_id}")))?;
    let reversed: u64 = text
        .parse()
        .map_err(|_| Error::Corruption(format!("version id not numeric: {version_id}")))?;
    Ok(u64::MAX - reversed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metagate_common::now_ns;

    #[test]
    fn test_upload_id_roundtrip() {
        let ts = now_ns();
        let id = encode_upload_id(ts);
        assert!(!id.is_empty());
        assert_eq!(decode_upload_id(&id).unwrap(), ts);
    }

    #[test]
    fn test_upload_id_rejects_fabricated() {
        assert!(decode_upload_id("not-hex!").is_err());
        assert!(decode_upload_id("deadbeef").is_err());
    }

    #[test]
    fn test_version_id_roundtrip() {
        let ts = now_ns();
        let id = encode_version_id(ts);
        assert_eq!(decode_version_id(&id).unwrap(), ts);
    }

    #[test]
    fn test_version_id_stable() {
        assert_eq!(encode_version_id(12345), encode_version_id(12345));
        assert_ne!(encode_version_id(12345), encode_version_id(12346));
    }
}
