//! Row value codec
//!
//! Rows are MessagePack maps keyed by field name, so adding a field
//! with a serde default stays readable against old rows. Decode
//! failures are corruption: they are surfaced, never auto-healed.

use serde::Serialize;
use serde::de::DeserializeOwned;

use metagate_common::{Error, Result};

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| Error::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::corruption(format!("row decode: {e}")))
}
