//! XXTEA block cipher over byte strings
//!
//! Used only to make upload ids and version ids opaque to clients;
//! it carries no confidentiality requirement. Operates on u32 words
//! in little-endian order with the original byte length stored in the
//! trailing word.

use metagate_common::{Error, Result};

const DELTA: u32 = 0x9E37_79B9;

fn mx(sum: u32, y: u32, z: u32, p: usize, e: u32, key: &[u32; 4]) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(key[(p & 3) ^ e as usize] ^ z))
}

fn key_words(key: &[u8]) -> [u32; 4] {
    let mut padded = [0u8; 16];
    let n = key.len().min(16);
    padded[..n].copy_from_slice(&key[..n]);
    let mut words = [0u32; 4];
    for (i, w) in words.iter_mut().enumerate() {
        *w = u32::from_le_bytes([
            padded[i * 4],
            padded[i * 4 + 1],
            padded[i * 4 + 2],
            padded[i * 4 + 3],
        ]);
    }
    words
}

fn to_words(data: &[u8]) -> Vec<u32> {
    let n = data.len().div_ceil(4);
    let mut words = vec![0u32; n + 1];
    for (i, b) in data.iter().enumerate() {
        words[i / 4] |= u32::from(*b) << ((i % 4) * 8);
    }
    words[n] = u32::try_from(data.len()).unwrap_or(u32::MAX);
    words
}

fn from_words(words: &[u32]) -> Result<Vec<u8>> {
    let Some((&len_word, data_words)) = words.split_last() else {
        return Err(Error::Corruption("empty xxtea block".to_string()));
    };
    let len = len_word as usize;
    if len > data_words.len() * 4 || (len + 3) / 4 != data_words.len() {
        return Err(Error::Corruption("xxtea length word mismatch".to_string()));
    }
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push((words[i / 4] >> ((i % 4) * 8)) as u8);
    }
    Ok(out)
}

fn encrypt_words(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = 6 + 52 / n;
    let mut sum: u32 = 0;
    let mut z = v[n - 1];
    for _ in 0..rounds {
        sum = sum.wrapping_add(DELTA);
        let e = (sum >> 2) & 3;
        for p in 0..n - 1 {
            let y = v[p + 1];
            v[p] = v[p].wrapping_add(mx(sum, y, z, p, e, key));
            z = v[p];
        }
        let y = v[0];
        v[n - 1] = v[n - 1].wrapping_add(mx(sum, y, z, n - 1, e, key));
        z = v[n - 1];
    }
}

fn decrypt_words(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = 6 + 52 / n;
    let mut sum = (rounds as u32).wrapping_mul(DELTA);
    let mut y = v[0];
    while sum != 0 {
        let e = (sum >> 2) & 3;
        for p in (1..n).rev() {
            let z = v[p - 1];
            v[p] = v[p].wrapping_sub(mx(sum, y, z, p, e, key));
            y = v[p];
        }
        let z = v[n - 1];
        v[0] = v[0].wrapping_sub(mx(sum, y, z, 0, e, key));
        y = v[0];
        sum = sum.wrapping_sub(DELTA);
    }
}

/// Encrypts `data` under `key`, returning the word-aligned
/// ciphertext bytes.
#[must_use]
pub fn encrypt(data: &[u8], key: &[u8]) -> Vec<u8> {
    let k = key_words(key);
    let mut words = to_words(data);
    encrypt_words(&mut words, &k);
    let mut out = Vec::with_capacity(words.len() * 4);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

/// Inverts [`encrypt`]. Fails if the input is not word-aligned or the
/// embedded length does not match.
pub fn decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return Err(Error::Corruption(format!(
            "xxtea ciphertext length {}",
            data.len()
        )));
    }
    let k = key_words(key);
    let mut words: Vec<u32> = data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    decrypt_words(&mut words, &k);
    from_words(&words)
}
