//! PKCS#7-style padding.
//!
//! Padding is always present: data that already ends on a block boundary gets a whole extra block,
//! so `unpad` never has to guess whether the last byte is data or padding.

use crate::error::{Error, Result};

/// Append `n` bytes of value `n`, where `n` brings `data` up to the next multiple of `block_size`
/// (a full block when it is already aligned).
///
/// # Errors
///
/// `NothingToPad` when `data` is empty or `block_size` is zero, `Shape` when `block_size` is too
/// large for its length to fit in a single pad byte.
pub fn pad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    if data.is_empty() || block_size == 0 {
        return Err(Error::NothingToPad);
    }
    let pad_len = u8::try_from(block_size - data.len() % block_size).map_err(|_| Error::Shape {
        len: data.len(),
        block_size,
    })?;

    let mut padded = Vec::with_capacity(data.len() + usize::from(pad_len));
    padded.extend_from_slice(data);
    padded.resize(data.len() + usize::from(pad_len), pad_len);
    Ok(padded)
}

/// Strip the padding added by [`pad`].
///
/// # Errors
///
/// `PaddingInvalid` unless the last byte `n` satisfies `1 <= n <= block_size` and the final `n`
/// bytes all equal `n`. Nothing is truncated on failure.
pub fn unpad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    let &pad_len = data.last().ok_or(Error::PaddingInvalid)?;
    let pad_len = usize::from(pad_len);

    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::PaddingInvalid);
    }

    let unpadded_len = data.len() - pad_len;
    if !data[unpadded_len..].iter().all(|&b| usize::from(b) == pad_len) {
        return Err(Error::PaddingInvalid);
    }

    Ok(data[..unpadded_len].to_vec())
}
