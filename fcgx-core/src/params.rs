//! FastCGI name-value pair encoding for FCGI_PARAMS records.
//!
//! Each pair is encoded into its own self-contained block that always fits a
//! single record. Values that would overflow the record are cut short; names
//! never are.

use crate::error::{Error, Result};
use crate::record::MAX_CONTENT_LEN;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

// Worst-case room taken by the two length fields.
const LEN_FIELDS_RESERVE: usize = 8;

fn put_nv_len(buf: &mut BytesMut, len: usize) {
    if len < 128 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32((len as u32) | 0x8000_0000);
    }
}

fn nv_len_size(len: usize) -> usize {
    if len < 128 {
        1
    } else {
        4
    }
}

/// Encode one name-value pair.
///
/// If `8 + name + value` exceeds the record payload limit the value is
/// truncated to `65535 - 8 - name.len()` bytes.
pub fn encode_pair(name: &[u8], value: &[u8]) -> Result<Bytes> {
    if LEN_FIELDS_RESERVE + name.len() > MAX_CONTENT_LEN {
        return Err(Error::NameTooLong(name.len()));
    }
    let value = if LEN_FIELDS_RESERVE + name.len() + value.len() > MAX_CONTENT_LEN {
        let max = MAX_CONTENT_LEN - LEN_FIELDS_RESERVE - name.len();
        debug!(
            name = %String::from_utf8_lossy(name),
            original_len = value.len(),
            truncated_len = max,
            "truncating FastCGI param value"
        );
        &value[..max]
    } else {
        value
    };

    let mut buf = BytesMut::with_capacity(
        nv_len_size(name.len()) + nv_len_size(value.len()) + name.len() + value.len(),
    );
    put_nv_len(&mut buf, name.len());
    put_nv_len(&mut buf, value.len());
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    Ok(buf.freeze())
}

/// Decode every name-value pair in a PARAMS payload, preserving order.
pub fn decode_pairs(mut data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let name_len = read_nv_len(&mut data)?;
        let value_len = read_nv_len(&mut data)?;
        if data.len() < name_len + value_len {
            return Err(Error::TruncatedPair("pair data shorter than declared"));
        }
        let name = String::from_utf8_lossy(&data[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&data[name_len..name_len + value_len]).into_owned();
        data = &data[name_len + value_len..];
        out.push((name, value));
    }
    Ok(out)
}

fn read_nv_len(data: &mut &[u8]) -> Result<usize> {
    let Some(&first) = data.first() else {
        return Err(Error::TruncatedPair("missing length field"));
    };
    if first < 128 {
        *data = &data[1..];
        return Ok(first as usize);
    }
    if data.len() < 4 {
        return Err(Error::TruncatedPair("truncated 4-byte length field"));
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) & 0x7fff_ffff;
    *data = &data[4..];
    Ok(len as usize)
}
