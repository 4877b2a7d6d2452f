// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Extended-attribute blob handling. A value carrying the XATTR datatype
//! bit is laid out as:
//!
//! ```text
//! [ u32 BE: xattr section length ][ xattr section ][ document body ]
//! ```
//!
//! The xattr section itself is a sequence of length-prefixed
//! `key\0value\0` pairs, but the store pipeline treats it as opaque: it
//! only needs to carve the section off an existing document and splice
//! it in front of a new body.

/// Split a value into its xattr section and document body. Values
/// without the XATTR datatype bit have no section.
pub fn split(datatype: u8, value: &[u8]) -> (&[u8], &[u8]) {
    if datatype & seqstore::datatype::XATTR == 0 {
        return (&[], value);
    }
    match section_len(value) {
        Some(len) => (&value[4..4 + len], &value[4 + len..]),
        None => (&[], value),
    }
}

/// Build a value that carries `xattrs` in front of `body`. An empty
/// xattr section yields the bare body.
pub fn splice(xattrs: &[u8], body: &[u8]) -> Vec<u8> {
    if xattrs.is_empty() {
        return body.to_vec();
    }
    let mut out = Vec::with_capacity(4 + xattrs.len() + body.len());
    out.extend_from_slice(&(xattrs.len() as u32).to_be_bytes());
    out.extend_from_slice(xattrs);
    out.extend_from_slice(body);
    out
}

/// Whether a value claiming the XATTR bit is structurally sound enough
/// to carve up.
pub fn validate(datatype: u8, value: &[u8]) -> bool {
    if datatype & seqstore::datatype::XATTR == 0 {
        return true;
    }
    section_len(value).is_some()
}

fn section_len(value: &[u8]) -> Option<usize> {
    if value.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([value[0], value[1], value[2], value[3]]) as usize;
    if 4 + len > value.len() {
        return None;
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqstore::datatype;

    #[test]
    fn split_and_splice_round_trip() {
        let xattrs = b"{\"meta\":{\"owner\":\"x\"}}";
        let body = b"document-body";
        let value = splice(xattrs, body);
        assert!(validate(datatype::XATTR, &value));

        let (x, b) = split(datatype::XATTR, &value);
        assert_eq!(x, xattrs);
        assert_eq!(b, body);
    }

    #[test]
    fn raw_value_has_no_section() {
        let (x, b) = split(datatype::RAW, b"body");
        assert!(x.is_empty());
        assert_eq!(b, b"body");
    }

    #[test]
    fn truncated_section_is_invalid() {
        let mut value = splice(b"0123456789", b"");
        value.truncate(6);
        assert!(!validate(datatype::XATTR, &value));
    }
}
