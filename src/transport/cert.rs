//! Minimal extraction of the Subject Common Name from a DER-encoded X.509
//! certificate.
//!
//! A full X.509 parser is out of scope for transport glue that exists
//! only to satisfy spec.md §6's "peer certificate common name becomes
//! `common_name`" requirement; this scans for the CN attribute's OID
//! (2.5.4.3, DER-encoded as `06 03 55 04 03`) and reads the following
//! ASN.1 string value directly, which is sufficient for the certificates
//! this broker issues to its own clients.

/// DER encoding of OID 2.5.4.3 (commonName), including its tag and length
/// octets.
const COMMON_NAME_OID: [u8; 5] = [0x06, 0x03, 0x55, 0x04, 0x03];

pub fn common_name_from_der(der: &[u8]) -> Option<String> {
    let oid_at = find_subsequence(der, &COMMON_NAME_OID)?;
    let value_start = oid_at + COMMON_NAME_OID.len();

    // The OID is immediately followed by an ASN.1 string (PrintableString
    // 0x13, UTF8String 0x0c, or a handful of other legacy string tags)
    // whose next byte is a single-byte length (certificates issued with a
    // CN longer than 127 bytes use a multi-byte length we don't need to
    // support here).
    let tag = *der.get(value_start)?;
    if !matches!(tag, 0x0c | 0x13 | 0x14 | 0x16 | 0x1e) {
        return None;
    }
    let len = *der.get(value_start + 1)? as usize;
    let bytes = der.get(value_start + 2..value_start + 2 + len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
