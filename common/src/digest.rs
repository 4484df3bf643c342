use data_encoding::BASE32;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Formats a SHA-256 digest the way datapackage resources and CDXJ entries
/// carry it: `sha256:` followed by lowercase hex.
pub fn sha256_as_string(hash: &[u8; 32]) -> String {
    let mut out = vec![b'0'; 71]; // 'sha256:' + 64 hex chars
    out[0..7].copy_from_slice(b"sha256:");
    faster_hex::hex_encode(&hash[..], &mut out[7..]).expect("output buffer sized for sha256");

    String::from_utf8(out).expect("hex output is ascii")
}

pub fn sha256_of(bytes: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(bytes).into();
    sha256_as_string(&digest)
}

/// `sha1:` + base32, the classic WARC payload digest encoding.
pub fn sha1_base32_of(bytes: &[u8]) -> String {
    let digest = Sha1::digest(bytes);
    format!("sha1:{}", BASE32.encode(&digest))
}
