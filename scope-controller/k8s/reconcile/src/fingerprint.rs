use serde::Serialize;
use sha2::{Digest, Sha256};

/// Number of digest bytes kept. Hex-encoded, this fits comfortably within the
/// 63 character limit on label values.
const DIGEST_LEN: usize = 16;

/// Computes a stable content hash of a resource spec.
///
/// The spec is first converted to a JSON value, whose object keys are kept
/// sorted, so the result does not depend on field declaration order.
pub fn hash_spec<T: Serialize>(spec: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(spec)?;
    let bytes = serde_json::to_vec(&value)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(&digest[..DIGEST_LEN]))
}
