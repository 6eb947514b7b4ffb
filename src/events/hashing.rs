use crate::core::Value;
use sha2::{Digest, Sha256};

/// Stable grouping digest over `parts`.
///
/// Parts are scalar-coerced and joined with `|`, then hashed with SHA-256.
/// Returns `None` when every part is blank.
pub fn digest(parts: &[Value]) -> Option<String> {
    if parts.iter().all(Value::is_blank) {
        return None;
    }

    let joined = parts
        .iter()
        .map(Value::to_hash_part)
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}
