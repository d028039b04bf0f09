//! Content fingerprints over a canonical JSON rendering
//!
//! Object keys are written in sorted order regardless of how the map that
//! produced them iterates, so semantically equal inputs hash identically.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintAlgorithm {
    #[default]
    Sha256,
    /// Non-cryptographic 64-bit FNV-1a, for targets without a usable SHA-256
    Fnv1a,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl FingerprintAlgorithm {
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            FingerprintAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            FingerprintAlgorithm::Fnv1a => {
                let hash = bytes
                    .iter()
                    .fold(FNV_OFFSET, |acc, b| (acc ^ u64::from(*b)).wrapping_mul(FNV_PRIME));
                format!("{:016x}", hash)
            }
        }
    }

    /// Hash any serialisable value through its canonical form
    pub fn fingerprint<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<String> {
        Ok(self.digest(canonical_json(value)?.as_bytes()))
    }
}

/// Render `value` as JSON with recursively sorted object keys. Fails for
/// values JSON cannot represent, such as maps with non-string keys.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serialising a str cannot fail
    out.push_str(&Value::String(s.to_string()).to_string());
}
