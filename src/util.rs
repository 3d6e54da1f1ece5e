use sha2::{Digest, Sha256};

/// Hex-encoded sha256 of an in-memory buffer.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Abbreviated commit id used as the version of commit-tracked components.
#[must_use]
pub fn short_sha(sha: &str) -> String {
    sha.trim().chars().take(8).collect()
}

/// Turn an asset file name into a title, e.g. `fold-entity-row.js` -> `Fold Entity Row`.
#[must_use]
pub fn display_name(file: &str) -> String {
    let base = file.rsplit('/').next().unwrap_or(file);
    let stem = base.strip_suffix(".js").unwrap_or(base);
    stem.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
