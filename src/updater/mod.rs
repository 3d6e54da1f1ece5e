use std::cmp::Ordering;

use semver::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    UpToDate,
    /// Upstream is older than what is installed; never downgraded.
    Ahead,
    UpdateAvailable,
}

/// Decide whether `latest` should replace `current`.
///
/// Both sides are normalised first. Equal strings never update. When both
/// parse as semantic versions, only a strictly greater `latest` updates;
/// anything else (commit ids, date tags) updates whenever the strings differ.
pub fn decide(current: Option<&str>, latest: &str) -> UpdateDecision {
    let latest = normalize_version(latest);
    let Some(current) = current.map(normalize_version).filter(|c| !c.is_empty()) else {
        return UpdateDecision::UpdateAvailable;
    };
    if current == latest {
        return UpdateDecision::UpToDate;
    }
    match compare_versions(&latest, &current) {
        Some(Ordering::Greater) => UpdateDecision::UpdateAvailable,
        Some(Ordering::Equal) => UpdateDecision::UpToDate,
        Some(Ordering::Less) => UpdateDecision::Ahead,
        None => UpdateDecision::UpdateAvailable,
    }
}

/// Normalize version string by removing 'v' prefix and cleaning up.
pub fn normalize_version(version: &str) -> String {
    let trimmed = version.trim();
    trimmed
        .strip_prefix(['v', 'V'])
        .unwrap_or(trimmed)
        .to_owned()
}

/// Compare two versions by semver precedence, or `None` if either is not a version.
fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let a = parse_version(a)?;
    let b = parse_version(b)?;
    Some(a.cmp_precedence(&b))
}

/// Lenient semver parse: `1.2` becomes `1.2.0`; strings without a dot are rejected
/// so that numeric commit ids are never mistaken for versions.
fn parse_version(version: &str) -> Option<Version> {
    if !version.contains('.') {
        return None;
    }
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }
    let split_at = version.find(['-', '+']).unwrap_or(version.len());
    let (core, rest) = version.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    let numeric = parts
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if parts.len() >= 3 || !numeric {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    Version::parse(&padded).ok()
}
