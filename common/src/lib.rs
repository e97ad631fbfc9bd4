use std::time::{SystemTime, UNIX_EPOCH};

pub mod args;
pub mod cache;
pub mod metrics;
pub mod shutdown;
pub mod streams;

/// Write a readiness file when `DORCH_READY_FILE` is set.
///
/// Kubernetes probes watch this path; outside a cluster the variable is
/// unset and this is a no-op. Failures are logged and ignored.
pub fn signal_ready() {
    let Ok(path) = std::env::var("DORCH_READY_FILE") else {
        return;
    };
    if path.is_empty() {
        return;
    }
    if let Err(e) = std::fs::write(&path, format!("ready {}\n", unix_now_secs())) {
        tracing::warn!(path = %path, error = %e, "could not write ready file");
    }
}

/// Current wall time as fractional seconds since the Unix epoch.
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs_f64()
}

/// Validate a 40-character lowercase hex SHA-1 digest.
pub fn valid_sha1(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Lowercase and validate a SHA-1, returning the canonical form.
pub fn canonical_sha1(s: &str) -> Option<String> {
    let s = s.trim().to_ascii_lowercase();
    valid_sha1(&s).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_validation() {
        assert!(valid_sha1("0000e0b4993f0b7130fc3b58abf996bbb4acb287"));
        assert!(!valid_sha1("0000E0B4993F0B7130FC3B58ABF996BBB4ACB287"));
        assert!(!valid_sha1("not-a-hash"));
        assert!(!valid_sha1("0000e0b4993f0b7130fc3b58abf996bbb4acb28"));
    }

    #[test]
    fn canonical_sha1_normalizes_case_and_whitespace() {
        assert_eq!(
            canonical_sha1(" 0000E0B4993F0B7130FC3B58ABF996BBB4ACB287 ").as_deref(),
            Some("0000e0b4993f0b7130fc3b58abf996bbb4acb287")
        );
        assert_eq!(canonical_sha1("xyz"), None);
    }
}
