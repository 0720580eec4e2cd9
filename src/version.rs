//! STOMP protocol versions understood by this crate.

use crate::error::ConnError;

/// Supported protocol versions, oldest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1", "1.2"];

/// Version assumed when a broker omits the `version` header in CONNECTED.
pub const DEFAULT_VERSION: &str = "1.0";

/// Check whether a particular STOMP version is supported.
///
/// Callers can use this to validate a desired version before connecting;
/// treating `false` as a setup error is up to them.
pub fn supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Settle the protocol version for a session.
///
/// Parameters
/// - `accept_version`: the client's `accept-version` header value
///   (for example "1.0,1.1,1.2").
/// - `server_version`: the `version` header from the broker's CONNECTED
///   frame, or `None` when the broker did not send one.
///
/// Returns the negotiated version. The broker's choice must be one this
/// crate supports and one the client offered.
pub fn negotiate_version(
    accept_version: &str,
    server_version: Option<&str>,
) -> Result<&'static str, ConnError> {
    let server = server_version.map(str::trim).unwrap_or(DEFAULT_VERSION);
    let offered = accept_version.split(',').any(|v| v.trim() == server);
    match SUPPORTED_VERSIONS.iter().copied().find(|v| *v == server) {
        Some(v) if offered => Ok(v),
        _ => Err(ConnError::UnsupportedVersion(server.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_versions() {
        assert!(supported("1.0"));
        assert!(supported("1.1"));
        assert!(supported("1.2"));
    }

    #[test]
    fn unsupported_versions() {
        assert!(!supported("9.9"));
        assert!(!supported(""));
        assert!(!supported(" 1.1"));
    }

    #[test]
    fn negotiate_picks_server_version() {
        assert_eq!(negotiate_version("1.0,1.1,1.2", Some("1.1")).unwrap(), "1.1");
    }

    #[test]
    fn negotiate_missing_header_means_1_0() {
        assert_eq!(negotiate_version("1.0,1.2", None).unwrap(), "1.0");
    }

    #[test]
    fn negotiate_rejects_version_not_offered() {
        let err = negotiate_version("1.2", Some("1.1")).unwrap_err();
        assert!(matches!(err, ConnError::UnsupportedVersion(v) if v == "1.1"));
    }

    #[test]
    fn negotiate_rejects_unknown_version() {
        assert!(negotiate_version("1.2,2.0", Some("2.0")).is_err());
    }
}
