//! Unit tests for the public value types: errors, envelopes, versions and
//! connection state.

use iridium_stomp_core::{
    ConnError, Connection, ConnectionState, Frame, MessageData, ReadError, SUPPORTED_VERSIONS,
    negotiate_version, supported,
};
use std::io;

// =============================================================================
// Protocol versions
// =============================================================================

#[test]
fn supported_reports_known_versions() {
    assert!(supported("1.1"));
    assert!(!supported("9.9"));
    assert_eq!(SUPPORTED_VERSIONS, &["1.0", "1.1", "1.2"]);
}

#[test]
fn every_supported_version_builds() {
    for v in SUPPORTED_VERSIONS {
        let conn = Connection::builder().protocol(*v).build().unwrap();
        assert_eq!(conn.protocol(), *v);
    }
}

#[test]
fn negotiated_version_feeds_the_builder() {
    let v = negotiate_version("1.1,1.2", Some("1.2")).unwrap();
    let conn = Connection::builder().protocol(v).build().unwrap();
    assert_eq!(conn.protocol(), "1.2");
}

// =============================================================================
// ConnError
// =============================================================================

#[tokio::test]
async fn lifecycle_failures_map_to_state_errors() {
    let conn = Connection::builder().build().unwrap();
    conn.shutdown();

    let err = conn.start(futures::sink::drain()).unwrap_err();
    assert!(matches!(
        err,
        ConnError::InvalidState {
            expected: "initializing",
            found: "disconnected"
        }
    ));
    assert!(matches!(
        conn.send_frame(Frame::new("SEND")).await,
        Err(ConnError::NotConnected)
    ));
    assert!(matches!(
        conn.unsubscribe("none").await,
        Err(ConnError::SubscriptionNotFound(id)) if id == "none"
    ));
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
    assert!(boxed.to_string().contains("disconnected"));
}

#[test]
fn conn_error_display() {
    assert!(
        ConnError::UnsupportedVersion("9.9".into())
            .to_string()
            .contains("9.9")
    );
    assert_eq!(ConnError::NotConnected.to_string(), "not connected");
    assert!(
        ConnError::SubscriptionExists("s1".into())
            .to_string()
            .contains("already exists")
    );
    let state = ConnError::InvalidState {
        expected: "initializing",
        found: "disconnected",
    };
    assert!(state.to_string().contains("expected initializing"));
}

#[test]
fn conn_error_is_error_trait() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
    assert_error::<ConnError>();
    assert_error::<ReadError>();
}

// =============================================================================
// ReadError / MessageData
// =============================================================================

#[test]
fn read_error_clones_share_io_error() {
    let e: ReadError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
    let copy = e.clone();
    assert_eq!(e, copy);
    assert!(copy.to_string().contains("reset"));
}

#[test]
fn distinct_io_errors_are_not_equal() {
    let a: ReadError = io::Error::other("x").into();
    let b: ReadError = io::Error::other("x").into();
    assert_ne!(a, b);
}

#[test]
fn message_data_is_tagged() {
    let ok: MessageData = Frame::new("MESSAGE").into();
    let err: MessageData = ReadError::EndOfStream.into();

    assert!(!ok.is_error());
    assert!(ok.frame().is_some());
    assert!(ok.clone().into_result().is_ok());

    assert!(err.is_error());
    assert_eq!(err.error(), Some(&ReadError::EndOfStream));
    assert!(err.into_result().is_err());
}

// =============================================================================
// ConnectionState
// =============================================================================

#[test]
fn state_display() {
    assert_eq!(ConnectionState::Initializing.to_string(), "initializing");
    assert_eq!(ConnectionState::ShuttingDown.to_string(), "shutting-down");
}

#[test]
fn connection_debug_shows_session() {
    let conn = Connection::builder().session("abc").build().unwrap();
    let debug = format!("{:?}", conn);
    assert!(debug.contains("abc"));
    assert!(debug.contains("Initializing"));
}
