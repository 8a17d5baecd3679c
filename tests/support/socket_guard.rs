//! Skips wiremock-backed tests where localhost sockets cannot be bound.

use std::net::TcpListener;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "RANGEDL_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a mock server, or returns `None` (after saying so on stderr) when
/// the sandbox forbids binding. Panics instead if the env var demands
/// socket tests.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return Some(MockServer::start().await);
    }

    let message = "[socket-bound-test] cannot bind a localhost socket";
    assert!(
        !socket_tests_required(),
        "{message}. Unset {REQUIRE_ENV} to allow skipping."
    );
    eprintln!("{message}. Skipping test.");
    None
}
