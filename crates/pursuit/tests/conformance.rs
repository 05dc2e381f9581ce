//! Protocol conformance tests using pursuit-testkit.

use pursuit::decoder::HandshakeStage;

// Happy path

#[test]
fn end_to_end() {
    pursuit_testkit::run_end_to_end();
}

#[test]
fn turn_exclusivity() {
    pursuit_testkit::run_turn_exclusivity();
}

#[test]
fn foreign_writes_are_flagged() {
    pursuit_testkit::run_foreign_writes_are_flagged();
}

#[test]
fn observation_independence() {
    pursuit_testkit::run_observation_independence();
}

#[test]
fn shape_derivation() {
    pursuit_testkit::run_shape_derivation();
}

#[test]
fn launcher_arguments() {
    pursuit_testkit::run_launcher_arguments();
}

// Server failures

#[test]
fn silent_crash_detection() {
    pursuit_testkit::run_silent_crash_detection();
}

#[test]
fn turn_timeout_bound() {
    pursuit_testkit::run_turn_timeout_bound();
}

#[test]
fn declared_server_error() {
    pursuit_testkit::run_declared_server_error();
}

#[test]
fn handshake_stall_at_server_info() {
    pursuit_testkit::run_handshake_stall(HandshakeStage::ServerInfo);
}

#[test]
fn handshake_stall_at_attach() {
    pursuit_testkit::run_handshake_stall(HandshakeStage::Attach);
}

#[test]
fn invalid_server_info() {
    pursuit_testkit::run_invalid_server_info();
}

#[test]
fn launch_failure() {
    pursuit_testkit::run_launch_failure();
}

// Lifecycle

#[test]
fn cleanup_idempotence() {
    pursuit_testkit::run_cleanup_idempotence();
}

#[test]
fn misuse_is_local() {
    pursuit_testkit::run_misuse_is_local();
}
