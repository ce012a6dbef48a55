//! Mock types for testing.

pub mod client;
pub mod serial;

use std::env;
use std::net::SocketAddr;

/// Returns the listening address to use for control panel tests. The port is controllable with the
/// `ROBOT_BRIDGE_TEST_PORT` environment variable, and `offset` is added to it so that tests running
/// in parallel do not collide.
pub fn get_bridge_test_addr(offset: u16) -> SocketAddr {
    let port: u16 = if let Ok(Ok(p)) = env::var("ROBOT_BRIDGE_TEST_PORT").map(|s| s.parse()) {
        p
    } else {
        18080
    };

    format!("127.0.0.1:{}", port + offset).parse().unwrap()
}
