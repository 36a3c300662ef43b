//! Process environment resolution: where the master lives and what address
//! this node advertises.

use tracing::debug;

/// Master URI used when `ROS_MASTER_URI` is unset.
pub const DEFAULT_MASTER_URI: &str = "http://127.0.0.1:11311/";

/// Registry address: `ROS_MASTER_URI`, or the conventional local default.
pub fn master_uri() -> String {
    std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| DEFAULT_MASTER_URI.to_string())
}

/// Address this node advertises to the registry and to peers.
///
/// `ROS_HOSTNAME` wins, then `ROS_IP`, then the machine's routable local
/// address, then loopback.
pub fn hostname() -> String {
    if let Ok(host) = std::env::var("ROS_HOSTNAME") {
        return host;
    }
    if let Ok(ip) = std::env::var("ROS_IP") {
        return ip;
    }
    match local_ip_address::local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            debug!(error = %e, "no routable local address, advertising loopback");
            "127.0.0.1".to_string()
        }
    }
}
