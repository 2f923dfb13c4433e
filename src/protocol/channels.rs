//! Channel names and liveness keys.
//!
//! Names are part of the wire contract; agents reference each other only by
//! name and resolve channels through these pure functions.

/// Fan-out channel consumed by every gateway.
pub const FRONTEND_BROADCAST: &str = "frontend_broadcast";

/// Readiness monitor publications, also used as the snapshot key.
pub const SYSTEM_STATUS: &str = "system_status";

/// Tool execution requests.
pub const TOOL_REQUESTS: &str = "tool_requests";

/// Undecodable or invalid payload diagnostics.
pub const DEAD_LETTER: &str = "dead_letter";

/// Inbound channel for a named agent.
pub fn agent_channel(agent: &str) -> String {
    format!("{agent}_channel")
}

/// Liveness key for a named agent.
pub fn heartbeat_key(agent: &str) -> String {
    format!("{agent}_heartbeat")
}

/// Prefix for scanning all liveness keys.
pub const HEARTBEAT_SUFFIX: &str = "_heartbeat";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(agent_channel("moderator"), "moderator_channel");
        assert_eq!(heartbeat_key("worker_a"), "worker_a_heartbeat");
    }
}
