//! Fabric state configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Capacities and timing of a [`FabricState`](crate::FabricState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricStateConfig {
    /// Session key table slots.
    pub max_session_keys: usize,
    /// Peers tracked for unencrypted and group-keyed traffic.
    pub max_peer_nodes: usize,
    /// Derived application keys kept in the cache.
    pub max_cached_app_keys: usize,
    /// End node pool shared by all shared sessions.
    pub max_shared_session_end_nodes: usize,
    pub max_end_nodes_per_shared_session: usize,
    /// Period after which the counter sync fresh window slides.
    pub msg_counter_sync_resp_timeout_ms: u64,
    /// Group-key counter values reserved per persisted checkpoint.
    pub group_key_msg_counter_epoch: u32,
    pub local_node_id: u64,
    pub default_subnet: u16,
}

impl Default for FabricStateConfig {
    fn default() -> Self {
        Self {
            max_session_keys: 8,
            max_peer_nodes: 128,
            max_cached_app_keys: 8,
            max_shared_session_end_nodes: 10,
            max_end_nodes_per_shared_session: 10,
            msg_counter_sync_resp_timeout_ms: 2000,
            group_key_msg_counter_epoch: 0x1000,
            local_node_id: 1,
            default_subnet: 1,
        }
    }
}

impl FabricStateConfig {
    /// Parse a JSON configuration; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn msg_counter_sync_resp_timeout(&self) -> Duration {
        Duration::from_millis(self.msg_counter_sync_resp_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = u16::MAX as usize;
        check_capacity("max_session_keys", self.max_session_keys, limit)?;
        check_capacity("max_peer_nodes", self.max_peer_nodes, limit)?;
        check_capacity("max_cached_app_keys", self.max_cached_app_keys, usize::MAX)?;
        check_capacity("max_shared_session_end_nodes", self.max_shared_session_end_nodes, usize::MAX)?;
        check_capacity(
            "max_end_nodes_per_shared_session",
            self.max_end_nodes_per_shared_session,
            self.max_shared_session_end_nodes,
        )?;
        if self.msg_counter_sync_resp_timeout_ms == 0 {
            return Err(invalid("msg_counter_sync_resp_timeout_ms", "must be non-zero"));
        }
        if self.group_key_msg_counter_epoch == 0 {
            return Err(invalid("group_key_msg_counter_epoch", "must be non-zero"));
        }
        Ok(())
    }
}

fn check_capacity(field: &'static str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be non-zero"));
    }
    if value > max {
        return Err(invalid(field, &format!("must be at most {max}")));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.to_string() }
}
