//! Registry of named bridges
//!
//! Hosts usually run one bridge per configuration. [`BridgeRegistry`] keeps
//! them keyed by configuration name, creates them on first request, and
//! closes the non-persistent ones when the execution context ends.

use tracing::{debug, info};

use crate::bridge::{ExecutionContext, LuaBridge};
use crate::config::BridgeConfig;
use crate::prelude::{IndexMap, index_map_new};

pub struct BridgeRegistry {
    bridges: IndexMap<String, LuaBridge>,
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeRegistry {
    pub fn new() -> Self {
        BridgeRegistry {
            bridges: index_map_new(),
        }
    }

    /// The bridge for `config.name`, acquired for `context`.
    ///
    /// An existing bridge keeps its original configuration. Returns `None`
    /// when the bridge is disabled.
    pub fn get_or_create(&mut self, config: &BridgeConfig, context: &ExecutionContext) -> Option<LuaBridge> {
        let bridge = self
            .bridges
            .entry(config.name.clone())
            .or_insert_with(|| {
                debug!(bridge = %config.name, "registering bridge");
                LuaBridge::new(config.clone())
            })
            .clone();
        bridge.acquire(context)
    }

    pub fn get(&self, name: &str) -> Option<LuaBridge> {
        self.bridges.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LuaBridge)> {
        self.bridges.iter().map(|(name, bridge)| (name.as_str(), bridge))
    }

    /// Close and forget a bridge.
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.bridges.shift_remove(name) {
            Some(bridge) => {
                bridge.close();
                true
            }
            None => false,
        }
    }

    /// End of an execution context: close and drop every non-persistent
    /// bridge. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.bridges.len();
        self.bridges.retain(|name, bridge| {
            if bridge.is_persistent() {
                return true;
            }
            debug!(bridge = %name, "closing non-persistent bridge");
            bridge.close();
            false
        });
        let removed = before - self.bridges.len();
        if removed > 0 {
            info!(removed, "bridges cleaned up");
        }
        removed
    }

    /// Reset one bridge, clearing a sticky startup failure.
    pub fn reset(&self, name: &str) -> bool {
        match self.bridges.get(name) {
            Some(bridge) => {
                bridge.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}
