//! Reference registry
//!
//! Keeps interpreter-side values (tables, closures, coroutines) alive while the
//! host holds a [`ScriptRef`](crate::ScriptRef) to them. Each live reference
//! owns exactly one slot; aliasing a value allocates a second, independent
//! slot so either copy can be released without invalidating the other.

use mlua::{Lua, RegistryKey};

use crate::error::{BridgeError, Result};

/// Handle to one registry slot.
///
/// `generation` changes every time a slot is recycled and `epoch` changes
/// every time the registry is cleared, so a handle that outlived its slot
/// never resolves to somebody else's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefHandle {
    pub index: u32,
    pub generation: u32,
    pub epoch: u32,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    key: Option<RegistryKey>,
}

/// Slab of interpreter registry keys with generational handles.
#[derive(Default)]
pub struct ReferenceRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    epoch: u32,
    live: usize,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Anchor `value` in the interpreter registry and return its handle.
    pub fn insert(&mut self, lua: &Lua, value: mlua::Value) -> Result<RefHandle> {
        let key = lua.create_registry_value(value)?;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                u32::try_from(self.slots.len() - 1)
                    .map_err(|_| BridgeError::runtime("reference registry exhausted"))?
            }
        };
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(BridgeError::Closed)?;
        slot.key = Some(key);
        self.live += 1;
        Ok(RefHandle {
            index,
            generation: slot.generation,
            epoch: self.epoch,
        })
    }

    fn key(&self, handle: RefHandle) -> Option<&RegistryKey> {
        if handle.epoch != self.epoch {
            return None;
        }
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.key.as_ref()
    }

    /// Whether `handle` still names a live slot
    pub fn contains(&self, handle: RefHandle) -> bool {
        self.key(handle).is_some()
    }

    /// Fetch the value behind `handle`. Stale handles fail with `Closed`.
    pub fn get(&self, lua: &Lua, handle: RefHandle) -> Result<mlua::Value> {
        let key = self.key(handle).ok_or(BridgeError::Closed)?;
        Ok(lua.registry_value::<mlua::Value>(key)?)
    }

    /// Allocate a new slot referring to the same value as `handle`.
    pub fn alias(&mut self, lua: &Lua, handle: RefHandle) -> Result<RefHandle> {
        let value = self.get(lua, handle)?;
        self.insert(lua, value)
    }

    /// Release the slot behind `handle`.
    ///
    /// Returns false when the handle is stale or was already released.
    pub fn release(&mut self, lua: &Lua, handle: RefHandle) -> bool {
        if !self.contains(handle) {
            return false;
        }
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        let Some(key) = slot.key.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        // A key from a torn-down state cannot be removed; dropping it is enough.
        let _ = lua.remove_registry_value(key);
        true
    }

    /// Release every slot and invalidate all outstanding handles.
    pub fn clear(&mut self, lua: Option<&Lua>) {
        for slot in self.slots.drain(..) {
            if let (Some(key), Some(lua)) = (slot.key, lua) {
                let _ = lua.remove_registry_value(key);
            }
        }
        self.free.clear();
        self.live = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }
}
