//! Shared imports for the bridge modules.
//!
//! Keeps the map flavors consistent across the crate: ordered maps where
//! registration order is observable, Fx-hashed maps for internal lookups.

// ═══════════════════════════════════════════════════════════════════════════════
// Hash maps
// ═══════════════════════════════════════════════════════════════════════════════

pub use rustc_hash::FxHashMap;

/// Insertion-ordered map hashed with FxHasher.
///
/// Used for bindings whose declaration order matters (pre-declared globals,
/// preload modules) and where re-registering a name must replace in place.
pub type IndexMap<K, V> =
    indexmap::IndexMap<K, V, core::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Create an empty IndexMap
#[inline]
pub fn index_map_new<K, V>() -> IndexMap<K, V>
where
    K: core::hash::Hash + Eq,
{
    indexmap::IndexMap::with_hasher(Default::default())
}
