//! Asset data model: the arena-backed store of shader/texture/image/audio
//! assets and the slot wiring between them.
//!
//! Assets are addressed by generation-checked handles ([`AssetId`]) rather
//! than raw references, so removing an asset can never leave another asset's
//! slot pointing at freed memory; a stale handle simply stops resolving and
//! the renderer degrades to the shared black texture.

use serde::{Deserialize, Serialize};

use crate::compiler::{CompileError, CompiledShader};

/// Number of declared texture input slots on a shader node.
pub const SLOT_COUNT: usize = 4;

/// Number of positional vec4 entries in a shader's parameter buffer.
pub const MAX_PARAMS: usize = 10;

/// Stable handle to an asset in an [`AssetStore`].
///
/// The generation is bumped every time an arena slot is freed, so handles to
/// removed assets miss instead of aliasing whatever got allocated in their
/// place. Serialized as-is; identity round-trips exactly through a project
/// document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId {
    pub index: u32,
    pub generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    Shader,
    Texture,
    Image,
    Audio,
}

/// A named unit of user content.
///
/// Only `Shader` assets carry source text and participate in compilation and
/// graph resolution. `Texture` assets are placeholder render targets
/// ("virtual textures") written through a shader's output designation.
/// `Image` and `Audio` assets carry raw bytes.
#[derive(Debug)]
pub struct Asset {
    pub id: AssetId,
    pub kind: AssetKind,
    pub name: String,
    /// Fragment shader body (Shader kind only).
    pub source: String,
    /// Raw payload bytes (Image / Audio kinds).
    pub data: Vec<u8>,
    /// Declared inputs. An unset or dangling entry binds the shared black
    /// texture.
    pub slots: [Option<AssetId>; SLOT_COUNT],
    /// Optional Texture asset receiving this shader's result as a terminal
    /// sink.
    pub output: Option<AssetId>,
    /// Present only after a successful compile. Kept as last-known-good
    /// across edits and failed recompiles so downstream nodes keep reading
    /// stale-but-valid output; replaced atomically on the next success.
    pub shader: Option<CompiledShader>,
    /// Diagnostics from the most recent compile attempt, replaced atomically
    /// per attempt.
    pub errors: Vec<CompileError>,
    /// UI-edited parameter values, uploaded positionally into the vec4
    /// parameter buffer each frame. Persisted with the project.
    pub param_values: [[f32; 4]; MAX_PARAMS],
    /// Incremented whenever the source changes; compile responses carrying a
    /// stale generation are discarded.
    pub compile_generation: u64,
}

impl Asset {
    pub(crate) fn new(id: AssetId, kind: AssetKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            source: String::new(),
            data: Vec::new(),
            slots: [None; SLOT_COUNT],
            output: None,
            shader: None,
            errors: Vec::new(),
            param_values: [[0.0; 4]; MAX_PARAMS],
            compile_generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct ArenaEntry {
    generation: u32,
    asset: Option<Asset>,
}

/// Owns every asset in a project and enforces the structural invariants of
/// the slot graph.
#[derive(Debug, Default)]
pub struct AssetStore {
    entries: Vec<ArenaEntry>,
    free: Vec<u32>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, kind: AssetKind, name: impl Into<String>) -> AssetId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(ArenaEntry::default());
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[index as usize];
        let id = AssetId {
            index,
            generation: entry.generation,
        };
        entry.asset = Some(Asset::new(id, kind, name));
        id
    }

    pub fn add_shader(&mut self, name: impl Into<String>, source: impl Into<String>) -> AssetId {
        let id = self.allocate(AssetKind::Shader, name);
        self.get_mut(id).unwrap().source = source.into();
        id
    }

    pub fn add_texture(&mut self, name: impl Into<String>) -> AssetId {
        self.allocate(AssetKind::Texture, name)
    }

    pub fn add_image(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> AssetId {
        let id = self.allocate(AssetKind::Image, name);
        self.get_mut(id).unwrap().data = bytes;
        id
    }

    pub fn add_audio(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> AssetId {
        let id = self.allocate(AssetKind::Audio, name);
        self.get_mut(id).unwrap().data = bytes;
        id
    }

    pub fn get(&self, id: AssetId) -> Option<&Asset> {
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.asset.as_ref()
    }

    pub fn get_mut(&mut self, id: AssetId) -> Option<&mut Asset> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.asset.as_mut()
    }

    /// Resolve `id` only if it is live and of the expected kind. A mismatch
    /// is "absent", never an error.
    pub fn get_kind(&self, id: AssetId, kind: AssetKind) -> Option<&Asset> {
        self.get(id).filter(|a| a.kind == kind)
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.asset.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.entries.iter().filter_map(|e| e.asset.as_ref())
    }

    pub fn ids(&self) -> Vec<AssetId> {
        self.iter().map(|a| a.id).collect()
    }

    /// First asset matching `name` (or its stem before the first '.') of the
    /// given kind.
    pub fn find_by_name(&self, name: &str, kind: AssetKind) -> Option<AssetId> {
        self.iter()
            .find(|a| {
                a.kind == kind
                    && (a.name == name || a.name.split('.').next().is_some_and(|stem| stem == name))
            })
            .map(|a| a.id)
    }

    /// Remove an asset and scrub every other asset's slot/output entry that
    /// pointed at it. Returns the removed asset, or `None` for a stale id.
    pub fn remove(&mut self, id: AssetId) -> Option<Asset> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let removed = entry.asset.take()?;
        // Bump so the freed index never resolves for the old handle again.
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);

        for other in self.entries.iter_mut().filter_map(|e| e.asset.as_mut()) {
            for slot in other.slots.iter_mut() {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
            if other.output == Some(id) {
                other.output = None;
            }
        }
        Some(removed)
    }

    /// Wire `input` into `slot` of `asset`. `input = None` disconnects.
    /// Dangling or wrong-kind inputs are allowed; they degrade to black at
    /// bind time.
    pub fn connect(&mut self, asset: AssetId, slot: usize, input: Option<AssetId>) -> anyhow::Result<()> {
        anyhow::ensure!(slot < SLOT_COUNT, "slot index {slot} out of range (0..{SLOT_COUNT})");
        let a = self
            .get_mut(asset)
            .ok_or_else(|| anyhow::anyhow!("connect: unknown asset {asset:?}"))?;
        a.slots[slot] = input;
        Ok(())
    }

    /// Clear `slot` of `asset`.
    pub fn disconnect(&mut self, asset: AssetId, slot: usize) -> anyhow::Result<()> {
        self.connect(asset, slot, None)
    }

    pub fn set_output(&mut self, asset: AssetId, output: Option<AssetId>) -> anyhow::Result<()> {
        let a = self
            .get_mut(asset)
            .ok_or_else(|| anyhow::anyhow!("set_output: unknown asset {asset:?}"))?;
        a.output = output;
        Ok(())
    }

    /// Replace a shader's source text. Bumps the compile generation so
    /// in-flight compile responses for the old text are discarded. The
    /// previous pipeline stays as last-known-good: a failed recompile must
    /// not un-render a previously working node.
    pub fn set_source(&mut self, asset: AssetId, source: impl Into<String>) -> anyhow::Result<()> {
        let a = self
            .get_mut(asset)
            .ok_or_else(|| anyhow::anyhow!("set_source: unknown asset {asset:?}"))?;
        anyhow::ensure!(
            a.kind == AssetKind::Shader,
            "set_source: asset '{}' is not a shader",
            a.name
        );
        a.source = source.into();
        a.compile_generation += 1;
        Ok(())
    }

    /// Re-insert a deserialized asset at its recorded id. Project loading
    /// only; fails on conflicting ids.
    pub(crate) fn restore(&mut self, asset: Asset) -> anyhow::Result<()> {
        let index = asset.id.index as usize;
        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, ArenaEntry::default);
        }
        let entry = &mut self.entries[index];
        anyhow::ensure!(entry.asset.is_none(), "conflicting asset id {:?}", asset.id);
        entry.generation = asset.id.generation;
        entry.asset = Some(asset);
        Ok(())
    }

    /// Recompute the free list after a batch of [`Self::restore`] calls.
    pub(crate) fn rebuild_free_list(&mut self) {
        self.free = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.asset.is_none())
            .map(|(i, _)| i as u32)
            .collect();
    }

    /// Display name of the asset feeding `slot`, for editor annotation.
    pub fn slot_name(&self, asset: AssetId, slot: usize) -> String {
        self.get(asset)
            .and_then(|a| a.slots.get(slot).copied().flatten())
            .and_then(|id| self.get(id))
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "Black".to_string())
    }

    /// Display name of the asset's output designation.
    pub fn output_name(&self, asset: AssetId) -> String {
        self.get(asset)
            .and_then(|a| a.output)
            .and_then(|id| self.get(id))
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "None".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_survive_unrelated_removals() {
        let mut store = AssetStore::new();
        let a = store.add_shader("a", "");
        let b = store.add_shader("b", "");
        store.remove(a);
        assert!(store.get(a).is_none());
        assert_eq!(store.get(b).unwrap().name, "b");
    }

    #[test]
    fn freed_index_is_not_resolvable_through_old_handle() {
        let mut store = AssetStore::new();
        let a = store.add_shader("a", "");
        store.remove(a);
        let c = store.add_shader("c", "");
        // Arena may reuse the index, but the old handle must miss.
        assert_eq!(c.index, a.index);
        assert_ne!(c, a);
        assert!(store.get(a).is_none());
        assert_eq!(store.get(c).unwrap().name, "c");
    }

    #[test]
    fn remove_scrubs_slots_and_outputs() {
        let mut store = AssetStore::new();
        let tex = store.add_texture("out");
        let dep = store.add_shader("dep", "");
        let root = store.add_shader("root", "");
        store.connect(root, 2, Some(dep)).unwrap();
        store.set_output(root, Some(tex)).unwrap();

        store.remove(dep);
        store.remove(tex);
        let root = store.get(root).unwrap();
        assert_eq!(root.slots, [None; SLOT_COUNT]);
        assert_eq!(root.output, None);
    }

    #[test]
    fn connect_rejects_out_of_range_slot() {
        let mut store = AssetStore::new();
        let a = store.add_shader("a", "");
        assert!(store.connect(a, SLOT_COUNT, Some(a)).is_err());
    }

    #[test]
    fn set_source_bumps_generation() {
        let mut store = AssetStore::new();
        let a = store.add_shader("a", "old");
        let before = store.get(a).unwrap().compile_generation;
        store.set_source(a, "new").unwrap();
        let asset = store.get(a).unwrap();
        assert_eq!(asset.source, "new");
        assert_eq!(asset.compile_generation, before + 1);
    }

    #[test]
    fn set_source_rejects_non_shader() {
        let mut store = AssetStore::new();
        let t = store.add_texture("t");
        assert!(store.set_source(t, "x").is_err());
    }

    #[test]
    fn find_by_name_matches_stem_and_kind() {
        let mut store = AssetStore::new();
        let img = store.add_image("bricks.png", vec![]);
        store.add_shader("bricks", "");
        assert_eq!(store.find_by_name("bricks", AssetKind::Image), Some(img));
        assert_eq!(store.find_by_name("missing", AssetKind::Image), None);
    }

    #[test]
    fn slot_and_output_names_fall_back() {
        let mut store = AssetStore::new();
        let dep = store.add_shader("noise", "");
        let root = store.add_shader("root", "");
        store.connect(root, 0, Some(dep)).unwrap();
        assert_eq!(store.slot_name(root, 0), "noise");
        assert_eq!(store.slot_name(root, 1), "Black");
        assert_eq!(store.output_name(root), "None");
        store.disconnect(root, 0).unwrap();
        assert_eq!(store.slot_name(root, 0), "Black");
    }

    #[test]
    fn restore_rejects_conflicting_ids() {
        let mut store = AssetStore::new();
        let id = AssetId { index: 3, generation: 5 };
        store.restore(Asset::new(id, AssetKind::Texture, "t")).unwrap();
        assert!(store.restore(Asset::new(id, AssetKind::Texture, "dup")).is_err());
        store.rebuild_free_list();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id).unwrap().name, "t");
        // Gap indices become allocatable again.
        let fresh = store.add_shader("s", "");
        assert!(fresh.index < 3);
    }
}
