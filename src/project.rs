//! Project persistence: a flat JSON document of asset records. Identity,
//! slot wiring, output designations, source text and parameter values
//! round-trip exactly; compiled pipelines and render targets never
//! serialize.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::assets::{Asset, AssetId, AssetKind, AssetStore, MAX_PARAMS, SLOT_COUNT};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub kind: AssetKind,
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub slots: [Option<AssetId>; SLOT_COUNT],
    #[serde(default)]
    pub output: Option<AssetId>,
    #[serde(default)]
    pub param_values: Vec<[f32; 4]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectDoc {
    pub assets: Vec<AssetRecord>,
}

pub fn to_document(store: &AssetStore) -> ProjectDoc {
    let assets = store
        .iter()
        .map(|a| AssetRecord {
            id: a.id,
            kind: a.kind,
            name: a.name.clone(),
            source: a.source.clone(),
            data: a.data.clone(),
            slots: a.slots,
            output: a.output,
            param_values: a.param_values.to_vec(),
        })
        .collect();
    ProjectDoc { assets }
}

pub fn from_document(doc: ProjectDoc) -> Result<AssetStore> {
    let mut store = AssetStore::new();
    for record in doc.assets {
        let mut asset = Asset::new(record.id, record.kind, record.name);
        asset.source = record.source;
        asset.data = record.data;
        asset.slots = record.slots;
        asset.output = record.output;
        for (i, v) in record.param_values.into_iter().take(MAX_PARAMS).enumerate() {
            asset.param_values[i] = v;
        }
        store
            .restore(asset)
            .context("failed to restore project asset")?;
    }
    store.rebuild_free_list();
    Ok(store)
}

pub fn save_json(store: &AssetStore) -> Result<String> {
    serde_json::to_string_pretty(&to_document(store)).context("failed to serialize project")
}

pub fn load_json(json: &str) -> Result<AssetStore> {
    let doc: ProjectDoc = serde_json::from_str(json).context("failed to parse project JSON")?;
    from_document(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_identity_wiring_and_source() {
        let mut store = AssetStore::new();
        let tex = store.add_texture("sink");
        let dep = store.add_shader("noise", "fn main_image() {}");
        let root = store.add_shader("final", "fn main_image() { /* root */ }");
        store.add_audio("track", vec![1, 2, 3]);
        store.connect(root, 0, Some(dep)).unwrap();
        store.connect(root, 3, Some(tex)).unwrap();
        store.set_output(root, Some(tex)).unwrap();
        store.get_mut(root).unwrap().param_values[2] = [0.5, 0.0, 0.0, 1.0];

        let json = save_json(&store).unwrap();
        let loaded = load_json(&json).unwrap();

        assert_eq!(loaded.len(), store.len());
        let r = loaded.get(root).unwrap();
        assert_eq!(r.id, root);
        assert_eq!(r.source, "fn main_image() { /* root */ }");
        assert_eq!(r.slots[0], Some(dep));
        assert_eq!(r.slots[3], Some(tex));
        assert_eq!(r.output, Some(tex));
        assert_eq!(r.param_values[2], [0.5, 0.0, 0.0, 1.0]);
        assert!(r.shader.is_none());
        assert_eq!(loaded.get(tex).unwrap().kind, AssetKind::Texture);
    }

    #[test]
    fn loaded_store_allocates_fresh_non_colliding_ids() {
        let mut store = AssetStore::new();
        let a = store.add_shader("a", "");
        let json = save_json(&store).unwrap();
        let mut loaded = load_json(&json).unwrap();
        let b = loaded.add_shader("b", "");
        assert_ne!(a, b);
        assert!(loaded.get(a).is_some());
        assert!(loaded.get(b).is_some());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut store = AssetStore::new();
        store.add_shader("a", "");
        let mut doc = to_document(&store);
        doc.assets.push(doc.assets[0].clone());
        assert!(from_document(doc).is_err());
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"assets":[{"id":{"index":0,"generation":0},"kind":"Texture","name":"t"}]}"#;
        let store = load_json(json).unwrap();
        let id = AssetId { index: 0, generation: 0 };
        let t = store.get(id).unwrap();
        assert_eq!(t.slots, [None; SLOT_COUNT]);
        assert_eq!(t.output, None);
        assert!(t.data.is_empty());
    }
}
