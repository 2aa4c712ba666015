//! Render graph resolution: dependency collection over slot links.
//!
//! [`collect`] is a pure function of the current asset graph; it holds no
//! state and must be re-run whenever the render root or any slot wiring
//! changes. The returned order is a valid topological order of the
//! Shader-kind nodes reachable from the root: every node appears after all
//! of its direct shader dependencies, each node exactly once. Cycles are
//! broken structurally (a node on the active recursion path is not
//! re-visited) and diamond dependencies are deduplicated the same way.

use std::collections::HashSet;

use crate::assets::{AssetId, AssetKind, AssetStore};

/// Collect the Shader-kind assets reachable from `root` through slot links,
/// dependencies before dependents, `root` last. Returns an empty list when
/// `root` is not a live shader.
pub fn collect(store: &AssetStore, root: AssetId) -> Vec<AssetId> {
    let mut order = Vec::new();
    let mut visiting = HashSet::new();
    visit(store, root, &mut order, &mut visiting);
    order
}

fn visit(store: &AssetStore, id: AssetId, order: &mut Vec<AssetId>, visiting: &mut HashSet<AssetId>) {
    if order.contains(&id) || !visiting.insert(id) {
        return;
    }
    let Some(asset) = store.get_kind(id, AssetKind::Shader) else {
        return;
    };
    for dep in asset.slots.iter().flatten() {
        if store.get_kind(*dep, AssetKind::Shader).is_some() {
            visit(store, *dep, order, visiting);
        }
    }
    order.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shader(store: &mut AssetStore, name: &str) -> AssetId {
        store.add_shader(name, "")
    }

    #[test]
    fn chain_orders_dependency_first() {
        let mut store = AssetStore::new();
        let s1 = shader(&mut store, "s1");
        let s2 = shader(&mut store, "s2");
        store.connect(s2, 0, Some(s1)).unwrap();
        assert_eq!(collect(&store, s2), vec![s1, s2]);
    }

    #[test]
    fn cycle_terminates_with_each_node_once() {
        let mut store = AssetStore::new();
        let a = shader(&mut store, "a");
        let b = shader(&mut store, "b");
        store.connect(a, 0, Some(b)).unwrap();
        store.connect(b, 0, Some(a)).unwrap();
        let order = collect(&store, a);
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn self_loop_terminates() {
        let mut store = AssetStore::new();
        let a = shader(&mut store, "a");
        store.connect(a, 3, Some(a)).unwrap();
        assert_eq!(collect(&store, a), vec![a]);
    }

    #[test]
    fn diamond_shares_the_common_dependency_once() {
        let mut store = AssetStore::new();
        let c = shader(&mut store, "c");
        let a = shader(&mut store, "a");
        let b = shader(&mut store, "b");
        let top = shader(&mut store, "top");
        store.connect(a, 0, Some(c)).unwrap();
        store.connect(b, 0, Some(c)).unwrap();
        store.connect(top, 0, Some(a)).unwrap();
        store.connect(top, 1, Some(b)).unwrap();

        let order = collect(&store, top);
        assert_eq!(order.iter().filter(|id| **id == c).count(), 1);
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(c) < pos(a));
        assert!(pos(c) < pos(b));
        assert_eq!(*order.last().unwrap(), top);
    }

    #[test]
    fn non_shader_and_dangling_slots_are_ignored() {
        let mut store = AssetStore::new();
        let tex = store.add_texture("tex");
        let gone = shader(&mut store, "gone");
        let root = shader(&mut store, "root");
        store.connect(root, 0, Some(tex)).unwrap();
        store.connect(root, 1, Some(gone)).unwrap();
        store.remove(gone);
        assert_eq!(collect(&store, root), vec![root]);
    }

    #[test]
    fn non_shader_root_collects_nothing() {
        let mut store = AssetStore::new();
        let tex = store.add_texture("tex");
        assert!(collect(&store, tex).is_empty());
    }

    proptest! {
        /// Random acyclic wirings (slots only point at lower-numbered
        /// nodes): every reachable node appears exactly once, after each of
        /// its direct dependencies, with the root last.
        #[test]
        fn acyclic_graphs_collect_in_dependency_order(
            n in 2usize..10,
            seeds in proptest::collection::vec(any::<u64>(), 4 * 10),
        ) {
            let mut store = AssetStore::new();
            let ids: Vec<AssetId> =
                (0..n).map(|i| store.add_shader(format!("s{i}"), "")).collect();
            for i in 1..n {
                for slot in 0..crate::assets::SLOT_COUNT {
                    let seed = seeds[i * 4 + slot];
                    // Roughly half the slots stay unset.
                    if seed % 2 == 0 {
                        let dep = (seed / 2) as usize % i;
                        store.connect(ids[i], slot, Some(ids[dep])).unwrap();
                    }
                }
            }

            let root = ids[n - 1];
            let order = collect(&store, root);
            prop_assert_eq!(*order.last().unwrap(), root);

            let mut seen = HashSet::new();
            for id in &order {
                prop_assert!(seen.insert(*id), "node collected twice");
            }
            for id in &order {
                let pos = |x: AssetId| order.iter().position(|o| *o == x);
                let my_pos = pos(*id).unwrap();
                for dep in store.get(*id).unwrap().slots.iter().flatten() {
                    if let Some(dep_pos) = pos(*dep) {
                        prop_assert!(dep_pos < my_pos, "dependency after dependent");
                    }
                }
            }
        }
    }
}
