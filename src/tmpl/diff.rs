//! Structural diffing of trees rendered from the same template.
//!
//! The diff of two trees is itself a tree: unchanged positions hold the
//! [`Dynamic::Skip`] sentinel and are omitted from the wire form, changed
//! leaves hold the new value, and changed subtrees hold a recursive diff.
//! Statics are compared element-wise; when equal they are suppressed via
//! `exclude_statics`. A range tree is re-emitted in full when its length,
//! shape, or any cell changed. Applying the serialized diff as an overlay
//! to the old tree's JSON yields the new tree's JSON.

use crate::tmpl::{Dynamic, Tree};

/// Diff `old` against `new`, producing the sparse overlay tree.
///
/// On a structural mismatch (different kinds at the same position, or a
/// range/ordinary flip) the affected subtree is taken from `new` wholesale.
pub fn diff(old: &Tree, new: &Tree) -> Tree {
    if old.is_range != new.is_range {
        return new.clone();
    }

    let statics_equal = old.statics == new.statics;
    let mut out = Tree {
        statics: new.statics.clone(),
        dynamics: Vec::with_capacity(new.dynamics.len()),
        is_range: new.is_range,
        range_step: 0,
        title: new.title.clone(),
        events: new.events.clone(),
        exclude_statics: statics_equal,
    };

    if new.is_range {
        // ranges are all-or-nothing: any change re-emits every row
        if !statics_equal || old.dynamics != new.dynamics {
            out.dynamics = new.dynamics.clone();
        }
        return out;
    }

    for (i, nd) in new.dynamics.iter().enumerate() {
        let slot = match (old.dynamics.get(i), nd) {
            (Some(Dynamic::Leaf(a)), Dynamic::Leaf(b)) if a == b => Dynamic::Skip,
            (Some(Dynamic::Sub(a)), Dynamic::Sub(b)) => {
                let sub = diff(a, b);
                if sub.is_empty_diff() {
                    Dynamic::Skip
                } else {
                    Dynamic::Sub(sub)
                }
            }
            _ => nd.clone(),
        };
        out.dynamics.push(slot);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    /// Map-based diff oracle: compare the full JSON forms of two trees
    /// and build the sparse overlay object directly.
    fn diff_map(old: &Value, new: &Value) -> Value {
        let (Value::Object(old), Value::Object(new)) = (old, new) else {
            return new.clone();
        };
        let mut out = Map::new();
        for (k, nv) in new {
            match old.get(k) {
                Some(ov) if ov == nv => {}
                Some(ov @ Value::Object(_)) if nv.is_object() => {
                    let sub = diff_map(ov, nv);
                    if sub.as_object().is_some_and(|m| !m.is_empty()) || !sub.is_object() {
                        out.insert(k.clone(), sub);
                    }
                }
                _ => {
                    out.insert(k.clone(), nv.clone());
                }
            }
        }
        Value::Object(out)
    }

    /// Apply a serialized diff overlay to a full tree JSON value, the way
    /// the client-side patcher does.
    fn apply_overlay(old: &Value, overlay: &Value) -> Value {
        let (Value::Object(old), Value::Object(overlay)) = (old, overlay) else {
            return overlay.clone();
        };
        let mut out = old.clone();
        for (k, ov) in overlay {
            let merged = match (old.get(k), ov) {
                (Some(prev @ Value::Object(_)), Value::Object(_)) => apply_overlay(prev, ov),
                _ => ov.clone(),
            };
            out.insert(k.clone(), merged);
        }
        Value::Object(out)
    }

    fn tree_value(t: &Tree) -> Value {
        serde_json::from_str(&t.json().unwrap()).unwrap()
    }

    fn assert_diff_matches_oracle(old: &Tree, new: &Tree) {
        let d = diff(old, new);
        let got: Value = serde_json::from_str(&d.json().unwrap()).unwrap();
        let want = diff_map(&tree_value(old), &tree_value(new));
        assert_eq!(got, want, "structural diff disagrees with map oracle");

        let patched = apply_overlay(&tree_value(old), &got);
        assert_eq!(patched, tree_value(new), "overlay does not reproduce new");
    }

    fn leaf_tree(values: &[&str]) -> Tree {
        let mut t = Tree::new();
        for v in values {
            t.append_static("s");
            t.append_dynamic(v.to_string());
        }
        t.append_static("e");
        t
    }

    #[test]
    fn test_identical_trees_diff_to_empty() {
        let old = leaf_tree(&["a", "b"]);
        let new = leaf_tree(&["a", "b"]);
        let d = diff(&old, &new);
        assert!(d.is_empty_diff());
        assert_eq!(d.json().unwrap(), "{}");
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_changed_leaf_is_emitted_alone() {
        let old = leaf_tree(&["a", "b"]);
        let new = leaf_tree(&["a", "c"]);
        let d = diff(&old, &new);
        assert_eq!(d.json().unwrap(), r#"{"1":"c"}"#);
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_changed_statics_are_included() {
        let mut old = Tree::new();
        old.append_static("x");
        old.append_dynamic("d".to_string());
        let mut new = Tree::new();
        new.append_static("y");
        new.append_dynamic("d".to_string());
        let d = diff(&old, &new);
        assert_eq!(d.json().unwrap(), r#"{"s":["y",""]}"#);
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_nested_sub_diffs_recursively() {
        let mut old = Tree::new();
        old.append_dynamic("same".to_string());
        let sub = old.append_sub();
        sub.append_static("in ");
        sub.append_dynamic("1".to_string());

        let mut new = Tree::new();
        new.append_dynamic("same".to_string());
        let sub = new.append_sub();
        sub.append_static("in ");
        sub.append_dynamic("2".to_string());

        let d = diff(&old, &new);
        assert_eq!(d.json().unwrap(), r#"{"1":{"0":"2"}}"#);
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_kind_mismatch_takes_new_subtree() {
        let mut old = Tree::new();
        old.append_dynamic("leaf".to_string());

        let mut new = Tree::new();
        let sub = new.append_sub();
        sub.append_static("a");
        sub.append_dynamic("b".to_string());

        let d = diff(&old, &new);
        assert_eq!(d.json().unwrap(), r#"{"0":{"0":"b","s":["a",""]}}"#);
        assert_diff_matches_oracle(&old, &new);
    }

    fn range_tree(rows: &[&str]) -> Tree {
        let mut root = Tree::new();
        let range = root.append_range_sub();
        for r in rows {
            range.append_dynamic(r.to_string());
            range.append_static(" ");
            range.inc_range_step();
        }
        root
    }

    #[test]
    fn test_range_growth_reemits_all_rows() {
        let old = range_tree(&["A", "B"]);
        let new = range_tree(&["A", "B", "C"]);
        let d = diff(&old, &new);
        assert_eq!(
            d.json().unwrap(),
            r#"{"0":{"d":[["A"],["B"],["C"]]}}"#
        );
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_range_shrink_reemits_all_rows() {
        let old = range_tree(&["A", "B", "C"]);
        let new = range_tree(&["A", "B"]);
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_unchanged_range_is_skipped() {
        let old = range_tree(&["A", "B"]);
        let new = range_tree(&["A", "B"]);
        let d = diff(&old, &new);
        assert_eq!(d.json().unwrap(), "{}");
        assert_diff_matches_oracle(&old, &new);
    }

    #[test]
    fn test_title_and_events_survive_empty_diff() {
        let old = leaf_tree(&["a"]);
        let mut new = leaf_tree(&["a"]);
        new.set_title("T".to_string());
        new.set_events(vec![r#"["evt",{"k":"v"}]"#.to_string()]);
        let d = diff(&old, &new);
        assert!(!d.is_empty_diff());
        assert_eq!(
            d.json().unwrap(),
            r#"{"t":"T","e":[["evt",{"k":"v"}]]}"#
        );
    }
}
