//! Pure operations over JSON state trees.
//!
//! A state tree is a JSON object. Everything the reconciler does is expressed
//! with the handful of functions here:
//!
//! - [`diff`] keeps only the keys of `new` that are missing from, or differ
//!   from, `old` (recursing into nested objects)
//! - [`merge`] unions two trees, de-duplicating array elements
//! - [`overlay`] deep-merges objects in place but replaces arrays and scalars
//! - [`leaf_count`] counts terminal values (strings, numbers, bools, arrays)
//!
//! Dotted paths (`"camera.position.x"`) address nested fields through
//! [`get_path`], [`set_path`] and [`remove_path`].

use serde_json::{Map, Value};

/// A JSON object used as application state.
pub type Tree = Map<String, Value>;

/// Deep equality with numeric comparison by value.
///
/// `1` and `1.0` compare equal, strings compare case-sensitively, and object
/// key order is irrelevant. `null` only equals `null`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => false,
    }
}

/// Returns the part of `new` that is not already reflected in `old`.
///
/// Keys absent from `old` are copied wholesale. Keys present in both with
/// unequal values are copied, except that when both sides are objects only
/// their non-empty nested diff is kept. Unchanged keys are omitted.
pub fn diff(old: &Tree, new: &Tree) -> Tree {
    let mut out = Tree::new();

    for (key, new_value) in new {
        match old.get(key) {
            None => {
                out.insert(key.clone(), new_value.clone());
            }
            Some(old_value) if !values_equal(old_value, new_value) => {
                if let (Value::Object(old_obj), Value::Object(new_obj)) = (old_value, new_value) {
                    let nested = diff(old_obj, new_obj);
                    if !nested.is_empty() {
                        out.insert(key.clone(), Value::Object(nested));
                    }
                } else {
                    out.insert(key.clone(), new_value.clone());
                }
            }
            Some(_) => {}
        }
    }

    out
}

/// Merges `b` over a copy of `a`.
///
/// Objects merge recursively. Arrays are unioned: `a`'s elements keep their
/// order and elements of `b` not already present are appended. Any other
/// value in `b` overwrites the one in `a`.
pub fn merge(a: &Tree, b: &Tree) -> Tree {
    let mut out = a.clone();

    for (key, b_value) in b {
        let merged = match (out.get(key), b_value) {
            (Some(Value::Object(a_obj)), Value::Object(b_obj)) => Value::Object(merge(a_obj, b_obj)),
            (Some(Value::Array(a_arr)), Value::Array(b_arr)) => Value::Array(union(a_arr, b_arr)),
            _ => b_value.clone(),
        };
        out.insert(key.clone(), merged);
    }

    out
}

fn union(a: &[Value], b: &[Value]) -> Vec<Value> {
    let mut out = a.to_vec();
    for item in b {
        if !out.iter().any(|existing| values_equal(existing, item)) {
            out.push(item.clone());
        }
    }
    out
}

/// Writes `src` into `target`, recursing where both sides hold objects.
///
/// Unlike [`merge`], arrays are replaced rather than unioned: this is the
/// assignment used when a confirmed value becomes authoritative.
pub fn overlay(target: &mut Tree, src: &Tree) {
    for (key, value) in src {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => overlay(existing, incoming),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Number of leaves in a tree: one per string, number, bool or array field,
/// recursing into nested objects.
pub fn leaf_count(tree: &Tree) -> usize {
    tree.values().map(value_leaf_count).sum()
}

/// Leaf count of a single value. Objects count their contents, `null` counts
/// as nothing, everything else is one leaf.
pub fn value_leaf_count(value: &Value) -> usize {
    match value {
        Value::Object(obj) => leaf_count(obj),
        Value::Null => 0,
        _ => 1,
    }
}

/// Removes `null` fields recursively. Objects left empty by the removal are
/// kept; an explicit `{}` in a request is meaningful.
pub fn sanitize(tree: &mut Tree) {
    tree.retain(|_, v| !v.is_null());
    for value in tree.values_mut() {
        if let Value::Object(obj) = value {
            sanitize(obj);
        }
    }
}

/// Top-level keys of `new` that differ from `old`.
pub fn diff_keys(old: &Tree, new: &Tree) -> Vec<String> {
    diff(old, new).into_iter().map(|(k, _)| k).collect()
}

// ─── Dotted paths ───────────────────────────────────────────────────────────

fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Looks up a dotted path.
pub fn get_path<'a>(tree: &'a Tree, path: &str) -> Option<&'a Value> {
    let keys = segments(path);
    let (last, parents) = keys.split_last()?;

    let mut current = tree;
    for key in parents {
        current = current.get(*key)?.as_object()?;
    }
    current.get(*last)
}

/// Sets a dotted path, creating intermediate objects as needed.
///
/// An intermediate that exists but is not an object is replaced by one.
/// Returns `false` only for an empty path.
pub fn set_path(tree: &mut Tree, path: &str, value: Value) -> bool {
    let keys = segments(path);
    let Some((last, parents)) = keys.split_last() else {
        return false;
    };

    let mut current = tree;
    for key in parents {
        let slot = current
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Tree::new()));
        if !slot.is_object() {
            *slot = Value::Object(Tree::new());
        }
        let Value::Object(next) = slot else {
            return false;
        };
        current = next;
    }

    current.insert((*last).to_string(), value);
    true
}

/// Removes a dotted path and returns the removed value.
///
/// Parent objects left empty by the removal are removed as well, all the way
/// up to (but not including) the root.
pub fn remove_path(tree: &mut Tree, path: &str) -> Option<Value> {
    let keys = segments(path);
    if keys.is_empty() {
        return None;
    }
    remove_segments(tree, &keys)
}

fn remove_segments(tree: &mut Tree, keys: &[&str]) -> Option<Value> {
    let (first, rest) = keys.split_first()?;
    if rest.is_empty() {
        return tree.remove(*first);
    }

    let child = tree.get_mut(*first)?.as_object_mut()?;
    let removed = remove_segments(child, rest)?;
    if child.is_empty() {
        tree.remove(*first);
    }
    Some(removed)
}

/// Parses `text` as a JSON object.
///
/// Returns `None` for invalid JSON or for JSON that is not an object.
pub fn parse_tree(text: &str) -> Option<Tree> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(v: Value) -> Tree {
        match v {
            Value::Object(obj) => obj,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_diff_of_identical_trees_is_empty() {
        let t = tree(json!({"a": 1, "b": {"c": [1, 2], "d": "x"}, "e": true}));
        assert!(diff(&t, &t).is_empty());
    }

    #[test]
    fn test_diff_against_empty_is_identity() {
        let t = tree(json!({"a": 1, "b": {"c": [1, 2]}}));
        assert_eq!(diff(&Tree::new(), &t), t);
    }

    #[test]
    fn test_diff_keeps_only_changed_nested_fields() {
        let old = tree(json!({"camera": {"fov": 25, "pos": {"x": 0, "y": 1}}, "car": "red"}));
        let new = tree(json!({"camera": {"fov": 25, "pos": {"x": 3, "y": 1}}, "car": "red"}));
        assert_eq!(diff(&old, &new), tree(json!({"camera": {"pos": {"x": 3}}})));
    }

    #[test]
    fn test_diff_is_case_sensitive() {
        let old = tree(json!({"colour": "Red"}));
        let new = tree(json!({"colour": "red"}));
        assert_eq!(diff(&old, &new), new);
    }

    #[test]
    fn test_diff_compares_numbers_by_value() {
        let old = tree(json!({"speed": 1}));
        let new = tree(json!({"speed": 1.0}));
        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn test_diff_replaces_arrays_wholesale() {
        let old = tree(json!({"tags": ["a", "b"]}));
        let new = tree(json!({"tags": ["a", "c"]}));
        assert_eq!(diff(&old, &new), new);
    }

    #[test]
    fn test_diff_type_change_takes_new_value() {
        let old = tree(json!({"x": {"y": 1}}));
        let new = tree(json!({"x": 5}));
        assert_eq!(diff(&old, &new), new);
    }

    #[test]
    fn test_merge_disjoint_keys_is_union() {
        let a = tree(json!({"a": 1, "n": {"x": 1}}));
        let b = tree(json!({"b": [1], "m": {"y": 2}}));
        let merged = merge(&a, &b);
        assert_eq!(merged, tree(json!({"a": 1, "n": {"x": 1}, "b": [1], "m": {"y": 2}})));
        assert_eq!(diff(&a, &merged), b);
    }

    #[test]
    fn test_merge_unions_arrays_without_duplicates() {
        let a = tree(json!({"tags": ["a", "b"]}));
        let b = tree(json!({"tags": ["b", "c", "a", "d"]}));
        assert_eq!(merge(&a, &b), tree(json!({"tags": ["a", "b", "c", "d"]})));
    }

    #[test]
    fn test_merge_recurses_and_overwrites_scalars() {
        let a = tree(json!({"env": {"time": 12, "weather": "sun"}, "car": "red"}));
        let b = tree(json!({"env": {"time": 18}, "car": "blue"}));
        assert_eq!(
            merge(&a, &b),
            tree(json!({"env": {"time": 18, "weather": "sun"}, "car": "blue"}))
        );
    }

    #[test]
    fn test_overlay_replaces_arrays() {
        let mut target = tree(json!({"env": {"tags": [1, 2], "time": 1}}));
        overlay(&mut target, &tree(json!({"env": {"tags": [3]}})));
        assert_eq!(target, tree(json!({"env": {"tags": [3], "time": 1}})));
    }

    #[test]
    fn test_leaf_count() {
        assert_eq!(leaf_count(&Tree::new()), 0);
        let t = tree(json!({
            "a": "s", "b": 2, "c": false, "d": [1, 2, 3],
            "e": {"f": 1, "g": {"h": "x"}}, "i": {}
        }));
        assert_eq!(leaf_count(&t), 6);
    }

    #[test]
    fn test_sanitize_strips_nulls_recursively() {
        let mut t = tree(json!({"a": null, "b": {"c": null, "d": 1}, "e": [null]}));
        sanitize(&mut t);
        assert_eq!(t, tree(json!({"b": {"d": 1}, "e": [null]})));
    }

    #[test]
    fn test_get_path_nested() {
        let t = tree(json!({"x": {"y": {"z": 5}}, "top": 1}));
        assert_eq!(get_path(&t, "x.y.z"), Some(&json!(5)));
        assert_eq!(get_path(&t, "top"), Some(&json!(1)));
        assert_eq!(get_path(&t, "x.y"), Some(&json!({"z": 5})));
        assert_eq!(get_path(&t, "x.missing"), None);
        assert_eq!(get_path(&t, "top.below"), None);
        assert_eq!(get_path(&t, ""), None);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut t = tree(json!({"x": 1}));
        assert!(set_path(&mut t, "a.b.c", json!("v")));
        assert!(set_path(&mut t, "x.y", json!(2)));
        assert_eq!(t, tree(json!({"a": {"b": {"c": "v"}}, "x": {"y": 2}})));
        assert!(!set_path(&mut t, "", json!(0)));
    }

    #[test]
    fn test_remove_path_prunes_empty_parents() {
        let mut t = tree(json!({"a": {"b": {"c": 1}}, "d": {"e": 1, "f": 2}}));
        assert_eq!(remove_path(&mut t, "a.b.c"), Some(json!(1)));
        assert_eq!(remove_path(&mut t, "d.e"), Some(json!(1)));
        assert_eq!(t, tree(json!({"d": {"f": 2}})));
        assert_eq!(remove_path(&mut t, "missing.key"), None);
    }

    #[test]
    fn test_parse_tree_rejects_non_objects() {
        assert!(parse_tree("{\"a\":1}").is_some());
        assert!(parse_tree("[1,2]").is_none());
        assert!(parse_tree("not json").is_none());
    }
}
