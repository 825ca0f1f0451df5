//! Preprocessor order persistence.
//!
//! The order file is a JSON array of plugin names. On every load it is
//! reconciled against the set of discovered preprocessors: saved names that
//! still exist keep their saved position, unknown names are dropped, and
//! newly discovered names are appended in lexicographic order.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use tracing::info;

/// Pure reconciliation of a saved order against the discovered set.
pub fn reconcile(saved: &[String], discovered: &[String]) -> Vec<String> {
    let known: HashSet<&str> = discovered.iter().map(String::as_str).collect();
    let mut order: Vec<String> = saved
        .iter()
        .filter(|name| known.contains(name.as_str()))
        .cloned()
        .collect();

    let present: HashSet<&str> = order.iter().map(String::as_str).collect();
    let mut fresh: Vec<String> = discovered
        .iter()
        .filter(|name| !present.contains(name.as_str()))
        .cloned()
        .collect();
    fresh.sort();
    order.extend(fresh);
    order
}

pub fn load_order(path: &Path) -> anyhow::Result<Vec<String>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {path:?}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parse order file {path:?}"))
}

pub fn persist_order(path: &Path, order: &[String]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(order)?;
    std::fs::write(path, raw).with_context(|| format!("write {path:?}"))
}

/// Load, reconcile, and write the file back when it is absent or changed.
pub fn load_and_reconcile(path: &Path, discovered: &[String]) -> anyhow::Result<Vec<String>> {
    let saved = load_order(path)?;
    let order = reconcile(&saved, discovered);
    if !path.is_file() || saved != order {
        persist_order(path, &order)?;
        info!(path = %path.display(), count = order.len(), "preprocessor order persisted");
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn keeps_saved_order_drops_unknown_appends_new() {
        // Saved ["B","A","C"], discovered {A,B,D}: C is gone, D is new.
        let order = reconcile(&s(&["B", "A", "C"]), &s(&["A", "B", "D"]));
        assert_eq!(order, s(&["B", "A", "D"]));
    }

    #[test]
    fn new_names_append_lexicographically() {
        let order = reconcile(&[], &s(&["zeta", "alpha", "mid"]));
        assert_eq!(order, s(&["alpha", "mid", "zeta"]));
    }

    #[test]
    fn reconcile_is_deterministic() {
        let a = reconcile(&s(&["B", "A"]), &s(&["A", "B", "C"]));
        let b = reconcile(&s(&["B", "A"]), &s(&["A", "B", "C"]));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_file_is_created_with_reconciled_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preprocessor-order.json");
        let order = load_and_reconcile(&path, &s(&["B", "A"])).unwrap();
        assert_eq!(order, s(&["A", "B"]));
        assert!(path.is_file());
        assert_eq!(load_order(&path).unwrap(), order);
    }

    #[test]
    fn file_is_rewritten_to_match_effective_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preprocessor-order.json");
        persist_order(&path, &s(&["B", "A", "C"])).unwrap();
        let order = load_and_reconcile(&path, &s(&["A", "B", "D"])).unwrap();
        assert_eq!(order, s(&["B", "A", "D"]));
        assert_eq!(load_order(&path).unwrap(), order);
    }
}
