use anyhow::{Context, Result, bail};
use serde_json::Value;

use pkg_types::object::ObjectKind;

/// One object read from a snapshot file, with its kind resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub kind: ObjectKind,
    pub body: Value,
}

/// Parse a snapshot: a list of objects, or a `{"items": [...]}` list as
/// returned by the API. JSON and YAML are both accepted. Objects without a
/// `kind` are taken to be pods.
pub fn parse(content: &str) -> Result<Vec<SnapshotEntry>> {
    let doc: Value = serde_yaml::from_str(content).context("snapshot is neither JSON nor YAML")?;
    let items = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(_) => bail!("snapshot 'items' must be a list"),
            None => bail!("snapshot must be a list of objects or have an 'items' list"),
        },
        _ => bail!("snapshot must be a list of objects or have an 'items' list"),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, body)| -> Result<SnapshotEntry> {
            let kind = match body.get("kind").and_then(Value::as_str) {
                Some(kind) => kind
                    .parse::<ObjectKind>()
                    .map_err(|e: String| anyhow::anyhow!("item {}: {}", i, e))?,
                None => ObjectKind::Pod,
            };
            Ok(SnapshotEntry { kind, body })
        })
        .collect()
}

pub fn load(path: &str) -> Result<Vec<SnapshotEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot file: {}", path))?;
    parse(&content).with_context(|| format!("invalid snapshot file: {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_item_lists() {
        let entries = parse(
            r#"{"items": [
                {"kind": "Pod", "metadata": {"name": "a"}},
                {"kind": "DaemonSet", "metadata": {"name": "b"}},
                {"metadata": {"name": "c"}}
            ]}"#,
        )
        .unwrap();
        let kinds: Vec<ObjectKind> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ObjectKind::Pod, ObjectKind::DaemonSet, ObjectKind::Pod]);
    }

    #[test]
    fn parses_yaml_lists() {
        let entries = parse("- kind: Machine\n  metadata:\n    name: m-1\n").unwrap();
        assert_eq!(entries[0].kind, ObjectKind::Machine);
    }

    #[test]
    fn rejects_unknown_kinds_and_scalars() {
        assert!(parse(r#"[{"kind": "Widget"}]"#).is_err());
        assert!(parse("42").is_err());
        assert!(parse(r#"{"items": 3}"#).is_err());
    }
}
