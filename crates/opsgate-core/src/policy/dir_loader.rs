//! Overlay-directory policy loading and the name-keyed merge rule.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

/// A tool definition as found in a source file, before validation.
#[derive(Debug, Clone)]
pub struct RawTool {
    pub name: String,
    pub source: String,
    pub value: Value,
}

/// A skipped entry and why it was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidEntry {
    pub source: String,
    pub reason: String,
}

/// Enumerate `*.yaml` files in the overlay directory, lexicographically.
pub fn overlay_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    files.sort();
    files
}

/// Extract the `tools` section of a parsed policy document.
///
/// Accepts either a mapping `{name -> tool}` or a list of `{name, ...}`
/// objects; malformed entries are reported and skipped.
pub fn extract_tools(data: &Value, source: &str, invalid: &mut Vec<InvalidEntry>) -> Vec<RawTool> {
    let mut tools = Vec::new();
    match data.get("tools") {
        Some(Value::Object(map)) => {
            for (name, cfg) in map {
                if cfg.is_object() {
                    tools.push(RawTool {
                        name: name.clone(),
                        source: source.to_string(),
                        value: cfg.clone(),
                    });
                } else {
                    invalid.push(InvalidEntry {
                        source: source.to_string(),
                        reason: format!("tool '{name}' must be a mapping"),
                    });
                }
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                let Some(obj) = entry.as_object() else {
                    invalid.push(InvalidEntry {
                        source: source.to_string(),
                        reason: "tool entry must be a mapping".to_string(),
                    });
                    continue;
                };
                let Some(name) = obj.get("name").and_then(Value::as_str) else {
                    invalid.push(InvalidEntry {
                        source: source.to_string(),
                        reason: "tool entry missing name".to_string(),
                    });
                    continue;
                };
                let mut value = obj.clone();
                value.remove("name");
                tools.push(RawTool {
                    name: name.to_string(),
                    source: source.to_string(),
                    value: Value::Object(value),
                });
            }
        }
        Some(_) => invalid.push(InvalidEntry {
            source: source.to_string(),
            reason: "tools section must be a mapping or list".to_string(),
        }),
        None => {}
    }
    tools
}

/// Merge base-file tools with overlay tools by name.
///
/// Within the overlay ordering, the last writer wins; the overlay as a
/// whole wins over the base file.
pub fn merge_tools(base: Vec<RawTool>, overlay: Vec<RawTool>) -> BTreeMap<String, RawTool> {
    let mut merged = BTreeMap::new();
    for tool in base.into_iter().chain(overlay) {
        merged.insert(tool.name.clone(), tool);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(name: &str, source: &str) -> RawTool {
        RawTool {
            name: name.to_string(),
            source: source.to_string(),
            value: json!({"source": source}),
        }
    }

    #[test]
    fn extracts_mapping_form() {
        let mut invalid = Vec::new();
        let data = json!({"tools": {"a": {"description": "x"}, "b": {"description": "y"}}});
        let tools = extract_tools(&data, "base", &mut invalid);
        assert_eq!(tools.len(), 2);
        assert!(invalid.is_empty());
    }

    #[test]
    fn extracts_list_form_and_reports_nameless_entries() {
        let mut invalid = Vec::new();
        let data = json!({"tools": [{"name": "a", "description": "x"}, {"description": "y"}]});
        let tools = extract_tools(&data, "overlay.yaml", &mut invalid);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "a");
        assert!(tools[0].value.get("name").is_none());
        assert_eq!(invalid.len(), 1);
        assert!(invalid[0].reason.contains("missing name"));
    }

    #[test]
    fn overlay_wins_over_base_and_later_overlay_wins() {
        let base = vec![raw("a", "base"), raw("b", "base")];
        let overlay = vec![raw("a", "10-first.yaml"), raw("a", "20-second.yaml")];
        let merged = merge_tools(base, overlay);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a"].source, "20-second.yaml");
        assert_eq!(merged["b"].source, "base");
    }

    #[test]
    fn overlay_files_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-b.yaml"), "tools: {}").unwrap();
        std::fs::write(dir.path().join("10-a.yaml"), "tools: {}").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "").unwrap();
        let files = overlay_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("10-a.yaml"));
        assert!(files[1].ends_with("20-b.yaml"));
    }
}
