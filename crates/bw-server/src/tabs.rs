//! Tab directory
//!
//! Every `*.json` file in the tabs directory is one tab; its file stem is the
//! tab id and its content the serialized workspace.

use anyhow::{Context, Result};
use bw_supervisor::TabSource;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Read every tab of `dir`, sorted by id
///
/// A missing directory is created and yields no tabs.
pub fn load_tab_sources(dir: &Path) -> Result<Vec<TabSource>> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create tabs directory {:?}", dir))?;
        info!("Created tabs directory {:?}", dir);
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read tabs directory {:?}", dir))?;
    let mut sources = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read tab file {:?}", path))?;
        debug!(tab = %id, bytes = content.len(), "Read tab file");
        sources.push(TabSource::new(id, content));
    }
    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_json_files_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("lights.json"), "{}").unwrap();
        fs::write(dir.path().join("garden.json"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("archive.json")).unwrap();

        let sources = load_tab_sources(dir.path()).unwrap();
        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["garden", "lights"]);
        assert_eq!(sources[1].content, "{}");
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let tabs = dir.path().join("tabs");

        assert!(load_tab_sources(&tabs).unwrap().is_empty());
        assert!(tabs.is_dir());
    }
}
