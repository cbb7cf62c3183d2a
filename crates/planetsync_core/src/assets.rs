use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::records::{SystemRecord, percent_decode, percent_encode};

/// Local map images, addressed relative to the image root.
pub trait AssetStore: Sync {
    fn exists(&self, path: &Path) -> bool;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetStore for FsAssetStore {
    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).is_file()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let absolute = self.root.join(path);
        fs::read(&absolute).with_context(|| format!("failed to read {}", absolute.display()))
    }
}

/// Wiki file name and local path of one system's neighborhood map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAsset {
    pub image_name: String,
    pub relative_path: PathBuf,
}

impl ImageAsset {
    pub fn for_record(record: &SystemRecord, version: &str, year: u32) -> Option<Self> {
        let id = record.sarna_id.as_deref().filter(|id| !id.is_empty())?;
        let (image_name, file_name) = if id.contains('%') {
            // still encoded: the wiki name is decoded, the file on disk is not re-encoded
            let decoded = percent_decode(id).unwrap_or_else(|| id.to_string());
            let image_name = format!("{decoded}_{year}.svg");
            (image_name.clone(), image_name)
        } else {
            let image_name = format!("{id}_{year}.svg");
            let file_name = percent_encode(&image_name);
            (image_name, file_name)
        };
        Some(Self {
            image_name,
            relative_path: Path::new(version).join(year.to_string()).join(file_name),
        })
    }

    pub fn file_title(&self) -> String {
        format!("File:{}", self.image_name)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn record(id: &str) -> SystemRecord {
        SystemRecord {
            name: "New Avalon".to_string(),
            alt_name: String::new(),
            x: 0.0,
            y: 0.0,
            raw_x: "0".to_string(),
            raw_y: "0".to_string(),
            sarna_id: Some(id.to_string()),
        }
    }

    #[test]
    fn plain_ids_are_encoded_on_disk() {
        let asset = ImageAsset::for_record(&record("New Avalon"), "1.1.2", 3151).expect("asset");
        assert_eq!(asset.image_name, "New Avalon_3151.svg");
        assert_eq!(
            asset.relative_path,
            Path::new("1.1.2").join("3151").join("New%20Avalon_3151.svg")
        );
        assert_eq!(asset.file_title(), "File:New Avalon_3151.svg");
    }

    #[test]
    fn encoded_ids_are_decoded_for_the_wiki_name() {
        let asset = ImageAsset::for_record(&record("Caf%C3%A9"), "1.1.2", 3151).expect("asset");
        assert_eq!(asset.image_name, "Café_3151.svg");
        assert_eq!(
            asset.relative_path,
            Path::new("1.1.2").join("3151").join("Café_3151.svg")
        );
    }

    #[test]
    fn unlinked_records_have_no_asset() {
        let mut unlinked = record("");
        assert_eq!(ImageAsset::for_record(&unlinked, "1.1.2", 3151), None);
        unlinked.sarna_id = None;
        assert_eq!(ImageAsset::for_record(&unlinked, "1.1.2", 3151), None);
    }

    #[test]
    fn fs_store_reads_relative_paths() {
        let temp = tempdir().expect("tempdir");
        let relative = Path::new("1.1.2").join("3151").join("Sol_3151.svg");
        let absolute = temp.path().join(&relative);
        fs::create_dir_all(absolute.parent().expect("parent")).expect("create dirs");
        fs::write(&absolute, "<svg/>").expect("write svg");

        let store = FsAssetStore::new(temp.path());
        assert!(store.exists(&relative));
        assert!(!store.exists(Path::new("missing.svg")));
        assert_eq!(store.read(&relative).expect("read"), b"<svg/>".to_vec());
        assert!(store.read(Path::new("missing.svg")).is_err());
        assert_eq!(store.root(), temp.path());
    }
}
