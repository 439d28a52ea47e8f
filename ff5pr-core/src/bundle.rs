//! The `.apff5pr` bundle: every generated file in one deflated zip.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::catalog::{tag, Catalog};
use crate::{MultiworldPolicy, Result};

pub const GAME_NAME: &str = "Final Fantasy V PR";
pub const PATCH_FILE_ENDING: &str = ".apff5pr";

const MANIFEST_VERSION: u32 = 6;
const MANIFEST_COMPATIBLE_VERSION: u32 = 5;
const DEFLATE_LEVEL: i32 = 3;

/// `multiworld_data.json`, read by the in-game client. Fields are declared
/// in key order so the output is sorted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiworldData {
    /// Native content id -> how the client should grant it:
    /// `["item", id, num]` for bundles, `["job", sys_call]` for jobs.
    pub content_id_special_items: BTreeMap<String, serde_json::Value>,
    pub item_id_base: u64,
    pub local_location_content_id_offset: u64,
    pub local_location_content_num_incantation: u32,
    pub location_id_base: u64,
    pub player_name: String,
    pub remote_item_content_id_offset: u64,
    pub seed_name: String,
}

impl MultiworldData {
    pub fn new(catalog: &Catalog, policy: &MultiworldPolicy, seed_name: &str, player_name: &str) -> Self {
        let mut special = BTreeMap::new();
        for (_, item) in catalog.items() {
            let Some(id) = item.id else { continue };
            if let Some(bundle) = item.bundle {
                special.insert(
                    id.0.to_string(),
                    json!(["item", bundle.content_id, bundle.content_num]),
                );
            } else if let Some(sys_call) = item.sys_call.as_ref().filter(|_| item.tags.contains(tag::JOB)) {
                special.insert(id.0.to_string(), json!(["job", sys_call]));
            }
        }

        MultiworldData {
            content_id_special_items: special,
            item_id_base: policy.id_bases.item_base(),
            local_location_content_id_offset: 0,
            local_location_content_num_incantation: policy.foreign_sentinel,
            location_id_base: policy.id_bases.location_base(),
            player_name: player_name.to_string(),
            remote_item_content_id_offset: policy.id_bases.item_base(),
            seed_name: seed_name.to_string(),
        }
    }
}

/// `archipelago.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub compatible_version: u32,
    pub version: u32,
    pub game: String,
    pub player: u32,
    pub player_name: String,
    pub patch_file_ending: String,
}

impl Manifest {
    pub fn new(player: u32, player_name: &str) -> Self {
        Manifest {
            compatible_version: MANIFEST_COMPATIBLE_VERSION,
            version: MANIFEST_VERSION,
            game: GAME_NAME.to_string(),
            player,
            player_name: player_name.to_string(),
            patch_file_ending: PATCH_FILE_ENDING.to_string(),
        }
    }
}

/// Text of every bundle entry.
#[derive(Clone, Debug)]
pub struct BundleContents {
    pub treasure_mod: String,
    pub script_patch: String,
    pub message_strings: String,
    pub nameplate_strings: String,
    pub multiworld_data: MultiworldData,
    pub manifest: Manifest,
}

impl BundleContents {
    /// Entry name -> bytes, in archive order.
    pub fn entries(&self) -> Result<Vec<(&'static str, Vec<u8>)>> {
        Ok(vec![
            ("treasure_mod.csv", self.treasure_mod.as_bytes().to_vec()),
            ("script_patch.csv", self.script_patch.as_bytes().to_vec()),
            ("message_strings.csv", self.message_strings.as_bytes().to_vec()),
            ("nameplate_strings.csv", self.nameplate_strings.as_bytes().to_vec()),
            (
                "multiworld_data.json",
                serde_json::to_vec_pretty(&self.multiworld_data)?,
            ),
            ("archipelago.json", serde_json::to_vec_pretty(&self.manifest)?),
        ])
    }

    /// The whole archive, built in memory. Entry timestamps are fixed so the
    /// same contents always give the same bytes.
    pub fn to_zip(&self) -> Result<Vec<u8>> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(DEFLATE_LEVEL))
            .last_modified_time(DateTime::default());

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in self.entries()? {
            zip.start_file(name, options)?;
            zip.write_all(&bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

/// `AP_<seed>_P<slot>_<name>.apff5pr`. Characters that could leave the
/// output directory or break on common filesystems become `_`.
pub fn bundle_file_name(seed_name: &str, player: u32, player_name: &str) -> String {
    format!(
        "AP_{}_P{}_{}{}",
        file_safe(seed_name),
        player,
        file_safe(player_name),
        PATCH_FILE_ENDING
    )
}

fn file_safe(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Write `bytes` to `dir/file_name` through a temporary sibling, so the
/// final name only ever holds a complete bundle.
pub fn write_bundle(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let tmp = dir.join(format!("{}.tmp", file_name));
    if let Err(err) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &path)) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    info!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn contents() -> BundleContents {
        BundleContents {
            treasure_mod: "entity_default,json_xpath,content_id,content_num,message_key\n".to_string(),
            script_patch: "# Narrative patches; applied before any item patch.\n\n".to_string(),
            message_strings: "Assets/GameAssets/Serial/Data/Message/story_mes_en\n\n".to_string(),
            nameplate_strings: "Assets/GameAssets/Serial/Data/Message/story_cha_en\n\n".to_string(),
            multiworld_data: MultiworldData {
                content_id_special_items: BTreeMap::from([(
                    "9000".to_string(),
                    json!(["item", 1, 100]),
                )]),
                item_id_base: 7_000_000,
                local_location_content_id_offset: 0,
                local_location_content_num_incantation: 9_999_999,
                location_id_base: 8_000_000,
                player_name: "Bartz".to_string(),
                remote_item_content_id_offset: 7_000_000,
                seed_name: "12345".to_string(),
            },
            manifest: Manifest::new(1, "Bartz"),
        }
    }

    #[test]
    fn file_name_matches_host_convention() {
        assert_eq!(bundle_file_name("12345", 1, "Bartz"), "AP_12345_P1_Bartz.apff5pr");
    }

    #[test]
    fn file_name_stays_inside_the_output_directory() {
        let name = bundle_file_name("../seed", 2, "../../etc/passwd");
        assert_eq!(name, "AP_.._seed_P2_.._.._etc_passwd.apff5pr");
        assert_eq!(Path::new(&name).components().count(), 1);

        let name = bundle_file_name("1", 1, "C:\\Users\\Faris");
        assert_eq!(name, "AP_1_P1_C__Users_Faris.apff5pr");

        let dir = tempfile::tempdir().unwrap();
        let path = write_bundle(dir.path(), &bundle_file_name("1", 1, "a/../../b"), b"zip").unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
    }

    #[test]
    fn multiworld_data_keys_are_sorted() {
        let text = String::from_utf8(serde_json::to_vec_pretty(&contents().multiworld_data).unwrap()).unwrap();
        let keys: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("  \""))
            .map(|l| l.trim().split('"').nth(1).unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(text.contains("\"local_location_content_num_incantation\": 9999999"));
    }

    #[test]
    fn zip_is_reproducible_and_readable() {
        let first = contents().to_zip().unwrap();
        let second = contents().to_zip().unwrap();
        assert_eq!(first, second);

        let mut archive = zip::ZipArchive::new(Cursor::new(first)).unwrap();
        assert_eq!(archive.len(), 6);
        let mut manifest = String::new();
        archive
            .by_name("archipelago.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        let manifest: Manifest = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest.game, GAME_NAME);
        assert_eq!(manifest.patch_file_ending, ".apff5pr");
    }

    #[test]
    fn write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bundle(dir.path(), "AP_1_P1_X.apff5pr", b"data").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
