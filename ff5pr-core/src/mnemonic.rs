use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use walkdir::WalkDir;

use crate::catalog::ContentGrant;

/// Operand slots every instruction carries.
pub const OPERAND_SLOTS: usize = 8;

/// `type` value of executable instructions.
pub const KIND_COMMAND: u32 = 1;
/// `type` value of label-only instructions (`Nop`).
pub const KIND_LABEL: u32 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operands {
    #[serde(rename = "iValues", default)]
    pub i_values: Vec<i64>,
    #[serde(rename = "rValues", default, serialize_with = "whole_reals_as_integers")]
    pub r_values: Vec<f64>,
    #[serde(rename = "sValues", default)]
    pub s_values: Vec<String>,
}

impl Default for Operands {
    fn default() -> Self {
        Operands {
            i_values: vec![0; OPERAND_SLOTS],
            r_values: vec![0.0; OPERAND_SLOTS],
            s_values: vec![String::new(); OPERAND_SLOTS],
        }
    }
}

/// The engine dumps whole reals as `0`, not `0.0`; write them back the same way.
fn whole_reals_as_integers<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(values.len()))?;
    for &value in values {
        if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            seq.serialize_element(&(value as i64))?;
        } else {
            seq.serialize_element(&value)?;
        }
    }
    seq.end()
}

/// One instruction of a script's `Mnemonics` array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mnemonic {
    #[serde(default)]
    pub label: String,
    pub mnemonic: String,
    #[serde(default)]
    pub operands: Operands,
    #[serde(rename = "type", default)]
    pub kind: u32,
    #[serde(default)]
    pub comment: String,
}

impl Mnemonic {
    fn command(name: &str, operands: Operands) -> Self {
        Mnemonic {
            label: String::new(),
            mnemonic: name.to_string(),
            operands,
            kind: KIND_COMMAND,
            comment: String::new(),
        }
    }

    pub fn nop(label: &str) -> Self {
        Mnemonic {
            label: label.to_string(),
            mnemonic: "Nop".to_string(),
            operands: Operands::default(),
            kind: KIND_LABEL,
            comment: String::new(),
        }
    }

    pub fn get_item(grant: ContentGrant) -> Self {
        let mut operands = Operands::default();
        operands.i_values[0] = i64::from(grant.content_id);
        operands.i_values[1] = i64::from(grant.content_num);
        Mnemonic::command("GetItem", operands)
    }

    pub fn sys_call(name: &str) -> Self {
        let mut operands = Operands::default();
        operands.s_values[0] = name.to_string();
        Mnemonic::command("SysCall", operands)
    }

    pub fn msg(key: &str) -> Self {
        let mut operands = Operands::default();
        operands.i_values[1] = 2;
        operands.s_values[0] = key.to_string();
        Mnemonic::command("Msg", operands)
    }

    pub fn is_labeled(&self) -> bool {
        !self.label.is_empty()
    }

    /// Jump-style instructions name their target label in `sValues`.
    pub fn references(&self, label: &str) -> bool {
        self.operands.s_values.iter().any(|s| s == label)
    }

    /// The grant this instruction hands out, when it is a `GetItem`.
    pub fn grant(&self) -> Option<ContentGrant> {
        if self.mnemonic != "GetItem" {
            return None;
        }
        let id = *self.operands.i_values.first()?;
        let num = *self.operands.i_values.get(1)?;
        Some(ContentGrant {
            content_id: u32::try_from(id).ok()?,
            content_num: u32::try_from(num).ok()?,
        })
    }
}

#[derive(Debug, Error)]
pub enum ScriptStoreError {
    #[error("script directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("could not walk script directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("could not read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script {path} is not a valid script dump: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct ScriptFile {
    #[serde(rename = "Mnemonics")]
    mnemonics: Vec<Mnemonic>,
}

/// Source-game scripts keyed by asset path (no extension), e.g.
/// `Assets/GameAssets/Serial/Res/Map/Map_30041/Map_30041_8/sc_e_0017`.
#[derive(Clone, Debug, Default)]
pub struct ScriptStore {
    scripts: BTreeMap<String, Vec<Mnemonic>>,
}

impl ScriptStore {
    pub fn new() -> Self {
        ScriptStore::default()
    }

    pub fn insert(&mut self, asset: &str, mnemonics: Vec<Mnemonic>) {
        self.scripts.insert(asset.to_string(), mnemonics);
    }

    pub fn get(&self, asset: &str) -> Option<&[Mnemonic]> {
        self.scripts.get(asset).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Load every `*.json` script dump under `root`. The asset key is the
    /// path relative to `root` without its extension.
    pub fn load_dir(root: &Path) -> Result<Self, ScriptStoreError> {
        if !root.is_dir() {
            return Err(ScriptStoreError::MissingDirectory(root.to_path_buf()));
        }

        let mut store = ScriptStore::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let Some(asset) = asset_key(root, path) else {
                continue;
            };
            let text = fs::read_to_string(path).map_err(|source| ScriptStoreError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file: ScriptFile =
                serde_json::from_str(&text).map_err(|source| ScriptStoreError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!("loaded {} ({} mnemonics)", asset, file.mnemonics.len());
            store.scripts.insert(asset, file.mnemonics);
        }

        info!("loaded {} scripts from {}", store.len(), root.display());
        Ok(store)
    }
}

fn asset_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_json_uses_engine_field_names() {
        let json = serde_json::to_string(&Mnemonic::get_item(ContentGrant {
            content_id: 2,
            content_num: 5,
        }))
        .unwrap();
        assert!(json.starts_with(r#"{"label":"","mnemonic":"GetItem","operands":{"iValues":[2,5,0,0,0,0,0,0]"#));
        assert!(json.contains(r#""rValues":[0,0,0,0,0,0,0,0]"#));
        assert!(json.contains(r#""type":1"#));
        assert!(json.contains(r#""sValues":["","","","","","","",""]"#));
    }

    #[test]
    fn parses_engine_dump_with_integer_reals() {
        let json = r#"{
            "label": "Main",
            "mnemonic": "Nop",
            "operands": {
                "iValues": [0,0,0,0,0,0,0,0],
                "rValues": [0.25,0,0,0,0,0,0,0],
                "sValues": ["","","","","","","",""]
            },
            "type": 2,
            "comment": ""
        }"#;
        let m: Mnemonic = serde_json::from_str(json).unwrap();
        assert_eq!(m.label, "Main");
        assert_eq!(m.kind, KIND_LABEL);
        assert_eq!(m.operands.r_values[0], 0.25);

        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains(r#""rValues":[0.25,0,0,0,0,0,0,0]"#));
        let mut m = m;
        m.operands.r_values[1] = -3.0;
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains(r#""rValues":[0.25,-3,0,0,0,0,0,0]"#));
    }

    #[test]
    fn grant_reads_back_get_item() {
        let grant = ContentGrant {
            content_id: 1203,
            content_num: 9_999_999,
        };
        assert_eq!(Mnemonic::get_item(grant).grant(), Some(grant));
        assert_eq!(Mnemonic::nop("X").grant(), None);
    }

    #[test]
    fn loads_script_dumps_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let script_dir = dir.path().join("Assets/Map/Map_1");
        fs::create_dir_all(&script_dir).unwrap();
        let body = serde_json::json!({
            "Mnemonics": [Mnemonic::nop("Main"), Mnemonic::msg("HELLO")],
            "Extra": 1
        });
        fs::write(script_dir.join("sc_e_0001.json"), body.to_string()).unwrap();
        fs::write(script_dir.join("notes.txt"), "not a script").unwrap();

        let store = ScriptStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let script = store.get("Assets/Map/Map_1/sc_e_0001").unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[1].operands.s_values[0], "HELLO");
    }

    #[test]
    fn bad_dump_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        match ScriptStore::load_dir(dir.path()) {
            Err(ScriptStoreError::Parse { path, .. }) => assert!(path.ends_with("broken.json")),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
