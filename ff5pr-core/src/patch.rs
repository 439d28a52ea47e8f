//! Script patch compiler.
//!
//! Patches are compiled in two phases. `NarrativePhase` applies the
//! cutscene and placeholder edits; only once it is finished does
//! `ItemPhase` exist, so item grants always anchor on the placeholders the
//! narrative phase put in. Every patch is applied to an in-memory image of
//! its script as it is compiled, which is what the anchor and label checks
//! look at.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;
use walkdir::WalkDir;

use crate::catalog::{Catalog, ContentGrant, LocIdx, Pointer};
use crate::ids::ForeignSignal;
use crate::mnemonic::{Mnemonic, ScriptStore};
use crate::patch_text::{parse_patch_text, render_patches, Anchor, PatchAction, PatchTextError, ScriptPatch};
use crate::placement::PlacedItem;

/// Message shown when a chest or NPC hands out an item.
pub const MSG_FOUND_ITEM: &str = "T0003_01_01";
/// Message shown when the grant is gil.
pub const MSG_FOUND_GIL: &str = "T0003_03_01";
/// Prefix of the generated "found another player's item" messages.
pub const MSG_MULTIWORLD_PREFIX: &str = "RANDO_GOT_MULTIWORLD_ITEM_";

const GIL_CONTENT_ID: u32 = 1;

const BUILTIN_PATCHES: &[(&str, &str)] = &[
    (
        "Shorter Crystal Cutscenes",
        include_str!("../patches/shorter_crystal_cutscenes.csv"),
    ),
    (
        "Prepare NPC and Boss Event Checks",
        include_str!("../patches/prepare_npc_and_boss_event_checks.csv"),
    ),
];

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("no script named {asset} in the script store")]
    MissingScript { asset: String },

    #[error("{asset}: index {index} is past the end of the script ({len} mnemonics)")]
    IndexOutOfRange { asset: String, index: usize, len: usize },

    #[error("{asset}: anchor mismatch at index {index}: expected '{expected}', found '{found}'")]
    AnchorMismatch {
        asset: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[error("{asset}: overwrite at index {index} has no anchor check")]
    MissingAnchor { asset: String, index: usize },

    #[error("{asset}: overwrite at index {index} declares {span} mnemonics but supplies {body}")]
    LengthMismatch {
        asset: String,
        index: usize,
        span: usize,
        body: usize,
    },

    #[error("{asset}: overwrite of {span} mnemonics from index {start} runs past the end ({len})")]
    Overflow {
        asset: String,
        start: usize,
        span: usize,
        len: usize,
    },

    #[error("{asset}: overwrite would remove label '{label}' at index {index}")]
    OrphanedLabel {
        asset: String,
        index: usize,
        label: String,
    },

    #[error("{asset}: SetSVal at index {index} has a comma in its value '{value}'")]
    CommaInValue { asset: String, index: usize, value: String },

    #[error("{asset}: index {index} has no operand slot {slot}")]
    SlotOutOfRange { asset: String, index: usize, slot: usize },

    #[error("unknown game patch '{0}'")]
    UnknownPatch(String),

    #[error("patch file {name}: {source}")]
    Text {
        name: String,
        #[source]
        source: PatchTextError,
    },

    #[error("could not read patch file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not walk patch directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("location '{location}' has a script address but no placeholder label")]
    MissingLabel { location: String },

    #[error("location '{location}' is a static treasure and cannot hold '{item}'")]
    NotFiller { location: String, item: String },

    #[error("item '{item}' has no native grant")]
    Ungrantable { item: String },
}

/// Parse one of the patches shipped with the crate.
pub fn builtin_patch(name: &str) -> Result<Vec<ScriptPatch>, PatchError> {
    let (_, text) = BUILTIN_PATCHES
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| PatchError::UnknownPatch(name.to_string()))?;
    parse_patch_text(text).map_err(|source| PatchError::Text {
        name: name.to_string(),
        source,
    })
}

/// Parse every `*.csv` patch file under `dir`, in file name order.
pub fn load_patch_dir(dir: &Path) -> Result<Vec<ScriptPatch>, PatchError> {
    let mut patches = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("csv")
        {
            continue;
        }
        let text = fs::read_to_string(path).map_err(|source| PatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = parse_patch_text(&text).map_err(|source| PatchError::Text {
            name: path.display().to_string(),
            source,
        })?;
        debug!("{}: {} patches", path.display(), parsed.len());
        patches.extend(parsed);
    }
    Ok(patches)
}

/// One row of `treasure_mod.csv` for a static treasure block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreasureRow {
    pub asset: String,
    pub pointer: String,
    pub content_id: u32,
    pub content_num: u32,
    pub message_key: String,
}

/// A generic `treasure_mod.csv` row: set `key` (of type `kind`) to `value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyRow {
    pub asset: String,
    pub pointer: String,
    pub key: String,
    pub kind: String,
    pub value: String,
}

/// Scripts touched so far, with every compiled patch applied.
struct ScriptImages<'a> {
    store: &'a ScriptStore,
    images: BTreeMap<String, Vec<Mnemonic>>,
}

fn describe(m: &Mnemonic) -> String {
    if m.is_labeled() {
        format!("{}:{}", m.mnemonic, m.label)
    } else {
        m.mnemonic.clone()
    }
}

impl<'a> ScriptImages<'a> {
    fn image(&mut self, asset: &str) -> Result<&mut Vec<Mnemonic>, PatchError> {
        if !self.images.contains_key(asset) {
            let script = self.store.get(asset).ok_or_else(|| PatchError::MissingScript {
                asset: asset.to_string(),
            })?;
            self.images.insert(asset.to_string(), script.to_vec());
        }
        self.images
            .get_mut(asset)
            .ok_or_else(|| PatchError::MissingScript {
                asset: asset.to_string(),
            })
    }

    fn apply(&mut self, patch: &ScriptPatch) -> Result<(), PatchError> {
        let asset = patch.asset.as_str();
        let index = patch.index;
        let script = self.image(asset)?;
        let len = script.len();

        let target = script.get(index).ok_or_else(|| PatchError::IndexOutOfRange {
            asset: asset.to_string(),
            index,
            len,
        })?;
        match &patch.anchor {
            Some(anchor) => check_anchor(asset, index, anchor, target)?,
            None if matches!(patch.action, PatchAction::Overwrite { .. }) => {
                return Err(PatchError::MissingAnchor {
                    asset: asset.to_string(),
                    index,
                });
            }
            None => {}
        }

        match &patch.action {
            PatchAction::Overwrite { skip, span, body } => {
                if body.len() != *span {
                    return Err(PatchError::LengthMismatch {
                        asset: asset.to_string(),
                        index,
                        span: *span,
                        body: body.len(),
                    });
                }
                let end = index
                    .checked_add(*skip)
                    .and_then(|start| start.checked_add(*span))
                    .filter(|&end| end <= len);
                let Some(end) = end else {
                    return Err(PatchError::Overflow {
                        asset: asset.to_string(),
                        start: index.saturating_add(*skip),
                        span: *span,
                        len,
                    });
                };
                let start = end - span;

                for (offset, replacement) in body.iter().enumerate() {
                    let pos = start + offset;
                    let old = &script[pos];
                    if !old.is_labeled() || old.label == replacement.label {
                        continue;
                    }
                    // The anchor itself may be replaced, as long as nothing
                    // else jumps to it.
                    let is_anchor = pos == index && *skip == 0;
                    let referenced = script
                        .iter()
                        .enumerate()
                        .any(|(i, m)| i != pos && m.references(&old.label));
                    if !is_anchor || referenced {
                        return Err(PatchError::OrphanedLabel {
                            asset: asset.to_string(),
                            index: pos,
                            label: old.label.clone(),
                        });
                    }
                }

                script[start..end].clone_from_slice(body);
            }
            PatchAction::SetSVal { slot, value } => {
                if value.contains(',') {
                    return Err(PatchError::CommaInValue {
                        asset: asset.to_string(),
                        index,
                        value: value.clone(),
                    });
                }
                let target = script[index]
                    .operands
                    .s_values
                    .get_mut(*slot)
                    .ok_or_else(|| PatchError::SlotOutOfRange {
                        asset: asset.to_string(),
                        index,
                        slot: *slot,
                    })?;
                *target = value.clone();
            }
            PatchAction::SpotIArray { values } => {
                for (&slot, &value) in values {
                    let target = script[index]
                        .operands
                        .i_values
                        .get_mut(slot)
                        .ok_or_else(|| PatchError::SlotOutOfRange {
                            asset: asset.to_string(),
                            index,
                            slot,
                        })?;
                    *target = value;
                }
            }
        }
        Ok(())
    }
}

fn check_anchor(asset: &str, index: usize, anchor: &Anchor, found: &Mnemonic) -> Result<(), PatchError> {
    let type_ok = found.mnemonic == anchor.mnemonic;
    let label_ok = anchor.label.as_ref().map_or(true, |label| found.label == *label);
    if type_ok && label_ok {
        return Ok(());
    }
    Err(PatchError::AnchorMismatch {
        asset: asset.to_string(),
        index,
        expected: anchor.to_string(),
        found: describe(found),
    })
}

/// First phase: cutscene edits and placeholder insertion.
pub struct NarrativePhase<'a> {
    scripts: ScriptImages<'a>,
    applied: Vec<ScriptPatch>,
}

impl<'a> NarrativePhase<'a> {
    pub fn new(store: &'a ScriptStore) -> Self {
        NarrativePhase {
            scripts: ScriptImages {
                store,
                images: BTreeMap::new(),
            },
            applied: Vec::new(),
        }
    }

    pub fn apply(&mut self, patch: ScriptPatch) -> Result<(), PatchError> {
        self.scripts.apply(&patch)?;
        debug!("narrative patch {} @ {}", patch.asset, patch.index);
        self.applied.push(patch);
        Ok(())
    }

    pub fn apply_all<I>(&mut self, patches: I) -> Result<(), PatchError>
    where
        I: IntoIterator<Item = ScriptPatch>,
    {
        for patch in patches {
            self.apply(patch)?;
        }
        Ok(())
    }

    /// Apply the named built-in patches, in order.
    pub fn apply_builtin(&mut self, names: &[String]) -> Result<(), PatchError> {
        for name in names {
            let patches = builtin_patch(name)?;
            info!("applying game patch '{}' ({} records)", name, patches.len());
            self.apply_all(patches)?;
        }
        Ok(())
    }

    pub fn into_item_phase(self) -> ItemPhase<'a> {
        ItemPhase {
            scripts: self.scripts,
            narrative: self.applied,
            items: Vec::new(),
            treasure: Vec::new(),
            properties: Vec::new(),
            multiworld_messages: Vec::new(),
        }
    }
}

/// Second phase: one grant per placed item, plus fixed property rows.
pub struct ItemPhase<'a> {
    scripts: ScriptImages<'a>,
    narrative: Vec<ScriptPatch>,
    items: Vec<ScriptPatch>,
    treasure: Vec<TreasureRow>,
    properties: Vec<PropertyRow>,
    multiworld_messages: Vec<(String, String)>,
}

impl<'a> ItemPhase<'a> {
    pub fn property(&mut self, row: PropertyRow) {
        self.properties.push(row);
    }

    /// Compile the grant for the item placed at `location` into every
    /// address of that location. Locations with no known address produce
    /// nothing.
    pub fn place(
        &mut self,
        catalog: &Catalog,
        location: LocIdx,
        placed: &PlacedItem,
        signal: &ForeignSignal,
    ) -> Result<(), PatchError> {
        let loc = catalog.location(location);
        let Some(loc_id) = loc.id else {
            return Ok(());
        };
        if loc.addresses.is_empty() {
            debug!("{}: patch target unknown, skipped", loc.name);
            return Ok(());
        }

        let (grant, sys_call, message_key) = match placed {
            PlacedItem::Own(item_idx) => {
                let item = catalog.item(*item_idx);
                let grant = item.grant().ok_or_else(|| PatchError::Ungrantable {
                    item: item.name.clone(),
                })?;
                let key = if grant.content_id == GIL_CONTENT_ID {
                    MSG_FOUND_GIL
                } else {
                    MSG_FOUND_ITEM
                };
                (grant, item.sys_call.clone(), key.to_string())
            }
            PlacedItem::Foreign { .. } => {
                let key = format!("{}{}", MSG_MULTIWORLD_PREFIX, self.multiworld_messages.len());
                self.multiworld_messages.push((
                    key.clone(),
                    format!("Found multiworld item: {}", placed.display_name(catalog)),
                ));
                (signal.encode(loc_id), None, key)
            }
        };

        for address in &loc.addresses {
            match &address.pointer {
                Pointer::Property(pointer) => {
                    if !placed.classification(catalog).is_filler() {
                        return Err(PatchError::NotFiller {
                            location: loc.name.clone(),
                            item: placed.display_name(catalog),
                        });
                    }
                    self.treasure.push(TreasureRow {
                        asset: address.asset.clone(),
                        pointer: pointer.clone(),
                        content_id: grant.content_id,
                        content_num: grant.content_num,
                        message_key: message_key.clone(),
                    });
                }
                Pointer::Mnemonic(index) => {
                    let label = loc.label.as_deref().ok_or_else(|| PatchError::MissingLabel {
                        location: loc.name.clone(),
                    })?;
                    let body = match &sys_call {
                        Some(name) => Mnemonic::sys_call(name),
                        None => Mnemonic::get_item(grant),
                    };
                    let patch = ScriptPatch::overwrite(
                        &address.asset,
                        *index,
                        Anchor::new("Nop", Some(label)),
                        0,
                        vec![body],
                    );
                    self.scripts.apply(&patch)?;
                    self.items.push(patch);
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> CompiledPatches {
        info!(
            "compiled {} narrative patches, {} item patches, {} treasure rows",
            self.narrative.len(),
            self.items.len(),
            self.treasure.len()
        );
        CompiledPatches {
            narrative: self.narrative,
            items: self.items,
            treasure: self.treasure,
            properties: self.properties,
            multiworld_messages: self.multiworld_messages,
            images: self.scripts.images,
        }
    }
}

/// Everything the compiler produced for one run.
#[derive(Clone, Debug)]
pub struct CompiledPatches {
    pub narrative: Vec<ScriptPatch>,
    pub items: Vec<ScriptPatch>,
    pub treasure: Vec<TreasureRow>,
    pub properties: Vec<PropertyRow>,
    /// Generated `(key, text)` messages for other players' items.
    pub multiworld_messages: Vec<(String, String)>,
    /// Final state of every touched script.
    pub images: BTreeMap<String, Vec<Mnemonic>>,
}

impl CompiledPatches {
    /// `script_patch.csv`: narrative records, then item records.
    pub fn script_patch_text(&self) -> String {
        let mut out = String::from("# Narrative patches; applied before any item patch.\n\n");
        out.push_str(&render_patches(&self.narrative));
        out.push_str("\n# Item patches\n\n");
        out.push_str(&render_patches(&self.items));
        out
    }

    /// `treasure_mod.csv`: fixed property rows, then treasure rows.
    pub fn treasure_text(&self) -> String {
        let mut out = String::from("entity_default,json_xpath,content_id,content_num,message_key\n");
        for row in &self.properties {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                row.asset, row.pointer, row.key, row.kind, row.value
            ));
        }
        for row in &self.treasure {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                row.asset, row.pointer, row.content_id, row.content_num, row.message_key
            ));
        }
        out
    }

    /// The grant written at a script address, read back from the image.
    pub fn grant_at(&self, asset: &str, index: usize) -> Option<ContentGrant> {
        self.images.get(asset)?.get(index)?.grant()
    }
}
