use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::logic::{RuleIdx, RuleRegistry};

/// Well-known tag names that the pipeline reacts to. Everything else is
/// free-form and only matters to rules such as `has_tagged`.
pub mod tag {
    pub const CHEST: &str = "Chest";
    pub const COMPLETION_CONDITION: &str = "CompletionCondition";
    pub const GIL: &str = "Gil";
    pub const JOB: &str = "Job";
    pub const WORLD_TELEPORT: &str = "WorldTeleport";
}

pub const STORY_MESSAGE_ASSET: &str = "Assets/GameAssets/Serial/Data/Message/story_mes_en";
pub const NAMEPLATE_ASSET: &str = "Assets/GameAssets/Serial/Data/Message/story_cha_en";

/// Address text used by the pristine tables for checks whose patch target
/// has not been found yet.
pub const UNKNOWN_ADDRESS: &str = "???";
/// File name of a map's static treasure data.
pub const STATIC_PROPERTY_FILE: &str = "entity_default";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ItemId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LocationId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ItemIdx(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LocIdx(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RegionIdx(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ItemClassification {
    Filler,
    Progression,
    Useful,
    Trap,
    SkipBalancing,
    Deprioritized,
    ProgressionSkipBalancing,
    ProgressionDeprioritized,
    ProgressionDeprioritizedSkipBalancing,
}

impl ItemClassification {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "filler" => Some(Self::Filler),
            "progression" => Some(Self::Progression),
            "useful" => Some(Self::Useful),
            "trap" => Some(Self::Trap),
            "skipbalancing" | "skip_balancing" => Some(Self::SkipBalancing),
            "deprioritized" => Some(Self::Deprioritized),
            "progression_skip_balancing" => Some(Self::ProgressionSkipBalancing),
            "progression_deprioritized" => Some(Self::ProgressionDeprioritized),
            "progression_deprioritized_skip_balancing" => {
                Some(Self::ProgressionDeprioritizedSkipBalancing)
            }
            _ => None,
        }
    }

    pub fn is_progression(self) -> bool {
        matches!(
            self,
            Self::Progression
                | Self::ProgressionSkipBalancing
                | Self::ProgressionDeprioritized
                | Self::ProgressionDeprioritizedSkipBalancing
        )
    }

    pub fn is_filler(self) -> bool {
        matches!(self, Self::Filler)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LocationProgress {
    #[default]
    Default,
    Priority,
    Excluded,
}

impl LocationProgress {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "priority" => Some(Self::Priority),
            "excluded" => Some(Self::Excluded),
            _ => None,
        }
    }
}

/// The target engine's native "which item, how many" pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ContentGrant {
    pub content_id: u32,
    pub content_num: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tags(tags.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn extend(&mut self, other: &Tags) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Where inside an asset a patch lands.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Pointer {
    /// `/Mnemonics/[N]` inside a named script.
    Mnemonic(usize),
    /// Any other json pointer, e.g. `/layers/[0]/objects/[3]/properties`.
    Property(String),
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointer::Mnemonic(index) => write!(f, "/Mnemonics/[{}]", index),
            Pointer::Property(path) => f.write_str(path),
        }
    }
}

impl Pointer {
    pub fn parse(text: &str) -> Option<Pointer> {
        if !text.starts_with('/') {
            return None;
        }
        if let Some(rest) = text.strip_prefix("/Mnemonics/[") {
            let digits = rest.strip_suffix(']')?;
            return digits.parse::<usize>().ok().map(Pointer::Mnemonic);
        }
        Some(Pointer::Property(text.to_string()))
    }
}

/// `<file-path>:<structural-pointer>`; identifies one array element inside a
/// script or resource file.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AssetAddress {
    pub asset: String,
    pub pointer: Pointer,
}

impl AssetAddress {
    pub fn parse(text: &str) -> Option<AssetAddress> {
        let (asset, pointer) = text.split_once(':')?;
        if asset.is_empty() {
            return None;
        }
        Some(AssetAddress {
            asset: asset.to_string(),
            pointer: Pointer::parse(pointer)?,
        })
    }

    /// Static property blocks (`entity_default`) are plain treasure data and
    /// can only carry simple item grants.
    pub fn is_static_property(&self) -> bool {
        matches!(self.pointer, Pointer::Property(_))
            && self.asset.rsplit('/').next() == Some(STATIC_PROPERTY_FILE)
    }

    pub fn mnemonic_index(&self) -> Option<usize> {
        match self.pointer {
            Pointer::Mnemonic(index) => Some(index),
            Pointer::Property(_) => None,
        }
    }
}

impl fmt::Display for AssetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset, self.pointer)
    }
}

#[derive(Clone, Debug)]
pub struct Item {
    pub name: String,
    /// `None` for event items, which never leave the logic graph.
    pub id: Option<ItemId>,
    pub classification: ItemClassification,
    pub tags: Tags,
    /// Native subroutine invoked instead of a plain grant (job unlocks).
    pub sys_call: Option<String>,
    pub bundle: Option<ContentGrant>,
}

impl Item {
    pub fn is_event(&self) -> bool {
        self.id.is_none()
    }

    pub fn grant(&self) -> Option<ContentGrant> {
        if let Some(bundle) = self.bundle {
            return Some(bundle);
        }
        self.id.map(|id| ContentGrant {
            content_id: id.0,
            content_num: 1,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Location {
    pub name: String,
    /// `None` marks an event location.
    pub id: Option<LocationId>,
    pub region: RegionIdx,
    pub progress: LocationProgress,
    pub original_item: Option<ItemIdx>,
    pub event_item: Option<ItemIdx>,
    /// Own tags plus the tags inherited from the region.
    pub tags: Tags,
    /// Empty when the patch target is not known yet.
    pub addresses: Vec<AssetAddress>,
    /// Label of the placeholder instruction at script addresses.
    pub label: Option<String>,
    pub rule: Option<RuleIdx>,
}

impl Location {
    pub fn is_event(&self) -> bool {
        self.id.is_none()
    }

    /// Filler-only when any copy of the check lives in a static property block.
    pub fn filler_only(&self) -> bool {
        self.addresses.iter().any(AssetAddress::is_static_property)
    }

    pub fn accepts(&self, classification: ItemClassification) -> bool {
        if classification.is_filler() {
            return true;
        }
        if self.filler_only() {
            return false;
        }
        !(classification.is_progression() && self.progress == LocationProgress::Excluded)
    }
}

#[derive(Clone, Debug)]
pub struct Region {
    pub name: String,
    pub tags: Tags,
    pub locations: Vec<LocIdx>,
}

#[derive(Clone, Debug)]
pub struct Connection {
    pub from: RegionIdx,
    pub to: RegionIdx,
    pub rule: Option<RuleIdx>,
}

#[derive(Clone, Debug)]
pub enum MessageValue {
    Text(String),
    /// Rendered as "Found A, B, and C" from the items placed at these locations.
    Found(Vec<LocIdx>),
}

#[derive(Clone, Debug)]
pub struct Victory {
    pub region: RegionIdx,
    pub location: LocIdx,
    pub item: ItemIdx,
}

/// Immutable description of one game. Only `validate::build_catalog` creates
/// one, so every invariant the validator checks holds for the whole run.
#[derive(Clone, Debug)]
pub struct Catalog {
    pub(crate) items: Vec<Item>,
    pub(crate) locations: Vec<Location>,
    pub(crate) regions: Vec<Region>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) rules: RuleRegistry,
    pub(crate) item_by_name: HashMap<String, ItemIdx>,
    pub(crate) location_by_name: HashMap<String, LocIdx>,
    pub(crate) region_by_name: HashMap<String, RegionIdx>,
    pub(crate) start_region: RegionIdx,
    pub(crate) victory: Victory,
    pub(crate) game_patches: Vec<String>,
    pub(crate) story_messages: Vec<(String, MessageValue)>,
    pub(crate) nameplates: Vec<(String, String)>,
}

impl Catalog {
    pub fn item(&self, idx: ItemIdx) -> &Item {
        &self.items[idx.0]
    }

    pub fn location(&self, idx: LocIdx) -> &Location {
        &self.locations[idx.0]
    }

    pub fn region(&self, idx: RegionIdx) -> &Region {
        &self.regions[idx.0]
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemIdx, &Item)> {
        self.items.iter().enumerate().map(|(i, item)| (ItemIdx(i), item))
    }

    pub fn locations(&self) -> impl Iterator<Item = (LocIdx, &Location)> {
        self.locations
            .iter()
            .enumerate()
            .map(|(i, loc)| (LocIdx(i), loc))
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionIdx, &Region)> {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, region)| (RegionIdx(i), region))
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn item_named(&self, name: &str) -> Option<ItemIdx> {
        self.item_by_name.get(name).copied()
    }

    pub fn location_named(&self, name: &str) -> Option<LocIdx> {
        self.location_by_name.get(name).copied()
    }

    pub fn region_named(&self, name: &str) -> Option<RegionIdx> {
        self.region_by_name.get(name).copied()
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn start_region(&self) -> RegionIdx {
        self.start_region
    }

    pub fn victory(&self) -> &Victory {
        &self.victory
    }

    pub fn game_patches(&self) -> &[String] {
        &self.game_patches
    }

    pub fn story_messages(&self) -> &[(String, MessageValue)] {
        &self.story_messages
    }

    pub fn nameplates(&self) -> &[(String, String)] {
        &self.nameplates
    }
}

// Authoring-side form of the catalog. Everything is still stringly typed
// here; `validate::build_catalog` resolves it into a `Catalog`.

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogSource {
    pub items: Vec<ItemSource>,
    pub regions: Vec<RegionSource>,
    pub connections: Vec<ConnectionSource>,
    #[serde(default)]
    pub rules: BTreeMap<String, RuleSource>,
    /// Location tag -> name of the rule every location with that tag needs.
    #[serde(default)]
    pub tag_rules: BTreeMap<String, String>,
    pub start_region: String,
    #[serde(default)]
    pub game_patches: Vec<String>,
    #[serde(default)]
    pub story_messages: Vec<MessageSource>,
    #[serde(default)]
    pub nameplates: Vec<NameplateSource>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemSource {
    pub name: String,
    pub id: u32,
    pub classification: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_call: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<ContentGrant>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionSource {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub locations: Vec<LocationSource>,
}

/// A check (`id` + `original_item`) or, when `id` is absent, an event
/// location carrying `event_item`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocationSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Original item name; a leading `!` marks the location Priority and a
    /// leading `#` marks it Excluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_item: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl LocationSource {
    /// Original item name without its progress marker.
    pub fn original_item_name(&self) -> Option<&str> {
        self.original_item
            .as_deref()
            .map(|name| name.strip_prefix(['!', '#']).unwrap_or(name))
    }

    pub fn marked_progress(&self) -> Option<LocationProgress> {
        let name = self.original_item.as_deref()?;
        if name.starts_with('!') {
            Some(LocationProgress::Priority)
        } else if name.starts_with('#') {
            Some(LocationProgress::Excluded)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionSource {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Has(String),
    HasTagged { tag: String, count: u32 },
    All(Vec<RuleSource>),
    /// Reference to another named rule.
    Rule(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageValueSource {
    Text(String),
    Found(Vec<String>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageSource {
    pub key: String,
    pub value: MessageValueSource,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NameplateSource {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_address() {
        let addr = AssetAddress::parse(
            "Assets/GameAssets/Serial/Res/Map/Map_30041/Map_30041_8/sc_e_0017:/Mnemonics/[8]",
        )
        .unwrap();
        assert_eq!(
            addr.asset,
            "Assets/GameAssets/Serial/Res/Map/Map_30041/Map_30041_8/sc_e_0017"
        );
        assert_eq!(addr.pointer, Pointer::Mnemonic(8));
        assert!(!addr.is_static_property());
    }

    #[test]
    fn parses_property_address() {
        let text = "Assets/GameAssets/Serial/Res/Map/Map_20011/Map_20011_1/entity_default:/layers/[0]/objects/[2]/properties";
        let addr = AssetAddress::parse(text).unwrap();
        assert!(addr.is_static_property());
        assert_eq!(addr.to_string(), text);
    }

    #[test]
    fn property_outside_entity_default_is_not_static() {
        let addr = AssetAddress::parse(
            "Assets/GameAssets/Serial/Res/Map/Map_20231/Map_20231_4/ev_e_0224:/layers/[0]/objects/[1]/properties",
        )
        .unwrap();
        assert!(matches!(addr.pointer, Pointer::Property(_)));
        assert!(!addr.is_static_property());

        let addr = AssetAddress::parse("Assets/x/not_entity_default:/layers/[0]/objects/[1]/properties").unwrap();
        assert!(!addr.is_static_property());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(AssetAddress::parse(UNKNOWN_ADDRESS).is_none());
        assert!(AssetAddress::parse("Assets/x/sc_e_0017").is_none());
        assert!(AssetAddress::parse("Assets/x/sc_e_0017:/Mnemonics/[abc]").is_none());
        assert!(AssetAddress::parse(":/Mnemonics/[1]").is_none());
    }

    #[test]
    fn original_item_markers() {
        let loc = LocationSource {
            name: "Shard".to_string(),
            original_item: Some("!Job: Knight".to_string()),
            ..LocationSource::default()
        };
        assert_eq!(loc.original_item_name(), Some("Job: Knight"));
        assert_eq!(loc.marked_progress(), Some(LocationProgress::Priority));

        let loc = LocationSource {
            original_item: Some("#Potion".to_string()),
            ..loc
        };
        assert_eq!(loc.original_item_name(), Some("Potion"));
        assert_eq!(loc.marked_progress(), Some(LocationProgress::Excluded));
    }

    #[test]
    fn classification_parsing_is_case_insensitive() {
        assert_eq!(
            ItemClassification::parse("Progression"),
            Some(ItemClassification::Progression)
        );
        assert_eq!(
            ItemClassification::parse("progression_skip_balancing"),
            Some(ItemClassification::ProgressionSkipBalancing)
        );
        assert_eq!(ItemClassification::parse("Legendary"), None);
        assert_eq!(LocationProgress::parse("EXCLUDED"), Some(LocationProgress::Excluded));
    }
}
