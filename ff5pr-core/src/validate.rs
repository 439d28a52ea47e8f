use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::{debug, info};
use thiserror::Error;

use crate::catalog::{
    tag, AssetAddress, Catalog, CatalogSource, Connection, Item, ItemClassification, ItemId,
    ItemIdx, LocIdx, Location, LocationId, LocationProgress, MessageValue, MessageValueSource,
    Region, RegionIdx, RuleSource, Tags, Victory, UNKNOWN_ADDRESS,
};
use crate::ids::RANGE_WIDTH;
use crate::logic::{Rule, RuleIdx, RuleRegistry};
use crate::MultiworldPolicy;

/// One integrity problem in a catalog source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogDefect {
    #[error("duplicate item name '{0}'")]
    DuplicateItemName(String),

    #[error("items '{first}' and '{second}' share id {id}")]
    DuplicateItemId { id: u32, first: String, second: String },

    #[error("duplicate location name '{0}'")]
    DuplicateLocationName(String),

    #[error("locations '{first}' and '{second}' share id {id}")]
    DuplicateLocationId { id: u32, first: String, second: String },

    #[error("duplicate region name '{0}'")]
    DuplicateRegionName(String),

    #[error("item '{item}' has invalid classification '{value}'")]
    InvalidItemClassification { item: String, value: String },

    #[error("location '{location}' has invalid progress classification '{value}'")]
    InvalidLocationProgress { location: String, value: String },

    #[error("{kind} '{name}' has id {id}, which does not fit below {width}")]
    IdOutOfRange {
        kind: &'static str,
        name: String,
        id: u32,
        width: u64,
    },

    #[error("item '{item}' grants a count equal to the multiworld sentinel {sentinel}")]
    SentinelCollision { item: String, sentinel: u32 },

    #[error("location '{location}' has no original item")]
    MissingOriginalItem { location: String },

    #[error("location '{location}' names unknown original item '{item}'")]
    UnknownOriginalItem { location: String, item: String },

    #[error("event location '{location}' has no event item")]
    EventWithoutItem { location: String },

    #[error("event item '{item}' clashes with a real item of the same name")]
    EventItemClash { item: String },

    #[error("location '{location}' has malformed asset address '{address}'")]
    InvalidAddress { location: String, address: String },

    #[error("location '{location}' has property address '{address}' outside an entity_default treasure file")]
    UnsupportedAddress { location: String, address: String },

    #[error("locations '{first}' and '{second}' both patch '{address}'")]
    DuplicateAddress {
        address: String,
        first: String,
        second: String,
    },

    #[error("location '{location}' patches script address '{address}' but has no placeholder label")]
    MissingLabel { location: String, address: String },

    #[error("connection {from} -> {to} references unknown region '{missing}'")]
    UnknownConnectionRegion {
        from: String,
        to: String,
        missing: String,
    },

    #[error("unknown start region '{0}'")]
    UnknownStartRegion(String),

    #[error("{context} references unknown rule '{rule}'")]
    UnknownRule { context: String, rule: String },

    #[error("rule '{rule}' references unknown item '{item}'")]
    UnknownRuleItem { rule: String, item: String },

    #[error("rule '{rule}' references tag '{tag}', which no item carries")]
    UnknownRuleTag { rule: String, tag: String },

    #[error("rule '{0}' refers back to itself")]
    RuleCycle(String),

    #[error("no event location is tagged {}", tag::COMPLETION_CONDITION)]
    MissingCompletionEvent,

    #[error("more than one completion event: {0:?}")]
    MultipleCompletionEvents(Vec<String>),

    #[error("message '{key}' lists unknown or event location '{location}'")]
    UnknownMessageLocation { key: String, location: String },
}

/// Every defect found in one validation pass. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDefects(pub Vec<CatalogDefect>);

impl fmt::Display for CatalogDefects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog has {} defect(s):", self.0.len())?;
        for defect in &self.0 {
            write!(f, "\n  - {}", defect)?;
        }
        Ok(())
    }
}

impl std::error::Error for CatalogDefects {}

impl CatalogDefects {
    pub fn iter(&self) -> impl Iterator<Item = &CatalogDefect> {
        self.0.iter()
    }
}

struct RuleCompiler<'s> {
    sources: &'s BTreeMap<String, RuleSource>,
    items: &'s [Item],
    item_by_name: &'s HashMap<String, ItemIdx>,
    registry: RuleRegistry,
    in_progress: Vec<String>,
    defects: Vec<CatalogDefect>,
}

impl<'s> RuleCompiler<'s> {
    fn named(&mut self, name: &str, context: &str) -> Option<RuleIdx> {
        if let Some(idx) = self.registry.lookup(name) {
            return Some(idx);
        }
        if self.in_progress.iter().any(|n| n == name) {
            self.defects.push(CatalogDefect::RuleCycle(name.to_string()));
            return None;
        }
        let Some(source) = self.sources.get(name) else {
            self.defects.push(CatalogDefect::UnknownRule {
                context: context.to_string(),
                rule: name.to_string(),
            });
            return None;
        };

        self.in_progress.push(name.to_string());
        let compiled = self.compile(name, source);
        self.in_progress.pop();

        compiled.map(|rule| self.registry.insert(name, rule))
    }

    fn compile(&mut self, name: &str, source: &RuleSource) -> Option<Rule> {
        match source {
            RuleSource::Has(item) => match self.item_by_name.get(item) {
                Some(&idx) => Some(Rule::Has(idx)),
                None => {
                    self.defects.push(CatalogDefect::UnknownRuleItem {
                        rule: name.to_string(),
                        item: item.clone(),
                    });
                    None
                }
            },
            RuleSource::HasTagged { tag, count } => {
                let items: Vec<ItemIdx> = self
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.tags.contains(tag))
                    .map(|(i, _)| ItemIdx(i))
                    .collect();
                if items.is_empty() {
                    self.defects.push(CatalogDefect::UnknownRuleTag {
                        rule: name.to_string(),
                        tag: tag.clone(),
                    });
                    return None;
                }
                Some(Rule::HasAtLeast {
                    tag: tag.clone(),
                    items,
                    count: *count,
                })
            }
            RuleSource::All(parts) => {
                // Compile every part so all defects get reported.
                let compiled: Vec<Option<Rule>> =
                    parts.iter().map(|part| self.compile(name, part)).collect();
                compiled.into_iter().collect::<Option<Vec<_>>>().map(Rule::All)
            }
            RuleSource::Rule(other) => {
                let context = format!("rule '{}'", name);
                let idx = self.named(other, &context)?;
                Some(self.registry.get(idx).clone())
            }
        }
    }
}

/// Check a catalog source and resolve it into an immutable `Catalog`.
///
/// All checks run to completion; the returned `CatalogDefects` lists every
/// problem found, not just the first.
pub fn build_catalog(
    source: &CatalogSource,
    policy: &MultiworldPolicy,
) -> Result<Catalog, CatalogDefects> {
    let mut defects = Vec::new();
    let sentinel = policy.foreign_sentinel;

    // Items
    let mut items: Vec<Item> = Vec::with_capacity(source.items.len());
    let mut item_by_name: HashMap<String, ItemIdx> = HashMap::new();
    let mut item_ids: HashMap<u32, String> = HashMap::new();

    for src in &source.items {
        if item_by_name.contains_key(&src.name) {
            defects.push(CatalogDefect::DuplicateItemName(src.name.clone()));
        }
        if let Some(first) = item_ids.get(&src.id) {
            defects.push(CatalogDefect::DuplicateItemId {
                id: src.id,
                first: first.clone(),
                second: src.name.clone(),
            });
        } else {
            item_ids.insert(src.id, src.name.clone());
        }
        if u64::from(src.id) >= RANGE_WIDTH {
            defects.push(CatalogDefect::IdOutOfRange {
                kind: "item",
                name: src.name.clone(),
                id: src.id,
                width: RANGE_WIDTH,
            });
        }

        let classification = match ItemClassification::parse(&src.classification) {
            Some(c) => c,
            None => {
                defects.push(CatalogDefect::InvalidItemClassification {
                    item: src.name.clone(),
                    value: src.classification.clone(),
                });
                ItemClassification::Filler
            }
        };

        let item = Item {
            name: src.name.clone(),
            id: Some(ItemId(src.id)),
            classification,
            tags: Tags::new(src.tags.iter().cloned()),
            sys_call: src.sys_call.clone(),
            bundle: src.bundle,
        };
        if item.grant().is_some_and(|g| g.content_num == sentinel) {
            defects.push(CatalogDefect::SentinelCollision {
                item: src.name.clone(),
                sentinel,
            });
        }

        item_by_name
            .entry(src.name.clone())
            .or_insert(ItemIdx(items.len()));
        items.push(item);
    }
    let real_item_count = items.len();

    // Event items get appended behind the real ones.
    for region in &source.regions {
        for loc in &region.locations {
            if loc.id.is_some() {
                continue;
            }
            let Some(event_item) = &loc.event_item else {
                continue;
            };
            match item_by_name.get(event_item) {
                Some(idx) if idx.0 < real_item_count => {
                    defects.push(CatalogDefect::EventItemClash {
                        item: event_item.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    item_by_name.insert(event_item.clone(), ItemIdx(items.len()));
                    items.push(Item {
                        name: event_item.clone(),
                        id: None,
                        classification: ItemClassification::Progression,
                        tags: Tags::default(),
                        sys_call: None,
                        bundle: None,
                    });
                }
            }
        }
    }

    // Rules
    let mut rules = RuleCompiler {
        sources: &source.rules,
        items: &items,
        item_by_name: &item_by_name,
        registry: RuleRegistry::default(),
        in_progress: Vec::new(),
        defects: Vec::new(),
    };
    for name in source.rules.keys() {
        rules.named(name, "rule table");
    }
    let mut tag_rules: Vec<(&str, RuleIdx)> = Vec::new();
    for (tag_name, rule_name) in &source.tag_rules {
        let context = format!("tag rule for '{}'", tag_name);
        if let Some(idx) = rules.named(rule_name, &context) {
            tag_rules.push((tag_name.as_str(), idx));
        }
    }

    // Regions and locations
    let mut regions: Vec<Region> = Vec::with_capacity(source.regions.len());
    let mut region_by_name: HashMap<String, RegionIdx> = HashMap::new();
    let mut locations: Vec<Location> = Vec::new();
    let mut location_by_name: HashMap<String, LocIdx> = HashMap::new();
    let mut location_ids: HashMap<u32, String> = HashMap::new();
    let mut address_owners: HashMap<AssetAddress, String> = HashMap::new();
    let mut completion_events: Vec<(RegionIdx, LocIdx, ItemIdx)> = Vec::new();

    for region_src in &source.regions {
        let region_idx = RegionIdx(regions.len());
        if region_by_name.contains_key(&region_src.name) {
            defects.push(CatalogDefect::DuplicateRegionName(region_src.name.clone()));
        } else {
            region_by_name.insert(region_src.name.clone(), region_idx);
        }
        let region_tags = Tags::new(region_src.tags.iter().cloned());
        let mut region_locations = Vec::with_capacity(region_src.locations.len());

        for src in &region_src.locations {
            let loc_idx = LocIdx(locations.len());
            if location_by_name.contains_key(&src.name) {
                defects.push(CatalogDefect::DuplicateLocationName(src.name.clone()));
            } else {
                location_by_name.insert(src.name.clone(), loc_idx);
            }

            let mut tags = Tags::new(src.tags.iter().cloned());
            tags.extend(&region_tags);

            let mut location = Location {
                name: src.name.clone(),
                id: src.id.map(LocationId),
                region: region_idx,
                progress: LocationProgress::Default,
                original_item: None,
                event_item: None,
                tags,
                addresses: Vec::new(),
                label: src.label.clone(),
                rule: None,
            };

            match src.id {
                None => match &src.event_item {
                    Some(event_item) => {
                        location.event_item = item_by_name.get(event_item).copied();
                        if let Some(item) = location.event_item {
                            if location.tags.contains(tag::COMPLETION_CONDITION) {
                                completion_events.push((region_idx, loc_idx, item));
                            }
                        }
                    }
                    None => defects.push(CatalogDefect::EventWithoutItem {
                        location: src.name.clone(),
                    }),
                },
                Some(id) => {
                    if let Some(first) = location_ids.get(&id) {
                        defects.push(CatalogDefect::DuplicateLocationId {
                            id,
                            first: first.clone(),
                            second: src.name.clone(),
                        });
                    } else {
                        location_ids.insert(id, src.name.clone());
                    }
                    if u64::from(id) >= RANGE_WIDTH {
                        defects.push(CatalogDefect::IdOutOfRange {
                            kind: "location",
                            name: src.name.clone(),
                            id,
                            width: RANGE_WIDTH,
                        });
                    }

                    match src.original_item_name() {
                        None => defects.push(CatalogDefect::MissingOriginalItem {
                            location: src.name.clone(),
                        }),
                        Some(name) => match item_by_name.get(name) {
                            Some(&idx) if idx.0 < real_item_count => {
                                location.original_item = Some(idx);
                            }
                            _ => defects.push(CatalogDefect::UnknownOriginalItem {
                                location: src.name.clone(),
                                item: name.to_string(),
                            }),
                        },
                    }

                    if let Some(value) = &src.progress {
                        match LocationProgress::parse(value) {
                            Some(progress) => location.progress = progress,
                            None => defects.push(CatalogDefect::InvalidLocationProgress {
                                location: src.name.clone(),
                                value: value.clone(),
                            }),
                        }
                    }
                    if let Some(progress) = src.marked_progress() {
                        location.progress = progress;
                    }
                    if location.tags.contains(tag::CHEST) {
                        location.progress = LocationProgress::Excluded;
                    }

                    for text in &src.addresses {
                        if text == UNKNOWN_ADDRESS {
                            debug!("location '{}' has an unknown patch target", src.name);
                            continue;
                        }
                        match AssetAddress::parse(text) {
                            Some(address) => {
                                if address.mnemonic_index().is_some() && src.label.is_none() {
                                    defects.push(CatalogDefect::MissingLabel {
                                        location: src.name.clone(),
                                        address: text.clone(),
                                    });
                                }
                                if address.mnemonic_index().is_none() && !address.is_static_property() {
                                    defects.push(CatalogDefect::UnsupportedAddress {
                                        location: src.name.clone(),
                                        address: text.clone(),
                                    });
                                }
                                match address_owners.get(&address) {
                                    Some(first) if *first != src.name => {
                                        defects.push(CatalogDefect::DuplicateAddress {
                                            address: text.clone(),
                                            first: first.clone(),
                                            second: src.name.clone(),
                                        });
                                    }
                                    Some(_) => {}
                                    None => {
                                        address_owners.insert(address.clone(), src.name.clone());
                                    }
                                }
                                location.addresses.push(address);
                            }
                            None => defects.push(CatalogDefect::InvalidAddress {
                                location: src.name.clone(),
                                address: text.clone(),
                            }),
                        }
                    }
                }
            }

            let needed: Vec<RuleIdx> = tag_rules
                .iter()
                .filter(|(tag_name, _)| location.tags.contains(tag_name))
                .map(|&(_, idx)| idx)
                .collect();
            location.rule = match needed.as_slice() {
                [] => None,
                [single] => Some(*single),
                many => {
                    let combined =
                        Rule::All(many.iter().map(|&idx| rules.registry.get(idx).clone()).collect());
                    Some(rules.registry.insert(&format!("tags of {}", src.name), combined))
                }
            };

            region_locations.push(loc_idx);
            locations.push(location);
        }

        regions.push(Region {
            name: region_src.name.clone(),
            tags: region_tags,
            locations: region_locations,
        });
    }

    // Connections
    let mut connections = Vec::with_capacity(source.connections.len());
    for src in &source.connections {
        let from = region_by_name.get(&src.from).copied();
        let to = region_by_name.get(&src.to).copied();
        for (name, found) in [(&src.from, from), (&src.to, to)] {
            if found.is_none() {
                defects.push(CatalogDefect::UnknownConnectionRegion {
                    from: src.from.clone(),
                    to: src.to.clone(),
                    missing: name.clone(),
                });
            }
        }
        let rule = match &src.rule {
            Some(rule_name) => {
                let context = format!("connection {} -> {}", src.from, src.to);
                match rules.named(rule_name, &context) {
                    Some(idx) => Some(idx),
                    None => continue,
                }
            }
            None => None,
        };
        if let (Some(from), Some(to)) = (from, to) {
            connections.push(Connection { from, to, rule });
        }
    }

    let start_region = region_by_name.get(&source.start_region).copied();
    if start_region.is_none() {
        defects.push(CatalogDefect::UnknownStartRegion(source.start_region.clone()));
    }

    let victory = match completion_events.as_slice() {
        [] => {
            defects.push(CatalogDefect::MissingCompletionEvent);
            None
        }
        [(region, location, item)] => Some(Victory {
            region: *region,
            location: *location,
            item: *item,
        }),
        many => {
            defects.push(CatalogDefect::MultipleCompletionEvents(
                many.iter()
                    .map(|(_, loc, _)| locations[loc.0].name.clone())
                    .collect(),
            ));
            None
        }
    };

    // Messages
    let mut story_messages = Vec::with_capacity(source.story_messages.len());
    for msg in &source.story_messages {
        let value = match &msg.value {
            MessageValueSource::Text(text) => MessageValue::Text(text.clone()),
            MessageValueSource::Found(names) => {
                let mut found = Vec::with_capacity(names.len());
                for name in names {
                    match location_by_name.get(name) {
                        Some(&idx) if !locations[idx.0].is_event() => found.push(idx),
                        _ => defects.push(CatalogDefect::UnknownMessageLocation {
                            key: msg.key.clone(),
                            location: name.clone(),
                        }),
                    }
                }
                MessageValue::Found(found)
            }
        };
        story_messages.push((msg.key.clone(), value));
    }
    let nameplates = source
        .nameplates
        .iter()
        .map(|n| (n.key.clone(), n.value.clone()))
        .collect();

    // Shared rules get compiled from several places; report each problem once.
    for defect in rules.defects {
        if !defects.contains(&defect) {
            defects.push(defect);
        }
    }
    let registry = rules.registry;

    match (start_region, victory) {
        (Some(start_region), Some(victory)) if defects.is_empty() => {
            info!(
                "catalog ok: {} items, {} locations, {} regions, {} connections, {} rules",
                real_item_count,
                locations.len(),
                regions.len(),
                connections.len(),
                registry.len()
            );
            Ok(Catalog {
                items,
                locations,
                regions,
                connections,
                rules: registry,
                item_by_name,
                location_by_name,
                region_by_name,
                start_region,
                victory,
                game_patches: source.game_patches.clone(),
                story_messages,
                nameplates,
            })
        }
        _ => Err(CatalogDefects(defects)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConnectionSource, ItemSource, LocationSource, RegionSource};

    fn item(name: &str, id: u32, classification: &str) -> ItemSource {
        ItemSource {
            name: name.to_string(),
            id,
            classification: classification.to_string(),
            tags: Vec::new(),
            sys_call: None,
            bundle: None,
        }
    }

    fn check(name: &str, id: u32, original: &str) -> LocationSource {
        LocationSource {
            name: name.to_string(),
            id: Some(id),
            original_item: Some(original.to_string()),
            ..LocationSource::default()
        }
    }

    fn base_source() -> CatalogSource {
        CatalogSource {
            items: vec![item("Tent", 12, "Filler"), item("Key", 40, "Progression")],
            regions: vec![
                RegionSource {
                    name: "Start".to_string(),
                    tags: Vec::new(),
                    locations: vec![LocationSource {
                        name: "Win".to_string(),
                        event_item: Some("Victory".to_string()),
                        tags: vec!["CompletionCondition".to_string()],
                        ..LocationSource::default()
                    }],
                },
                RegionSource {
                    name: "Vault".to_string(),
                    tags: vec!["Dungeon".to_string()],
                    locations: vec![check("Vault Chest", 1, "Tent")],
                },
            ],
            connections: vec![ConnectionSource {
                from: "Start".to_string(),
                to: "Vault".to_string(),
                rule: None,
            }],
            start_region: "Start".to_string(),
            ..CatalogSource::default()
        }
    }

    fn defects_of(source: &CatalogSource) -> Vec<CatalogDefect> {
        match build_catalog(source, &MultiworldPolicy::default()) {
            Ok(_) => Vec::new(),
            Err(defects) => defects.0,
        }
    }

    #[test]
    fn accepts_a_consistent_catalog() {
        let catalog = build_catalog(&base_source(), &MultiworldPolicy::default()).unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();
        assert!(catalog.location(chest).tags.contains("Dungeon"));
        assert_eq!(catalog.item(catalog.victory().item).name, "Victory");
        assert!(catalog.item(catalog.victory().item).is_event());
    }

    #[test]
    fn reports_duplicate_item_id_by_name() {
        let mut source = base_source();
        source.items.push(item("Potion", 12, "Filler"));
        let defects = defects_of(&source);
        assert!(defects.iter().any(|d| matches!(
            d,
            CatalogDefect::DuplicateItemId { id: 12, second, .. } if second == "Potion"
        )));
    }

    #[test]
    fn reports_duplicate_location_id() {
        let mut source = base_source();
        source.regions[1]
            .locations
            .push(check("Vault Shelf", 1, "Tent"));
        let defects = defects_of(&source);
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::DuplicateLocationId { id: 1, .. })));
    }

    #[test]
    fn reports_every_defect_in_one_pass() {
        let mut source = base_source();
        source.items.push(item("Ether", 12, "Shiny"));
        source.regions[1]
            .locations
            .push(check("Vault Shelf", 2, "Excalibur"));
        source.connections.push(ConnectionSource {
            from: "Vault".to_string(),
            to: "Moon".to_string(),
            rule: Some("require_moon_key".to_string()),
        });

        let defects = defects_of(&source);
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::DuplicateItemId { .. })));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::InvalidItemClassification { .. })));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::UnknownOriginalItem { item, .. } if item == "Excalibur")));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::UnknownConnectionRegion { missing, .. } if missing == "Moon")));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::UnknownRule { rule, .. } if rule == "require_moon_key")));
    }

    #[test]
    fn reports_invalid_progress_and_address_problems() {
        let mut source = base_source();
        let loc = &mut source.regions[1].locations[0];
        loc.progress = Some("Mandatory".to_string());
        loc.addresses = vec![
            "Assets/Map/sc_e_0001:/Mnemonics/[3]".to_string(),
            "no-pointer-here".to_string(),
            UNKNOWN_ADDRESS.to_string(),
        ];

        let defects = defects_of(&source);
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::InvalidLocationProgress { .. })));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::MissingLabel { .. })));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::InvalidAddress { address, .. } if address == "no-pointer-here")));
        assert_eq!(defects.len(), 3);
    }

    #[test]
    fn property_address_must_be_entity_default() {
        let mut source = base_source();
        let address =
            "Assets/GameAssets/Serial/Res/Map/Map_20231/Map_20231_4/ev_e_0224:/layers/[0]/objects/[1]/properties";
        source.regions[1].locations[0].addresses = vec![address.to_string()];
        assert_eq!(
            defects_of(&source),
            vec![CatalogDefect::UnsupportedAddress {
                location: "Vault Chest".to_string(),
                address: address.to_string(),
            }]
        );
    }

    #[test]
    fn reports_two_locations_patching_one_address() {
        let mut source = base_source();
        let address =
            "Assets/GameAssets/Serial/Res/Map/Map_20011/Map_20011_1/entity_default:/layers/[0]/objects/[3]/properties";
        source.regions[1].locations[0].addresses = vec![address.to_string()];
        let mut shelf = check("Vault Shelf", 2, "Tent");
        shelf.addresses = vec![address.to_string()];
        source.regions[1].locations.push(shelf);

        assert_eq!(
            defects_of(&source),
            vec![CatalogDefect::DuplicateAddress {
                address: address.to_string(),
                first: "Vault Chest".to_string(),
                second: "Vault Shelf".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_addresses_are_legitimately_absent() {
        let mut source = base_source();
        source.regions[1].locations[0].addresses = vec![UNKNOWN_ADDRESS.to_string()];
        let catalog = build_catalog(&source, &MultiworldPolicy::default()).unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();
        assert!(catalog.location(chest).addresses.is_empty());
    }

    #[test]
    fn requires_exactly_one_completion_event() {
        let mut source = base_source();
        source.regions[0].locations.clear();
        assert_eq!(defects_of(&source), vec![CatalogDefect::MissingCompletionEvent]);
    }

    #[test]
    fn chest_tag_excludes_location() {
        let mut source = base_source();
        source.regions[1].locations[0].tags = vec!["Chest".to_string()];
        source.regions[1].locations[0].original_item = Some("!Tent".to_string());
        let catalog = build_catalog(&source, &MultiworldPolicy::default()).unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();
        assert_eq!(catalog.location(chest).progress, LocationProgress::Excluded);
    }

    #[test]
    fn detects_rule_cycles_and_unknown_rule_items() {
        let mut source = base_source();
        source
            .rules
            .insert("a".to_string(), RuleSource::Rule("b".to_string()));
        source
            .rules
            .insert("b".to_string(), RuleSource::Rule("a".to_string()));
        source
            .rules
            .insert("c".to_string(), RuleSource::Has("Lamp".to_string()));
        let defects = defects_of(&source);
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::RuleCycle(_))));
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::UnknownRuleItem { item, .. } if item == "Lamp")));
    }

    #[test]
    fn tag_rules_gate_tagged_locations() {
        let mut source = base_source();
        source
            .rules
            .insert("require_key".to_string(), RuleSource::Has("Key".to_string()));
        source
            .tag_rules
            .insert("BlockedByFire".to_string(), "require_key".to_string());
        source.regions[1].locations[0].tags = vec!["BlockedByFire".to_string()];
        let catalog = build_catalog(&source, &MultiworldPolicy::default()).unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();
        let rule = catalog.location(chest).rule.unwrap();
        assert_eq!(catalog.rules().name(rule), "require_key");
    }

    #[test]
    fn sentinel_count_is_reserved() {
        let mut source = base_source();
        let policy = MultiworldPolicy::default();
        source.items.push(ItemSource {
            bundle: Some(crate::catalog::ContentGrant {
                content_id: 1,
                content_num: policy.foreign_sentinel,
            }),
            ..item("Lots of Gil", 9000, "Filler")
        });
        let defects = defects_of(&source);
        assert!(defects
            .iter()
            .any(|d| matches!(d, CatalogDefect::SentinelCollision { .. })));
    }

    #[test]
    fn defect_list_displays_every_entry() {
        let defects = CatalogDefects(vec![
            CatalogDefect::DuplicateItemName("Tent".to_string()),
            CatalogDefect::MissingCompletionEvent,
        ]);
        let text = defects.to_string();
        assert!(text.contains("2 defect(s)"));
        assert!(text.contains("duplicate item name 'Tent'"));
        assert!(text.contains("CompletionCondition"));
    }
}
