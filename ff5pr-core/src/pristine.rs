//! Built-in catalog tables for Final Fantasy V (pixel remaster).

use std::collections::BTreeMap;

use crate::catalog::{
    CatalogSource, ConnectionSource, ContentGrant, ItemSource, LocationSource, MessageSource,
    MessageValueSource, NameplateSource, RegionSource, RuleSource, UNKNOWN_ADDRESS,
};
use crate::patch::PropertyRow;

#[derive(Copy, Clone, Debug)]
pub(crate) struct PristineItem {
    pub name: &'static str,
    pub id: u32,
    pub classification: &'static str,
    pub tags: &'static [&'static str],
    pub sys_call: Option<&'static str>,
    pub bundle: Option<(u32, u32)>,
}

const fn item(name: &'static str, id: u32, classification: &'static str, tags: &'static [&'static str]) -> PristineItem {
    PristineItem {
        name,
        id,
        classification,
        tags,
        sys_call: None,
        bundle: None,
    }
}

const fn job(name: &'static str, id: u32, sys_call: &'static str) -> PristineItem {
    PristineItem {
        name,
        id,
        classification: "Progression",
        tags: &["KeyItem", "Job"],
        sys_call: Some(sys_call),
        bundle: None,
    }
}

const fn bundle(name: &'static str, id: u32, tags: &'static [&'static str], grant: (u32, u32)) -> PristineItem {
    PristineItem {
        name,
        id,
        classification: "Filler",
        tags,
        sys_call: None,
        bundle: Some(grant),
    }
}

pub(crate) const PRISTINE_ITEMS: &[PristineItem] = &[
    item("Gil", 1, "Filler", &["Gil"]),
    item("Potion", 2, "Filler", &["Consumable", "HealHP"]),
    item("Phoenix Down", 4, "Filler", &["Consumable", "Revive"]),
    item("Ether", 5, "Filler", &["Consumable", "HealMP"]),
    item("Tent", 12, "Filler", &["FieldItem", "Revive", "HealHP", "HealMP"]),
    item("Leather Shoes", 251, "Filler", &["Armor", "Shoes"]),
    // Content ids from 2000 up are not items to the game; jobs go through SysCall.
    job("Job: Knight", 2000, "ジョブ開放：ナイト"),
    job("Job: Monk", 2001, "ジョブ開放：モンク"),
    job("Job: Thief", 2002, "ジョブ開放：シーフ"),
    job("Job: White Mage", 2003, "ジョブ開放：白魔道士"),
    job("Job: Black Mage", 2004, "ジョブ開放：黒魔道士"),
    job("Job: Blue Mage", 2005, "ジョブ開放：青魔道士"),
    item("W1Teleport", 3000, "Progression", &["KeyItem", "WorldTeleport"]),
    item("Adamantite", 3001, "Progression", &["KeyItem"]),
    item("FireBeGone", 3002, "Progression", &["KeyItem"]),
    bundle("100 Gil", 9000, &["Gil"], (1, 100)),
    bundle("5 Potions", 9001, &["Consumable", "HealHP"], (2, 5)),
];

#[derive(Copy, Clone, Debug)]
pub(crate) enum Address {
    /// Treasure object in a map's `entity_default`.
    EntDef { map: u32, sub_map: u32, object: u32 },
    /// Placeholder instruction inside a map script.
    ScrMnem {
        map: u32,
        sub_map: u32,
        script: &'static str,
        index: usize,
    },
    /// Patch target not found yet.
    Unknown,
}

impl Address {
    fn render(self) -> String {
        match self {
            Address::EntDef { map, sub_map, object } => format!(
                "Assets/GameAssets/Serial/Res/Map/Map_{m}/Map_{m}_{s}/entity_default:/layers/[0]/objects/[{o}]/properties",
                m = map,
                s = sub_map,
                o = object
            ),
            Address::ScrMnem {
                map,
                sub_map,
                script,
                index,
            } => format!(
                "Assets/GameAssets/Serial/Res/Map/Map_{m}/Map_{m}_{s}/{script}:/Mnemonics/[{i}]",
                m = map,
                s = sub_map,
                script = script,
                i = index
            ),
            Address::Unknown => UNKNOWN_ADDRESS.to_string(),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct PristineLocation {
    pub name: &'static str,
    pub id: u32,
    pub original_item: &'static str,
    pub tags: &'static [&'static str],
    pub address: Address,
    pub label: Option<&'static str>,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct PristineEvent {
    pub name: &'static str,
    pub item: &'static str,
    pub tags: &'static [&'static str],
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct PristineRegion {
    pub name: &'static str,
    pub tags: &'static [&'static str],
    pub locations: &'static [PristineLocation],
    pub events: &'static [PristineEvent],
}

const fn tule(name: &'static str, id: u32, original_item: &'static str, sub_map: u32, object: u32) -> PristineLocation {
    PristineLocation {
        name,
        id,
        original_item,
        tags: &["Interior"],
        address: Address::EntDef {
            map: 20011,
            sub_map,
            object,
        },
        label: None,
    }
}

const fn shard(name: &'static str, id: u32, original_item: &'static str, index: usize, label: &'static str) -> PristineLocation {
    PristineLocation {
        name,
        id,
        original_item,
        tags: &["BossRoom"],
        address: Address::ScrMnem {
            map: 30041,
            sub_map: 8,
            script: "sc_e_0017",
            index,
        },
        label: Some(label),
    }
}

pub(crate) const PRISTINE_REGIONS: &[PristineRegion] = &[
    PristineRegion {
        name: "Menu",
        tags: &["Start"],
        locations: &[],
        events: &[],
    },
    PristineRegion {
        name: "World 1",
        tags: &["Overworld"],
        locations: &[],
        events: &[],
    },
    PristineRegion {
        name: "Tule",
        tags: &["Town"],
        locations: &[
            tule("Tule Greenhorns Club 1F Treasure A", 6, "Ether", 1, 0),
            tule("Tule Greenhorns Club 1F Treasure B", 7, "100 Gil", 1, 1),
            tule("Tule Greenhorns Club 1F Treasure C", 8, "Potion", 1, 2),
            tule("Tule Greenhorns Club 1F Treasure D", 9, "Phoenix Down", 1, 3),
            tule("Tule Greenhorns Club 1F Treasure E", 10, "Tent", 1, 4),
            PristineLocation {
                tags: &["Interior", "Battle"],
                ..tule("Tule Greenhorns Club 2F Treasure A", 11, "Leather Shoes", 2, 0)
            },
        ],
        events: &[],
    },
    PristineRegion {
        name: "Pirate Hideout",
        tags: &["Dungeon"],
        locations: &[PristineLocation {
            name: "Pirate Hideout NPC Potions",
            id: 2100,
            original_item: "5 Potions",
            tags: &["NPC"],
            address: Address::ScrMnem {
                map: 30021,
                sub_map: 4,
                script: "sc_npc_30021_4_1",
                index: 6,
            },
            label: Some("PiratePotions"),
        }],
        events: &[],
    },
    PristineRegion {
        name: "Wind Temple",
        tags: &["Dungeon"],
        // Indices are where "Shorter Crystal Cutscenes" leaves its placeholders.
        locations: &[
            shard("Wind Temple Crystal Shard A", 2000, "!Job: Knight", 8, "WindCrystalShard1"),
            shard("Wind Temple Crystal Shard B", 2001, "!Job: Monk", 9, "WindCrystalShard2"),
            shard("Wind Temple Crystal Shard C", 2002, "!Job: Thief", 10, "WindCrystalShard3"),
            shard("Wind Temple Crystal Shard D", 2003, "!Job: White Mage", 11, "WindCrystalShard4"),
            shard("Wind Temple Crystal Shard E", 2004, "!Job: Black Mage", 12, "WindCrystalShard5"),
            shard("Wind Temple Crystal Shard F", 2005, "!Job: Blue Mage", 13, "WindCrystalShard6"),
        ],
        events: &[],
    },
    PristineRegion {
        name: "Tycoon Meteor",
        tags: &["Dungeon"],
        locations: &[PristineLocation {
            name: "Tycoon Meteor Adamantite",
            id: 2200,
            original_item: "Adamantite",
            tags: &["Event"],
            address: Address::Unknown,
            label: None,
        }],
        events: &[],
    },
    PristineRegion {
        name: "Karnak",
        tags: &["Town"],
        locations: &[
            PristineLocation {
                name: "Karnak Fire Ship Event",
                id: 2300,
                original_item: "FireBeGone",
                tags: &["Event"],
                address: Address::Unknown,
                label: None,
            },
            PristineLocation {
                name: "Karnak Castle Treasure A",
                id: 2301,
                original_item: "Phoenix Down",
                tags: &["Interior", BLOCKED_BY_FIRE],
                address: Address::Unknown,
                label: None,
            },
        ],
        events: &[],
    },
    PristineRegion {
        name: "Final Boss Fight",
        tags: &["End"],
        locations: &[],
        events: &[PristineEvent {
            name: "Defeat Neo Ex-Death",
            item: "Victory",
            tags: &["CompletionCondition"],
        }],
    },
];

/// (from, to, rule)
pub(crate) const PRISTINE_CONNECTIONS: &[(&str, &str, Option<&str>)] = &[
    ("Menu", "World 1", Some("require_world_1_teleport")),
    ("World 1", "Tule", None),
    ("World 1", "Pirate Hideout", None),
    ("World 1", "Wind Temple", None),
    ("World 1", "Tycoon Meteor", None),
    ("World 1", "Karnak", Some("require_adamant")),
    ("Wind Temple", "Final Boss Fight", Some("require_wind_crystal_jobs")),
];

/// Locations behind the Karnak fire; gated by `require_fire_be_gone`.
pub(crate) const BLOCKED_BY_FIRE: &str = "BlockedByFire";

pub(crate) const PRISTINE_GAME_PATCHES: &[&str] = &[
    "Shorter Crystal Cutscenes",
    "Prepare NPC and Boss Event Checks",
];

const WIND_SHARDS_1: &[&str] = &[
    "Wind Temple Crystal Shard A",
    "Wind Temple Crystal Shard B",
    "Wind Temple Crystal Shard C",
];
const WIND_SHARDS_2: &[&str] = &[
    "Wind Temple Crystal Shard D",
    "Wind Temple Crystal Shard E",
    "Wind Temple Crystal Shard F",
];

fn rules() -> BTreeMap<String, RuleSource> {
    BTreeMap::from([
        (
            "require_world_1_teleport".to_string(),
            RuleSource::Has("W1Teleport".to_string()),
        ),
        (
            "require_wind_crystal_jobs".to_string(),
            RuleSource::HasTagged {
                tag: "Job".to_string(),
                count: 6,
            },
        ),
        (
            "require_10_jobs".to_string(),
            RuleSource::HasTagged {
                tag: "Job".to_string(),
                count: 10,
            },
        ),
        (
            "require_adamant".to_string(),
            RuleSource::Has("Adamantite".to_string()),
        ),
        (
            "require_fire_be_gone".to_string(),
            RuleSource::Has("FireBeGone".to_string()),
        ),
    ])
}

fn tag_rules() -> BTreeMap<String, String> {
    BTreeMap::from([(BLOCKED_BY_FIRE.to_string(), "require_fire_be_gone".to_string())])
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn story_messages() -> Vec<MessageSource> {
    let text = |key: &str, value: &str| MessageSource {
        key: key.to_string(),
        value: MessageValueSource::Text(value.to_string()),
    };
    let found = |key: &str, locations: &[&str]| MessageSource {
        key: key.to_string(),
        value: MessageValueSource::Found(strings(locations)),
    };
    vec![
        // Seed name is filled in at generation time.
        text("RANDO_WELCOME_1", "Welcome to the randomizer!"),
        found("RANDO_WIND_CRYSTAL_MSG_1", WIND_SHARDS_1),
        found("RANDO_WIND_CRYSTAL_MSG_2", WIND_SHARDS_2),
        found("RANDO_PIRATE_POTION_MSG_1", &["Pirate Hideout NPC Potions"]),
    ]
}

fn nameplates() -> Vec<NameplateSource> {
    ["RANDO_WELCOME_1", "RANDO_WIND_CRYSTAL_MSG_1", "RANDO_WIND_CRYSTAL_MSG_2"]
        .into_iter()
        .map(|key| NameplateSource {
            key: key.to_string(),
            value: String::new(),
        })
        .chain(std::iter::once(NameplateSource {
            key: "RANDO_PIRATE_POTION_MSG_1".to_string(),
            value: "Pirate".to_string(),
        }))
        .collect()
}

/// The built-in tables in authoring form, ready for `validate::build_catalog`.
pub fn builtin_catalog_source() -> CatalogSource {
    let items = PRISTINE_ITEMS
        .iter()
        .map(|p| ItemSource {
            name: p.name.to_string(),
            id: p.id,
            classification: p.classification.to_string(),
            tags: strings(p.tags),
            sys_call: p.sys_call.map(str::to_string),
            bundle: p.bundle.map(|(content_id, content_num)| ContentGrant {
                content_id,
                content_num,
            }),
        })
        .collect();

    let regions = PRISTINE_REGIONS
        .iter()
        .map(|r| {
            let checks = r.locations.iter().map(|l| LocationSource {
                name: l.name.to_string(),
                id: Some(l.id),
                original_item: Some(l.original_item.to_string()),
                tags: strings(l.tags),
                addresses: vec![l.address.render()],
                label: l.label.map(str::to_string),
                ..LocationSource::default()
            });
            let events = r.events.iter().map(|e| LocationSource {
                name: e.name.to_string(),
                event_item: Some(e.item.to_string()),
                tags: strings(e.tags),
                ..LocationSource::default()
            });
            RegionSource {
                name: r.name.to_string(),
                tags: strings(r.tags),
                locations: checks.chain(events).collect(),
            }
        })
        .collect();

    let connections = PRISTINE_CONNECTIONS
        .iter()
        .map(|&(from, to, rule)| ConnectionSource {
            from: from.to_string(),
            to: to.to_string(),
            rule: rule.map(str::to_string),
        })
        .collect();

    CatalogSource {
        items,
        regions,
        connections,
        rules: rules(),
        tag_rules: tag_rules(),
        start_region: "Menu".to_string(),
        game_patches: strings(PRISTINE_GAME_PATCHES),
        story_messages: story_messages(),
        nameplates: nameplates(),
    }
}

/// Property overwrites applied on every seed.
pub fn fixed_property_rows() -> Vec<PropertyRow> {
    let row = |asset: &str, pointer: &str, key: &str, value: &str| PropertyRow {
        asset: asset.to_string(),
        pointer: pointer.to_string(),
        key: key.to_string(),
        kind: "int".to_string(),
        value: value.to_string(),
    };
    vec![
        // Ship's Graveyard entrance drops the party at its start
        row(
            "Assets/GameAssets/Serial/Res/Map/Map_10010/Map_10010/entity_default",
            "/layers/[1]/objects/{id=259}/properties",
            "point_id",
            "1",
        ),
        // Catapult switch can always be pulled
        row(
            "Assets/GameAssets/Serial/Res/Map/Map_20231/Map_20231_4/ev_e_0224",
            "/layers/[0]/objects/{id=30}/properties",
            "script_id",
            "2666",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{tag, LocationProgress, Pointer};
    use crate::logic::{Inventory, LogicGraph};
    use crate::validate::build_catalog;
    use crate::MultiworldPolicy;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = build_catalog(&builtin_catalog_source(), &MultiworldPolicy::default()).unwrap();
        assert_eq!(catalog.location_count(), 17);
        let victory = catalog.victory();
        assert_eq!(catalog.item(victory.item).name, "Victory");
        assert_eq!(catalog.region(victory.region).name, "Final Boss Fight");
    }

    #[test]
    fn shards_are_priority_script_checks() {
        let catalog = build_catalog(&builtin_catalog_source(), &MultiworldPolicy::default()).unwrap();
        let shard = catalog
            .location(catalog.location_named("Wind Temple Crystal Shard C").unwrap())
            .clone();
        assert_eq!(shard.progress, LocationProgress::Priority);
        assert_eq!(shard.label.as_deref(), Some("WindCrystalShard3"));
        assert_eq!(shard.addresses[0].pointer, Pointer::Mnemonic(10));
        assert!(shard.tags.contains("Dungeon"));

        let chest = catalog.location(catalog.location_named("Tule Greenhorns Club 1F Treasure B").unwrap());
        assert!(chest.filler_only());
        assert_eq!(
            chest.addresses[0].to_string(),
            "Assets/GameAssets/Serial/Res/Map/Map_20011/Map_20011_1/entity_default:/layers/[0]/objects/[1]/properties"
        );
    }

    #[test]
    fn karnak_treasure_waits_for_the_fire() {
        let catalog = build_catalog(&builtin_catalog_source(), &MultiworldPolicy::default()).unwrap();
        let graph = LogicGraph::new(&catalog);
        let treasure = catalog.location_named("Karnak Castle Treasure A").unwrap();
        let karnak = catalog.region_named("Karnak").unwrap();
        let named = |name: &str| catalog.item_named(name).unwrap();

        let rule = catalog.location(treasure).rule.unwrap();
        assert_eq!(catalog.rules().name(rule), "require_fire_be_gone");
        assert!(catalog.location(treasure).addresses.is_empty());

        let inv = Inventory::with_items(&catalog, [named("W1Teleport")]);
        assert!(!graph.is_region_reachable(karnak, &inv));

        let inv = Inventory::with_items(&catalog, [named("W1Teleport"), named("Adamantite")]);
        assert!(graph.is_region_reachable(karnak, &inv));
        assert!(!graph.is_location_reachable(treasure, &inv));

        let inv = Inventory::with_items(
            &catalog,
            [named("W1Teleport"), named("Adamantite"), named("FireBeGone")],
        );
        assert!(graph.is_location_reachable(treasure, &inv));
    }

    #[test]
    fn job_items_carry_their_unlock_call() {
        let catalog = build_catalog(&builtin_catalog_source(), &MultiworldPolicy::default()).unwrap();
        let jobs: Vec<_> = catalog
            .items()
            .filter(|(_, item)| item.tags.contains(tag::JOB))
            .collect();
        assert_eq!(jobs.len(), 6);
        assert!(jobs.iter().all(|(_, item)| item.sys_call.is_some()));
    }
}
