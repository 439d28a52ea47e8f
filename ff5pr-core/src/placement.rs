use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{tag, Catalog, ItemClassification, ItemIdx, LocIdx, LocationProgress};
use crate::logic::{Inventory, LogicGraph};

/// What ended up at a location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlacedItem {
    Own(ItemIdx),
    /// An item belonging to another participant of the multiworld.
    Foreign {
        player: u32,
        player_name: String,
        item_name: String,
        classification: ItemClassification,
    },
}

impl PlacedItem {
    pub fn classification(&self, catalog: &Catalog) -> ItemClassification {
        match self {
            PlacedItem::Own(item) => catalog.item(*item).classification,
            PlacedItem::Foreign { classification, .. } => *classification,
        }
    }

    /// Name shown to the player; foreign items carry their owner.
    pub fn display_name(&self, catalog: &Catalog) -> String {
        match self {
            PlacedItem::Own(item) => catalog.item(*item).name.clone(),
            PlacedItem::Foreign {
                item_name,
                player_name,
                ..
            } => format!("{} ({})", item_name, player_name),
        }
    }
}

/// Location -> item for every check of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    slots: Vec<Option<PlacedItem>>,
}

impl Placement {
    pub fn empty(catalog: &Catalog) -> Self {
        Placement {
            slots: vec![None; catalog.location_count()],
        }
    }

    pub fn set(&mut self, location: LocIdx, item: PlacedItem) {
        self.slots[location.0] = Some(item);
    }

    pub fn get(&self, location: LocIdx) -> Option<&PlacedItem> {
        self.slots.get(location.0).and_then(Option::as_ref)
    }

    /// Filled locations in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (LocIdx, &PlacedItem)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (LocIdx(i), item)))
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// How the item pool is balanced against the location count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillerPolicy {
    /// Pads a short pool. Must name a Filler item.
    pub filler_item: String,
}

impl Default for FillerPolicy {
    fn default() -> Self {
        FillerPolicy {
            filler_item: "Potion".to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("filler item '{0}' is not a Filler item of this catalog")]
    UnknownFiller(String),

    #[error("item pool holds {items} items for {locations} locations and has no filler left to drop")]
    PoolTooLarge { items: usize, locations: usize },

    #[error("no reachable location can take item '{item}'")]
    NoLocationFor { item: String },

    #[error("host placement names unknown location '{0}'")]
    UnknownLocation(String),

    #[error("host placement names event location '{0}'")]
    EventLocation(String),

    #[error("host placement gives unknown item '{item}' at '{location}'")]
    UnknownItem { location: String, item: String },

    #[error("host placement gives '{item}' an invalid classification '{value}'")]
    InvalidClassification { item: String, value: String },

    #[error("location '{location}' cannot hold {classification:?} item '{item}'")]
    Forbidden {
        location: String,
        item: String,
        classification: ItemClassification,
    },

    #[error("host placement leaves location '{0}' empty")]
    Unfilled(String),
}

/// One copy of each check's original item, minus the items the player
/// starts with, balanced to the check count.
pub fn build_item_pool(
    catalog: &Catalog,
    policy: &FillerPolicy,
    precollected: &[ItemIdx],
) -> Result<Vec<ItemIdx>, PlacementError> {
    let mut pool: Vec<ItemIdx> = catalog
        .locations()
        .filter_map(|(_, loc)| loc.original_item)
        .collect();
    for item in precollected {
        if let Some(pos) = pool.iter().position(|idx| idx == item) {
            pool.remove(pos);
        }
    }
    let locations = catalog.locations().filter(|(_, loc)| !loc.is_event()).count();
    balance_pool(catalog, policy, pool, locations)
}

/// Pad `pool` with the policy's filler item or drop surplus Filler items
/// until it holds exactly `locations` items.
pub fn balance_pool(
    catalog: &Catalog,
    policy: &FillerPolicy,
    mut pool: Vec<ItemIdx>,
    locations: usize,
) -> Result<Vec<ItemIdx>, PlacementError> {
    if pool.len() < locations {
        let filler = catalog
            .item_named(&policy.filler_item)
            .filter(|&idx| catalog.item(idx).classification.is_filler())
            .ok_or_else(|| PlacementError::UnknownFiller(policy.filler_item.clone()))?;
        debug!(
            "padding pool with {} x {}",
            locations - pool.len(),
            policy.filler_item
        );
        pool.resize(locations, filler);
    }

    while pool.len() > locations {
        let Some(pos) = pool
            .iter()
            .rposition(|&idx| catalog.item(idx).classification.is_filler())
        else {
            return Err(PlacementError::PoolTooLarge {
                items: pool.len(),
                locations,
            });
        };
        pool.remove(pos);
    }

    Ok(pool)
}

/// Items the player starts with: the first world teleport.
pub fn precollected(catalog: &Catalog) -> Vec<ItemIdx> {
    catalog
        .items()
        .find(|(_, item)| item.tags.contains(tag::WORLD_TELEPORT))
        .map(|(idx, _)| idx)
        .into_iter()
        .collect()
}

/// Fill attempts before giving up; each one reshuffles from the same stream.
const FILL_ATTEMPTS: usize = 16;

/// Seeded assumed fill.
///
/// Progression items go first. Each one lands in a location reachable when
/// every progression item still waiting to be placed is assumed owned.
/// Priority locations win whenever one is eligible. Everything else fills
/// the remaining locations in shuffled order. A fill that paints itself into
/// a corner is retried, still driven by the one seeded generator.
pub fn resolve(
    graph: &LogicGraph<'_>,
    pool: &[ItemIdx],
    precollected: &[ItemIdx],
    seed: u64,
) -> Result<Placement, PlacementError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut attempt = 1;
    loop {
        match fill(graph, pool, precollected, &mut rng) {
            Ok(placement) => return Ok(placement),
            Err(err) if attempt < FILL_ATTEMPTS => {
                debug!("fill attempt {} failed: {}", attempt, err);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn fill(
    graph: &LogicGraph<'_>,
    pool: &[ItemIdx],
    precollected: &[ItemIdx],
    rng: &mut StdRng,
) -> Result<Placement, PlacementError> {
    let catalog = graph.catalog();
    let mut placement = Placement::empty(catalog);

    let mut unfilled: Vec<LocIdx> = catalog
        .locations()
        .filter(|(_, loc)| !loc.is_event())
        .map(|(idx, _)| idx)
        .collect();
    unfilled.shuffle(rng);

    let (mut progression, mut rest): (Vec<ItemIdx>, Vec<ItemIdx>) = pool
        .iter()
        .copied()
        .partition(|&idx| catalog.item(idx).classification.is_progression());
    progression.shuffle(rng);

    while let Some(item) = progression.pop() {
        let assumed = Inventory::with_items(
            catalog,
            precollected.iter().chain(progression.iter()).copied(),
        );
        let sweep = graph.sweep(assumed, &placement);
        let classification = catalog.item(item).classification;

        let candidates: Vec<usize> = unfilled
            .iter()
            .enumerate()
            .filter(|(_, &loc)| {
                sweep.reachability.location(loc) && catalog.location(loc).accepts(classification)
            })
            .map(|(pos, _)| pos)
            .collect();
        let priority: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&pos| catalog.location(unfilled[pos]).progress == LocationProgress::Priority)
            .collect();
        let choices = if priority.is_empty() {
            &candidates
        } else {
            &priority
        };

        let Some(&pos) = choices.choose(rng) else {
            return Err(PlacementError::NoLocationFor {
                item: catalog.item(item).name.clone(),
            });
        };
        let loc = unfilled.swap_remove(pos);
        debug!(
            "placed {} at {}",
            catalog.item(item).name,
            catalog.location(loc).name
        );
        placement.set(loc, PlacedItem::Own(item));
    }

    // Useful and trap items are pickier than filler, so they go first.
    rest.shuffle(rng);
    rest.sort_by_key(|&idx| catalog.item(idx).classification.is_filler());
    for item in rest {
        let classification = catalog.item(item).classification;
        let Some(pos) = unfilled
            .iter()
            .position(|&loc| catalog.location(loc).accepts(classification))
        else {
            return Err(PlacementError::NoLocationFor {
                item: catalog.item(item).name.clone(),
            });
        };
        let loc = unfilled.swap_remove(pos);
        placement.set(loc, PlacedItem::Own(item));
    }

    info!(
        "placed {} items ({} locations left empty)",
        placement.filled(),
        unfilled.len()
    );
    Ok(placement)
}

/// One entry of a host-provided placement document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPlacement {
    pub item: String,
    pub player: u32,
    pub player_name: String,
    /// Only read for other players' items; ours come from the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
}

/// Location name -> placed item, as decided by the multiworld host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostPlacements(pub BTreeMap<String, HostPlacement>);

impl HostPlacements {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Turn a host placement into a `Placement`, re-checking every location
/// constraint. Items for `own_player` must exist in the catalog.
pub fn from_host(
    catalog: &Catalog,
    host: &HostPlacements,
    own_player: u32,
) -> Result<Placement, PlacementError> {
    let mut placement = Placement::empty(catalog);

    for (location_name, entry) in &host.0 {
        let loc = catalog
            .location_named(location_name)
            .ok_or_else(|| PlacementError::UnknownLocation(location_name.clone()))?;
        if catalog.location(loc).is_event() {
            return Err(PlacementError::EventLocation(location_name.clone()));
        }

        let placed = if entry.player == own_player {
            let item = catalog
                .item_named(&entry.item)
                .filter(|&idx| !catalog.item(idx).is_event())
                .ok_or_else(|| PlacementError::UnknownItem {
                    location: location_name.clone(),
                    item: entry.item.clone(),
                })?;
            PlacedItem::Own(item)
        } else {
            let classification = match &entry.classification {
                None => ItemClassification::Filler,
                Some(value) => ItemClassification::parse(value).ok_or_else(|| {
                    PlacementError::InvalidClassification {
                        item: entry.item.clone(),
                        value: value.clone(),
                    }
                })?,
            };
            PlacedItem::Foreign {
                player: entry.player,
                player_name: entry.player_name.clone(),
                item_name: entry.item.clone(),
                classification,
            }
        };

        let classification = placed.classification(catalog);
        if !catalog.location(loc).accepts(classification) {
            return Err(PlacementError::Forbidden {
                location: location_name.clone(),
                item: entry.item.clone(),
                classification,
            });
        }
        placement.set(loc, placed);
    }

    if let Some((_, loc)) = catalog
        .locations()
        .find(|(idx, loc)| !loc.is_event() && placement.get(*idx).is_none())
    {
        return Err(PlacementError::Unfilled(loc.name.clone()));
    }

    info!("accepted host placement for {} locations", placement.filled());
    Ok(placement)
}
