use std::collections::{HashMap, VecDeque};

use crate::catalog::{Catalog, ItemIdx, LocIdx, RegionIdx};
use crate::placement::{PlacedItem, Placement};
use crate::RandoError;

/// Compiled access predicate. Pure function of the owned-item counts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    Has(ItemIdx),
    /// Owns at least `count` items carrying `tag`; duplicates count.
    HasAtLeast {
        tag: String,
        items: Vec<ItemIdx>,
        count: u32,
    },
    All(Vec<Rule>),
}

impl Rule {
    pub fn evaluate(&self, owned: &Inventory) -> bool {
        match self {
            Rule::Has(item) => owned.has(*item),
            Rule::HasAtLeast { items, count, .. } => {
                let total: u32 = items.iter().map(|&item| owned.count(item)).sum();
                total >= *count
            }
            Rule::All(rules) => rules.iter().all(|rule| rule.evaluate(owned)),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RuleIdx(pub usize);

/// Named rules resolved at catalog build time. Connections and locations
/// refer to them by index.
#[derive(Clone, Debug, Default)]
pub struct RuleRegistry {
    entries: Vec<(String, Rule)>,
    by_name: HashMap<String, RuleIdx>,
}

impl RuleRegistry {
    pub(crate) fn insert(&mut self, name: &str, rule: Rule) -> RuleIdx {
        if let Some(&idx) = self.by_name.get(name) {
            self.entries[idx.0].1 = rule;
            return idx;
        }
        let idx = RuleIdx(self.entries.len());
        self.entries.push((name.to_string(), rule));
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    pub fn lookup(&self, name: &str) -> Option<RuleIdx> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, idx: RuleIdx) -> &Rule {
        &self.entries[idx.0].1
    }

    pub fn name(&self, idx: RuleIdx) -> &str {
        &self.entries[idx.0].0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owned-item multiset, indexed by catalog item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inventory {
    counts: Vec<u32>,
}

impl Inventory {
    pub fn empty(catalog: &Catalog) -> Self {
        Inventory {
            counts: vec![0; catalog.item_count()],
        }
    }

    pub fn with_items<I>(catalog: &Catalog, items: I) -> Self
    where
        I: IntoIterator<Item = ItemIdx>,
    {
        let mut inv = Inventory::empty(catalog);
        for item in items {
            inv.add(item);
        }
        inv
    }

    pub fn add(&mut self, item: ItemIdx) {
        self.counts[item.0] += 1;
    }

    pub fn count(&self, item: ItemIdx) -> u32 {
        self.counts.get(item.0).copied().unwrap_or(0)
    }

    pub fn has(&self, item: ItemIdx) -> bool {
        self.count(item) > 0
    }
}

#[derive(Clone, Debug)]
pub struct Reachability {
    regions: Vec<bool>,
    locations: Vec<bool>,
}

impl Reachability {
    pub fn region(&self, idx: RegionIdx) -> bool {
        self.regions[idx.0]
    }

    pub fn location(&self, idx: LocIdx) -> bool {
        self.locations[idx.0]
    }

    pub fn reachable_locations(&self) -> impl Iterator<Item = LocIdx> + '_ {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, &reached)| reached)
            .map(|(i, _)| LocIdx(i))
    }
}

/// Result of collecting everything reachable, sphere by sphere.
#[derive(Clone, Debug)]
pub struct Sweep {
    pub inventory: Inventory,
    pub spheres: Vec<Vec<LocIdx>>,
    pub reachability: Reachability,
}

/// Directed region graph. Built once per run and never mutated; every query
/// recomputes the closure for the owned-item set it is given.
pub struct LogicGraph<'a> {
    catalog: &'a Catalog,
    outgoing: Vec<Vec<usize>>,
}

impl<'a> LogicGraph<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        let mut outgoing = vec![Vec::new(); catalog.region_count()];
        for (i, conn) in catalog.connections().iter().enumerate() {
            outgoing[conn.from.0].push(i);
        }
        LogicGraph { catalog, outgoing }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    fn rule_passes(&self, rule: Option<RuleIdx>, owned: &Inventory) -> bool {
        match rule {
            Some(idx) => self.catalog.rules().get(idx).evaluate(owned),
            None => true,
        }
    }

    pub fn reachable_regions(&self, owned: &Inventory) -> Vec<bool> {
        let connections = self.catalog.connections();
        let mut reached = vec![false; self.catalog.region_count()];
        let start = self.catalog.start_region();
        reached[start.0] = true;

        let mut queue = VecDeque::from([start]);
        while let Some(region) = queue.pop_front() {
            for &conn_idx in &self.outgoing[region.0] {
                let conn = &connections[conn_idx];
                if reached[conn.to.0] || !self.rule_passes(conn.rule, owned) {
                    continue;
                }
                reached[conn.to.0] = true;
                queue.push_back(conn.to);
            }
        }
        reached
    }

    pub fn reachability(&self, owned: &Inventory) -> Reachability {
        let regions = self.reachable_regions(owned);
        let locations = self
            .catalog
            .locations()
            .map(|(_, loc)| regions[loc.region.0] && self.rule_passes(loc.rule, owned))
            .collect();
        Reachability { regions, locations }
    }

    pub fn is_region_reachable(&self, region: RegionIdx, owned: &Inventory) -> bool {
        self.reachable_regions(owned)[region.0]
    }

    pub fn is_location_reachable(&self, location: LocIdx, owned: &Inventory) -> bool {
        self.reachability(owned).location(location)
    }

    /// Starting from `start`, repeatedly collect the items at every reachable
    /// location until nothing new becomes reachable. Foreign items add
    /// nothing locally; event locations yield their event item.
    pub fn sweep(&self, start: Inventory, placement: &Placement) -> Sweep {
        let mut inventory = start;
        let mut collected = vec![false; self.catalog.location_count()];
        let mut spheres = Vec::new();

        loop {
            let reach = self.reachability(&inventory);
            let sphere: Vec<LocIdx> = reach
                .reachable_locations()
                .filter(|loc| !collected[loc.0])
                .collect();
            if sphere.is_empty() {
                return Sweep {
                    inventory,
                    spheres,
                    reachability: reach,
                };
            }

            for &loc_idx in &sphere {
                collected[loc_idx.0] = true;
                let location = self.catalog.location(loc_idx);
                if let Some(event_item) = location.event_item {
                    inventory.add(event_item);
                } else if let Some(PlacedItem::Own(item)) = placement.get(loc_idx) {
                    inventory.add(*item);
                }
            }
            spheres.push(sphere);
        }
    }

    /// Fails with `UnreachableGoal` unless the sweep reached the victory
    /// region and collected the victory event.
    pub fn require_completion(&self, sweep: &Sweep) -> Result<(), RandoError> {
        let victory = self.catalog.victory();
        if sweep.reachability.region(victory.region) && sweep.inventory.has(victory.item) {
            return Ok(());
        }
        Err(RandoError::UnreachableGoal {
            region: self.catalog.region(victory.region).name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        CatalogSource, ConnectionSource, ItemSource, LocationSource, RegionSource, RuleSource,
    };
    use crate::validate::build_catalog;
    use crate::MultiworldPolicy;

    fn item(name: &str, id: u32, classification: &str, tags: &[&str]) -> ItemSource {
        ItemSource {
            name: name.to_string(),
            id,
            classification: classification.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            sys_call: None,
            bundle: None,
        }
    }

    fn region(name: &str, locations: Vec<LocationSource>) -> RegionSource {
        RegionSource {
            name: name.to_string(),
            tags: Vec::new(),
            locations,
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

    fn victory() -> LocationSource {
        LocationSource {
            name: "Win".to_string(),
            event_item: Some("Victory".to_string()),
            tags: vec!["CompletionCondition".to_string()],
            ..LocationSource::default()
        }
    }

    fn connect(from: &str, to: &str, rule: Option<&str>) -> ConnectionSource {
        ConnectionSource {
            from: from.to_string(),
            to: to.to_string(),
            rule: rule.map(str::to_string),
        }
    }

    fn vault_catalog() -> Catalog {
        let mut source = CatalogSource {
            items: vec![
                item("Tent", 12, "Filler", &[]),
                item("Key", 40, "Progression", &[]),
            ],
            regions: vec![
                region("Start", vec![victory()]),
                region("Vault", vec![check("Vault Chest", 1, "Tent")]),
                region("Spare", vec![check("Spare Shelf", 2, "Key")]),
            ],
            connections: vec![
                connect("Start", "Vault", Some("needs_key")),
                connect("Start", "Spare", None),
            ],
            start_region: "Start".to_string(),
            ..CatalogSource::default()
        };
        source
            .rules
            .insert("needs_key".to_string(), RuleSource::Has("Key".to_string()));
        build_catalog(&source, &MultiworldPolicy::default()).unwrap()
    }

    #[test]
    fn vault_needs_key() {
        let catalog = vault_catalog();
        let graph = LogicGraph::new(&catalog);
        let vault = catalog.region_named("Vault").unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();
        let key = catalog.item_named("Key").unwrap();

        let empty = Inventory::empty(&catalog);
        assert!(!graph.is_region_reachable(vault, &empty));
        assert!(!graph.is_location_reachable(chest, &empty));

        let with_key = Inventory::with_items(&catalog, [key]);
        assert!(graph.is_region_reachable(vault, &with_key));
        assert!(graph.is_location_reachable(chest, &with_key));
    }

    #[test]
    fn ruleless_connection_is_always_open() {
        let catalog = vault_catalog();
        let graph = LogicGraph::new(&catalog);
        let spare = catalog.region_named("Spare").unwrap();
        assert!(graph.is_region_reachable(spare, &Inventory::empty(&catalog)));
    }

    #[test]
    fn sweep_collects_keys_to_a_fixpoint() {
        let catalog = vault_catalog();
        let graph = LogicGraph::new(&catalog);
        let key = catalog.item_named("Key").unwrap();
        let tent = catalog.item_named("Tent").unwrap();
        let shelf = catalog.location_named("Spare Shelf").unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();

        let mut placement = Placement::empty(&catalog);
        placement.set(shelf, PlacedItem::Own(key));
        placement.set(chest, PlacedItem::Own(tent));

        let sweep = graph.sweep(Inventory::empty(&catalog), &placement);
        assert_eq!(sweep.spheres.len(), 2);
        assert!(sweep.spheres[1].contains(&chest));
        assert!(sweep.inventory.has(tent));
        assert!(graph.require_completion(&sweep).is_ok());
    }

    #[test]
    fn key_locked_behind_its_own_door_fails_completion() {
        let mut source = CatalogSource {
            items: vec![
                item("Tent", 12, "Filler", &[]),
                item("Key", 40, "Progression", &[]),
            ],
            regions: vec![
                region("Start", vec![check("Spare Shelf", 2, "Key")]),
                region("Vault", vec![check("Vault Chest", 1, "Tent"), victory()]),
            ],
            connections: vec![connect("Start", "Vault", Some("needs_key"))],
            start_region: "Start".to_string(),
            ..CatalogSource::default()
        };
        source
            .rules
            .insert("needs_key".to_string(), RuleSource::Has("Key".to_string()));
        let catalog = build_catalog(&source, &MultiworldPolicy::default()).unwrap();
        let graph = LogicGraph::new(&catalog);
        let key = catalog.item_named("Key").unwrap();
        let tent = catalog.item_named("Tent").unwrap();
        let shelf = catalog.location_named("Spare Shelf").unwrap();
        let chest = catalog.location_named("Vault Chest").unwrap();

        let mut sealed = Placement::empty(&catalog);
        sealed.set(shelf, PlacedItem::Own(tent));
        sealed.set(chest, PlacedItem::Own(key));
        let sweep = graph.sweep(Inventory::empty(&catalog), &sealed);
        assert!(!sweep.inventory.has(key));
        match graph.require_completion(&sweep) {
            Err(RandoError::UnreachableGoal { region }) => assert_eq!(region, "Vault"),
            other => panic!("unexpected result {:?}", other),
        }

        let mut open = Placement::empty(&catalog);
        open.set(shelf, PlacedItem::Own(key));
        open.set(chest, PlacedItem::Own(tent));
        let sweep = graph.sweep(Inventory::empty(&catalog), &open);
        assert!(graph.require_completion(&sweep).is_ok());
    }

    #[test]
    fn counting_rule_includes_duplicates() {
        let catalog = vault_catalog();
        let key = catalog.item_named("Key").unwrap();
        let rule = Rule::HasAtLeast {
            tag: "Key".to_string(),
            items: vec![key],
            count: 2,
        };
        let mut inv = Inventory::with_items(&catalog, [key]);
        assert!(!rule.evaluate(&inv));
        inv.add(key);
        assert!(rule.evaluate(&inv));
        assert!(Rule::All(vec![rule.clone(), Rule::Has(key)]).evaluate(&inv));
    }
}
