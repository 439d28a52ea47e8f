use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bundle;
pub mod catalog;
pub mod ids;
pub mod logic;
pub mod messages;
pub mod mnemonic;
pub mod patch;
pub mod patch_text;
pub mod placement;
pub mod pristine;
pub mod validate;

use bundle::{bundle_file_name, write_bundle, BundleContents, Manifest, MultiworldData};
use catalog::{Catalog, CatalogSource, ItemIdx};
use ids::{ForeignSignal, IdBases, IdError, IdKind, DEFAULT_FOREIGN_SENTINEL};
use logic::{Inventory, LogicGraph, Sweep};
use messages::{build_messages, MessageTables};
use mnemonic::{ScriptStore, ScriptStoreError};
use patch::{load_patch_dir, CompiledPatches, NarrativePhase, PatchError};
use patch_text::{PatchTextError, ScriptPatch};
use placement::{FillerPolicy, HostPlacements, PlacedItem, Placement, PlacementError};
use validate::{build_catalog, CatalogDefects};

#[derive(Debug, Error)]
pub enum RandoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{0}")]
    Catalog(#[from] CatalogDefects),
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
    #[error("patch text error: {0}")]
    PatchText(#[from] PatchTextError),
    #[error("id error: {0}")]
    Id(#[from] IdError),
    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),
    #[error("script error: {0}")]
    ScriptStore(#[from] ScriptStoreError),
    #[error("completion goal '{region}' is unreachable with this placement")]
    UnreachableGoal { region: String },
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RandoError>;

/// Knobs shared with the multiworld host and the in-game client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiworldPolicy {
    pub id_bases: IdBases,
    /// `content_num` that marks "another player's item" in a grant.
    pub foreign_sentinel: u32,
    pub filler: FillerPolicy,
}

impl Default for MultiworldPolicy {
    fn default() -> Self {
        MultiworldPolicy {
            id_bases: IdBases::default(),
            foreign_sentinel: DEFAULT_FOREIGN_SENTINEL,
            filler: FillerPolicy::default(),
        }
    }
}

impl MultiworldPolicy {
    pub fn signal(&self) -> ForeignSignal {
        ForeignSignal::new(self.foreign_sentinel)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub seed: u64,
    /// Shown to the player in game; defaults to the seed.
    pub seed_name: String,
    pub player: u32,
    pub player_name: String,
    /// Catalog source JSON; the built-in tables when absent.
    pub catalog_path: Option<PathBuf>,
    /// Extracted game scripts (`*.json` with a `Mnemonics` array).
    pub script_dir: Option<PathBuf>,
    /// Extra narrative patch files (`*.csv`), applied after the built-in ones.
    pub extra_patch_dir: Option<PathBuf>,
    pub host_placements: Option<PathBuf>,
    pub output_path: PathBuf,
    pub debug: bool,
    pub multiworld: MultiworldPolicy,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        GenerationSettings {
            seed: 0,
            seed_name: String::new(),
            player: 1,
            player_name: "Player1".to_string(),
            catalog_path: None,
            script_dir: None,
            extra_patch_dir: None,
            host_placements: None,
            output_path: PathBuf::from("."),
            debug: false,
            multiworld: MultiworldPolicy::default(),
        }
    }
}

impl GenerationSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn seed_name(&self) -> String {
        if self.seed_name.is_empty() {
            self.seed.to_string()
        } else {
            self.seed_name.clone()
        }
    }
}

/// Everything one generation run produced, before it is written anywhere.
#[derive(Debug)]
pub struct Generation {
    pub placement: Placement,
    pub sweep: Sweep,
    pub patches: CompiledPatches,
    pub messages: MessageTables,
    pub contents: BundleContents,
}

/// Load the catalog named by the settings and validate it.
pub fn load_catalog(settings: &GenerationSettings) -> Result<Catalog> {
    let source = match &settings.catalog_path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            serde_json::from_str::<CatalogSource>(&text)?
        }
        None => pristine::builtin_catalog_source(),
    };
    Ok(build_catalog(&source, &settings.multiworld)?)
}

/// Items our own world must receive from elsewhere: every progression item
/// of the pool that the host did not place in this world.
fn received_elsewhere(catalog: &Catalog, pool: &[ItemIdx], placement: &Placement) -> Vec<ItemIdx> {
    let mut missing: Vec<ItemIdx> = pool
        .iter()
        .copied()
        .filter(|&idx| catalog.item(idx).classification.is_progression())
        .collect();
    for (_, placed) in placement.iter() {
        if let PlacedItem::Own(item) = placed {
            if let Some(pos) = missing.iter().position(|idx| idx == item) {
                missing.remove(pos);
            }
        }
    }
    missing
}

/// Place items, check the seed is beatable, and compile every output file.
/// Nothing is written to disk.
pub fn generate(
    catalog: &Catalog,
    scripts: &ScriptStore,
    settings: &GenerationSettings,
    host: Option<&HostPlacements>,
    extra_patches: Vec<ScriptPatch>,
) -> Result<Generation> {
    let policy = &settings.multiworld;
    let seed_name = settings.seed_name();
    let graph = LogicGraph::new(catalog);

    let precollected = placement::precollected(catalog);
    let pool = placement::build_item_pool(catalog, &policy.filler, &precollected)?;

    let (placement, mut start) = match host {
        Some(host) => {
            let placement = placement::from_host(catalog, host, settings.player)?;
            let external = received_elsewhere(catalog, &pool, &placement);
            (placement, external)
        }
        None => (
            placement::resolve(&graph, &pool, &precollected, settings.seed)?,
            Vec::new(),
        ),
    };
    start.extend(precollected.iter().copied());

    let sweep = graph.sweep(Inventory::with_items(catalog, start), &placement);
    graph.require_completion(&sweep)?;
    info!("seed {} is beatable in {} spheres", seed_name, sweep.spheres.len());

    let mut narrative = NarrativePhase::new(scripts);
    narrative.apply_builtin(catalog.game_patches())?;
    narrative.apply_all(extra_patches)?;

    let mut items = narrative.into_item_phase();
    for row in pristine::fixed_property_rows() {
        items.property(row);
    }
    let signal = policy.signal();
    for (loc, placed) in placement.iter() {
        items.place(catalog, loc, placed, &signal)?;
    }
    let patches = items.finish();

    let messages = build_messages(catalog, &placement, &seed_name, &patches.multiworld_messages);

    let contents = BundleContents {
        treasure_mod: patches.treasure_text(),
        script_patch: patches.script_patch_text(),
        message_strings: messages.story_text(),
        nameplate_strings: messages.nameplate_text(),
        multiworld_data: MultiworldData::new(catalog, policy, &seed_name, &settings.player_name),
        manifest: Manifest::new(settings.player, &settings.player_name),
    };

    Ok(Generation {
        placement,
        sweep,
        patches,
        messages,
        contents,
    })
}

/// Placements with their global ids, then the collection spheres.
pub fn spoiler_log(catalog: &Catalog, policy: &MultiworldPolicy, generation: &Generation) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "Placements");
    for (loc, placed) in generation.placement.iter() {
        let location = catalog.location(loc);
        let Some(id) = location.id else { continue };
        let global = policy.id_bases.try_encode(IdKind::Location, id.0)?;
        let _ = writeln!(
            out,
            "  {} [{}]: {}",
            location.name,
            global,
            placed.display_name(catalog)
        );
    }

    let _ = writeln!(out, "\nSpheres");
    for (n, sphere) in generation.sweep.spheres.iter().enumerate() {
        let _ = writeln!(out, "  Sphere {}", n);
        for &loc in sphere {
            let location = catalog.location(loc);
            let item = match (location.event_item, generation.placement.get(loc)) {
                (Some(event), _) => catalog.item(event).name.clone(),
                (None, Some(placed)) => placed.display_name(catalog),
                (None, None) => continue,
            };
            let _ = writeln!(out, "    {}: {}", location.name, item);
        }
    }
    Ok(out)
}

/// Full run: load inputs, generate, and write the bundle. Returns the
/// bundle path. Any error leaves no bundle behind.
pub fn run(settings: GenerationSettings) -> Result<PathBuf> {
    let catalog = load_catalog(&settings)?;

    let script_dir = settings.script_dir.as_ref().ok_or_else(|| {
        RandoError::Config("a directory of extracted game scripts is required".to_string())
    })?;
    let scripts = ScriptStore::load_dir(script_dir)?;

    let extra_patches = match &settings.extra_patch_dir {
        Some(dir) => load_patch_dir(dir)?,
        None => Vec::new(),
    };
    let host = settings
        .host_placements
        .as_deref()
        .map(HostPlacements::load)
        .transpose()?;

    let generation = generate(&catalog, &scripts, &settings, host.as_ref(), extra_patches)?;

    // Build everything before touching the output directory.
    let bytes = generation.contents.to_zip()?;
    let spoiler = if settings.debug {
        Some(spoiler_log(&catalog, &settings.multiworld, &generation)?)
    } else {
        None
    };

    // The bundle goes last; nothing after it may fail.
    if let Some(spoiler) = spoiler {
        fs::create_dir_all(&settings.output_path)?;
        let log_path = settings.output_path.join("spoiler_log.txt");
        fs::write(&log_path, spoiler)?;
        info!("wrote {}", log_path.display());
    }
    let file_name = bundle_file_name(&settings.seed_name(), settings.player, &settings.player_name);
    write_bundle(&settings.output_path, &file_name, &bytes)
}

/// The built-in catalog in its JSON authoring form.
pub fn dump_builtin_catalog() -> Result<String> {
    Ok(serde_json::to_string_pretty(&pristine::builtin_catalog_source())?)
}
