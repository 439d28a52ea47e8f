use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{ContentGrant, LocationId};

/// Width of each kind's global id range. Native ids must stay below this so
/// the ranges never overlap.
pub const RANGE_WIDTH: u64 = 1_000_000;

pub const DEFAULT_ITEM_BASE: u64 = 7_000_000;
pub const DEFAULT_LOCATION_BASE: u64 = 8_000_000;

/// Content count the in-game client reads as "this is a location of ours
/// holding another player's item". No real grant may use it.
pub const DEFAULT_FOREIGN_SENTINEL: u32 = 9_999_999;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    Item,
    Location,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("global id {0} is outside every configured id range")]
    UnrecognizedRange(u64),

    #[error("id bases overlap: item base {item}, location base {location} (range width {width})")]
    OverlappingBases { item: u64, location: u64, width: u64 },

    #[error("native {kind:?} id {native} does not fit below the range width {width}")]
    NativeOutOfRange { kind: IdKind, native: u32, width: u64 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIdBases", into = "RawIdBases")]
pub struct IdBases {
    item: u64,
    location: u64,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
struct RawIdBases {
    item: u64,
    location: u64,
}

impl TryFrom<RawIdBases> for IdBases {
    type Error = IdError;

    fn try_from(raw: RawIdBases) -> Result<Self, IdError> {
        IdBases::new(raw.item, raw.location)
    }
}

impl From<IdBases> for RawIdBases {
    fn from(bases: IdBases) -> Self {
        RawIdBases {
            item: bases.item,
            location: bases.location,
        }
    }
}

impl Default for IdBases {
    fn default() -> Self {
        IdBases {
            item: DEFAULT_ITEM_BASE,
            location: DEFAULT_LOCATION_BASE,
        }
    }
}

impl IdBases {
    pub fn new(item: u64, location: u64) -> Result<Self, IdError> {
        // Both ranges must fit in u64 and must not touch.
        let disjoint = match (item.checked_add(RANGE_WIDTH), location.checked_add(RANGE_WIDTH)) {
            (Some(item_end), Some(location_end)) => item_end <= location || location_end <= item,
            _ => false,
        };
        if !disjoint {
            return Err(IdError::OverlappingBases {
                item,
                location,
                width: RANGE_WIDTH,
            });
        }
        Ok(IdBases { item, location })
    }

    pub fn item_base(&self) -> u64 {
        self.item
    }

    pub fn location_base(&self) -> u64 {
        self.location
    }

    fn base(&self, kind: IdKind) -> u64 {
        match kind {
            IdKind::Item => self.item,
            IdKind::Location => self.location,
        }
    }

    /// `base[kind] + native`. Callers pass native ids the validator has
    /// already bounded by `RANGE_WIDTH`; use `try_encode` otherwise.
    pub fn encode(&self, kind: IdKind, native: u32) -> u64 {
        debug_assert!(u64::from(native) < RANGE_WIDTH);
        self.base(kind) + u64::from(native)
    }

    pub fn try_encode(&self, kind: IdKind, native: u32) -> Result<u64, IdError> {
        if u64::from(native) >= RANGE_WIDTH {
            return Err(IdError::NativeOutOfRange {
                kind,
                native,
                width: RANGE_WIDTH,
            });
        }
        Ok(self.encode(kind, native))
    }

    pub fn decode(&self, global: u64) -> Result<(IdKind, u32), IdError> {
        for kind in [IdKind::Item, IdKind::Location] {
            let base = self.base(kind);
            if global >= base && global - base < RANGE_WIDTH {
                // RANGE_WIDTH fits in u32, so the offset does too.
                return Ok((kind, (global - base) as u32));
            }
        }
        Err(IdError::UnrecognizedRange(global))
    }
}

/// The narrow cross-player encoding written into a grant instruction:
/// `content_id` is the native location id, `content_num` is the sentinel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForeignSignal {
    pub sentinel: u32,
}

impl ForeignSignal {
    pub fn new(sentinel: u32) -> Self {
        ForeignSignal { sentinel }
    }

    pub fn encode(&self, location: LocationId) -> ContentGrant {
        ContentGrant {
            content_id: location.0,
            content_num: self.sentinel,
        }
    }

    /// What the client does on receipt: `Some(location)` for a signal,
    /// `None` for a real item grant.
    pub fn decode(&self, grant: ContentGrant) -> Option<LocationId> {
        if grant.content_num == self.sentinel {
            Some(LocationId(grant.content_id))
        } else {
            None
        }
    }
}

impl Default for ForeignSignal {
    fn default() -> Self {
        ForeignSignal::new(DEFAULT_FOREIGN_SENTINEL)
    }
}
