//! Core domain types shared across pyramerge crates.

use serde::{Deserialize, Serialize};

use crate::error::PyramergeError;

// ---------------------------------------------------------------------------
// SlabKind
// ---------------------------------------------------------------------------

/// Kind of slab: image data or the transparency mask attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlabKind {
    Data,
    Mask,
}

impl SlabKind {
    /// Storage-layout token for this kind (`DATA` / `MASK`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Mask => "MASK",
        }
    }
}

impl std::fmt::Display for SlabKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SlabKind {
    type Err = PyramergeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DATA" => Ok(Self::Data),
            "MASK" => Ok(Self::Mask),
            other => Err(PyramergeError::pyramid(format!(
                "unknown slab kind: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SlabIdentity
// ---------------------------------------------------------------------------

/// Unique key for a slab across all pyramids sharing one tile matrix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlabIdentity {
    pub kind: SlabKind,
    pub level: u32,
    pub column: u64,
    pub row: u64,
}

impl SlabIdentity {
    pub fn new(kind: SlabKind, level: u32, column: u64, row: u64) -> Self {
        Self {
            kind,
            level,
            column,
            row,
        }
    }

    /// The same slab coordinates, reinterpreted as the given kind.
    pub fn as_kind(&self, kind: SlabKind) -> Self {
        Self { kind, ..*self }
    }
}

impl std::fmt::Display for SlabIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}, {}, {})",
            self.kind, self.level, self.column, self.row
        )
    }
}

// ---------------------------------------------------------------------------
// TileLimits
// ---------------------------------------------------------------------------

/// Tile-coordinate envelope of a pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLimits {
    pub min_col: u64,
    pub min_row: u64,
    pub max_col: u64,
    pub max_row: u64,
}

impl TileLimits {
    /// Coordinate-wise min/max envelope of `self` and `other`.
    pub fn union(&self, other: &TileLimits) -> TileLimits {
        TileLimits {
            min_col: self.min_col.min(other.min_col),
            min_row: self.min_row.min(other.min_row),
            max_col: self.max_col.max(other.max_col),
            max_row: self.max_row.max(other.max_row),
        }
    }
}
