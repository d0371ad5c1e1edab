use serde::{Deserialize, Serialize};

pub const FLIP_H: u32 = 0x8000_0000; // bit 31
pub const FLIP_V: u32 = 0x4000_0000; // bit 30
pub const FLIP_D: u32 = 0x2000_0000; // bit 29
pub const NO_COLLIDE: u32 = 0x1000_0000; // bit 28
pub const FLAG_MASK: u32 = 0xF000_0000;
pub const ID_MASK: u32 = 0x0FFF_FFFF; // keep lower 28 bits

/// Identifier of a tile type inside a [`TileSet`](crate::TileSet).
///
/// `TileId(0)` is the empty cell and is never drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(pub u32);

impl TileId {
    /// The empty sentinel.
    pub const EMPTY: TileId = TileId(0);

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 & ID_MASK == 0
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Per-cell flags packed into the high bits of a cell.
///
/// Flips follow the Tiled convention: the diagonal flip (transpose) is applied
/// first, then horizontal, then vertical. Rotations are expressed as
/// combinations of the three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileFlags(u32);

impl TileFlags {
    pub const NONE: TileFlags = TileFlags(0);
    pub const FLIP_H: TileFlags = TileFlags(FLIP_H);
    pub const FLIP_V: TileFlags = TileFlags(FLIP_V);
    pub const FLIP_D: TileFlags = TileFlags(FLIP_D);
    pub const NO_COLLIDE: TileFlags = TileFlags(NO_COLLIDE);

    /// Builds flags from raw bits, dropping anything outside the flag mask.
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        TileFlags(bits & FLAG_MASK)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: TileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn with(self, other: TileFlags) -> Self {
        TileFlags(self.0 | other.0)
    }

    #[inline]
    pub fn without(self, other: TileFlags) -> Self {
        TileFlags(self.0 & !other.0)
    }

    #[inline] pub fn flip_h(self) -> bool { self.0 & FLIP_H != 0 }
    #[inline] pub fn flip_v(self) -> bool { self.0 & FLIP_V != 0 }
    #[inline] pub fn flip_d(self) -> bool { self.0 & FLIP_D != 0 }
    #[inline] pub fn collides(self) -> bool { self.0 & NO_COLLIDE == 0 }

    /// Mirrors the tile horizontally in its final orientation.
    pub fn flipped_h(self) -> Self {
        TileFlags(self.0 ^ FLIP_H)
    }

    /// Mirrors the tile vertically in its final orientation.
    pub fn flipped_v(self) -> Self {
        TileFlags(self.0 ^ FLIP_V)
    }

    /// Rotates the tile 90° clockwise.
    ///
    /// A clockwise turn is a transpose followed by a horizontal mirror;
    /// composing it onto the existing D→H→V transform gives `(!d, !v, h)`.
    pub fn rotated_cw(self) -> Self {
        let (d, h, v) = (self.flip_d(), self.flip_h(), self.flip_v());
        TileFlags(self.0 & NO_COLLIDE).with(Self::from_dhv(!d, !v, h))
    }

    /// Rotates the tile 90° counter-clockwise.
    pub fn rotated_ccw(self) -> Self {
        self.rotated_cw().rotated_cw().rotated_cw()
    }

    fn from_dhv(d: bool, h: bool, v: bool) -> Self {
        let mut bits = 0;
        if d {
            bits |= FLIP_D;
        }
        if h {
            bits |= FLIP_H;
        }
        if v {
            bits |= FLIP_V;
        }
        TileFlags(bits)
    }
}

/// Packs an id and its flags into a single cell word.
#[inline]
pub fn pack(id: TileId, flags: TileFlags) -> u32 {
    (id.0 & ID_MASK) | flags.bits()
}

/// Splits a cell word into its id and flags.
#[inline]
pub fn unpack(cell: u32) -> (TileId, TileFlags) {
    (TileId(cell & ID_MASK), TileFlags::from_bits(cell))
}
