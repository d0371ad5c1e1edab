use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use macroquad::math::{vec2, Rect, Vec2};
use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::tile::TileId;

/// Name of an atlas texture. The host resolves it to a real texture; the core
/// only ever holds the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextureKey(pub String);

impl TextureKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TextureKey {
    fn from(s: &str) -> Self {
        TextureKey(s.to_owned())
    }
}

impl From<String> for TextureKey {
    fn from(s: String) -> Self {
        TextureKey(s)
    }
}

impl fmt::Display for TextureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rectangle inside an atlas, in atlas pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtlasRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl AtlasRegion {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        AtlasRegion { x, y, w, h }
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        vec2(self.w as f32, self.h as f32)
    }

    #[inline]
    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x as f32, self.y as f32, self.w as f32, self.h as f32)
    }
}

/// Collision outline of a tile, in tile-local pixels (origin at the tile's
/// top-left corner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CollisionShape {
    Rect { x: f32, y: f32, w: f32, h: f32 },
    Polygon { points: Vec<[f32; 2]> },
}

impl CollisionShape {
    /// A rectangle covering a whole `w` x `h` tile.
    pub fn full(w: f32, h: f32) -> Self {
        CollisionShape::Rect { x: 0.0, y: 0.0, w, h }
    }

    /// Outline as a closed polygon, clockwise on screen for rectangles.
    pub fn points(&self) -> Vec<Vec2> {
        match self {
            CollisionShape::Rect { x, y, w, h } => vec![
                vec2(*x, *y),
                vec2(x + w, *y),
                vec2(x + w, y + h),
                vec2(*x, y + h),
            ],
            CollisionShape::Polygon { points } => {
                points.iter().map(|p| vec2(p[0], p[1])).collect()
            }
        }
    }
}

/// One entry of a [`TileSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDef {
    pub id: TileId,
    pub region: AtlasRegion,
    /// Atlas override; `None` uses the tile set's default texture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<TextureKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision: Option<CollisionShape>,
}

impl TileDef {
    pub fn new(id: TileId, region: AtlasRegion) -> Self {
        TileDef {
            id,
            region,
            texture: None,
            collision: None,
        }
    }
}

/// Layout of a regular atlas: equally sized tiles in rows, with optional
/// outer margin and spacing between tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasGrid {
    pub tile_w: u32,
    pub tile_h: u32,
    pub columns: u32,
    pub tilecount: u32,
    pub spacing: u32, // 0 if not used
    pub margin: u32,  // 0 if not used
    /// Id given to the atlas' top-left tile.
    pub first_id: u32,
}

impl AtlasGrid {
    /// Source rectangle of the `local`-th tile of the atlas.
    pub fn region(&self, local: u32) -> AtlasRegion {
        let cols = self.columns.max(1);
        let col = local % cols;
        let row = local / cols;
        AtlasRegion {
            x: self.margin + col * (self.tile_w + self.spacing),
            y: self.margin + row * (self.tile_h + self.spacing),
            w: self.tile_w,
            h: self.tile_h,
        }
    }
}

/// Mapping from tile id to atlas region, plus the grid pitch tiles are laid
/// out on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileSet {
    texture: TextureKey,
    tile_w: u32,
    tile_h: u32,
    #[serde(with = "defs_as_seq")]
    tiles: BTreeMap<TileId, TileDef>,
    #[serde(default)]
    strict: bool,
    #[serde(skip, default = "next_revision")]
    revision: u64,
}

/// Revisions are unique across every set in the process, so two distinct
/// sets never report the same one.
fn next_revision() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl TileSet {
    /// Empty set using `texture` as default atlas and `tile_w` x `tile_h` as
    /// the cell size.
    pub fn new(texture: impl Into<TextureKey>, tile_w: u32, tile_h: u32) -> Self {
        TileSet {
            texture: texture.into(),
            tile_w,
            tile_h,
            tiles: BTreeMap::new(),
            strict: false,
            revision: next_revision(),
        }
    }

    /// Set generated from a regular atlas. Cell size is the atlas tile size.
    pub fn from_atlas_grid(texture: impl Into<TextureKey>, grid: AtlasGrid) -> Self {
        let mut set = TileSet::new(texture, grid.tile_w, grid.tile_h);
        for local in 0..grid.tilecount {
            let id = TileId(grid.first_id + local);
            if id.is_empty() {
                continue;
            }
            set.tiles.insert(id, TileDef::new(id, grid.region(local)));
        }
        set.revision = next_revision();
        set
    }

    /// Adds every tile of `grid`, sourced from `texture` (or the default atlas
    /// when `None`). Honours strict mode.
    pub fn add_atlas_grid(
        &mut self,
        texture: Option<TextureKey>,
        grid: AtlasGrid,
    ) -> Result<(), MapError> {
        for local in 0..grid.tilecount {
            let id = TileId(grid.first_id + local);
            if id.is_empty() {
                continue;
            }
            let mut def = TileDef::new(id, grid.region(local));
            def.texture = texture.clone();
            self.define(def)?;
        }
        Ok(())
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Registers or replaces the definition of `id`.
    ///
    /// Last write wins unless the set is strict, in which case redefining an
    /// existing id fails with [`MapError::DuplicateTile`].
    pub fn define_tile(
        &mut self,
        id: TileId,
        region: AtlasRegion,
        collision: Option<CollisionShape>,
    ) -> Result<(), MapError> {
        let mut def = TileDef::new(id, region);
        def.collision = collision;
        self.define(def)
    }

    /// Full form of [`define_tile`](Self::define_tile), allowing a texture
    /// override.
    pub fn define(&mut self, def: TileDef) -> Result<(), MapError> {
        if def.id.is_empty() {
            warn!("ignoring definition for the empty tile id");
            return Ok(());
        }
        match self.tiles.get(&def.id) {
            Some(_) if self.strict => return Err(MapError::DuplicateTile(def.id)),
            Some(existing) if *existing == def => return Ok(()),
            _ => {}
        }
        self.tiles.insert(def.id, def);
        self.revision = next_revision();
        Ok(())
    }

    pub fn remove_tile(&mut self, id: TileId) -> Option<TileDef> {
        let removed = self.tiles.remove(&id);
        if removed.is_some() {
            self.revision = next_revision();
        }
        removed
    }

    /// Replaces the collision shape of an existing tile. Returns `false` if
    /// the tile is unknown.
    pub fn set_collision(&mut self, id: TileId, collision: Option<CollisionShape>) -> bool {
        match self.tiles.get_mut(&id) {
            Some(def) => {
                if def.collision != collision {
                    def.collision = collision;
                    self.revision = next_revision();
                }
                true
            }
            None => false,
        }
    }

    /// Definition of `id`; `None` means the cell renders as empty.
    #[inline]
    pub fn lookup(&self, id: TileId) -> Option<&TileDef> {
        self.tiles.get(&id)
    }

    #[inline]
    pub fn region(&self, id: TileId) -> Option<AtlasRegion> {
        self.lookup(id).map(|d| d.region)
    }

    /// Common cell footprint used for grid-to-pixel conversion.
    #[inline]
    pub fn tile_size(&self) -> Vec2 {
        vec2(self.tile_w as f32, self.tile_h as f32)
    }

    /// Drawn size of one tile. Differs from [`tile_size`](Self::tile_size)
    /// for oversized tiles, which are anchored at the cell's bottom-left.
    pub fn footprint(&self, id: TileId) -> Option<Vec2> {
        self.lookup(id).map(|d| d.region.size())
    }

    /// True when every defined tile matches the cell size.
    pub fn is_uniform(&self) -> bool {
        self.tiles
            .values()
            .all(|d| d.region.w == self.tile_w && d.region.h == self.tile_h)
    }

    pub fn texture(&self) -> &TextureKey {
        &self.texture
    }

    pub fn set_texture(&mut self, texture: impl Into<TextureKey>) {
        let texture = texture.into();
        if texture != self.texture {
            self.texture = texture;
            self.revision = next_revision();
        }
    }

    /// Atlas a definition samples from.
    #[inline]
    pub fn texture_of<'a>(&'a self, def: &'a TileDef) -> &'a TextureKey {
        def.texture.as_ref().unwrap_or(&self.texture)
    }

    /// Every atlas referenced by the set, default first, no duplicates.
    pub fn textures(&self) -> Vec<&TextureKey> {
        let mut out = vec![&self.texture];
        for def in self.tiles.values() {
            if let Some(t) = &def.texture {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileDef> {
        self.tiles.values()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Highest defined id, `0` for an empty set.
    pub fn max_id(&self) -> u32 {
        self.tiles.keys().next_back().map(|id| id.0).unwrap_or(0)
    }

    /// Stamp replaced on every mutation that can change rendered output.
    /// Distinct sets, including freshly deserialized ones, never share one.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

mod defs_as_seq {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::TileDef;
    use crate::tile::TileId;

    pub fn serialize<S: Serializer>(
        tiles: &BTreeMap<TileId, TileDef>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.collect_seq(tiles.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<TileId, TileDef>, D::Error> {
        let defs = Vec::<TileDef>::deserialize(d)?;
        Ok(defs.into_iter().map(|def| (def.id, def)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_2x2() -> AtlasGrid {
        AtlasGrid {
            tile_w: 16,
            tile_h: 16,
            columns: 2,
            tilecount: 4,
            spacing: 2,
            margin: 1,
            first_id: 1,
        }
    }

    #[test]
    fn atlas_grid_applies_margin_and_spacing() {
        let set = TileSet::from_atlas_grid("tiles.png", grid_2x2());
        assert_eq!(set.len(), 4);
        assert_eq!(set.region(TileId(1)), Some(AtlasRegion::new(1, 1, 16, 16)));
        assert_eq!(set.region(TileId(2)), Some(AtlasRegion::new(19, 1, 16, 16)));
        assert_eq!(set.region(TileId(4)), Some(AtlasRegion::new(19, 19, 16, 16)));
        assert_eq!(set.region(TileId(5)), None);
    }

    #[test]
    fn last_write_wins_by_default() {
        let mut set = TileSet::new("a.png", 16, 16);
        set.define_tile(TileId(1), AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap();
        set.define_tile(TileId(1), AtlasRegion::new(16, 0, 16, 16), None)
            .unwrap();
        assert_eq!(set.region(TileId(1)), Some(AtlasRegion::new(16, 0, 16, 16)));
    }

    #[test]
    fn strict_mode_rejects_redefinition() {
        let mut set = TileSet::new("a.png", 16, 16);
        set.set_strict(true);
        set.define_tile(TileId(3), AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap();
        let err = set
            .define_tile(TileId(3), AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap_err();
        assert!(matches!(err, MapError::DuplicateTile(TileId(3))));
    }

    #[test]
    fn revision_tracks_real_changes_only() {
        let mut set = TileSet::new("a.png", 16, 16);
        let r0 = set.revision();
        set.define_tile(TileId(1), AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap();
        let r1 = set.revision();
        assert!(r1 > r0);
        set.define_tile(TileId(1), AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap();
        assert_eq!(set.revision(), r1);
        set.set_texture("a.png");
        assert_eq!(set.revision(), r1);
        set.set_texture("b.png");
        assert!(set.revision() > r1);
    }

    #[test]
    fn distinct_sets_never_share_a_revision() {
        let grid = AtlasGrid {
            tile_w: 16,
            tile_h: 16,
            columns: 2,
            tilecount: 4,
            spacing: 0,
            margin: 0,
            first_id: 1,
        };
        let mut a = TileSet::from_atlas_grid("a.png", grid);
        a.remove_tile(TileId(4));
        let mut b = TileSet::new("a.png", 16, 16);
        b.define_tile(TileId(1), AtlasRegion::new(16, 16, 16, 16), None)
            .unwrap();
        assert_ne!(a.revision(), b.revision());

        let copy: TileSet = serde_json::from_str(&serde_json::to_string(&a).unwrap()).unwrap();
        assert_ne!(copy.revision(), a.revision());
        assert_eq!(copy.region(TileId(2)), a.region(TileId(2)));
    }

    #[test]
    fn remove_tile_drops_the_definition_once() {
        let mut set = TileSet::new("a.png", 16, 16);
        set.define_tile(TileId(2), AtlasRegion::new(16, 0, 16, 16), None)
            .unwrap();
        let r = set.revision();
        let removed = set.remove_tile(TileId(2)).expect("defined");
        assert_eq!(removed.region, AtlasRegion::new(16, 0, 16, 16));
        assert!(set.lookup(TileId(2)).is_none());
        assert_ne!(set.revision(), r);

        let r = set.revision();
        assert!(set.remove_tile(TileId(2)).is_none());
        assert_eq!(set.revision(), r);
    }

    #[test]
    fn empty_id_is_never_defined() {
        let mut set = TileSet::new("a.png", 16, 16);
        set.define_tile(TileId::EMPTY, AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn textures_lists_overrides_once() {
        let mut set = TileSet::new("base.png", 8, 8);
        for id in 1..=3 {
            let mut def = TileDef::new(TileId(id), AtlasRegion::new(0, 0, 8, 8));
            if id > 1 {
                def.texture = Some("extra.png".into());
            }
            set.define(def).unwrap();
        }
        let keys: Vec<&str> = set.textures().iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["base.png", "extra.png"]);
    }

    #[test]
    fn footprint_reports_oversized_tiles() {
        let mut set = TileSet::new("a.png", 16, 16);
        set.define_tile(TileId(1), AtlasRegion::new(0, 0, 16, 32), None)
            .unwrap();
        assert_eq!(set.footprint(TileId(1)), Some(vec2(16.0, 32.0)));
        assert_eq!(set.tile_size(), vec2(16.0, 16.0));
        assert!(!set.is_uniform());
    }

    #[test]
    fn serde_keeps_definitions() {
        let mut set = TileSet::from_atlas_grid("tiles.png", grid_2x2());
        set.set_collision(TileId(2), Some(CollisionShape::full(16.0, 16.0)));
        let json = serde_json::to_string(&set).unwrap();
        let back: TileSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back.lookup(TileId(2)), set.lookup(TileId(2)));
        assert_eq!(back.texture().as_str(), "tiles.png");
    }
}
