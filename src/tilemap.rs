use std::sync::Arc;

use macroquad::math::{Rect, Vec2};
use serde::{Deserialize, Serialize};

use crate::bounds;
use crate::collision::{collision_shapes, CellCollider};
use crate::error::MapError;
use crate::grid::TileGrid;
use crate::mesh::{AtlasLookup, FlushStats, Mesh, MeshBuilder};
use crate::tile::{TileFlags, TileId};
use crate::tileset::{TextureKey, TileSet};

/// Whether the published mesh reflects the grid and tile set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    Clean,
    Dirty,
}

/// Persistent part of a [`TileMap`]. The host serializes this; the mesh is
/// rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileMapData {
    pub tileset: TileSet,
    pub grid: TileGrid,
}

/// Tile map object: the handle a host keeps per instance.
///
/// Mutate during the update step, call [`flush`](Self::flush) once after the
/// tick's edits, hand [`mesh`](Self::mesh) to the renderer.
#[derive(Debug)]
pub struct TileMap {
    tileset: TileSet,
    grid: TileGrid,
    builder: MeshBuilder,
}

impl TileMap {
    pub fn new(tileset: TileSet, layers: usize, rows: usize, cols: usize) -> Result<Self, MapError> {
        Ok(TileMap {
            tileset,
            grid: TileGrid::new(layers, rows, cols)?,
            builder: MeshBuilder::new(),
        })
    }

    pub fn from_data(data: TileMapData) -> Self {
        let TileMapData { tileset, mut grid } = data;
        grid.mark_all_dirty();
        TileMap {
            tileset,
            grid,
            builder: MeshBuilder::new(),
        }
    }

    pub fn to_data(&self) -> TileMapData {
        TileMapData {
            tileset: self.tileset.clone(),
            grid: self.grid.clone(),
        }
    }

    pub fn tileset(&self) -> &TileSet {
        &self.tileset
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn get_tile(&self, layer: usize, row: usize, col: usize) -> Result<(TileId, TileFlags), MapError> {
        self.grid.get(layer, row, col)
    }

    pub fn set_tile(
        &mut self,
        layer: usize,
        row: usize,
        col: usize,
        id: TileId,
        flags: TileFlags,
    ) -> Result<bool, MapError> {
        self.grid.set(layer, row, col, id, flags)
    }

    pub fn clear_tile(&mut self, layer: usize, row: usize, col: usize) -> Result<bool, MapError> {
        self.grid.clear(layer, row, col)
    }

    pub fn fill_layer(&mut self, layer: usize, id: TileId, flags: TileFlags) -> Result<usize, MapError> {
        self.grid.fill(layer, id, flags)
    }

    pub fn resize(&mut self, cols: usize, rows: usize) -> Result<(), MapError> {
        self.grid.resize(cols, rows)
    }

    /// Runs `f` against the tile set. Any change to it invalidates the whole
    /// mesh.
    pub fn update_tileset<R>(&mut self, f: impl FnOnce(&mut TileSet) -> R) -> R {
        let before = self.tileset.revision();
        let out = f(&mut self.tileset);
        if self.tileset.revision() != before {
            self.grid.mark_all_dirty();
        }
        out
    }

    /// Swaps in another tile set, returning the old one.
    pub fn replace_tileset(&mut self, tileset: TileSet) -> TileSet {
        let old = std::mem::replace(&mut self.tileset, tileset);
        self.grid.mark_all_dirty();
        self.builder.invalidate();
        old
    }

    /// Reconciles pending edits into a new mesh snapshot.
    pub fn flush(&mut self, atlas: &impl AtlasLookup) -> FlushStats {
        self.builder.flush(&mut self.grid, &self.tileset, atlas)
    }

    pub fn mesh(&self) -> Arc<Mesh> {
        self.builder.mesh()
    }

    pub fn state(&self) -> MeshState {
        if self.grid.dirty().is_empty() && self.builder.is_current(&self.grid, &self.tileset) {
            MeshState::Clean
        } else {
            MeshState::Dirty
        }
    }

    pub fn width(&self) -> f32 {
        bounds::width(&self.grid, &self.tileset)
    }

    pub fn height(&self) -> f32 {
        bounds::height(&self.grid, &self.tileset)
    }

    pub fn size(&self) -> Vec2 {
        bounds::size(&self.grid, &self.tileset)
    }

    pub fn rect(&self, origin: Vec2) -> Rect {
        bounds::rect(&self.grid, &self.tileset, origin)
    }

    pub fn cell_at(&self, point: Vec2) -> Option<(usize, usize)> {
        bounds::cell_at(&self.grid, &self.tileset, point)
    }

    pub fn collision_shapes(&self, layer: Option<usize>) -> Vec<CellCollider> {
        collision_shapes(&self.grid, &self.tileset, layer)
    }

    /// Atlases the host must have loaded to draw this map.
    pub fn textures(&self) -> Vec<&TextureKey> {
        self.tileset.textures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tileset::AtlasRegion;
    use macroquad::math::vec2;
    use std::collections::HashMap;

    fn atlas() -> HashMap<TextureKey, Vec2> {
        HashMap::from([(TextureKey::from("a.png"), vec2(32.0, 32.0))])
    }

    fn map() -> TileMap {
        let mut set = TileSet::new("a.png", 16, 16);
        set.define_tile(TileId(1), AtlasRegion::new(0, 0, 16, 16), None)
            .unwrap();
        TileMap::new(set, 1, 2, 2).unwrap()
    }

    #[test]
    fn state_follows_edits_and_flushes() {
        let mut m = map();
        assert_eq!(m.state(), MeshState::Dirty);
        m.flush(&atlas());
        assert_eq!(m.state(), MeshState::Clean);

        m.set_tile(0, 0, 0, TileId(1), TileFlags::NONE).unwrap();
        assert_eq!(m.state(), MeshState::Dirty);
        m.flush(&atlas());
        assert_eq!(m.state(), MeshState::Clean);

        // Writing the same value is not an edit.
        m.set_tile(0, 0, 0, TileId(1), TileFlags::NONE).unwrap();
        assert_eq!(m.state(), MeshState::Clean);
    }

    #[test]
    fn tileset_edits_dirty_the_map() {
        let mut m = map();
        m.flush(&atlas());
        let unchanged = m.update_tileset(|set| set.len());
        assert_eq!(unchanged, 1);
        assert_eq!(m.state(), MeshState::Clean);

        m.update_tileset(|set| {
            set.define_tile(TileId(2), AtlasRegion::new(16, 0, 16, 16), None)
        })
        .unwrap();
        assert_eq!(m.state(), MeshState::Dirty);
        assert!(m.flush(&atlas()).full_rebuild);
    }

    #[test]
    fn replacing_the_tileset_rebuilds_with_new_regions() {
        let mut m = map();
        m.set_tile(0, 1, 1, TileId(1), TileFlags::NONE).unwrap();
        m.flush(&atlas());

        let mut other = TileSet::new("a.png", 16, 16);
        other
            .define_tile(TileId(1), AtlasRegion::new(16, 16, 16, 16), None)
            .unwrap();
        let old = m.replace_tileset(other);
        assert_eq!(old.region(TileId(1)), Some(AtlasRegion::new(0, 0, 16, 16)));
        assert_eq!(m.state(), MeshState::Dirty);

        let stats = m.flush(&atlas());
        assert!(stats.full_rebuild);
        assert_eq!(m.state(), MeshState::Clean);
        let mesh = m.mesh();
        let quad = mesh.quads().next().unwrap();
        assert_eq!(quad.vertices[0].uv, vec2(0.5, 0.5));
        assert_eq!(quad.vertices[0].position, vec2(16.0, 16.0));

        // Even an identical copy goes through a rebuild.
        let copy = m.tileset().clone();
        m.replace_tileset(copy);
        assert!(m.flush(&atlas()).full_rebuild);
    }

    #[test]
    fn data_round_trip_rebuilds_same_mesh() {
        let mut m = map();
        m.set_tile(0, 1, 0, TileId(1), TileFlags::FLIP_V).unwrap();
        m.flush(&atlas());

        let json = serde_json::to_string(&m.to_data()).unwrap();
        let mut restored = TileMap::from_data(serde_json::from_str(&json).unwrap());
        restored.flush(&atlas());
        assert_eq!(m.mesh().sorted_quads(), restored.mesh().sorted_quads());
        assert_eq!(restored.size(), vec2(32.0, 32.0));
    }
}
