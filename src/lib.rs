//! Tile map object core: a tile set, a layered tile grid and a batched quad
//! mesh that is rebuilt incrementally from dirty cells.
//!
//! The host keeps a [`TileMap`] per instance, edits it during its update step,
//! calls [`TileMap::flush`] once per tick and hands [`TileMap::mesh`] to its
//! renderer. Atlas textures are only referenced by [`TextureKey`] and resolved
//! through an [`AtlasLookup`] supplied by the host.

pub mod bounds;
mod collision;
mod dirty;
#[cfg(feature = "editor")]
pub mod editor;
mod error;
mod grid;
mod loader {
    pub mod json_loader;
}
mod mesh;
mod tile;
mod tilemap;
mod tileset;

pub use collision::{collision_shapes, CellCollider};
pub use dirty::{DirtyRect, DirtyTracker};
pub use error::MapError;
pub use grid::{TileGrid, TileGridData};
pub use loader::json_loader::{decode_tiled_map_str, load_tiled_map, TiledMap};
pub use mesh::{
    quad_vertices, AtlasLookup, BatchKey, FlushStats, Mesh, MeshBatch, MeshBuilder, Quad, Vertex,
};
pub use tile::{TileFlags, TileId};
pub use tilemap::{MeshState, TileMap, TileMapData};
pub use tileset::{AtlasGrid, AtlasRegion, CollisionShape, TextureKey, TileDef, TileSet};
