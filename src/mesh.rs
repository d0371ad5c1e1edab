//! Batched quad mesh kept in sync with a [`TileGrid`] incrementally.
//!
//! Every visible cell owns exactly one quad (4 vertices, 6 indices) in the
//! batch of its `(layer, texture)`. A per-cell reverse index lets a dirty cell
//! drop its old quad by swap-removal, so a flush costs time proportional to
//! the dirty area rather than the grid.
//!
//! Published meshes are never mutated: a flush clones the snapshot's batch
//! table and only the batches it touches.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::Arc;

use log::{debug, warn};
use macroquad::math::{vec2, Vec2};

use crate::dirty::DirtyRect;
use crate::grid::TileGrid;
use crate::tile::{TileFlags, TileId};
use crate::tileset::{AtlasRegion, TextureKey, TileSet};

/// Host-side resource accessor: resolves an atlas key to its pixel size.
pub trait AtlasLookup {
    fn atlas_size(&self, texture: &TextureKey) -> Option<Vec2>;
}

impl<S: BuildHasher> AtlasLookup for HashMap<TextureKey, Vec2, S> {
    fn atlas_size(&self, texture: &TextureKey) -> Option<Vec2> {
        self.get(texture).copied()
    }
}

impl<T: AtlasLookup + ?Sized> AtlasLookup for &T {
    fn atlas_size(&self, texture: &TextureKey) -> Option<Vec2> {
        (**self).atlas_size(texture)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Pixel position relative to the map's top-left corner.
    pub position: Vec2,
    /// Normalized atlas coordinate.
    pub uv: Vec2,
}

/// Draw batch identity: triangles of one layer sampling one atlas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub layer: usize,
    pub texture: TextureKey,
}

type CellKey = (usize, usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BatchSlot {
    layer: usize,
    texture: u32,
}

#[derive(Debug, Clone, Copy)]
struct QuadSlot {
    batch: BatchSlot,
    quad: usize,
}

/// Vertices and indices sharing one texture on one layer.
#[derive(Debug, Clone)]
pub struct MeshBatch {
    key: BatchKey,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    owners: Vec<(usize, usize)>,
}

impl MeshBatch {
    fn new(key: BatchKey) -> Self {
        MeshBatch {
            key,
            vertices: Vec::new(),
            indices: Vec::new(),
            owners: Vec::new(),
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn quad_count(&self) -> usize {
        self.owners.len()
    }

    /// Grid `(row, col)` that emitted quad `quad`.
    pub fn cell_of(&self, quad: usize) -> Option<(usize, usize)> {
        self.owners.get(quad).copied()
    }

    fn push_quad(&mut self, quad: [Vertex; 4], cell: (usize, usize)) -> usize {
        let index = self.owners.len();
        let base = (index * 4) as u32;
        self.vertices.extend_from_slice(&quad);
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        self.owners.push(cell);
        index
    }

    /// Swap-removes quad `index`. Returns the cell whose quad moved into
    /// `index`, if any.
    fn swap_remove_quad(&mut self, index: usize) -> Option<(usize, usize)> {
        let last = self.owners.len() - 1;
        let moved = if index != last {
            let (head, tail) = self.vertices.split_at_mut(last * 4);
            head[index * 4..index * 4 + 4].copy_from_slice(&tail[..4]);
            self.owners[index] = self.owners[last];
            Some(self.owners[index])
        } else {
            None
        };
        self.owners.pop();
        self.vertices.truncate(last * 4);
        // Index pattern only depends on the quad slot.
        self.indices.truncate(last * 6);
        moved
    }
}

/// One emitted quad, borrowed from a [`Mesh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad<'a> {
    pub layer: usize,
    pub texture: &'a TextureKey,
    pub vertices: [Vertex; 4],
}

impl Quad<'_> {
    fn sort_key(&self) -> (usize, &str, [u32; 16]) {
        let mut bits = [0u32; 16];
        for (i, v) in self.vertices.iter().enumerate() {
            bits[i * 4] = v.position.x.to_bits();
            bits[i * 4 + 1] = v.position.y.to_bits();
            bits[i * 4 + 2] = v.uv.x.to_bits();
            bits[i * 4 + 3] = v.uv.y.to_bits();
        }
        (self.layer, self.texture.as_str(), bits)
    }
}

/// Read-only renderable snapshot.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    batches: BTreeMap<BatchSlot, Arc<MeshBatch>>,
}

impl Mesh {
    /// Batches ordered bottom layer first.
    pub fn batches(&self) -> impl Iterator<Item = &MeshBatch> {
        self.batches.values().map(|b| b.as_ref())
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn quad_count(&self) -> usize {
        self.batches.values().map(|b| b.quad_count()).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.batches.values().map(|b| b.vertices.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn quads(&self) -> impl Iterator<Item = Quad<'_>> {
        self.batches().flat_map(|b| {
            b.vertices.chunks_exact(4).map(move |v| Quad {
                layer: b.key.layer,
                texture: &b.key.texture,
                vertices: [v[0], v[1], v[2], v[3]],
            })
        })
    }

    /// Quads in a canonical order, for comparing meshes by content.
    pub fn sorted_quads(&self) -> Vec<Quad<'_>> {
        let mut quads: Vec<_> = self.quads().collect();
        quads.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        quads
    }
}

/// Counters for one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub rects: usize,
    pub cells: usize,
    pub quads_removed: usize,
    pub quads_added: usize,
    /// Cells whose tile id is missing from the tile set.
    pub unresolved_tiles: usize,
    /// Cells whose atlas could not be resolved by the host.
    pub unresolved_textures: usize,
    pub full_rebuild: bool,
}

#[derive(Default)]
struct Misses {
    tiles: BTreeMap<TileId, usize>,
    textures: BTreeMap<TextureKey, usize>,
}

impl Misses {
    fn report(&self) {
        for (id, count) in &self.tiles {
            warn!("tile {} is not in the tile set, {} cell(s) left empty", id.0, count);
        }
        for (key, count) in &self.textures {
            warn!("atlas '{}' could not be resolved, {} cell(s) left empty", key, count);
        }
    }
}

/// Owns the mesh and rebuilds the parts of it that dirty cells invalidate.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    mesh: Arc<Mesh>,
    slots: HashMap<CellKey, QuadSlot>,
    textures: Vec<TextureKey>,
    built_revision: Option<u64>,
    built_extent: (usize, usize, usize),
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Holding it never blocks or observes later flushes.
    pub fn mesh(&self) -> Arc<Mesh> {
        Arc::clone(&self.mesh)
    }

    /// Forces the next flush to rebuild everything, e.g. after the host
    /// reloaded an atlas with a different size.
    pub fn invalidate(&mut self) {
        self.built_revision = None;
    }

    /// Whether the last build used this tile set revision and grid extent.
    /// Pending cell edits are tracked by the grid, not here.
    pub fn is_current(&self, grid: &TileGrid, tileset: &TileSet) -> bool {
        self.built_revision == Some(tileset.revision())
            && self.built_extent == (grid.layers(), grid.rows(), grid.cols())
    }

    /// Drains the grid's dirty set and reconciles the mesh with it.
    pub fn flush(
        &mut self,
        grid: &mut TileGrid,
        tileset: &TileSet,
        atlas: &impl AtlasLookup,
    ) -> FlushStats {
        let rects = grid.take_dirty();
        self.flush_rects(grid, tileset, atlas, &rects)
    }

    /// Regenerates the quads of every cell in `rects`.
    ///
    /// Falls back to a full rebuild when the tile set or grid extent changed
    /// since the last build, since every cached texture coordinate is stale.
    pub fn flush_rects(
        &mut self,
        grid: &TileGrid,
        tileset: &TileSet,
        atlas: &impl AtlasLookup,
        rects: &[DirtyRect],
    ) -> FlushStats {
        let extent = (grid.layers(), grid.rows(), grid.cols());
        let stats = if self.built_revision != Some(tileset.revision()) || self.built_extent != extent {
            self.rebuild(grid, tileset, atlas)
        } else if rects.is_empty() {
            FlushStats::default()
        } else {
            self.update(grid, tileset, atlas, rects)
        };
        self.built_revision = Some(tileset.revision());
        self.built_extent = extent;

        if stats != FlushStats::default() {
            debug!(
                "mesh flush: {} rects, {} cells, -{} +{} quads, {} batches{}",
                stats.rects,
                stats.cells,
                stats.quads_removed,
                stats.quads_added,
                self.mesh.batch_count(),
                if stats.full_rebuild { " (full rebuild)" } else { "" }
            );
        }
        stats
    }

    fn rebuild(&mut self, grid: &TileGrid, tileset: &TileSet, atlas: &impl AtlasLookup) -> FlushStats {
        let mut stats = FlushStats {
            full_rebuild: true,
            rects: grid.layers(),
            quads_removed: self.slots.len(),
            ..FlushStats::default()
        };
        let mut misses = Misses::default();

        // Fresh snapshot: readers of the old one keep it intact.
        let mut mesh = Mesh::default();
        self.slots.clear();
        self.textures.clear();

        for layer in 0..grid.layers() {
            for (row, col, id, flags) in grid.cells(layer) {
                stats.cells += 1;
                Self::emit(
                    &mut mesh,
                    &mut self.slots,
                    &mut self.textures,
                    tileset,
                    atlas,
                    (layer, row, col),
                    id,
                    flags,
                    &mut stats,
                    &mut misses,
                );
            }
        }

        self.mesh = Arc::new(mesh);
        misses.report();
        stats
    }

    fn update(
        &mut self,
        grid: &TileGrid,
        tileset: &TileSet,
        atlas: &impl AtlasLookup,
        rects: &[DirtyRect],
    ) -> FlushStats {
        let mut stats = FlushStats {
            rects: rects.len(),
            ..FlushStats::default()
        };
        let mut misses = Misses::default();
        let mesh = Arc::make_mut(&mut self.mesh);

        for rect in rects {
            if rect.layer >= grid.layers() {
                continue;
            }
            for (row, col) in rect.clipped(grid.rows(), grid.cols()).cells() {
                let key = (rect.layer, row, col);
                let Ok((id, flags)) = grid.get(rect.layer, row, col) else {
                    continue;
                };
                stats.cells += 1;

                if let Some(slot) = self.slots.remove(&key) {
                    Self::remove(mesh, &mut self.slots, rect.layer, slot);
                    stats.quads_removed += 1;
                }
                if !id.is_empty() {
                    Self::emit(
                        mesh,
                        &mut self.slots,
                        &mut self.textures,
                        tileset,
                        atlas,
                        key,
                        id,
                        flags,
                        &mut stats,
                        &mut misses,
                    );
                }
            }
        }

        mesh.batches.retain(|_, b| b.quad_count() > 0);
        misses.report();
        stats
    }

    fn remove(mesh: &mut Mesh, slots: &mut HashMap<CellKey, QuadSlot>, layer: usize, slot: QuadSlot) {
        let Some(batch) = mesh.batches.get_mut(&slot.batch) else {
            return;
        };
        if let Some((row, col)) = Arc::make_mut(batch).swap_remove_quad(slot.quad) {
            if let Some(moved) = slots.get_mut(&(layer, row, col)) {
                moved.quad = slot.quad;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        mesh: &mut Mesh,
        slots: &mut HashMap<CellKey, QuadSlot>,
        textures: &mut Vec<TextureKey>,
        tileset: &TileSet,
        atlas: &impl AtlasLookup,
        (layer, row, col): CellKey,
        id: TileId,
        flags: TileFlags,
        stats: &mut FlushStats,
        misses: &mut Misses,
    ) {
        let Some(def) = tileset.lookup(id) else {
            stats.unresolved_tiles += 1;
            *misses.tiles.entry(id).or_default() += 1;
            return;
        };
        let texture = tileset.texture_of(def);
        let Some(atlas_size) = atlas
            .atlas_size(texture)
            .filter(|s| s.x > 0.0 && s.y > 0.0)
        else {
            stats.unresolved_textures += 1;
            *misses.textures.entry(texture.clone()).or_default() += 1;
            return;
        };

        let texture_index = match textures.iter().position(|t| t == texture) {
            Some(i) => i as u32,
            None => {
                textures.push(texture.clone());
                (textures.len() - 1) as u32
            }
        };
        let slot = BatchSlot {
            layer,
            texture: texture_index,
        };
        let batch = mesh.batches.entry(slot).or_insert_with(|| {
            Arc::new(MeshBatch::new(BatchKey {
                layer,
                texture: texture.clone(),
            }))
        });

        let quad = quad_vertices(tileset.tile_size(), def.region, atlas_size, flags, row, col);
        let index = Arc::make_mut(batch).push_quad(quad, (row, col));
        slots.insert((layer, row, col), QuadSlot { batch: slot, quad: index });
        stats.quads_added += 1;
    }
}

const CORNERS: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

/// Quad for one cell: TL, TR, BR, BL.
///
/// Position comes from the cell; tiles larger than the cell grow up and to
/// the right from the cell's bottom-left corner. Flips only permute texture
/// coordinates.
pub fn quad_vertices(
    cell_size: Vec2,
    region: AtlasRegion,
    atlas_size: Vec2,
    flags: TileFlags,
    row: usize,
    col: usize,
) -> [Vertex; 4] {
    let size = region.size();
    let origin = vec2(
        col as f32 * cell_size.x,
        (row + 1) as f32 * cell_size.y - size.y,
    );
    let uv_min = vec2(region.x as f32, region.y as f32) / atlas_size;
    let uv_max = vec2((region.x + region.w) as f32, (region.y + region.h) as f32) / atlas_size;

    CORNERS.map(|(cx, cy)| {
        let (mut sx, mut sy) = (cx, cy);
        if flags.flip_h() {
            sx = 1.0 - sx;
        }
        if flags.flip_v() {
            sy = 1.0 - sy;
        }
        if flags.flip_d() {
            std::mem::swap(&mut sx, &mut sy);
        }
        Vertex {
            position: origin + vec2(cx, cy) * size,
            uv: uv_min + (uv_max - uv_min) * vec2(sx, sy),
        }
    })
}
