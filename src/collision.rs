use macroquad::math::{vec2, Vec2};

use crate::grid::TileGrid;
use crate::tile::{TileFlags, TileId};
use crate::tileset::TileSet;

/// Collision polygon of one cell, in map-local pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct CellCollider {
    pub layer: usize,
    pub row: usize,
    pub col: usize,
    pub id: TileId,
    pub polygon: Vec<Vec2>,
}

/// Colliders of every cell whose tile has a collision shape.
///
/// `layer` restricts the scan to one layer. Cells flagged
/// [`TileFlags::NO_COLLIDE`] and unknown tiles contribute nothing. Unlike the
/// mesh, flips transform the outline itself.
pub fn collision_shapes(grid: &TileGrid, tileset: &TileSet, layer: Option<usize>) -> Vec<CellCollider> {
    let layers = match layer {
        Some(l) if l < grid.layers() => l..l + 1,
        Some(_) => 0..0,
        None => 0..grid.layers(),
    };
    let cell = tileset.tile_size();

    let mut out = Vec::new();
    for layer in layers {
        for (row, col, id, flags) in grid.cells(layer) {
            if !flags.collides() {
                continue;
            }
            let Some(def) = tileset.lookup(id) else {
                continue;
            };
            let Some(shape) = &def.collision else {
                continue;
            };
            let size = def.region.size();
            let origin = vec2(col as f32 * cell.x, (row + 1) as f32 * cell.y - size.y);
            let polygon = shape
                .points()
                .into_iter()
                .map(|p| origin + orient(p, size, flags))
                .collect();
            out.push(CellCollider {
                layer,
                row,
                col,
                id,
                polygon,
            });
        }
    }
    out
}

/// Applies the cell's flips to a tile-local point: transpose, then mirror.
fn orient(p: Vec2, size: Vec2, flags: TileFlags) -> Vec2 {
    let (mut x, mut y) = (p.x, p.y);
    let (mut w, mut h) = (size.x, size.y);
    if flags.flip_d() {
        std::mem::swap(&mut x, &mut y);
        std::mem::swap(&mut w, &mut h);
    }
    if flags.flip_h() {
        x = w - x;
    }
    if flags.flip_v() {
        y = h - y;
    }
    vec2(x, y)
}
