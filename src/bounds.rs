//! Object size derived from grid dimensions and the tile set's cell size.
//!
//! Nothing here is cached; every call recomputes from the inputs.

use macroquad::math::{vec2, Rect, Vec2};

use crate::grid::TileGrid;
use crate::tileset::TileSet;

#[inline]
pub fn width(grid: &TileGrid, tileset: &TileSet) -> f32 {
    grid.cols() as f32 * tileset.tile_size().x
}

#[inline]
pub fn height(grid: &TileGrid, tileset: &TileSet) -> f32 {
    grid.rows() as f32 * tileset.tile_size().y
}

#[inline]
pub fn size(grid: &TileGrid, tileset: &TileSet) -> Vec2 {
    vec2(width(grid, tileset), height(grid, tileset))
}

/// World-space rectangle of a map drawn at `origin`.
pub fn rect(grid: &TileGrid, tileset: &TileSet, origin: Vec2) -> Rect {
    let s = size(grid, tileset);
    Rect::new(origin.x, origin.y, s.x, s.y)
}

/// Cell `(row, col)` under a point given in map-local pixels.
pub fn cell_at(grid: &TileGrid, tileset: &TileSet, point: Vec2) -> Option<(usize, usize)> {
    let tile = tileset.tile_size();
    if point.x < 0.0 || point.y < 0.0 || tile.x <= 0.0 || tile.y <= 0.0 {
        return None;
    }
    let col = (point.x / tile.x) as usize;
    let row = (point.y / tile.y) as usize;
    (row < grid.rows() && col < grid.cols()).then_some((row, col))
}
