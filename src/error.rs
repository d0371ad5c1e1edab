use std::{io, path::PathBuf};

use thiserror::Error;

use crate::tile::TileId;

/// Errors surfaced by the tile map core and its loaders.
///
/// Missing tile definitions are not errors: the mesh builder renders those
/// cells as empty and counts them in [`FlushStats`](crate::FlushStats).
#[derive(Debug, Error)]
pub enum MapError {
    /// A grid coordinate fell outside the grid extent.
    #[error("cell (layer {layer}, row {row}, col {col}) is outside a {layers}x{rows}x{cols} grid")]
    OutOfBounds {
        layer: usize,
        row: usize,
        col: usize,
        layers: usize,
        rows: usize,
        cols: usize,
    },

    /// Strict tile sets refuse to redefine an existing id.
    #[error("tile {0:?} is already defined")]
    DuplicateTile(TileId),

    /// Grids need at least one layer, row and column.
    #[error("invalid grid dimensions {layers}x{rows}x{cols}")]
    InvalidDimensions {
        layers: usize,
        rows: usize,
        cols: usize,
    },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid map: {0}")]
    InvalidMap(String),

    #[error("layer '{layer}' has {found} cells, expected {expected}")]
    InvalidLayerSize {
        layer: String,
        expected: usize,
        found: usize,
    },

    #[error("layer '{layer}' references gid {gid}, but the highest known gid is {max_gid}")]
    InvalidTileGid { layer: String, gid: u32, max_gid: u32 },
}
