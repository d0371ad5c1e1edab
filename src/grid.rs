use serde::{Deserialize, Serialize};

use crate::dirty::{DirtyRect, DirtyTracker};
use crate::error::MapError;
use crate::tile::{pack, unpack, TileFlags, TileId};

/// Serialized form of a [`TileGrid`]: one row-major vector of packed cells
/// per layer, bottom layer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGridData {
    pub rows: usize,
    pub cols: usize,
    pub layers: Vec<Vec<u32>>,
}

/// Layered grid of packed cells.
///
/// Every effective change is recorded in the grid's [`DirtyTracker`]; writes
/// that leave a cell as it was are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TileGridData", into = "TileGridData")]
pub struct TileGrid {
    layers: usize,
    rows: usize,
    cols: usize,
    cells: Vec<u32>, // layer-major, then row-major
    dirty: DirtyTracker,
}

impl TileGrid {
    /// Empty grid. Fails if any dimension is zero or the cell count overflows.
    pub fn new(layers: usize, rows: usize, cols: usize) -> Result<Self, MapError> {
        let count = cell_count(layers, rows, cols)?;
        Ok(TileGrid {
            layers,
            rows,
            cols,
            cells: vec![0; count],
            dirty: DirtyTracker::new(layers, rows, cols),
        })
    }

    /// Grid restored from its serialized form. Everything starts dirty.
    pub fn from_data(data: TileGridData) -> Result<Self, MapError> {
        // Lengths are checked before anything is allocated.
        let expected = cell_count(1, data.rows, data.cols).map_err(|_| MapError::InvalidDimensions {
            layers: data.layers.len(),
            rows: data.rows,
            cols: data.cols,
        })?;
        for (i, layer) in data.layers.iter().enumerate() {
            if layer.len() != expected {
                return Err(MapError::InvalidLayerSize {
                    layer: i.to_string(),
                    expected,
                    found: layer.len(),
                });
            }
        }
        let mut grid = TileGrid::new(data.layers.len(), data.rows, data.cols)?;
        for (i, layer) in data.layers.iter().enumerate() {
            grid.cells[i * expected..(i + 1) * expected].copy_from_slice(layer);
        }
        grid.dirty.mark_all_dirty();
        Ok(grid)
    }

    pub fn to_data(&self) -> TileGridData {
        TileGridData {
            rows: self.rows,
            cols: self.cols,
            layers: self
                .cells
                .chunks(self.rows * self.cols)
                .map(|c| c.to_vec())
                .collect(),
        }
    }

    #[inline] pub fn layers(&self) -> usize { self.layers }
    #[inline] pub fn rows(&self) -> usize { self.rows }
    #[inline] pub fn cols(&self) -> usize { self.cols }

    #[inline]
    fn index(&self, layer: usize, row: usize, col: usize) -> Result<usize, MapError> {
        if layer >= self.layers || row >= self.rows || col >= self.cols {
            return Err(MapError::OutOfBounds {
                layer,
                row,
                col,
                layers: self.layers,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok((layer * self.rows + row) * self.cols + col)
    }

    pub fn get(&self, layer: usize, row: usize, col: usize) -> Result<(TileId, TileFlags), MapError> {
        self.index(layer, row, col).map(|i| unpack(self.cells[i]))
    }

    /// Packed cell word, flags included.
    pub fn get_raw(&self, layer: usize, row: usize, col: usize) -> Result<u32, MapError> {
        self.index(layer, row, col).map(|i| self.cells[i])
    }

    /// Writes a cell. Returns whether the cell actually changed.
    pub fn set(
        &mut self,
        layer: usize,
        row: usize,
        col: usize,
        id: TileId,
        flags: TileFlags,
    ) -> Result<bool, MapError> {
        let i = self.index(layer, row, col)?;
        let cell = pack(id, flags);
        if self.cells[i] == cell {
            return Ok(false);
        }
        self.cells[i] = cell;
        self.dirty.mark_dirty(layer, row, col);
        Ok(true)
    }

    /// Clears a cell back to the empty tile.
    pub fn clear(&mut self, layer: usize, row: usize, col: usize) -> Result<bool, MapError> {
        self.set(layer, row, col, TileId::EMPTY, TileFlags::NONE)
    }

    /// Sets every cell of `layer`. Returns the number of cells that changed.
    pub fn fill(&mut self, layer: usize, id: TileId, flags: TileFlags) -> Result<usize, MapError> {
        self.index(layer, 0, 0)?;
        let mut changed = 0;
        for row in 0..self.rows {
            for col in 0..self.cols {
                if self.set(layer, row, col, id, flags)? {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Resizes every layer. Overlapping cells keep their content, new cells
    /// are empty, cells past the new extent are dropped.
    pub fn resize(&mut self, cols: usize, rows: usize) -> Result<(), MapError> {
        let count = cell_count(self.layers, rows, cols)?;
        if rows == self.rows && cols == self.cols {
            return Ok(());
        }

        let mut cells = vec![0; count];
        let keep_rows = rows.min(self.rows);
        let keep_cols = cols.min(self.cols);
        for layer in 0..self.layers {
            for row in 0..keep_rows {
                let src = (layer * self.rows + row) * self.cols;
                let dst = (layer * rows + row) * cols;
                cells[dst..dst + keep_cols].copy_from_slice(&self.cells[src..src + keep_cols]);
            }
        }

        self.cells = cells;
        self.rows = rows;
        self.cols = cols;
        self.dirty.set_extent(self.layers, rows, cols);
        self.dirty.mark_all_dirty();
        Ok(())
    }

    /// Row-major packed cells of one layer.
    pub fn layer_data(&self, layer: usize) -> Result<&[u32], MapError> {
        self.index(layer, 0, 0)?;
        let n = self.rows * self.cols;
        Ok(&self.cells[layer * n..(layer + 1) * n])
    }

    /// Non-empty cells of `layer` as `(row, col, id, flags)`.
    pub fn cells(&self, layer: usize) -> impl Iterator<Item = (usize, usize, TileId, TileFlags)> + '_ {
        let n = self.rows * self.cols;
        let cols = self.cols;
        let slice = if layer < self.layers {
            &self.cells[layer * n..(layer + 1) * n]
        } else {
            &[][..]
        };
        slice.iter().enumerate().filter_map(move |(i, &cell)| {
            let (id, flags) = unpack(cell);
            (!id.is_empty()).then(|| (i / cols, i % cols, id, flags))
        })
    }

    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    pub fn dirty_mut(&mut self) -> &mut DirtyTracker {
        &mut self.dirty
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty.mark_all_dirty();
    }

    /// Drains the pending dirty rectangles.
    pub fn take_dirty(&mut self) -> Vec<DirtyRect> {
        self.dirty.drain()
    }
}

/// Total cell count, rejecting empty or overflowing extents.
fn cell_count(layers: usize, rows: usize, cols: usize) -> Result<usize, MapError> {
    layers
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .filter(|&n| n > 0)
        .ok_or(MapError::InvalidDimensions { layers, rows, cols })
}

impl TryFrom<TileGridData> for TileGrid {
    type Error = MapError;

    fn try_from(data: TileGridData) -> Result<Self, Self::Error> {
        TileGrid::from_data(data)
    }
}

impl From<TileGrid> for TileGridData {
    fn from(grid: TileGrid) -> Self {
        grid.to_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_written_cell() {
        let mut g = TileGrid::new(2, 3, 4).unwrap();
        for layer in 0..2 {
            for row in 0..3 {
                for col in 0..4 {
                    let id = TileId((layer * 100 + row * 10 + col + 1) as u32);
                    let flags = if col % 2 == 0 { TileFlags::FLIP_V } else { TileFlags::NONE };
                    g.set(layer, row, col, id, flags).unwrap();
                    assert_eq!(g.get(layer, row, col).unwrap(), (id, flags));
                }
            }
        }
    }

    #[test]
    fn out_of_range_fails_on_every_axis() {
        let mut g = TileGrid::new(1, 2, 2).unwrap();
        for (l, r, c) in [(1, 0, 0), (0, 2, 0), (0, 0, 2), (0, usize::MAX, 0)] {
            assert!(matches!(g.get(l, r, c), Err(MapError::OutOfBounds { .. })));
            assert!(matches!(
                g.set(l, r, c, TileId(1), TileFlags::NONE),
                Err(MapError::OutOfBounds { .. })
            ));
        }
        assert!(g.dirty().is_empty());
    }

    #[test]
    fn identical_write_does_not_mark_dirty() {
        let mut g = TileGrid::new(1, 2, 2).unwrap();
        assert!(g.set(0, 1, 1, TileId(5), TileFlags::FLIP_H).unwrap());
        g.take_dirty();
        assert!(!g.set(0, 1, 1, TileId(5), TileFlags::FLIP_H).unwrap());
        assert!(!g.set(0, 0, 0, TileId::EMPTY, TileFlags::NONE).unwrap());
        assert!(g.take_dirty().is_empty());
    }

    #[test]
    fn flag_only_change_marks_dirty() {
        let mut g = TileGrid::new(1, 2, 2).unwrap();
        g.set(0, 0, 1, TileId(5), TileFlags::NONE).unwrap();
        g.take_dirty();
        g.set(0, 0, 1, TileId(5), TileFlags::FLIP_D).unwrap();
        assert_eq!(g.take_dirty(), vec![DirtyRect::cell(0, 0, 1)]);
    }

    #[test]
    fn shrinking_keeps_the_top_left_block() {
        let mut g = TileGrid::new(1, 4, 4).unwrap();
        for row in 0..4 {
            for col in 0..4 {
                g.set(0, row, col, TileId((row * 4 + col + 1) as u32), TileFlags::NONE)
                    .unwrap();
            }
        }
        g.resize(2, 2).unwrap();
        assert_eq!((g.rows(), g.cols()), (2, 2));
        assert_eq!(g.layer_data(0).unwrap(), &[1, 2, 5, 6]);
        assert!(g.get(0, 2, 0).is_err());
        assert!(g.get(0, 0, 2).is_err());
    }

    #[test]
    fn growing_fills_with_empty() {
        let mut g = TileGrid::new(1, 1, 2).unwrap();
        g.set(0, 0, 1, TileId(9), TileFlags::NONE).unwrap();
        g.resize(3, 2).unwrap();
        assert_eq!(g.get(0, 0, 1).unwrap().0, TileId(9));
        assert_eq!(g.get(0, 1, 2).unwrap().0, TileId::EMPTY);
        assert!(g.dirty().is_all_dirty());
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            TileGrid::new(1, 0, 3),
            Err(MapError::InvalidDimensions { .. })
        ));
        let mut g = TileGrid::new(1, 1, 1).unwrap();
        assert!(g.resize(0, 1).is_err());
    }

    #[test]
    fn overflowing_dimensions_are_rejected() {
        assert!(matches!(
            TileGrid::new(2, usize::MAX, 2),
            Err(MapError::InvalidDimensions { .. })
        ));
        let mut g = TileGrid::new(2, 1, 1).unwrap();
        assert!(matches!(
            g.resize(usize::MAX, 2),
            Err(MapError::InvalidDimensions { .. })
        ));
        assert_eq!((g.rows(), g.cols()), (1, 1));
    }

    #[test]
    fn huge_serialized_extent_is_an_error() {
        let json = r#"{"rows":4294967296,"cols":4294967296,"layers":[[]]}"#;
        assert!(serde_json::from_str::<TileGrid>(json).is_err());

        let err = TileGrid::from_data(TileGridData {
            rows: usize::MAX / 2,
            cols: 3,
            layers: vec![vec![]],
        })
        .unwrap_err();
        assert!(matches!(err, MapError::InvalidDimensions { .. }));

        // Fits in usize, but the data does not match: refused before allocating.
        let err = TileGrid::from_data(TileGridData {
            rows: 1 << 15,
            cols: 1 << 15,
            layers: vec![vec![]],
        })
        .unwrap_err();
        assert!(matches!(err, MapError::InvalidLayerSize { found: 0, .. }));
    }

    #[test]
    fn fill_counts_changed_cells() {
        let mut g = TileGrid::new(1, 2, 3).unwrap();
        g.set(0, 0, 0, TileId(2), TileFlags::NONE).unwrap();
        assert_eq!(g.fill(0, TileId(2), TileFlags::NONE).unwrap(), 5);
    }

    #[test]
    fn cells_skips_empty() {
        let mut g = TileGrid::new(1, 2, 2).unwrap();
        g.set(0, 1, 0, TileId(3), TileFlags::FLIP_H).unwrap();
        let cells: Vec<_> = g.cells(0).collect();
        assert_eq!(cells, vec![(1, 0, TileId(3), TileFlags::FLIP_H)]);
        assert_eq!(g.cells(7).count(), 0);
    }

    #[test]
    fn serde_round_trip_starts_all_dirty() {
        let mut g = TileGrid::new(2, 2, 2).unwrap();
        g.set(1, 1, 1, TileId(4), TileFlags::FLIP_V).unwrap();
        let json = serde_json::to_string(&g).unwrap();
        let back: TileGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(1, 1, 1).unwrap(), (TileId(4), TileFlags::FLIP_V));
        assert!(back.dirty().is_all_dirty());
    }

    #[test]
    fn mismatched_layer_data_is_rejected() {
        let data = TileGridData {
            rows: 2,
            cols: 2,
            layers: vec![vec![0; 3]],
        };
        assert!(matches!(
            TileGrid::from_data(data),
            Err(MapError::InvalidLayerSize { found: 3, .. })
        ));
    }
}
