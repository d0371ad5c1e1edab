//! Dirty cell tracking for incremental mesh rebuilds.

use std::collections::{BTreeSet, HashMap};

use log::trace;

/// Rectangle of cells on one layer whose mesh contribution is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirtyRect {
    pub layer: usize,
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl DirtyRect {
    pub fn cell(layer: usize, row: usize, col: usize) -> Self {
        DirtyRect {
            layer,
            row,
            col,
            rows: 1,
            cols: 1,
        }
    }

    #[inline]
    fn row_end(&self) -> usize {
        self.row.saturating_add(self.rows)
    }

    #[inline]
    fn col_end(&self) -> usize {
        self.col.saturating_add(self.cols)
    }

    #[inline]
    pub fn contains(&self, layer: usize, row: usize, col: usize) -> bool {
        layer == self.layer
            && row >= self.row
            && row < self.row_end()
            && col >= self.col
            && col < self.col_end()
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    /// Same rectangle cut down to a `rows` x `cols` extent. May come back
    /// empty.
    pub fn clipped(&self, rows: usize, cols: usize) -> DirtyRect {
        let row = self.row.min(rows);
        let col = self.col.min(cols);
        DirtyRect {
            layer: self.layer,
            row,
            col,
            rows: self.row_end().min(rows) - row,
            cols: self.col_end().min(cols) - col,
        }
    }

    /// `(row, col)` of every covered cell, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.row..self.row_end())
            .flat_map(move |r| (self.col..self.col_end()).map(move |c| (r, c)))
    }
}

/// Pending set of cells whose quads must be regenerated.
///
/// Marks outside the current extent are ignored; the grid validates
/// coordinates before marking.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    cells: BTreeSet<(usize, usize, usize)>,
    all: bool,
    layers: usize,
    rows: usize,
    cols: usize,
}

impl DirtyTracker {
    pub fn new(layers: usize, rows: usize, cols: usize) -> Self {
        DirtyTracker {
            cells: BTreeSet::new(),
            all: false,
            layers,
            rows,
            cols,
        }
    }

    /// Updates the extent after a resize, dropping marks that fell outside.
    pub fn set_extent(&mut self, layers: usize, rows: usize, cols: usize) {
        self.layers = layers;
        self.rows = rows;
        self.cols = cols;
        self.cells
            .retain(|&(l, r, c)| l < layers && r < rows && c < cols);
    }

    #[inline]
    pub fn mark_dirty(&mut self, layer: usize, row: usize, col: usize) {
        if self.all || layer >= self.layers || row >= self.rows || col >= self.cols {
            return;
        }
        self.cells.insert((layer, row, col));
    }

    /// Marks every cell of `rect`, clipped to the extent.
    pub fn mark_rect(&mut self, rect: DirtyRect) {
        if self.all || rect.layer >= self.layers {
            return;
        }
        for (r, c) in rect.clipped(self.rows, self.cols).cells() {
            self.cells.insert((rect.layer, r, c));
        }
    }

    /// Invalidates the whole grid; used when the tile set changes.
    pub fn mark_all_dirty(&mut self) {
        self.all = true;
        self.cells.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.all && self.cells.is_empty()
    }

    #[inline]
    pub fn is_all_dirty(&self) -> bool {
        self.all
    }

    /// Number of individually marked cells (0 while everything is dirty).
    #[inline]
    pub fn pending_cells(&self) -> usize {
        self.cells.len()
    }

    /// Takes the pending set as covering rectangles, sorted by layer, row,
    /// column. Returns nothing when no marks are pending.
    pub fn drain(&mut self) -> Vec<DirtyRect> {
        if self.all {
            self.all = false;
            if self.rows == 0 || self.cols == 0 {
                return Vec::new();
            }
            return (0..self.layers)
                .map(|layer| DirtyRect {
                    layer,
                    row: 0,
                    col: 0,
                    rows: self.rows,
                    cols: self.cols,
                })
                .collect();
        }

        let cells = std::mem::take(&mut self.cells);
        let marked = cells.len();
        let rects = coalesce(cells.into_iter());
        if marked > 0 {
            trace!("dirty drain: {} cells -> {} rects", marked, rects.len());
        }
        rects
    }
}

/// Merges sorted cells into row runs, then stacks runs with the same column
/// span on consecutive rows.
fn coalesce(cells: impl Iterator<Item = (usize, usize, usize)>) -> Vec<DirtyRect> {
    let mut runs: Vec<DirtyRect> = Vec::new();
    for (layer, row, col) in cells {
        match runs.last_mut() {
            Some(run) if run.layer == layer && run.row == row && run.col + run.cols == col => {
                run.cols += 1;
            }
            _ => runs.push(DirtyRect::cell(layer, row, col)),
        }
    }

    let mut out: Vec<DirtyRect> = Vec::new();
    // (col, cols) -> index in `out` of a rect ending on the previous row.
    let mut above: HashMap<(usize, usize), usize> = HashMap::new();
    let mut current: HashMap<(usize, usize), usize> = HashMap::new();
    let mut at: Option<(usize, usize)> = None;

    for run in runs {
        if at != Some((run.layer, run.row)) {
            let consecutive = matches!(at, Some((l, r)) if l == run.layer && r + 1 == run.row);
            above = if consecutive {
                std::mem::take(&mut current)
            } else {
                current.clear();
                HashMap::new()
            };
            at = Some((run.layer, run.row));
        }

        let key = (run.col, run.cols);
        match above.remove(&key) {
            Some(i) => {
                out[i].rows += 1;
                current.insert(key, i);
            }
            None => {
                current.insert(key, out.len());
                out.push(run);
            }
        }
    }

    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(rects: &[DirtyRect]) -> BTreeSet<(usize, usize, usize)> {
        let mut set = BTreeSet::new();
        for r in rects {
            for (row, col) in r.cells() {
                assert!(set.insert((r.layer, row, col)), "rects overlap");
            }
        }
        set
    }

    #[test]
    fn drain_is_empty_without_marks() {
        let mut t = DirtyTracker::new(1, 4, 4);
        assert!(t.drain().is_empty());
        assert!(t.drain().is_empty());
    }

    #[test]
    fn block_of_cells_becomes_one_rect() {
        let mut t = DirtyTracker::new(1, 8, 8);
        for r in 2..5 {
            for c in 1..4 {
                t.mark_dirty(0, r, c);
            }
        }
        assert_eq!(
            t.drain(),
            vec![DirtyRect {
                layer: 0,
                row: 2,
                col: 1,
                rows: 3,
                cols: 3
            }]
        );
        assert!(t.is_empty());
    }

    #[test]
    fn l_shape_covers_exactly_the_marks() {
        let mut t = DirtyTracker::new(1, 8, 8);
        let marks = [(0, 0, 0), (0, 1, 0), (0, 2, 0), (0, 2, 1), (0, 2, 2)];
        for &(l, r, c) in &marks {
            t.mark_dirty(l, r, c);
        }
        let rects = t.drain();
        assert_eq!(rects.len(), 2);
        assert_eq!(covered(&rects), marks.iter().copied().collect());
    }

    #[test]
    fn gaps_between_rows_do_not_merge() {
        let mut t = DirtyTracker::new(1, 8, 8);
        t.mark_dirty(0, 0, 3);
        t.mark_dirty(0, 2, 3);
        assert_eq!(t.drain().len(), 2);
    }

    #[test]
    fn layers_never_share_a_rect() {
        let mut t = DirtyTracker::new(2, 4, 4);
        t.mark_dirty(0, 1, 1);
        t.mark_dirty(1, 1, 1);
        let rects = t.drain();
        assert_eq!(rects, vec![DirtyRect::cell(0, 1, 1), DirtyRect::cell(1, 1, 1)]);
    }

    #[test]
    fn mark_all_yields_full_layers_once() {
        let mut t = DirtyTracker::new(2, 3, 5);
        t.mark_dirty(0, 0, 0);
        t.mark_all_dirty();
        t.mark_dirty(1, 2, 2);
        let rects = t.drain();
        assert_eq!(rects.len(), 2);
        assert!(rects.iter().all(|r| r.rows == 3 && r.cols == 5));
        assert!(t.drain().is_empty());
    }

    #[test]
    fn marks_outside_extent_are_ignored() {
        let mut t = DirtyTracker::new(1, 2, 2);
        t.mark_dirty(0, 2, 0);
        t.mark_dirty(1, 0, 0);
        assert!(t.is_empty());
    }

    #[test]
    fn shrinking_extent_drops_stale_marks() {
        let mut t = DirtyTracker::new(1, 4, 4);
        t.mark_dirty(0, 3, 3);
        t.mark_dirty(0, 0, 0);
        t.set_extent(1, 2, 2);
        assert_eq!(t.drain(), vec![DirtyRect::cell(0, 0, 0)]);
    }

    #[test]
    fn scattered_marks_are_covered_without_overlap() {
        let mut t = DirtyTracker::new(1, 16, 16);
        let mut expected = BTreeSet::new();
        for i in 0..40usize {
            let cell = (0, (i * 7) % 16, (i * 11) % 16);
            t.mark_dirty(cell.0, cell.1, cell.2);
            expected.insert(cell);
        }
        assert_eq!(covered(&t.drain()), expected);
    }

    #[test]
    fn mark_rect_is_clipped_to_the_extent() {
        let mut t = DirtyTracker::new(2, 4, 4);
        t.mark_rect(DirtyRect {
            layer: 1,
            row: 2,
            col: 1,
            rows: 5,
            cols: 2,
        });
        t.mark_rect(DirtyRect::cell(2, 0, 0));
        assert_eq!(t.pending_cells(), 4);
        assert_eq!(
            t.drain(),
            vec![DirtyRect {
                layer: 1,
                row: 2,
                col: 1,
                rows: 2,
                cols: 2
            }]
        );
    }

    #[test]
    fn huge_rects_saturate_instead_of_overflowing() {
        let rect = DirtyRect {
            layer: 0,
            row: usize::MAX - 1,
            col: 3,
            rows: usize::MAX,
            cols: usize::MAX,
        };
        assert!(rect.contains(0, usize::MAX - 1, usize::MAX - 1));
        assert!(!rect.contains(0, 0, 3));
        assert_eq!(rect.area(), usize::MAX);
        assert_eq!(rect.clipped(4, 4).area(), 0);

        let mut t = DirtyTracker::new(1, 4, 4);
        t.mark_rect(rect);
        t.mark_rect(DirtyRect {
            layer: 0,
            row: 3,
            col: 2,
            rows: usize::MAX,
            cols: usize::MAX,
        });
        assert_eq!(t.pending_cells(), 2);
    }
}
