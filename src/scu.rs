//! SCU grid, channel-to-SCU mapping, and the per-tile SFTM cost model.
//!
//! Grounded in `original_source/Sim/vcnpu.py`'s `SFTM.precompute_scu_counts_for_layer`
//! and `SFTM.process_tile`: the nonzero-to-SCU bincount is vectorized there
//! with numpy; here it is a single pass over the coordinate list with a
//! fixed-size accumulator, the same O(N) / O(grid) shape.

use crate::config::SimConfig;
use crate::layer::{LayerKind, LayerSpec};
use crate::mask::SparseMask;

/// Per-layer SCU assignment counts: a length-`pof*pif` vector where entry
/// `r*pif + c` holds the number of mask nonzeros mapped to SCU `(r, c)`.
/// Derived once at mask-load time and immutable thereafter.
#[derive(Clone, Debug)]
pub struct ScuCounts {
    pub pof: usize,
    pub pif: usize,
    pub counts: Vec<u64>,
}

impl ScuCounts {
    pub fn index(&self, r: usize, c: usize) -> u64 {
        self.counts[r * self.pif + c]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Maps a nonzero at output channel `o`, input channel `i` onto an SCU
/// grid position. Ties at the clamp boundary always collapse to the last
/// row/column; this is load-bearing behavior, not an edge-case bug.
pub fn map_to_scu(o: usize, i: usize, c_out: usize, c_in: usize, pof: usize, pif: usize) -> (usize, usize) {
    let out_per_row = c_out.div_ceil(pof).max(1);
    let in_per_col = c_in.div_ceil(pif).max(1);
    let r = (o / out_per_row).min(pof - 1);
    let c = (i / in_per_col).min(pif - 1);
    (r, c)
}

/// Bins a loaded mask's nonzero coordinates onto the SCU grid. O(N) over
/// the nonzero set, O(pof*pif) extra space.
pub fn bin_scu_counts(mask: &SparseMask, c_out: usize, c_in: usize, pof: usize, pif: usize) -> ScuCounts {
    let mut counts = vec![0u64; pof * pif];
    for coord in &mask.coords {
        let (o, i) = (coord[0] as usize, coord[1] as usize);
        let (r, c) = map_to_scu(o, i, c_out, c_in, pof, pif);
        counts[r * pif + c] += 1;
    }
    ScuCounts { pof, pif, counts }
}

/// Output patches for a `rows x cols` tile: each patch covers a 2x2 block
/// of outputs.
pub fn patch_count(rows: usize, cols: usize) -> u64 {
    let pr = rows.div_ceil(2).max(1) as u64;
    let pc = cols.div_ceil(2).max(1) as u64;
    pr * pc
}

/// Result of costing one tile through the SCU grid: the critical-path
/// cycle count and the total multiply-accumulate count actually
/// performed (summed across SCUs), reported separately from whatever an
/// analytic fallback would have produced for the same tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileCost {
    pub cycles: u64,
    pub macs: u64,
}

/// Tile critical-path cost from a precomputed mask's SCU-count vector.
pub fn mask_tile_cost(counts: &ScuCounts, rows: usize, cols: usize, cfg: &SimConfig) -> TileCost {
    let patches = patch_count(rows, cols);
    let mut max_scu_cycles = 0u64;
    let mut total_macs = 0u64;
    for &n in &counts.counts {
        let assigned = n * patches;
        let cycles = assigned.div_ceil(cfg.scu_multipliers);
        max_scu_cycles = max_scu_cycles.max(cycles);
        total_macs += assigned;
    }
    let cycles = cfg.pretu_latency + max_scu_cycles + cfg.scu_pipeline_latency + cfg.posttu_latency;
    TileCost { cycles, macs: total_macs }
}

/// Analytic fallback used when no mask has been loaded for a layer: the
/// total multiply count is distributed uniformly across SCU rows by
/// output-channel block. This double-counts relative to the mask branch
/// (each SCU row gets `base_mults_per_out` multiplied by its *own*
/// output-channel share, not divided across the grid); the discrepancy
/// is preserved intentionally rather than corrected, so this model's
/// totals and the mask-driven model's totals are not meant to agree.
pub fn analytic_tile_cost(layer: &LayerSpec, rows: usize, cols: usize, cfg: &SimConfig) -> TileCost {
    let (mu, rho) = match layer.kind {
        LayerKind::RFConv(p) => (p.mu, p.rho),
        LayerKind::RFDeConv(p) => (p.mu, p.rho),
        _ => (1, 1.0),
    };
    let patches = patch_count(rows, cols);
    let mu2 = mu * mu;
    let total_mults = ((patches as f64) * (layer.c_out as f64) * (mu2 as f64) * rho) as u64;
    let out_per_row = layer.c_out.div_ceil(cfg.pof).max(1);
    let base_mults_per_out = (total_mults / layer.c_out.max(1) as u64).max(1);

    let mut max_scu_cycles = 0u64;
    for r in 0..cfg.pof {
        let oc_start = r * out_per_row;
        let oc_end = layer.c_out.min((r + 1) * out_per_row);
        let oc_count = oc_end.saturating_sub(oc_start) as u64;
        let assigned = oc_count * base_mults_per_out;
        let cycles = assigned.div_ceil(cfg.scu_multipliers);
        max_scu_cycles = max_scu_cycles.max(cycles);
    }
    let cycles = cfg.pretu_latency + max_scu_cycles + cfg.scu_pipeline_latency + cfg.posttu_latency;
    TileCost { cycles, macs: total_mults }
}

/// Fixed-capacity, first-fit input-bank allocator backing one SFTM unit's
/// buffer admission. Freed immediately on tile completion: the model
/// assumes consumption overlaps compute, so the input bank is freed
/// before the corresponding output write lands.
#[derive(Clone, Debug)]
pub struct BankAllocator {
    capacity: u64,
    used: Vec<u64>,
}

impl BankAllocator {
    pub fn new(num_banks: usize, capacity_per_bank: u64) -> Self {
        Self {
            capacity: capacity_per_bank,
            used: vec![0; num_banks],
        }
    }

    /// First-fit by bank index. Returns the bank index on success.
    pub fn try_alloc(&mut self, bytes: u64) -> Option<usize> {
        for (i, u) in self.used.iter_mut().enumerate() {
            if *u + bytes <= self.capacity {
                *u += bytes;
                return Some(i);
            }
        }
        None
    }

    pub fn free(&mut self, bank: usize, bytes: u64) {
        self.used[bank] = self.used[bank].saturating_sub(bytes);
    }
}

/// Single linear output buffer shared by one SFTM unit.
#[derive(Clone, Debug)]
pub struct OutputBuffer {
    capacity: u64,
    used: u64,
}

impl OutputBuffer {
    pub fn new(capacity: u64) -> Self {
        Self { capacity, used: 0 }
    }

    /// Attempts to credit `bytes` on-chip. Returns `true` on success; the
    /// caller routes a `false` result to the off-chip/DRAM-write path.
    /// The buffer is not actually held across tiles in this model beyond
    /// the immediate admission check (consumption is assumed to drain it).
    pub fn try_admit(&mut self, bytes: u64) -> bool {
        if self.used + bytes <= self.capacity {
            self.used += bytes;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self, bytes: u64) {
        self.used = self.used.saturating_sub(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_clamps_overflowing_index_to_last_row_and_col() {
        // out_per_row = ceil(10/4) = 3; a raw o/out_per_row of 33 must clamp to pof-1.
        let (r, c) = map_to_scu(100, 100, 10, 10, 4, 4);
        assert_eq!(r, 3);
        assert_eq!(c, 3);
    }

    #[test]
    fn mapping_stays_in_range_for_well_formed_coordinates() {
        let (r, c) = map_to_scu(9, 9, 10, 10, 4, 4);
        assert_eq!(r, 3); // out_per_row = 3, 9/3 = 3 = pof-1, exact boundary
        assert_eq!(c, 3);
    }

    #[test]
    fn scu_counts_sum_equals_nonzero_count() {
        let mask = SparseMask {
            shape: [8, 8, 4, 4],
            coords: vec![[0, 0, 0, 0], [7, 7, 3, 3], [3, 3, 1, 1], [7, 0, 2, 2]],
            values: vec![0.1, 0.2, 0.3, 0.4],
            mask_fraction: 4.0 / 1024.0,
        };
        let counts = bin_scu_counts(&mask, 8, 8, 4, 12);
        assert_eq!(counts.total(), mask.coords.len() as u64);
    }

    #[test]
    fn critical_path_uses_max_not_sum() {
        let cfg = SimConfig::default();
        let counts = ScuCounts {
            pof: 1,
            pif: 2,
            counts: vec![100, 1],
        };
        let cost = mask_tile_cost(&counts, 4, 4, &cfg);
        // patches = ceil(4/2)*ceil(4/2) = 4; assigned = [400, 4]; cycles=[23,1]
        let expected_scu_cycles = (100u64 * 4).div_ceil(cfg.scu_multipliers);
        let expected = cfg.pretu_latency + expected_scu_cycles + cfg.scu_pipeline_latency + cfg.posttu_latency;
        assert_eq!(cost.cycles, expected);
    }

    #[test]
    fn bank_allocator_is_first_fit_and_frees() {
        let mut banks = BankAllocator::new(2, 100);
        let b0 = banks.try_alloc(60).unwrap();
        assert_eq!(b0, 0);
        let b1 = banks.try_alloc(60).unwrap(); // doesn't fit bank 0, goes to bank 1
        assert_eq!(b1, 1);
        assert!(banks.try_alloc(50).is_none()); // neither bank has room
        banks.free(0, 60);
        assert_eq!(banks.try_alloc(50), Some(0));
    }

    #[test]
    fn output_buffer_rejects_past_capacity() {
        let mut buf = OutputBuffer::new(100);
        assert!(buf.try_admit(100));
        assert!(!buf.try_admit(1));
        buf.release(50);
        assert!(buf.try_admit(50));
    }
}
