//! Tile descriptor.
//!
//! Created by the SFTM producer, mutated by DMA completion and the DPM
//! consumer, destroyed on FIFO pop + consume. Tiles live inside the
//! per-unit `BankedGroupFifo`'s queue; prefetch entries and the frame
//! controller's gid-to-unit map refer to a resident tile only by `gid`,
//! looked up with `find_mut`, to avoid an ownership cycle.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileGroup {
    pub gid: u64,
    pub row_group_idx: usize,
    pub col_tile_idx: usize,
    pub col_start: usize,
    pub col_end: usize,
    pub motion_ready: bool,
    pub reference_ready: bool,
    pub sftm_done: bool,
    pub sftm_cycles: u64,
    pub bypass_mode: bool,
    /// Cycle the tile was produced on, used by the `consumed_cycle >
    /// produced_cycle` invariant check in tests.
    pub produced_cycle: u64,
    /// Cycle the tile was popped off its FIFO and handed to the consumer.
    /// `None` until then; a bypass-mode tile never has this set, since it
    /// skips FIFO residency entirely.
    pub consumed_cycle: Option<u64>,
}

impl TileGroup {
    pub fn new(gid: u64, row_group_idx: usize, col_tile_idx: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            gid,
            row_group_idx,
            col_tile_idx,
            col_start,
            col_end,
            motion_ready: false,
            reference_ready: false,
            sftm_done: false,
            sftm_cycles: 0,
            bypass_mode: false,
            produced_cycle: 0,
            consumed_cycle: None,
        }
    }

    pub fn cols(&self) -> usize {
        self.col_end - self.col_start + 1
    }

    pub fn is_ready(&self) -> bool {
        self.motion_ready && self.reference_ready
    }
}
