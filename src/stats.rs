//! The per-run statistics record.
//!
//! Accumulated monotonically over a run, never reset mid-simulation.
//! Printed human-readable by the CLI; deliberately not `Serialize` to
//! JSON, since report serialization is an explicit non-goal.

use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Debug, Default)]
pub struct ModuleCycles {
    pub sftm: u64,
    pub sftm_mem: u64,
    pub dpm: u64,
}

#[derive(Clone, Debug, Default)]
pub struct MacCounts {
    pub by_stage: HashMap<String, u64>,
    pub total: u64,
}

impl MacCounts {
    pub fn add(&mut self, stage: &str, macs: u64) {
        *self.by_stage.entry(stage.to_string()).or_insert(0) += macs;
        self.total += macs;
    }
}

#[derive(Clone, Debug, Default)]
pub struct FifoSummary {
    pub max_occ: usize,
    pub avg_occ: f64,
    pub overflow_count: u64,
    /// Per-unit `(cycle, occupancy)` samples, one inner vec per parallel
    /// unit, copied from that unit's `FifoStats::occ_timeseries`.
    pub occ_timeseries: Vec<Vec<(u64, usize)>>,
}

#[derive(Clone, Debug, Default)]
pub struct SimStats {
    pub cycles: u64,
    pub module_cycles: ModuleCycles,
    pub mac_counts: MacCounts,
    pub bytes_read_offchip: u64,
    pub bytes_written_offchip: u64,
    pub fifo: FifoSummary,
    pub runtime_s: f64,
    pub dma_requests: u64,
    pub prefetch_hits: u64,
    pub prefetch_coalesced: u64,
    pub dpm_stall_motion: u64,
    pub dpm_stall_reference: u64,
    pub dpm_stall_cycles: u64,
    pub bypass_mode_used: u64,
    pub unit_cycles: Vec<u64>,
    pub groups_produced: u64,
    pub groups_consumed: u64,
    pub max_cycles_reached: bool,
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycles: {}", self.cycles)?;
        writeln!(
            f,
            "module_cycles: sftm={} sftm_mem={} dpm={}",
            self.module_cycles.sftm, self.module_cycles.sftm_mem, self.module_cycles.dpm
        )?;
        writeln!(f, "mac_counts: total={}", self.mac_counts.total)?;
        for (stage, macs) in &self.mac_counts.by_stage {
            writeln!(f, "  {stage}: {macs}")?;
        }
        writeln!(
            f,
            "bytes_read_offchip={} bytes_written_offchip={}",
            self.bytes_read_offchip, self.bytes_written_offchip
        )?;
        writeln!(
            f,
            "fifo: max_occ={} avg_occ={:.2} overflow_count={}",
            self.fifo.max_occ, self.fifo.avg_occ, self.fifo.overflow_count
        )?;
        writeln!(f, "runtime_s: {:.3}", self.runtime_s)?;
        writeln!(
            f,
            "dma_requests={} prefetch_hits={} prefetch_coalesced={}",
            self.dma_requests, self.prefetch_hits, self.prefetch_coalesced
        )?;
        writeln!(
            f,
            "dpm_stall: motion={} reference={} cycles={}",
            self.dpm_stall_motion, self.dpm_stall_reference, self.dpm_stall_cycles
        )?;
        writeln!(f, "bypass_mode_used={}", self.bypass_mode_used)?;
        writeln!(f, "groups_produced={} groups_consumed={}", self.groups_produced, self.groups_consumed)?;
        writeln!(f, "unit_cycles={:?}", self.unit_cycles)?;
        writeln!(f, "max_cycles_reached={}", self.max_cycles_reached)?;
        writeln!(f, "fifo occupancy samples (cycle, occupancy) per unit:")?;
        for (unit, series) in self.fifo.occ_timeseries.iter().enumerate() {
            writeln!(f, "  unit {unit}: {series:?}")?;
        }
        Ok(())
    }
}
