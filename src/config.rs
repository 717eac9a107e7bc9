//! Simulator configuration surface.
//!
//! Every tunable hardware/timing constant has a field here with its
//! documented default. A `SimConfig` can be built from CLI flags alone,
//! or overlaid with a TOML file layered over the defaults field-by-field.

use serde::Deserialize;
use std::path::Path;

use crate::error::SimError;

/// SCU grid dimensions, transform orders, sparsity, pipeline stage
/// latencies, buffer sizes, DRAM timing, and frame geometry: the full
/// tunable surface of the simulated hardware.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub clock_freq_hz: f64,
    pub num_parallel_units: usize,
    pub pof: usize,
    pub pif: usize,
    pub scu_multipliers: u64,
    pub mu_c: u64,
    pub mu_d: u64,
    pub rho_c: f64,
    pub rho_d: f64,
    pub act_bytes: u64,
    pub weight_bytes: u64,
    pub pretu_latency: u64,
    pub posttu_latency: u64,
    pub scu_pipeline_latency: u64,
    pub input_buffer_kb: u64,
    pub output_buffer_kb: u64,
    pub sftm_num_banks: usize,
    pub group_slots_per_bank: usize,
    pub rows_per_group: usize,
    pub dram_latency: u64,
    pub dram_bw: u64,
    pub max_outstanding: usize,
    pub ptable_entries: usize,
    pub coalesce_bytes: u64,
    pub dram_alignment: u64,
    pub frame_h: usize,
    pub frame_w: usize,
    pub channels: usize,
    pub tile_columns: Option<usize>,
    pub halo_pixels: usize,
    pub bypass_mode: bool,
    pub seed: u64,
    pub max_cycles: u64,
    pub default_tile_input_rows: usize,
    pub dfconv_interp_cost_per_sample: u64,
    pub dfconv_pe_count: u64,
    pub base_period: u64,
    pub producer_jitter: i64,
    pub consumer_jitter: i64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            clock_freq_hz: 4.0e8,
            num_parallel_units: 2,
            pof: 4,
            pif: 12,
            scu_multipliers: 18,
            mu_c: 4,
            mu_d: 6,
            rho_c: 0.375,
            rho_d: 0.50,
            act_bytes: 2,
            weight_bytes: 2,
            pretu_latency: 4,
            posttu_latency: 4,
            scu_pipeline_latency: 2,
            input_buffer_kb: 32,
            output_buffer_kb: 32,
            sftm_num_banks: 4,
            group_slots_per_bank: 2,
            rows_per_group: 4,
            dram_latency: 800,
            dram_bw: 1024,
            max_outstanding: 8,
            ptable_entries: 64,
            coalesce_bytes: 16384,
            dram_alignment: 4096,
            frame_h: 1080,
            frame_w: 1920,
            channels: 36,
            tile_columns: None,
            halo_pixels: 4,
            bypass_mode: false,
            seed: 12345,
            max_cycles: 10_000_000,
            default_tile_input_rows: 8,
            dfconv_interp_cost_per_sample: 2,
            dfconv_pe_count: 64,
            base_period: 140,
            producer_jitter: 2,
            consumer_jitter: 4,
        }
    }
}

impl SimConfig {
    /// Overlay a TOML document's fields onto the defaults.
    pub fn from_toml(s: &str) -> Result<Self, SimError> {
        toml::from_str(s).map_err(SimError::from)
    }

    /// Load and overlay a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path).map_err(|e| SimError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Reject configurations that cannot produce a sane simulation.
    /// Validation happens once at startup; the simulator core never
    /// re-checks these once a run has started.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.frame_h == 0 || self.frame_w == 0 {
            return Err(SimError::Config("frame dimensions must be positive".into()));
        }
        if self.pof == 0 || self.pif == 0 {
            return Err(SimError::Config("POF/PIF must be positive".into()));
        }
        if self.scu_multipliers == 0 {
            return Err(SimError::Config("SCU multiplier count must be positive".into()));
        }
        if self.sftm_num_banks == 0 {
            return Err(SimError::Config("bank count must be positive".into()));
        }
        if self.num_parallel_units == 0 {
            return Err(SimError::Config("must have at least one parallel unit".into()));
        }
        if self.dram_bw == 0 {
            return Err(SimError::Config("DRAM bandwidth must be positive".into()));
        }
        if self.channels == 0 {
            return Err(SimError::Config("channel count must be positive".into()));
        }
        Ok(())
    }

    /// Per-bank input buffer capacity in bytes.
    pub fn bank_capacity_bytes(&self) -> u64 {
        (self.input_buffer_kb * 1024) / self.sftm_num_banks as u64
    }

    /// Output buffer capacity in bytes.
    pub fn output_capacity_bytes(&self) -> u64 {
        self.output_buffer_kb * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.pof, 4);
        assert_eq!(cfg.pif, 12);
        assert_eq!(cfg.scu_multipliers, 18);
        assert_eq!(cfg.dram_latency, 800);
        assert_eq!(cfg.dram_bw, 1024);
        assert_eq!(cfg.coalesce_bytes, 16384);
        assert_eq!(cfg.dram_alignment, 4096);
    }

    #[test]
    fn toml_overlay_overrides_selected_fields() {
        let cfg = SimConfig::from_toml("dram_latency = 200\nsftm_num_banks = 8\n").unwrap();
        assert_eq!(cfg.dram_latency, 200);
        assert_eq!(cfg.sftm_num_banks, 8);
        assert_eq!(cfg.pof, 4); // untouched fields keep their default
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        let mut cfg = SimConfig::default();
        cfg.frame_h = 0;
        assert!(cfg.validate().is_err());
    }
}
