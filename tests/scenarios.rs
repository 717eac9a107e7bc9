//! Black-box scenarios exercising the documented invariants end to end.

use vcnpu_sim::config::SimConfig;
use vcnpu_sim::frame::FrameController;
use vcnpu_sim::layer::{build_default_layers, LayerKind, LayerSpec, TransformParams};

fn base_config() -> SimConfig {
    let mut cfg = SimConfig::default();
    cfg.max_cycles = 500_000;
    cfg
}

/// S1 — degenerate single tile: an 8x120 frame with one RFConv layer and no
/// mask directory (forcing the analytic fallback) produces exactly one tile.
#[test]
fn degenerate_single_tile_produces_exactly_one_group() {
    let mut cfg = base_config();
    cfg.frame_h = 8;
    cfg.frame_w = 120;
    cfg.channels = 36;
    cfg.num_parallel_units = 1;
    cfg.rows_per_group = 8;
    cfg.tile_columns = Some(120); // one tile spans the whole degenerate frame

    let rf = TransformParams { mu: cfg.mu_c, rho: cfg.rho_c };
    let layers = vec![LayerSpec::new("RFConv0", LayerKind::RFConv(rf), 36, 36, 3)];

    let stats = FrameController::new(cfg, &layers, None).unwrap().run();
    assert_eq!(stats.groups_produced, 1);
    assert_eq!(stats.groups_consumed, 1);
    assert_eq!(stats.fifo.overflow_count, 0);
    assert_eq!(stats.bypass_mode_used, 0);
}

/// S5/S6 — a full HD frame with a shallow FIFO must never overflow its
/// bank*slot capacity, and scaling to more parallel units never costs more
/// cycles than running with one.
#[test]
fn fifo_occupancy_stays_within_capacity_and_parallel_scaling_never_regresses() {
    let mut cfg1 = base_config();
    cfg1.frame_h = 1080;
    cfg1.frame_w = 1920;
    cfg1.sftm_num_banks = 4;
    cfg1.group_slots_per_bank = 2;
    cfg1.max_outstanding = 8;
    cfg1.num_parallel_units = 1;

    let layers1 = build_default_layers(cfg1.channels, &cfg1);
    let s1 = FrameController::new(cfg1.clone(), &layers1, None).unwrap().run();
    assert!(s1.fifo.max_occ <= cfg1.sftm_num_banks * cfg1.group_slots_per_bank);

    let mut cfg4 = cfg1.clone();
    cfg4.num_parallel_units = 4;
    let layers4 = build_default_layers(cfg4.channels, &cfg4);
    let s4 = FrameController::new(cfg4, &layers4, None).unwrap().run();

    assert!(s4.cycles <= s1.cycles, "four parallel units must not take longer than one");
}

/// Determinism: fixed seed and fixed inputs must reproduce a bit-identical
/// cycle count and MAC total across independent runs.
#[test]
fn fixed_seed_is_fully_deterministic() {
    let cfg = base_config();
    let layers = build_default_layers(cfg.channels, &cfg);

    let s_a = FrameController::new(cfg.clone(), &layers, None).unwrap().run();
    let s_b = FrameController::new(cfg, &layers, None).unwrap().run();

    assert_eq!(s_a.cycles, s_b.cycles);
    assert_eq!(s_a.mac_counts.total, s_b.mac_counts.total);
    assert_eq!(s_a.groups_produced, s_b.groups_produced);
    assert_eq!(s_a.groups_consumed, s_b.groups_consumed);
    assert_eq!(s_a.fifo.max_occ, s_b.fifo.max_occ);
}

/// Invariant 6: every byte read off-chip is accounted for by issued DMA
/// requests; there is no off-chip write traffic in this read-only reference
/// and motion path.
#[test]
fn bytes_read_offchip_tracks_issued_requests() {
    let mut cfg = base_config();
    cfg.frame_h = 64;
    cfg.frame_w = 128;
    cfg.num_parallel_units = 1;
    let layers = build_default_layers(cfg.channels, &cfg);
    let stats = FrameController::new(cfg, &layers, None).unwrap().run();

    assert!(stats.dma_requests > 0);
    assert!(stats.bytes_read_offchip > 0);
    assert_eq!(stats.bytes_written_offchip, 0);
}

/// Bypass mode: every produced tile is consumed immediately, with no FIFO
/// residency and no stalls.
#[test]
fn bypass_mode_never_stalls_on_fifo_residency() {
    let mut cfg = base_config();
    cfg.frame_h = 32;
    cfg.frame_w = 64;
    cfg.bypass_mode = true;
    let layers = build_default_layers(cfg.channels, &cfg);
    let stats = FrameController::new(cfg, &layers, None).unwrap().run();

    assert_eq!(stats.groups_produced, stats.groups_consumed);
    assert!(stats.bypass_mode_used > 0);
    assert_eq!(stats.fifo.max_occ, 0);
}
