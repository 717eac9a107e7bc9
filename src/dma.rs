//! DMA engine and fixed-latency, fixed-bandwidth DRAM model.
//!
//! Grounded in `original_source/Sim/vcnpuprop.py::DMAEngine`: an in-order
//! issue queue keyed by a monotonic tag, with a `done_cycle = issue_cycle
//! + latency + ceil(length/bw)` completion rule. Completion ordering is by
//! `done_cycle`, ties broken by tag, which a `BTreeMap`-free linear scan
//! over the in-flight map already gives us via insertion order + tag
//! comparison.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Motion,
    Reference,
}

#[derive(Clone, Debug)]
pub struct DmaRequest {
    pub tag: u64,
    pub base_addr: u64,
    pub length: u64,
    pub issue_cycle: u64,
    pub done_cycle: u64,
    pub kind: RequestKind,
}

pub struct DmaEngine {
    dram_latency: u64,
    bw_bytes_per_cycle: u64,
    cycle: u64,
    next_tag: u64,
    inflight: HashMap<u64, DmaRequest>,
    completed: Vec<DmaRequest>,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl DmaEngine {
    pub fn new(dram_latency: u64, bw_bytes_per_cycle: u64) -> Self {
        Self {
            dram_latency,
            bw_bytes_per_cycle: bw_bytes_per_cycle.max(1),
            cycle: 0,
            next_tag: 1,
            inflight: HashMap::new(),
            completed: Vec::new(),
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Issues a request at the current cycle. `done_cycle` is strictly
    /// greater than `cycle + dram_latency`, so no completion can land in
    /// the issuing cycle.
    pub fn issue(&mut self, base_addr: u64, length: u64, kind: RequestKind) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        let transfer_cycles = length.div_ceil(self.bw_bytes_per_cycle).max(1);
        let done_cycle = self.cycle + self.dram_latency + transfer_cycles;
        self.bytes_read += length;
        self.inflight.insert(
            tag,
            DmaRequest {
                tag,
                base_addr,
                length,
                issue_cycle: self.cycle,
                done_cycle,
                kind,
            },
        );
        tag
    }

    /// Advances the cycle counter and moves any request whose `done_cycle
    /// <= cycle` into the completed list, ordered by `(done_cycle, tag)`.
    pub fn step(&mut self) {
        self.cycle += 1;
        let done_tags: Vec<u64> = self
            .inflight
            .iter()
            .filter(|(_, r)| r.done_cycle <= self.cycle)
            .map(|(t, _)| *t)
            .collect();
        let mut done: Vec<DmaRequest> = done_tags.into_iter().map(|t| self.inflight.remove(&t).unwrap()).collect();
        done.sort_by_key(|r| (r.done_cycle, r.tag));
        self.completed.extend(done);
    }

    pub fn collect_completed(&mut self) -> Vec<DmaRequest> {
        std::mem::take(&mut self.completed)
    }

    pub fn record_write(&mut self, bytes: u64) {
        self.bytes_written += bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_never_lands_in_the_issuing_cycle() {
        let mut dma = DmaEngine::new(800, 1024);
        dma.issue(0, 64, RequestKind::Reference);
        dma.step(); // cycle 1
        assert!(dma.collect_completed().is_empty());
    }

    #[test]
    fn completion_floor_matches_latency_plus_one() {
        let mut dma = DmaEngine::new(800, 1024);
        dma.issue(0, 64, RequestKind::Reference); // issue_cycle 0, transfer_cycles=1, done=801
        for _ in 0..800 {
            dma.step();
        }
        assert!(dma.collect_completed().is_empty(), "not yet at done_cycle");
        dma.step(); // cycle 801
        let done = dma.collect_completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].done_cycle, 801);
    }

    #[test]
    fn outstanding_count_tracks_inflight_requests() {
        let mut dma = DmaEngine::new(10, 1024);
        dma.issue(0, 64, RequestKind::Motion);
        dma.issue(4096, 64, RequestKind::Reference);
        assert_eq!(dma.outstanding_count(), 2);
        for _ in 0..11 {
            dma.step();
        }
        dma.collect_completed();
        assert_eq!(dma.outstanding_count(), 0);
    }

    #[test]
    fn ties_break_by_tag_order() {
        let mut dma = DmaEngine::new(5, 1_000_000); // tiny transfer_cycles so both finish same cycle
        let t1 = dma.issue(0, 1, RequestKind::Motion);
        let t2 = dma.issue(4096, 1, RequestKind::Motion);
        for _ in 0..6 {
            dma.step();
        }
        let done = dma.collect_completed();
        assert_eq!(done[0].tag, t1);
        assert_eq!(done[1].tag, t2);
    }
}
