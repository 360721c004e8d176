//! A per-processor set-associative data cache.

use super::LineState;

#[derive(Debug, Clone)]
struct DLine {
    tag: u32,
    state: LineState,
    data: Vec<u8>,
}

/// One processor's private data cache. Coherence state (`LineState`) is
/// maintained by the cache-hierarchy access routine in
/// [`crate::core::cache`], not by this struct in isolation.
#[derive(Debug)]
pub struct DCache {
    ways: usize,
    line_bytes: usize,
    lines: Vec<DLine>,
    /// Per-set incrementing "clock hand" used for victim selection, matching
    /// the reference implementation's non-LRU, "random-ish" replacement.
    clock_hand: Vec<usize>,
}

impl DCache {
    /// Builds a cache with `sets` sets of `ways` ways, each `line_bytes` wide.
    #[must_use]
    pub fn new(sets: usize, ways: usize, line_bytes: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        Self {
            ways,
            line_bytes,
            lines: vec![
                DLine {
                    tag: 0,
                    state: LineState::Invalid,
                    data: vec![0u8; line_bytes],
                };
                sets * ways
            ],
            clock_hand: vec![0; sets],
        }
    }

    fn num_sets(&self) -> usize {
        self.clock_hand.len()
    }

    fn set_of(&self, line_addr: u32) -> usize {
        ((line_addr / self.line_bytes as u32) as usize) % self.num_sets()
    }

    fn find_way(&self, set: usize, line_addr: u32) -> Option<usize> {
        (0..self.ways)
            .map(|w| set * self.ways + w)
            .find(|&idx| self.lines[idx].state != LineState::Invalid && self.lines[idx].tag == line_addr)
    }

    /// Looks up the coherence state of `line_addr` in this cache, if present.
    #[must_use]
    pub fn state_of(&self, line_addr: u32) -> LineState {
        let set = self.set_of(line_addr);
        self.find_way(set, line_addr)
            .map_or(LineState::Invalid, |idx| self.lines[idx].state)
    }

    /// Reads `len` bytes at `line_addr + offset_in_line`. Caller must have
    /// already confirmed the line is present with state != Invalid.
    #[must_use]
    pub fn read(&self, line_addr: u32, offset_in_line: usize, len: usize) -> Vec<u8> {
        let set = self.set_of(line_addr);
        let idx = self.find_way(set, line_addr).unwrap_or(set * self.ways);
        self.lines[idx].data[offset_in_line..offset_in_line + len].to_vec()
    }

    /// Writes `bytes` at `line_addr + offset_in_line` into an already
    /// present line, without changing its coherence state.
    pub fn write_in_place(&mut self, line_addr: u32, offset_in_line: usize, bytes: &[u8]) {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            self.lines[idx].data[offset_in_line..offset_in_line + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Selects a victim way in `line_addr`'s set via the clock hand,
    /// returning the victim's current tag and state (so the caller can
    /// drive any writeback/invalidation before overwriting it), then installs
    /// `fill_data` under `new_state` in that way.
    pub fn install(&mut self, line_addr: u32, new_state: LineState, fill_data: Vec<u8>) -> (u32, LineState) {
        let set = self.set_of(line_addr);
        let way = self.clock_hand[set] % self.ways;
        self.clock_hand[set] = (self.clock_hand[set] + 1) % self.ways;
        let idx = set * self.ways + way;
        let victim = (self.lines[idx].tag, self.lines[idx].state);
        self.lines[idx] = DLine {
            tag: line_addr,
            state: new_state,
            data: fill_data,
        };
        victim
    }

    /// Downgrades `line_addr`'s state in place (e.g. Exclusive -> Shared),
    /// a no-op if the line is not present.
    pub fn set_state(&mut self, line_addr: u32, state: LineState) {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            self.lines[idx].state = state;
        }
    }

    /// Invalidates `line_addr` if present, returning its prior state.
    pub fn invalidate(&mut self, line_addr: u32) -> LineState {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            let prior = self.lines[idx].state;
            self.lines[idx].state = LineState::Invalid;
            prior
        } else {
            LineState::Invalid
        }
    }

    /// Invalidates every line (used on a full cache flush).
    pub fn invalidate_all(&mut self) {
        for line in &mut self.lines {
            line.state = LineState::Invalid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_read_roundtrips() {
        let mut c = DCache::new(4, 2, 16);
        let _ = c.install(0x1000, LineState::Shared, vec![0xAB; 16]);
        assert_eq!(c.state_of(0x1000), LineState::Shared);
        assert_eq!(c.read(0x1000, 0, 4), vec![0xAB; 4]);
    }

    #[test]
    fn invalidate_clears_state() {
        let mut c = DCache::new(4, 2, 16);
        let _ = c.install(0x2000, LineState::Exclusive, vec![0; 16]);
        let prior = c.invalidate(0x2000);
        assert_eq!(prior, LineState::Exclusive);
        assert_eq!(c.state_of(0x2000), LineState::Invalid);
    }

    #[test]
    fn clock_hand_cycles_through_ways() {
        let mut c = DCache::new(1, 2, 16);
        let (tag0, _) = c.install(0x10, LineState::Shared, vec![1; 16]);
        let (tag1, _) = c.install(0x20, LineState::Shared, vec![2; 16]);
        assert_eq!(tag0, 0);
        assert_eq!(tag1, 0);
        // Third install should evict the first (0x10), not the second.
        let _ = c.install(0x30, LineState::Shared, vec![3; 16]);
        assert_eq!(c.state_of(0x10), LineState::Invalid);
        assert_eq!(c.state_of(0x20), LineState::Shared);
    }
}
