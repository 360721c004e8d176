//! A per-processor instruction cache.
//!
//! The I-cache is never shared across processors and is kept outside the
//! `MemSystem` lock; it only ever holds lines in `Shared` state (a processor
//! never writes through it) and is flushed wholesale on an `ICACHECTL` flush
//! or an I-TB invalidation that targets it, rather than tracked line-by-line
//! against the Scache directory.

#[derive(Debug, Clone)]
struct ILine {
    tag: u32,
    valid: bool,
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct ICache {
    ways: usize,
    line_bytes: usize,
    lines: Vec<ILine>,
    clock_hand: Vec<usize>,
}

impl ICache {
    #[must_use]
    pub fn new(sets: usize, ways: usize, line_bytes: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        Self {
            ways,
            line_bytes,
            lines: vec![
                ILine {
                    tag: 0,
                    valid: false,
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
            .find(|&idx| self.lines[idx].valid && self.lines[idx].tag == line_addr)
    }

    /// Fetches the line containing `line_addr`, if resident.
    #[must_use]
    pub fn lookup(&self, line_addr: u32) -> Option<&[u8]> {
        let set = self.set_of(line_addr);
        self.find_way(set, line_addr).map(|idx| self.lines[idx].data.as_slice())
    }

    /// Installs a freshly fetched line, evicting via the clock hand.
    pub fn install(&mut self, line_addr: u32, data: Vec<u8>) {
        let set = self.set_of(line_addr);
        let way = self.clock_hand[set] % self.ways;
        self.clock_hand[set] = (self.clock_hand[set] + 1) % self.ways;
        let idx = set * self.ways + way;
        self.lines[idx] = ILine {
            tag: line_addr,
            valid: true,
            data,
        };
    }

    /// Invalidates a single line, used when a store hits a line a processor
    /// has cached as code (self-modifying-code flush path).
    pub fn invalidate(&mut self, line_addr: u32) {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            self.lines[idx].valid = false;
        }
    }

    /// Invalidates every line, used by `ICACHECTL` full-flush writes.
    pub fn invalidate_all(&mut self) {
        for line in &mut self.lines {
            line.valid = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_until_installed() {
        let mut c = ICache::new(4, 2, 16);
        assert!(c.lookup(0x400).is_none());
        c.install(0x400, vec![0xEE; 16]);
        assert_eq!(c.lookup(0x400), Some(&[0xEEu8; 16][..]));
    }

    #[test]
    fn invalidate_all_clears_every_line() {
        let mut c = ICache::new(2, 2, 16);
        c.install(0x100, vec![1; 16]);
        c.install(0x200, vec![2; 16]);
        c.invalidate_all();
        assert!(c.lookup(0x100).is_none());
        assert!(c.lookup(0x200).is_none());
    }
}
