//! The shared second-level cache: a coherence directory for every D-cache
//! line resident anywhere in the system, plus the backing data store itself.

use super::LineState;

#[derive(Debug, Clone)]
struct SLine {
    tag: u32,
    state: LineState,
    /// CPUs currently holding a copy. At most one entry when `state` is
    /// `Exclusive`; any number (including zero) when `Shared`.
    owners: Vec<usize>,
    data: Vec<u8>,
}

/// The shared directory-backed second-level cache.
///
/// Inclusion holds by construction: a line only ever reaches `Shared` or
/// `Exclusive` state in a D-cache after first being installed here, and
/// eviction here forces invalidation of every owner's copy (see
/// [`Scache::evict_for_fill`]).
#[derive(Debug)]
pub struct Scache {
    ways: usize,
    line_bytes: usize,
    lines: Vec<SLine>,
    clock_hand: Vec<usize>,
}

impl Scache {
    #[must_use]
    pub fn new(sets: usize, ways: usize, line_bytes: usize) -> Self {
        let sets = sets.max(1);
        let ways = ways.max(1);
        Self {
            ways,
            line_bytes,
            lines: vec![
                SLine {
                    tag: 0,
                    state: LineState::Invalid,
                    owners: Vec::new(),
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

    /// Directory state for `line_addr`, plus its current owner set.
    #[must_use]
    pub fn directory_entry(&self, line_addr: u32) -> (LineState, &[usize]) {
        let set = self.set_of(line_addr);
        self.find_way(set, line_addr).map_or((LineState::Invalid, &[][..]), |idx| {
            (self.lines[idx].state, self.lines[idx].owners.as_slice())
        })
    }

    #[must_use]
    pub fn read(&self, line_addr: u32) -> Option<&[u8]> {
        let set = self.set_of(line_addr);
        self.find_way(set, line_addr).map(|idx| self.lines[idx].data.as_slice())
    }

    pub fn write_in_place(&mut self, line_addr: u32, offset_in_line: usize, bytes: &[u8]) {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            self.lines[idx].data[offset_in_line..offset_in_line + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Makes `owner` a sharer of `line_addr`, installing the line from
    /// `fill_data` if it wasn't already resident. Returns the prior owner
    /// set of any victim line evicted to make room, which the caller must
    /// invalidate in those CPUs' D-caches before this call's result is used.
    pub fn add_sharer(&mut self, line_addr: u32, owner: usize, fill_data: impl FnOnce() -> Vec<u8>) -> Option<(u32, Vec<usize>)> {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            if !self.lines[idx].owners.contains(&owner) {
                self.lines[idx].owners.push(owner);
            }
            self.lines[idx].state = LineState::Shared;
            return None;
        }
        let (victim_tag, victim_owners, idx) = self.evict_for_fill(set);
        self.lines[idx] = SLine {
            tag: line_addr,
            state: LineState::Shared,
            owners: vec![owner],
            data: fill_data(),
        };
        if victim_owners.is_empty() {
            None
        } else {
            Some((victim_tag, victim_owners))
        }
    }

    /// Grants `owner` exclusive ownership of `line_addr`, demoting any other
    /// sharer. Returns the set of CPUs (excluding `owner`) that must
    /// invalidate their copy.
    pub fn grant_exclusive(&mut self, line_addr: u32, owner: usize, fill_data: impl FnOnce() -> Vec<u8>) -> Vec<usize> {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            let others: Vec<usize> = self.lines[idx].owners.iter().copied().filter(|&o| o != owner).collect();
            self.lines[idx].state = LineState::Exclusive;
            self.lines[idx].owners = vec![owner];
            return others;
        }
        let (_, victim_owners, idx) = self.evict_for_fill(set);
        self.lines[idx] = SLine {
            tag: line_addr,
            state: LineState::Exclusive,
            owners: vec![owner],
            data: fill_data(),
        };
        victim_owners
    }

    /// Picks a victim way via the clock hand, returning its prior tag,
    /// owner set, and index so the caller can overwrite it in place.
    fn evict_for_fill(&mut self, set: usize) -> (u32, Vec<usize>, usize) {
        let way = self.clock_hand[set] % self.ways;
        self.clock_hand[set] = (self.clock_hand[set] + 1) % self.ways;
        let idx = set * self.ways + way;
        let victim = &self.lines[idx];
        (victim.tag, victim.owners.clone(), idx)
    }

    /// Removes `owner` from `line_addr`'s sharer set, downgrading to
    /// `Invalid` if it was the last one.
    pub fn remove_owner(&mut self, line_addr: u32, owner: usize) {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            self.lines[idx].owners.retain(|&o| o != owner);
            if self.lines[idx].owners.is_empty() {
                self.lines[idx].state = LineState::Invalid;
            } else {
                self.lines[idx].state = LineState::Shared;
            }
        }
    }

    /// Invalidates `line_addr` entirely, returning its last owner set.
    pub fn invalidate(&mut self, line_addr: u32) -> Vec<usize> {
        let set = self.set_of(line_addr);
        if let Some(idx) = self.find_way(set, line_addr) {
            let owners = std::mem::take(&mut self.lines[idx].owners);
            self.lines[idx].state = LineState::Invalid;
            owners
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sharer_installs_and_tracks_owner() {
        let mut s = Scache::new(4, 2, 16);
        let victim = s.add_sharer(0x1000, 2, || vec![7; 16]);
        assert!(victim.is_none());
        let (state, owners) = s.directory_entry(0x1000);
        assert_eq!(state, LineState::Shared);
        assert_eq!(owners, &[2]);
    }

    #[test]
    fn grant_exclusive_evicts_other_sharers() {
        let mut s = Scache::new(4, 2, 16);
        let _ = s.add_sharer(0x2000, 0, || vec![1; 16]);
        let _ = s.add_sharer(0x2000, 1, || vec![1; 16]);
        let invalidate_in = s.grant_exclusive(0x2000, 1, || vec![1; 16]);
        assert_eq!(invalidate_in, vec![0]);
        let (state, owners) = s.directory_entry(0x2000);
        assert_eq!(state, LineState::Exclusive);
        assert_eq!(owners, &[1]);
    }

    #[test]
    fn remove_last_owner_invalidates() {
        let mut s = Scache::new(4, 2, 16);
        let _ = s.add_sharer(0x3000, 0, || vec![9; 16]);
        s.remove_owner(0x3000, 0);
        let (state, owners) = s.directory_entry(0x3000);
        assert_eq!(state, LineState::Invalid);
        assert!(owners.is_empty());
    }
}
