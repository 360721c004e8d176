//! The per-processor Iblock cache: an arena of pre-decoded basic blocks
//! keyed by `(virtual PC, ASID)`, linked by cached successor indices,
//! reclaimed in LRU-tail batches.
//!
//! Per Design Notes, the arbitrary cycles an Iblock's successor links can
//! form (a tight loop points back at itself) are modeled as arena indices
//! rather than owned pointers, which sidesteps the ownership-cycle problem
//! entirely. "Pointer nulling" on reclaim becomes clearing the recorded
//! back-pointer slots in whichever other blocks cached this one as a
//! successor.

use crate::isa::CachedInstruction;

/// Which of a block's two successor slots a back-pointer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessorSlot {
    True,
    False,
}

#[derive(Debug, Clone, Copy)]
struct BackPointer {
    owner: usize,
    slot: SuccessorSlot,
}

/// One pre-decoded basic block.
#[derive(Debug)]
pub struct Iblock {
    pub pc: u32,
    pub asid: u32,
    pub kernel: bool,
    pub noncached: bool,
    pub instructions: Vec<CachedInstruction>,
    pub cycles: u64,
    true_successor: Option<usize>,
    false_successor: Option<usize>,
    back_pointers: Vec<BackPointer>,
    back_pointer_cursor: usize,
    lru_prev: Option<usize>,
    lru_next: Option<usize>,
    hash_next: Option<usize>,
    bucket: usize,
}

/// The arena-backed Iblock store for one processor.
pub struct IblockCache {
    slots: Vec<Option<Iblock>>,
    free_list: Vec<usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    buckets: Vec<Option<usize>>,
    reclaim_batch: usize,
    backpointer_slots: usize,
}

fn hash_pc(pc: u32, asid: u32, num_buckets: usize) -> usize {
    ((pc >> 2) as usize ^ (asid as usize).wrapping_mul(2_654_435_761)) % num_buckets.max(1)
}

impl IblockCache {
    /// Builds a cache with room for `capacity` blocks, `hash_buckets`
    /// lookup buckets, reclaiming `reclaim_batch` LRU-tail blocks at a time,
    /// each block tracking up to `backpointer_slots` external references.
    #[must_use]
    pub fn new(capacity: usize, hash_buckets: usize, reclaim_batch: usize, backpointer_slots: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| None).collect(),
            free_list: (0..capacity.max(1)).rev().collect(),
            lru_head: None,
            lru_tail: None,
            buckets: vec![None; hash_buckets.max(1)],
            reclaim_batch: reclaim_batch.max(1),
            backpointer_slots: backpointer_slots.max(1),
        }
    }

    /// Finds the resident block for `(pc, asid)`, if any, without touching LRU order.
    #[must_use]
    pub fn find(&self, pc: u32, asid: u32) -> Option<usize> {
        let bucket = hash_pc(pc, asid, self.buckets.len());
        let mut cursor = self.buckets[bucket];
        while let Some(idx) = cursor {
            let block = self.slots[idx].as_ref().expect("hash chain entry must be occupied");
            if block.pc == pc && block.asid == asid {
                return Some(idx);
            }
            cursor = block.hash_next;
        }
        None
    }

    /// Returns a reference to block `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> &Iblock {
        self.slots[idx].as_ref().expect("index into a live block")
    }

    /// Moves `idx` to the LRU head, marking it most recently used.
    pub fn touch(&mut self, idx: usize) {
        self.unlink_lru(idx);
        self.link_lru_head(idx);
    }

    /// Inserts a freshly decoded block, evicting an LRU-tail batch first if
    /// the free list is empty. Returns the new block's arena index.
    pub fn insert(&mut self, pc: u32, asid: u32, kernel: bool, noncached: bool, instructions: Vec<CachedInstruction>, cycles: u64) -> usize {
        if self.free_list.is_empty() {
            self.reclaim();
        }
        let idx = self.free_list.pop().expect("reclaim always frees at least one slot");
        let bucket = hash_pc(pc, asid, self.buckets.len());
        let block = Iblock {
            pc,
            asid,
            kernel,
            noncached,
            instructions,
            cycles,
            true_successor: None,
            false_successor: None,
            back_pointers: Vec::new(),
            back_pointer_cursor: 0,
            lru_prev: None,
            lru_next: None,
            hash_next: self.buckets[bucket],
            bucket,
        };
        self.slots[idx] = Some(block);
        self.buckets[bucket] = Some(idx);
        self.link_lru_head(idx);
        idx
    }

    /// Caches `target`'s index into `owner`'s successor `slot`, recording a
    /// back-pointer on `target` so it can be nulled out if `target` is
    /// reclaimed first. The oldest back-pointer is evicted FIFO-style once
    /// `backpointer_slots` is exceeded, matching the bounded real hardware
    /// table this models.
    pub fn link_successor(&mut self, owner: usize, slot: SuccessorSlot, target: usize) {
        {
            let owner_block = self.slots[owner].as_mut().expect("owner must be live");
            match slot {
                SuccessorSlot::True => owner_block.true_successor = Some(target),
                SuccessorSlot::False => owner_block.false_successor = Some(target),
            }
        }
        let target_block = self.slots[target].as_mut().expect("target must be live");
        if target_block.back_pointers.len() >= self.backpointer_slots {
            let cursor = target_block.back_pointer_cursor % target_block.back_pointers.len().max(1);
            target_block.back_pointers[cursor] = BackPointer { owner, slot };
            target_block.back_pointer_cursor = (cursor + 1) % target_block.back_pointers.len().max(1);
        } else {
            target_block.back_pointers.push(BackPointer { owner, slot });
        }
    }

    #[must_use]
    pub fn true_successor(&self, idx: usize) -> Option<usize> {
        self.get(idx).true_successor
    }

    #[must_use]
    pub fn false_successor(&self, idx: usize) -> Option<usize> {
        self.get(idx).false_successor
    }

    fn link_lru_head(&mut self, idx: usize) {
        let old_head = self.lru_head;
        if let Some(block) = self.slots[idx].as_mut() {
            block.lru_prev = None;
            block.lru_next = old_head;
        }
        if let Some(head) = old_head {
            if let Some(block) = self.slots[head].as_mut() {
                block.lru_prev = Some(idx);
            }
        }
        self.lru_head = Some(idx);
        if self.lru_tail.is_none() {
            self.lru_tail = Some(idx);
        }
    }

    fn unlink_lru(&mut self, idx: usize) {
        let (prev, next) = {
            let block = self.slots[idx].as_ref().expect("unlink target must be live");
            (block.lru_prev, block.lru_next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().expect("prev live").lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().expect("next live").lru_prev = prev,
            None => self.lru_tail = prev,
        }
    }

    fn unlink_hash(&mut self, idx: usize) {
        let (bucket, hash_next) = {
            let block = self.slots[idx].as_ref().expect("hash-unlink target must be live");
            (block.bucket, block.hash_next)
        };
        let mut cursor = self.buckets[bucket];
        if cursor == Some(idx) {
            self.buckets[bucket] = hash_next;
            return;
        }
        while let Some(i) = cursor {
            let next = self.slots[i].as_ref().expect("hash chain entry must be occupied").hash_next;
            if next == Some(idx) {
                self.slots[i].as_mut().expect("hash chain entry must be occupied").hash_next = hash_next;
                return;
            }
            cursor = next;
        }
    }

    /// Frees `idx`, nulling every back-pointer recorded against it in other
    /// blocks' successor slots and unlinking it from LRU and hash.
    fn free_one(&mut self, idx: usize) {
        self.unlink_lru(idx);
        self.unlink_hash(idx);
        let back_pointers = self.slots[idx].as_mut().expect("free target must be live").back_pointers.clone();
        for bp in back_pointers {
            if let Some(owner_block) = self.slots.get_mut(bp.owner).and_then(Option::as_mut) {
                match bp.slot {
                    SuccessorSlot::True => owner_block.true_successor = None,
                    SuccessorSlot::False => owner_block.false_successor = None,
                }
            }
        }
        self.slots[idx] = None;
        self.free_list.push(idx);
    }

    /// Evicts a batch of LRU-tail blocks (`reclaim_batch` of them) to
    /// replenish the free list.
    pub fn reclaim(&mut self) {
        for _ in 0..self.reclaim_batch {
            let Some(tail) = self.lru_tail else { break };
            self.free_one(tail);
        }
    }

    /// Flushes every resident block, used on an I-TB invalidation or an
    /// `ICACHECTL` full flush.
    pub fn flush_all(&mut self) {
        while let Some(tail) = self.lru_tail {
            self.free_one(tail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::instruction::CachedInstruction;

    fn dummy() -> Vec<CachedInstruction> {
        vec![CachedInstruction::illegal(0)]
    }

    #[test]
    fn insert_then_find_hits() {
        let mut cache = IblockCache::new(8, 4, 2, 4);
        let idx = cache.insert(0x1000, 0, true, false, dummy(), 1);
        assert_eq!(cache.find(0x1000, 0), Some(idx));
    }

    #[test]
    fn link_successor_then_reclaim_nulls_backpointer() {
        let mut cache = IblockCache::new(8, 4, 2, 4);
        let a = cache.insert(0x1000, 0, true, false, dummy(), 1);
        let b = cache.insert(0x1010, 0, true, false, dummy(), 1);
        cache.link_successor(a, SuccessorSlot::True, b);
        assert_eq!(cache.true_successor(a), Some(b));
        cache.touch(a);
        cache.reclaim();
        assert_eq!(cache.true_successor(a), None);
    }

    #[test]
    fn reclaim_evicts_lru_tail_first() {
        let mut cache = IblockCache::new(2, 4, 1, 4);
        let a = cache.insert(0x10, 0, true, false, dummy(), 1);
        let b = cache.insert(0x20, 0, true, false, dummy(), 1);
        cache.touch(b);
        let c = cache.insert(0x30, 0, true, false, dummy(), 1);
        assert!(cache.find(0x10, 0).is_none());
        assert_eq!(cache.find(0x20, 0), Some(b));
        assert_eq!(cache.find(0x30, 0), Some(c));
    }

    #[test]
    fn flush_all_empties_cache() {
        let mut cache = IblockCache::new(4, 4, 2, 4);
        let _ = cache.insert(0x10, 0, true, false, dummy(), 1);
        let _ = cache.insert(0x20, 0, true, false, dummy(), 1);
        cache.flush_all();
        assert!(cache.find(0x10, 0).is_none());
        assert!(cache.find(0x20, 0).is_none());
    }
}
