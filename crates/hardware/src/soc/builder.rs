//! Assembles the bus, RAM, per-CPU caches, the shared Scache, and the
//! per-CPU LSICs into the one coarse-grained lock a running system shares.
//!
//! Per the cache-hierarchy module doc comment, this collapses the
//! architecture notes' per-bucket tag locks and per-line Scache locks into a
//! single mutex wrapping everything below the per-CPU I-cache. A caller
//! holding `&mut MemSystem` has exclusive access to the whole coherence
//! domain for the duration of one access; the invariants in
//! `crate::core::cache` (inclusion, exclusive-uniqueness, write-buffer
//! liveness) hold at every point this borrow is released.

use crate::common::addr::PhysAddr;
use crate::common::constants::{DEFAULT_LINE_BYTES, UNCACHED_STALL_CYCLES};
use crate::common::error::BusError;
use crate::config::Config;
use crate::core::cache::{writebuffer::WriteBuffer, DCache, LineState, Scache};
use crate::soc::bus::Bus;
use crate::soc::lsic::Lsic;

/// Outcome of a cached access: the resulting word (reads) and how many
/// cycles it cost, including any miss-fill penalty.
#[derive(Debug, Clone, Copy)]
pub struct AccessResult {
    pub value: u32,
    pub cycles: u64,
}

/// Everything below the per-CPU I-cache, behind one lock in practice.
pub struct MemSystem {
    bus: Bus,
    line_bytes: u32,
    dcaches: Vec<DCache>,
    scache: Scache,
    write_buffers: Vec<WriteBuffer>,
    lsics: Vec<Lsic>,
    /// Per-CPU line address held under a load-linked reservation, if any.
    ll_reservations: Vec<Option<u32>>,
}

impl MemSystem {
    /// Builds the shared memory system for `num_cpus` processors from `cfg`.
    #[must_use]
    pub fn new(num_cpus: usize, cfg: &Config) -> Self {
        let line_bytes = cfg.cache.line_bytes;
        let dcaches = (0..num_cpus)
            .map(|_| DCache::new(cfg.cache.dcache.sets(line_bytes), cfg.cache.dcache.ways, line_bytes))
            .collect();
        let scache = Scache::new(cfg.cache.scache.sets(line_bytes), cfg.cache.scache.ways, line_bytes);
        let write_buffers = (0..num_cpus)
            .map(|_| WriteBuffer::new(cfg.memory.write_buffer_depth, u32::try_from(cfg.memory.write_buffer_drain_cycles).unwrap_or(u32::MAX)))
            .collect();
        let lsics = (0..num_cpus).map(|_| Lsic::new()).collect();
        Self {
            bus: Bus::new(cfg.system.ram_size),
            line_bytes: line_bytes as u32,
            dcaches,
            scache,
            write_buffers,
            lsics,
            ll_reservations: vec![None; num_cpus],
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn lsics_mut(&mut self) -> &mut [Lsic] {
        &mut self.lsics
    }

    /// Whether CPU `cpu_id`'s local interrupt controller has a pending line.
    #[must_use]
    pub fn interrupt_pending(&self, cpu_id: usize) -> bool {
        self.lsics.get(cpu_id).is_some_and(Lsic::interrupt_pending)
    }

    /// Takes and clears a pending `RESET_MAGIC` request from the platform board.
    pub fn take_reset_request(&mut self) -> bool {
        std::mem::take(&mut self.bus.pboard_mut().reset_requested)
    }

    /// Takes and clears a pending power-off exit code from the platform board.
    pub fn take_exit_request(&mut self) -> Option<u32> {
        self.bus.pboard_mut().take_exit_code()
    }

    /// Raw, uncached bus access for host-driven pokes (e.g. the CLI writing
    /// the platform's power-control register). Guest code never takes this
    /// path; ordinary loads/stores go through [`MemSystem::read_cached`].
    ///
    /// # Errors
    ///
    /// Returns `BusError` per [`Bus::write`]'s contract.
    pub fn bus_write(&mut self, addr: PhysAddr, len: u8, val: u32, cpu_id: usize) -> Result<Vec<usize>, BusError> {
        self.bus.write(addr, len, val, cpu_id, &mut self.lsics)
    }

    /// Raw, uncached bus read counterpart to [`MemSystem::bus_write`].
    ///
    /// # Errors
    ///
    /// Returns `BusError` per [`Bus::read`]'s contract.
    pub fn bus_read(&mut self, addr: PhysAddr, len: u8, cpu_id: usize) -> Result<u32, BusError> {
        self.bus.read(addr, len, cpu_id, &mut self.lsics)
    }

    fn line_addr(&self, paddr: PhysAddr) -> u32 {
        paddr.val() & !(self.line_bytes - 1)
    }

    fn offset_in_line(&self, paddr: PhysAddr) -> usize {
        (paddr.val() & (self.line_bytes - 1)) as usize
    }

    fn fill_line_from_bus(&mut self, cpu_id: usize, line_addr: u32) -> Result<Vec<u8>, BusError> {
        let mut data = vec![0u8; self.line_bytes as usize];
        for (i, slot) in data.chunks_mut(4).enumerate() {
            let word = self.bus.read(PhysAddr::new(line_addr + (i as u32) * 4), 4, cpu_id, &mut self.lsics)?;
            slot.copy_from_slice(&word.to_le_bytes()[..slot.len()]);
        }
        Ok(data)
    }

    fn writeback_line(&mut self, cpu_id: usize, line_addr: u32, data: &[u8]) -> Result<(), BusError> {
        for (i, word_bytes) in data.chunks(4).enumerate() {
            let mut buf = [0u8; 4];
            buf[..word_bytes.len()].copy_from_slice(word_bytes);
            let _ = self
                .bus
                .write(PhysAddr::new(line_addr + (i as u32) * 4), 4, u32::from_le_bytes(buf), cpu_id, &mut self.lsics)?;
        }
        Ok(())
    }

    /// Invalidates `line_addr` in every D-cache except `except_cpu`, clearing
    /// any LL reservation on it, and returns the CPUs actually invalidated.
    fn invalidate_sharers(&mut self, line_addr: u32, owners: &[usize], except_cpu: Option<usize>) -> Vec<usize> {
        let mut touched = Vec::new();
        for &owner in owners {
            if Some(owner) == except_cpu {
                continue;
            }
            let _ = self.dcaches[owner].invalidate(line_addr);
            if self.ll_reservations[owner] == Some(line_addr) {
                self.ll_reservations[owner] = None;
            }
            touched.push(owner);
        }
        touched
    }

    fn evict_victim_if_dirty(&mut self, cpu_id: usize, victim_tag: u32, victim_state: LineState) -> Result<(), BusError> {
        if victim_state == LineState::Invalid {
            return Ok(());
        }
        if self.write_buffers[cpu_id].contains(victim_tag) {
            let data = self.dcaches[cpu_id].read(victim_tag, 0, self.line_bytes as usize);
            self.writeback_line(cpu_id, victim_tag, &data)?;
        }
        self.scache.remove_owner(victim_tag, cpu_id);
        Ok(())
    }

    /// Reads `len` bytes at `paddr` through `cpu_id`'s D-cache, filling on
    /// miss per the read-miss protocol in the cache hierarchy's coherence
    /// notes.
    pub fn read_cached(&mut self, cpu_id: usize, paddr: PhysAddr, len: u8) -> Result<AccessResult, BusError> {
        if paddr.is_forced_noncached() {
            let value = self.bus.read(paddr, len, cpu_id, &mut self.lsics)?;
            return Ok(AccessResult { value, cycles: u64::from(UNCACHED_STALL_CYCLES) });
        }
        let line_addr = self.line_addr(paddr);
        let offset = self.offset_in_line(paddr);

        if self.dcaches[cpu_id].state_of(line_addr) == LineState::Invalid {
            let (dir_state, owners) = self.scache.directory_entry(line_addr);
            let data = if dir_state == LineState::Invalid {
                let fetched = self.fill_line_from_bus(cpu_id, line_addr)?;
                if let Some((victim_tag, victim_owners)) = self.scache.add_sharer(line_addr, cpu_id, || fetched.clone()) {
                    let _ = self.invalidate_sharers(victim_tag, &victim_owners, None);
                }
                fetched
            } else {
                if dir_state == LineState::Exclusive {
                    let owner = owners.first().copied();
                    if let Some(owner) = owner {
                        self.dcaches[owner].set_state(line_addr, LineState::Shared);
                    }
                    let _ = self.scache.add_sharer(line_addr, cpu_id, || Vec::new());
                } else {
                    let _ = self.scache.add_sharer(line_addr, cpu_id, || Vec::new());
                }
                self.scache.read(line_addr).expect("line just installed in Scache").to_vec()
            };

            let (victim_tag, victim_state) = self.dcaches[cpu_id].install(line_addr, LineState::Shared, data);
            self.evict_victim_if_dirty(cpu_id, victim_tag, victim_state)?;
        }

        let bytes = self.dcaches[cpu_id].read(line_addr, offset, len as usize);
        let mut buf = [0u8; 4];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(AccessResult { value: u32::from_le_bytes(buf), cycles: 0 })
    }

    /// Writes `val` (low `len` bytes) at `paddr` through `cpu_id`'s
    /// D-cache, acquiring exclusive ownership first per the write-miss /
    /// write-hit-upgrade protocol.
    pub fn write_cached(&mut self, cpu_id: usize, paddr: PhysAddr, len: u8, val: u32) -> Result<u64, BusError> {
        if paddr.is_forced_noncached() {
            let _ = self.bus.write(paddr, len, val, cpu_id, &mut self.lsics)?;
            return Ok(u64::from(UNCACHED_STALL_CYCLES));
        }
        let line_addr = self.line_addr(paddr);
        let offset = self.offset_in_line(paddr);

        if self.dcaches[cpu_id].state_of(line_addr) != LineState::Exclusive {
            let (_, owners) = self.scache.directory_entry(line_addr);
            let already_present = owners.contains(&cpu_id);
            let data = if already_present {
                self.dcaches[cpu_id].read(line_addr, 0, self.line_bytes as usize)
            } else {
                self.fill_line_from_bus(cpu_id, line_addr)?
            };
            let to_invalidate = self.scache.grant_exclusive(line_addr, cpu_id, || data.clone());
            let _ = self.invalidate_sharers(line_addr, &to_invalidate, Some(cpu_id));

            if !already_present {
                let (victim_tag, victim_state) = self.dcaches[cpu_id].install(line_addr, LineState::Exclusive, data);
                self.evict_victim_if_dirty(cpu_id, victim_tag, victim_state)?;
            } else {
                self.dcaches[cpu_id].set_state(line_addr, LineState::Exclusive);
            }
        }

        let bytes = &val.to_le_bytes()[..len as usize];
        self.dcaches[cpu_id].write_in_place(line_addr, offset, bytes);
        self.scache.write_in_place(line_addr, offset, bytes);

        if !self.write_buffers[cpu_id].contains(line_addr) {
            if self.write_buffers[cpu_id].is_full() {
                self.drain_one(cpu_id)?;
            }
            self.write_buffers[cpu_id].push(line_addr);
        }
        Ok(0)
    }

    /// Performs a load-linked: identical to a cached read, but records the
    /// reservation.
    pub fn load_linked(&mut self, cpu_id: usize, paddr: PhysAddr) -> Result<AccessResult, BusError> {
        if paddr.is_forced_noncached() {
            return Err(BusError { addr: paddr.val() });
        }
        let result = self.read_cached(cpu_id, paddr, 4)?;
        self.ll_reservations[cpu_id] = Some(self.line_addr(paddr));
        Ok(result)
    }

    /// Performs a store-conditional: succeeds only if the reservation for
    /// this line established by the matching `load_linked` is still held.
    pub fn store_conditional(&mut self, cpu_id: usize, paddr: PhysAddr, val: u32) -> Result<bool, BusError> {
        if paddr.is_forced_noncached() {
            return Err(BusError { addr: paddr.val() });
        }
        let line_addr = self.line_addr(paddr);
        if self.ll_reservations[cpu_id] != Some(line_addr) {
            return Ok(false);
        }
        let _ = self.write_cached(cpu_id, paddr, 4, val)?;
        self.ll_reservations[cpu_id] = None;
        Ok(true)
    }

    /// Clears CPU `cpu_id`'s load-linked reservation, used on RFE.
    pub fn clear_reservation(&mut self, cpu_id: usize) {
        self.ll_reservations[cpu_id] = None;
    }

    fn drain_one(&mut self, cpu_id: usize) -> Result<(), BusError> {
        if let Some(line_addr) = self.write_buffers[cpu_id].tick().or_else(|| self.write_buffers[cpu_id].drain_all().into_iter().next()) {
            let data = self.dcaches[cpu_id].read(line_addr, 0, self.line_bytes as usize);
            self.writeback_line(cpu_id, line_addr, &data)?;
        }
        Ok(())
    }

    /// Advances `cpu_id`'s write-buffer drain timer by one cycle.
    pub fn tick_write_buffer(&mut self, cpu_id: usize) -> Result<(), BusError> {
        if let Some(line_addr) = self.write_buffers[cpu_id].tick() {
            let data = self.dcaches[cpu_id].read(line_addr, 0, self.line_bytes as usize);
            self.writeback_line(cpu_id, line_addr, &data)?;
        }
        Ok(())
    }

    /// Forces every buffered write out immediately (`WMB`/`MB`).
    pub fn drain_all(&mut self, cpu_id: usize) -> Result<(), BusError> {
        for line_addr in self.write_buffers[cpu_id].drain_all() {
            let data = self.dcaches[cpu_id].read(line_addr, 0, self.line_bytes as usize);
            self.writeback_line(cpu_id, line_addr, &data)?;
        }
        Ok(())
    }

    /// Flushes `cpu_id`'s private D-cache entirely (`DCACHECTL` full flush).
    pub fn flush_dcache(&mut self, cpu_id: usize) -> Result<(), BusError> {
        self.drain_all(cpu_id)?;
        self.dcaches[cpu_id].invalidate_all();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.bus.reset();
        for dcache in &mut self.dcaches {
            dcache.invalidate_all();
        }
        for wb in &mut self.write_buffers {
            let _ = wb.drain_all();
        }
        for reservation in &mut self.ll_reservations {
            *reservation = None;
        }
        for lsic in &mut self.lsics {
            *lsic = Lsic::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(num_cpus: usize) -> MemSystem {
        MemSystem::new(num_cpus, &Config::default())
    }

    #[test]
    fn write_then_read_same_cpu_forwards() {
        let mut sys = system(1);
        let _ = sys.write_cached(0, PhysAddr::new(0x1000), 4, 0xDEAD_BEEF).unwrap();
        let got = sys.read_cached(0, PhysAddr::new(0x1000), 4).unwrap();
        assert_eq!(got.value, 0xDEAD_BEEF);
    }

    #[test]
    fn cross_cpu_write_invalidates_reader() {
        let mut sys = system(2);
        let _ = sys.read_cached(0, PhysAddr::new(0x2000), 4).unwrap();
        assert_eq!(sys.dcaches[0].state_of(sys.line_addr(PhysAddr::new(0x2000))), LineState::Shared);
        let _ = sys.write_cached(1, PhysAddr::new(0x2000), 4, 7).unwrap();
        assert_eq!(sys.dcaches[0].state_of(sys.line_addr(PhysAddr::new(0x2000))), LineState::Invalid);
        let got = sys.read_cached(0, PhysAddr::new(0x2000), 4).unwrap();
        assert_eq!(got.value, 7);
    }

    #[test]
    fn store_conditional_fails_after_foreign_write() {
        let mut sys = system(2);
        let _ = sys.load_linked(0, PhysAddr::new(0x3000)).unwrap();
        let _ = sys.write_cached(1, PhysAddr::new(0x3000), 4, 99).unwrap();
        let ok = sys.store_conditional(0, PhysAddr::new(0x3000), 123).unwrap();
        assert!(!ok);
    }

    #[test]
    fn store_conditional_succeeds_uncontended() {
        let mut sys = system(1);
        let _ = sys.load_linked(0, PhysAddr::new(0x4000)).unwrap();
        let ok = sys.store_conditional(0, PhysAddr::new(0x4000), 55).unwrap();
        assert!(ok);
    }

    #[test]
    fn noncached_address_bypasses_cache() {
        let mut sys = system(1);
        let result = sys.write_cached(0, PhysAddr::new(0xC000_0000), 4, 1);
        assert!(result.is_ok());
        assert_eq!(sys.dcaches[0].state_of((0xC000_0000 & !(DEFAULT_LINE_BYTES - 1)) as u32), LineState::Invalid);
    }
}
