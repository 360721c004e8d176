//! One XR/17032 processor: registers, translation, private caches, the
//! Iblock cache, and the dispatch loop that drives them.

use tracing::{trace, warn};

use crate::common::addr::{PhysAddr, VirtAddr};
use crate::common::constants::{self, IBLOCK_BACKPOINTER_SLOTS};
use crate::common::data::AccessType;
use crate::common::error::ExceptionCause;
use crate::common::reg::Gpr;
use crate::config::Config;
use crate::core::cache::ICache;
use crate::core::exception;
use crate::core::iblock::{IblockCache, SuccessorSlot};
use crate::core::mmu::tlb::TbEntry;
use crate::core::mmu::Mmu;
use crate::isa::instruction::{CachedInstruction, Opcode, ShiftKind};
use crate::isa::decode::decode;
use crate::soc::builder::MemSystem;

const CR_RS: u32 = 0;
const CR_WHAMI: u32 = 1;
const CR_EB: u32 = 2;
const CR_EPC: u32 = 3;
const CR_EBADADDR: u32 = 4;
const CR_TBMISSADDR: u32 = 5;
const CR_TBPC: u32 = 6;
const CR_ITBPTE: u32 = 7;
const CR_ITBINDEX: u32 = 9;
const CR_ITBCTRL: u32 = 10;
const CR_DTBPTE: u32 = 12;
const CR_DTBINDEX: u32 = 14;
const CR_DTBCTRL: u32 = 15;
const CR_ICACHECTL: u32 = 17;
const CR_DCACHECTL: u32 = 18;
const CR_ASID: u32 = 19;

/// One processor's full architectural and microarchitectural state.
pub struct Processor {
    pub cpu_id: usize,
    pub gpr: Gpr,
    pub pc: u32,
    pub rs: u32,
    pub asid: u32,
    eb: u32,
    epc: u32,
    ebadaddr: u32,
    tbmissaddr: u32,
    tbpc: u32,
    pub mmu: Mmu,
    icache: ICache,
    iblocks: IblockCache,
    line_bytes: u32,
    locked: bool,
    nmi_mask: u32,
    nmi_mask_cycles: u32,
    pub halted: bool,
    pub user_break: bool,
    pub running: bool,
    pause_count: u32,
    progress: i32,
    progress_budget: i32,
    reset_pc: u32,
    trace_instructions: bool,
}

impl Processor {
    /// Builds a processor in its reset state.
    #[must_use]
    pub fn new(cpu_id: usize, cfg: &Config) -> Self {
        let line_bytes = cfg.cache.line_bytes;
        let icache = ICache::new(cfg.cache.icache.sets(line_bytes), cfg.cache.icache.ways, line_bytes);
        let iblocks = IblockCache::new(cfg.iblock.capacity, cfg.iblock.hash_buckets, cfg.iblock.reclaim_batch, IBLOCK_BACKPOINTER_SLOTS);
        let mut p = Self {
            cpu_id,
            gpr: Gpr::default(),
            pc: cfg.general.reset_pc,
            rs: 0,
            asid: 0,
            eb: 0,
            epc: 0,
            ebadaddr: 0,
            tbmissaddr: 0,
            tbpc: 0,
            mmu: Mmu::new(cfg.memory.itb_size, cfg.memory.dtb_size),
            icache,
            iblocks,
            line_bytes: line_bytes as u32,
            locked: false,
            nmi_mask: 0,
            nmi_mask_cycles: cfg.general.nmi_mask_cycles,
            halted: false,
            user_break: false,
            running: true,
            pause_count: 0,
            progress: cfg.scheduler.progress_budget,
            progress_budget: cfg.scheduler.progress_budget,
            reset_pc: cfg.general.reset_pc,
            trace_instructions: cfg.general.trace_instructions,
        };
        p.reset();
        p
    }

    /// Restores reset state (PC, RS, EB, TBs, caches), per the reset-state
    /// table: `WHAMI` is fixed at construction (it is this processor's
    /// index) so it survives a reset untouched.
    pub fn reset(&mut self) {
        self.pc = self.reset_pc;
        self.rs = 0;
        self.eb = 0;
        self.mmu.itb.invalidate_all();
        self.mmu.dtb.invalidate_all();
        self.icache.invalidate_all();
        self.iblocks.flush_all();
        self.locked = false;
        self.nmi_mask = 0;
        self.halted = false;
        self.running = true;
        self.user_break = false;
        self.progress = self.progress_budget;
    }

    fn kernel_mode(&self) -> bool {
        exception::current_mode(self.rs) & exception::MODE_USER == 0
    }

    fn mmu_enabled(&self) -> bool {
        exception::current_mode(self.rs) & exception::MODE_MMU != 0
    }

    fn interrupts_enabled(&self) -> bool {
        exception::current_mode(self.rs) & exception::MODE_INT != 0
    }

    /// Resolves `vaddr` for `access`, falling through untranslated when the
    /// MMU mode bit is clear.
    fn translate(&mut self, vaddr: VirtAddr, access: AccessType) -> Result<PhysAddr, ExceptionCause> {
        if !self.mmu_enabled() {
            return Ok(PhysAddr::new(vaddr.val()));
        }
        let outcome = self.mmu.translate(vaddr, access, self.asid, self.kernel_mode());
        match outcome.fault {
            Some(cause) => {
                self.ebadaddr = vaddr.val();
                Err(cause)
            }
            None => Ok(PhysAddr::new(outcome.paddr)),
        }
    }

    /// Vectors into the exception handler for `cause`, or resets the
    /// processor if no exception base has ever been installed.
    pub fn raise_exception(&mut self, cause: ExceptionCause, ebadaddr: u32) {
        if self.eb == 0 {
            warn!(cpu = self.cpu_id, ?cause, "exception with EB=0, resetting");
            self.reset();
            return;
        }
        let already_tbmiss = exception::current_mode(self.rs) & exception::MODE_TBMISS != 0;

        if cause.is_tb_miss() {
            if !already_tbmiss {
                self.tbpc = self.pc;
                self.tbmissaddr = ebadaddr;
                self.rs = exception::enter_tbmiss(self.rs);
            }
        } else if already_tbmiss {
            self.ebadaddr = self.tbmissaddr;
            self.pc = self.tbpc;
            self.rs &= !exception::MODE_TBMISS;
            self.rs = (self.rs & !0xF000_0000) | (cause.code() << 28);
            self.nmi_mask = self.nmi_mask_cycles;
            self.progress = self.progress_budget;
            return;
        } else {
            self.epc = self.pc;
            self.rs = exception::enter_exception(self.rs, cause);
        }

        self.ebadaddr = ebadaddr;
        self.pc = self.eb | (cause.code() << 8);
        self.nmi_mask = self.nmi_mask_cycles;
        self.progress = self.progress_budget;
    }

    fn rfe(&mut self, mem: &mut MemSystem) {
        if self.locked {
            self.locked = false;
            mem.clear_reservation(self.cpu_id);
        }
        let was_tbmiss = exception::current_mode(self.rs) & exception::MODE_TBMISS != 0;
        self.pc = if was_tbmiss { self.tbpc } else { self.epc };
        self.rs = exception::leave_exception(self.rs);
        if was_tbmiss {
            self.gpr.clear_scratch();
        }
    }

    fn mfcr(&mut self, index: u32) -> u32 {
        match index {
            CR_RS => self.rs,
            CR_WHAMI => self.cpu_id as u32,
            CR_EB => self.eb,
            CR_EPC => self.epc,
            CR_EBADADDR => self.ebadaddr,
            CR_TBMISSADDR => self.tbmissaddr,
            CR_TBPC => self.tbpc,
            CR_ITBINDEX => self.mmu.itb.next_refill_index() as u32,
            CR_DTBINDEX => self.mmu.dtb.next_refill_index() as u32,
            CR_ASID => self.asid,
            _ => 0,
        }
    }

    fn mtcr(&mut self, index: u32, val: u32) {
        match index {
            CR_RS => self.rs = val,
            CR_EB => self.eb = val,
            CR_EPC => self.epc = val,
            CR_EBADADDR => self.ebadaddr = val,
            CR_ASID => self.asid = val,
            CR_ITBPTE => {
                let vpn = self.tbmissaddr >> constants::PAGE_SHIFT;
                let idx = self.mmu.itb.next_refill_index();
                self.mmu.itb.refill_at(idx, decode_pte(val, vpn, self.asid));
                self.iblocks.flush_all();
            }
            CR_DTBPTE => {
                let vpn = self.tbmissaddr >> constants::PAGE_SHIFT;
                let idx = self.mmu.dtb.next_refill_index();
                self.mmu.dtb.refill_at(idx, decode_pte(val, vpn, self.asid));
            }
            CR_ITBCTRL => {
                self.apply_tb_ctrl(true, val);
                self.iblocks.flush_all();
            }
            CR_DTBCTRL => self.apply_tb_ctrl(false, val),
            CR_ICACHECTL => {
                self.icache.invalidate_all();
                self.iblocks.flush_all();
            }
            CR_DCACHECTL => {
                // D-cache flush needs the shared memory system; the caller
                // (execute_one) special-cases this selector instead.
            }
            _ => {}
        }
    }

    fn apply_tb_ctrl(&mut self, instruction_side: bool, val: u32) {
        let tlb = if instruction_side { &mut self.mmu.itb } else { &mut self.mmu.dtb };
        match val & 0x3 {
            0 => tlb.invalidate_one(val >> 12),
            1 => tlb.invalidate_all_but_reserved(),
            2 => tlb.invalidate_all_but_reserved_and_global(),
            _ => tlb.invalidate_all(),
        }
    }

    fn fetch_line(&mut self, mem: &mut MemSystem, line_addr: u32) -> Result<Vec<u8>, ExceptionCause> {
        if let Some(data) = self.icache.lookup(line_addr) {
            return Ok(data.to_vec());
        }
        let mut data = vec![0u8; self.line_bytes as usize];
        for (i, slot) in data.chunks_mut(4).enumerate() {
            let word = mem
                .read_cached(self.cpu_id, PhysAddr::new(line_addr + (i as u32) * 4), 4)
                .map_err(|e| {
                    self.ebadaddr = e.addr;
                    ExceptionCause::BusError
                })?
                .value;
            slot.copy_from_slice(&word.to_le_bytes()[..slot.len()]);
        }
        self.icache.install(line_addr, data.clone());
        Ok(data)
    }

    /// Builds and caches an Iblock for the processor's current PC, or
    /// returns the fault that prevented it.
    fn decode_iblock(&mut self, mem: &mut MemSystem) -> Result<usize, ExceptionCause> {
        if let Some(idx) = self.iblocks.find(self.pc, self.asid) {
            return Ok(idx);
        }

        let fetch_base = self.translate(VirtAddr::new(self.pc), AccessType::Fetch)?;
        let kernel = self.kernel_mode();
        let noncached = fetch_base.is_forced_noncached();

        let mut instructions = Vec::new();
        let mut cursor_vaddr = self.pc;
        let line_mask = self.line_bytes - 1;
        loop {
            let line_base = cursor_vaddr & !line_mask;
            let paddr = self.translate(VirtAddr::new(line_base), AccessType::Fetch)?;
            let line_data = if noncached {
                let word = mem
                    .read_cached(self.cpu_id, PhysAddr::new(paddr.val() + (cursor_vaddr - line_base)), 4)
                    .map_err(|e| {
                        self.ebadaddr = e.addr;
                        ExceptionCause::BusError
                    })?
                    .value;
                word.to_le_bytes().to_vec()
            } else {
                self.fetch_line(mem, paddr.val())?
            };
            let in_line_off = (cursor_vaddr - line_base) as usize % line_data.len().max(4);
            let mut word_bytes = [0u8; 4];
            let available = line_data.len().saturating_sub(in_line_off).min(4);
            word_bytes[..available].copy_from_slice(&line_data[in_line_off..in_line_off + available]);
            let word = u32::from_le_bytes(word_bytes);

            let ins = decode(word, cursor_vaddr);
            let terminator = ins.op.is_block_terminator();
            instructions.push(ins);
            cursor_vaddr = cursor_vaddr.wrapping_add(4);

            let crossed_page = (cursor_vaddr & constants::PAGE_OFFSET_MASK) == 0;
            if terminator || instructions.len() >= constants::IBLOCK_MAX_INSTRUCTIONS || crossed_page {
                break;
            }
        }

        let cycles = instructions.len() as u64;
        Ok(self.iblocks.insert(self.pc, self.asid, kernel, noncached, instructions, cycles))
    }

    /// Executes one already-decoded instruction, returning the control-flow
    /// effect it had (for terminators) or `None` for straight-line
    /// instructions (the caller advances the instruction cursor itself).
    fn execute_one(&mut self, ins: &CachedInstruction, fallthrough_pc: u32, mem: &mut MemSystem) -> Result<Option<u32>, ExceptionCause> {
        // Non-memory faults (SYS, BRK, illegal words, privilege violations)
        // carry no meaningful EBADADDR; default it to zero so a stale value
        // from an earlier access in this block never leaks out.
        self.ebadaddr = 0;
        let ra = self.gpr.read(ins.ra as usize, self.in_tbmiss());
        let rb = self.gpr.read(ins.rb as usize, self.in_tbmiss());
        let in_tbmiss = self.in_tbmiss();

        match ins.op {
            Opcode::Lui => self.gpr.write(ins.rd as usize, ra | (ins.imm as u32), in_tbmiss),
            Opcode::AddI => self.gpr.write(ins.rd as usize, ra.wrapping_add(ins.imm as u32), in_tbmiss),
            Opcode::SubI => self.gpr.write(ins.rd as usize, ra.wrapping_sub(ins.imm as u32), in_tbmiss),
            Opcode::SltI => self.gpr.write(ins.rd as usize, u32::from((ra as i32) < ins.imm), in_tbmiss),
            Opcode::SltIU => self.gpr.write(ins.rd as usize, u32::from(ra < ins.imm as u32), in_tbmiss),
            Opcode::AndI => self.gpr.write(ins.rd as usize, ra & (ins.imm as u32 & 0xFFFF), in_tbmiss),
            Opcode::XorI => self.gpr.write(ins.rd as usize, ra ^ (ins.imm as u32 & 0xFFFF), in_tbmiss),
            Opcode::OrI => self.gpr.write(ins.rd as usize, ra | (ins.imm as u32 & 0xFFFF), in_tbmiss),
            Opcode::Nor => self.gpr.write(ins.rd as usize, !(self.shifted(ra, ins) | rb), in_tbmiss),
            Opcode::Or => self.gpr.write(ins.rd as usize, self.shifted(ra, ins) | rb, in_tbmiss),
            Opcode::Xor => self.gpr.write(ins.rd as usize, self.shifted(ra, ins) ^ rb, in_tbmiss),
            Opcode::And => self.gpr.write(ins.rd as usize, self.shifted(ra, ins) & rb, in_tbmiss),
            Opcode::SltSReg => self.gpr.write(ins.rd as usize, u32::from((self.shifted(ra, ins) as i32) < rb as i32), in_tbmiss),
            Opcode::SltReg => self.gpr.write(ins.rd as usize, u32::from(self.shifted(ra, ins) < rb), in_tbmiss),
            Opcode::SubReg => self.gpr.write(ins.rd as usize, self.shifted(ra, ins).wrapping_sub(rb), in_tbmiss),
            Opcode::AddReg => self.gpr.write(ins.rd as usize, self.shifted(ra, ins).wrapping_add(rb), in_tbmiss),
            Opcode::Mul => self.gpr.write(ins.rd as usize, ra.wrapping_mul(rb), in_tbmiss),
            Opcode::Div => self.gpr.write(ins.rd as usize, if rb == 0 { 0 } else { ra / rb }, in_tbmiss),
            Opcode::DivS => self.gpr.write(ins.rd as usize, if rb == 0 { 0 } else { ((ra as i32) / (rb as i32)) as u32 }, in_tbmiss),
            Opcode::Mod => self.gpr.write(ins.rd as usize, if rb == 0 { 0 } else { ra % rb }, in_tbmiss),

            Opcode::LoadLong | Opcode::LoadInt | Opcode::LoadByte => {
                let vaddr = VirtAddr::new(ra.wrapping_add(ins.imm as u32));
                let len = load_len(ins.op);
                self.check_alignment(vaddr.val(), len)?;
                let paddr = self.translate(vaddr, AccessType::Read)?;
                let value = mem.read_cached(self.cpu_id, paddr, len).map_err(|e| {
                    self.ebadaddr = e.addr;
                    ExceptionCause::BusError
                })?;
                self.gpr.write(ins.rd as usize, sign_extend(value.value, len), in_tbmiss);
            }
            Opcode::StoreLong | Opcode::StoreInt | Opcode::StoreByte => {
                let vaddr = VirtAddr::new(self.gpr.read(ins.rd as usize, in_tbmiss).wrapping_add(ins.imm as u32));
                let len = load_len(match ins.op {
                    Opcode::StoreLong => Opcode::LoadLong,
                    Opcode::StoreInt => Opcode::LoadInt,
                    _ => Opcode::LoadByte,
                });
                self.check_alignment(vaddr.val(), len)?;
                let paddr = self.translate(vaddr, AccessType::Write)?;
                let _ = mem.write_cached(self.cpu_id, paddr, len, ra).map_err(|e| {
                    self.ebadaddr = e.addr;
                    ExceptionCause::BusError
                })?;
            }
            Opcode::StoreLongImm | Opcode::StoreIntImm | Opcode::StoreByteImm => {
                let vaddr = VirtAddr::new(self.gpr.read(ins.rd as usize, in_tbmiss).wrapping_add(ins.imm as u32));
                let len = load_len(match ins.op {
                    Opcode::StoreLongImm => Opcode::LoadLong,
                    Opcode::StoreIntImm => Opcode::LoadInt,
                    _ => Opcode::LoadByte,
                });
                self.check_alignment(vaddr.val(), len)?;
                let paddr = self.translate(vaddr, AccessType::Write)?;
                let _ = mem.write_cached(self.cpu_id, paddr, len, sign_extend5(ins.ra) as u32).map_err(|e| {
                    self.ebadaddr = e.addr;
                    ExceptionCause::BusError
                })?;
            }

            Opcode::Ll => {
                let vaddr = VirtAddr::new(ra);
                let paddr = self.translate(vaddr, AccessType::Read)?;
                let result = mem.load_linked(self.cpu_id, paddr).map_err(|_| ExceptionCause::BusError)?;
                self.locked = true;
                self.gpr.write(ins.rd as usize, result.value, in_tbmiss);
            }
            Opcode::Sc => {
                let vaddr = VirtAddr::new(ra);
                let paddr = self.translate(vaddr, AccessType::Write)?;
                let value = self.gpr.read(ins.rd as usize, in_tbmiss);
                let ok = mem.store_conditional(self.cpu_id, paddr, value).map_err(|_| ExceptionCause::BusError)?;
                self.locked = false;
                self.gpr.write(ins.rd as usize, u32::from(ok), in_tbmiss);
            }
            Opcode::Wmb | Opcode::Mb => {
                mem.drain_all(self.cpu_id).map_err(|_| ExceptionCause::BusError)?;
            }
            Opcode::Pause => {
                self.pause_count += 1;
                if self.pause_count >= constants::PAUSE_YIELD_THRESHOLD {
                    self.progress = 0;
                }
            }

            Opcode::Jalr => {
                self.gpr.write(ins.rd as usize, fallthrough_pc, in_tbmiss);
                return Ok(Some(ra.wrapping_add(ins.imm as u32)));
            }
            Opcode::J => return Ok(Some(ins.imm as u32)),
            Opcode::Jal => {
                self.gpr.write(31, fallthrough_pc, in_tbmiss);
                return Ok(Some(ins.imm as u32));
            }
            Opcode::Bpo | Opcode::Bpe | Opcode::Bge | Opcode::Ble | Opcode::Bgt | Opcode::Blt | Opcode::Bne | Opcode::Beq => {
                let rd_val = self.gpr.read(ins.rd as usize, in_tbmiss) as i32;
                let taken = match ins.op {
                    Opcode::Bpo => rd_val & 1 != 0,
                    Opcode::Bpe => rd_val & 1 == 0,
                    Opcode::Bge => rd_val >= 0,
                    Opcode::Ble => rd_val <= 0,
                    Opcode::Bgt => rd_val > 0,
                    Opcode::Blt => rd_val < 0,
                    Opcode::Bne => rd_val != 0,
                    Opcode::Beq => rd_val == 0,
                    _ => unreachable!(),
                };
                let target = if taken {
                    (fallthrough_pc.wrapping_sub(4)).wrapping_add(ins.imm as u32)
                } else {
                    fallthrough_pc
                };
                return Ok(Some(target));
            }

            Opcode::Sys => return Err(ExceptionCause::Syscall),
            Opcode::Brk => return Err(ExceptionCause::Breakpoint),
            Opcode::Rfe => {
                if !self.kernel_mode() {
                    return Err(ExceptionCause::InvalidPrivilege);
                }
                self.rfe(mem);
                return Ok(Some(self.pc));
            }
            Opcode::Hlt => {
                if !self.kernel_mode() {
                    return Err(ExceptionCause::InvalidPrivilege);
                }
                self.halted = true;
                return Ok(Some(fallthrough_pc));
            }
            Opcode::Mtcr => {
                if !self.kernel_mode() {
                    return Err(ExceptionCause::InvalidPrivilege);
                }
                if u32::from(ins.rd) == CR_DCACHECTL {
                    mem.flush_dcache(self.cpu_id).map_err(|_| ExceptionCause::BusError)?;
                } else {
                    self.mtcr(u32::from(ins.rd), ra);
                }
            }
            Opcode::Mfcr => {
                if !self.kernel_mode() {
                    return Err(ExceptionCause::InvalidPrivilege);
                }
                let val = self.mfcr(u32::from(ins.ra));
                self.gpr.write(ins.rd as usize, val, in_tbmiss);
            }
            Opcode::Illegal => return Err(ExceptionCause::InvalidInstruction),
        }
        Ok(None)
    }

    fn shifted(&self, val: u32, ins: &CachedInstruction) -> u32 {
        match ins.shift {
            Some(ShiftKind::Left) => val << (ins.shift_amount & 31),
            Some(ShiftKind::RightLogical) => val >> (ins.shift_amount & 31),
            Some(ShiftKind::RightArithmetic) => ((val as i32) >> (ins.shift_amount & 31)) as u32,
            Some(ShiftKind::RotateRight) => val.rotate_right(u32::from(ins.shift_amount & 31)),
            None => val,
        }
    }

    fn in_tbmiss(&self) -> bool {
        exception::current_mode(self.rs) & exception::MODE_TBMISS != 0
    }

    fn check_alignment(&mut self, vaddr: u32, len: u8) -> Result<(), ExceptionCause> {
        if vaddr % u32::from(len) != 0 {
            self.ebadaddr = vaddr;
            return Err(ExceptionCause::Unaligned);
        }
        Ok(())
    }

    fn sample_interrupt(&self, mem: &MemSystem) -> bool {
        self.interrupts_enabled() && mem.interrupt_pending(self.cpu_id)
    }

    /// Runs one Iblock to completion, or until a fault vectors away from it.
    fn run_block(&mut self, mem: &mut MemSystem, idx: usize) {
        self.iblocks.touch(idx);
        let instructions_ptr: *const CachedInstruction = self.iblocks.get(idx).instructions.as_ptr();
        let len = self.iblocks.get(idx).instructions.len();
        let mut next_vaddr = self.iblocks.get(idx).pc;

        for i in 0..len {
            // SAFETY: the Iblock store is only mutated by `decode_iblock`
            // (which never runs mid-block) and `reclaim`, neither of which
            // this loop calls; the slice outlives the loop body.
            let ins = unsafe { &*instructions_ptr.add(i) };
            next_vaddr = next_vaddr.wrapping_add(4);
            match self.execute_one(ins, next_vaddr, mem) {
                Ok(Some(target)) => {
                    let slot = if target == next_vaddr { SuccessorSlot::False } else { SuccessorSlot::True };
                    if let Some(succ) = self.iblocks.find(target, self.asid) {
                        self.iblocks.link_successor(idx, slot, succ);
                    }
                    self.pc = target;
                    return;
                }
                Ok(None) => {}
                Err(cause) => {
                    self.pc = next_vaddr.wrapping_sub(4);
                    self.raise_exception(cause, self.ebadaddr);
                    return;
                }
            }
        }
        self.pc = next_vaddr;
    }

    /// Runs the processor for up to `cycle_budget` cycles, per the
    /// dispatch-loop state machine. Returns `(cycles consumed, instructions
    /// retired)` for this timeslice, for the host runner's statistics.
    pub fn dispatch(&mut self, mem: &mut MemSystem, mut cycle_budget: i64) -> (u64, u64) {
        let budget_in = cycle_budget;
        let mut instructions = 0u64;

        if self.user_break && self.nmi_mask == 0 {
            self.raise_exception(ExceptionCause::Nmi, 0);
            self.user_break = false;
        }
        if self.halted && !self.sample_interrupt(mem) {
            return (0, 0);
        }
        if self.progress <= 0 {
            return (0, 0);
        }

        while cycle_budget > 0 && self.pause_count < constants::PAUSE_YIELD_THRESHOLD && !self.halted {
            if self.nmi_mask > 0 {
                self.nmi_mask -= 1;
            }
            if self.sample_interrupt(mem) {
                self.raise_exception(ExceptionCause::Interrupt, 0);
            }

            let idx = match self.decode_iblock(mem) {
                Ok(idx) => idx,
                Err(cause) => {
                    self.raise_exception(cause, self.ebadaddr);
                    continue;
                }
            };

            if self.trace_instructions {
                trace!(cpu = self.cpu_id, pc = format_args!("{:#010x}", self.pc), "dispatch iblock");
            }

            let block = self.iblocks.get(idx);
            let cycles = block.cycles;
            instructions += block.instructions.len() as u64;
            self.run_block(mem, idx);
            cycle_budget -= cycles as i64;

            if let Err(e) = mem.tick_write_buffer(self.cpu_id) {
                warn!(cpu = self.cpu_id, addr = format_args!("{:#010x}", e.addr), "write-buffer drain failed");
            }
        }
        self.pause_count = 0;
        (u64::try_from(budget_in - cycle_budget).unwrap_or(0), instructions)
    }
}

fn load_len(op: Opcode) -> u8 {
    match op {
        Opcode::LoadLong => 4,
        Opcode::LoadInt => 2,
        _ => 1,
    }
}

fn sign_extend(value: u32, len: u8) -> u32 {
    match len {
        1 => (value as i8) as i32 as u32,
        2 => (value as i16) as i32 as u32,
        _ => value,
    }
}

/// Sign-extends the 5-bit literal carried in `ra` by the immediate-store
/// forms.
fn sign_extend5(v: u8) -> i32 {
    (i32::from(v) << 27) >> 27
}

/// Decodes an `ITBPTE`/`DTBPTE` write into a TB entry. The VPN comes from
/// the TB-miss address latched when the miss was taken, and the ASID from
/// the current ASID register, matching the way the miss handler only ever
/// supplies frame number and permission flags in the written word.
fn decode_pte(val: u32, vpn: u32, asid: u32) -> TbEntry {
    TbEntry {
        asid,
        vpn,
        pfn: val >> 12,
        global: val & 0x10 != 0,
        noncached: val & 0x08 != 0,
        kernel: val & 0x04 != 0,
        writable: val & 0x02 != 0,
        valid: val & 0x01 != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soc::builder::MemSystem;

    fn proc() -> Processor {
        Processor::new(0, &Config::default())
    }

    fn mem() -> MemSystem {
        MemSystem::new(1, &Config::default())
    }

    #[test]
    fn reset_state_matches_config() {
        let mut p = proc();
        assert_eq!(p.pc, constants::RESET_PC);
        assert_eq!(p.rs, 0);
        assert_eq!(p.mfcr(CR_EB), 0);
        assert!(p.running);
        assert!(!p.halted);
    }

    #[test]
    fn whami_survives_reset() {
        let mut p = Processor::new(3, &Config::default());
        p.reset();
        assert_eq!(p.mfcr(CR_WHAMI), 3);
    }

    #[test]
    fn addi_writes_register_and_falls_through() {
        let mut p = proc();
        let mut m = mem();
        let ins = decode(60 | (3 << 6) | (0 << 11) | (7u32 << 16), 0);
        let result = p.execute_one(&ins, p.pc.wrapping_add(4), &mut m);
        assert_eq!(result.unwrap(), None);
        assert_eq!(p.gpr.read(3, false), 7);
    }

    #[test]
    fn addi_zero_extends_a_high_bit_immediate() {
        let mut p = proc();
        let mut m = mem();
        // opcode 60, rd=3, ra=0, imm=0xFFFF: must add 65535, not subtract 1.
        let ins = decode(60 | (3 << 6) | (0xFFFFu32 << 16), 0);
        let _ = p.execute_one(&ins, p.pc.wrapping_add(4), &mut m).unwrap();
        assert_eq!(p.gpr.read(3, false), 0xFFFF);
    }

    #[test]
    fn lui_ors_ra_into_the_upper_half() {
        let mut p = proc();
        let mut m = mem();
        p.gpr.write(5, 0x0000_00AB, false);
        // opcode 4, rd=3, ra=5, imm=0x1234: reg[3] = reg[5] | (imm << 16).
        let ins = decode(4 | (3 << 6) | (5 << 11) | (0x1234u32 << 16), 0);
        let _ = p.execute_one(&ins, p.pc.wrapping_add(4), &mut m).unwrap();
        assert_eq!(p.gpr.read(3, false), 0x1234_00AB);
    }

    #[test]
    fn slti_signed_and_sltiu_unsigned_disagree_on_a_negative_imm() {
        let mut p = proc();
        let mut m = mem();
        p.gpr.write(4, 0, false);

        // opcode 36 (SltI, signed): 0 < SignExt16(0xFFFF) == -1 is false.
        let signed = decode(36 | (3 << 6) | (4 << 11) | (0xFFFFu32 << 16), 0);
        let _ = p.execute_one(&signed, p.pc.wrapping_add(4), &mut m).unwrap();
        assert_eq!(p.gpr.read(3, false), 0);

        // opcode 44 (SltIU, unsigned): 0 < 0xFFFF is true.
        let unsigned = decode(44 | (3 << 6) | (4 << 11) | (0xFFFFu32 << 16), 0);
        let _ = p.execute_one(&unsigned, p.pc.wrapping_add(4), &mut m).unwrap();
        assert_eq!(p.gpr.read(3, false), 1);
    }

    #[test]
    fn store_long_imm_writes_sign_extended_literal_at_scaled_displacement() {
        let mut p = proc();
        let mut m = mem();
        p.gpr.write(3, 0x1000, false);
        // opcode 10, rd=3 (base), ra=0x1F (literal -1 once sign-extended),
        // imm field = 1 word -> displacement 4.
        let ins = decode(10 | (3 << 6) | (0x1F << 11) | (1u32 << 16), 0);
        let _ = p.execute_one(&ins, p.pc.wrapping_add(4), &mut m).unwrap();
        let got = m.read_cached(0, PhysAddr::new(0x1004), 4).unwrap();
        assert_eq!(got.value, 0xFFFF_FFFF);
    }

    #[test]
    fn jalr_target_uses_sign_extended_scaled_imm() {
        let mut p = proc();
        let mut m = mem();
        p.gpr.write(9, 0x2000, false);
        // opcode 56, rd=3 (link), ra=9 (base), imm field 0xFFFF -> -4 after
        // sign extension and scaling.
        let ins = decode(56 | (3 << 6) | (9 << 11) | (0xFFFFu32 << 16), 0);
        let target = p.execute_one(&ins, p.pc.wrapping_add(4), &mut m).unwrap();
        assert_eq!(target, Some(0x1FFC));
        assert_eq!(p.gpr.read(3, false), p.pc.wrapping_add(4));
    }

    #[test]
    fn itb_miss_on_fetch_latches_tbmissaddr_and_enters_tbmiss_mode() {
        let mut p = proc();
        let mut m = mem();
        p.eb = 0x8000_0000;
        p.rs = exception::MODE_MMU;
        p.pc = 0x4000_0000;
        let err = p.decode_iblock(&mut m).unwrap_err();
        assert_eq!(err, ExceptionCause::ItbMiss);
        p.raise_exception(err, p.ebadaddr);
        assert_eq!(p.tbmissaddr, 0x4000_0000);
        assert_eq!(p.tbpc, 0x4000_0000);
        assert_ne!(p.rs & exception::MODE_TBMISS, 0);
        assert_eq!(p.pc, p.eb | (ExceptionCause::ItbMiss.code() << 8));
    }

    #[test]
    fn rfe_restores_tbpc_when_leaving_tbmiss() {
        let mut p = proc();
        let mut m = mem();
        p.eb = 0x8000_0000;
        p.rs = exception::MODE_MMU;
        p.pc = 0x4000_0000;
        let err = p.decode_iblock(&mut m).unwrap_err();
        p.raise_exception(err, p.ebadaddr);
        p.rfe(&mut m);
        assert_eq!(p.pc, 0x4000_0000);
        assert_eq!(p.rs & exception::MODE_TBMISS, 0);
    }

    #[test]
    fn mtcr_mfcr_round_trips_asid() {
        let mut p = proc();
        p.mtcr(CR_ASID, 0x42);
        assert_eq!(p.mfcr(CR_ASID), 0x42);
    }

    #[test]
    fn pause_loop_hits_yield_threshold_and_zeroes_progress() {
        let mut p = proc();
        let mut m = mem();
        let ins = decode(49 | (4 << 28), 0);
        for _ in 0..constants::PAUSE_YIELD_THRESHOLD {
            let _ = p.execute_one(&ins, p.pc, &mut m).unwrap();
        }
        assert_eq!(p.progress, 0);
        assert_eq!(p.pause_count, constants::PAUSE_YIELD_THRESHOLD);
    }

    #[test]
    fn raise_exception_with_no_handler_resets() {
        let mut p = proc();
        p.pc = 0x1234;
        p.raise_exception(ExceptionCause::Syscall, 0);
        assert_eq!(p.pc, constants::RESET_PC);
    }
}
