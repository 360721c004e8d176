//! Top-level orchestration: owns the shared coherent memory system, one
//! processor per configured CPU, and the host thread pool that drives
//! their timeslices frame by frame.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Config;
use crate::core::processor::Processor;
use crate::sim::scheduler::Scheduler;
use crate::soc::builder::MemSystem;
use crate::stats::SimStats;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fully constructed XR/17032 SMP system, ready to run.
pub struct Simulator {
    mem: Arc<Mutex<MemSystem>>,
    cpus: Vec<Arc<Mutex<Processor>>>,
    scheduler: Scheduler,
    progress_budget: i64,
    stats: Arc<Mutex<SimStats>>,
}

impl Simulator {
    /// Builds a simulator for `cfg.system.num_cpus` processors sharing one
    /// `MemSystem` and a `cfg.scheduler.workers`-thread pool.
    #[must_use]
    pub fn new(cfg: &Config) -> Self {
        let num_cpus = cfg.system.num_cpus;
        let mem = Arc::new(Mutex::new(MemSystem::new(num_cpus, cfg)));
        let cpus = (0..num_cpus)
            .map(|cpu_id| Arc::new(Mutex::new(Processor::new(cpu_id, cfg))))
            .collect();
        let scheduler = Scheduler::new(cfg.scheduler.workers);
        Self {
            mem,
            cpus,
            scheduler,
            progress_budget: i64::from(cfg.scheduler.progress_budget),
            stats: Arc::new(Mutex::new(SimStats::default())),
        }
    }

    /// A snapshot of the counters accumulated so far. Only `cycles` and
    /// `instructions_retired` are live; the cache-hierarchy and exception
    /// counters remain at their default zero (see `DESIGN.md`).
    #[must_use]
    pub fn stats(&self) -> SimStats {
        let current = lock(&self.stats);
        SimStats::with_counts(current.cycles, current.instructions_retired)
    }

    /// Number of processors in this system.
    #[must_use]
    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Runs `f` with exclusive access to processor `cpu_id`'s architectural
    /// state, used by the loader to seed boot registers before the first
    /// frame runs.
    pub fn with_cpu<R>(&self, cpu_id: usize, f: impl FnOnce(&mut Processor) -> R) -> R {
        f(&mut lock(&self.cpus[cpu_id]))
    }

    /// Runs `f` with exclusive access to the shared memory system (RAM,
    /// bus, platform board).
    pub fn with_mem<R>(&self, f: impl FnOnce(&mut MemSystem) -> R) -> R {
        f(&mut lock(&self.mem))
    }

    /// Runs one scheduling frame: every processor gets one dispatch
    /// timeslice of up to `progress_budget` cycles, run across the worker
    /// pool. Returns the guest-requested exit code, if a power-off request
    /// landed on the platform board during this frame.
    pub fn run_frame(&mut self) -> Option<u32> {
        let jobs = self
            .cpus
            .iter()
            .map(|cpu| {
                let cpu = Arc::clone(cpu);
                let mem = Arc::clone(&self.mem);
                let stats = Arc::clone(&self.stats);
                let budget = self.progress_budget;
                Box::new(move || {
                    let (cycles, instructions) = lock(&cpu).dispatch(&mut lock(&mem), budget);
                    let mut stats = lock(&stats);
                    stats.cycles += cycles;
                    stats.instructions_retired += instructions;
                }) as Box<dyn FnOnce() + Send>
            })
            .collect();

        self.scheduler.run_frame(jobs);
        self.apply_board_requests()
    }

    /// Runs frames until a processor requests power-off, or `should_stop`
    /// returns `true` (checked once per frame, after board requests are
    /// applied). Returns the guest's requested exit code, or `None` if
    /// `should_stop` ended the run instead.
    pub fn run_until(&mut self, mut should_stop: impl FnMut() -> bool) -> Option<u32> {
        loop {
            if let Some(code) = self.run_frame() {
                return Some(code);
            }
            if should_stop() {
                return None;
            }
        }
    }

    fn apply_board_requests(&mut self) -> Option<u32> {
        let (reset, exit) = self.with_mem(|m| (m.take_reset_request(), m.take_exit_request()));
        if reset {
            for cpu in &self.cpus {
                lock(cpu).reset();
            }
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(num_cpus: usize) -> Config {
        let mut cfg = Config::default();
        cfg.system.num_cpus = num_cpus;
        cfg.scheduler.workers = num_cpus;
        cfg
    }

    #[test]
    fn new_builds_one_processor_per_configured_cpu() {
        let sim = Simulator::new(&cfg(4));
        assert_eq!(sim.num_cpus(), 4);
    }

    #[test]
    fn run_frame_with_no_rom_returns_no_exit() {
        let mut sim = Simulator::new(&cfg(2));
        assert_eq!(sim.run_frame(), None);
    }

    #[test]
    fn power_control_write_surfaces_as_exit_code() {
        let mut sim = Simulator::new(&cfg(1));
        sim.with_mem(|m| {
            let _ = m.bus_write(crate::common::addr::PhysAddr::new(0xF800_0804), 4, 5, 0).unwrap();
        });
        assert_eq!(sim.run_frame(), Some(5));
    }

    #[test]
    fn run_frame_accumulates_cycle_and_instruction_stats() {
        let mut sim = Simulator::new(&cfg(1));
        let _ = sim.run_frame();
        let stats = sim.stats();
        assert!(stats.cycles > 0);
        assert!(stats.instructions_retired > 0);
    }

    #[test]
    fn reset_magic_write_restores_reset_pc() {
        let mut sim = Simulator::new(&cfg(1));
        sim.with_cpu(0, |p| p.pc = 0x1234_5678);
        sim.with_mem(|m| {
            let _ = m.bus_write(crate::common::addr::PhysAddr::new(0xF880_0000), 4, crate::common::constants::RESET_MAGIC, 0).unwrap();
        });
        let _ = sim.run_frame();
        sim.with_cpu(0, |p| assert_eq!(p.pc, crate::common::constants::RESET_PC));
    }
}
