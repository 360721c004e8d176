//! Host file loading: the only code in this crate allowed to touch the
//! filesystem. Boot ROM and NVRAM images are read into the platform board
//! through [`crate::soc::pboard::PBoard`]; a missing or unreadable file
//! degrades rather than aborting, per the platform's host-I/O error
//! contract, except for the boot ROM itself, whose absence leaves a system
//! with nothing to execute and is treated as a fatal host-side error the
//! same way the reference CLI treats a missing kernel image.

use std::path::Path;
use std::process;

use crate::sim::simulator::Simulator;

/// Loads the boot ROM image at `path` into the platform board. Exits the
/// host process with a diagnostic if `path` cannot be read at all; a
/// truncated image is zero-padded by [`crate::soc::pboard::PBoard`] itself.
pub fn load_boot_rom(sim: &Simulator, path: &Path) {
    if !path.exists() {
        eprintln!("boot ROM not found: {}", path.display());
        process::exit(1);
    }
    sim.with_mem(|mem| mem.bus_mut().pboard_mut().load_rom_file(path));
}

/// Loads a saved NVRAM image at `path` into the platform board, if present,
/// and remembers `path` so [`save_nvram`] can write back to it.
pub fn load_nvram(sim: &Simulator, path: &Path) {
    sim.with_mem(|mem| mem.bus_mut().pboard_mut().load_nvram_file(path));
}

/// Flushes NVRAM back to its backing file, if dirty. Called once by the
/// host runner on a clean shutdown; guest code never reaches this path.
pub fn save_nvram(sim: &Simulator) {
    sim.with_mem(|mem| mem.bus_mut().pboard_mut().save_nvram());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;

    fn sim() -> Simulator {
        Simulator::new(&Config::default())
    }

    #[test]
    fn load_boot_rom_places_bytes_at_bootrom_base() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let instance = sim();
        load_boot_rom(&instance, file.path());

        let word = instance.with_mem(|mem| {
            mem.bus_read(crate::common::addr::PhysAddr::new(0xF800_0000 + 0x07FE_0000), 4, 0).unwrap()
        });
        assert_eq!(word, 0xEFBE_ADDE);
    }

    #[test]
    fn load_nvram_then_save_round_trips_through_a_file() {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let instance = sim();
        load_nvram(&instance, &path);
        instance.with_mem(|mem| {
            let _ = mem.bus_write(crate::common::addr::PhysAddr::new(0xF800_1000), 4, 0x1234_5678, 0).unwrap();
        });
        save_nvram(&instance);

        let instance2 = sim();
        load_nvram(&instance2, &path);
        let word = instance2.with_mem(|mem| mem.bus_read(crate::common::addr::PhysAddr::new(0xF800_1000), 4, 0).unwrap());
        assert_eq!(word, 0x1234_5678);
    }
}
