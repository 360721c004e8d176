//! The platform: the physical bus, RAM, the platform board, per-CPU LSICs,
//! and the coherent memory system that ties them together.

pub mod builder;
pub mod bus;
pub mod lsic;
pub mod pboard;
pub mod ram;
pub mod traits;

pub use builder::MemSystem;
pub use bus::Bus;
pub use lsic::Lsic;
pub use pboard::PBoard;
pub use traits::BusDevice;
