//! Specialized concurrent collections used by the tileforge crates.

pub mod atomic_bit_set;
pub mod spill_bit_set;

pub use atomic_bit_set::AtomicBitSet;
pub use spill_bit_set::SpillBitSet;
