//! Event channel implementations.

pub mod memory;
pub mod nats;

pub use memory::MemoryBus;
pub use nats::NatsBus;
