//! Paper trading collaborators: a simulated venue and wallet, and an
//! in-memory store. No funds or network calls are involved.

mod memory;
mod venue;

pub use memory::MemoryStore;
pub use venue::PaperVenue;
