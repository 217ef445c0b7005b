// # Repository Implementations
//
// In-process implementations of the Repository trait. The git-backed
// implementation lives in the notifybot-git crate.

pub mod memory;

pub use memory::MemoryRepository;
