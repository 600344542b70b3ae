/// Partitioning of input into fixed-size batches
pub mod chunk;
/// The per-item processing seam
pub mod processor;
/// Sequential and bounded-concurrent batch execution
pub mod scheduler;
/// Options, settings and run statistics
pub mod types;

pub use chunk::*;
pub use processor::*;
pub use scheduler::*;
pub use types::*;
