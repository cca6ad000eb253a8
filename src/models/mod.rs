pub mod process;
pub mod server;
pub mod stats;

pub use process::{ServerStatus, TrackedProcess};
pub use server::{NewServer, ServerDefinition, ServerUpdate};
pub use stats::{CpuInfo, MemoryInfo, ProcessMetrics, SystemMetrics};
