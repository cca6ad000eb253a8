pub mod command;
pub mod control;
pub mod probe;
pub mod registry;
pub mod store;
pub mod supervisor;

pub use control::{ControlError, ServerControl};
pub use store::{ServerStore, StoreError};
pub use supervisor::{Supervisor, SupervisorConfig};
