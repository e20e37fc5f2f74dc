pub mod directory;
pub mod error;
pub mod render;
pub mod stats;
pub mod transports;
pub mod worker;

pub use error::DeliveryError;
pub use worker::{DispatchConfig, DispatchOutcome, DispatchRole, DispatchWorker};
