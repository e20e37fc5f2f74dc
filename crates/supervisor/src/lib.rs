pub mod health;
pub mod registry;
pub mod supervisor;

pub use supervisor::{
    InstanceState, InstanceStatus, ServiceRole, Supervisor, SupervisorConfig, Transition,
};
