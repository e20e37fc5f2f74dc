pub mod follower;
pub mod retry;
pub mod role;
pub mod source;
