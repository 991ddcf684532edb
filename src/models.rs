pub mod attendance;
pub mod auth;
pub mod change;
pub mod automation;
pub mod client;
pub mod enrollment;
pub mod finance;
pub mod membership;
pub mod settings;
pub mod summary;
pub mod task;
pub mod tenancy;
