pub mod automation;
pub mod enrollments;
pub mod memberships;
