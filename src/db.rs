pub mod attendance_repo;
pub use attendance_repo::AttendanceRepository;
pub mod change_repo;
pub use change_repo::ChangeRepository;
pub mod client_repo;
pub use client_repo::ClientRepository;
pub mod enrollment_repo;
pub use enrollment_repo::EnrollmentRepository;
pub mod finance_repo;
pub use finance_repo::FinanceRepository;
pub mod job_repo;
pub use job_repo::JobRunRepository;
pub mod membership_repo;
pub use membership_repo::MembershipRepository;
pub mod settings_repo;
pub use settings_repo::SettingsRepository;
pub mod summary_repo;
pub use summary_repo::SummaryRepository;
pub mod task_repo;
pub use task_repo::TaskRepository;
pub mod tenancy_repo;
pub use tenancy_repo::TenantRepository;
pub mod write_ops;
pub use write_ops::{PgCommitter, WriteOp};
