pub mod branch_automation;
pub mod change_feed;
pub mod enrollment_service;
pub mod membership_admin;
pub mod membership_reconciler;
pub mod scheduler;
pub mod settings_service;
pub mod summary_aggregator;
pub mod task_generator;
pub mod tenant_runner;

use crate::{common::batch_writer::BatchWriter, db::PgCommitter};

/// O escritor em lotes usado por toda a automação.
pub type PgBatchWriter = BatchWriter<PgCommitter>;
