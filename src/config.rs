// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{FixedOffset, NaiveTime};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    common::{
        batch_writer::{BatchWriter, BatchWriterConfig},
        i18n::I18nStore,
    },
    db::{
        AttendanceRepository, ChangeRepository, ClientRepository, EnrollmentRepository, FinanceRepository,
        JobRunRepository, MembershipRepository, PgCommitter, SettingsRepository, SummaryRepository,
        TaskRepository, TenantRepository,
    },
    services::{
        branch_automation::BranchAutomationService,
        change_feed::ChangeFeedWorker,
        enrollment_service::EnrollmentService,
        membership_admin::MembershipAdminService,
        membership_reconciler::MembershipReconciler,
        scheduler::{JobSchedule, Scheduler},
        settings_service::SettingsResolver,
        summary_aggregator::SummaryAggregator,
        task_generator::TaskGenerator,
        tenant_runner::TenantRunner,
    },
};

// Configuração da automação, lida do ambiente (.env)
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub batch: BatchWriterConfig,
    pub job_timeout: Duration,
    pub change_feed_poll: Duration,
    pub schedulers_enabled: bool,
    pub branch_automation_at: JobSchedule,
    pub membership_sync_at: JobSchedule,
    pub task_generation_at: JobSchedule,
}

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("{} inválida: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// "HH:MM" + deslocamento em horas (ex: -3).
fn schedule_from_env(prefix: &str, default_at: &str, default_offset_hours: i32) -> anyhow::Result<JobSchedule> {
    let at_var = format!("{}_AT", prefix);
    let offset_var = format!("{}_UTC_OFFSET", prefix);

    let raw_at = env::var(&at_var).unwrap_or_else(|_| default_at.to_string());
    let at = NaiveTime::parse_from_str(raw_at.trim(), "%H:%M")
        .with_context(|| format!("{} inválida (use HH:MM): {}", at_var, raw_at))?;

    let hours: i32 = var_or(&offset_var, default_offset_hours)?;
    let utc_offset = FixedOffset::east_opt(hours * 3600)
        .with_context(|| format!("{} fora do intervalo: {}", offset_var, hours))?;

    Ok(JobSchedule { at, utc_offset })
}

impl AutomationConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = BatchWriterConfig::default();
        let batch = BatchWriterConfig {
            max_ops_per_chunk: var_or("BATCH_MAX_OPS", defaults.max_ops_per_chunk)?,
            max_retries: var_or("BATCH_MAX_RETRIES", defaults.max_retries)?,
            base_backoff: Duration::from_millis(var_or("BATCH_BACKOFF_MS", 200u64)?),
        };

        Ok(Self {
            batch,
            job_timeout: Duration::from_secs(var_or("JOB_TIMEOUT_SECS", 540u64)?),
            change_feed_poll: Duration::from_secs(var_or("CHANGE_FEED_POLL_SECS", 5u64)?),
            schedulers_enabled: var_or("SCHEDULERS_ENABLED", true)?,
            // Horários padrão no fuso de São Paulo
            branch_automation_at: schedule_from_env("BRANCH_AUTOMATION", "00:05", -3)?,
            membership_sync_at: schedule_from_env("MEMBERSHIP_SYNC", "00:30", -3)?,
            task_generation_at: schedule_from_env("TASK_GENERATION", "06:00", -3)?,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub jwt_secret: String,
    pub i18n_store: Arc<I18nStore>,
    pub config: AutomationConfig,

    pub tenants: TenantRepository,
    pub membership_admin: MembershipAdminService,
    pub enrollments: EnrollmentService,
    pub change_feed: ChangeFeedWorker,
    pub scheduler: Scheduler,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL deve ser definida")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET deve ser definido")?;
        let max_connections: u32 = var_or("DATABASE_MAX_CONNECTIONS", 10)?;
        let config = AutomationConfig::from_env()?;

        let db_pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        // --- Monta o gráfico de dependências ---
        let writer = BatchWriter::new(PgCommitter::new(db_pool.clone()), config.batch.clone());
        let tenants = TenantRepository::new(db_pool.clone());
        let settings = SettingsResolver::new(db_pool.clone(), SettingsRepository::new());

        let membership_admin = MembershipAdminService::new(
            db_pool.clone(),
            MembershipRepository::new(),
            FinanceRepository::new(),
            EnrollmentRepository::new(),
        );
        let reconciler = MembershipReconciler::new(
            db_pool.clone(),
            writer.clone(),
            MembershipRepository::new(),
            ClientRepository::new(),
            settings.clone(),
        );
        let tasks = TaskGenerator::new(
            db_pool.clone(),
            writer.clone(),
            tenants.clone(),
            ClientRepository::new(),
            MembershipRepository::new(),
            FinanceRepository::new(),
            TaskRepository::new(),
        );
        let branch_automation = BranchAutomationService::new(
            db_pool.clone(),
            writer.clone(),
            settings,
            tenants.clone(),
            ClientRepository::new(),
            MembershipRepository::new(),
            FinanceRepository::new(),
            AttendanceRepository::new(),
            SummaryRepository::new(),
            ChangeRepository::new(),
            membership_admin.clone(),
        );
        let runner = TenantRunner::new(tenants.clone(), reconciler, tasks, branch_automation);

        let enrollments = EnrollmentService::new(
            db_pool.clone(),
            writer,
            EnrollmentRepository::new(),
            ChangeRepository::new(),
        );
        let aggregator = SummaryAggregator::new(
            db_pool.clone(),
            SummaryRepository::new(),
            ChangeRepository::new(),
            ClientRepository::new(),
        );
        let change_feed = ChangeFeedWorker::new(
            db_pool.clone(),
            ChangeRepository::new(),
            aggregator,
            enrollments.clone(),
            config.change_feed_poll,
        );
        let scheduler = Scheduler::new(db_pool.clone(), runner, JobRunRepository::new(), config.job_timeout);

        Ok(Self {
            db_pool,
            jwt_secret,
            i18n_store: Arc::new(I18nStore::load()),
            config,
            tenants,
            membership_admin,
            enrollments,
            change_feed,
            scheduler,
        })
    }
}
