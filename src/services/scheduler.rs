// src/services/scheduler.rs
//
// Agendamento diário dos três trabalhos. Cada disparo (agendado ou manual)
// pega um advisory lock de sessão no Postgres, roda sob um tempo máximo e fica
// registrado em `job_runs`. Agendado sobreposto pula; manual recebe 409.

use std::{future::Future, time::Duration};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::Serialize;
use sqlx::{pool::PoolConnection, PgPool, Postgres};

use crate::{
    common::{dates::today_utc, error::AppError},
    db::JobRunRepository,
    models::automation::{ReconcileReport, RunRequest, RunSummary, TenantTaskReport},
    services::tenant_runner::{
        TenantRunner, JOB_BRANCH_AUTOMATION, JOB_MEMBERSHIP_SYNC, JOB_TASK_GENERATION,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    BranchAutomation,
    MembershipSync,
    TaskGeneration,
}

impl Job {
    pub fn name(self) -> &'static str {
        match self {
            Job::BranchAutomation => JOB_BRANCH_AUTOMATION,
            Job::MembershipSync => JOB_MEMBERSHIP_SYNC,
            Job::TaskGeneration => JOB_TASK_GENERATION,
        }
    }

    /// Chave do advisory lock (fixa por trabalho).
    pub fn lock_key(self) -> i64 {
        match self {
            Job::BranchAutomation => 7_300_001,
            Job::MembershipSync => 7_300_002,
            Job::TaskGeneration => 7_300_003,
        }
    }
}

/// Horário diário em um fuso fixo (ex: 00:05 em UTC-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub at: NaiveTime,
    pub utc_offset: FixedOffset,
}

impl JobSchedule {
    /// Próximo disparo estritamente depois de `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.utc_offset);
        let mut candidate = local.date_naive().and_time(self.at);
        if candidate <= local.naive_local() {
            candidate += TimeDelta::days(1);
        }
        let offset = TimeDelta::seconds(self.utc_offset.local_minus_utc() as i64);
        (candidate - offset).and_utc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Skipped => "skipped",
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    pool: PgPool,
    runner: TenantRunner,
    job_runs: JobRunRepository,
    timeout: Duration,
}

impl Scheduler {
    pub fn new(pool: PgPool, runner: TenantRunner, job_runs: JobRunRepository, timeout: Duration) -> Self {
        Self { pool, runner, job_runs, timeout }
    }

    /// Laço infinito de um trabalho: dorme até o próximo horário e dispara.
    pub async fn run_forever(self, job: Job, schedule: JobSchedule) {
        loop {
            let now = Utc::now();
            let next = schedule.next_fire_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!(job = job.name(), next = %next, "Próxima execução agendada");
            tokio::time::sleep(wait).await;

            let status = self.run_guarded(job).await;
            tracing::info!(job = job.name(), status = status.as_str(), "Execução agendada finalizada");
        }
    }

    /// Uma execução agendada: o resultado vira um `RunStatus` para o log.
    pub async fn run_guarded(&self, job: Job) -> RunStatus {
        let today = today_utc();
        let request = RunRequest::default();
        let result = match job {
            Job::BranchAutomation => self
                .run_exclusive(job, self.runner.run_branch_automation(today))
                .await
                .map(drop),
            Job::MembershipSync => self
                .run_exclusive(job, self.runner.run_membership_sync(today, &request))
                .await
                .map(drop),
            Job::TaskGeneration => self
                .run_exclusive(job, self.runner.run_tasks(today, &request))
                .await
                .map(drop),
        };
        if let Err(AppError::JobAlreadyRunning(_)) = result {
            tracing::warn!(job = job.name(), "Execução anterior ainda em andamento, pulando");
        }
        run_status(&result)
    }

    /// Execução manual da geração de tarefas. A prévia só lê e dispensa o lock.
    pub async fn run_tasks_now(
        &self,
        date: NaiveDate,
        request: &RunRequest,
    ) -> Result<RunSummary<TenantTaskReport>, AppError> {
        if !needs_lock(request) {
            return self.runner.run_tasks(date, request).await;
        }
        self.run_exclusive(Job::TaskGeneration, self.runner.run_tasks(date, request)).await
    }

    pub async fn run_membership_sync_now(
        &self,
        date: NaiveDate,
        request: &RunRequest,
    ) -> Result<RunSummary<ReconcileReport>, AppError> {
        if !needs_lock(request) {
            return self.runner.run_membership_sync(date, request).await;
        }
        self.run_exclusive(Job::MembershipSync, self.runner.run_membership_sync(date, request))
            .await
    }

    /// Roda `work` segurando o advisory lock do trabalho, sob o tempo máximo,
    /// com registro em `job_runs`. Lock ocupado = `AppError::JobAlreadyRunning`.
    pub async fn run_exclusive<T, F>(&self, job: Job, work: F) -> Result<T, AppError>
    where
        T: Serialize,
        F: Future<Output = Result<T, AppError>>,
    {
        let mut conn = self.pool.acquire().await.inspect_err(|e| {
            tracing::error!(job = job.name(), "Sem conexão para o lock do trabalho: {}", e);
        })?;

        if !try_lock(&mut conn, job).await? {
            return Err(AppError::JobAlreadyRunning(job.name()));
        }

        let result = self.run_recorded(job, work).await;

        if let Err(e) = unlock(&mut conn, job).await {
            // Sessão descartada: o Postgres libera o lock ao fechar a conexão
            tracing::error!(job = job.name(), "Falha ao liberar lock, descartando conexão: {}", e);
            drop(conn.detach());
        }
        result
    }

    async fn run_recorded<T, F>(&self, job: Job, work: F) -> Result<T, AppError>
    where
        T: Serialize,
        F: Future<Output = Result<T, AppError>>,
    {
        let run_id = match self.job_runs.start(&self.pool, job.name(), Utc::now()).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(job = job.name(), "Não foi possível registrar a execução: {}", e);
                None
            }
        };

        let result = tokio::time::timeout(self.timeout, work)
            .await
            .unwrap_or(Err(AppError::JobTimedOut(job.name())));

        let summary = match &result {
            Ok(value) => serde_json::to_value(value).ok(),
            Err(AppError::JobTimedOut(_)) => {
                tracing::error!(job = job.name(), timeout_secs = self.timeout.as_secs(), "❌ Trabalho abandonado por tempo");
                None
            }
            Err(e) => {
                tracing::error!(job = job.name(), "❌ Trabalho falhou: {}", e);
                Some(serde_json::json!({ "error": e.to_string() }))
            }
        };

        if let Some(run_id) = run_id {
            let status = run_status(&result);
            if let Err(e) = self.job_runs.finish(&self.pool, run_id, status.as_str(), summary).await {
                tracing::warn!(job = job.name(), "Não foi possível concluir o registro da execução: {}", e);
            }
        }
        result
    }
}

/// Só execuções que gravam disputam o lock com o agendamento.
pub fn needs_lock(request: &RunRequest) -> bool {
    !request.dry_run
}

pub fn run_status<T>(result: &Result<T, AppError>) -> RunStatus {
    match result {
        Ok(_) => RunStatus::Succeeded,
        Err(AppError::JobAlreadyRunning(_)) => RunStatus::Skipped,
        Err(AppError::JobTimedOut(_)) => RunStatus::TimedOut,
        Err(_) => RunStatus::Failed,
    }
}

async fn try_lock(conn: &mut PoolConnection<Postgres>, job: Job) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
        .bind(job.lock_key())
        .fetch_one(&mut **conn)
        .await
}

async fn unlock(conn: &mut PoolConnection<Postgres>, job: Job) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
        .bind(job.lock_key())
        .fetch_one(&mut **conn)
        .await
}
