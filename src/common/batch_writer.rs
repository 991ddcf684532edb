// src/common/batch_writer.rs
//
// Gravação em lotes limitados: uma lista arbitrária de escritas é dividida em
// blocos de no máximo `max_ops_per_chunk`, cada bloco é uma transação, e os
// blocos são confirmados um após o outro. Uma falha permanente para no limite
// do bloco; os anteriores continuam aplicados.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::common::error::AppError;

// =========================================================================
//  CLASSIFICAÇÃO DE ERROS (SQLSTATE do Postgres)
// =========================================================================

pub struct PgErrorCode;

impl PgErrorCode {
    pub const UNIQUE_VIOLATION: &'static str = "23505";
    pub const SERIALIZATION_FAILURE: &'static str = "40001";
    pub const DEADLOCK_DETECTED: &'static str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &'static str = "55P03";
    // Classe 53: recursos insuficientes (disco, memória, conexões)
    pub const INSUFFICIENT_RESOURCES_CLASS: &'static str = "53";
    // Classe 08: exceções de conexão
    pub const CONNECTION_EXCEPTION_CLASS: &'static str = "08";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Contenção ou falta de recursos: o bloco inteiro é tentado de novo.
    Transient,
    /// "Já existe" em uma operação só-de-criação: conta como sucesso.
    AlreadyExists,
    Permanent,
}

pub fn classify_sqlstate(code: Option<&str>) -> FailureClass {
    match code {
        Some(PgErrorCode::UNIQUE_VIOLATION) => FailureClass::AlreadyExists,
        Some(PgErrorCode::SERIALIZATION_FAILURE)
        | Some(PgErrorCode::DEADLOCK_DETECTED)
        | Some(PgErrorCode::LOCK_NOT_AVAILABLE) => FailureClass::Transient,
        Some(code)
            if code.starts_with(PgErrorCode::INSUFFICIENT_RESOURCES_CLASS)
                || code.starts_with(PgErrorCode::CONNECTION_EXCEPTION_CLASS) =>
        {
            FailureClass::Transient
        }
        _ => FailureClass::Permanent,
    }
}

pub fn classify(error: &sqlx::Error) -> FailureClass {
    match error {
        sqlx::Error::Database(db_err) => classify_sqlstate(db_err.code().as_deref()),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

// =========================================================================
//  RESULTADOS
// =========================================================================

/// Resultado explícito de cada escrita.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum WriteOutcome {
    Applied,
    Created,
    AlreadyExists,
    // Condição de guarda não casou (a linha mudou desde a leitura): nada foi escrito
    Stale,
    Failed(String),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, WriteOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub outcomes: Vec<WriteOutcome>,
    pub chunks_committed: usize,
    pub retries: usize,
    // Operações que não chegaram a ser tentadas depois de um aborto
    pub skipped: usize,
    pub aborted: Option<String>,
}

impl BatchReport {
    pub fn committed_ops(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, WriteOutcome::Created))
    }

    pub fn already_existing(&self) -> usize {
        self.count(|o| matches!(o, WriteOutcome::AlreadyExists))
    }

    pub fn stale(&self) -> usize {
        self.count(|o| matches!(o, WriteOutcome::Stale))
    }

    fn count(&self, pred: impl Fn(&WriteOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    /// Converte um aborto em `AppError::BatchAborted` para ser propagado com `?`.
    pub fn ensure_complete(mut self) -> Result<Self, AppError> {
        let committed = self.committed_ops();
        match self.aborted.take() {
            Some(reason) => Err(AppError::BatchAborted { committed, reason }),
            None => Ok(self),
        }
    }
}

// =========================================================================
//  ESCRITOR
// =========================================================================

/// O "primitivo de commit": grava um bloco inteiro de forma atômica.
#[async_trait]
pub trait ChunkCommitter: Send + Sync {
    type Op: Send + Sync;

    async fn commit_chunk(&self, ops: &[Self::Op]) -> Result<Vec<WriteOutcome>, sqlx::Error>;
}

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub max_ops_per_chunk: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            max_ops_per_chunk: 450,
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
pub struct BatchWriter<C> {
    committer: C,
    config: BatchWriterConfig,
}

impl<C: ChunkCommitter> BatchWriter<C> {
    pub fn new(committer: C, config: BatchWriterConfig) -> Self {
        Self { committer, config }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.max_ops_per_chunk.max(1)
    }

    /// Confirma todas as operações, bloco a bloco, em sequência.
    pub async fn commit(&self, ops: Vec<C::Op>) -> BatchReport {
        let mut report = BatchReport::default();
        let chunk_size = self.chunk_size();
        let total = ops.len();

        for (index, chunk) in ops.chunks(chunk_size).enumerate() {
            match self.commit_with_retry(chunk, &mut report).await {
                Ok(outcomes) => {
                    report.outcomes.extend(outcomes);
                    report.chunks_committed += 1;
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::error!(
                        chunk = index,
                        committed = report.committed_ops(),
                        "❌ Bloco de escrita falhou de forma permanente: {}",
                        reason
                    );
                    report
                        .outcomes
                        .extend(chunk.iter().map(|_| WriteOutcome::Failed(reason.clone())));
                    report.skipped = total - (index * chunk_size + chunk.len());
                    report.aborted = Some(reason);
                    break;
                }
            }
        }

        report
    }

    async fn commit_with_retry(
        &self,
        chunk: &[C::Op],
        report: &mut BatchReport,
    ) -> Result<Vec<WriteOutcome>, sqlx::Error> {
        let mut attempt: u32 = 0;
        loop {
            match self.committer.commit_chunk(chunk).await {
                Ok(outcomes) => return Ok(outcomes),
                Err(e) if classify(&e) == FailureClass::Transient && attempt < self.config.max_retries => {
                    let delay = self.config.base_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    report.retries += 1;
                    tracing::warn!(attempt, "Erro transitório ao gravar bloco, tentando de novo: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Committer em memória: registra os blocos e falha conforme o roteiro
    #[derive(Default)]
    struct FakeCommitter {
        chunks: Mutex<Vec<Vec<u32>>>,
        // (número da chamada, erro a devolver)
        script: Mutex<Vec<(usize, fn() -> sqlx::Error)>>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ChunkCommitter for FakeCommitter {
        type Op = u32;

        async fn commit_chunk(&self, ops: &[u32]) -> Result<Vec<WriteOutcome>, sqlx::Error> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            let failure = self
                .script
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| *n == call)
                .map(|(_, make)| make());
            if let Some(err) = failure {
                return Err(err);
            }
            self.chunks.lock().unwrap().push(ops.to_vec());
            Ok(ops.iter().map(|_| WriteOutcome::Applied).collect())
        }
    }

    fn writer(committer: FakeCommitter, size: usize) -> BatchWriter<FakeCommitter> {
        BatchWriter::new(
            committer,
            BatchWriterConfig {
                max_ops_per_chunk: size,
                max_retries: 2,
                base_backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn splits_into_bounded_sequential_chunks() {
        let w = writer(FakeCommitter::default(), 3);
        let report = w.commit((1..=7).collect()).await;

        assert!(report.aborted.is_none());
        assert_eq!(report.chunks_committed, 3);
        assert_eq!(report.committed_ops(), 7);
        let chunks = w.committer.chunks.lock().unwrap().clone();
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[tokio::test]
    async fn empty_input_commits_nothing() {
        let w = writer(FakeCommitter::default(), 3);
        let report = w.commit(vec![]).await;
        assert_eq!(report.chunks_committed, 0);
        assert!(report.ensure_complete().is_ok());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let committer = FakeCommitter::default();
        committer.script.lock().unwrap().push((1, || sqlx::Error::PoolTimedOut));
        let w = writer(committer, 10);

        let report = w.commit(vec![1, 2]).await;
        assert!(report.aborted.is_none());
        assert_eq!(report.retries, 1);
        assert_eq!(report.committed_ops(), 2);
    }

    #[tokio::test]
    async fn permanent_error_stops_at_chunk_boundary() {
        let committer = FakeCommitter::default();
        committer.script.lock().unwrap().push((2, || sqlx::Error::RowNotFound));
        let w = writer(committer, 2);

        let report = w.commit(vec![1, 2, 3, 4, 5, 6]).await;
        assert_eq!(report.chunks_committed, 1);
        assert_eq!(report.committed_ops(), 2);
        assert_eq!(report.skipped, 2);
        assert!(report.aborted.is_some());
        // O primeiro bloco continua gravado
        assert_eq!(w.committer.chunks.lock().unwrap().clone(), vec![vec![1, 2]]);

        match report.ensure_complete() {
            Err(AppError::BatchAborted { committed, .. }) => assert_eq!(committed, 2),
            other => panic!("esperava BatchAborted, veio {:?}", other.map(|r| r.chunks_committed)),
        }
    }

    #[tokio::test]
    async fn aborted_report_keeps_reason_and_committed_count() {
        let committer = FakeCommitter::default();
        committer.script.lock().unwrap().push((3, || sqlx::Error::RowNotFound));
        let w = writer(committer, 1);

        let report = w.commit(vec![1, 2, 3]).await;
        let reason = report.aborted.clone().unwrap();
        match report.ensure_complete() {
            Err(AppError::BatchAborted { committed, reason: r }) => {
                assert_eq!(committed, 2);
                assert_eq!(r, reason);
            }
            other => panic!("esperava BatchAborted, veio {:?}", other.map(|r| r.chunks_committed)),
        }
    }

    #[test]
    fn stale_outcomes_count_as_success() {
        let report = BatchReport {
            outcomes: vec![WriteOutcome::Applied, WriteOutcome::Stale, WriteOutcome::Failed("x".into())],
            ..Default::default()
        };
        assert_eq!(report.committed_ops(), 2);
        assert_eq!(report.stale(), 1);
        let complete = report.ensure_complete().unwrap();
        assert_eq!(complete.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let committer = FakeCommitter::default();
        {
            let mut script = committer.script.lock().unwrap();
            for call in 1..=3 {
                script.push((call, || sqlx::Error::PoolTimedOut));
            }
        }
        let w = writer(committer, 10);
        let report = w.commit(vec![1]).await;
        assert_eq!(report.retries, 2);
        assert!(report.aborted.is_some());
    }

    #[test]
    fn sqlstate_classification() {
        assert_eq!(classify_sqlstate(Some("40001")), FailureClass::Transient);
        assert_eq!(classify_sqlstate(Some("40P01")), FailureClass::Transient);
        assert_eq!(classify_sqlstate(Some("53300")), FailureClass::Transient);
        assert_eq!(classify_sqlstate(Some("08006")), FailureClass::Transient);
        assert_eq!(classify_sqlstate(Some("23505")), FailureClass::AlreadyExists);
        assert_eq!(classify_sqlstate(Some("23503")), FailureClass::Permanent);
        assert_eq!(classify_sqlstate(None), FailureClass::Permanent);
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), FailureClass::Transient);
        assert_eq!(classify(&sqlx::Error::RowNotFound), FailureClass::Permanent);
    }
}
