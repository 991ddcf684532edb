// src/db/write_ops.rs
//
// As escritas pontuais que a automação emite. Cada uma sabe se executar dentro
// da transação do bloco; o `PgCommitter` é o primitivo de commit do BatchWriter.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    common::batch_writer::{classify, ChunkCommitter, FailureClass, WriteOutcome},
    models::{
        client::ClientStatus,
        membership::{Activation, MembershipStatus},
        task::NewTask,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    // Término (ou pendente vencido) sem renovação
    ExpireMembership { id: Uuid },
    // Trancamento agendado que começou
    PauseMembership { id: Uuid },
    // Volta a ativo limpando os campos do trancamento
    ResumeMembership { id: Uuid },
    RescheduleMembership { id: Uuid, start_at: NaiveDate, end_at: NaiveDate },
    ActivateMembership(Activation),
    SetClientStatus { id: Uuid, status: ClientStatus },
    SetAbandonmentRisk { id: Uuid, at_risk: bool },
    SetClassEnrolledCount { class_id: Uuid, count: i64 },
    SetSessionEnrolledCount { session_id: Uuid, count: i64 },
    AdjustSessionEnrolledCount { session_id: Uuid, delta: i64 },
    MarkReceivableOverdue { id: Uuid },
    CloseCashierSession { id: Uuid },
    // Só-de-criação: "já existe" é sucesso
    CreateTask(NewTask),
}

impl WriteOp {
    /// Estados de origem aceitos por uma transição de contrato. Fora deles a
    /// escrita não casa e vira `WriteOutcome::Stale` (ex.: contrato cancelado
    /// depois da leitura que gerou o plano).
    pub fn expected_membership_statuses(&self) -> &'static [MembershipStatus] {
        use MembershipStatus::*;
        match self {
            WriteOp::ExpireMembership { .. } => &[Pending, Active, Paused],
            WriteOp::PauseMembership { .. } => &[Active],
            WriteOp::ResumeMembership { .. } => &[Paused],
            WriteOp::RescheduleMembership { .. } | WriteOp::ActivateMembership(_) => &[Pending],
            _ => &[],
        }
    }

    pub fn applies_to(&self, current: MembershipStatus) -> bool {
        self.expected_membership_statuses().contains(&current)
    }

    pub async fn execute(&self, conn: &mut PgConnection) -> Result<WriteOutcome, sqlx::Error> {
        let expected = self.expected_membership_statuses();

        match self {
            WriteOp::ExpireMembership { id } => {
                let result = sqlx::query(
                    "UPDATE memberships SET status = 'expired', updated_at = NOW() WHERE id = $1 AND status = ANY($2)",
                )
                .bind(id)
                .bind(expected)
                .execute(&mut *conn)
                .await?;
                return Ok(guarded(result.rows_affected()));
            }
            WriteOp::PauseMembership { id } => {
                let result = sqlx::query(
                    "UPDATE memberships SET status = 'paused', updated_at = NOW() WHERE id = $1 AND status = ANY($2)",
                )
                .bind(id)
                .bind(expected)
                .execute(&mut *conn)
                .await?;
                return Ok(guarded(result.rows_affected()));
            }
            WriteOp::ResumeMembership { id } => {
                let result = sqlx::query(
                    r#"
                    UPDATE memberships
                    SET status = 'active', pause_started_at = NULL, pause_until = NULL, updated_at = NOW()
                    WHERE id = $1 AND status = ANY($2)
                    "#,
                )
                .bind(id)
                .bind(expected)
                .execute(&mut *conn)
                .await?;
                return Ok(guarded(result.rows_affected()));
            }
            WriteOp::RescheduleMembership { id, start_at, end_at } => {
                let result = sqlx::query(
                    "UPDATE memberships SET start_at = $2, end_at = $3, updated_at = NOW() WHERE id = $1 AND status = ANY($4)",
                )
                .bind(id)
                .bind(start_at)
                .bind(end_at)
                .bind(expected)
                .execute(&mut *conn)
                .await?;
                return Ok(guarded(result.rows_affected()));
            }
            WriteOp::ActivateMembership(a) => {
                let result = sqlx::query(
                    "UPDATE memberships SET status = 'active', updated_at = NOW() WHERE id = $1 AND status = ANY($2)",
                )
                .bind(a.membership_id)
                .bind(expected)
                .execute(&mut *conn)
                .await?;

                // Contrato não está mais pendente: o aluno fica como está
                if result.rows_affected() == 0 {
                    return Ok(WriteOutcome::Stale);
                }

                sqlx::query(
                    r#"
                    UPDATE clients
                    SET status = 'active',
                        active_membership_id = $2,
                        allow_cross_branch_access = $3,
                        allowed_branch_ids = $4,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(a.client_id)
                .bind(a.membership_id)
                .bind(a.allow_cross_branch_access)
                .bind(&a.allowed_branch_ids)
                .execute(&mut *conn)
                .await?;
            }
            WriteOp::SetClientStatus { id, status } => {
                sqlx::query("UPDATE clients SET status = $2, updated_at = NOW() WHERE id = $1")
                    .bind(id)
                    .bind(status)
                    .execute(&mut *conn)
                    .await?;
            }
            WriteOp::SetAbandonmentRisk { id, at_risk } => {
                sqlx::query("UPDATE clients SET abandonment_risk = $2, updated_at = NOW() WHERE id = $1")
                    .bind(id)
                    .bind(at_risk)
                    .execute(&mut *conn)
                    .await?;
            }
            WriteOp::SetClassEnrolledCount { class_id, count } => {
                sqlx::query("UPDATE classes SET enrolled_count = $2 WHERE id = $1")
                    .bind(class_id)
                    .bind(count)
                    .execute(&mut *conn)
                    .await?;
            }
            WriteOp::SetSessionEnrolledCount { session_id, count } => {
                sqlx::query("UPDATE class_sessions SET enrolled_count = $2 WHERE id = $1")
                    .bind(session_id)
                    .bind(count)
                    .execute(&mut *conn)
                    .await?;
            }
            WriteOp::AdjustSessionEnrolledCount { session_id, delta } => {
                sqlx::query(
                    "UPDATE class_sessions SET enrolled_count = GREATEST(enrolled_count + $2, 0) WHERE id = $1",
                )
                .bind(session_id)
                .bind(delta)
                .execute(&mut *conn)
                .await?;
            }
            WriteOp::MarkReceivableOverdue { id } => {
                sqlx::query("UPDATE receivables SET status = 'overdue' WHERE id = $1 AND status = 'pending'")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
            WriteOp::CloseCashierSession { id } => {
                sqlx::query(
                    r#"
                    UPDATE cashier_sessions
                    SET status = 'closed', closed_at = NOW(), closed_automatically = TRUE
                    WHERE id = $1 AND status = 'open'
                    "#,
                )
                .bind(id)
                .execute(&mut *conn)
                .await?;
            }
            WriteOp::CreateTask(task) => return create_task(conn, task).await,
        }
        Ok(WriteOutcome::Applied)
    }
}

fn guarded(rows_affected: u64) -> WriteOutcome {
    if rows_affected == 0 {
        WriteOutcome::Stale
    } else {
        WriteOutcome::Applied
    }
}

// Inserção dentro de um SAVEPOINT: uma violação de unicidade não derruba o bloco.
async fn create_task(conn: &mut PgConnection, task: &NewTask) -> Result<WriteOutcome, sqlx::Error> {
    let mut savepoint = conn.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO tasks (
            tenant_id, branch_id, id, kind, date_key, title, description,
            source_id, client_id, assigned_staff_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(task.tenant_id)
    .bind(task.branch_id)
    .bind(&task.id)
    .bind(task.kind)
    .bind(task.date_key)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.source_id)
    .bind(task.client_id)
    .bind(task.assigned_staff_id)
    .execute(&mut *savepoint)
    .await;

    match inserted {
        Ok(_) => {
            savepoint.commit().await?;
            Ok(WriteOutcome::Created)
        }
        Err(e) if classify(&e) == FailureClass::AlreadyExists => {
            savepoint.rollback().await?;
            Ok(WriteOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

#[derive(Clone)]
pub struct PgCommitter {
    pool: PgPool,
}

impl PgCommitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkCommitter for PgCommitter {
    type Op = WriteOp;

    async fn commit_chunk(&self, ops: &[WriteOp]) -> Result<Vec<WriteOutcome>, sqlx::Error> {
        // Um bloco = uma transação. Se qualquer escrita falhar, o drop do `tx` faz rollback.
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(ops.len());

        for op in ops {
            outcomes.push(op.execute(&mut *tx).await?);
        }

        tx.commit().await?;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MembershipStatus; 5] = [
        MembershipStatus::Pending,
        MembershipStatus::Active,
        MembershipStatus::Paused,
        MembershipStatus::Expired,
        MembershipStatus::Canceled,
    ];

    fn activation() -> Activation {
        Activation {
            membership_id: Uuid::from_u128(1),
            client_id: Uuid::from_u128(2),
            branch_id: Uuid::from_u128(3),
            allow_cross_branch_access: false,
            allowed_branch_ids: vec![],
        }
    }

    fn lifecycle_ops() -> Vec<WriteOp> {
        let id = Uuid::from_u128(1);
        let day = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();
        vec![
            WriteOp::ExpireMembership { id },
            WriteOp::PauseMembership { id },
            WriteOp::ResumeMembership { id },
            WriteOp::RescheduleMembership { id, start_at: day, end_at: day },
            WriteOp::ActivateMembership(activation()),
        ]
    }

    #[test]
    fn canceled_membership_is_never_overwritten() {
        for op in lifecycle_ops() {
            assert!(!op.applies_to(MembershipStatus::Canceled), "{:?} sobrescreveria um cancelamento", op);
            assert!(!op.applies_to(MembershipStatus::Expired), "{:?} reabriria um contrato expirado", op);
        }
    }

    #[test]
    fn each_transition_starts_from_its_own_status() {
        let id = Uuid::from_u128(1);
        let accepted = |op: WriteOp| ALL.into_iter().filter(|s| op.applies_to(*s)).collect::<Vec<_>>();

        assert_eq!(accepted(WriteOp::PauseMembership { id }), vec![MembershipStatus::Active]);
        assert_eq!(accepted(WriteOp::ResumeMembership { id }), vec![MembershipStatus::Paused]);
        assert_eq!(accepted(WriteOp::ActivateMembership(activation())), vec![MembershipStatus::Pending]);
        assert_eq!(
            accepted(WriteOp::ExpireMembership { id }),
            vec![MembershipStatus::Pending, MembershipStatus::Active, MembershipStatus::Paused]
        );
    }

    #[test]
    fn non_membership_writes_carry_no_guard() {
        let op = WriteOp::SetClientStatus { id: Uuid::from_u128(3), status: ClientStatus::Inactive };
        assert!(op.expected_membership_statuses().is_empty());
    }

    #[test]
    fn unmatched_guard_is_reported_as_stale() {
        assert_eq!(guarded(0), WriteOutcome::Stale);
        assert_eq!(guarded(1), WriteOutcome::Applied);
    }
}
