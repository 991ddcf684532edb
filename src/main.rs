//src/main.rs

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

mod common;
mod config;
mod db;
mod docs;
mod handlers;
mod middleware;
mod models;
mod services;

use crate::config::AppState;
use crate::docs::ApiDoc;
use crate::middleware::{auth::auth_guard, tenancy::tenant_guard};
use crate::services::scheduler::Job;

fn spawn_background_workers(app_state: &AppState) {
    // Feed de alterações: sempre ativo (resumos e contagens em tempo real)
    tokio::spawn(app_state.change_feed.clone().run());

    if !app_state.config.schedulers_enabled {
        tracing::warn!("Agendamentos desativados (SCHEDULERS_ENABLED=false)");
        return;
    }

    let schedules = [
        (Job::BranchAutomation, app_state.config.branch_automation_at),
        (Job::MembershipSync, app_state.config.membership_sync_at),
        (Job::TaskGeneration, app_state.config.task_generation_at),
    ];
    for (job, schedule) in schedules {
        tracing::info!(job = job.name(), at = %schedule.at, offset = %schedule.utc_offset, "⏰ Agendamento registrado");
        tokio::spawn(app_state.scheduler.clone().run_forever(job, schedule));
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Falha ao escutar o sinal de encerramento: {}", e);
    }
    tracing::info!("Encerrando o servidor...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .with_target(false)
        .compact()
        .init();

    // Se a configuração falhar, a aplicação não deve iniciar
    let app_state = AppState::new().await?;

    sqlx::migrate!().run(&app_state.db_pool).await?;
    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    spawn_background_workers(&app_state);

    // Execução manual: apenas token (o escopo de tenants vem das claims)
    let automation_routes = Router::new()
        .route("/tasks/run", post(handlers::automation::run_tasks))
        .route("/memberships/run", post(handlers::automation::run_membership_sync))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), auth_guard));

    // Operações sobre contratos: token + X-Tenant-ID (o auth_guard roda primeiro)
    let membership_routes = Router::new()
        .route("/{id}/suspend", post(handlers::memberships::suspend_membership))
        .route("/{id}/cancel", post(handlers::memberships::cancel_membership))
        .route("/{id}/adjust-days", post(handlers::memberships::adjust_membership_days))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), tenant_guard))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), auth_guard));

    let enrollment_routes = Router::new()
        .route("/recount", post(handlers::enrollments::recount_enrollments))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), tenant_guard))
        .layer(axum_middleware::from_fn_with_state(app_state.clone(), auth_guard));

    // Combina tudo no router principal
    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/automation", automation_routes)
        .nest("/api/memberships", membership_routes)
        .nest("/api/enrollments", enrollment_routes)
        .with_state(app_state);

    // Inicia o servidor
    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
