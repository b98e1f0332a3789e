// service/testing.rs
//! Store-backed helpers for service tests. `#[sqlx::test]` provisions a
//! fresh database from DATABASE_URL and applies ./migrations to it.
use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::{types::BigDecimal, PgPool};
use uuid::Uuid;

use crate::{
    db::db::DBClient,
    models::{
        amendmentmodel::{CHANGE_REQUEST_EXPIRY_HOURS, EXTENSION_REQUEST_EXPIRY_HOURS},
        contractmodel::ContractStatus,
        usermodel::{AuthUser, UserRole},
    },
    service::{
        amendment_service::{AmendmentContext, AmendmentWindows},
        audit_service::AuditService,
        commission_service::CommissionPolicy,
        event_bus::EventBus,
        notification_service::NotificationService,
    },
};

pub fn context(pool: &PgPool) -> AmendmentContext {
    let db_client = Arc::new(DBClient::new(pool.clone()));
    let event_bus = Arc::new(EventBus::new());
    AmendmentContext {
        policy: CommissionPolicy::default(),
        windows: AmendmentWindows {
            change_request: Duration::hours(CHANGE_REQUEST_EXPIRY_HOURS),
            extension: Duration::hours(EXTENSION_REQUEST_EXPIRY_HOURS),
        },
        notification_service: Arc::new(NotificationService::new(db_client.clone(), event_bus)),
        audit_service: Arc::new(AuditService::new(db_client.clone())),
        db_client,
    }
}

pub fn user(id: Uuid) -> AuthUser {
    AuthUser {
        id,
        role: UserRole::User,
        email: Some("client@example.com".to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SeededContract {
    pub id: Uuid,
    pub client_id: Uuid,
    pub doer_id: Uuid,
    pub job_id: Uuid,
}

pub async fn seed_contract(pool: &PgPool, status: ContractStatus) -> SeededContract {
    let client_id = Uuid::new_v4();
    let doer_id = Uuid::new_v4();
    let job_id: Uuid = sqlx::query_scalar("INSERT INTO jobs (client_id, title) VALUES ($1, 'Paint two bedrooms') RETURNING id")
        .bind(client_id)
        .fetch_one(pool)
        .await
        .unwrap();

    let start = Utc::now() + Duration::days(1);
    let end = start + Duration::days(10);
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO contracts
        (client_id, doer_id, job_id, price, commission, status, start_date, end_date, original_end_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING id
        "#,
    )
    .bind(client_id)
    .bind(doer_id)
    .bind(job_id)
    .bind(BigDecimal::from(20_000))
    .bind(BigDecimal::from(1_600))
    .bind(status)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await
    .unwrap();

    SeededContract {
        id,
        client_id,
        doer_id,
        job_id,
    }
}

pub async fn seed_tasks(pool: &PgPool, contract_id: Uuid, titles: &[&str]) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for title in titles {
        let id: Uuid = sqlx::query_scalar("INSERT INTO contract_tasks (contract_id, title) VALUES ($1, $2) RETURNING id")
            .bind(contract_id)
            .bind(*title)
            .fetch_one(pool)
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

pub async fn count_rows(pool: &PgPool, table: &str, contract_id: Uuid) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE contract_id = $1", table))
        .bind(contract_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Status and pending marker as stored, bypassing every cache.
pub async fn stored_contract(pool: &PgPool, contract_id: Uuid) -> (ContractStatus, Option<Uuid>, bool) {
    sqlx::query_as("SELECT status, active_amendment_id, has_pending_task_claim FROM contracts WHERE id = $1")
        .bind(contract_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
