// src/db/supportdb.rs
use async_trait::async_trait;
use sqlx::{Error, Postgres, Transaction};

use super::db::DBClient;
use crate::models::supportmodel::*;

#[async_trait]
pub trait SupportExt {
    /// Opens a ticket inside the caller's transaction. A ticket for the same
    /// source amendment already existing yields None.
    async fn create_support_ticket(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ticket: &NewSupportTicket,
    ) -> Result<Option<SupportTicket>, Error>;
}

#[async_trait]
impl SupportExt for DBClient {
    async fn create_support_ticket(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ticket: &NewSupportTicket,
    ) -> Result<Option<SupportTicket>, Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            INSERT INTO support_tickets
            (user_id, contract_id, source_amendment_id, title, description, category, priority, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_amendment_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(ticket.user_id)
        .bind(ticket.contract_id)
        .bind(ticket.source_amendment_id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.category)
        .bind(ticket.priority)
        .bind(TicketStatus::Open)
        .fetch_optional(&mut **tx)
        .await
    }
}
