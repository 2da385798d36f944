//! Postgres implementation of every partner_hub_core port trait.
//!
//! One newtype over `PgPool` implements all five stores. All SQL is
//! runtime-checked (`sqlx::query`, not `sqlx::query!`) so building the crate
//! never needs a live database. Each compound port call runs in a single
//! transaction.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use partner_hub_core::assignment::{completion_percentage, AssignmentStatus, FulfillmentAssignment};
use partner_hub_core::commission::{transition_lines, CommissionEvent, CommissionLine, CommissionStatus};
use partner_hub_core::error::ProgramError;
use partner_hub_core::milestone::{self, Milestone, MilestoneProgress};
use partner_hub_core::partner::Partner;
use partner_hub_core::payout::{PayoutBatch, PayoutDraft};
use partner_hub_core::ports::{
    CatalogStore, FulfillmentStore, PartnerStore, PayoutStore, Result, SaleOutcome, SaleStore,
};
use partner_hub_core::sale::SaleTransaction;
use partner_hub_core::spiff::Spiff;
use partner_hub_core::tier_rates::Product;

use crate::sqlx_types::{
    to_json, PgAssignmentRow, PgBodyRow, PgLineRow, PgPartnerRow, PgPayoutRow, PgProductRow,
    PgProgressRow, PgSaleRow,
};

const MIGRATION: &str = include_str!("../migrations/0001_partner_hub.sql");

const ASSIGNMENT_COLUMNS: &str = "id, partner_id, product_ids, spiff_id, target_quantity, \
     target_revenue, actual_quantity, actual_revenue, completion_percentage, status, \
     start_date, end_date, notes, created_by, created_at, updated_at";

const PROGRESS_COLUMNS: &str = "id, partner_id, milestone_id, assignment_id, current_value, \
     percentage_complete, status, achieved_at, updated_at";

const SALE_COLUMNS: &str = "id, partner_id, product_id, assignment_id, quantity, unit_price, \
     total_amount, commission_rate, rate_source, commission_amount, spiff_bonus, \
     total_commission, spiff_awards, sale_date, customer_name, logged_by, created_at";

const LINE_COLUMNS: &str = "id, transaction_id, beneficiary_id, role, credit_percent, \
     commission_amount, spiff_bonus, total_commission, status, decided_by, rejection_reason, \
     payout_batch_id, paid_at, sale_date, created_at";

const PAYOUT_COLUMNS: &str = "id, beneficiary_ids, period_start, period_end, line_ids, \
     total_amount, adjustments, deductions, currency, exchange_rate, net_payout, status, \
     actual_amount, variance, reconciled_by, reconciled_at, created_by, created_at";

/// Unique violations become `Conflict`; everything else is `Internal`.
fn db(e: sqlx::Error) -> ProgramError {
    if let sqlx::Error::Database(d) = &e {
        if d.is_unique_violation() {
            return ProgramError::Conflict(d.message().to_string());
        }
    }
    ProgramError::Internal(anyhow!(e))
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = ProgramError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ── PgProgramStore ────────────────────────────────────────────

/// Postgres-backed program store.
#[derive(Clone)]
pub struct PgProgramStore {
    pool: PgPool,
}

impl PgProgramStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url` with at most `max_connections`.
    pub async fn connect(url: &str, max_connections: u32) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the `partner_hub` schema if it does not exist yet.
    pub async fn migrate(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        tracing::info!("partner_hub schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_line(conn: &mut PgConnection, line: &CommissionLine) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO partner_hub.commission_lines (
            id, transaction_id, beneficiary_id, role, credit_percent,
            commission_amount, spiff_bonus, total_commission, status,
            decided_by, rejection_reason, payout_batch_id, paid_at,
            sale_date, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(line.id)
    .bind(line.transaction_id)
    .bind(&line.beneficiary_id)
    .bind(&line.role)
    .bind(line.credit_percent.to_string())
    .bind(line.commission_amount.to_string())
    .bind(line.spiff_bonus.to_string())
    .bind(line.total_commission.to_string())
    .bind(line.status.as_str())
    .bind(&line.decided_by)
    .bind(&line.rejection_reason)
    .bind(line.payout_batch_id)
    .bind(line.paid_at)
    .bind(line.sale_date)
    .bind(line.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db)?;
    Ok(())
}

/// Lock and load every line of a transaction. An empty result means the
/// transaction does not exist: each recorded sale has at least one line.
async fn lock_lines(conn: &mut PgConnection, transaction_id: Uuid) -> Result<Vec<CommissionLine>> {
    let rows = sqlx::query_as::<_, PgLineRow>(&format!(
        "SELECT {LINE_COLUMNS} FROM partner_hub.commission_lines \
         WHERE transaction_id = $1 ORDER BY created_at, id FOR UPDATE"
    ))
    .bind(transaction_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db)?;
    if rows.is_empty() {
        return Err(ProgramError::not_found("transaction", transaction_id));
    }
    convert(rows)
}

// ── PartnerStore ──────────────────────────────────────────────

#[async_trait]
impl PartnerStore for PgProgramStore {
    async fn insert_partner(&self, partner: &Partner) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partner_hub.partners
                (id, company_name, status, tier, user_id, body, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(partner.id)
        .bind(&partner.company_name)
        .bind(partner.status.as_str())
        .bind(partner.tier.map(|t| t.as_str()))
        .bind(partner.user.as_ref().map(|u| u.user_id.as_str()))
        .bind(to_json(partner)?)
        .bind(partner.version)
        .bind(partner.created_at)
        .bind(partner.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn load_partner(&self, id: Uuid) -> Result<Option<Partner>> {
        let row = sqlx::query_as::<_, PgPartnerRow>(
            "SELECT body, version FROM partner_hub.partners WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(Partner::try_from).transpose()
    }

    async fn save_partner(&self, partner: &Partner) -> Result<i64> {
        let mut next = partner.clone();
        next.version = partner.version + 1;
        let result = sqlx::query(
            r#"
            UPDATE partner_hub.partners
            SET company_name = $3, status = $4, tier = $5, user_id = $6,
                body = $7, version = $8, updated_at = $9
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(partner.id)
        .bind(partner.version)
        .bind(&next.company_name)
        .bind(next.status.as_str())
        .bind(next.tier.map(|t| t.as_str()))
        .bind(next.user.as_ref().map(|u| u.user_id.as_str()))
        .bind(to_json(&next)?)
        .bind(next.version)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM partner_hub.partners WHERE id = $1)",
            )
            .bind(partner.id)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
            if !exists {
                return Err(ProgramError::not_found("partner", partner.id));
            }
            return Err(ProgramError::Conflict(format!(
                "partner {} was modified concurrently",
                partner.id
            )));
        }
        Ok(next.version)
    }
}

// ── CatalogStore ──────────────────────────────────────────────

#[async_trait]
impl CatalogStore for PgProgramStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partner_hub.products
                (id, name, base_commission_rate, tier_commissions, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.base_commission_rate.to_string())
        .bind(to_json(&product.tier_commissions)?)
        .bind(product.created_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn load_product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, PgProductRow>(
            r#"
            SELECT id, name, base_commission_rate, tier_commissions, created_at
            FROM partner_hub.products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(Product::try_from).transpose()
    }

    async fn insert_spiff(&self, spiff: &Spiff) -> Result<()> {
        let targets: Vec<Uuid> = spiff.target_products.iter().copied().collect();
        sqlx::query(
            r#"
            INSERT INTO partner_hub.spiffs
                (id, status, start_date, end_date, target_products, body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(spiff.id)
        .bind(spiff.status.as_str())
        .bind(spiff.start_date)
        .bind(spiff.end_date)
        .bind(&targets)
        .bind(to_json(spiff)?)
        .bind(spiff.created_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn load_spiff(&self, id: Uuid) -> Result<Option<Spiff>> {
        let row = sqlx::query_as::<_, PgBodyRow>("SELECT body FROM partner_hub.spiffs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(Spiff::try_from).transpose()
    }

    async fn active_spiffs_for_product(&self, product_id: Uuid) -> Result<Vec<Spiff>> {
        let rows = sqlx::query_as::<_, PgBodyRow>(
            r#"
            SELECT body FROM partner_hub.spiffs
            WHERE status = 'active' AND $1 = ANY(target_products)
            ORDER BY created_at
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        convert(rows)
    }
}

// ── FulfillmentStore ──────────────────────────────────────────

#[async_trait]
impl FulfillmentStore for PgProgramStore {
    async fn insert_assignment(&self, a: &FulfillmentAssignment) -> Result<()> {
        let product_ids: Vec<Uuid> = a.product_ids.iter().copied().collect();
        sqlx::query(&format!(
            "INSERT INTO partner_hub.assignments ({ASSIGNMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(a.id)
        .bind(a.partner_id)
        .bind(&product_ids)
        .bind(a.spiff_id)
        .bind(a.target_quantity.map(|d| d.to_string()))
        .bind(a.target_revenue.map(|d| d.to_string()))
        .bind(a.actual_quantity.to_string())
        .bind(a.actual_revenue.to_string())
        .bind(a.completion_percentage.to_string())
        .bind(a.status.as_str())
        .bind(a.start_date)
        .bind(a.end_date)
        .bind(&a.notes)
        .bind(&a.created_by)
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn load_assignment(&self, id: Uuid) -> Result<Option<FulfillmentAssignment>> {
        let row = sqlx::query_as::<_, PgAssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM partner_hub.assignments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(FulfillmentAssignment::try_from).transpose()
    }

    async fn set_assignment_status(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<FulfillmentAssignment> {
        let row = sqlx::query_as::<_, PgAssignmentRow>(&format!(
            "UPDATE partner_hub.assignments SET status = $2, updated_at = $3 \
             WHERE id = $1 RETURNING {ASSIGNMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or_else(|| ProgramError::not_found("assignment", id))?;
        FulfillmentAssignment::try_from(row)
    }

    async fn find_active_assignment(
        &self,
        partner_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<FulfillmentAssignment>> {
        let row = sqlx::query_as::<_, PgAssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM partner_hub.assignments \
             WHERE partner_id = $1 AND status = 'active' AND $2 = ANY(product_ids) \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(partner_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(FulfillmentAssignment::try_from).transpose()
    }

    async fn insert_milestone(&self, milestone: &Milestone) -> Result<()> {
        sqlx::query("INSERT INTO partner_hub.milestones (id, body, created_at) VALUES ($1, $2, $3)")
            .bind(milestone.id)
            .bind(to_json(milestone)?)
            .bind(milestone.created_at)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn list_milestones(&self) -> Result<Vec<Milestone>> {
        let rows = sqlx::query_as::<_, PgBodyRow>(
            "SELECT body FROM partner_hub.milestones ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        convert(rows)
    }

    async fn progress_for_assignment(&self, assignment_id: Uuid) -> Result<Vec<MilestoneProgress>> {
        let rows = sqlx::query_as::<_, PgProgressRow>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM partner_hub.milestone_progress \
             WHERE assignment_id = $1 ORDER BY milestone_id"
        ))
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        convert(rows)
    }
}

// ── SaleStore ─────────────────────────────────────────────────

#[async_trait]
impl SaleStore for PgProgramStore {
    async fn record_sale(
        &self,
        tx: &SaleTransaction,
        line: &CommissionLine,
        milestones: &[Milestone],
        now: DateTime<Utc>,
    ) -> Result<SaleOutcome> {
        let mut db_tx = self.pool.begin().await.map_err(db)?;

        // The increment happens in SQL so concurrent sales never lose an
        // update; the row lock it takes also serialises the progress upserts.
        let assignment = match tx.assignment_id {
            Some(id) => {
                let row = sqlx::query_as::<_, PgAssignmentRow>(&format!(
                    "UPDATE partner_hub.assignments \
                     SET actual_quantity = (actual_quantity::numeric + $2::numeric)::text, \
                         actual_revenue = (actual_revenue::numeric + $3::numeric)::text, \
                         updated_at = $4 \
                     WHERE id = $1 AND status = $5 RETURNING {ASSIGNMENT_COLUMNS}"
                ))
                .bind(id)
                .bind(Decimal::from(tx.quantity).to_string())
                .bind(tx.total_amount.to_string())
                .bind(now)
                .bind(AssignmentStatus::Active.as_str())
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(db)?
                .ok_or_else(|| {
                    ProgramError::validation(format!("assignment {id} is no longer active"))
                })?;

                let mut a = FulfillmentAssignment::try_from(row)?;
                a.completion_percentage = completion_percentage(
                    a.actual_quantity,
                    a.actual_revenue,
                    a.target_quantity,
                    a.target_revenue,
                );
                sqlx::query(
                    "UPDATE partner_hub.assignments SET completion_percentage = $2 WHERE id = $1",
                )
                .bind(a.id)
                .bind(a.completion_percentage.to_string())
                .execute(&mut *db_tx)
                .await
                .map_err(db)?;
                Some(a)
            }
            None => None,
        };

        let mut evaluated = Vec::new();
        if let Some(a) = &assignment {
            for m in milestones {
                let existing = sqlx::query_as::<_, PgProgressRow>(&format!(
                    "SELECT {PROGRESS_COLUMNS} FROM partner_hub.milestone_progress \
                     WHERE milestone_id = $1 AND assignment_id = $2 FOR UPDATE"
                ))
                .bind(m.id)
                .bind(a.id)
                .fetch_optional(&mut *db_tx)
                .await
                .map_err(db)?
                .map(MilestoneProgress::try_from)
                .transpose()?;

                let p = milestone::evaluate(m, a, existing.as_ref(), now);
                sqlx::query(
                    r#"
                    INSERT INTO partner_hub.milestone_progress (
                        id, partner_id, milestone_id, assignment_id, current_value,
                        percentage_complete, status, achieved_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (milestone_id, assignment_id) DO UPDATE
                    SET current_value = EXCLUDED.current_value,
                        percentage_complete = EXCLUDED.percentage_complete,
                        status = EXCLUDED.status,
                        achieved_at = COALESCE(milestone_progress.achieved_at, EXCLUDED.achieved_at),
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(p.id)
                .bind(p.partner_id)
                .bind(p.milestone_id)
                .bind(p.assignment_id)
                .bind(p.current_value.to_string())
                .bind(p.percentage_complete.to_string())
                .bind(p.status.as_str())
                .bind(p.achieved_at)
                .bind(p.updated_at)
                .execute(&mut *db_tx)
                .await
                .map_err(db)?;
                evaluated.push(p);
            }
        }

        let quantity = i32::try_from(tx.quantity)
            .map_err(|_| ProgramError::validation("quantity is too large"))?;
        sqlx::query(&format!(
            "INSERT INTO partner_hub.sales ({SALE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(tx.id)
        .bind(tx.partner_id)
        .bind(tx.product_id)
        .bind(tx.assignment_id)
        .bind(quantity)
        .bind(tx.unit_price.to_string())
        .bind(tx.total_amount.to_string())
        .bind(tx.commission_rate.to_string())
        .bind(tx.rate_source.as_str())
        .bind(tx.commission_amount.to_string())
        .bind(tx.spiff_bonus.to_string())
        .bind(tx.total_commission.to_string())
        .bind(to_json(&tx.spiff_awards)?)
        .bind(tx.sale_date)
        .bind(&tx.customer_name)
        .bind(&tx.logged_by)
        .bind(tx.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(db)?;

        insert_line(&mut db_tx, line).await?;
        db_tx.commit().await.map_err(db)?;

        Ok(SaleOutcome {
            assignment,
            milestones: evaluated,
        })
    }

    async fn load_sale(&self, id: Uuid) -> Result<Option<SaleTransaction>> {
        let row = sqlx::query_as::<_, PgSaleRow>(&format!(
            "SELECT {SALE_COLUMNS} FROM partner_hub.sales WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(SaleTransaction::try_from).transpose()
    }

    async fn load_lines(&self, transaction_id: Uuid) -> Result<Vec<CommissionLine>> {
        let rows = sqlx::query_as::<_, PgLineRow>(&format!(
            "SELECT {LINE_COLUMNS} FROM partner_hub.commission_lines \
             WHERE transaction_id = $1 ORDER BY created_at, id"
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        convert(rows)
    }

    async fn transition_commission(
        &self,
        transaction_id: Uuid,
        event: CommissionEvent,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Vec<CommissionLine>> {
        let mut db_tx = self.pool.begin().await.map_err(db)?;
        let mut lines = lock_lines(&mut db_tx, transaction_id).await?;
        transition_lines(&mut lines, event, actor, reason)?;

        for line in &lines {
            sqlx::query(
                r#"
                UPDATE partner_hub.commission_lines
                SET status = $2, decided_by = $3, rejection_reason = $4
                WHERE id = $1
                "#,
            )
            .bind(line.id)
            .bind(line.status.as_str())
            .bind(&line.decided_by)
            .bind(&line.rejection_reason)
            .execute(&mut *db_tx)
            .await
            .map_err(db)?;
        }
        db_tx.commit().await.map_err(db)?;
        Ok(lines)
    }

    async fn replace_commission_lines(
        &self,
        transaction_id: Uuid,
        lines: &[CommissionLine],
    ) -> Result<()> {
        let mut db_tx = self.pool.begin().await.map_err(db)?;
        let current = lock_lines(&mut db_tx, transaction_id).await?;
        if let Some(settled) = current.iter().find(|l| l.status != CommissionStatus::Pending) {
            return Err(ProgramError::transition(
                "commission",
                settled.status,
                "credit-split",
            ));
        }

        sqlx::query("DELETE FROM partner_hub.commission_lines WHERE transaction_id = $1")
            .bind(transaction_id)
            .execute(&mut *db_tx)
            .await
            .map_err(db)?;
        for line in lines {
            insert_line(&mut db_tx, line).await?;
        }
        db_tx.commit().await.map_err(db)?;
        Ok(())
    }
}

// ── PayoutStore ───────────────────────────────────────────────

#[async_trait]
impl PayoutStore for PgProgramStore {
    async fn settle_payout_batch(&self, draft: &PayoutDraft) -> Result<PayoutBatch> {
        let mut db_tx = self.pool.begin().await.map_err(db)?;
        let sel = &draft.selection;

        // FOR UPDATE re-checks the predicate after a competing batch commits,
        // so a line can never land in two batches.
        let rows = sqlx::query_as::<_, PgLineRow>(&format!(
            "SELECT {LINE_COLUMNS} FROM partner_hub.commission_lines \
             WHERE status = 'approved' AND payout_batch_id IS NULL \
               AND sale_date BETWEEN $1 AND $2 \
               AND beneficiary_id = ANY($3) \
             ORDER BY sale_date, id FOR UPDATE"
        ))
        .bind(sel.period_start)
        .bind(sel.period_end)
        .bind(&sel.beneficiary_ids)
        .fetch_all(&mut *db_tx)
        .await
        .map_err(db)?;
        let lines: Vec<CommissionLine> = convert::<_, CommissionLine>(rows)?
            .into_iter()
            .filter(|l| sel.selects(l))
            .collect();
        let batch = draft.finalize(&lines)?;

        sqlx::query(&format!(
            "INSERT INTO partner_hub.payout_batches ({PAYOUT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(batch.id)
        .bind(&batch.beneficiary_ids)
        .bind(batch.period_start)
        .bind(batch.period_end)
        .bind(&batch.line_ids)
        .bind(batch.total_amount.to_string())
        .bind(batch.adjustments.to_string())
        .bind(batch.deductions.to_string())
        .bind(&batch.currency)
        .bind(batch.exchange_rate.to_string())
        .bind(batch.net_payout.to_string())
        .bind(batch.status.as_str())
        .bind(batch.actual_amount.map(|d| d.to_string()))
        .bind(batch.variance.map(|d| d.to_string()))
        .bind(&batch.reconciled_by)
        .bind(batch.reconciled_at)
        .bind(&batch.created_by)
        .bind(batch.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(db)?;

        sqlx::query(
            r#"
            UPDATE partner_hub.commission_lines
            SET status = 'paid', payout_batch_id = $1, paid_at = $2
            WHERE id = ANY($3)
            "#,
        )
        .bind(batch.id)
        .bind(draft.created_at)
        .bind(&batch.line_ids)
        .execute(&mut *db_tx)
        .await
        .map_err(db)?;

        db_tx.commit().await.map_err(db)?;
        Ok(batch)
    }

    async fn load_payout_batch(&self, id: Uuid) -> Result<Option<PayoutBatch>> {
        let row = sqlx::query_as::<_, PgPayoutRow>(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM partner_hub.payout_batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(PayoutBatch::try_from).transpose()
    }

    async fn save_reconciliation(&self, batch: &PayoutBatch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE partner_hub.payout_batches
            SET status = $2, actual_amount = $3, variance = $4,
                reconciled_by = $5, reconciled_at = $6
            WHERE id = $1
            "#,
        )
        .bind(batch.id)
        .bind(batch.status.as_str())
        .bind(batch.actual_amount.map(|d| d.to_string()))
        .bind(batch.variance.map(|d| d.to_string()))
        .bind(&batch.reconciled_by)
        .bind(batch.reconciled_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(ProgramError::not_found("payout batch", batch.id));
        }
        Ok(())
    }
}
