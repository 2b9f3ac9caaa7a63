use crate::domain::client::{
    BehaviouralMemory, BehaviouralProfile, Client, TaxProfile, Vulnerability,
};
use crate::domain::event::{Classification, EventStatus, EventType, Finding, Narrative, RiskEvent};
use crate::domain::market::{MarketSnapshot, NewMarketSnapshot};
use crate::domain::portfolio::{Holding, Portfolio};
use crate::domain::records::{
    BriefPayload, DraftAction, DraftContent, DraftStatus, HeartbeatLog, MeetingBrief,
    NewHeartbeat, SweepKind,
};
use crate::storage::{EntityStore, InsertOutcome, NewBrief, NewDraft};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies the embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect DATABASE_URL failed")?;
        crate::storage::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

const CLIENT_COLUMNS: &str = "id, first_name, last_name, email, tax_profile, behavioural_profile, \
     vulnerability_score, vulnerability_category, vulnerability_notes, last_proactive_check, created_at";

type ClientRow = (
    Uuid,
    String,
    String,
    String,
    Json<TaxProfile>,
    Json<BehaviouralProfile>,
    f64,
    String,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn client_from_row(row: ClientRow) -> Client {
    let (
        id,
        first_name,
        last_name,
        email,
        tax_profile,
        behavioural_profile,
        score,
        category,
        notes,
        last_proactive_check,
        created_at,
    ) = row;
    Client {
        id,
        first_name,
        last_name,
        email,
        tax_profile: tax_profile.0,
        behavioural_profile: behavioural_profile.0,
        vulnerability: Vulnerability {
            score,
            category,
            notes,
        },
        last_proactive_check,
        created_at,
    }
}

const PORTFOLIO_COLUMNS: &str = "id, client_id, holdings, cash_balance, unrealized_gains, \
     target_risk_score, current_risk_score, updated_at";

type PortfolioRow = (
    Uuid,
    Uuid,
    Json<Vec<Holding>>,
    f64,
    f64,
    f64,
    f64,
    DateTime<Utc>,
);

fn portfolio_from_row(row: PortfolioRow) -> Portfolio {
    let (
        id,
        client_id,
        holdings,
        cash_balance,
        unrealized_gains,
        target_risk_score,
        current_risk_score,
        updated_at,
    ) = row;
    Portfolio {
        id,
        client_id,
        holdings: holdings.0,
        cash_balance,
        unrealized_gains,
        target_risk_score,
        current_risk_score,
        updated_at,
    }
}

type SnapshotRow = (Uuid, DateTime<Utc>, f64, f64, Json<BTreeMap<String, f64>>);

fn snapshot_from_row(row: SnapshotRow) -> MarketSnapshot {
    let (id, taken_at, ftse_100, ftse_250, sector_performance) = row;
    MarketSnapshot {
        id,
        taken_at,
        ftse_100,
        ftse_250,
        sector_performance: sector_performance.0,
    }
}

const EVENT_COLUMNS: &str =
    "id, client_id, event_type, urgency, classification, interpretation, status, created_at, resolved_at";

type EventRow = (
    Uuid,
    Option<Uuid>,
    String,
    String,
    Json<Classification>,
    Option<Json<Narrative>>,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn event_from_row(row: EventRow) -> anyhow::Result<RiskEvent> {
    let (
        id,
        client_id,
        event_type,
        urgency,
        classification,
        interpretation,
        status,
        created_at,
        resolved_at,
    ) = row;
    Ok(RiskEvent {
        id,
        client_id,
        event_type: event_type.parse()?,
        urgency: urgency.parse()?,
        classification: classification.0,
        interpretation: interpretation.map(|n| n.0),
        status: status.parse()?,
        created_at,
        resolved_at,
    })
}

fn events_from_rows(rows: Vec<EventRow>) -> anyhow::Result<Vec<RiskEvent>> {
    rows.into_iter().map(event_from_row).collect()
}

const DRAFT_COLUMNS: &str =
    "id, risk_event_id, client_id, action_type, subject, body, status, created_at";

type DraftRow = (
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    String,
    String,
    String,
    DateTime<Utc>,
);

fn draft_from_row(row: DraftRow) -> anyhow::Result<DraftAction> {
    let (id, risk_event_id, client_id, action_type, subject, body, status, created_at) = row;
    Ok(DraftAction {
        id,
        risk_event_id,
        client_id,
        action_type,
        content: DraftContent { subject, body },
        status: status.parse()?,
        created_at,
    })
}

fn drafts_from_rows(rows: Vec<DraftRow>) -> anyhow::Result<Vec<DraftAction>> {
    rows.into_iter().map(draft_from_row).collect()
}

type BriefRow = (Uuid, Uuid, DateTime<Utc>, Json<BriefPayload>, DateTime<Utc>);

fn brief_from_row(row: BriefRow) -> MeetingBrief {
    let (id, client_id, meeting_at, payload, created_at) = row;
    MeetingBrief {
        id,
        client_id,
        meeting_at,
        payload: payload.0,
        created_at,
    }
}

type MemoryRow = (Uuid, Uuid, String, String, DateTime<Utc>);

type HeartbeatRow = (Uuid, String, i32, i32, String, DateTime<Utc>);

fn heartbeat_from_row(row: HeartbeatRow) -> anyhow::Result<HeartbeatLog> {
    let (id, sweep_type, portfolios_scanned, findings_found, summary, created_at) = row;
    Ok(HeartbeatLog {
        id,
        sweep_type: sweep_type.parse()?,
        portfolios_scanned: u32::try_from(portfolios_scanned).unwrap_or(0),
        findings_found: u32::try_from(findings_found).unwrap_or(0),
        summary,
        created_at,
    })
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl EntityStore for PgStore {
    async fn list_clients(&self) -> anyhow::Result<Vec<Client>> {
        let rows: Vec<ClientRow> = sqlx::query_as(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("select clients failed")?;
        Ok(rows.into_iter().map(client_from_row).collect())
    }

    async fn get_client(&self, id: Uuid) -> anyhow::Result<Option<Client>> {
        let row: Option<ClientRow> =
            sqlx::query_as(&format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("select client failed (id={id})"))?;
        Ok(row.map(client_from_row))
    }

    async fn upsert_client(&self, client: &Client) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO clients (id, first_name, last_name, email, tax_profile, behavioural_profile, \
             vulnerability_score, vulnerability_category, vulnerability_notes, last_proactive_check, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
               first_name = EXCLUDED.first_name, \
               last_name = EXCLUDED.last_name, \
               email = EXCLUDED.email, \
               tax_profile = EXCLUDED.tax_profile, \
               behavioural_profile = EXCLUDED.behavioural_profile, \
               vulnerability_score = EXCLUDED.vulnerability_score, \
               vulnerability_category = EXCLUDED.vulnerability_category, \
               vulnerability_notes = EXCLUDED.vulnerability_notes, \
               last_proactive_check = EXCLUDED.last_proactive_check",
        )
        .bind(client.id)
        .bind(&client.first_name)
        .bind(&client.last_name)
        .bind(&client.email)
        .bind(Json(&client.tax_profile))
        .bind(Json(&client.behavioural_profile))
        .bind(client.vulnerability.score)
        .bind(&client.vulnerability.category)
        .bind(&client.vulnerability.notes)
        .bind(client.last_proactive_check)
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert client failed (id={})", client.id))?;
        Ok(())
    }

    async fn update_client_vulnerability(
        &self,
        id: Uuid,
        vulnerability: &Vulnerability,
        checked_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE clients SET vulnerability_score = $2, vulnerability_category = $3, \
             vulnerability_notes = $4, last_proactive_check = $5 WHERE id = $1",
        )
        .bind(id)
        .bind(vulnerability.score)
        .bind(&vulnerability.category)
        .bind(&vulnerability.notes)
        .bind(checked_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update client vulnerability failed (id={id})"))?;
        Ok(())
    }

    async fn get_portfolio(&self, client_id: Uuid) -> anyhow::Result<Option<Portfolio>> {
        let row: Option<PortfolioRow> = sqlx::query_as(&format!(
            "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select portfolio failed (client_id={client_id})"))?;
        Ok(row.map(portfolio_from_row))
    }

    async fn upsert_portfolio(&self, portfolio: &Portfolio) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO portfolios (id, client_id, holdings, cash_balance, unrealized_gains, \
             target_risk_score, current_risk_score, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (client_id) DO UPDATE SET \
               holdings = EXCLUDED.holdings, \
               cash_balance = EXCLUDED.cash_balance, \
               unrealized_gains = EXCLUDED.unrealized_gains, \
               target_risk_score = EXCLUDED.target_risk_score, \
               current_risk_score = EXCLUDED.current_risk_score, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(portfolio.id)
        .bind(portfolio.client_id)
        .bind(Json(&portfolio.holdings))
        .bind(portfolio.cash_balance)
        .bind(portfolio.unrealized_gains)
        .bind(portfolio.target_risk_score)
        .bind(portfolio.current_risk_score)
        .bind(portfolio.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert portfolio failed (client_id={})", portfolio.client_id))?;
        Ok(())
    }

    async fn latest_snapshot(&self) -> anyhow::Result<Option<MarketSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT id, taken_at, ftse_100, ftse_250, sector_performance \
             FROM market_snapshots ORDER BY taken_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("select latest market_snapshots failed")?;
        Ok(row.map(snapshot_from_row))
    }

    async fn insert_snapshot(
        &self,
        snapshot: &NewMarketSnapshot,
    ) -> anyhow::Result<MarketSnapshot> {
        let row: SnapshotRow = sqlx::query_as(
            "INSERT INTO market_snapshots (taken_at, ftse_100, ftse_250, sector_performance) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, taken_at, ftse_100, ftse_250, sector_performance",
        )
        .bind(snapshot.taken_at)
        .bind(snapshot.ftse_100)
        .bind(snapshot.ftse_250)
        .bind(Json(&snapshot.sector_performance))
        .fetch_one(&self.pool)
        .await
        .context("insert market_snapshots failed")?;
        Ok(snapshot_from_row(row))
    }

    async fn insert_open_event(&self, finding: &Finding) -> anyhow::Result<InsertOutcome> {
        let event_type = finding.event_type();
        let client_id = if event_type.is_book_wide() {
            None
        } else {
            finding.subject
        };

        let row: Option<EventRow> = sqlx::query_as(&format!(
            "INSERT INTO risk_events (client_id, subject_key, event_type, urgency, classification, status) \
             VALUES ($1, $2, $3, $4, $5, 'open') \
             ON CONFLICT (subject_key, event_type) WHERE status = 'open' DO NOTHING \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(client_id)
        .bind(finding.subject_key())
        .bind(event_type.as_str())
        .bind(finding.urgency.as_str())
        .bind(Json(&finding.classification))
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("insert risk_events failed (event_type={event_type})"))?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(event_from_row(row)?)),
            None => Ok(InsertOutcome::AlreadyOpen),
        }
    }

    async fn find_open_events(
        &self,
        client_id: Option<Uuid>,
        event_type: EventType,
    ) -> anyhow::Result<Vec<RiskEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM risk_events \
             WHERE status = 'open' AND subject_key = $1 AND event_type = $2"
        ))
        .bind(crate::domain::event::subject_key(event_type, client_id))
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("select open risk_events by subject failed")?;
        events_from_rows(rows)
    }

    async fn find_open_events_by_type(
        &self,
        event_type: EventType,
    ) -> anyhow::Result<Vec<RiskEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM risk_events \
             WHERE status = 'open' AND event_type = $1 ORDER BY created_at DESC"
        ))
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await
        .context("select open risk_events by type failed")?;
        events_from_rows(rows)
    }

    async fn list_open_events(&self) -> anyhow::Result<Vec<RiskEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM risk_events WHERE status = 'open' ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("select open risk_events failed")?;
        events_from_rows(rows)
    }

    async fn get_event(&self, id: Uuid) -> anyhow::Result<Option<RiskEvent>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM risk_events WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("select risk_event failed (id={id})"))?;
        row.map(event_from_row).transpose()
    }

    async fn update_event_interpretation(
        &self,
        id: Uuid,
        narrative: &Narrative,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE risk_events SET interpretation = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(narrative))
            .execute(&self.pool)
            .await
            .with_context(|| format!("update risk_event interpretation failed (id={id})"))?;
        Ok(())
    }

    async fn close_event(
        &self,
        id: Uuid,
        status: EventStatus,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RiskEvent>> {
        anyhow::ensure!(status.is_terminal(), "cannot close an event as {status}");
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "UPDATE risk_events SET status = $2, resolved_at = $3 \
             WHERE id = $1 AND status = 'open' RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("close risk_event failed (id={id})"))?;
        row.map(event_from_row).transpose()
    }

    async fn insert_draft(&self, draft: &NewDraft) -> anyhow::Result<DraftAction> {
        let row: DraftRow = sqlx::query_as(&format!(
            "INSERT INTO draft_actions (risk_event_id, client_id, action_type, subject, body, status) \
             VALUES ($1, $2, $3, $4, $5, 'pending') RETURNING {DRAFT_COLUMNS}"
        ))
        .bind(draft.risk_event_id)
        .bind(draft.client_id)
        .bind(&draft.action_type)
        .bind(&draft.content.subject)
        .bind(&draft.content.body)
        .fetch_one(&self.pool)
        .await
        .context("insert draft_actions failed")?;
        draft_from_row(row)
    }

    async fn get_draft(&self, id: Uuid) -> anyhow::Result<Option<DraftAction>> {
        let row: Option<DraftRow> =
            sqlx::query_as(&format!("SELECT {DRAFT_COLUMNS} FROM draft_actions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("select draft_action failed (id={id})"))?;
        row.map(draft_from_row).transpose()
    }

    async fn list_pending_drafts(&self) -> anyhow::Result<Vec<DraftAction>> {
        let rows: Vec<DraftRow> = sqlx::query_as(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_actions WHERE status = 'pending' ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("select pending draft_actions failed")?;
        drafts_from_rows(rows)
    }

    async fn find_pending_drafts_by_event(
        &self,
        event_id: Uuid,
    ) -> anyhow::Result<Vec<DraftAction>> {
        let rows: Vec<DraftRow> = sqlx::query_as(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_actions \
             WHERE status = 'pending' AND risk_event_id = $1 ORDER BY created_at DESC"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select draft_actions failed (risk_event_id={event_id})"))?;
        drafts_from_rows(rows)
    }

    async fn update_pending_draft(
        &self,
        id: Uuid,
        content: Option<&DraftContent>,
        status: DraftStatus,
    ) -> anyhow::Result<Option<DraftAction>> {
        let row: Option<DraftRow> = sqlx::query_as(&format!(
            "UPDATE draft_actions SET \
               subject = COALESCE($2, subject), \
               body = COALESCE($3, body), \
               status = $4 \
             WHERE id = $1 AND status = 'pending' RETURNING {DRAFT_COLUMNS}"
        ))
        .bind(id)
        .bind(content.map(|c| c.subject.as_str()))
        .bind(content.map(|c| c.body.as_str()))
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("update draft_action failed (id={id})"))?;
        row.map(draft_from_row).transpose()
    }

    async fn insert_brief(&self, brief: &NewBrief) -> anyhow::Result<MeetingBrief> {
        let row: BriefRow = sqlx::query_as(
            "INSERT INTO meeting_briefs (client_id, meeting_at, payload) VALUES ($1, $2, $3) \
             RETURNING id, client_id, meeting_at, payload, created_at",
        )
        .bind(brief.client_id)
        .bind(brief.meeting_at)
        .bind(Json(&brief.payload))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("insert meeting_briefs failed (client_id={})", brief.client_id))?;
        Ok(brief_from_row(row))
    }

    async fn recent_briefs(&self, limit: usize) -> anyhow::Result<Vec<MeetingBrief>> {
        let rows: Vec<BriefRow> = sqlx::query_as(
            "SELECT id, client_id, meeting_at, payload, created_at FROM meeting_briefs \
             ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .context("select recent meeting_briefs failed")?;
        Ok(rows.into_iter().map(brief_from_row).collect())
    }

    async fn briefs_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<MeetingBrief>> {
        let rows: Vec<BriefRow> = sqlx::query_as(
            "SELECT id, client_id, meeting_at, payload, created_at FROM meeting_briefs \
             WHERE created_at >= $1 ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("select meeting_briefs since failed")?;
        Ok(rows.into_iter().map(brief_from_row).collect())
    }

    async fn insert_memory(&self, memory: &BehaviouralMemory) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO behavioural_memory (id, client_id, content, source_reference, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(memory.id)
        .bind(memory.client_id)
        .bind(&memory.content)
        .bind(&memory.source_reference)
        .bind(memory.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert behavioural_memory failed (client_id={})", memory.client_id))?;
        Ok(())
    }

    async fn recent_memory(
        &self,
        client_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<BehaviouralMemory>> {
        let rows: Vec<MemoryRow> = sqlx::query_as(
            "SELECT id, client_id, content, source_reference, created_at FROM behavioural_memory \
             WHERE client_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(client_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select behavioural_memory failed (client_id={client_id})"))?;
        Ok(rows
            .into_iter()
            .map(
                |(id, client_id, content, source_reference, created_at)| BehaviouralMemory {
                    id,
                    client_id,
                    content,
                    source_reference,
                    created_at,
                },
            )
            .collect())
    }

    async fn insert_heartbeat(&self, heartbeat: &NewHeartbeat) -> anyhow::Result<HeartbeatLog> {
        let row: HeartbeatRow = sqlx::query_as(
            "INSERT INTO heartbeat_logs (sweep_type, portfolios_scanned, findings_found, summary) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, sweep_type, portfolios_scanned, findings_found, summary, created_at",
        )
        .bind(heartbeat.sweep_type.as_str())
        .bind(i32::try_from(heartbeat.portfolios_scanned).unwrap_or(i32::MAX))
        .bind(i32::try_from(heartbeat.findings_found).unwrap_or(i32::MAX))
        .bind(&heartbeat.summary)
        .fetch_one(&self.pool)
        .await
        .context("insert heartbeat_logs failed")?;
        heartbeat_from_row(row)
    }

    async fn recent_heartbeats(&self, limit: usize) -> anyhow::Result<Vec<HeartbeatLog>> {
        let rows: Vec<HeartbeatRow> = sqlx::query_as(
            "SELECT id, sweep_type, portfolios_scanned, findings_found, summary, created_at \
             FROM heartbeat_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .context("select heartbeat_logs failed")?;
        rows.into_iter().map(heartbeat_from_row).collect()
    }

    async fn latest_heartbeat(&self, kind: SweepKind) -> anyhow::Result<Option<HeartbeatLog>> {
        let row: Option<HeartbeatRow> = sqlx::query_as(
            "SELECT id, sweep_type, portfolios_scanned, findings_found, summary, created_at \
             FROM heartbeat_logs WHERE sweep_type = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select latest heartbeat_logs failed (sweep_type={})", kind.as_str()))?;
        row.map(heartbeat_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Urgency;
    use crate::testing::client;

    // Needs a disposable Postgres: DATABASE_URL=... cargo test -- --ignored
    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for db tests");
        PgStore::connect(&url, 4).await.unwrap()
    }

    fn interrupt() -> Finding {
        Finding::book_wide(
            Urgency::High,
            Classification::MarketInterrupt {
                index_delta: -0.031,
                previous_value: 8000.0,
                current_value: 7752.0,
                headlines: vec![],
                exposed_clients: vec![],
            },
        )
    }

    async fn close_open(store: &PgStore, event_type: EventType) {
        for event in store.find_open_events_by_type(event_type).await.unwrap() {
            store
                .close_event(event.id, EventStatus::Dismissed, Utc::now())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    #[ignore]
    async fn concurrent_singleton_inserts_admit_one() {
        let store = store().await;
        close_open(&store, EventType::MarketInterrupt).await;

        let finding = interrupt();
        let (a, b, c) = tokio::join!(
            store.insert_open_event(&finding),
            store.insert_open_event(&finding),
            store.insert_open_event(&finding),
        );
        let inserted = [a.unwrap(), b.unwrap(), c.unwrap()]
            .into_iter()
            .filter(|outcome| matches!(outcome, InsertOutcome::Inserted(_)))
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(
            store
                .find_open_events_by_type(EventType::MarketInterrupt)
                .await
                .unwrap()
                .len(),
            1
        );

        close_open(&store, EventType::MarketInterrupt).await;
        assert!(matches!(
            store.insert_open_event(&finding).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        close_open(&store, EventType::MarketInterrupt).await;
    }

    #[tokio::test]
    #[ignore]
    async fn client_events_dedup_per_subject() {
        let store = store().await;
        let drift = |client_id| {
            Finding::for_client(
                client_id,
                Urgency::Medium,
                Classification::MandateDrift {
                    drift: 1.0,
                    threshold: 0.5,
                    target: 3.0,
                    current: 4.0,
                },
            )
        };
        let (first, second) = (client(), client());
        store.upsert_client(&first).await.unwrap();
        store.upsert_client(&second).await.unwrap();
        let (first, second) = (first.id, second.id);

        assert!(matches!(
            store.insert_open_event(&drift(first)).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            store.insert_open_event(&drift(first)).await.unwrap(),
            InsertOutcome::AlreadyOpen
        ));
        assert!(matches!(
            store.insert_open_event(&drift(second)).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
    }
}
