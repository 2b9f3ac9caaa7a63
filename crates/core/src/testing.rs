//! Fixtures and scripted collaborators shared by the unit tests.

use crate::domain::client::{BehaviouralProfile, Client, TaxProfile, Vulnerability};
use crate::domain::event::{Narrative, SuggestedAction};
use crate::domain::market::MarketSnapshot;
use crate::domain::portfolio::{Holding, Portfolio};
use crate::domain::records::{BriefPayload, DraftContent};
use crate::ingest::types::LiveIndices;
use crate::ingest::MarketDataProvider;
use crate::llm::{
    BriefContext, DraftRequest, InterpretRequest, MasterNarrative, NarrativeClient, Provider,
    RosterEntry,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Notional book size used to turn exposure fractions into holding values.
const NOTIONAL: f64 = 100_000.0;

pub fn client() -> Client {
    client_named("Jane", "Doe")
}

pub fn client_named(first: &str, last: &str) -> Client {
    Client {
        id: Uuid::new_v4(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase()),
        tax_profile: TaxProfile::default(),
        behavioural_profile: BehaviouralProfile::default(),
        vulnerability: Vulnerability::default(),
        last_proactive_check: None,
        created_at: Utc::now(),
    }
}

/// Holdings carry the given exposures verbatim; each is worth `exposure * 100k` at a unit price of 1.
pub fn portfolio_with(client: &Client, sectors: &[(&str, f64)], cash: f64) -> Portfolio {
    let holdings = sectors
        .iter()
        .enumerate()
        .map(|(idx, (sector, exposure))| Holding {
            ticker: format!("{}{idx}", sector.to_uppercase()),
            sector: sector.to_string(),
            quantity: exposure * NOTIONAL,
            unit_price: 1.0,
            exposure: *exposure,
        })
        .collect();

    Portfolio {
        id: Uuid::new_v4(),
        client_id: client.id,
        holdings,
        cash_balance: cash,
        unrealized_gains: 0.0,
        target_risk_score: 5.0,
        current_risk_score: 5.0,
        updated_at: Utc::now(),
    }
}

pub fn snapshot_with(sectors: &[(&str, f64)]) -> MarketSnapshot {
    MarketSnapshot {
        id: Uuid::new_v4(),
        taken_at: Utc::now(),
        ftse_100: 8000.0,
        ftse_250: 20_000.0,
        sector_performance: sectors
            .iter()
            .map(|(sector, perf)| (sector.to_string(), *perf))
            .collect(),
    }
}

#[derive(Default)]
struct NarrativeState {
    fail_remaining: u32,
    delay: Duration,
    interpret_calls: u32,
    summarize_calls: u32,
    draft_calls: u32,
    brief_calls: u32,
    master_reply: Option<MasterNarrative>,
    brief_reply: Option<BriefPayload>,
}

#[derive(Clone, Copy)]
enum Call {
    Interpret,
    Summarize,
    Draft,
    Brief,
}

/// Scripted text-generation collaborator. Failures are consumed by any call.
#[derive(Default)]
pub struct FakeNarrative {
    state: Mutex<NarrativeState>,
}

impl FakeNarrative {
    pub fn failing() -> Self {
        let fake = Self::default();
        fake.fail_next(u32::MAX);
        fake
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().fail_remaining = n;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Replaces the canned book summary with `reply`.
    pub fn reply_master(&self, reply: MasterNarrative) {
        self.state.lock().unwrap().master_reply = Some(reply);
    }

    pub fn reply_brief(&self, reply: BriefPayload) {
        self.state.lock().unwrap().brief_reply = Some(reply);
    }

    pub fn interpret_calls(&self) -> u32 {
        self.state.lock().unwrap().interpret_calls
    }

    pub fn summarize_calls(&self) -> u32 {
        self.state.lock().unwrap().summarize_calls
    }

    pub fn draft_calls(&self) -> u32 {
        self.state.lock().unwrap().draft_calls
    }

    pub fn brief_calls(&self) -> u32 {
        self.state.lock().unwrap().brief_calls
    }

    /// Counts the call and returns the scripted delay, or an error if a failure is queued.
    fn begin(&self, call: Call) -> anyhow::Result<Duration> {
        let mut state = self.state.lock().unwrap();
        match call {
            Call::Interpret => state.interpret_calls += 1,
            Call::Summarize => state.summarize_calls += 1,
            Call::Draft => state.draft_calls += 1,
            Call::Brief => state.brief_calls += 1,
        }
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            anyhow::bail!("scripted failure");
        }
        Ok(state.delay)
    }
}

#[async_trait::async_trait]
impl NarrativeClient for FakeNarrative {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn interpret_finding(&self, req: &InterpretRequest) -> anyhow::Result<Narrative> {
        let delay = self.begin(Call::Interpret)?;
        tokio::time::sleep(delay).await;
        Ok(Narrative {
            headline: format!(
                "{} for {}",
                req.event_type.label(),
                req.client_name.as_deref().unwrap_or("the book")
            ),
            consequence_if_ignored: "Losses may compound.".to_string(),
            behavioural_nuance: "Client prefers a phone call.".to_string(),
            suggested_action: SuggestedAction::DraftEmail,
            error: None,
        })
    }

    async fn summarize_book(
        &self,
        roster: &[RosterEntry],
        _market_summary: &str,
    ) -> anyhow::Result<MasterNarrative> {
        self.begin(Call::Summarize)?;
        if let Some(reply) = self.state.lock().unwrap().master_reply.clone() {
            return Ok(reply);
        }
        Ok(MasterNarrative {
            title: "Energy sell-off overnight".to_string(),
            bullets: vec![format!("{} clients reviewed", roster.len())],
            market_summary: "FTSE lower on oil.".to_string(),
            critical_news: vec!["Brent falls 6%".to_string()],
            top_risks: vec!["Energy concentration".to_string()],
            suggested_actions: vec!["Call exposed clients".to_string()],
        })
    }

    async fn draft_communication(&self, req: &DraftRequest) -> anyhow::Result<DraftContent> {
        self.begin(Call::Draft)?;
        Ok(DraftContent {
            subject: format!("About your {}", req.event_type.label()),
            body: format!("Hello {}", req.client_name.as_deref().unwrap_or("there")),
        })
    }

    async fn generate_meeting_brief(
        &self,
        _client_id: Uuid,
        ctx: &BriefContext,
    ) -> anyhow::Result<BriefPayload> {
        self.begin(Call::Brief)?;
        if let Some(reply) = self.state.lock().unwrap().brief_reply.clone() {
            return Ok(reply);
        }
        Ok(BriefPayload {
            client_summary: format!("Brief for {}", ctx.client_name),
            priority_talking_point: "Rebalance".to_string(),
            ..BriefPayload::default()
        })
    }
}

struct MarketState {
    indices: LiveIndices,
    news: Vec<String>,
    quotes: HashMap<String, f64>,
    fail_indices: bool,
    fail_geopolitics: bool,
}

/// Scripted market data provider.
pub struct FakeMarket {
    state: Mutex<MarketState>,
}

impl FakeMarket {
    pub fn new(ftse_100: f64, sectors: &[(&str, f64)]) -> Self {
        Self {
            state: Mutex::new(MarketState {
                indices: LiveIndices {
                    ftse_100,
                    ftse_250: 20_000.0,
                    sector_performance: sectors
                        .iter()
                        .map(|(sector, perf)| (sector.to_string(), *perf))
                        .collect::<BTreeMap<_, _>>(),
                    as_of: None,
                },
                news: Vec::new(),
                quotes: HashMap::new(),
                fail_indices: false,
                fail_geopolitics: false,
            }),
        }
    }

    pub fn set_ftse_100(&self, value: f64) {
        self.state.lock().unwrap().indices.ftse_100 = value;
    }

    pub fn set_news(&self, news: Vec<String>) {
        self.state.lock().unwrap().news = news;
    }

    pub fn set_quote(&self, ticker: &str, price: f64) {
        self.state
            .lock()
            .unwrap()
            .quotes
            .insert(ticker.to_string(), price);
    }

    pub fn fail_indices(&self) {
        self.state.lock().unwrap().fail_indices = true;
    }

    pub fn fail_geopolitics(&self) {
        self.state.lock().unwrap().fail_geopolitics = true;
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for FakeMarket {
    fn provider_name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_live_indices(&self) -> anyhow::Result<LiveIndices> {
        let state = self.state.lock().unwrap();
        if state.fail_indices {
            anyhow::bail!("indices unavailable");
        }
        Ok(state.indices.clone())
    }

    async fn fetch_news_headlines(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().news.iter().take(limit).cloned().collect())
    }

    async fn fetch_geopolitical_context(
        &self,
        _query: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        if self.state.lock().unwrap().fail_geopolitics {
            anyhow::bail!("geopolitics unavailable");
        }
        Ok(Vec::new())
    }

    async fn fetch_quotes(&self, tickers: &[String]) -> anyhow::Result<HashMap<String, f64>> {
        let state = self.state.lock().unwrap();
        Ok(tickers
            .iter()
            .filter_map(|t| state.quotes.get(t).map(|p| (t.clone(), *p)))
            .collect())
    }
}
