//! Read-time projection of open events, pending drafts, briefs and heartbeats into the
//! adviser feed plus its category tabs.

pub mod drawer;
pub mod text;

use crate::domain::client::{BehaviouralMemory, Client};
use crate::domain::event::{Classification, EventType, RiskEvent, Urgency};
use crate::domain::portfolio::Portfolio;
use crate::domain::records::{DraftAction, SweepKind};
use crate::storage::EntityStore;
use crate::time::schedule::{minutes_since, minutes_until_due, start_of_day, stream_timestamp};
use anyhow::bail;
use chrono::{DateTime, Utc};
use drawer::{ClientFacts, Drawer};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

const MEETING_ENTRIES: usize = 3;
const HEARTBEAT_ENTRIES: usize = 2;
const CLUSTER_PREVIEW: usize = 3;
const DRAWER_MEMORY: usize = 3;

const MASTER_CLIENT: &str = "Adviser Dashboard";
const CLUSTER_CLIENT: &str = "Strategic Alert";
const SYSTEM_CLIENT: &str = "System / AtlasEngine";
const UNKNOWN_CLIENT: &str = "Unknown Client";

/// Which slice of the feed to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFilter {
    #[default]
    All,
    Meeting,
    Type(EventType),
}

impl StreamFilter {
    fn shows(self, event_type: EventType) -> bool {
        match self {
            StreamFilter::All => true,
            StreamFilter::Meeting => false,
            StreamFilter::Type(t) => t == event_type,
        }
    }
}

impl FromStr for StreamFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" => Ok(StreamFilter::All),
            "meeting" => Ok(StreamFilter::Meeting),
            other => match other.parse::<EventType>() {
                Ok(t) => Ok(StreamFilter::Type(t)),
                Err(_) => bail!("unknown stream filter: {other}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    pub client: String,
    pub chips: Vec<String>,
    pub drawer: Drawer,
    pub is_draft: bool,
    pub is_master_brief: bool,
    pub is_macro_grouping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub client: String,
    pub text: String,
    pub summary: Vec<String>,
    pub cards: Vec<Card>,
    /// Fixed-width RFC 3339; the feed is ordered by this string.
    pub timestamp: String,
    pub display_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_count: Option<usize>,
}

impl StreamEntry {
    fn new(id: String, entry_type: &str, client: String, text: String, at: DateTime<Utc>) -> Self {
        Self {
            id,
            entry_type: entry_type.to_string(),
            client,
            text,
            summary: Vec::new(),
            cards: Vec::new(),
            timestamp: stream_timestamp(at),
            display_time: text::display_time(at),
            client_count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tab {
    pub key: String,
    pub label: String,
    pub count: usize,
    pub high_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamView {
    pub stream: Vec<StreamEntry>,
    pub tabs: Vec<Tab>,
}

/// One regular event waiting to be grouped.
struct Item {
    event: RiskEvent,
    client_name: String,
    card: Card,
    draft_card: Option<Card>,
}

impl Item {
    fn cards(self) -> Vec<Card> {
        let mut cards = vec![self.card];
        cards.extend(self.draft_card);
        cards
    }
}

#[derive(Default)]
struct ClientFactsCache {
    clients: HashMap<Uuid, Client>,
    portfolios: HashMap<Uuid, Option<Portfolio>>,
    memory: HashMap<Uuid, Vec<BehaviouralMemory>>,
}

impl ClientFactsCache {
    async fn load(&mut self, store: &dyn EntityStore, client_id: Uuid) {
        if self.portfolios.contains_key(&client_id) {
            return;
        }
        let portfolio = read_or(store.get_portfolio(client_id).await, None, "portfolio");
        let memory = read_or(
            store.recent_memory(client_id, DRAWER_MEMORY).await,
            Vec::new(),
            "behavioural memory",
        );
        self.portfolios.insert(client_id, portfolio);
        self.memory.insert(client_id, memory);
    }

    fn facts(&self, client_id: Option<Uuid>) -> ClientFacts<'_> {
        let Some(id) = client_id else {
            return ClientFacts::default();
        };
        ClientFacts {
            client: self.clients.get(&id),
            portfolio: self.portfolios.get(&id).and_then(Option::as_ref),
            memory: self.memory.get(&id).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    fn name(&self, client_id: Option<Uuid>) -> String {
        match client_id {
            Some(id) => self
                .clients
                .get(&id)
                .map(Client::full_name)
                .unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
            None => String::new(),
        }
    }
}

/// A failed source read degrades to an empty section instead of failing the whole feed.
fn read_or<T>(result: anyhow::Result<T>, fallback: T, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(source = what, error = %err, "stream source read failed");
            fallback
        }
    }
}

#[derive(Default)]
struct TabCounter {
    counts: BTreeMap<EventType, (usize, usize)>,
}

impl TabCounter {
    fn count(&mut self, event: &RiskEvent) {
        let entry = self.counts.entry(event.event_type).or_default();
        entry.0 += 1;
        if event.urgency.is_elevated() {
            entry.1 += 1;
        }
    }

    fn into_tabs(self) -> Vec<Tab> {
        let (total, high) = self
            .counts
            .values()
            .fold((0, 0), |(t, h), (count, high)| (t + count, h + high));
        let mut typed: Vec<(EventType, usize, usize)> = self
            .counts
            .into_iter()
            .map(|(t, (count, high))| (t, count, high))
            .collect();
        typed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        let mut tabs = vec![Tab {
            key: "all".to_string(),
            label: "All".to_string(),
            count: total,
            high_count: high,
        }];
        tabs.extend(typed.into_iter().map(|(t, count, high_count)| Tab {
            key: t.as_str().to_string(),
            label: t.label().to_string(),
            count,
            high_count,
        }));
        tabs
    }
}

fn matches_search(needle: &str, client_name: &str, event: &RiskEvent) -> bool {
    needle.is_empty()
        || client_name.to_lowercase().contains(needle)
        || event.event_type.search_text().contains(needle)
        || event.reason().to_lowercase().contains(needle)
}

fn event_card(event: &RiskEvent, client: String, drawer: Drawer) -> Card {
    Card {
        id: event.id,
        card_type: event.event_type.as_str().to_string(),
        urgency: Some(event.urgency),
        client,
        chips: text::chips(event),
        drawer,
        is_draft: false,
        is_master_brief: event.classification.is_master_brief(),
        is_macro_grouping: event.classification.is_macro_grouping(),
    }
}

fn draft_card(draft: &DraftAction, client: String) -> Card {
    Card {
        id: draft.id,
        card_type: "draft".to_string(),
        urgency: None,
        client,
        chips: vec!["Draft Ready".to_string(), "Pending Approval".to_string()],
        drawer: drawer::for_draft(draft),
        is_draft: true,
        is_master_brief: false,
        is_macro_grouping: false,
    }
}

/// Builds the feed for `filter`, narrowed by a case-insensitive `search`. Tab counts
/// cover every open non-master event regardless of filter and search.
pub async fn build_stream(store: &dyn EntityStore, filter: StreamFilter, search: &str) -> StreamView {
    let needle = search.trim().to_lowercase();
    let mut cache = ClientFactsCache {
        clients: read_or(store.list_clients().await, Vec::new(), "clients")
            .into_iter()
            .map(|c| (c.id, c))
            .collect(),
        ..Default::default()
    };

    let mut events = read_or(store.list_open_events().await, Vec::new(), "open events");
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut drafts: HashMap<Uuid, DraftAction> = HashMap::new();
    for draft in read_or(store.list_pending_drafts().await, Vec::new(), "pending drafts") {
        match drafts.get(&draft.risk_event_id) {
            Some(kept) if kept.created_at >= draft.created_at => {}
            _ => {
                drafts.insert(draft.risk_event_id, draft);
            }
        }
    }

    let mut tabs = TabCounter::default();
    let mut master: Option<RiskEvent> = None;
    let mut macro_items: Vec<Item> = Vec::new();
    let mut grouped: BTreeMap<EventType, Vec<Item>> = BTreeMap::new();

    for event in events {
        let is_master = event.classification.is_master_brief();
        if !is_master {
            tabs.count(&event);
        }

        let client_name = cache.name(event.client_id);
        if !matches_search(&needle, &client_name, &event) {
            continue;
        }
        if is_master {
            if master.is_none() {
                master = Some(event);
            }
            continue;
        }

        if let Some(id) = event.client_id {
            cache.load(store, id).await;
        }
        let drawer = drawer::for_event(&event, cache.facts(event.client_id));
        let is_macro = event.classification.is_macro_grouping();
        let card = event_card(&event, client_name.clone(), drawer);
        let draft_card = if is_macro {
            None
        } else {
            drafts
                .get(&event.id)
                .map(|d| draft_card(d, client_name.clone()))
        };
        let item = Item {
            event,
            client_name,
            card,
            draft_card,
        };
        if is_macro {
            macro_items.push(item);
        } else {
            grouped.entry(item.event.event_type).or_default().push(item);
        }
    }

    let mut entries = Vec::new();
    let master_shown = matches!(
        filter,
        StreamFilter::All | StreamFilter::Type(EventType::MorningIntelligence)
    );
    match master {
        Some(master) if master_shown => entries.push(master_entry(&master, macro_items)),
        _ => {
            for item in macro_items {
                grouped.entry(item.event.event_type).or_default().push(item);
            }
        }
    }

    for (event_type, items) in grouped {
        if !filter.shows(event_type) {
            continue;
        }
        let mut items = items.into_iter();
        if let Some(first) = items.next() {
            entries.push(group_entry(event_type, first, items.collect()));
        }
    }

    if matches!(filter, StreamFilter::All | StreamFilter::Meeting) {
        let briefs = read_or(
            store.recent_briefs(MEETING_ENTRIES).await,
            Vec::new(),
            "meeting briefs",
        );
        for brief in briefs {
            let client_name = cache.name(Some(brief.client_id));
            if !needle.is_empty() && !client_name.to_lowercase().contains(&needle) {
                continue;
            }
            cache.load(store, brief.client_id).await;
            let drawer = drawer::for_meeting(&brief, cache.facts(Some(brief.client_id)));
            let risk = if brief.payload.risk_alignment.trim().is_empty() {
                "Aligned"
            } else {
                brief.payload.risk_alignment.as_str()
            };
            let mut entry = StreamEntry::new(
                brief.id.to_string(),
                "meeting",
                client_name.clone(),
                format!("Upcoming brief for {client_name} generated."),
                brief.created_at,
            );
            entry.cards.push(Card {
                id: brief.id,
                card_type: EventType::MeetingBrief.as_str().to_string(),
                urgency: None,
                client: client_name,
                chips: vec!["Meeting Prep".to_string(), format!("Risk: {risk}")],
                drawer,
                is_draft: false,
                is_master_brief: false,
                is_macro_grouping: false,
            });
            entries.push(entry);
        }
    }

    if filter == StreamFilter::All {
        let heartbeats = read_or(
            store.recent_heartbeats(HEARTBEAT_ENTRIES).await,
            Vec::new(),
            "heartbeats",
        );
        for hb in heartbeats {
            entries.push(StreamEntry::new(
                hb.id.to_string(),
                "heartbeat",
                SYSTEM_CLIENT.to_string(),
                format!("{} completed. {}", hb.sweep_type.label(), hb.summary),
                hb.created_at,
            ));
        }
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    StreamView {
        stream: entries,
        tabs: tabs.into_tabs(),
    }
}

fn master_entry(master: &RiskEvent, macro_items: Vec<Item>) -> StreamEntry {
    let (critical_news, market_summary) = match &master.classification {
        Classification::MorningBrief {
            critical_news,
            market_summary,
            ..
        } => (critical_news.clone(), market_summary.clone()),
        _ => (Vec::new(), String::new()),
    };

    let mut entry = StreamEntry::new(
        master.id.to_string(),
        EventType::MorningIntelligence.as_str(),
        MASTER_CLIENT.to_string(),
        format!("Market Intelligence ({})", critical_news.len()),
        master.created_at,
    );
    entry.summary = critical_news
        .iter()
        .map(|news| format!("NEWS: {news}"))
        .collect();
    if !market_summary.trim().is_empty() {
        entry.summary.push(market_summary);
    }
    if entry.summary.is_empty() {
        entry.summary.push("Market analysis pending...".to_string());
    }

    entry.cards.push(event_card(
        master,
        MASTER_CLIENT.to_string(),
        drawer::for_event(master, ClientFacts::default()),
    ));
    for mut item in macro_items {
        let impact = text::event_text(&item.event, "");
        item.card.client = impact.clone();
        item.card.drawer.title = impact;
        entry.cards.push(item.card);
    }
    entry
}

fn group_entry(event_type: EventType, first: Item, rest: Vec<Item>) -> StreamEntry {
    let count = rest.len() + 1;
    if count == 1 {
        let mut entry = StreamEntry::new(
            first.event.id.to_string(),
            event_type.as_str(),
            first.client_name.clone(),
            text::event_text(&first.event, &first.client_name),
            first.event.created_at,
        );
        entry.summary = text::summary_lines(first.event.interpretation.as_ref());
        entry.cards = first.cards();
        return entry;
    }

    let mut entry = StreamEntry::new(
        format!("group-{}-{}", event_type.as_str(), first.event.id),
        event_type.as_str(),
        CLUSTER_CLIENT.to_string(),
        text::group_text(event_type, count),
        first.event.created_at,
    );
    entry.client_count = Some(count);
    for item in std::iter::once(first).chain(rest) {
        if entry.summary.len() < CLUSTER_PREVIEW {
            if let Some(line) = text::summary_lines(item.event.interpretation.as_ref()).first() {
                entry.summary.push(format!("{}: {line}", item.client_name));
            }
        }
        entry.cards.extend(item.cards());
    }
    entry
}

/// Header strip: latest index level, sector moves and book-level counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveStrip {
    pub ftse_100: Option<f64>,
    pub sectors: BTreeMap<String, f64>,
    pub open_risks: usize,
    pub clients_impacted: usize,
    pub meetings_today: usize,
}

pub async fn live_strip(store: &dyn EntityStore, now: DateTime<Utc>) -> anyhow::Result<LiveStrip> {
    let snapshot = store.latest_snapshot().await?;
    let open = store.list_open_events().await?;
    let clients_impacted = open
        .iter()
        .filter_map(|e| e.client_id)
        .collect::<HashSet<_>>()
        .len();
    let meetings_today = store.briefs_since(start_of_day(now)).await?.len();

    let (ftse_100, sectors) = match snapshot {
        Some(s) => ((s.ftse_100 > 0.0).then_some(s.ftse_100), s.sector_performance),
        None => (None, BTreeMap::new()),
    };
    Ok(LiveStrip {
        ftse_100,
        sectors,
        open_risks: open.len(),
        clients_impacted,
        meetings_today,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatStatus {
    pub last_run_text: String,
    pub next_run_text: String,
    pub last_summary: Option<String>,
}

/// Time since the last book sweep and until the next one is due.
pub async fn heartbeat_status(
    store: &dyn EntityStore,
    book_interval: std::time::Duration,
    now: DateTime<Utc>,
) -> anyhow::Result<HeartbeatStatus> {
    Ok(match store.latest_heartbeat(SweepKind::Book).await? {
        Some(hb) => HeartbeatStatus {
            last_run_text: format!("{} min ago", minutes_since(hb.created_at, now)),
            next_run_text: format!(
                "{} min",
                minutes_until_due(Some(hb.created_at), book_interval, now)
            ),
            last_summary: Some(hb.summary),
        },
        None => HeartbeatStatus {
            last_run_text: "Unknown".to_string(),
            next_run_text: "Pending".to_string(),
            last_summary: None,
        },
    })
}
