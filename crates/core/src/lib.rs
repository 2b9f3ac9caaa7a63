pub mod actions;
pub mod broadcast;
pub mod dedup;
pub mod domain;
pub mod ingest;
pub mod llm;
pub mod rules;
pub mod storage;
pub mod stream;
pub mod sweep;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use anyhow::Context;
    use chrono::NaiveTime;
    use std::str::FromStr;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: Option<String>,
        pub data_provider_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL").ok(),
                data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
            self.data_provider_base_url
                .as_deref()
                .context("DATA_PROVIDER_BASE_URL is required")
        }
    }

    /// Sweep cadences and collaborator budgets.
    #[derive(Debug, Clone)]
    pub struct Tunables {
        pub pulse_interval: Duration,
        pub book_interval: Duration,
        pub meeting_prep_interval: Duration,
        /// UTC wall-clock time of the daily macro sweep.
        pub macro_sweep_at: NaiveTime,
        pub market_context_timeout: Duration,
        pub narrative_timeout: Duration,
        pub narrative_retries: u32,
        pub broadcast_buffer: usize,
    }

    impl Default for Tunables {
        fn default() -> Self {
            Self {
                pulse_interval: Duration::from_secs(300),
                book_interval: Duration::from_secs(1800),
                meeting_prep_interval: Duration::from_secs(900),
                macro_sweep_at: NaiveTime::from_hms_opt(7, 30, 0).unwrap_or_default(),
                market_context_timeout: Duration::from_secs(15),
                narrative_timeout: Duration::from_secs(20),
                narrative_retries: 1,
                broadcast_buffer: 16,
            }
        }
    }

    impl Tunables {
        pub fn from_env() -> anyhow::Result<Self> {
            let d = Self::default();
            Ok(Self {
                pulse_interval: secs_var("PULSE_INTERVAL_SECS", d.pulse_interval)?,
                book_interval: secs_var("BOOK_INTERVAL_SECS", d.book_interval)?,
                meeting_prep_interval: secs_var(
                    "MEETING_PREP_INTERVAL_SECS",
                    d.meeting_prep_interval,
                )?,
                macro_sweep_at: match std::env::var("MACRO_SWEEP_AT") {
                    Ok(raw) if !raw.trim().is_empty() => {
                        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                            .with_context(|| format!("MACRO_SWEEP_AT must be HH:MM, got {raw}"))?
                    }
                    _ => d.macro_sweep_at,
                },
                market_context_timeout: secs_var(
                    "MARKET_CONTEXT_TIMEOUT_SECS",
                    d.market_context_timeout,
                )?,
                narrative_timeout: secs_var("NARRATIVE_TIMEOUT_SECS", d.narrative_timeout)?,
                narrative_retries: parse_var("NARRATIVE_RETRIES", d.narrative_retries)?,
                broadcast_buffer: parse_var("BROADCAST_BUFFER", d.broadcast_buffer)?.max(1),
            })
        }
    }

    /// Typed env var with a default; present-but-unparseable is an error.
    pub fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match std::env::var(name) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{name} is invalid ({raw}): {e}")),
            _ => Ok(default),
        }
    }

    fn secs_var(name: &str, default: Duration) -> anyhow::Result<Duration> {
        let secs = parse_var(name, default.as_secs())?;
        anyhow::ensure!(secs > 0, "{name} must be positive");
        Ok(Duration::from_secs(secs))
    }

    pub fn bool_var(name: &str, default: bool) -> bool {
        match std::env::var(name) {
            Ok(raw) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            Err(_) => default,
        }
    }
}
