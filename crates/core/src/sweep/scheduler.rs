use crate::domain::records::SweepKind;
use crate::sweep::{run_sweep, SweepContext};
use crate::time::schedule::next_daily_run;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Owns the four sweep loops. Each loop is its own task so a slow sweep never delays
/// another cadence; a sweep in flight at shutdown is allowed to finish.
pub struct Scheduler {
    handles: Vec<(SweepKind, JoinHandle<()>)>,
    shutdown_sender: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn start(ctx: Arc<SweepContext>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        let mut scheduler = Self {
            handles: Vec::new(),
            shutdown_sender,
        };

        let t = &ctx.tunables;
        let every = [
            (SweepKind::Pulse, t.pulse_interval),
            (SweepKind::Book, t.book_interval),
            (SweepKind::MeetingPrep, t.meeting_prep_interval),
        ];
        for (kind, period) in every {
            let handle = scheduler.spawn_periodic(ctx.clone(), kind, period);
            scheduler.handles.push((kind, handle));
        }
        let handle = scheduler.spawn_daily(ctx.clone());
        scheduler.handles.push((SweepKind::Macro, handle));

        tracing::info!(
            pulse = ?t.pulse_interval,
            book = ?t.book_interval,
            meeting_prep = ?t.meeting_prep_interval,
            macro_at = %t.macro_sweep_at,
            "sweep scheduler started"
        );
        scheduler
    }

    fn spawn_periodic(
        &self,
        ctx: Arc<SweepContext>,
        kind: SweepKind,
        period: Duration,
    ) -> JoinHandle<()> {
        let mut shutdown = self.shutdown_sender.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_logged(&ctx, kind).await,
                    _ = shutdown.recv() => {
                        tracing::info!(sweep = kind.slug(), "sweep loop stopping");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_daily(&self, ctx: Arc<SweepContext>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown_sender.subscribe();
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_run(now, ctx.tunables.macro_sweep_at);
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::debug!(next_run = %next, "macro sweep scheduled");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => run_logged(&ctx, SweepKind::Macro).await,
                    _ = shutdown.recv() => {
                        tracing::info!(sweep = SweepKind::Macro.slug(), "sweep loop stopping");
                        break;
                    }
                }
            }
        })
    }

    pub fn kinds(&self) -> Vec<SweepKind> {
        self.handles.iter().map(|(kind, _)| *kind).collect()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_sender.send(());
        for (kind, handle) in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(sweep = kind.slug(), error = %err, "sweep loop ended abnormally");
            }
        }
    }
}

async fn run_logged(ctx: &SweepContext, kind: SweepKind) {
    // run_sweep already logs and records the failure.
    let _ = run_sweep(ctx, kind).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EntityStore;
    use crate::sweep::tests::harness;
    use crate::testing::{FakeMarket, FakeNarrative};

    #[tokio::test(start_paused = true)]
    async fn loops_tick_on_their_cadence_and_stop() {
        let h = harness(FakeMarket::new(8000.0, &[]), FakeNarrative::default());
        let store = h.store.clone();
        let ctx = Arc::new(h.ctx);
        let scheduler = Scheduler::start(ctx.clone());
        assert_eq!(scheduler.kinds().len(), 4);

        tokio::time::sleep(ctx.tunables.pulse_interval * 2 + Duration::from_secs(1)).await;
        scheduler.shutdown().await;

        let pulses = store
            .recent_heartbeats(100)
            .await
            .unwrap()
            .into_iter()
            .filter(|hb| hb.sweep_type == SweepKind::Pulse)
            .count();
        assert_eq!(pulses, 2);
    }
}
