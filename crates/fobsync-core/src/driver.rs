//! The refresh driver: pulls the directory into the snapshot store.
//!
//! ## State machine
//!
//! ```text
//!            trigger
//!   Idle ─────────────► Fetching ──ok──► Idle (backoff reset)
//!                         ▲   │
//!                 delay   │   │ error
//!                         │   ▼
//!                        Backoff
//! ```
//!
//! One trigger is processed at a time, retries included. Triggers that arrive
//! meanwhile coalesce into a single pending request (see [`crate::trigger`]).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backoff::{Backoff, DEFAULT_RETRY_FLOOR};
use crate::entry::EntryMapping;
use crate::error::SourceError;
use crate::snapshot::Snapshot;
use crate::source::DirectorySource;
use crate::store::SnapshotStore;
use crate::trigger::{RefreshTrigger, TriggerReceiver, TriggerSource};

/// Timing knobs for the refresh loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Periodic resync interval; also the ceiling for retry delays.
    pub resync_interval: Duration,
    /// Upper bound for a single directory fetch.
    pub fetch_timeout: Duration,
    /// Delay before the first retry.
    pub retry_floor: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60 * 60),
            fetch_timeout: Duration::from_secs(60),
            retry_floor: DEFAULT_RETRY_FLOOR,
        }
    }
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Changed,
    Unchanged,
}

pub struct RefreshDriver<S: ?Sized> {
    source: Arc<S>,
    store: Arc<SnapshotStore>,
    mapping: EntryMapping,
    fetch_timeout: Duration,
    backoff: Backoff,
}

impl<S> RefreshDriver<S>
where
    S: DirectorySource + ?Sized,
{
    pub fn new(
        source: Arc<S>,
        store: Arc<SnapshotStore>,
        mapping: EntryMapping,
        config: &DriverConfig,
    ) -> Self {
        Self {
            source,
            store,
            mapping,
            fetch_timeout: config.fetch_timeout,
            backoff: Backoff::new(config.retry_floor, config.resync_interval),
        }
    }

    /// Fetch once, translate, and install the result if it differs.
    pub async fn refresh_once(&self, trigger: TriggerSource) -> Result<RefreshOutcome, SourceError> {
        let records = tokio::time::timeout(self.fetch_timeout, self.source.list_principals())
            .await
            .map_err(|_| SourceError::Timeout(self.fetch_timeout))??;

        let (entries, excluded) = self.mapping.translate_all(&records);
        if excluded > 0 {
            tracing::debug!(excluded, "skipped directory records without credentials or approval");
        }

        let snapshot = Snapshot::new(entries);
        let fingerprint = snapshot.fingerprint().clone();
        let entries = snapshot.len();

        if self.store.replace_if_changed(snapshot) {
            tracing::info!(%fingerprint, entries, excluded, %trigger, "filled cache");
            Ok(RefreshOutcome::Changed)
        } else {
            tracing::info!(%fingerprint, entries, %trigger, "cache was filled but nothing changed");
            Ok(RefreshOutcome::Unchanged)
        }
    }

    /// Refresh until one attempt succeeds, sleeping between failures.
    async fn run_cycle(&mut self, trigger: TriggerSource) -> RefreshOutcome {
        tracing::debug!(%trigger, "refreshing authorization list");
        loop {
            match self.refresh_once(trigger).await {
                Ok(outcome) => {
                    self.backoff.reset();
                    return outcome;
                }
                Err(error) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        %error,
                        %trigger,
                        retry_in_ms = delay.as_millis() as u64,
                        "sync error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Consume triggers until shutdown is signalled or every trigger sender is gone.
    pub async fn run(mut self, mut triggers: TriggerReceiver, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting refresh driver");

        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = self.run_cycle(trigger) => {}
            }
        }

        tracing::info!("Refresh driver stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, triggers: TriggerReceiver, shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        S: 'static,
    {
        tokio::spawn(self.run(triggers, shutdown))
    }
}

/// Fire a [`TriggerSource::Periodic`] trigger every `interval`, starting one
/// interval from now.
pub fn spawn_periodic_trigger(
    trigger: RefreshTrigger,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            tracing::warn!("periodic refresh disabled: resync interval is zero");
            return;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    trigger.fire(TriggerSource::Periodic);
                }
            }
        }
    })
}

/// Resolves once the flag is set or its sender is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::entry::PrincipalRecord;
    use crate::trigger::refresh_channel;

    /// Replays scripted results and records when each call happened.
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<PrincipalRecord>, &'static str>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn push_ok(&self, records: Vec<PrincipalRecord>) {
            self.script.lock().push_back(Ok(records));
        }

        fn push_err(&self, n: usize) {
            for _ in 0..n {
                self.script.lock().push_back(Err("directory unavailable"));
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl DirectorySource for ScriptedSource {
        async fn list_principals(&self) -> Result<Vec<PrincipalRecord>, SourceError> {
            self.calls.lock().push(Instant::now());
            match self.script.lock().pop_front() {
                Some(Ok(records)) => Ok(records),
                Some(Err(msg)) => Err(SourceError::fetch(msg)),
                None => Ok(Vec::new()),
            }
        }
    }

    struct HangingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DirectorySource for HangingSource {
        async fn list_principals(&self) -> Result<Vec<PrincipalRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Result<Vec<PrincipalRecord>, SourceError>>().await
        }
    }

    fn member(id: &str, fob: &str) -> PrincipalRecord {
        PrincipalRecord::new(id)
            .with_attribute("keyfobID", fob)
            .with_attribute("buildingAccessApprover", "admin")
    }

    fn driver<S: DirectorySource + ?Sized>(source: Arc<S>, store: Arc<SnapshotStore>) -> RefreshDriver<S> {
        RefreshDriver::new(source, store, EntryMapping::default(), &DriverConfig::default())
    }

    async fn wait_for_calls(source: &ScriptedSource, n: usize) {
        while source.call_times().len() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn refresh_once_reports_change_then_no_change() {
        let source = Arc::new(ScriptedSource::default());
        source.push_ok(vec![member("a", "1"), member("b", "2")]);
        source.push_ok(vec![member("b", "2"), member("a", "1")]);
        let store = SnapshotStore::new_shared();
        let driver = driver(source, store.clone());

        assert_eq!(driver.refresh_once(TriggerSource::Startup).await.unwrap(), RefreshOutcome::Changed);
        assert_eq!(driver.refresh_once(TriggerSource::Startup).await.unwrap(), RefreshOutcome::Unchanged);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refresh_logs_name_the_trigger_source() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let source = Arc::new(ScriptedSource::default());
        source.push_ok(vec![member("a", "1")]);
        source.push_ok(vec![member("a", "1")]);
        let driver = driver(source, SnapshotStore::new_shared());

        driver.refresh_once(TriggerSource::Webhook).await.unwrap();
        driver.refresh_once(TriggerSource::Periodic).await.unwrap();

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let filled = output.lines().find(|l| l.contains("filled cache")).unwrap();
        assert!(filled.contains("trigger=webhook"), "{filled}");
        let unchanged = output.lines().find(|l| l.contains("nothing changed")).unwrap();
        assert!(unchanged.contains("trigger=periodic"), "{unchanged}");
    }

    #[tokio::test]
    async fn refresh_error_leaves_store_untouched() {
        let source = Arc::new(ScriptedSource::default());
        source.push_ok(vec![member("a", "1")]);
        source.push_err(1);
        let store = SnapshotStore::new_shared();
        let driver = driver(source, store.clone());

        driver.refresh_once(TriggerSource::Startup).await.unwrap();
        let before = store.load().unwrap();
        assert!(driver.refresh_once(TriggerSource::Startup).await.is_err());
        assert!(Arc::ptr_eq(&before, &store.load().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_is_bounded_by_timeout() {
        let source = Arc::new(HangingSource {
            calls: AtomicUsize::new(0),
        });
        let store = SnapshotStore::new_shared();
        let driver = driver(source.clone(), store.clone());

        let err = driver.refresh_once(TriggerSource::Startup).await.unwrap_err();
        assert!(matches!(err, SourceError::Timeout(t) if t == Duration::from_secs(60)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!store.is_warm());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_growing_backoff_then_resets() {
        let source = Arc::new(ScriptedSource::default());
        // First cycle: three failures, then success.
        source.push_err(3);
        source.push_ok(vec![member("a", "1")]);
        // Second cycle: one failure, then success.
        source.push_err(1);
        source.push_ok(vec![member("a", "1"), member("b", "2")]);

        let store = SnapshotStore::new_shared();
        let (trigger, triggers) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = driver(source.clone(), store.clone()).spawn(triggers, shutdown_rx);

        trigger.fire(TriggerSource::Startup);
        wait_for_calls(&source, 4).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.is_warm());

        trigger.fire(TriggerSource::Webhook);
        wait_for_calls(&source, 6).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.load().unwrap().len(), 2);

        let calls = source.call_times();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        let expect_near = |gap: Duration, want: Duration| {
            assert!(
                gap >= want && gap <= want + Duration::from_millis(2),
                "gap {gap:?}, expected about {want:?}"
            );
        };
        expect_near(gaps[0], Duration::from_millis(250));
        expect_near(gaps[1], Duration::from_millis(375));
        expect_near(gaps[2], Duration::from_micros(562_500));
        // gaps[3] spans the idle period between cycles.
        expect_near(gaps[4], Duration::from_millis(250));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_is_capped_by_resync_interval() {
        let source = Arc::new(ScriptedSource::default());
        source.push_err(5);
        let store = SnapshotStore::new_shared();
        let config = DriverConfig {
            resync_interval: Duration::from_millis(400),
            ..DriverConfig::default()
        };
        let (trigger, triggers) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = RefreshDriver::new(source.clone(), store.clone(), EntryMapping::default(), &config)
            .spawn(triggers, shutdown_rx);

        trigger.fire(TriggerSource::Startup);
        wait_for_calls(&source, 6).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let calls = source.call_times();
        for gap in calls.windows(2).map(|w| w[1] - w[0]).skip(1) {
            assert!(gap <= Duration::from_millis(402), "gap {gap:?} exceeds ceiling");
        }
        assert!(store.is_warm());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let source = Arc::new(ScriptedSource::default());
        source.push_err(100);
        let store = SnapshotStore::new_shared();
        let (trigger, triggers) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = driver(source.clone(), store).spawn(triggers, shutdown_rx);

        trigger.fire(TriggerSource::Startup);
        wait_for_calls(&source, 2).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let calls = source.call_times().len();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(source.call_times().len(), calls);
    }

    #[tokio::test]
    async fn driver_stops_when_triggers_close() {
        let source = Arc::new(ScriptedSource::default());
        let store = SnapshotStore::new_shared();
        let (trigger, triggers) = refresh_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = driver(source, store).spawn(triggers, shutdown_rx);

        drop(trigger);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("driver exits")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_trigger_fires_each_interval() {
        let (trigger, mut triggers) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_periodic_trigger(trigger, Duration::from_secs(60), shutdown_rx);

        // Nothing immediately.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(triggers.try_recv(), None);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(triggers.try_recv(), Some(TriggerSource::Periodic));

        // Unconsumed ticks collapse into one pending trigger.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(triggers.try_recv(), Some(TriggerSource::Periodic));
        assert_eq!(triggers.try_recv(), None);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_periodic_trigger() {
        let (trigger, mut triggers) = refresh_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_periodic_trigger(trigger, Duration::ZERO, shutdown_rx);

        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(triggers.try_recv(), None);
    }
}
