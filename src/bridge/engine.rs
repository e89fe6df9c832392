//! Bridge engine
//!
//! Owns the link, poll and snapshot state machines and routes the events
//! they raise. All state is mutated from this one task: background work
//! (logins, polls, uploads, teardowns) runs in spawned tasks and reports
//! back through the completion channel, so each handler below sees a
//! consistent snapshot of everything and can swap timers without racing.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::link::LinkManager;
use super::poll::PollController;
use super::snapshot::SnapshotRefresher;
use super::{tick, BridgeCommand, BridgeEvent, Completion};
use crate::config::TimingConfig;
use crate::media::{MediaSource, MediaStatus, PollError};
use crate::presence::PresenceUpdater;
use crate::rpc::RpcConnector;
use crate::upload::SnapshotPipeline;

/// The adapters the engine drives
pub struct Collaborators {
    pub media: Arc<dyn MediaSource>,
    /// `None` disables snapshot uploads
    pub snapshots: Option<Arc<dyn SnapshotPipeline>>,
    pub connector: Arc<dyn RpcConnector>,
    pub presence: Box<dyn PresenceUpdater>,
}

/// Keeps Discord presence in step with MPC playback
pub struct Bridge {
    link: LinkManager,
    poll: PollController,
    snapshots: SnapshotRefresher,
    presence: Box<dyn PresenceUpdater>,
    /// Whether a presence session is currently displayed
    active: bool,
    cmd_rx: mpsc::Receiver<BridgeCommand>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Bridge {
    /// Create a new bridge
    pub fn new(
        timing: &TimingConfig,
        parts: Collaborators,
        cmd_rx: mpsc::Receiver<BridgeCommand>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Self {
            link: LinkManager::new(parts.connector, timing.rpc_retry(), completion_tx.clone()),
            poll: PollController::new(
                parts.media,
                timing.fast_poll(),
                timing.slow_poll(),
                completion_tx.clone(),
            ),
            snapshots: SnapshotRefresher::new(parts.snapshots, timing.snapshot(), completion_tx),
            presence: parts.presence,
            active: false,
            cmd_rx,
            completion_rx,
        }
    }

    /// Run until shutdown is requested
    pub async fn run(&mut self) {
        info!("Trying to connect to Discord client...");
        self.start();

        while self.step().await {}

        info!("Bridge stopped");
    }

    fn start(&mut self) {
        self.link.start();
    }

    /// Handle one command, completion or timer tick. Returns false once shut down.
    async fn step(&mut self) -> bool {
        tokio::select! {
            cmd = self.cmd_rx.recv() => {
                match cmd {
                    Some(BridgeCommand::Shutdown) => info!("Shutdown command received"),
                    None => info!("Command channel closed"),
                }
                self.shutdown().await;
                return false;
            }

            Some(done) = self.completion_rx.recv() => {
                self.complete(done).await;
            }

            _ = tick(self.link.retry_timer()) => {
                self.link.on_retry_tick();
            }

            _ = tick(self.poll.timer()) => {
                self.poll.on_tick();
            }

            _ = tick(self.snapshots.timer()) => {
                self.snapshots.on_tick();
            }
        }

        true
    }

    /// Tear the Discord link down. Failures are logged; the caller exits regardless.
    async fn shutdown(&mut self) {
        info!("Shutting down...");
        if let Err(e) = self.link.destroy().await {
            error!("Error on shutdown: {:#}", e);
        }
    }

    async fn complete(&mut self, done: Completion) {
        let event = match done {
            Completion::Login { attempt, result } => self.link.on_login(attempt, result),
            Completion::LinkClosed { link } => self.link.on_closed(link).await,
            Completion::Poll { epoch, result } => {
                if !self.poll.accept(epoch) {
                    return;
                }
                Some(match result {
                    Ok(status) => BridgeEvent::MediaConnected(status),
                    Err(e) => BridgeEvent::MediaError(e),
                })
            }
            Completion::Snapshot { epoch, result } => {
                self.snapshots.on_result(epoch, result);
                None
            }
        };

        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::RpcConnected => self.on_rpc_connected(),
            BridgeEvent::RpcDisconnected => self.on_rpc_disconnected(),
            BridgeEvent::MediaConnected(status) => self.on_media_connected(status),
            BridgeEvent::MediaError(err) => self.on_media_error(err),
        }
    }

    fn on_rpc_connected(&mut self) {
        info!("Connected to Discord. Listening MPC on {}", self.poll.endpoint());
        self.poll.start();
    }

    fn on_rpc_disconnected(&mut self) {
        self.poll.halt();
        self.snapshots.halt();
        self.active = false;
    }

    fn on_media_connected(&mut self, status: MediaStatus) {
        self.poll.on_success();

        // Relink in progress; the closure will halt everything again
        let Some(rpc) = self.link.session() else {
            debug!("Discord link is closing, presence update skipped");
            return;
        };

        self.snapshots.start();

        let force = !self.active;
        if force {
            info!(
                "Connected to {}",
                status.server.as_deref().unwrap_or("Media Player Classic")
            );
        }

        self.active = self
            .presence
            .update(&status, self.snapshots.reference(), force, rpc);
    }

    fn on_media_error(&mut self, err: PollError) {
        error!(
            "Unable to connect to Media Player Classic on {}. Make sure MPC is running, \
             Web Interface is enabled and the port set in the config file is correct: {}",
            self.poll.endpoint(),
            err
        );

        // Clearing activity is unreliable; a full relink is what actually
        // removes the presence from the user's profile.
        if self.active {
            self.link.begin_teardown();
        }

        self.snapshots.halt();
        self.poll.on_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::create_bridge_channels;
    use crate::bridge::poll::Regime;
    use crate::config::PresenceConfig;
    use crate::presence::MpcPresence;
    use crate::rpc::tests::RecordingSession;
    use crate::rpc::{RpcLink, RpcSession};
    use crate::upload::SnapshotError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    const PAUSED: &str =
        "<p id=\"file\">a.mkv</p><p id=\"state\">1</p><p id=\"position\">10000</p>";

    fn offsets(origin: Instant, times: &[Instant]) -> Vec<u64> {
        times
            .iter()
            .map(|t| t.duration_since(origin).as_millis() as u64)
            .collect()
    }

    struct FakeMedia {
        reachable: AtomicBool,
        delay: Duration,
        polls: Mutex<Vec<Instant>>,
    }

    impl FakeMedia {
        fn new(reachable: bool) -> Arc<Self> {
            Self::slow(reachable, Duration::ZERO)
        }

        fn slow(reachable: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                delay,
                polls: Mutex::new(Vec::new()),
            })
        }

        fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }

        fn polls(&self) -> Vec<Instant> {
            self.polls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaSource for FakeMedia {
        fn endpoint(&self) -> String {
            "http://127.0.0.1:13579/variables.html".to_string()
        }

        async fn poll_status(&self) -> Result<MediaStatus, PollError> {
            self.polls.lock().unwrap().push(Instant::now());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reachable.load(Ordering::SeqCst) {
                Ok(MediaStatus {
                    server: Some("MPC-HC WebServer".to_string()),
                    body: PAUSED.to_string(),
                })
            } else {
                Err(PollError::Connect("connection refused".to_string()))
            }
        }

        async fn fetch_snapshot(&self) -> Result<Vec<u8>, PollError> {
            Err(PollError::Status(404))
        }
    }

    /// Replays queued outcomes, then fails like a missing snapshot.jpg
    #[derive(Default)]
    struct FakePipeline {
        outcomes: Mutex<VecDeque<Result<String, SnapshotError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl FakePipeline {
        fn with(outcomes: Vec<Result<String, SnapshotError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotPipeline for FakePipeline {
        async fn refresh(&self) -> Result<String, SnapshotError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SnapshotError::Fetch(PollError::Status(404))))
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        failures_left: AtomicUsize,
        fail_destroy: bool,
        logins: Mutex<Vec<Instant>>,
        sessions: Mutex<Vec<RecordingSession>>,
        closers: Mutex<Vec<oneshot::Sender<()>>>,
    }

    impl FakeConnector {
        fn failing_first(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicUsize::new(failures),
                ..Self::default()
            })
        }

        fn failing_destroy() -> Arc<Self> {
            Arc::new(Self {
                fail_destroy: true,
                ..Self::default()
            })
        }

        fn logins(&self) -> Vec<Instant> {
            self.logins.lock().unwrap().clone()
        }

        fn session(&self, index: usize) -> RecordingSession {
            self.sessions.lock().unwrap()[index].clone()
        }

        /// Simulate Discord dropping the most recent session
        fn close_transport(&self) {
            if let Some(closer) = self.closers.lock().unwrap().pop() {
                let _ = closer.send(());
            }
        }
    }

    #[async_trait]
    impl RpcConnector for FakeConnector {
        async fn login(&self) -> anyhow::Result<RpcLink> {
            self.logins.lock().unwrap().push(Instant::now());

            let failures = self.failures_left.load(Ordering::SeqCst);
            if failures > 0 {
                self.failures_left.store(failures - 1, Ordering::SeqCst);
                anyhow::bail!("Could not connect");
            }

            let session = if self.fail_destroy {
                RecordingSession::failing_destroy()
            } else {
                RecordingSession::default()
            };
            let (closed_tx, closed) = oneshot::channel();
            self.sessions.lock().unwrap().push(session.clone());
            self.closers.lock().unwrap().push(closed_tx);

            Ok(RpcLink {
                session: Box::new(session),
                closed,
            })
        }
    }

    type PresenceCalls = Arc<Mutex<Vec<(bool, Option<String>)>>>;

    struct FakePresence {
        calls: PresenceCalls,
        shows: bool,
    }

    impl PresenceUpdater for FakePresence {
        fn update(
            &mut self,
            _status: &MediaStatus,
            snapshot: Option<&str>,
            force: bool,
            _rpc: &dyn RpcSession,
        ) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push((force, snapshot.map(str::to_string)));
            self.shows
        }
    }

    struct Harness {
        bridge: Bridge,
        media: Arc<FakeMedia>,
        pipeline: Arc<FakePipeline>,
        connector: Arc<FakeConnector>,
        presence: PresenceCalls,
        cmd_tx: mpsc::Sender<BridgeCommand>,
        origin: Instant,
    }

    impl Harness {
        fn new(media: Arc<FakeMedia>, connector: Arc<FakeConnector>) -> Self {
            Self::build(media, connector, FakePipeline::with(Vec::new()), true)
        }

        fn build(
            media: Arc<FakeMedia>,
            connector: Arc<FakeConnector>,
            pipeline: Arc<FakePipeline>,
            presence_shows: bool,
        ) -> Self {
            let calls: PresenceCalls = Arc::default();
            let presence = Box::new(FakePresence {
                calls: calls.clone(),
                shows: presence_shows,
            });
            Self::assemble(media, connector, pipeline, presence, calls)
        }

        fn assemble(
            media: Arc<FakeMedia>,
            connector: Arc<FakeConnector>,
            pipeline: Arc<FakePipeline>,
            presence: Box<dyn PresenceUpdater>,
            calls: PresenceCalls,
        ) -> Self {
            let (cmd_tx, cmd_rx) = create_bridge_channels();
            let mut bridge = Bridge::new(
                &TimingConfig::default(),
                Collaborators {
                    media: media.clone(),
                    snapshots: Some(pipeline.clone()),
                    connector: connector.clone(),
                    presence,
                },
                cmd_rx,
            );
            let origin = Instant::now();
            bridge.start();

            Self {
                bridge,
                media,
                pipeline,
                connector,
                presence: calls,
                cmd_tx,
                origin,
            }
        }

        /// Drive the engine until `secs` after start
        async fn run_until(&mut self, secs: f64) {
            let deadline = self.origin + Duration::from_secs_f64(secs);
            loop {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep_until(deadline) => break,
                    running = self.bridge.step() => {
                        if !running {
                            break;
                        }
                    }
                }
            }
        }

        async fn shut_down(&mut self) {
            self.cmd_tx.send(BridgeCommand::Shutdown).await.unwrap();
            tokio::time::timeout(Duration::from_secs(1), async {
                while self.bridge.step().await {}
            })
            .await
            .expect("bridge did not stop");
        }

        fn poll_offsets(&self) -> Vec<u64> {
            offsets(self.origin, &self.media.polls())
        }

        fn login_offsets(&self) -> Vec<u64> {
            offsets(self.origin, &self.connector.logins())
        }

        fn snapshot_offsets(&self) -> Vec<u64> {
            offsets(self.origin, &self.pipeline.calls())
        }

        fn forces(&self) -> Vec<bool> {
            self.presence.lock().unwrap().iter().map(|(f, _)| *f).collect()
        }

        fn last_snapshot_seen(&self) -> Option<String> {
            self.presence.lock().unwrap().last().and_then(|(_, s)| s.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_playback_polls_fast_and_forces_once() {
        let mut h = Harness::new(FakeMedia::new(true), FakeConnector::failing_first(0));

        h.run_until(12.5).await;

        assert_eq!(h.login_offsets(), vec![0]);
        assert_eq!(h.poll_offsets(), vec![0, 5_000, 10_000]);
        assert_eq!(h.forces(), vec![true, false, false]);
        assert_eq!(h.bridge.poll.regime(), Regime::Fast);
        assert!(h.bridge.active);
        assert!(h.bridge.snapshots.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_regime_follows_last_poll_outcome() {
        let mut h = Harness::build(
            FakeMedia::new(false),
            FakeConnector::failing_first(0),
            FakePipeline::with(Vec::new()),
            false,
        );

        h.run_until(31.0).await;
        assert_eq!(h.poll_offsets(), vec![0, 15_000, 30_000]);
        assert_eq!(h.bridge.poll.regime(), Regime::Slow);
        assert!(!h.bridge.snapshots.is_running());
        assert!(h.forces().is_empty());

        h.media.set_reachable(true);
        h.run_until(51.0).await;
        assert_eq!(h.poll_offsets(), vec![0, 15_000, 30_000, 45_000, 50_000]);
        assert_eq!(h.bridge.poll.regime(), Regime::Fast);
        assert!(h.bridge.snapshots.is_running());

        // Presence never reported a session, so every update is forced
        assert_eq!(h.forces(), vec![true, true]);
        assert!(!h.bridge.active);

        h.media.set_reachable(false);
        h.run_until(71.0).await;
        assert_eq!(
            h.poll_offsets(),
            vec![0, 15_000, 30_000, 45_000, 50_000, 55_000, 70_000]
        );
        assert_eq!(h.bridge.poll.regime(), Regime::Slow);
        assert!(!h.bridge.snapshots.is_running());
        assert_eq!(h.connector.session(0).destroyed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_loss_while_active_relinks() {
        let mut h = Harness::new(FakeMedia::new(true), FakeConnector::failing_first(0));

        h.run_until(7.0).await;
        assert!(h.bridge.active);

        h.media.set_reachable(false);
        h.run_until(21.0).await;

        // Poll at 10s fails, the session is torn down, login retried 10s later
        assert_eq!(h.connector.session(0).destroyed(), 1);
        assert_eq!(h.login_offsets(), vec![0, 20_000]);
        assert_eq!(h.poll_offsets(), vec![0, 5_000, 10_000, 20_000]);
        assert!(h.bridge.link.session().is_some());
        assert!(!h.bridge.active);
        assert!(!h.bridge.snapshots.is_running());
        assert_eq!(h.bridge.poll.regime(), Regime::Slow);

        h.run_until(36.0).await;
        assert_eq!(h.poll_offsets(), vec![0, 5_000, 10_000, 20_000, 35_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_snapshot_keeps_schedule_and_cache() {
        let pipeline = FakePipeline::with(vec![
            Err(SnapshotError::Fetch(PollError::Status(404))),
            Ok("https://img/1.jpg".to_string()),
            Err(SnapshotError::UploadStatus(500)),
        ]);
        let mut h = Harness::build(
            FakeMedia::new(true),
            FakeConnector::failing_first(0),
            pipeline,
            true,
        );

        h.run_until(1.0).await;
        assert_eq!(h.bridge.snapshots.reference(), None);

        h.run_until(121.0).await;
        assert_eq!(h.bridge.snapshots.reference(), Some("https://img/1.jpg"));

        h.run_until(250.0).await;
        assert_eq!(h.snapshot_offsets(), vec![0, 120_000, 240_000]);
        assert_eq!(h.bridge.snapshots.reference(), Some("https://img/1.jpg"));
        assert_eq!(h.last_snapshot_seen().as_deref(), Some("https://img/1.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_snapshot_reaches_discord_on_next_poll() {
        let pipeline = FakePipeline::with(vec![Ok("https://img/1.jpg".to_string())]);
        let presence = Box::new(MpcPresence::new(
            PresenceConfig::default(),
            Duration::from_secs(5),
        ));
        let mut h = Harness::assemble(
            FakeMedia::new(true),
            FakeConnector::failing_first(0),
            pipeline,
            presence,
            Arc::default(),
        );

        h.run_until(6.0).await;
        let images: Vec<_> = h
            .connector
            .session(0)
            .activities()
            .into_iter()
            .map(|a| a.large_image)
            .collect();
        assert_eq!(images, vec!["default", "https://img/1.jpg"]);

        // Nothing changed since, so nothing more is sent
        h.run_until(11.0).await;
        assert_eq!(h.connector.session(0).activities().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_answer_during_relink_does_not_start_snapshots() {
        let mut h = Harness::new(FakeMedia::new(true), FakeConnector::failing_first(0));

        h.run_until(1.0).await;
        assert!(h.bridge.snapshots.is_running());
        assert_eq!(h.snapshot_offsets(), vec![0]);

        h.bridge.snapshots.halt();
        h.bridge.link.begin_teardown();
        h.bridge.dispatch(BridgeEvent::MediaConnected(MediaStatus {
            server: None,
            body: PAUSED.to_string(),
        }));

        assert!(!h.bridge.snapshots.is_running());
        assert_eq!(h.forces(), vec![true]);

        h.run_until(2.0).await;
        assert_eq!(h.snapshot_offsets(), vec![0]);
        assert!(!h.bridge.active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_closure_halts_and_snapshot_survives() {
        let pipeline = FakePipeline::with(vec![Ok("https://img/1.jpg".to_string())]);
        let mut h = Harness::build(
            FakeMedia::new(true),
            FakeConnector::failing_first(0),
            pipeline,
            true,
        );

        h.run_until(1.0).await;
        assert_eq!(h.bridge.snapshots.reference(), Some("https://img/1.jpg"));
        assert_eq!(h.forces(), vec![true]);

        h.connector.close_transport();
        h.run_until(2.0).await;
        assert_eq!(h.connector.session(0).destroyed(), 1);
        assert_eq!(h.bridge.poll.regime(), Regime::Idle);
        assert!(!h.bridge.snapshots.is_running());
        assert!(!h.bridge.active);
        assert_eq!(h.bridge.snapshots.reference(), Some("https://img/1.jpg"));

        h.run_until(10.5).await;
        assert_eq!(h.poll_offsets(), vec![0]);

        // Closed at 1s, so the relink lands at 11s and forces a fresh presence
        h.run_until(11.5).await;
        assert_eq!(h.login_offsets(), vec![0, 11_000]);
        assert_eq!(h.poll_offsets(), vec![0, 11_000]);
        assert_eq!(h.forces(), vec![true, true]);
        assert_eq!(h.last_snapshot_seen().as_deref(), Some("https://img/1.jpg"));
        assert_eq!(h.snapshot_offsets(), vec![0, 11_000]);
        assert_eq!(h.bridge.snapshots.reference(), Some("https://img/1.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cancelled_mid_flight_is_not_applied() {
        let mut h = Harness::new(
            FakeMedia::slow(true, Duration::from_secs(3)),
            FakeConnector::failing_first(0),
        );

        h.run_until(1.0).await;
        h.connector.close_transport();
        h.run_until(4.0).await;

        assert_eq!(h.poll_offsets(), vec![0]);
        assert!(h.forces().is_empty());
        assert_eq!(h.bridge.poll.regime(), Regime::Idle);
        assert!(!h.bridge.snapshots.is_running());
        assert!(!h.bridge.active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_retries_every_ten_seconds() {
        let mut h = Harness::new(FakeMedia::new(true), FakeConnector::failing_first(2));

        h.run_until(25.0).await;

        assert_eq!(h.login_offsets(), vec![0, 10_000, 20_000]);
        assert!(h.bridge.link.session().is_some());
        assert!(h.bridge.link.retry_timer().is_none());
        assert_eq!(h.poll_offsets(), vec![20_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_destroys_live_session() {
        let mut h = Harness::new(FakeMedia::new(true), FakeConnector::failing_first(0));

        h.run_until(1.0).await;
        h.shut_down().await;

        assert_eq!(h.connector.session(0).destroyed(), 1);
        assert!(h.bridge.link.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_when_teardown_fails() {
        let mut h = Harness::new(FakeMedia::new(true), FakeConnector::failing_destroy());

        h.run_until(1.0).await;
        h.shut_down().await;

        assert_eq!(h.connector.session(0).destroyed(), 1);
        assert!(h.bridge.link.session().is_none());
    }
}
