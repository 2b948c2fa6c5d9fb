//! Crash Engine
//!
//! The authoritative state machine for crash mode. One tokio task owns all
//! round state; clients talk to it through a command channel and listen on
//! a broadcast channel. There is exactly one timer: a deadline that is
//! re-armed at every phase transition and at every tick.
//!
//! Phase walk: Waiting -> Starting -> Betting -> Playing -> Settling and
//! back around. Betting -> Playing additionally requires a public seed
//! from the entropy collaborator; if it cannot be fetched within the
//! configured attempts the round aborts and every stake is refunded. There
//! is no local fallback.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::boundary::balance::BalanceStore;
use crate::boundary::entropy::EntropySource;
use crate::boundary::persistence::{RoundPatch, RoundStore, StoreError};
use crate::core::{duration_ms, growth_multiplier, DEFAULT_GROWTH_K};
use crate::fairness::crash_point::{derive_crash_point, DEFAULT_HOUSE_EDGE_PERCENT};
use crate::fairness::seed::commit;
use crate::game::events::{RoundEvent, WagerOutcome, WagerPublic};
use crate::game::ledger::{JoinOutcome, Ledger, LedgerError};
use crate::game::round::{GameMode, Phase, PlayerId, Round, RoundId, RoundStatus, WagerStatus};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine timing and channel configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Pause between round creation (commit published) and betting.
    pub starting_pause: Duration,
    /// Length of the betting window.
    pub betting_window: Duration,
    /// Multiplier broadcast cadence while playing (crash mode).
    pub tick_interval: Duration,
    /// Pause after settlement before the next round is created.
    pub settle_pause: Duration,
    /// Exponential growth constant (per millisecond).
    pub growth_k: f64,
    /// House edge as a percentage (4.0 = 1-in-25 instant crash).
    pub house_edge_percent: f64,
    /// Per-attempt timeout for the public seed fetch.
    pub entropy_timeout: Duration,
    /// Seed fetch attempts before the round aborts.
    pub entropy_attempts: u32,
    /// Persistence write attempts before giving up.
    pub persist_attempts: u32,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// Event broadcast capacity.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    /// Crash-mode timings: quick cycles, live ticks.
    fn default() -> Self {
        Self {
            starting_pause: Duration::from_secs(4),
            betting_window: Duration::from_secs(6),
            tick_interval: Duration::from_millis(150),
            settle_pause: Duration::from_secs(4),
            growth_k: DEFAULT_GROWTH_K,
            house_edge_percent: DEFAULT_HOUSE_EDGE_PERCENT,
            entropy_timeout: Duration::from_secs(5),
            entropy_attempts: 3,
            persist_attempts: 3,
            command_buffer: 256,
            event_buffer: 512,
        }
    }
}

impl EngineConfig {
    /// Slide-mode timings: long betting window, one reveal instead of ticks.
    pub fn slide_defaults() -> Self {
        Self {
            starting_pause: Duration::from_secs(1),
            betting_window: Duration::from_secs(20),
            settle_pause: Duration::from_secs(10),
            ..Self::default()
        }
    }
}

/// External collaborators the engines run against.
#[derive(Clone)]
pub struct EngineDeps {
    /// Public seed oracle.
    pub entropy: Arc<dyn EntropySource>,
    /// Player balance store.
    pub balances: Arc<dyn BalanceStore>,
    /// Round persistence.
    pub store: Arc<dyn RoundStore>,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Errors surfaced through an [`EngineHandle`].
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    /// A game-rule rejection.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The engine task is gone.
    #[error("engine stopped")]
    Stopped,
}

/// Point-in-time view of an engine, served over the command channel.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EngineSnapshot {
    /// Game mode.
    pub mode: GameMode,
    /// Current phase.
    pub phase: Phase,
    /// Current round, if one exists.
    pub round_id: Option<RoundId>,
    /// Published commit hash for the current round.
    pub private_hash: Option<String>,
    /// Live multiplier (crash mode, while playing).
    pub multiplier: Option<u64>,
    /// Wagers riding the current round.
    pub players: Vec<WagerPublic>,
    /// Wagers queued for the next round.
    pub queued: usize,
}

pub(crate) enum Command {
    Join {
        player: PlayerId,
        stake: u64,
        currency: String,
        target: Option<u64>,
        reply: oneshot::Sender<Result<JoinOutcome, LedgerError>>,
    },
    Cancel {
        player: PlayerId,
        reply: oneshot::Sender<Result<u64, LedgerError>>,
    },
    CashOut {
        player: PlayerId,
        reply: oneshot::Sender<Result<(u64, u64), LedgerError>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
}

/// Cloneable front door to one engine task.
///
/// The task runs for as long as at least one handle is alive; dropping the
/// last handle aborts any in-flight round (with refunds) and stops it.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<RoundEvent>,
}

impl EngineHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<RoundEvent>,
    ) -> Self {
        Self { commands, events }
    }

    /// Place a wager. Outside a betting window the wager queues for the
    /// next round; either way the stake is debited immediately.
    pub async fn join(
        &self,
        player: PlayerId,
        stake: u64,
        currency: String,
        target: Option<u64>,
    ) -> Result<JoinOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Join { player, stake, currency, target, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?.map_err(EngineError::from)
    }

    /// Cancel an unstarted wager; returns the refunded stake.
    pub async fn cancel(&self, player: PlayerId) -> Result<u64, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Cancel { player, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?.map_err(EngineError::from)
    }

    /// Cash out at the engine-clock multiplier; returns (multiplier, payout).
    pub async fn cash_out(&self, player: PlayerId) -> Result<(u64, u64), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::CashOut { player, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?.map_err(EngineError::from)
    }

    /// Snapshot the engine state.
    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// SHARED CORE
// =============================================================================

/// State and plumbing shared by the crash and slide engines: the ledger,
/// the current round, persistence with bounded retries, the abort path and
/// command dispatch. The mode-specific run loops live in the engines.
pub(crate) struct EngineCore {
    pub(crate) mode: GameMode,
    pub(crate) config: EngineConfig,
    pub(crate) deps: EngineDeps,
    pub(crate) ledger: Ledger,
    pub(crate) round: Option<Round>,
    pub(crate) phase: Phase,
    pub(crate) require_target: bool,
    pub(crate) events: broadcast::Sender<RoundEvent>,
}

impl EngineCore {
    pub(crate) fn new(
        mode: GameMode,
        config: EngineConfig,
        deps: EngineDeps,
        events: broadcast::Sender<RoundEvent>,
    ) -> Self {
        Self {
            mode,
            config,
            deps,
            ledger: Ledger::new(),
            round: None,
            phase: Phase::Waiting,
            require_target: mode == GameMode::Slide,
            events,
        }
    }

    pub(crate) fn broadcast(&self, event: RoundEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Create the next round: fresh commit, pending queue promoted, record
    /// persisted, commit hash published. On persistence failure the
    /// promoted wagers are refunded and the engine stays idle.
    pub(crate) async fn begin_round(&mut self) -> bool {
        let round = Round::new(commit());
        let promoted = self.ledger.promote_pending();
        let record = round.to_record(RoundStatus::Bet, promoted);

        if !self.persist_save(record).await {
            self.ledger.refund_open(round.id, self.deps.balances.as_ref()).await;
            self.ledger.drain_round();
            self.broadcast(RoundEvent::RoundAborted {
                mode: self.mode,
                round_id: round.id,
                reason: "persistence_unavailable".into(),
            });
            self.phase = Phase::Waiting;
            return false;
        }

        let countdown = self.config.starting_pause + self.config.betting_window;
        info!(
            mode = %self.mode,
            round_id = %round.id,
            hash = %round.commit.private_hash,
            "round committed"
        );
        self.broadcast(RoundEvent::RoundStarting {
            mode: self.mode,
            round_id: round.id,
            private_hash: round.commit.private_hash.clone(),
            countdown_ms: countdown.as_millis() as u64,
        });
        self.round = Some(round);
        self.phase = Phase::Starting;
        true
    }

    /// Open the betting window and publish the current wager set.
    pub(crate) fn open_betting(&mut self) {
        self.phase = Phase::Betting;
        if let Some(round) = &mut self.round {
            round.phase = Phase::Betting;
        }
        let players = self.ledger.round_wagers().iter().map(WagerPublic::from).collect();
        self.broadcast(RoundEvent::RoundBets { mode: self.mode, players });
    }

    /// Fetch the public seed, bounded by the configured attempts. Returns
    /// a stable abort reason on exhaustion.
    pub(crate) async fn fetch_public_seed(&self) -> Result<String, &'static str> {
        for attempt in 1..=self.config.entropy_attempts {
            match timeout(self.config.entropy_timeout, self.deps.entropy.public_seed()).await {
                Ok(Ok(seed)) => return Ok(seed),
                Ok(Err(e)) => warn!(mode = %self.mode, attempt, "entropy fetch failed: {}", e),
                Err(_) => warn!(mode = %self.mode, attempt, "entropy fetch timed out"),
            }
        }
        Err("entropy_unavailable")
    }

    /// Reveal: pair the commit with the public seed and derive the crash
    /// point. Persists the reveal before any wager is activated.
    pub(crate) async fn reveal(&mut self, public_seed: String) -> Option<u64> {
        let (round_id, crash) = match &self.round {
            Some(round) => (
                round.id,
                derive_crash_point(
                    &round.commit.private_seed,
                    &public_seed,
                    self.config.house_edge_percent,
                ),
            ),
            None => return None,
        };

        let patch = RoundPatch {
            public_seed: Some(public_seed.clone()),
            crash_point: Some(crash),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        if !self.persist_patch(round_id, patch).await {
            self.abort_round("persistence_unavailable").await;
            return None;
        }

        if let Some(round) = &mut self.round {
            round.public_seed = Some(public_seed);
            round.crash_point = Some(crash);
        }
        debug!(mode = %self.mode, round_id = %round_id, crash_point = crash, "crash point derived");
        Some(crash)
    }

    /// Settle the round normally: remaining open wagers lose, the terminal
    /// record is persisted, and the full proof is published.
    pub(crate) async fn finish_round(&mut self) {
        let round = match self.round.take() {
            Some(round) => round,
            None => return,
        };
        self.ledger.settle_remaining_lost();
        let wagers = self.ledger.drain_round();

        let patch = RoundPatch {
            status: Some(RoundStatus::End),
            wagers: Some(wagers.clone()),
            ..Default::default()
        };
        if !self.persist_patch(round.id, patch).await {
            // Payouts already landed; the record stays non-terminal and is
            // picked up by startup recovery audits.
            error!(mode = %self.mode, round_id = %round.id, "failed to persist settled round");
        }

        let crash_point = round.crash_point.unwrap_or(0);
        info!(
            mode = %self.mode,
            round_id = %round.id,
            crash_point,
            wagers = wagers.len(),
            "round settled"
        );
        self.broadcast(RoundEvent::RoundEnd {
            mode: self.mode,
            round_id: round.id,
            crash_point,
            private_seed: round.commit.private_seed,
            public_seed: round.public_seed.unwrap_or_default(),
            results: wagers.iter().map(WagerOutcome::from).collect(),
        });
        self.phase = Phase::Settling;
    }

    /// Abort the current round: refund every open wager, persist the
    /// refund, publish the abort. The engine returns to Waiting.
    pub(crate) async fn abort_round(&mut self, reason: &str) {
        let round = match self.round.take() {
            Some(round) => round,
            None => {
                self.phase = Phase::Waiting;
                return;
            }
        };

        warn!(mode = %self.mode, round_id = %round.id, reason, "aborting round");
        self.ledger.refund_open(round.id, self.deps.balances.as_ref()).await;
        let wagers = self.ledger.drain_round();

        let patch = RoundPatch {
            status: Some(RoundStatus::Refund),
            wagers: Some(wagers),
            ..Default::default()
        };
        if !self.persist_patch(round.id, patch).await {
            error!(mode = %self.mode, round_id = %round.id, "failed to persist aborted round");
        }

        self.broadcast(RoundEvent::RoundAborted {
            mode: self.mode,
            round_id: round.id,
            reason: reason.into(),
        });
        self.phase = Phase::Waiting;
    }

    /// Dispatch one command.
    ///
    /// `cash_quote` is the multiplier a cash-out would lock in right now,
    /// or the rejection for it; only the crash engine ever quotes Ok.
    /// `live_multiplier` feeds the snapshot.
    pub(crate) async fn handle_command(
        &mut self,
        cmd: Command,
        cash_quote: Result<u64, LedgerError>,
        live_multiplier: Option<u64>,
    ) {
        match cmd {
            Command::Join { player, stake, currency, target, reply } => {
                let public = WagerPublic {
                    player: player.clone(),
                    stake,
                    currency: currency.clone(),
                    target,
                };
                let round_id = self.round.as_ref().map(|r| r.id);
                let result = self
                    .ledger
                    .join(
                        self.phase,
                        round_id,
                        player,
                        stake,
                        currency,
                        target,
                        self.require_target,
                        self.deps.balances.as_ref(),
                    )
                    .await;
                if result == Ok(JoinOutcome::Accepted) {
                    self.broadcast(RoundEvent::WagerPlaced { mode: self.mode, wager: public });
                }
                let _ = reply.send(result);
            }
            Command::Cancel { player, reply } => {
                let round_id = self.round.as_ref().map(|r| r.id);
                let result = self
                    .ledger
                    .cancel(self.phase, round_id, &player, self.deps.balances.as_ref())
                    .await;
                let _ = reply.send(result);
            }
            Command::CashOut { player, reply } => {
                let result = match (cash_quote, self.round.as_ref().map(|r| r.id)) {
                    (Ok(multiplier), Some(round_id)) => {
                        self.ledger
                            .cash_out(
                                self.phase,
                                round_id,
                                &player,
                                multiplier,
                                self.deps.balances.as_ref(),
                            )
                            .await
                    }
                    (Err(e), _) => Err(e),
                    (Ok(_), None) => Err(LedgerError::BadPhase),
                };
                if let Ok((multiplier, payout)) = &result {
                    self.broadcast(RoundEvent::WagerCashedOut {
                        mode: self.mode,
                        player: player.clone(),
                        multiplier: *multiplier,
                        payout: *payout,
                    });
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let snapshot = EngineSnapshot {
                    mode: self.mode,
                    phase: self.phase,
                    round_id: self.round.as_ref().map(|r| r.id),
                    private_hash: self.round.as_ref().map(|r| r.commit.private_hash.clone()),
                    multiplier: live_multiplier,
                    players: self.ledger.round_wagers().iter().map(WagerPublic::from).collect(),
                    queued: self.ledger.pending_len(),
                };
                let _ = reply.send(snapshot);
            }
        }
    }

    async fn persist_save(&self, record: crate::game::round::RoundRecord) -> bool {
        for attempt in 1..=self.config.persist_attempts {
            match self.deps.store.save_round(record.clone()).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(mode = %self.mode, attempt, "round save failed: {}", e);
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
        false
    }

    pub(crate) async fn persist_patch(&self, id: RoundId, patch: RoundPatch) -> bool {
        for attempt in 1..=self.config.persist_attempts {
            match self.deps.store.update_round(id, patch.clone()).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(mode = %self.mode, attempt, "round update failed: {}", e);
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
        false
    }
}

// =============================================================================
// CRASH ENGINE
// =============================================================================

/// The crash-mode engine task.
pub struct CrashEngine {
    core: EngineCore,
    commands: mpsc::Receiver<Command>,
    deadline: Instant,
    /// Engine clock for the live multiplier; set when Playing begins.
    playing_started: Option<Instant>,
    /// Milliseconds from Playing start until the crash fires.
    run_duration_ms: u64,
}

impl CrashEngine {
    /// Spawn the engine task; the first round starts after one settle pause.
    pub fn spawn(config: EngineConfig, deps: EngineDeps) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (event_tx, _) = broadcast::channel(config.event_buffer);

        let handle = EngineHandle::new(cmd_tx, event_tx.clone());
        let mut engine = CrashEngine {
            deadline: Instant::now() + config.settle_pause,
            core: EngineCore::new(GameMode::Crash, config, deps, event_tx),
            commands: cmd_rx,
            playing_started: None,
            run_duration_ms: 0,
        };
        tokio::spawn(async move { engine.run().await });
        handle
    }

    async fn run(&mut self) {
        info!("crash engine started");
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        let quote = self.cash_quote();
                        let live = quote.clone().ok();
                        self.core.handle_command(cmd, quote, live).await;
                    }
                    None => {
                        self.core.abort_round("engine_shutdown").await;
                        break;
                    }
                },

                _ = sleep_until(self.deadline) => self.advance().await,
            }
        }
        info!("crash engine stopped");
    }

    /// The multiplier a cash-out would lock in right now.
    fn cash_quote(&self) -> Result<u64, LedgerError> {
        if self.core.phase != Phase::Playing {
            return Err(LedgerError::BadPhase);
        }
        let crash = self
            .core
            .round
            .as_ref()
            .and_then(|r| r.crash_point)
            .ok_or(LedgerError::BadPhase)?;
        let elapsed = match self.playing_started {
            Some(start) => start.elapsed().as_millis() as u64,
            None => return Err(LedgerError::BadPhase),
        };
        if elapsed >= self.run_duration_ms {
            return Err(LedgerError::RoundCrashed);
        }
        let multiplier = growth_multiplier(elapsed, self.core.config.growth_k);
        if multiplier >= crash {
            // The curve caught the crash point between ticks.
            Err(LedgerError::RoundCrashed)
        } else {
            Ok(multiplier)
        }
    }

    async fn advance(&mut self) {
        match self.core.phase {
            Phase::Waiting | Phase::Settling => {
                if self.core.begin_round().await {
                    self.deadline = Instant::now() + self.core.config.starting_pause;
                } else {
                    self.deadline = Instant::now() + self.core.config.settle_pause;
                }
            }
            Phase::Starting => {
                self.core.open_betting();
                self.deadline = Instant::now() + self.core.config.betting_window;
            }
            Phase::Betting => {
                self.close_betting().await;
            }
            Phase::Playing => {
                self.tick().await;
            }
        }
    }

    /// Betting closed: fetch entropy, derive, reveal, start the clock.
    async fn close_betting(&mut self) {
        let seed = match self.core.fetch_public_seed().await {
            Ok(seed) => seed,
            Err(reason) => {
                self.core.abort_round(reason).await;
                self.deadline = Instant::now() + self.core.config.settle_pause;
                return;
            }
        };

        let crash = match self.core.reveal(seed.clone()).await {
            Some(crash) => crash,
            None => {
                // reveal() already aborted.
                self.deadline = Instant::now() + self.core.config.settle_pause;
                return;
            }
        };

        if let Some(round) = &self.core.round {
            self.core.broadcast(RoundEvent::SeedRevealed {
                mode: GameMode::Crash,
                round_id: round.id,
                public_seed: seed,
            });
        }

        self.core.ledger.activate_all();
        self.core.phase = Phase::Playing;
        // Run one notch past the crash point so the final tick lands on it.
        self.run_duration_ms = duration_ms(crash + 1, self.core.config.growth_k);
        let started = Instant::now();
        self.playing_started = Some(started);
        self.deadline = (started + self.core.config.tick_interval).min(self.crash_boundary());
    }

    /// Instant at which the round clock runs out. Tick deadlines are
    /// clamped to it so the final wakeup lands on the crash boundary
    /// instead of overshooting by a partial tick.
    fn crash_boundary(&self) -> Instant {
        match self.playing_started {
            Some(started) => started + Duration::from_millis(self.run_duration_ms),
            None => Instant::now(),
        }
    }

    /// One multiplier tick: auto cash-outs first, then broadcast, or the
    /// crash itself if the clock has run out.
    async fn tick(&mut self) {
        let crash = match self.core.round.as_ref().and_then(|r| r.crash_point) {
            Some(crash) => crash,
            None => {
                self.core.abort_round("internal_error").await;
                self.deadline = Instant::now() + self.core.config.settle_pause;
                return;
            }
        };
        let elapsed = self
            .playing_started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);

        if elapsed >= self.run_duration_ms {
            // Final sweep at the crash point itself: any target the last
            // broadcast tick had not reached but the curve did is still a
            // win, not a loss.
            self.sweep_auto_cashouts(crash, crash).await;
            self.playing_started = None;
            self.core.finish_round().await;
            self.deadline = Instant::now() + self.core.config.settle_pause;
            return;
        }

        let multiplier = growth_multiplier(elapsed, self.core.config.growth_k).min(crash);
        self.sweep_auto_cashouts(multiplier, crash).await;
        self.core.broadcast(RoundEvent::RoundTick {
            mode: GameMode::Crash,
            multiplier,
        });
        // Re-arm from the previous deadline so cadence does not drift,
        // clamped so the last tick lands exactly on the crash boundary.
        self.deadline = (self.deadline + self.core.config.tick_interval).min(self.crash_boundary());
    }

    /// Settle every armed target the curve has reached and broadcast the
    /// wins.
    async fn sweep_auto_cashouts(&mut self, current: u64, crash: u64) {
        let round_id = match self.core.round.as_ref().map(|r| r.id) {
            Some(id) => id,
            None => return,
        };
        let settled = self
            .core
            .ledger
            .run_auto_cashouts(round_id, current, crash, self.core.deps.balances.as_ref())
            .await;
        for auto in settled {
            self.core.broadcast(RoundEvent::WagerCashedOut {
                mode: GameMode::Crash,
                player: auto.player,
                multiplier: auto.multiplier,
                payout: auto.payout,
            });
        }
    }
}

// =============================================================================
// STARTUP RECOVERY
// =============================================================================

/// Refund every wager left open by an unclean shutdown and mark those
/// rounds refunded. Run once before the engines spawn. Idempotency keys
/// make a repeated run (or a crash mid-recovery) safe.
pub async fn recover_unfinished(
    store: &dyn RoundStore,
    balances: &dyn BalanceStore,
) -> Result<usize, StoreError> {
    let unfinished = store.find_unfinished_rounds().await?;
    let mut recovered = 0;

    for record in unfinished {
        let mut wagers = record.wagers.clone();
        let mut all_ok = true;
        for wager in &mut wagers {
            if !wager.status.is_open() {
                continue;
            }
            // Same key an engine-side refund would have used, so a crash
            // between a partial refund sweep and the status patch cannot
            // produce a double credit here.
            let key = format!("{}:{}:refund", record.id, wager.id);
            match balances.credit(&wager.player, wager.stake, &wager.currency, &key).await {
                Ok(()) => wager.status = WagerStatus::Refunded,
                Err(e) => {
                    warn!(round_id = %record.id, player = %wager.player, "recovery refund failed: {}", e);
                    all_ok = false;
                }
            }
        }
        if !all_ok {
            // Leave the round non-terminal; the next startup retries it.
            continue;
        }

        let patch = RoundPatch {
            status: Some(RoundStatus::Refund),
            wagers: Some(wagers),
            ..Default::default()
        };
        store.update_round(record.id, patch).await?;
        info!(round_id = %record.id, "recovered unfinished round");
        recovered += 1;
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::balance::InMemoryBalances;
    use crate::boundary::entropy::{EntropyError, LocalEntropy};
    use crate::boundary::persistence::InMemoryRoundStore;
    use crate::game::round::Wager;
    use async_trait::async_trait;

    struct FailingEntropy;

    #[async_trait]
    impl EntropySource for FailingEntropy {
        async fn public_seed(&self) -> Result<String, EntropyError> {
            Err(EntropyError::Unavailable("oracle down".into()))
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            starting_pause: Duration::from_millis(100),
            betting_window: Duration::from_millis(500),
            tick_interval: Duration::from_millis(50),
            settle_pause: Duration::from_millis(200),
            entropy_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        }
    }

    fn deps_with(
        entropy: Arc<dyn EntropySource>,
    ) -> (EngineDeps, Arc<InMemoryBalances>, Arc<InMemoryRoundStore>) {
        let balances = Arc::new(InMemoryBalances::new());
        let store = Arc::new(InMemoryRoundStore::new());
        let deps = EngineDeps {
            entropy,
            balances: balances.clone(),
            store: store.clone(),
        };
        (deps, balances, store)
    }

    async fn next_event(rx: &mut broadcast::Receiver<RoundEvent>) -> RoundEvent {
        timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed")
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_settles_with_checkable_proof() {
        let (deps, balances, store) = deps_with(Arc::new(LocalEntropy));
        let player = PlayerId::new("alice");
        balances.deposit(&player, "usd", 10_000).await;

        let handle = CrashEngine::spawn(fast_config(), deps);
        let mut events = handle.subscribe();

        // Commit published before anything else.
        let (round_id, hash) = match next_event(&mut events).await {
            RoundEvent::RoundStarting { round_id, private_hash, .. } => (round_id, private_hash),
            other => panic!("expected round_starting, got {:?}", other),
        };
        assert_eq!(hash.len(), 64);

        // Betting opens; arm an auto cash-out at the minimum target.
        match next_event(&mut events).await {
            RoundEvent::RoundBets { .. } => {}
            other => panic!("expected round_bets, got {:?}", other),
        }
        let outcome = handle
            .join(player.clone(), 1_000, "usd".into(), Some(101))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Accepted);
        assert_eq!(balances.balance_of(&player, "usd").await, 9_000);

        // Drain events until the round ends.
        let mut revealed_seed = None;
        let (crash_point, private_seed, public_seed, results) = loop {
            match next_event(&mut events).await {
                RoundEvent::SeedRevealed { public_seed, round_id: rid, .. } => {
                    assert_eq!(rid, round_id);
                    revealed_seed = Some(public_seed);
                }
                RoundEvent::RoundEnd { crash_point, private_seed, public_seed, results, .. } => {
                    break (crash_point, private_seed, public_seed, results)
                }
                _ => {}
            }
        };

        // The published pair re-derives the published crash point.
        assert_eq!(Some(public_seed.clone()), revealed_seed);
        assert_eq!(
            derive_crash_point(&private_seed, &public_seed, DEFAULT_HOUSE_EDGE_PERCENT),
            crash_point
        );
        assert_eq!(crate::fairness::seed::hash_seed(&private_seed), hash);

        // Settlement: target 101 wins unless the round instant-crashed.
        assert_eq!(results.len(), 1);
        if crash_point >= 101 {
            assert_eq!(results[0].status, WagerStatus::CashedOut);
            assert_eq!(balances.balance_of(&player, "usd").await, 9_000 + 1_010);
        } else {
            assert_eq!(crash_point, 100);
            assert_eq!(results[0].status, WagerStatus::Lost);
            assert_eq!(balances.balance_of(&player, "usd").await, 9_000);
        }

        // Persisted record is terminal and carries the proof.
        let record = store.find_round(round_id).await.unwrap().unwrap();
        assert_eq!(record.status, RoundStatus::End);
        assert_eq!(record.crash_point, Some(crash_point));
        assert_eq!(record.public_seed, Some(public_seed));
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_sweep_wins_targets_no_tick_reached() {
        let (deps, balances, _) = deps_with(Arc::new(LocalEntropy));
        let player = PlayerId::new("dave");
        balances.deposit(&player, "usd", 10_000).await;

        // Tick interval far longer than any round: the only playing-phase
        // wakeup is the settlement one, so the win must come from the
        // final sweep, not a broadcast tick.
        let config = EngineConfig {
            tick_interval: Duration::from_secs(3_600),
            ..fast_config()
        };
        let handle = CrashEngine::spawn(config, deps);
        let mut events = handle.subscribe();

        loop {
            if let RoundEvent::RoundBets { .. } = next_event(&mut events).await {
                break;
            }
        }
        handle
            .join(player.clone(), 1_000, "usd".into(), Some(101))
            .await
            .unwrap();

        let (crash_point, results) = loop {
            if let RoundEvent::RoundEnd { crash_point, results, .. } = next_event(&mut events).await
            {
                break (crash_point, results);
            }
        };

        assert_eq!(results.len(), 1);
        if crash_point >= 101 {
            assert_eq!(results[0].status, WagerStatus::CashedOut);
            assert_eq!(results[0].stopped_at, Some(101));
            assert_eq!(balances.balance_of(&player, "usd").await, 9_000 + 1_010);
        } else {
            assert_eq!(crash_point, 100);
            assert_eq!(results[0].status, WagerStatus::Lost);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entropy_failure_aborts_and_refunds() {
        let (deps, balances, store) = deps_with(Arc::new(FailingEntropy));
        let player = PlayerId::new("bob");
        balances.deposit(&player, "usd", 5_000).await;

        let handle = CrashEngine::spawn(fast_config(), deps);
        let mut events = handle.subscribe();

        let round_id = match next_event(&mut events).await {
            RoundEvent::RoundStarting { round_id, .. } => round_id,
            other => panic!("expected round_starting, got {:?}", other),
        };
        match next_event(&mut events).await {
            RoundEvent::RoundBets { .. } => {}
            other => panic!("expected round_bets, got {:?}", other),
        }
        handle.join(player.clone(), 2_000, "usd".into(), None).await.unwrap();
        assert_eq!(balances.balance_of(&player, "usd").await, 3_000);

        // Betting closes, the oracle never answers, the round aborts.
        loop {
            match next_event(&mut events).await {
                RoundEvent::RoundAborted { round_id: rid, reason, .. } => {
                    assert_eq!(rid, round_id);
                    assert_eq!(reason, "entropy_unavailable");
                    break;
                }
                RoundEvent::SeedRevealed { .. } | RoundEvent::RoundEnd { .. } => {
                    panic!("round must not play without external entropy")
                }
                _ => {}
            }
        }

        assert_eq!(balances.balance_of(&player, "usd").await, 5_000);
        let record = store.find_round(round_id).await.unwrap().unwrap();
        assert_eq!(record.status, RoundStatus::Refund);
        assert!(record.wagers.iter().all(|w| w.status == WagerStatus::Refunded));
    }

    #[tokio::test(start_paused = true)]
    async fn join_outside_betting_queues_for_next_round() {
        let (deps, balances, _) = deps_with(Arc::new(LocalEntropy));
        let player = PlayerId::new("carol");
        balances.deposit(&player, "usd", 1_000).await;

        let handle = CrashEngine::spawn(fast_config(), deps);

        // No round exists yet: the wager queues, the stake moves now.
        let outcome = handle.join(player.clone(), 400, "usd".into(), None).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Queued);
        assert_eq!(balances.balance_of(&player, "usd").await, 600);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.queued, 1);

        // The queued wager rides the next round's betting window.
        let mut events = handle.subscribe();
        loop {
            if let RoundEvent::RoundBets { players, .. } = next_event(&mut events).await {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].player, player);
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manual_cash_out_rejected_outside_playing() {
        let (deps, balances, _) = deps_with(Arc::new(LocalEntropy));
        let player = PlayerId::new("dave");
        balances.deposit(&player, "usd", 1_000).await;

        let handle = CrashEngine::spawn(fast_config(), deps);

        let result = handle.cash_out(player).await;
        assert_eq!(result, Err(EngineError::Ledger(LedgerError::BadPhase)));
    }

    #[tokio::test]
    async fn recovery_refunds_rounds_left_open() {
        let balances = InMemoryBalances::new();
        let store = InMemoryRoundStore::new();
        let player = PlayerId::new("eve");

        // A round that was mid-play when the process died.
        let mut round = Round::new(commit());
        round.public_seed = Some("feed".into());
        round.crash_point = Some(250);
        let mut wager = Wager::new(player.clone(), 800, "usd".into(), None);
        wager.status = WagerStatus::Active;
        let record = round.to_record(RoundStatus::Bet, vec![wager]);
        store.preload(record).await;

        let recovered = recover_unfinished(&store, &balances).await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(balances.balance_of(&player, "usd").await, 800);

        let stored = store.find_round(round.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RoundStatus::Refund);
        assert_eq!(stored.wagers[0].status, WagerStatus::Refunded);

        // Running recovery twice must not double-refund.
        let again = recover_unfinished(&store, &balances).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(balances.balance_of(&player, "usd").await, 800);
    }

    #[tokio::test]
    async fn recovery_ignores_terminal_rounds() {
        let balances = InMemoryBalances::new();
        let store = InMemoryRoundStore::new();

        let round = Round::new(commit());
        let record = round.to_record(RoundStatus::End, Vec::new());
        store.preload(record).await;

        let recovered = recover_unfinished(&store, &balances).await.unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn snapshot_reports_waiting_engine() {
        let (deps, _, _) = deps_with(Arc::new(LocalEntropy));
        let handle = CrashEngine::spawn(fast_config(), deps);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.mode, GameMode::Crash);
        assert_eq!(snapshot.phase, Phase::Waiting);
        assert!(snapshot.round_id.is_none());
    }
}
