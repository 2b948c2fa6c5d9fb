//! Slide Engine
//!
//! The delayed-reveal variant. Same commit/reveal fairness and the same
//! ledger as crash mode, but there is no live multiplier: every wager
//! locks a target during the betting window, the crash point is derived
//! as soon as betting opens (it is fixed by the commit, so knowing it
//! early changes nothing), and the result is revealed in one step at the
//! end of the window. Targets at or below the crash point win at exactly
//! their target; everything else loses. There is no manual cash-out.

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::info;

use crate::game::engine::{Command, EngineConfig, EngineCore, EngineDeps, EngineHandle};
use crate::game::events::RoundEvent;
use crate::game::ledger::LedgerError;
use crate::game::round::{GameMode, Phase};

/// The slide-mode engine task.
pub struct SlideEngine {
    core: EngineCore,
    commands: mpsc::Receiver<Command>,
    deadline: Instant,
}

impl SlideEngine {
    /// Spawn the engine task; the first round starts after one settle pause.
    pub fn spawn(config: EngineConfig, deps: EngineDeps) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (event_tx, _) = broadcast::channel(config.event_buffer);

        let handle = EngineHandle::new(cmd_tx, event_tx.clone());
        let mut engine = SlideEngine {
            deadline: Instant::now() + config.settle_pause,
            core: EngineCore::new(GameMode::Slide, config, deps, event_tx),
            commands: cmd_rx,
        };
        tokio::spawn(async move { engine.run().await });
        handle
    }

    async fn run(&mut self) {
        info!("slide engine started");
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        // Slide never quotes a live multiplier.
                        self.core.handle_command(cmd, Err(LedgerError::BadPhase), None).await;
                    }
                    None => {
                        self.core.abort_round("engine_shutdown").await;
                        break;
                    }
                },

                _ = sleep_until(self.deadline) => self.advance().await,
            }
        }
        info!("slide engine stopped");
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
                self.open_betting().await;
            }
            Phase::Betting => {
                self.reveal_and_settle().await;
                self.deadline = Instant::now() + self.core.config.settle_pause;
            }
            // Slide never parks in Playing; reveal settles synchronously.
            Phase::Playing => {
                self.deadline = Instant::now() + self.core.config.settle_pause;
            }
        }
    }

    /// Betting opens; the outcome is derived now, revealed later. If the
    /// oracle cannot be reached there is nothing fair to sell, so the
    /// round aborts before a single wager is taken.
    async fn open_betting(&mut self) {
        let seed = match self.core.fetch_public_seed().await {
            Ok(seed) => seed,
            Err(reason) => {
                self.core.abort_round(reason).await;
                self.deadline = Instant::now() + self.core.config.settle_pause;
                return;
            }
        };
        if self.core.reveal(seed).await.is_none() {
            self.deadline = Instant::now() + self.core.config.settle_pause;
            return;
        }
        self.core.open_betting();
        self.deadline = Instant::now() + self.core.config.betting_window;
    }

    /// Betting closed: publish the seed, settle every target, publish the
    /// full result.
    async fn reveal_and_settle(&mut self) {
        let (round_id, public_seed, crash_point) = match &self.core.round {
            Some(round) => match (&round.public_seed, round.crash_point) {
                (Some(seed), Some(crash)) => (round.id, seed.clone(), crash),
                _ => {
                    self.core.abort_round("internal_error").await;
                    return;
                }
            },
            None => return,
        };

        self.core.ledger.activate_all();
        self.core.phase = Phase::Playing;
        self.core.broadcast(RoundEvent::SeedRevealed {
            mode: GameMode::Slide,
            round_id,
            public_seed,
        });

        let winners = self
            .core
            .ledger
            .settle_targets(round_id, crash_point, self.core.deps.balances.as_ref())
            .await;
        for win in winners {
            self.core.broadcast(RoundEvent::WagerCashedOut {
                mode: GameMode::Slide,
                player: win.player,
                multiplier: win.multiplier,
                payout: win.payout,
            });
        }

        self.core.finish_round().await;
    }
}
