//! Player Ledger
//!
//! Wager bookkeeping for one engine: the current round's wager set and the
//! pending queue for the next round. Lives inside the engine task, so no
//! locking - every mutation is serialized through the owning task.
//!
//! Money moves through the external balance collaborator. Stakes are
//! debited at submission (queued wagers included, so promotion is pure
//! state motion), and every call carries an idempotency key so at-least-
//! once retries cannot double-move funds.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::boundary::balance::{BalanceStore, DebitOutcome};
use crate::game::round::{Phase, PlayerId, RoundId, Wager, WagerStatus};

/// Rejections surfaced to callers. Stable codes, human messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The requested action is not valid in the current phase.
    #[error("action not allowed in the current game phase")]
    BadPhase,

    /// One wager per player per round; duplicates rejected, not merged.
    #[error("player already joined this round")]
    AlreadyJoined,

    /// The balance collaborator declined the debit.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// The player holds no wager to act on.
    #[error("no wager found for player")]
    NoWager,

    /// The wager already reached a terminal status (e.g. repeated cash-out).
    #[error("wager already settled")]
    AlreadySettled,

    /// Cash-out arrived after the round crashed; never honored retroactively.
    #[error("round already crashed")]
    RoundCrashed,

    /// Stake must be positive.
    #[error("stake must be positive")]
    InvalidStake,

    /// Target multiplier below 1.01x (or missing where required).
    #[error("target multiplier must be at least 1.01x")]
    InvalidTarget,

    /// Balance collaborator unreachable; nothing was mutated.
    #[error("balance store unavailable")]
    BalanceUnavailable,
}

impl LedgerError {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::BadPhase => "bad_phase",
            LedgerError::AlreadyJoined => "already_joined",
            LedgerError::InsufficientBalance => "insufficient_balance",
            LedgerError::NoWager => "no_wager",
            LedgerError::AlreadySettled => "already_settled",
            LedgerError::RoundCrashed => "round_crashed",
            LedgerError::InvalidStake => "invalid_stake",
            LedgerError::InvalidTarget => "invalid_target",
            LedgerError::BalanceUnavailable => "balance_unavailable",
        }
    }
}

/// How a join request landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Wager rides the current round.
    Accepted,
    /// Round not accepting bets; wager queued for the next round.
    Queued,
}

/// An auto-cash-out settled during a tick.
#[derive(Clone, Debug)]
pub struct AutoCashOut {
    /// Winning player.
    pub player: PlayerId,
    /// Multiplier locked in (exactly the target), hundredths.
    pub multiplier: u64,
    /// Amount credited.
    pub payout: u64,
}

/// Wager bookkeeping for one game mode.
#[derive(Default)]
pub struct Ledger {
    /// Wagers riding the current round, keyed by player.
    wagers: BTreeMap<PlayerId, Wager>,
    /// Wagers submitted outside a betting window, in arrival order.
    pending: Vec<Wager>,
}

impl Ledger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued wagers.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of the current round's wagers.
    pub fn round_wagers(&self) -> Vec<Wager> {
        self.wagers.values().cloned().collect()
    }

    /// Submit a wager.
    ///
    /// During `Betting` the wager joins the current round; any other phase
    /// queues it for the next round. Either way the stake is debited before
    /// acceptance is finalized - a failed debit rejects with no state
    /// mutation.
    #[allow(clippy::too_many_arguments)]
    pub async fn join(
        &mut self,
        phase: Phase,
        round_id: Option<RoundId>,
        player: PlayerId,
        stake: u64,
        currency: String,
        target: Option<u64>,
        require_target: bool,
        balances: &dyn BalanceStore,
    ) -> Result<JoinOutcome, LedgerError> {
        if stake == 0 {
            return Err(LedgerError::InvalidStake);
        }
        match target {
            Some(t) if t < 101 => return Err(LedgerError::InvalidTarget),
            None if require_target => return Err(LedgerError::InvalidTarget),
            _ => {}
        }

        if phase == Phase::Betting {
            let round_id = round_id.ok_or(LedgerError::BadPhase)?;
            if self.wagers.contains_key(&player) {
                return Err(LedgerError::AlreadyJoined);
            }

            // Keyed by the wager id, not the player: a join after a
            // cancelled join in the same round is a distinct movement and
            // must not replay the first debit.
            let wager = Wager::new(player.clone(), stake, currency.clone(), target);
            let key = format!("{}:{}:bet", round_id, wager.id);
            self.debit(&player, stake, &currency, &key, balances).await?;

            self.wagers.insert(player, wager);
            Ok(JoinOutcome::Accepted)
        } else {
            if self.pending.iter().any(|w| w.player == player) {
                return Err(LedgerError::AlreadyJoined);
            }

            let wager = Wager::new(player.clone(), stake, currency.clone(), target);
            let key = format!("pending:{}:bet", wager.id);
            self.debit(&player, stake, &currency, &key, balances).await?;

            self.pending.push(wager);
            Ok(JoinOutcome::Queued)
        }
    }

    /// Cancel a wager and credit the stake back.
    ///
    /// Valid for a queued wager at any time, or for a current-round wager
    /// while the round has not left `Betting`.
    pub async fn cancel(
        &mut self,
        phase: Phase,
        round_id: Option<RoundId>,
        player: &PlayerId,
        balances: &dyn BalanceStore,
    ) -> Result<u64, LedgerError> {
        if let Some(pos) = self.pending.iter().position(|w| &w.player == player) {
            let mut wager = self.pending.remove(pos);
            let key = format!("pending:{}:refund", wager.id);
            self.credit(player, wager.stake, &wager.currency, &key, balances)
                .await?;
            wager.status = WagerStatus::Refunded;
            return Ok(wager.stake);
        }

        match self.wagers.get(player) {
            None => Err(LedgerError::NoWager),
            Some(_) if phase != Phase::Betting => Err(LedgerError::BadPhase),
            Some(wager) => {
                let round_id = round_id.ok_or(LedgerError::BadPhase)?;
                let (stake, currency) = (wager.stake, wager.currency.clone());
                let key = format!("{}:{}:refund", round_id, wager.id);
                self.credit(player, stake, &currency, &key, balances).await?;
                self.wagers.remove(player);
                Ok(stake)
            }
        }
    }

    /// Promote the whole pending queue into a new round's wager set.
    ///
    /// Called exactly once per round at creation; the queue is never split
    /// across two rounds. Returns the promoted wagers.
    pub fn promote_pending(&mut self) -> Vec<Wager> {
        debug_assert!(self.wagers.is_empty(), "previous round not drained");
        let promoted: Vec<Wager> = self.pending.drain(..).collect();
        for wager in &promoted {
            self.wagers.insert(wager.player.clone(), wager.clone());
        }
        promoted
    }

    /// Transition every pending wager to active (round entered Playing).
    pub fn activate_all(&mut self) {
        for wager in self.wagers.values_mut() {
            if wager.status == WagerStatus::Pending {
                wager.status = WagerStatus::Active;
            }
        }
    }

    /// Manual cash-out at the engine-clock multiplier.
    ///
    /// `multiplier` must already be validated against the crash point by
    /// the engine. Idempotent: a second attempt finds the wager settled
    /// and rejects without a second credit.
    pub async fn cash_out(
        &mut self,
        phase: Phase,
        round_id: RoundId,
        player: &PlayerId,
        multiplier: u64,
        balances: &dyn BalanceStore,
    ) -> Result<(u64, u64), LedgerError> {
        if phase != Phase::Playing {
            return Err(LedgerError::BadPhase);
        }

        let wager = self.wagers.get(player).ok_or(LedgerError::NoWager)?;
        if wager.status != WagerStatus::Active {
            return Err(LedgerError::AlreadySettled);
        }

        let payout = wager.payout_at(multiplier);
        let (currency, key) = (
            wager.currency.clone(),
            format!("{}:{}:cashout", round_id, wager.id),
        );
        self.credit(player, payout, &currency, &key, balances).await?;

        // Credit landed; now safe to mark settled.
        let wager = self
            .wagers
            .get_mut(player)
            .ok_or(LedgerError::NoWager)?;
        wager.status = WagerStatus::CashedOut;
        wager.stopped_at = Some(multiplier);
        Ok((multiplier, payout))
    }

    /// Settle every armed auto-cash-out whose target has been reached.
    ///
    /// A target is won at exactly the target multiplier (ties favor the
    /// player) and only if it does not exceed the round's true crash point
    /// - a target above the crash point loses, never gets capped.
    pub async fn run_auto_cashouts(
        &mut self,
        round_id: RoundId,
        current: u64,
        crash_point: u64,
        balances: &dyn BalanceStore,
    ) -> Vec<AutoCashOut> {
        let due: Vec<PlayerId> = self
            .wagers
            .values()
            .filter(|w| w.status == WagerStatus::Active)
            .filter(|w| match w.target {
                Some(t) => (101..=current).contains(&t) && t <= crash_point,
                None => false,
            })
            .map(|w| w.player.clone())
            .collect();

        let mut settled = Vec::with_capacity(due.len());
        for player in due {
            let (wager_id, target, payout, currency) = {
                let wager = match self.wagers.get(&player) {
                    Some(w) => w,
                    None => continue,
                };
                let target = wager.target.unwrap_or(0);
                (wager.id, target, wager.payout_at(target), wager.currency.clone())
            };

            let key = format!("{}:{}:cashout", round_id, wager_id);
            if let Err(e) = balances.credit(&player, payout, &currency, &key).await {
                // Leave the wager active; the key makes the retry safe on
                // the next tick.
                warn!("auto cash-out credit failed for {}: {}", player, e);
                continue;
            }

            if let Some(wager) = self.wagers.get_mut(&player) {
                wager.status = WagerStatus::CashedOut;
                wager.stopped_at = Some(target);
            }
            settled.push(AutoCashOut {
                player,
                multiplier: target,
                payout,
            });
        }
        settled
    }

    /// Settle a slide round: targets at or below the crash point win at
    /// exactly their target, everything else loses.
    pub async fn settle_targets(
        &mut self,
        round_id: RoundId,
        crash_point: u64,
        balances: &dyn BalanceStore,
    ) -> Vec<AutoCashOut> {
        let winners = self
            .run_auto_cashouts(round_id, crash_point, crash_point, balances)
            .await;
        self.settle_remaining_lost();
        winners
    }

    /// Mark every still-open wager as lost (crash reached).
    pub fn settle_remaining_lost(&mut self) {
        for wager in self.wagers.values_mut() {
            if wager.status.is_open() {
                wager.status = WagerStatus::Lost;
            }
        }
    }

    /// Refund every open wager (round abort). Credits are retried a few
    /// times; the idempotency key keeps retries single-shot.
    pub async fn refund_open(&mut self, round_id: RoundId, balances: &dyn BalanceStore) -> usize {
        let mut refunded = 0;
        for wager in self.wagers.values_mut() {
            if !wager.status.is_open() {
                continue;
            }
            let key = format!("{}:{}:refund", round_id, wager.id);
            let mut ok = false;
            for _ in 0..3 {
                match balances
                    .credit(&wager.player, wager.stake, &wager.currency, &key)
                    .await
                {
                    Ok(()) => {
                        ok = true;
                        break;
                    }
                    Err(e) => warn!("refund credit failed for {}: {}", wager.player, e),
                }
            }
            if ok {
                wager.status = WagerStatus::Refunded;
                refunded += 1;
            }
        }
        refunded
    }

    /// Drain the round's wagers for persistence, clearing for the next
    /// round. Queued wagers are unaffected.
    pub fn drain_round(&mut self) -> Vec<Wager> {
        std::mem::take(&mut self.wagers).into_values().collect()
    }

    async fn debit(
        &self,
        player: &PlayerId,
        amount: u64,
        currency: &str,
        key: &str,
        balances: &dyn BalanceStore,
    ) -> Result<(), LedgerError> {
        match balances.debit(player, amount, currency, key).await {
            Ok(DebitOutcome::Ok) => Ok(()),
            Ok(DebitOutcome::Insufficient) => Err(LedgerError::InsufficientBalance),
            Err(e) => {
                warn!("debit failed for {}: {}", player, e);
                Err(LedgerError::BalanceUnavailable)
            }
        }
    }

    async fn credit(
        &self,
        player: &PlayerId,
        amount: u64,
        currency: &str,
        key: &str,
        balances: &dyn BalanceStore,
    ) -> Result<(), LedgerError> {
        balances.credit(player, amount, currency, key).await.map_err(|e| {
            warn!("credit failed for {}: {}", player, e);
            LedgerError::BalanceUnavailable
        })
    }
}
