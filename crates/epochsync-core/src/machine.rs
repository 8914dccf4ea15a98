//! Epoch state machine
//!
//! Phases advance strictly forward: PRE_EPOCH -> ACTIVE -> COOLDOWN ->
//! SETTLING. Every tick reads synchronized time once, applies any boundary
//! crossings, then emits events in a fixed order: transitions, at most one
//! warning, and always a closing tick.

use chrono::{DateTime, Utc};
use epochsync_api::{
    Epoch, EpochBoundary, EpochEvent, EpochPhase, RankedEntry, TickEvent, TransitionEvent,
    WarningEvent, WarningThreshold,
};
use epochsync_clock::ClockSyncService;
use epochsync_config::EpochSettings;
use epochsync_util::{
    EpochSyncError, LoopHandle, ParticipantId, Result, add_millis, duration_millis,
    millis_between, saturating_duration_until,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::{EventBus, Subscription};

const TICK_LOOP_NAME: &str = "epoch-tick";

/// Drives the phase lifecycle of the loaded epoch.
///
/// Cheap to clone; clones share state, subscribers and the tick loop.
#[derive(Clone)]
pub struct EpochStateMachine {
    inner: Arc<MachineInner>,
}

struct MachineInner {
    clock: ClockSyncService,
    settings: EpochSettings,
    state: Mutex<MachineState>,
    transitions: EventBus<TransitionEvent>,
    events: EventBus<EpochEvent>,
    ticker: Mutex<Option<LoopHandle>>,
}

#[derive(Default)]
struct MachineState {
    epoch: Option<Epoch>,
    /// Synchronized time each threshold last fired, keyed by `seconds_before`
    warned_at: HashMap<u64, DateTime<Utc>>,
    /// Bumped whenever the loaded epoch is replaced or dropped
    generation: u64,
}

impl EpochStateMachine {
    pub fn new(clock: ClockSyncService, settings: EpochSettings) -> Self {
        info!(
            cooldown_secs = settings.cooldown_duration.as_secs(),
            tick_ms = settings.tick_period.as_millis() as u64,
            warning_count = settings.warnings.len(),
            "Epoch state machine created"
        );

        Self {
            inner: Arc::new(MachineInner {
                clock,
                settings,
                state: Mutex::new(MachineState::default()),
                transitions: EventBus::new("transitions"),
                events: EventBus::new("events"),
                ticker: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MachineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a new epoch, replacing any current one.
    ///
    /// The initial phase is classified from synchronized time and may be any
    /// of the four phases. No events are emitted.
    pub fn initialize_epoch(&self, boundary: EpochBoundary) -> Result<Epoch> {
        boundary.validate()?;

        let settings = &self.inner.settings;
        let now = self.inner.clock.server_time();
        let phase = EpochPhase::classify(
            now,
            boundary.start,
            boundary.end,
            settings.cooldown_duration,
        );

        let epoch = Epoch {
            id: boundary.epoch_id,
            start: boundary.start,
            end: boundary.end,
            opens_at: add_millis(boundary.start, -duration_millis(settings.pre_epoch_duration)),
            phase,
            locked_ranking: boundary.locked_ranking.unwrap_or_default(),
            final_ranking: None,
        };

        let mut state = self.state();
        if let Some(previous) = &state.epoch {
            info!(
                previous_epoch = %previous.id,
                previous_phase = %previous.phase,
                epoch_id = %epoch.id,
                "Replacing loaded epoch"
            );
        }
        state.epoch = Some(epoch.clone());
        state.warned_at.clear();
        state.generation += 1;

        info!(
            epoch_id = %epoch.id,
            phase = %epoch.phase,
            start = epoch.start.timestamp_millis(),
            end = epoch.end.timestamp_millis(),
            "Epoch loaded"
        );

        Ok(epoch)
    }

    /// Snapshot of the loaded epoch
    pub fn current_epoch(&self) -> Option<Epoch> {
        self.state().epoch.clone()
    }

    /// Time left in the current phase, zero in SETTLING or with no epoch
    pub fn time_remaining(&self) -> Duration {
        let now = self.inner.clock.server_time();
        self.state()
            .epoch
            .as_ref()
            .map(|epoch| remaining_in_phase(epoch, now, self.inner.settings.cooldown_duration))
            .unwrap_or(Duration::ZERO)
    }

    /// Overwrite the provisional ranking order. Emits nothing.
    pub fn refresh_ranking_order(&self, order: Vec<ParticipantId>) -> Result<Epoch> {
        let mut state = self.state();
        let epoch = state.epoch.as_mut().ok_or(EpochSyncError::NoEpochLoaded)?;
        epoch.locked_ranking = order;

        debug!(
            epoch_id = %epoch.id,
            participants = epoch.locked_ranking.len(),
            "Locked ranking refreshed"
        );
        Ok(epoch.clone())
    }

    /// Attach the authoritative final ranking.
    ///
    /// Accepted once per epoch, and only in SETTLING.
    pub fn set_final_ranking(&self, ranking: Vec<RankedEntry>) -> Result<Epoch> {
        let mut state = self.state();
        let epoch = state.epoch.as_mut().ok_or(EpochSyncError::NoEpochLoaded)?;

        if !epoch.phase.is_terminal() {
            return Err(EpochSyncError::NotSettling {
                epoch_id: epoch.id.clone(),
                phase: epoch.phase.to_string(),
            });
        }
        if epoch.final_ranking.is_some() {
            return Err(EpochSyncError::FinalRankingAlreadySet(epoch.id.clone()));
        }

        info!(epoch_id = %epoch.id, entries = ranking.len(), "Final ranking set");
        epoch.final_ranking = Some(ranking);
        Ok(epoch.clone())
    }

    /// Subscribe to phase transitions only
    pub fn on_transition<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.inner.transitions.subscribe(callback)
    }

    /// Subscribe to every event: transitions, warnings and ticks
    pub fn on_event<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EpochEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Evaluate the loaded epoch against synchronized time and notify subscribers.
    ///
    /// Returns the events delivered, in delivery order. With no epoch loaded
    /// nothing is emitted.
    ///
    /// Subscribers run after the state lock is released. If the epoch is
    /// replaced or destroyed while this tick is still dispatching, its
    /// remaining events are dropped. An event whose delivery already began
    /// still reaches every subscriber.
    pub fn tick(&self) -> Vec<EpochEvent> {
        let now = self.inner.clock.server_time();
        let (events, generation) = {
            let mut state = self.state();
            let events = evaluate(&mut state, &self.inner.settings, now);
            (events, state.generation)
        };

        let mut delivered = Vec::with_capacity(events.len());
        for event in events {
            if !self.is_current(generation) {
                debug!("Epoch replaced during dispatch, dropping remaining tick events");
                break;
            }
            if let EpochEvent::Transition(transition) = &event {
                self.inner.transitions.publish(transition);
            }
            self.inner.events.publish(&event);
            delivered.push(event);
        }

        delivered
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    /// Start the periodic tick loop on the current tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut ticker = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(EpochSyncError::AlreadyRunning(TICK_LOOP_NAME));
        }

        let weak: Weak<MachineInner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.tick_period;

        let handle = LoopHandle::spawn(TICK_LOOP_NAME, move |mut shutdown| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        EpochStateMachine { inner }.tick();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })?;

        info!(tick_ms = period.as_millis() as u64, "Epoch tick loop started");
        *ticker = Some(handle);
        Ok(())
    }

    /// Stop the tick loop. No-op if it is not running.
    pub fn stop(&self) {
        let handle = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.cancel();
            info!("Epoch tick loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the tick loop, drop all subscribers and unload the epoch.
    ///
    /// Safe to call repeatedly. The machine can be reused afterwards.
    pub fn destroy(&self) {
        self.stop();
        self.inner.transitions.clear();
        self.inner.events.clear();

        let mut state = self.state();
        if let Some(epoch) = state.epoch.take() {
            info!(epoch_id = %epoch.id, "Epoch state machine destroyed");
        }
        state.warned_at.clear();
        state.generation += 1;
    }
}

impl std::fmt::Debug for EpochStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochStateMachine")
            .field("epoch", &self.current_epoch())
            .field("running", &self.is_running())
            .finish()
    }
}

fn evaluate(state: &mut MachineState, settings: &EpochSettings, now: DateTime<Utc>) -> Vec<EpochEvent> {
    let MachineState {
        epoch, warned_at, ..
    } = state;
    let Some(epoch) = epoch.as_mut() else {
        return Vec::new();
    };

    let mut events = Vec::new();

    // Catch up on every boundary crossed since the last tick
    let target = EpochPhase::classify(now, epoch.start, epoch.end, settings.cooldown_duration);
    if target < epoch.phase {
        warn!(
            epoch_id = %epoch.id,
            phase = %epoch.phase,
            observed = %target,
            "Synchronized time moved backwards across a boundary, keeping phase"
        );
    }
    while epoch.phase < target {
        let Some(next) = epoch.phase.next() else {
            break;
        };
        let from = epoch.phase;
        epoch.phase = next;

        info!(epoch_id = %epoch.id, from = %from, to = %next, "Epoch phase transition");

        events.push(EpochEvent::Transition(TransitionEvent {
            from,
            to: next,
            epoch: epoch.clone(),
            observed_at: now,
        }));
    }

    let remaining = remaining_in_phase(epoch, now, settings.cooldown_duration);

    if epoch.phase == EpochPhase::Active {
        let debounce = duration_millis(settings.warning_debounce);
        let due = settings.warnings.iter().find(|w| {
            in_warning_window(remaining, w, settings.warning_window)
                && warned_at
                    .get(&w.seconds_before)
                    .is_none_or(|last| millis_between(*last, now) >= debounce)
        });

        if let Some(warning) = due {
            warned_at.insert(warning.seconds_before, now);

            info!(
                epoch_id = %epoch.id,
                threshold_seconds = warning.seconds_before,
                remaining_ms = remaining.as_millis() as u64,
                "Epoch closing warning"
            );

            events.push(EpochEvent::Warning(WarningEvent {
                epoch_id: epoch.id.clone(),
                threshold_seconds: warning.seconds_before,
                time_remaining: remaining,
                severity: warning.severity,
                message: warning
                    .message_template
                    .as_deref()
                    .map(|t| render_message(t, warning, &epoch.id.to_string())),
            }));
        }
    }

    let opening = epoch.phase == EpochPhase::PreEpoch && now >= epoch.opens_at;
    trace!(
        epoch_id = %epoch.id,
        phase = %epoch.phase,
        remaining_ms = remaining.as_millis() as u64,
        "Tick"
    );

    events.push(EpochEvent::Tick(TickEvent {
        epoch_id: epoch.id.clone(),
        phase: epoch.phase,
        time_remaining: remaining,
        server_time: now,
        opening,
    }));

    events
}

fn remaining_in_phase(epoch: &Epoch, now: DateTime<Utc>, cooldown: Duration) -> Duration {
    match epoch.phase {
        EpochPhase::PreEpoch => saturating_duration_until(epoch.start, now),
        EpochPhase::Active => saturating_duration_until(epoch.end, now),
        EpochPhase::Cooldown => {
            saturating_duration_until(add_millis(epoch.end, duration_millis(cooldown)), now)
        }
        EpochPhase::Settling => Duration::ZERO,
    }
}

/// `(threshold - window, threshold]`
fn in_warning_window(remaining: Duration, warning: &WarningThreshold, window: Duration) -> bool {
    let threshold = warning.threshold();
    remaining <= threshold && remaining > threshold.saturating_sub(window)
}

fn render_message(template: &str, warning: &WarningThreshold, epoch_id: &str) -> String {
    template
        .replace("{seconds}", &warning.seconds_before.to_string())
        .replace("{epoch_id}", epoch_id)
}
