//! Dual-buffer playback of a media artifact that keeps growing.
//!
//! Two media elements take turns being audible. When a longer version of the
//! artifact arrives while the active element is playing, it is loaded into the
//! inactive element, which takes over at the same position once it is ready.
//! When nothing is playing the new version simply replaces the active source.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::PlaybackError;

/// One of the two playback slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotId {
    Primary,
    Secondary,
}

impl SlotId {
    /// The other slot.
    pub fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        })
    }
}

/// A media player the controller drives (an audio element, a native sink, or
/// the headless `ClockElement`).
///
/// Changing the source stops playback and rewinds to zero.
#[async_trait::async_trait]
pub trait MediaElement: Send + Sync {
    fn set_source(&self, source: Option<&str>);
    fn is_playing(&self) -> bool;
    /// Current read position.
    fn position(&self) -> Duration;
    fn seek(&self, position: Duration);
    fn pause(&self);
    /// Resolves once the current source can start playing.
    async fn wait_ready(&self) -> Result<(), PlaybackError>;
    /// Starts playback from the current position.
    async fn play(&self) -> Result<(), PlaybackError>;
}

/// Timing knobs for buffer handoff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Pause inserted after pre-loading, before the handoff is attempted.
    pub settle_delay: Duration,
    /// Upper bound on waiting for the pre-loaded element to become ready.
    pub ready_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

impl PlaybackConfig {
    /// No settle delay; useful in tests.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Observable state of one slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub slot: SlotId,
    pub source: Option<String>,
    pub playing: bool,
    pub position: Duration,
}

/// Observable state of the controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub active: SlotId,
    /// Indexed by slot: `Primary` first.
    pub slots: [SlotSnapshot; 2],
}

impl PlaybackSnapshot {
    pub fn slot(&self, slot: SlotId) -> &SlotSnapshot {
        &self.slots[slot.index()]
    }

    pub fn active_slot(&self) -> &SlotSnapshot {
        self.slot(self.active)
    }
}

/// How a media update was applied.
pub enum MediaUpdate {
    /// Nothing was playing; the active slot got the new source.
    Direct { slot: SlotId },
    /// The active slot is playing; a handoff to the other slot is under way.
    Swap(SwapHandle),
}

/// Handle on an in-flight handoff.
pub struct SwapHandle {
    pub from: SlotId,
    pub to: SlotId,
    task: JoinHandle<SwapOutcome>,
}

impl SwapHandle {
    /// Waits for the handoff to resolve.
    pub async fn outcome(self) -> SwapOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => SwapOutcome::Abandoned {
                reason: format!("swap task failed: {err}"),
            },
        }
    }
}

/// Result of a handoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapOutcome {
    /// `active` took over at `position`.
    Committed { active: SlotId, position: Duration },
    /// The target did not become ready or refused to play; the previous slot
    /// stays active.
    Abandoned { reason: String },
    /// A newer update or a reset made this handoff obsolete.
    Superseded,
}

struct Slot {
    element: Arc<dyn MediaElement>,
    source: Option<String>,
    /// Bumped on every source change; a handoff only commits if the target
    /// slot still carries the generation it loaded.
    generation: u64,
}

struct PlaybackState {
    slots: [Slot; 2],
    active: SlotId,
    /// Bumped on reset so pending handoffs from a previous submission abandon.
    epoch: u64,
}

struct SwapPlan {
    from: SlotId,
    to: SlotId,
    generation: u64,
    epoch: u64,
    position: Duration,
    current: Arc<dyn MediaElement>,
    next: Arc<dyn MediaElement>,
}

/// Owns the two playback slots. Cloning yields another handle to the same
/// slots.
#[derive(Clone)]
pub struct PlaybackController {
    state: Arc<Mutex<PlaybackState>>,
    config: PlaybackConfig,
}

impl PlaybackController {
    /// Creates a controller over two media elements. `primary` starts active.
    pub fn new(
        primary: Arc<dyn MediaElement>,
        secondary: Arc<dyn MediaElement>,
        config: PlaybackConfig,
    ) -> Self {
        let slot = |element| Slot {
            element,
            source: None,
            generation: 0,
        };
        Self {
            state: Arc::new(Mutex::new(PlaybackState {
                slots: [slot(primary), slot(secondary)],
                active: SlotId::Primary,
                epoch: 0,
            })),
            config,
        }
    }

    /// Controller over two headless `ClockElement`s.
    pub fn headless(config: PlaybackConfig) -> Self {
        Self::new(
            Arc::new(ClockElement::default()),
            Arc::new(ClockElement::default()),
            config,
        )
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Applies a new version of the media.
    ///
    /// Must be called from within a tokio runtime: a handoff continues on a
    /// spawned task.
    pub fn on_media_update(&self, reference: impl Into<String>) -> MediaUpdate {
        let reference = reference.into();
        let mut state = lock(&self.state);
        let from = state.active;
        let current = state.slots[from.index()].element.clone();

        if !current.is_playing() {
            assign(&mut state.slots[from.index()], &reference);
            debug!(slot = %from, reference = %reference, "media loaded into active slot");
            return MediaUpdate::Direct { slot: from };
        }

        let to = from.other();
        let position = current.position();
        let generation = assign(&mut state.slots[to.index()], &reference);
        let plan = SwapPlan {
            from,
            to,
            generation,
            epoch: state.epoch,
            position,
            current,
            next: state.slots[to.index()].element.clone(),
        };
        drop(state);

        debug!(
            from = %from,
            to = %to,
            position_ms = position.as_millis() as u64,
            reference = %reference,
            "pre-loading media for handoff"
        );
        let task = tokio::spawn(run_swap(self.state.clone(), self.config.clone(), plan));
        MediaUpdate::Swap(SwapHandle { from, to, task })
    }

    /// Loads `reference` into the active slot if neither slot has a source yet.
    /// Returns whether it was loaded.
    pub fn load_if_empty(&self, reference: impl Into<String>) -> bool {
        let mut state = lock(&self.state);
        if state.slots.iter().any(|s| s.source.is_some()) {
            return false;
        }
        let active = state.active;
        let reference = reference.into();
        assign(&mut state.slots[active.index()], &reference);
        debug!(slot = %active, reference = %reference, "final media loaded into idle player");
        true
    }

    /// Stops both slots, clears their sources, re-activates `Primary` and
    /// invalidates every pending handoff.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.epoch += 1;
        for slot in &mut state.slots {
            slot.element.pause();
            slot.element.set_source(None);
            slot.source = None;
            slot.generation += 1;
        }
        state.active = SlotId::Primary;
        debug!(epoch = state.epoch, "playback reset");
    }

    /// Starts the active slot.
    pub async fn play_active(&self) -> Result<(), PlaybackError> {
        let element = {
            let state = lock(&self.state);
            state.slots[state.active.index()].element.clone()
        };
        element.play().await
    }

    /// Pauses the active slot.
    pub fn pause_active(&self) {
        let state = lock(&self.state);
        state.slots[state.active.index()].element.pause();
    }

    pub fn active(&self) -> SlotId {
        lock(&self.state).active
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = lock(&self.state);
        let slots = [SlotId::Primary, SlotId::Secondary].map(|id| {
            let slot = &state.slots[id.index()];
            SlotSnapshot {
                slot: id,
                source: slot.source.clone(),
                playing: slot.element.is_playing(),
                position: slot.element.position(),
            }
        });
        PlaybackSnapshot {
            active: state.active,
            slots,
        }
    }
}

fn lock(state: &Mutex<PlaybackState>) -> MutexGuard<'_, PlaybackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn assign(slot: &mut Slot, reference: &str) -> u64 {
    slot.generation += 1;
    slot.source = Some(reference.to_string());
    slot.element.set_source(Some(reference));
    slot.generation
}

fn is_current(state: &Mutex<PlaybackState>, plan: &SwapPlan) -> bool {
    let state = lock(state);
    state.epoch == plan.epoch
        && state.active == plan.from
        && state.slots[plan.to.index()].generation == plan.generation
}

/// Whether a stale handoff may still silence its target: the target is not
/// the active slot and no newer source was loaded into it since.
fn owns_target(state: &PlaybackState, plan: &SwapPlan) -> bool {
    let target = &state.slots[plan.to.index()];
    state.active != plan.to && (target.generation == plan.generation || target.source.is_none())
}

async fn run_swap(
    state: Arc<Mutex<PlaybackState>>,
    config: PlaybackConfig,
    plan: SwapPlan,
) -> SwapOutcome {
    if !config.settle_delay.is_zero() {
        tokio::time::sleep(config.settle_delay).await;
    }
    if !is_current(&state, &plan) {
        debug!(to = %plan.to, "handoff superseded before load");
        return SwapOutcome::Superseded;
    }

    let ready = match tokio::time::timeout(config.ready_timeout, plan.next.wait_ready()).await {
        Ok(result) => result,
        Err(_) => Err(PlaybackError::ReadyTimeout {
            timeout_ms: config.ready_timeout.as_millis() as u64,
        }),
    };
    if let Err(err) = ready {
        if !is_current(&state, &plan) {
            return SwapOutcome::Superseded;
        }
        warn!(from = %plan.from, to = %plan.to, error = %err, "handoff abandoned: target not ready");
        return SwapOutcome::Abandoned {
            reason: err.to_string(),
        };
    }
    if !is_current(&state, &plan) {
        debug!(to = %plan.to, "handoff superseded while loading");
        return SwapOutcome::Superseded;
    }
    if !plan.current.is_playing() {
        debug!(from = %plan.from, "active slot stopped during handoff, keeping it");
        return SwapOutcome::Abandoned {
            reason: "active slot no longer playing".into(),
        };
    }

    plan.next.seek(plan.position);
    if let Err(err) = plan.next.play().await {
        warn!(from = %plan.from, to = %plan.to, error = %err, "handoff abandoned: target refused to play");
        return SwapOutcome::Abandoned {
            reason: err.to_string(),
        };
    }

    let mut guard = lock(&state);
    let still_current = guard.epoch == plan.epoch
        && guard.active == plan.from
        && guard.slots[plan.to.index()].generation == plan.generation;
    if !still_current {
        let silence = owns_target(&guard, &plan);
        drop(guard);
        if silence {
            plan.next.pause();
            debug!(to = %plan.to, "handoff superseded after start, silencing target");
        } else {
            debug!(to = %plan.to, "handoff superseded after start, target taken over");
        }
        return SwapOutcome::Superseded;
    }
    guard.active = plan.to;
    plan.current.pause();
    drop(guard);

    info!(
        from = %plan.from,
        to = %plan.to,
        position_ms = plan.position.as_millis() as u64,
        "playback handed off"
    );
    SwapOutcome::Committed {
        active: plan.to,
        position: plan.position,
    }
}

#[derive(Default)]
struct ClockState {
    source: Option<String>,
    ready_at: Option<Instant>,
    playing_since: Option<Instant>,
    offset: Duration,
}

/// Headless media element driven by the tokio clock.
///
/// Position advances in real (or paused test) time while playing. A new
/// source becomes ready after `load_latency`.
#[derive(Default)]
pub struct ClockElement {
    state: Mutex<ClockState>,
    load_latency: Duration,
}

impl ClockElement {
    pub fn with_load_latency(load_latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            load_latency,
        }
    }

    pub fn source(&self) -> Option<String> {
        self.lock().source.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl MediaElement for ClockElement {
    fn set_source(&self, source: Option<&str>) {
        let mut state = self.lock();
        state.source = source.map(ToOwned::to_owned);
        state.ready_at = source.map(|_| Instant::now() + self.load_latency);
        state.playing_since = None;
        state.offset = Duration::ZERO;
    }

    fn is_playing(&self) -> bool {
        self.lock().playing_since.is_some()
    }

    fn position(&self) -> Duration {
        let state = self.lock();
        match state.playing_since {
            Some(since) => state.offset + since.elapsed(),
            None => state.offset,
        }
    }

    fn seek(&self, position: Duration) {
        let mut state = self.lock();
        state.offset = position;
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut state = self.lock();
        if let Some(since) = state.playing_since.take() {
            state.offset += since.elapsed();
        }
    }

    async fn wait_ready(&self) -> Result<(), PlaybackError> {
        let ready_at = {
            let state = self.lock();
            if state.source.is_none() {
                return Err(PlaybackError::NotReady("no source".into()));
            }
            state.ready_at
        };
        if let Some(at) = ready_at {
            tokio::time::sleep_until(at).await;
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        let has_source = self.lock().source.is_some();
        if !has_source {
            return Err(PlaybackError::PlayRejected("no source".into()));
        }
        self.wait_ready().await?;
        let mut state = self.lock();
        if state.playing_since.is_none() {
            state.playing_since = Some(Instant::now());
        }
        Ok(())
    }
}
