use std::{
    collections::{HashMap, VecDeque},
    ops::ControlFlow,
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};

use cmdbar_core::{Command, OverlayEntry, OverlayId, OverlayRegistry, OverlaySurface, Point};
use tracing::{debug, info, trace};

/// In-memory only; cleared on restart.
pub const MAX_RECENT_COMMANDS: usize = 20;

/// Everything the network side hands to the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    CommandAccepted(Command),
    ListenerStatus(String),
    ShutdownRequested,
}

#[derive(Debug, Clone, Copy)]
struct Countdown {
    total: Duration,
    deadline: Instant,
    /// Set while paused; the deadline is recomputed on resume.
    paused_remaining: Option<Duration>,
}

impl Countdown {
    fn start(total: Duration, now: Instant) -> Self {
        Self {
            total,
            deadline: now + total,
            paused_remaining: None,
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.paused_remaining
            .unwrap_or_else(|| self.deadline.saturating_duration_since(now))
    }

    fn is_due(&self, now: Instant) -> bool {
        self.paused_remaining.is_none() && now >= self.deadline
    }
}

/// Turns accepted commands into overlays and retires them.
///
/// Lives on the UI thread and is never shared: the network side reaches it
/// only through [`UiEvent`]s.
#[derive(Debug)]
pub struct Coordinator<S> {
    surface: S,
    registry: OverlayRegistry,
    countdowns: HashMap<OverlayId, Countdown>,
    recent: VecDeque<Command>,
    status: String,
}

impl<S: OverlaySurface> Coordinator<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            registry: OverlayRegistry::new(),
            countdowns: HashMap::new(),
            recent: VecDeque::with_capacity(MAX_RECENT_COMMANDS),
            status: "Starting...".to_owned(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Always a new overlay, even when another one shows the same command id.
    pub fn on_command_accepted(&mut self, command: Command, now: Instant) -> OverlayId {
        let command_id = command.id;
        let total = command.duration();
        self.remember(command.clone());

        let id = self.registry.place(command, &self.surface);
        self.countdowns.insert(id, Countdown::start(total, now));

        info!(
            overlay = %id,
            command_id,
            active = self.registry.len(),
            "overlay placed"
        );
        id
    }

    pub fn on_countdown_expired(&mut self, id: OverlayId) -> bool {
        self.retire(id, "countdown expired")
    }

    pub fn on_user_dismiss(&mut self, id: OverlayId) -> bool {
        self.retire(id, "dismissed")
    }

    pub fn dismiss(&mut self, id: OverlayId) -> bool {
        self.on_user_dismiss(id)
    }

    pub fn clear_all(&mut self) -> usize {
        let cleared = self.registry.clear().len();
        self.countdowns.clear();
        if cleared > 0 {
            info!(cleared, "all overlays cleared");
        }
        cleared
    }

    /// Fires [`Coordinator::on_countdown_expired`] for every overlay whose
    /// countdown has run out, in placement order.
    pub fn expire_due(&mut self, now: Instant) -> Vec<OverlayId> {
        let due: Vec<OverlayId> = self
            .registry
            .list_active()
            .iter()
            .map(|entry| entry.id)
            .filter(|id| self.countdowns.get(id).is_some_and(|c| c.is_due(now)))
            .collect();

        for id in &due {
            self.on_countdown_expired(*id);
        }
        due
    }

    /// Pauses or resumes a countdown. Returns whether it is now paused.
    pub fn toggle_pause(&mut self, id: OverlayId, now: Instant) -> Option<bool> {
        let countdown = self.countdowns.get_mut(&id)?;
        match countdown.paused_remaining.take() {
            Some(remaining) => countdown.deadline = now + remaining,
            None => countdown.paused_remaining = Some(countdown.remaining(now)),
        }
        let paused = countdown.paused_remaining.is_some();
        debug!(overlay = %id, paused, "countdown toggled");
        Some(paused)
    }

    pub fn remaining(&self, id: OverlayId, now: Instant) -> Option<Duration> {
        self.countdowns.get(&id).map(|c| c.remaining(now))
    }

    /// Fraction of the countdown left, from 1.0 down to 0.0.
    pub fn progress(&self, id: OverlayId, now: Instant) -> Option<f64> {
        let countdown = self.countdowns.get(&id)?;
        if countdown.total.is_zero() {
            return Some(0.0);
        }
        Some(countdown.remaining(now).as_secs_f64() / countdown.total.as_secs_f64())
    }

    pub fn record_moved(&mut self, id: OverlayId, origin: Point) -> bool {
        self.registry.record_moved(id, origin)
    }

    pub fn list_active(&self) -> &[OverlayEntry] {
        self.registry.list_active()
    }

    pub fn on_status_changed(&mut self, status: impl Into<String>) {
        self.status = status.into();
        info!(status = %self.status, "listener status changed");
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Most recent last.
    pub fn recent_commands(&self) -> impl Iterator<Item = &Command> {
        self.recent.iter()
    }

    pub fn clear_recent(&mut self) {
        self.recent.clear();
    }

    pub fn handle_event(&mut self, event: UiEvent, now: Instant) -> Option<OverlayId> {
        match event {
            UiEvent::CommandAccepted(command) => Some(self.on_command_accepted(command, now)),
            UiEvent::ListenerStatus(status) => {
                self.on_status_changed(status);
                None
            }
            UiEvent::ShutdownRequested => {
                self.clear_all();
                None
            }
        }
    }

    /// Drains whatever the network side queued since the last call.
    ///
    /// Stops at [`UiEvent::ShutdownRequested`] and breaks; events queued
    /// behind it stay in the channel.
    pub fn poll_ui_events(
        &mut self,
        ui_event_rx: &Receiver<UiEvent>,
        now: Instant,
    ) -> ControlFlow<(), usize> {
        let mut handled = 0;
        while let Ok(event) = ui_event_rx.try_recv() {
            let shutdown = event == UiEvent::ShutdownRequested;
            self.handle_event(event, now);
            if shutdown {
                return ControlFlow::Break(());
            }
            handled += 1;
        }
        ControlFlow::Continue(handled)
    }

    /// The serialized context: the only place overlays are created, read or
    /// removed. Wakes at least every `tick` to expire countdowns and returns
    /// once shutdown is requested, however it was queued, or every sender
    /// is gone.
    pub fn run(&mut self, ui_event_rx: &Receiver<UiEvent>, tick: Duration) {
        loop {
            match ui_event_rx.recv_timeout(tick) {
                Ok(UiEvent::ShutdownRequested) => {
                    self.clear_all();
                    info!("shutdown requested");
                    return;
                }
                Ok(event) => {
                    self.handle_event(event, Instant::now());
                    if self.poll_ui_events(ui_event_rx, Instant::now()).is_break() {
                        info!("shutdown requested");
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }

            let now = Instant::now();
            self.expire_due(now);
            for entry in self.registry.list_active() {
                let remaining = self.remaining(entry.id, now).unwrap_or_default();
                trace!(
                    overlay = %entry.id,
                    text = %entry.command.text,
                    x = entry.origin.x,
                    y = entry.origin.y,
                    remaining_secs = remaining.as_secs(),
                    "overlay"
                );
            }
        }
    }

    fn retire(&mut self, id: OverlayId, reason: &str) -> bool {
        self.countdowns.remove(&id);
        match self.registry.remove(id) {
            Some(entry) => {
                info!(
                    overlay = %id,
                    command_id = entry.command.id,
                    active = self.registry.len(),
                    "overlay retired: {reason}"
                );
                true
            }
            None => {
                debug!(overlay = %id, "overlay already gone: {reason}");
                false
            }
        }
    }

    fn remember(&mut self, command: Command) {
        if self.recent.len() == MAX_RECENT_COMMANDS {
            self.recent.pop_front();
        }
        self.recent.push_back(command);
    }
}
