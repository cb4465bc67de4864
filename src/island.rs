//! The island loop: the single consumer that owns the watcher, the state
//! machine and the orchestrator.
//!
//! Provider callbacks, async provider results, both timers and user input
//! all arrive as [`Event`]s on one channel and are applied one at a time.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, MissedTickBehavior};

use crate::config::Config;
use crate::presentation::PresentationStateMachine;
use crate::provider::MediaProvider;
use crate::render::{MediaDetails, RenderFrame, Renderer, RendererInput};
use crate::state::{create_state, SharedState};
use crate::transition::TransitionOrchestrator;
use crate::types::{IslandStatus, MediaSnapshot, TransportCommand};
use crate::watcher::{EventSink, SessionWatcher, WatcherEvent};

#[derive(Debug)]
pub enum Event {
    Watcher(WatcherEvent),
    /// Auto-collapse check.
    UiTick,
    Touch,
    ToggleExpand,
    Transport(TransportCommand),
    Shutdown,
}

/// Cloneable entry point into a running island.
#[derive(Clone)]
pub struct IslandHandle {
    tx: UnboundedSender<Event>,
    state: SharedState,
}

impl IslandHandle {
    fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            log::debug!("Island loop has stopped, dropping {:?}", e.0);
        }
    }

    pub fn touch(&self) {
        self.send(Event::Touch);
    }

    pub fn toggle_expand(&self) {
        self.send(Event::ToggleExpand);
    }

    pub fn transport(&self, command: TransportCommand) {
        self.send(Event::Transport(command));
    }

    pub fn shutdown(&self) {
        self.send(Event::Shutdown);
    }

    /// Route one front-end message. Returns false once the front end asked to quit.
    pub fn apply(&self, input: RendererInput) -> bool {
        match input {
            RendererInput::Touch => self.touch(),
            RendererInput::ToggleExpand => self.toggle_expand(),
            RendererInput::Quit => {
                self.shutdown();
                return false;
            }
            other => {
                if let Some(command) = other.transport() {
                    self.transport(command);
                }
            }
        }
        true
    }

    /// What the loop last published.
    pub fn status(&self) -> IslandStatus {
        self.state.read().clone()
    }
}

pub struct Island<R: Renderer> {
    config: Config,
    tx: UnboundedSender<Event>,
    rx: UnboundedReceiver<Event>,
    watcher: SessionWatcher,
    machine: PresentationStateMachine,
    orchestrator: TransitionOrchestrator,
    renderer: R,
    state: SharedState,
    media: MediaSnapshot,
}

impl<R: Renderer> Island<R> {
    pub fn new(config: Config, provider: Arc<dyn MediaProvider>, renderer: R) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let sink_tx = tx.clone();
        let sink: EventSink = Arc::new(move |event| {
            if sink_tx.send(Event::Watcher(event)).is_err() {
                log::debug!("Island loop has stopped, dropping watcher event");
            }
        });

        let watcher = SessionWatcher::new(provider, sink, &config);
        let machine =
            PresentationStateMachine::new(config.media_policy, config.collapse_after, now());
        let orchestrator = TransitionOrchestrator::new(machine.state());

        Self {
            config,
            tx,
            rx,
            watcher,
            machine,
            orchestrator,
            renderer,
            state: create_state(),
            media: MediaSnapshot::empty(),
        }
    }

    pub fn handle(&self) -> IslandHandle {
        IslandHandle {
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn watcher(&self) -> &SessionWatcher {
        &self.watcher
    }

    pub fn machine(&self) -> &PresentationStateMachine {
        &self.machine
    }

    /// Run until [`Event::Shutdown`]. Must be called inside a tokio runtime.
    pub async fn run(mut self) {
        log::info!("Island starting");
        self.present(true);
        self.watcher.start();

        let start = tokio::time::Instant::now();
        let mut poll = interval_at(start + self.config.poll_interval, self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = interval_at(start + self.config.tick_interval, self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                event = self.rx.recv() => event.unwrap_or(Event::Shutdown),
                _ = poll.tick() => Event::Watcher(WatcherEvent::PollTick),
                _ = tick.tick() => Event::UiTick,
            };

            if !self.dispatch(event, now()) {
                break;
            }
        }

        self.watcher.shutdown();
        self.state.write().provider_status = self.watcher.status();
        log::info!("Island stopped");
    }

    /// Apply one event at `now`. Returns false on shutdown.
    pub fn dispatch(&mut self, event: Event, now: Instant) -> bool {
        log::trace!("Dispatching {:?}", event);
        match event {
            Event::Watcher(event) => {
                if let Some(snapshot) = self.watcher.handle(event) {
                    self.machine.on_snapshot(&snapshot, now);
                    self.media = snapshot;
                    self.present(true);
                }
                self.state.write().provider_status = self.watcher.status();
            }
            Event::UiTick => {
                if self.machine.tick(now) {
                    self.present(false);
                }
            }
            Event::Touch => self.machine.touch(now),
            Event::ToggleExpand => {
                self.machine.toggle_expand(now);
                self.present(false);
            }
            Event::Transport(command) => {
                if matches!(command, TransportCommand::Seek { .. }) {
                    self.machine.touch(now);
                }
                self.watcher.send_command(command);
            }
            Event::Shutdown => {
                log::info!("Island shutdown requested");
                return false;
            }
        }
        true
    }

    /// Publish the current state and hand the renderer a frame.
    fn present(&mut self, media_changed: bool) {
        let state = self.machine.state();
        if !media_changed && &state == self.orchestrator.previous() {
            return;
        }

        let intents = self.orchestrator.advance(&state);
        {
            let mut shared = self.state.write();
            shared.presentation = state.clone();
            shared.media = self.media.clone();
            shared.provider_status = self.watcher.status();
        }

        let frame = RenderFrame {
            state,
            intents,
            media: MediaDetails::from_snapshot(&self.media),
        };
        self.renderer.present(&frame);
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
