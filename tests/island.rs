mod common;

use common::{test_config, FakeProvider, FakeTrack};
use halo::island::Event;
use halo::render::{RenderFrame, RendererInput};
use halo::watcher::WatcherEvent;
use halo::{Island, PresentationMode, Target, TransitionIntent, TransportCommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<RenderFrame>) -> RenderFrame {
    tokio::time::timeout(Duration::from_secs(1), frames.recv())
        .await
        .expect("a frame within a second")
        .expect("renderer channel open")
}

#[tokio::test(start_paused = true)]
async fn media_expand_and_auto_collapse() {
    let provider = FakeProvider::with_session("a", FakeTrack::playing("Song"));
    let (renderer, mut frames) = mpsc::unbounded_channel::<RenderFrame>();
    let island = Island::new(test_config(), Arc::new(provider.clone()), renderer);
    let handle = island.handle();
    let running = tokio::spawn(island.run());

    let initial = next_frame(&mut frames).await;
    assert_eq!(initial.state.mode, PresentationMode::Idle);
    assert_eq!(initial.state.title, "Idle");
    assert!(initial.intents.is_empty());

    let compact = next_frame(&mut frames).await;
    assert_eq!(compact.state.mode, PresentationMode::CompactMedia);
    assert_eq!(compact.state.title, "Song");
    assert_eq!((compact.state.width, compact.state.height), (350, 46));
    assert!(matches!(compact.intents[0], TransitionIntent::Resize { .. }));
    assert_eq!(compact.media.duration_ms, 200_000);

    handle.toggle_expand();
    let expanded = next_frame(&mut frames).await;
    assert_eq!(expanded.state.mode, PresentationMode::ExpandedMedia);
    assert_eq!(
        expanded
            .intents
            .iter()
            .filter(|i| i.is_fade_in())
            .map(|i| i.target())
            .collect::<Vec<_>>(),
        vec![Target::ExpandedContent]
    );

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        handle.status().presentation.mode,
        PresentationMode::ExpandedMedia
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        handle.status().presentation.mode,
        PresentationMode::CompactMedia
    );
    let collapsed = next_frame(&mut frames).await;
    assert_eq!(collapsed.state.mode, PresentationMode::CompactMedia);

    handle.shutdown();
    running.await.unwrap();
    assert_eq!(provider.manager_subscriptions(), 0);
    assert_eq!(provider.subscriptions("a"), 0);
}

#[tokio::test(start_paused = true)]
async fn touch_keeps_the_card_open() {
    let provider = FakeProvider::with_session("a", FakeTrack::playing("Song"));
    let (renderer, mut frames) = mpsc::unbounded_channel::<RenderFrame>();
    let island = Island::new(test_config(), Arc::new(provider.clone()), renderer);
    let handle = island.handle();
    let running = tokio::spawn(island.run());

    next_frame(&mut frames).await;
    next_frame(&mut frames).await;
    handle.toggle_expand();
    next_frame(&mut frames).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.apply(RendererInput::Seek { position_ms: 10_000 });
    tokio::time::sleep(Duration::from_secs(3)).await;

    // The 5 s tick saw only 2 s since the seek.
    assert_eq!(
        handle.status().presentation.mode,
        PresentationMode::ExpandedMedia
    );
    assert!(provider
        .commands()
        .iter()
        .any(|(_, command)| command == "seek:100000000"));

    assert!(!handle.apply(RendererInput::Quit));
    running.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn paused_media_returns_to_idle() {
    let provider = FakeProvider::with_session("a", FakeTrack::playing("Song"));
    let (renderer, mut frames) = mpsc::unbounded_channel::<RenderFrame>();
    let island = Island::new(test_config(), Arc::new(provider.clone()), renderer);
    let handle = island.handle();
    let running = tokio::spawn(island.run());

    next_frame(&mut frames).await;
    assert_eq!(
        next_frame(&mut frames).await.state.mode,
        PresentationMode::CompactMedia
    );

    provider.update_track("a", |track| track.status = halo::PlaybackStatus::Paused);
    provider.notify_session("a");

    let idle = next_frame(&mut frames).await;
    assert_eq!(idle.state.mode, PresentationMode::Idle);
    assert_eq!(idle.state.title, "Idle");
    assert_eq!(
        idle.intents
            .iter()
            .filter(|i| i.is_fade_out())
            .map(|i| i.target())
            .collect::<Vec<_>>(),
        vec![Target::CompactContent]
    );
    assert!(!idle.intents.iter().any(|i| i.is_fade_in()));

    handle.shutdown();
    running.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn toggle_without_media_renders_nothing() {
    let provider = FakeProvider::default();
    let (renderer, mut frames) = mpsc::unbounded_channel::<RenderFrame>();
    let mut island = Island::new(test_config(), Arc::new(provider), renderer);
    let now = Instant::now();

    assert!(island.dispatch(Event::ToggleExpand, now));
    assert!(island.dispatch(Event::UiTick, now + Duration::from_secs(10)));

    assert!(frames.try_recv().is_err());
    assert!(!island.machine().expanded_requested());
    assert_eq!(
        island.handle().status().presentation.mode,
        PresentationMode::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn transport_without_session_is_harmless() {
    let provider = FakeProvider::default();
    let (renderer, _frames) = mpsc::unbounded_channel::<RenderFrame>();
    let mut island = Island::new(test_config(), Arc::new(provider.clone()), renderer);
    let now = Instant::now();

    assert!(island.dispatch(Event::Transport(TransportCommand::Play), now));
    assert!(island.dispatch(Event::Watcher(WatcherEvent::PollTick), now));
    assert!(!island.dispatch(Event::Shutdown, now));
    assert!(provider.commands().is_empty());
}
