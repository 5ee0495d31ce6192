//! Background-prepared source switching.

mod common;

use common::{wait_for, Clip, Harness, SyntheticOpener};
use core_playback::{
    MessageKind, PlayMode, PlaybackError, Player, PlayerConfig, PreparedSwitch, SlotState,
};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn wait_until_settled(player: &Player, index: usize) -> Option<SlotState> {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        match player.prepared_source_state(index) {
            Some(SlotState::Pending | SlotState::Opening) => thread::sleep(Duration::from_millis(10)),
            other => return other,
        }
    }
    None
}

fn playing_player(harness: &Harness) -> Player {
    let config = PlayerConfig {
        reconnect_count: 0,
        ..Default::default()
    };
    let player = Player::new(harness.env.clone(), config).expect("player");
    player.prepare("clip://main").unwrap();
    let (prepared, _) = wait_for(&player.messages(), MessageKind::Prepared, WAIT);
    assert!(prepared.is_some());
    player
}

#[test]
fn test_switch_to_ready_source() {
    let harness = Harness::new(SyntheticOpener::new(Clip::av(10_000)));
    let player = playing_player(&harness);
    let messages = player.messages();

    let index = player.prepare_source("clip://next", PlayMode::VodMp4).unwrap();
    assert_eq!(index, 0);
    assert!(matches!(wait_until_settled(&player, index), Some(SlotState::Ready(_))));
    let opens = harness.counters().opens();

    assert_eq!(player.change_source_prepared(index).unwrap(), PreparedSwitch::Ready);
    let (changed, _) = wait_for(&messages, MessageKind::SourceChanged, WAIT);
    assert!(changed.is_some());
    // The prepared source is reused as is
    assert_eq!(harness.counters().opens(), opens);

    // Still playing, so the slot cannot be dropped
    assert!(matches!(
        player.delete_prepared_source(index),
        Err(PlaybackError::PreparedSlotUnavailable(0))
    ));

    player.change_source("clip://main", PlayMode::VodMp4).unwrap();
    let (changed, _) = wait_for(&messages, MessageKind::SourceChanged, WAIT);
    assert!(changed.is_some());
    player.delete_prepared_source(index).unwrap();
    assert!(matches!(player.prepared_source_state(index), Some(SlotState::Empty)));

    player.wait_stop();
}

#[test]
fn test_switch_while_opening_plays_after_prepared() {
    let opener = SyntheticOpener::new(Clip::av(10_000))
        .with_clip("clip://slow", Clip::av(10_000).with_open_delay(Duration::from_millis(500)));
    let harness = Harness::new(opener);
    let player = playing_player(&harness);
    let messages = player.messages();

    let index = player.prepare_source("clip://slow", PlayMode::VodMp4).unwrap();
    let deadline = Instant::now() + WAIT;
    while !matches!(player.prepared_source_state(index), Some(SlotState::Opening)) {
        assert!(Instant::now() < deadline, "slot never started opening");
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(
        player.change_source_prepared(index).unwrap(),
        PreparedSwitch::PlayAfterPrepared
    );
    let (changed, _) = wait_for(&messages, MessageKind::SourceChanged, WAIT);
    assert!(changed.is_some());

    player.wait_stop();
}

#[test]
fn test_failed_prepare_falls_back_to_url() {
    let harness = Harness::new(SyntheticOpener::new(Clip::av(10_000)));
    let player = playing_player(&harness);
    let messages = player.messages();

    let index = player.prepare_source("fail://gone", PlayMode::VodMp4).unwrap();
    assert!(matches!(wait_until_settled(&player, index), Some(SlotState::Failed)));

    assert_eq!(
        player.change_source_prepared(index).unwrap(),
        PreparedSwitch::FallbackToUrl
    );
    let (failed, _) = wait_for(&messages, MessageKind::ConnectFailed, WAIT);
    assert!(failed.is_some());

    // Failed slots can always be dropped
    player.delete_prepared_source(index).unwrap();

    player.wait_stop();
}

#[test]
fn test_prepared_slot_errors() {
    let harness = Harness::new(SyntheticOpener::new(Clip::av(10_000)));
    let config = PlayerConfig {
        max_prepared_sources: 2,
        reconnect_count: 0,
        ..Default::default()
    };
    let player = Player::new(harness.env.clone(), config).expect("player");

    assert_eq!(player.prepare_source("clip://one", PlayMode::VodMp4).unwrap(), 0);
    assert_eq!(player.prepare_source("clip://two", PlayMode::VodMp4).unwrap(), 1);
    assert!(matches!(
        player.prepare_source("clip://three", PlayMode::VodMp4),
        Err(PlaybackError::PreparedSlotsFull)
    ));

    // Switching needs a running session
    assert!(matches!(
        player.change_source_prepared(0),
        Err(PlaybackError::NoSession)
    ));
    assert!(matches!(
        player.delete_prepared_source(7),
        Err(PlaybackError::PreparedSlotUnavailable(7))
    ));

    wait_until_settled(&player, 0);
    player.delete_prepared_source(0).unwrap();
    assert_eq!(player.prepare_source("clip://three", PlayMode::VodMp4).unwrap(), 0);
}
