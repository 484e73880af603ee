//! Playback loop scenarios: start, loop modes, skip, pause and recovery.

#[macro_use]
mod common;

use std::time::Duration;

use common::{ track, Harness };
use tunebot_core::{ Effect, LoopMode, PlaybackPhase, SessionConfig, SessionError, SessionEvent };


#[tokio::test( start_paused = true )]
async fn test_enqueue_on_idle_session_starts_exactly_once() {
    let h = Harness::start().await;
    let mut events = h.session.subscribe();

    let position = h.session.enqueue( track( "A", 200 ) ).await.unwrap();
    assert_eq!( position, 1 );
    wait_until!( h.session.phase().await == PlaybackPhase::Playing );
    tokio::time::sleep( Duration::from_secs( 1 ) ).await;

    let events = common::drain( &mut events );
    let phases: Vec<_> = events.iter()
        .filter_map( |e| match e {
            SessionEvent::PhaseChanged { from, to } => Some(( *from, *to )),
            _ => None,
        })
        .collect();
    assert_eq!( phases, vec![
        ( PlaybackPhase::Idle, PlaybackPhase::Loading ),
        ( PlaybackPhase::Loading, PlaybackPhase::Playing ),
    ] );
    assert_eq!( h.process.started_titles(), vec![ "A" ] );
    assert_eq!( h.process.starts()[ 0 ].stream_locator, "stream:fake://A" );
    assert_eq!( h.session.current_title().await.as_deref(), Some( "A" ) );
}


#[tokio::test( start_paused = true )]
async fn test_enqueue_while_playing_only_queues() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 200 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    assert_eq!( h.session.enqueue( track( "B", 200 ) ).await.unwrap(), 1 );
    tokio::time::sleep( Duration::from_secs( 1 ) ).await;
    assert_eq!( h.process.starts().len(), 1 );
    assert_eq!( h.session.queue_titles().await, vec![ "B" ] );
}


#[tokio::test( start_paused = true )]
async fn test_natural_end_advances_then_goes_idle() {
    let h = Harness::start().await;
    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ) ] ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    assert!( h.process.finish_latest() );
    wait_until!( h.process.starts().len() == 2 );
    assert_eq!( h.process.started_titles(), vec![ "A", "B" ] );

    assert!( h.process.finish_latest() );
    wait_until!( h.session.phase().await == PlaybackPhase::Idle );
    assert!( h.session.current_title().await.is_none() );
}


#[tokio::test( start_paused = true )]
async fn test_queue_loop_rotates_skipped_tracks() {
    let h = Harness::start().await;
    h.session.set_loop_mode( LoopMode::Queue ).await.unwrap();
    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ) ] ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    assert_eq!( h.session.skip().await.unwrap(), "A" );
    wait_until!( h.process.starts().len() == 2 );
    assert_eq!( h.session.skip().await.unwrap(), "B" );
    wait_until!( h.process.starts().len() == 3 );

    assert_eq!( h.process.started_titles(), vec![ "A", "B", "A" ] );
    assert_eq!( h.session.queue_titles().await, vec![ "B" ] );
    assert!( h.process.stream( 0 ).is_stopped() );
    assert!( h.process.stream( 1 ).is_stopped() );
}


#[tokio::test( start_paused = true )]
async fn test_track_loop_repeats_until_skipped() {
    let h = Harness::start().await;
    h.session.set_loop_mode( LoopMode::Track ).await.unwrap();
    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ) ] ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    h.process.finish_latest();
    wait_until!( h.process.starts().len() == 2 );
    h.session.skip().await.unwrap();
    wait_until!( h.process.starts().len() == 3 );

    assert_eq!( h.process.started_titles(), vec![ "A", "A", "B" ] );
}


#[tokio::test( start_paused = true )]
async fn test_skip_with_nothing_current() {
    let h = Harness::start().await;
    assert!( matches!( h.session.skip().await, Err( SessionError::NothingToSkip ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_skip_while_loading_abandons_the_track() {
    let h = Harness::start().await;
    h.catalog.set_resolve_delay( Duration::from_secs( 5 ) );
    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ) ] ).await.unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Loading );

    assert_eq!( h.session.skip().await.unwrap(), "A" );
    wait_until!( h.process.starts().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 10 ) ).await;

    assert_eq!( h.process.started_titles(), vec![ "B" ] );
}


#[tokio::test( start_paused = true )]
async fn test_pause_is_idempotent_and_excluded_from_elapsed() {
    let h = Harness::start().await;
    assert!( matches!( h.session.pause().await, Err( SessionError::NothingPlaying ) ) );

    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Playing );
    tokio::time::sleep( Duration::from_secs( 10 ) ).await;

    assert!( h.session.pause().await.unwrap() );
    assert!( !h.session.pause().await.unwrap() );
    assert!( h.process.stream( 0 ).is_paused() );
    tokio::time::sleep( Duration::from_secs( 30 ) ).await;
    assert_eq!( h.session.view().await.elapsed_secs, 10 );

    assert!( h.session.resume().await.unwrap() );
    assert!( !h.session.resume().await.unwrap() );
    assert!( !h.process.stream( 0 ).is_paused() );
    tokio::time::sleep( Duration::from_secs( 5 ) ).await;
    assert_eq!( h.session.view().await.elapsed_secs, 15 );

    assert!( h.session.toggle_pause().await.unwrap() );
    assert_eq!( h.session.phase().await, PlaybackPhase::Paused );
}


#[tokio::test( start_paused = true )]
async fn test_three_resolve_failures_reset_the_queue_once() {
    let h = Harness::start().await;
    let mut events = h.session.subscribe();
    h.catalog.fail( "fake://bad", usize::MAX );

    h.session.enqueue_many( vec![ track( "bad", 200 ), track( "good", 200 ) ] ).await.unwrap();
    wait_until!( h.catalog.resolve_calls().len() == 3 );
    wait_until!( h.session.queue_titles().await.is_empty() );
    tokio::time::sleep( Duration::from_secs( 5 ) ).await;

    assert_eq!( h.session.phase().await, PlaybackPhase::Idle );
    assert!( h.session.current_title().await.is_none() );
    assert_eq!( h.catalog.resolve_calls(), vec![ "fake://bad"; 3 ] );
    assert!( h.process.starts().is_empty() );

    let resets: Vec<_> = common::drain( &mut events )
        .into_iter()
        .filter( |e| matches!( e, SessionEvent::FatalQueueReset { .. } ) )
        .collect();
    assert_eq!( resets.len(), 1 );
    assert_eq!( resets[ 0 ], SessionEvent::FatalQueueReset { title: "bad".into(), attempts: 3, cleared: 1 } );
    assert!( resets[ 0 ].notice().unwrap().contains( "repeated failures" ) );
}


#[tokio::test( start_paused = true )]
async fn test_two_failures_recover_without_clearing() {
    let h = Harness::start().await;
    let mut events = h.session.subscribe();
    h.catalog.fail( "fake://flaky", 1 );
    h.process.fail_next_starts( 1 );

    h.session.enqueue_many( vec![ track( "flaky", 200 ), track( "good", 200 ) ] ).await.unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Playing );

    assert_eq!( h.process.started_titles(), vec![ "flaky" ] );
    assert_eq!( h.session.queue_titles().await, vec![ "good" ] );
    assert!( !common::drain( &mut events ).iter().any( |e| matches!( e, SessionEvent::FatalQueueReset { .. } ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_failure_count_resets_after_success() {
    let mut config = SessionConfig::default();
    config.max_consecutive_failures = 2;
    let h = Harness::with_config( config ).await;
    let mut events = h.session.subscribe();
    h.catalog.fail( "fake://A", 1 );
    h.catalog.fail( "fake://B", 1 );

    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ) ] ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    h.process.finish_latest();
    wait_until!( h.process.starts().len() == 2 );

    assert_eq!( h.process.started_titles(), vec![ "A", "B" ] );
    assert!( !common::drain( &mut events ).iter().any( |e| matches!( e, SessionEvent::FatalQueueReset { .. } ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_skipping_a_failing_track_starts_a_fresh_count() {
    let h = Harness::start().await;
    let mut events = h.session.subscribe();
    h.catalog.set_resolve_delay( Duration::from_secs( 1 ) );
    h.catalog.fail( "fake://A", usize::MAX );
    h.catalog.fail( "fake://B", 1 );

    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ), track( "C", 200 ) ] ).await.unwrap();
    wait_until!( h.catalog.resolve_calls().len() == 3 );
    // Third attempt on A is in flight.
    assert_eq!( h.session.skip().await.unwrap(), "A" );

    wait_until!( h.process.starts().len() == 1 );
    assert_eq!( h.process.started_titles(), vec![ "B" ] );
    assert_eq!( h.session.queue_titles().await, vec![ "C" ] );
    assert!( !common::drain( &mut events ).iter().any( |e| matches!( e, SessionEvent::FatalQueueReset { .. } ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_resolve_timeout_counts_as_failure() {
    let mut config = SessionConfig::default();
    config.resolve_timeout_secs = 2;
    config.max_consecutive_failures = 1;
    let h = Harness::with_config( config ).await;
    h.catalog.set_resolve_delay( Duration::from_secs( 60 ) );

    h.session.enqueue( track( "slow", 200 ) ).await.unwrap();
    wait_until!( h.catalog.resolve_calls().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 3 ) ).await;

    assert_eq!( h.session.phase().await, PlaybackPhase::Idle );
    assert!( h.session.current_title().await.is_none() );
    assert!( h.process.starts().is_empty() );
}


#[tokio::test( start_paused = true )]
async fn test_effect_change_restarts_at_current_position() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 20 ) ).await;

    assert!( h.session.set_effect( "nightcore" ).await.unwrap() );
    wait_until!( h.process.starts().len() == 2 );

    let restart = &h.process.starts()[ 1 ];
    assert_eq!( restart.title, "A" );
    assert_eq!( restart.effect, Effect::Nightcore );
    assert_eq!( restart.seek_offset_secs, 20 );
    assert!( h.process.stream( 0 ).is_stopped() );

    assert!( !h.session.set_effect( "nightcore" ).await.unwrap() );
    assert!( matches!( h.session.set_effect( "reverb" ).await, Err( SessionError::UnknownEffect( _ ) ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_volume_is_validated_applied_and_persisted() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    h.session.set_volume( 0.3 ).await.unwrap();
    assert_eq!( *h.process.stream( 0 ).volume.lock().unwrap(), 0.3 );
    assert_eq!( h.settings.get( "guild-1" ).unwrap().volume, Some( 0.3 ) );
    assert_eq!( h.session.view().await.volume_percent, 30 );

    assert!( matches!( h.session.set_volume( 1.5 ).await, Err( SessionError::InvalidVolume( _ ) ) ) );
    assert_eq!( h.session.volume().await, 0.3 );
}


#[tokio::test( start_paused = true )]
async fn test_queue_editing_commands() {
    let h = Harness::start().await;
    h.catalog.set_resolve_delay( Duration::from_secs( 600 ) );
    h.session.enqueue_many( vec![ track( "A", 200 ), track( "B", 200 ), track( "C", 200 ), track( "D", 200 ) ] ).await.unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Loading );

    h.session.move_to_front( 2 ).await.unwrap();
    assert_eq!( h.session.queue_titles().await, vec![ "D", "B", "C" ] );
    assert_eq!( h.session.remove_at( 1 ).await.unwrap().title, "B" );
    assert!( matches!( h.session.remove_at( 5 ).await, Err( SessionError::Queue( _ ) ) ) );
    h.session.shuffle_queue().await.unwrap();
    assert_eq!( h.session.queue_titles().await.len(), 2 );
    assert_eq!( h.session.clear_queue().await.unwrap(), 2 );
    assert!( matches!( h.session.shuffle_queue().await, Err( SessionError::NotEnoughToShuffle ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_display_receives_now_playing() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 200 ) ).await.unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Playing );
    tokio::time::sleep( Duration::from_secs( 3 ) ).await;

    let last = h.display.views().last().cloned().unwrap();
    assert_eq!( last.title.as_deref(), Some( "A" ) );
    assert_eq!( last.phase, PlaybackPhase::Playing );
}
