//! Autoplay follow-ups when the queue drains.

#[macro_use]
mod common;

use std::time::Duration;

use common::{ info, track, Harness, UPLOADER };
use tunebot_core::{ PlaybackPhase, Requester, SessionEvent };


#[tokio::test( start_paused = true )]
async fn test_drained_queue_plays_a_filtered_follow_up() {
    let h = Harness::start().await;
    assert!( h.session.toggle_autoplay().await.unwrap() );
    assert!( h.settings.get( "guild-1" ).unwrap().autoplay_enabled );
    let mut events = h.session.subscribe();

    h.catalog.set_search_results( vec![
        info( "Band - Blue Sky (Official Audio)", UPLOADER, 200 ),
        info( "Band - Short Jingle", UPLOADER, 60 ),
        info( "Band - Long Mix", UPLOADER, 700 ),
        info( "Band - Exactly Ninety", UPLOADER, 90 ),
        info( "Band - Red Dawn", UPLOADER, 240 ),
    ] );
    h.session.enqueue( track( "Band - Blue Sky", 200 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    h.process.finish_latest();
    wait_until!( h.process.starts().len() == 2 );

    assert_eq!( h.process.started_titles()[ 1 ], "Band - Red Dawn" );
    let queries = h.catalog.queries();
    assert_eq!( queries.len(), 1 );
    assert!( queries[ 0 ].starts_with( UPLOADER ) );
    assert!( common::drain( &mut events ).iter().any( |e| matches!(
        e,
        SessionEvent::AutoplayQueued { title, .. } if title == "Band - Red Dawn"
    )));

    let view = h.session.view().await;
    assert_eq!( view.requester, Some( Requester::Autoplay ) );
}


#[tokio::test( start_paused = true )]
async fn test_no_usable_candidate_stays_idle() {
    let h = Harness::start().await;
    h.session.toggle_autoplay().await.unwrap();
    h.catalog.set_search_results( vec![
        info( "Band - Song (Official MV)", UPLOADER, 200 ),
        info( "Band - Song reaction", "Someone", 200 ),
        info( "Band - Four Minute Drone", UPLOADER, 600 ),
    ] );

    h.session.enqueue( track( "Band - Song", 200 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    h.process.finish_latest();
    wait_until!( h.catalog.queries().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 30 ) ).await;

    assert_eq!( h.process.starts().len(), 1 );
    assert_eq!( h.session.phase().await, PlaybackPhase::Idle );
    assert!( h.session.queue_titles().await.is_empty() );
}


#[tokio::test( start_paused = true )]
async fn test_autoplay_off_does_not_search() {
    let h = Harness::start().await;
    h.catalog.set_search_results( vec![ info( "Band - Red Dawn", UPLOADER, 240 ) ] );
    h.session.enqueue( track( "Band - Blue Sky", 200 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    h.process.finish_latest();
    wait_until!( h.session.phase().await == PlaybackPhase::Idle );
    tokio::time::sleep( Duration::from_secs( 30 ) ).await;

    assert!( h.catalog.queries().is_empty() );
    assert_eq!( h.process.starts().len(), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_manual_enqueue_cancels_search_in_flight() {
    let h = Harness::start().await;
    h.session.toggle_autoplay().await.unwrap();
    h.catalog.set_search_results( vec![ info( "Band - Red Dawn", UPLOADER, 240 ) ] );
    h.catalog.set_search_delay( Duration::from_secs( 5 ) );
    let mut events = h.session.subscribe();

    h.session.enqueue( track( "Band - Blue Sky", 200 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    h.process.finish_latest();
    wait_until!( h.catalog.queries().len() == 1 );

    h.session.enqueue( track( "Manual Pick", 200 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 2 );
    tokio::time::sleep( Duration::from_secs( 30 ) ).await;

    assert_eq!( h.process.started_titles(), vec![ "Band - Blue Sky", "Manual Pick" ] );
    assert!( h.session.queue_titles().await.is_empty() );
    assert!( !common::drain( &mut events ).iter().any( |e| matches!( e, SessionEvent::AutoplayQueued { .. } ) ) );
}
