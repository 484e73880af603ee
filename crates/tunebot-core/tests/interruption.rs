//! Announcement interruptions and resume.

#[macro_use]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ track, Harness };
use tunebot_core::{ LoopMode, PlaybackPhase, SessionError, SessionEvent };


#[tokio::test( start_paused = true )]
async fn test_interrupted_track_resumes_from_captured_offset() {
    let h = Harness::start().await;
    let mut events = h.session.subscribe();
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 42 ) ).await;

    let session = Arc::clone( &h.session );
    let announcing = tokio::spawn( async move { session.interrupt_with_announcement( "hello" ).await } );
    wait_until!( h.process.announcements().len() == 1 );

    assert!( h.process.stream( 0 ).is_stopped() );
    assert_eq!( h.process.announcements()[ 0 ].clip.as_ref().unwrap().text, "hello" );
    let view = h.session.view().await;
    assert!( view.announcing );
    assert_eq!( view.next_title.as_deref(), Some( "A" ) );

    // Nothing resumes while the clip is playing.
    tokio::time::sleep( Duration::from_secs( 5 ) ).await;
    assert_eq!( h.process.starts().len(), 1 );
    assert!( !announcing.is_finished() );

    assert!( h.process.finish_announcement() );
    announcing.await.unwrap().unwrap();
    wait_until!( h.process.starts().len() == 2 );

    let resumed = &h.process.starts()[ 1 ];
    assert_eq!( resumed.title, "A" );
    assert_eq!( resumed.seek_offset_secs, 42 );
    assert!( common::drain( &mut events ).contains( &SessionEvent::AnnouncementFinished ) );
}


#[tokio::test( start_paused = true )]
async fn test_track_still_loading_resumes_from_zero() {
    let h = Harness::start().await;
    h.catalog.set_resolve_delay( Duration::from_secs( 3 ) );
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Loading );

    let session = Arc::clone( &h.session );
    let announcing = tokio::spawn( async move { session.interrupt_with_announcement( "breaking news" ).await } );
    wait_until!( h.process.announcements().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 5 ) ).await;
    // The abandoned load must not start underneath the announcement.
    assert!( h.process.starts().is_empty() );

    h.process.finish_announcement();
    announcing.await.unwrap().unwrap();
    wait_until!( h.process.starts().len() == 1 );
    assert_eq!( h.process.starts()[ 0 ].title, "A" );
    assert_eq!( h.process.starts()[ 0 ].seek_offset_secs, 0 );
}


#[tokio::test( start_paused = true )]
async fn test_interrupt_on_idle_session_plays_and_returns() {
    let h = Harness::start().await;
    let session = Arc::clone( &h.session );
    let announcing = tokio::spawn( async move { session.interrupt_with_announcement( "welcome" ).await } );
    wait_until!( h.process.announcements().len() == 1 );

    h.process.finish_announcement();
    announcing.await.unwrap().unwrap();
    tokio::time::sleep( Duration::from_secs( 1 ) ).await;
    assert!( h.process.starts().is_empty() );
    assert_eq!( h.session.phase().await, PlaybackPhase::Idle );
    assert!( !h.session.view().await.announcing );
}


#[tokio::test( start_paused = true )]
async fn test_second_interrupt_waits_for_the_first() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    let first = {
        let session = Arc::clone( &h.session );
        tokio::spawn( async move { session.interrupt_with_announcement( "one" ).await } )
    };
    wait_until!( h.process.announcements().len() == 1 );
    let second = {
        let session = Arc::clone( &h.session );
        tokio::spawn( async move { session.interrupt_with_announcement( "two" ).await } )
    };
    tokio::time::sleep( Duration::from_secs( 2 ) ).await;
    assert_eq!( h.process.announcements().len(), 1 );

    h.process.finish_announcement();
    first.await.unwrap().unwrap();
    wait_until!( h.process.announcements().len() == 2 );
    assert_eq!( h.process.announcements()[ 1 ].clip.as_ref().unwrap().text, "two" );

    h.process.finish_announcement();
    second.await.unwrap().unwrap();
    wait_until!( h.session.phase().await == PlaybackPhase::Playing );
    assert_eq!( h.process.started_titles().last().map( String::as_str ), Some( "A" ) );
}


#[tokio::test( start_paused = true )]
async fn test_synthesis_failure_leaves_playback_alone() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    h.announcer.fail();

    let result = h.session.interrupt_with_announcement( "oops" ).await;
    assert!( matches!( result, Err( SessionError::Announcement( _ ) ) ) );
    assert!( !h.process.stream( 0 ).is_stopped() );
    assert_eq!( h.session.phase().await, PlaybackPhase::Playing );
}


#[tokio::test( start_paused = true )]
async fn test_announcement_start_failure_resumes_playback() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 7 ) ).await;
    h.process.fail_announcements();

    let result = h.session.interrupt_with_announcement( "lost" ).await;
    assert!( matches!( result, Err( SessionError::Process( _ ) ) ) );
    wait_until!( h.process.starts().len() == 2 );
    assert_eq!( h.process.starts()[ 1 ].seek_offset_secs, 7 );
    assert!( !h.session.view().await.announcing );
}


#[tokio::test( start_paused = true )]
async fn test_paused_time_is_not_counted_in_the_offset() {
    let h = Harness::start().await;
    h.session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 12 ) ).await;
    h.session.pause().await.unwrap();
    tokio::time::sleep( Duration::from_secs( 60 ) ).await;

    let session = Arc::clone( &h.session );
    let announcing = tokio::spawn( async move { session.interrupt_with_announcement( "hi" ).await } );
    wait_until!( h.process.announcements().len() == 1 );
    h.process.finish_announcement();
    announcing.await.unwrap().unwrap();

    wait_until!( h.process.starts().len() == 2 );
    assert_eq!( h.process.starts()[ 1 ].seek_offset_secs, 12 );
}


#[tokio::test( start_paused = true )]
async fn test_announcement_right_after_skip_does_not_bring_the_track_back() {
    let h = Harness::start().await;
    h.session.set_loop_mode( LoopMode::Queue ).await.unwrap();
    h.session.enqueue_many( vec![ track( "A", 300 ), track( "B", 300 ) ] ).await.unwrap();
    wait_until!( h.process.starts().len() == 1 );

    h.session.skip().await.unwrap();
    assert_eq!( h.session.queue_titles().await, vec![ "B", "A" ] );

    // Poll once so the announcement takes over before the loop advances.
    let announcing = h.session.interrupt_with_announcement( "hi" );
    tokio::pin!( announcing );
    let finished_early = tokio::select! {
        biased;
        _ = &mut announcing => true,
        _ = std::future::ready( () ) => false,
    };
    assert!( !finished_early );
    assert_eq!( h.process.announcements().len(), 1 );
    assert_eq!( h.session.queue_titles().await, vec![ "B", "A" ] );

    assert!( h.process.finish_announcement() );
    announcing.await.unwrap();
    wait_until!( h.process.starts().len() == 2 );
    tokio::time::sleep( Duration::from_secs( 5 ) ).await;

    assert_eq!( h.process.started_titles(), vec![ "A", "B" ] );
    assert_eq!( h.session.queue_titles().await, vec![ "A" ] );
}
