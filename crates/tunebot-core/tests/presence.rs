//! Greetings and auto-vacate driven by voice channel events.

#[macro_use]
mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use common::{ track, FakeProcess, Fakes };
use tunebot_core::{ PresenceOutcome, PresencePolicy, SessionConfig, SessionRegistry, VoiceEvent };


fn policy() -> ( Arc<SessionRegistry>, Arc<FakeProcess>, Arc<PresencePolicy> ) {
    let fakes = Fakes::new();
    let process = Arc::clone( &fakes.process );
    let registry = Arc::new( SessionRegistry::new( SessionConfig::default(), fakes.collaborators() ) );
    let policy = Arc::new( PresencePolicy::new( Arc::clone( &registry ) ) );
    ( registry, process, policy )
}


fn left( listeners: usize ) -> VoiceEvent {
    VoiceEvent::MemberLeft { listeners }
}


#[tokio::test( start_paused = true )]
async fn test_arriving_member_is_greeted_over_the_music() {
    let ( registry, process, policy ) = policy();
    let session = registry.get_or_create( "g" ).await;
    session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( process.starts().len() == 1 );
    tokio::time::sleep( Duration::from_secs( 30 ) ).await;

    let joined = VoiceEvent::MemberJoined { display_name: "Bartholomew the Third".into(), listeners: 2 };
    assert_eq!( policy.handle( "g", joined ).await, PresenceOutcome::Greeted );
    wait_until!( process.announcements().len() == 1 );
    assert_eq!( process.announcements()[ 0 ].clip.as_ref().unwrap().text, "Bartholome... has joined." );

    process.finish_announcement();
    wait_until!( process.starts().len() == 2 );
    assert_eq!( process.starts()[ 1 ].seek_offset_secs, 30 );
}


#[tokio::test( start_paused = true )]
async fn test_bot_greeting_waits_for_the_delay() {
    let ( registry, process, policy ) = policy();
    registry.get_or_create( "g" ).await;

    assert_eq!( policy.handle( "g", VoiceEvent::BotJoined ).await, PresenceOutcome::Greeted );
    tokio::time::sleep( Duration::from_millis( 1_000 ) ).await;
    assert!( process.announcements().is_empty() );

    wait_until!( process.announcements().len() == 1 );
    assert_eq!( process.announcements()[ 0 ].clip.as_ref().unwrap().text, "Tunebot has joined." );
}


#[tokio::test( start_paused = true )]
async fn test_left_alone_vacates_after_grace() {
    let ( registry, process, policy ) = policy();
    let session = registry.get_or_create( "g" ).await;
    session.enqueue( track( "A", 300 ) ).await.unwrap();
    wait_until!( process.starts().len() == 1 );

    assert_eq!( policy.handle( "g", left( 1 ) ).await, PresenceOutcome::Ignored );
    assert!( registry.get( "g" ).await.is_some() );

    let begun = Instant::now();
    assert_eq!( policy.handle( "g", left( 0 ) ).await, PresenceOutcome::Vacated );
    assert!( begun.elapsed() >= Duration::from_secs( 2 ) );
    assert!( registry.get( "g" ).await.is_none() );
    assert!( session.is_closed().await );
    assert!( process.stream( 0 ).is_stopped() );
}


#[tokio::test( start_paused = true )]
async fn test_returning_listener_cancels_the_vacate() {
    let ( registry, _process, policy ) = policy();
    registry.get_or_create( "g" ).await;

    let leaving = {
        let policy = Arc::clone( &policy );
        tokio::spawn( async move { policy.handle( "g", left( 0 ) ).await } )
    };
    tokio::time::sleep( Duration::from_millis( 500 ) ).await;
    let back = VoiceEvent::MemberJoined { display_name: "Ann".into(), listeners: 1 };
    policy.handle( "g", back ).await;

    assert_eq!( leaving.await.unwrap(), PresenceOutcome::Stayed );
    assert!( registry.get( "g" ).await.is_some() );
}


#[tokio::test( start_paused = true )]
async fn test_events_without_a_session_are_ignored() {
    let ( registry, process, policy ) = policy();

    assert_eq!( policy.handle( "nowhere", VoiceEvent::BotJoined ).await, PresenceOutcome::Ignored );
    assert_eq!( policy.handle( "nowhere", left( 0 ) ).await, PresenceOutcome::Ignored );
    assert_eq!( policy.handle( "nowhere", VoiceEvent::BotLeft ).await, PresenceOutcome::Ignored );

    registry.get_or_create( "g" ).await;
    assert_eq!( policy.handle( "g", VoiceEvent::BotLeft ).await, PresenceOutcome::Vacated );
    assert!( registry.is_empty().await );
    assert!( process.announcements().is_empty() );
}
