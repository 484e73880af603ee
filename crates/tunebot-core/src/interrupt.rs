//! Announcement interruptions
//!
//! Suspends the current track, plays a synthesized clip, then lets the
//! loop resume the track from where it stopped. Interruptions on one
//! session run one at a time.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::engine::requeue_current;
use crate::external::{ AnnouncementError, CompletionKind, CompletionSender };
use crate::session::{ SessionError, SessionShared };
use crate::state::{ ActiveAnnouncement, SessionEvent };


/// Plays `text` over the session and returns once it has finished.
pub(crate) async fn announce( shared: &Arc<SessionShared>, text: &str ) -> Result<(), SessionError> {
    // Held for the whole interruption. A second caller waits here.
    let _turn = shared.announcement_lock.lock().await;
    if shared.state.lock().await.closed {
        return Err( SessionError::Closed( shared.id.clone() ) );
    }

    let clip = match tokio::time::timeout( shared.config.announcement_timeout(), shared.announcer.synthesize( text ) ).await {
        Ok( Ok( clip ) ) => clip,
        Ok( Err( e ) ) => {
            tracing::warn!( "[{}] {}", shared.id, e );
            return Err( e.into() );
        }
        Err( _ ) => {
            tracing::warn!( "[{}] Announcement synthesis timed out", shared.id );
            return Err( AnnouncementError::Timeout.into() );
        }
    };

    let ( done_tx, done_rx ) = oneshot::channel();
    let generation = {
        let mut state = shared.state.lock().await;
        if state.closed {
            return Err( SessionError::Closed( shared.id.clone() ) );
        }
        state.announcement_seq += 1;
        let generation = state.announcement_seq;

        let title = state.current.as_ref().map( |t| t.title.clone() );
        if let ( Some( title ), Some( offset ) ) = ( title, requeue_current( &mut state, Instant::now(), true ) ) {
            tracing::info!( "[{}] Suspending '{}' at {}s for an announcement", shared.id, title, offset );
        }
        state.suspended = true;
        state.announcement = Some( ActiveAnnouncement { generation, handle: None, done: Some( done_tx ) } );
        state.emit( SessionEvent::AnnouncementStarted { text: text.to_string() } );
        shared.publish( &state );
        generation
    };

    let done = CompletionSender::new( shared.completions.clone(), generation, CompletionKind::Announcement, None );
    let started = shared.process.play_announcement( clip, done ).await;

    {
        let mut state = shared.state.lock().await;
        match started {
            Ok( handle ) => match state.announcement.as_mut() {
                Some( announcement ) if announcement.generation == generation => {
                    announcement.handle = Some( handle );
                }
                // Already finished or torn down.
                _ => handle.stop(),
            },
            Err( e ) => {
                tracing::error!( "[{}] Could not play announcement: {}", shared.id, e );
                if state.announcement.as_ref().is_some_and( |a| a.generation == generation ) {
                    state.announcement = None;
                }
                state.suspended = false;
                state.emit( SessionEvent::AnnouncementFinished );
                shared.advance.signal();
                shared.publish( &state );
                return Err( e.into() );
            }
        }
    }

    // Resolves on completion, or errors when the session is torn down.
    let _ = done_rx.await;
    Ok(())
}
