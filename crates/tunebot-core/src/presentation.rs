//! Presentation sync
//!
//! Pushes read-only session snapshots to the remote display while keeping
//! to a push-rate budget. Bursts inside one cooldown window coalesce into a
//! single deferred push of the newest snapshot.

use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::effect::Effect;
use crate::external::{ DisplaySink, PushError };
use crate::queue::LoopMode;
use crate::state::PlaybackPhase;
use crate::track::Requester;


/// Read-only projection of a session for the display layer.
#[derive( Debug, Clone, PartialEq, Default )]
pub struct SessionView {
    pub phase: PlaybackPhase,
    pub title: Option<String>,
    pub locator: Option<String>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub requester: Option<Requester>,
    pub elapsed_secs: u64,
    pub duration_secs: u64,
    /// Fraction of the track played, 0.0 to 1.0.
    pub progress: f64,
    pub paused: bool,
    pub volume_percent: u32,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub effect: Effect,
    pub next_title: Option<String>,
    pub queue_len: usize,
    pub announcing: bool,
}


#[derive( Default )]
struct SyncState {
    latest: Option<SessionView>,
    /// Start of the current cooldown window: the last successful push, or
    /// the issue time of a push still in flight.
    last_push: Option<Instant>,
    pending: Option<JoinHandle<()>>,
    closed: bool,
}


struct SyncShared {
    session_id: String,
    sink: Arc<dyn DisplaySink>,
    cooldown: Duration,
    backoff: Duration,
    state: Mutex<SyncState>,
}


/// Debounced, rate-limited display pusher for one session.
#[derive( Clone )]
pub struct PresentationSync {
    shared: Arc<SyncShared>,
}


impl PresentationSync {
    pub fn new( session_id: impl Into<String>, sink: Arc<dyn DisplaySink>, cooldown: Duration, backoff: Duration ) -> Self {
        Self {
            shared: Arc::new( SyncShared {
                session_id: session_id.into(),
                sink,
                cooldown,
                backoff,
                state: Mutex::new( SyncState::default() ),
            }),
        }
    }


    /// Records a new snapshot and pushes it now or after the cooldown.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule( &self, view: SessionView ) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.latest = Some( view );

        if let Some( pending ) = state.pending.take() {
            pending.abort();
        }

        let now = Instant::now();
        let wait = match state.last_push {
            Some( at ) => self.shared.cooldown.saturating_sub( now.saturating_duration_since( at ) ),
            None => Duration::ZERO,
        };

        let shared = Arc::clone( &self.shared );
        if wait.is_zero() {
            let previous = state.last_push.replace( now );
            tokio::spawn( async move {
                shared.push_latest( now, previous ).await;
            });
        } else {
            tracing::trace!( "[{}] Deferring display push by {:?}", self.shared.session_id, wait );
            state.pending = Some( tokio::spawn( async move {
                tokio::time::sleep( wait ).await;
                let ( reserved, previous ) = {
                    let mut state = shared.lock();
                    let at = Instant::now();
                    ( at, state.last_push.replace( at ) )
                };
                shared.push_latest( reserved, previous ).await;
            }));
        }
    }


    /// Drops any deferred push and refuses further scheduling.
    pub fn cancel( &self ) {
        let mut state = self.shared.lock();
        state.closed = true;
        if let Some( pending ) = state.pending.take() {
            pending.abort();
        }
    }


    /// Returns true while a deferred push is armed.
    pub fn has_pending( &self ) -> bool {
        self.shared.lock().pending.as_ref().is_some_and( |p| !p.is_finished() )
    }
}


impl SyncShared {
    fn lock( &self ) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else( PoisonError::into_inner )
    }


    fn latest( &self ) -> Option<SessionView> {
        let state = self.lock();
        if state.closed {
            return None;
        }
        state.latest.clone()
    }


    /// Pushes the newest snapshot, retrying once on a rate-limit signal.
    async fn push_latest( &self, reserved: Instant, previous: Option<Instant> ) {
        let Some( view ) = self.latest() else {
            return;
        };

        let result = match self.sink.push( &view ).await {
            Err( PushError::RateLimited ) => {
                tracing::warn!(
                    "[{}] Display rate limited, retrying in {:?}",
                    self.session_id,
                    self.backoff
                );
                tokio::time::sleep( self.backoff ).await;
                match self.latest() {
                    Some( view ) => self.sink.push( &view ).await,
                    None => return,
                }
            }
            other => other,
        };

        let mut state = self.lock();
        match result {
            Ok(()) => {
                state.last_push = Some( Instant::now() );
            }
            Err( e ) => {
                tracing::error!( "[{}] Display update dropped: {}", self.session_id, e );
                // Give the window back unless a newer push already claimed it.
                if state.last_push == Some( reserved ) {
                    state.last_push = previous;
                }
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;


    #[derive( Default )]
    struct RecordingSink {
        pushes: Mutex<Vec<( Instant, SessionView )>>,
        script: Mutex<VecDeque<Result<(), PushError>>>,
    }


    impl RecordingSink {
        fn scripted( results: Vec<Result<(), PushError>> ) -> Arc<Self> {
            Arc::new( Self { script: Mutex::new( results.into() ), ..Default::default() } )
        }


        fn pushed( &self ) -> Vec<( Instant, SessionView )> {
            self.pushes.lock().unwrap().clone()
        }
    }


    #[async_trait]
    impl DisplaySink for RecordingSink {
        async fn push( &self, view: &SessionView ) -> Result<(), PushError> {
            self.pushes.lock().unwrap().push(( Instant::now(), view.clone() ));
            self.script.lock().unwrap().pop_front().unwrap_or( Ok(()) )
        }
    }


    fn view( queue_len: usize ) -> SessionView {
        SessionView { queue_len, ..Default::default() }
    }


    fn sync( sink: Arc<RecordingSink> ) -> PresentationSync {
        PresentationSync::new( "test", sink, Duration::from_secs( 2 ), Duration::from_secs( 5 ) )
    }


    #[tokio::test( start_paused = true )]
    async fn test_first_push_is_immediate() {
        let sink = RecordingSink::scripted( vec![] );
        let sync = sync( Arc::clone( &sink ) );
        let t0 = Instant::now();

        sync.schedule( view( 1 ) );
        tokio::time::sleep( Duration::from_millis( 1 ) ).await;

        let pushed = sink.pushed();
        assert_eq!( pushed.len(), 1 );
        assert!( pushed[ 0 ].0 - t0 < Duration::from_millis( 5 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_burst_within_window_coalesces_to_last_view() {
        let sink = RecordingSink::scripted( vec![] );
        let sync = sync( Arc::clone( &sink ) );
        let t0 = Instant::now();

        sync.schedule( view( 0 ) );
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        for n in 1..=6 {
            sync.schedule( view( n ) );
            tokio::time::sleep( Duration::from_millis( 100 ) ).await;
        }
        assert!( sync.has_pending() );
        tokio::time::sleep( Duration::from_secs( 3 ) ).await;

        let pushed = sink.pushed();
        assert_eq!( pushed.len(), 2, "one immediate push plus one coalesced push" );
        assert_eq!( pushed[ 1 ].1.queue_len, 6 );
        assert!( pushed[ 1 ].0 - t0 >= Duration::from_secs( 2 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_rate_limit_retries_once_after_backoff() {
        let sink = RecordingSink::scripted( vec![ Err( PushError::RateLimited ), Err( PushError::RateLimited ) ] );
        let sync = sync( Arc::clone( &sink ) );
        let t0 = Instant::now();

        sync.schedule( view( 3 ) );
        tokio::time::sleep( Duration::from_secs( 20 ) ).await;

        let pushed = sink.pushed();
        assert_eq!( pushed.len(), 2 );
        assert!( pushed[ 1 ].0 - t0 >= Duration::from_secs( 5 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_failed_push_is_dropped_and_frees_window() {
        let sink = RecordingSink::scripted( vec![ Err( PushError::Failed( "boom".into() ) ) ] );
        let sync = sync( Arc::clone( &sink ) );

        sync.schedule( view( 1 ) );
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        assert_eq!( sink.pushed().len(), 1 );

        // No retry happened, and the next mutation is not held back.
        sync.schedule( view( 2 ) );
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        assert_eq!( sink.pushed().len(), 2 );
        assert!( !sync.has_pending() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_cancel_drops_pending_push() {
        let sink = RecordingSink::scripted( vec![] );
        let sync = sync( Arc::clone( &sink ) );

        sync.schedule( view( 1 ) );
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        sync.schedule( view( 2 ) );
        sync.cancel();
        tokio::time::sleep( Duration::from_secs( 5 ) ).await;

        assert_eq!( sink.pushed().len(), 1 );
        sync.schedule( view( 3 ) );
        tokio::time::sleep( Duration::from_secs( 5 ) ).await;
        assert_eq!( sink.pushed().len(), 1 );
    }
}
