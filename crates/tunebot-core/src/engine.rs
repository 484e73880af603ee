//! Playback engine
//!
//! One loop per session. It sleeps until something asks it to advance or a
//! completion arrives, then re-reads session state and decides what plays.
//! Everything it changes goes through the session update lock.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::autoplay;
use crate::external::{
    ActiveAudio, CompletionKind, CompletionSender, PlaybackCompletion, ProcessStartError,
    ResolutionError, StartRequest,
};
use crate::queue::LoopMode;
use crate::session::SessionShared;
use crate::state::{ ActiveStream, PlaybackPhase, SessionEvent, SessionState };
use crate::track::Track;


/// Why a track could not be started.
#[derive( Debug )]
enum StartFailure {
    Resolve( ResolutionError ),
    Process( ProcessStartError ),
}


impl fmt::Display for StartFailure {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            StartFailure::Resolve( e ) => write!( f, "{}", e ),
            StartFailure::Process( e ) => write!( f, "{}", e ),
        }
    }
}


/// A stream the process accepted.
struct Started {
    handle: Box<dyn ActiveAudio>,
    interrupted: Arc<AtomicBool>,
    stream_locator: String,
    request: StartRequest,
}


pub(crate) struct PlaybackEngine {
    shared: Arc<SessionShared>,
    completions: mpsc::UnboundedReceiver<PlaybackCompletion>,
}


impl PlaybackEngine {
    pub fn new( shared: Arc<SessionShared>, completions: mpsc::UnboundedReceiver<PlaybackCompletion> ) -> Self {
        Self { shared, completions }
    }


    /// Runs until `cancel` fires.
    pub async fn run( mut self, cancel: CancellationToken ) {
        tracing::info!( "[{}] Playback loop started", self.shared.id );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some( done ) = self.completions.recv() => self.on_completion( done ).await,
                _ = self.shared.advance.wait() => self.advance().await,
            }
        }
        tracing::info!( "[{}] Playback loop stopped", self.shared.id );
    }


    /// Picks the next track and starts it, or goes idle.
    async fn advance( &mut self ) {
        let ( track, slot ) = {
            let mut state = self.shared.state.lock().await;
            if state.closed || state.suspended || state.active.is_some() || state.announcement.is_some() {
                return;
            }

            let previous = state.current.take();
            let skip_repeat = std::mem::take( &mut state.skip_repeat );
            let next = match previous.clone() {
                Some( track ) if state.loop_mode == LoopMode::Track && !skip_repeat => Some( track ),
                _ => state.queue.pop_front(),
            };

            let Some( track ) = next else {
                state.clock.reset();
                state.set_phase( PlaybackPhase::Idle );
                if let Some( finished ) = previous {
                    tracing::info!( "[{}] Queue drained", self.shared.id );
                    if state.autoplay_enabled && !state.autoplay_running() {
                        let task = tokio::spawn( autoplay::explore( Arc::clone( &self.shared ), finished ) );
                        state.autoplay_task = Some( task );
                    }
                    self.shared.publish( &state );
                }
                return;
            };

            if state.failing_locator.as_deref() != Some( track.locator.as_str() ) {
                state.consecutive_failures = 0;
                state.failing_locator = None;
            }
            state.slot += 1;
            state.current = Some( track.clone() );
            state.set_phase( PlaybackPhase::Loading );
            self.shared.publish( &state );
            ( track, state.slot )
        };

        tracing::info!( "[{}] Loading '{}'", self.shared.id, track.title );
        let result = self.start( &track, slot ).await;

        let mut state = self.shared.state.lock().await;
        if state.slot != slot || state.closed {
            tracing::debug!( "[{}] '{}' was superseded while loading", self.shared.id, track.title );
            if let Ok( Some( started ) ) = result {
                started.handle.stop();
            }
            return;
        }
        match result {
            Ok( Some( started ) ) => self.on_started( &mut state, slot, started ),
            Ok( None ) => {}
            Err( failure ) => self.on_start_failed( &mut state, failure ),
        }
    }


    /// Resolves and starts `track`. `Ok( None )` means the slot moved on
    /// between the two steps.
    async fn start( &self, track: &Track, slot: u64 ) -> Result<Option<Started>, StartFailure> {
        let stream_locator = self.resolve_stream( track ).await.map_err( StartFailure::Resolve )?;

        let request = {
            let state = self.shared.state.lock().await;
            if state.slot != slot || state.closed {
                return Ok( None );
            }
            StartRequest {
                title: track.title.clone(),
                stream_locator: stream_locator.clone(),
                seek_offset_secs: state.seek_offset_secs,
                effect: state.effect,
                volume: state.volume,
            }
        };

        let done = CompletionSender::new(
            self.shared.completions.clone(),
            slot,
            CompletionKind::Track,
            Some( track.locator.clone() ),
        );
        let interrupted = done.interrupt_flag();
        let handle = self.shared.process
            .start( request.clone(), done )
            .await
            .map_err( StartFailure::Process )?;

        Ok( Some( Started { handle, interrupted, stream_locator, request } ) )
    }


    /// Re-resolves the locator for a fresh stream address.
    async fn resolve_stream( &self, track: &Track ) -> Result<String, ResolutionError> {
        let limit = self.shared.config.resolve_timeout();
        let info = match tokio::time::timeout( limit, self.shared.catalog.resolve( &track.locator ) ).await {
            Ok( result ) => result?,
            Err( _ ) => return Err( ResolutionError::Timeout( limit.as_secs() ) ),
        };
        info.stream_locator
            .filter( |s| !s.is_empty() )
            .ok_or_else( || ResolutionError::NoStream( track.title.clone() ) )
    }


    fn on_started( &self, state: &mut SessionState, slot: u64, started: Started ) {
        let Started { handle, interrupted, stream_locator, request } = started;
        if state.volume != request.volume {
            handle.set_volume( state.volume );
        }

        state.seek_offset_secs = 0;
        state.consecutive_failures = 0;
        state.failing_locator = None;
        state.clock.start( Instant::now(), request.seek_offset_secs, request.effect.speed_factor() );
        state.active = Some( ActiveStream { generation: slot, handle, interrupted } );
        if let Some( current ) = state.current.as_mut() {
            current.stream_locator = Some( stream_locator );
        }
        if let Some( current ) = state.current.clone() {
            self.shared.explorer.record( &mut state.recent, &current );
        }
        state.set_phase( PlaybackPhase::Playing );

        tracing::info!(
            "[{}] Playing '{}' from {}s ({})",
            self.shared.id,
            request.title,
            request.seek_offset_secs,
            request.effect
        );
        state.emit( SessionEvent::TrackStarted {
            title: request.title,
            seek_offset_secs: request.seek_offset_secs,
        });
        self.shared.publish( state );
    }


    fn on_start_failed( &self, state: &mut SessionState, failure: StartFailure ) {
        state.consecutive_failures += 1;
        let attempts = state.consecutive_failures;
        let title = state.current.as_ref().map( |t| t.title.clone() ).unwrap_or_default();
        tracing::error!(
            "[{}] Failed to start '{}': {} (consecutive failures: {})",
            self.shared.id,
            title,
            failure,
            attempts
        );

        if attempts >= self.shared.config.max_consecutive_failures {
            let cleared = state.queue.clear();
            state.current = None;
            state.seek_offset_secs = 0;
            state.consecutive_failures = 0;
            state.failing_locator = None;
            state.skip_repeat = false;
            state.clock.reset();
            state.cancel_autoplay();
            state.set_phase( PlaybackPhase::Idle );
            tracing::warn!( "[{}] Queue cleared after repeated failures ({} removed)", self.shared.id, cleared );
            state.emit( SessionEvent::FatalQueueReset { title, attempts, cleared } );
        } else {
            // Retry the same track from the head of the queue.
            if let Some( track ) = state.current.take() {
                state.failing_locator = Some( track.locator.clone() );
                state.queue.prepend( track );
            }
            state.clock.reset();
            state.set_phase( PlaybackPhase::ErrorRecovery );
            self.shared.advance.signal();
        }
        self.shared.publish( state );
    }


    async fn on_completion( &mut self, done: PlaybackCompletion ) {
        let mut state = self.shared.state.lock().await;
        match done.kind {
            CompletionKind::Track => {
                let is_current = state.active.as_ref().is_some_and( |a| a.generation == done.generation );
                if !is_current || state.suspended {
                    tracing::trace!( "[{}] Ignoring stale completion (generation {})", self.shared.id, done.generation );
                    return;
                }
                state.active = None;
                if let Some( error ) = &done.error {
                    tracing::warn!( "[{}] Stream ended with error: {}", self.shared.id, error );
                }
                retire_current( &mut state, false, done.error );
                self.shared.advance.signal();
                self.shared.publish( &state );
            }
            CompletionKind::Announcement => {
                let matches = state.announcement.as_ref().is_some_and( |a| a.generation == done.generation );
                if !matches {
                    return;
                }
                if let Some( mut announcement ) = state.announcement.take() {
                    if let Some( tx ) = announcement.done.take() {
                        let _ = tx.send( () );
                    }
                }
                state.suspended = false;
                tracing::info!( "[{}] Announcement finished, resuming", self.shared.id );
                state.emit( SessionEvent::AnnouncementFinished );
                self.shared.advance.signal();
                self.shared.publish( &state );
            }
        }
    }
}


/// Ends the current track without dropping it: it stays in `current` as the
/// previous track for the next advance.
pub(crate) fn retire_current( state: &mut SessionState, skipped: bool, error: Option<String> ) {
    state.clock.reset();
    state.seek_offset_secs = 0;
    if let Some( track ) = state.current.clone() {
        match state.loop_mode {
            LoopMode::Queue => state.queue.append( track.clone() ),
            LoopMode::Track if skipped => state.skip_repeat = true,
            _ => {}
        }
        state.emit( SessionEvent::TrackFinished { title: track.title, error } );
    }
    state.set_phase( PlaybackPhase::Idle );
}


/// Puts the current track back at the queue head so it resumes later.
///
/// A playing or paused stream is stopped and its position captured as the
/// seek offset. A track still loading keeps the offset it already had. A
/// track that already finished or was skipped is left for the next advance.
/// Returns the offset the track will resume from.
pub(crate) fn requeue_current( state: &mut SessionState, now: Instant, interrupted: bool ) -> Option<u64> {
    if state.active.is_none() && state.phase != PlaybackPhase::Loading {
        return None;
    }
    let track = state.current.take()?;
    if let Some( active ) = state.active.take() {
        if state.clock.is_started() {
            state.seek_offset_secs = state.clock.elapsed_secs( now, track.duration_secs );
        }
        active.interrupted.store( interrupted, Ordering::Relaxed );
        active.handle.stop();
    }
    state.slot += 1;
    state.clock.reset();
    state.skip_repeat = false;
    state.queue.prepend( track );
    state.set_phase( PlaybackPhase::Idle );
    Some( state.seek_offset_secs )
}


/// Keeps the display's progress bar moving while a track plays.
pub(crate) async fn refresh_progress( shared: Arc<SessionShared>, cancel: CancellationToken ) {
    let mut ticker = tokio::time::interval( shared.config.progress_interval() );
    ticker.set_missed_tick_behavior( tokio::time::MissedTickBehavior::Delay );
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let state = shared.state.lock().await;
                if state.phase == PlaybackPhase::Playing && !state.closed {
                    shared.publish( &state );
                }
            }
        }
    }
}
