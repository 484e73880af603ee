//! Session state and playback clock
//!
//! `SessionState` is the single mutable aggregate of a session. It is only
//! ever touched behind the session's update lock.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::sync::{ broadcast, oneshot };
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::autoplay::RecentTitles;
use crate::effect::Effect;
use crate::external::ActiveAudio;
use crate::presentation::SessionView;
use crate::queue::{ LoopMode, QueueManager };


/// Length of the "next up" title shown in the view.
const NEXT_TITLE_CHARS: usize = 30;


/// Engine phase.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    ErrorRecovery,
}


impl PlaybackPhase {
    pub fn name( &self ) -> &'static str {
        match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Loading => "loading",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::ErrorRecovery => "error-recovery",
        }
    }
}


/// Events emitted by a session for frontends and tests.
#[derive( Debug, Clone, PartialEq )]
pub enum SessionEvent {
    PhaseChanged { from: PlaybackPhase, to: PlaybackPhase },
    TrackStarted { title: String, seek_offset_secs: u64 },
    TrackFinished { title: String, error: Option<String> },
    /// A track failed too many times in a row and the queue was dropped.
    FatalQueueReset { title: String, attempts: u32, cleared: usize },
    AutoplayQueued { title: String, score: i32 },
    AnnouncementStarted { text: String },
    AnnouncementFinished,
}


impl SessionEvent {
    /// User-facing notice text, for the events that warrant one.
    pub fn notice( &self ) -> Option<String> {
        match self {
            SessionEvent::FatalQueueReset { title, attempts, cleared } => Some( format!(
                "Could not play '{}' after {} attempts. Queue cleared after repeated failures ({} tracks removed).",
                title, attempts, cleared
            )),
            _ => None,
        }
    }
}


/// Tracks wall-clock progress through the current track.
#[derive( Debug, Clone )]
pub struct PlaybackClock {
    started_at: Option<Instant>,
    base_secs: f64,
    speed: f64,
    paused_at: Option<Instant>,
    total_paused: Duration,
}


impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            started_at: None,
            base_secs: 0.0,
            speed: 1.0,
            paused_at: None,
            total_paused: Duration::ZERO,
        }
    }
}


impl PlaybackClock {
    /// Starts counting from `offset_secs` of source audio.
    pub fn start( &mut self, now: Instant, offset_secs: u64, speed: f64 ) {
        self.started_at = Some( now );
        self.base_secs = offset_secs as f64;
        self.speed = speed;
        self.paused_at = None;
        self.total_paused = Duration::ZERO;
    }


    /// Marks the start of a pause. Returns false if already paused or stopped.
    pub fn pause( &mut self, now: Instant ) -> bool {
        if self.started_at.is_none() || self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some( now );
        true
    }


    /// Ends a pause and accumulates its length. Returns false if not paused.
    pub fn resume( &mut self, now: Instant ) -> bool {
        match self.paused_at.take() {
            Some( since ) => {
                self.total_paused += now.saturating_duration_since( since );
                true
            }
            None => false,
        }
    }


    pub fn reset( &mut self ) {
        *self = Self::default();
    }


    pub fn is_started( &self ) -> bool {
        self.started_at.is_some()
    }


    pub fn is_paused( &self ) -> bool {
        self.paused_at.is_some()
    }


    pub fn total_paused( &self ) -> Duration {
        self.total_paused
    }


    /// Seconds of source audio played, clamped to `[0, duration_secs]`.
    pub fn elapsed_secs( &self, now: Instant, duration_secs: u64 ) -> u64 {
        let Some( started ) = self.started_at else {
            return 0;
        };
        let current_pause = self.paused_at
            .map( |since| now.saturating_duration_since( since ) )
            .unwrap_or( Duration::ZERO );
        let playing = now
            .saturating_duration_since( started )
            .saturating_sub( self.total_paused )
            .saturating_sub( current_pause );

        let elapsed = self.base_secs + playing.as_secs_f64() * self.speed;
        elapsed.clamp( 0.0, duration_secs as f64 ) as u64
    }
}


/// The audio stream of the current track.
pub(crate) struct ActiveStream {
    pub generation: u64,
    pub handle: Box<dyn ActiveAudio>,
    pub interrupted: Arc<AtomicBool>,
}


/// An announcement in flight.
pub(crate) struct ActiveAnnouncement {
    pub generation: u64,
    pub handle: Option<Box<dyn ActiveAudio>>,
    pub done: Option<oneshot::Sender<()>>,
}


/// Mutable aggregate of one session.
pub(crate) struct SessionState {
    pub queue: QueueManager,
    pub current: Option<crate::track::Track>,
    pub volume: f32,
    pub loop_mode: LoopMode,
    pub autoplay_enabled: bool,
    pub effect: Effect,
    pub clock: PlaybackClock,
    pub seek_offset_secs: u64,
    pub consecutive_failures: u32,
    /// Track the failure count belongs to.
    pub failing_locator: Option<String>,
    pub suspended: bool,
    pub recent: RecentTitles,
    pub phase: PlaybackPhase,
    /// Bumped whenever the current slot is (re)assigned or abandoned.
    pub slot: u64,
    /// Set by skip in track-loop mode so the repeated track is not reselected.
    pub skip_repeat: bool,
    pub closed: bool,
    pub active: Option<ActiveStream>,
    pub announcement: Option<ActiveAnnouncement>,
    pub announcement_seq: u64,
    pub autoplay_task: Option<JoinHandle<()>>,
    events: broadcast::Sender<SessionEvent>,
}


impl SessionState {
    pub fn new( volume: f32, autoplay_enabled: bool, recent_window: usize, events: broadcast::Sender<SessionEvent> ) -> Self {
        Self {
            queue: QueueManager::new(),
            current: None,
            volume,
            loop_mode: LoopMode::None,
            autoplay_enabled,
            effect: Effect::None,
            clock: PlaybackClock::default(),
            seek_offset_secs: 0,
            consecutive_failures: 0,
            failing_locator: None,
            suspended: false,
            recent: RecentTitles::new( recent_window ),
            phase: PlaybackPhase::Idle,
            slot: 0,
            skip_repeat: false,
            closed: false,
            active: None,
            announcement: None,
            announcement_seq: 0,
            autoplay_task: None,
            events,
        }
    }


    pub fn emit( &self, event: SessionEvent ) {
        // No subscribers is fine.
        let _ = self.events.send( event );
    }


    pub fn set_phase( &mut self, to: PlaybackPhase ) {
        if self.phase != to {
            let from = self.phase;
            self.phase = to;
            self.emit( SessionEvent::PhaseChanged { from, to } );
        }
    }


    /// Elapsed seconds of the current track.
    pub fn elapsed_secs( &self, now: Instant ) -> u64 {
        match &self.current {
            Some( track ) => self.clock.elapsed_secs( now, track.duration_secs ),
            None => 0,
        }
    }


    /// Aborts the autoplay task if one is running.
    pub fn cancel_autoplay( &mut self ) {
        if let Some( task ) = self.autoplay_task.take() {
            if !task.is_finished() {
                tracing::debug!( "Cancelling in-flight autoplay search" );
            }
            task.abort();
        }
    }


    pub fn autoplay_running( &self ) -> bool {
        self.autoplay_task.as_ref().is_some_and( |t| !t.is_finished() )
    }


    /// Read-only projection for the display.
    pub fn view( &self, now: Instant ) -> SessionView {
        let elapsed = self.elapsed_secs( now );
        let current = self.current.as_ref();
        let duration = current.map( |t| t.duration_secs ).unwrap_or( 0 );
        let progress = if duration > 0 { elapsed as f64 / duration as f64 } else { 0.0 };

        SessionView {
            phase: self.phase,
            title: current.map( |t| t.title.clone() ),
            locator: current.map( |t| t.locator.clone() ),
            uploader: current.map( |t| t.uploader.clone() ),
            thumbnail: current.and_then( |t| t.thumbnail.clone() ),
            requester: current.map( |t| t.requester ),
            elapsed_secs: elapsed,
            duration_secs: duration,
            progress: progress.clamp( 0.0, 1.0 ),
            paused: self.phase == PlaybackPhase::Paused,
            volume_percent: ( self.volume * 100.0 ).round() as u32,
            loop_mode: self.loop_mode,
            autoplay: self.autoplay_enabled,
            effect: self.effect,
            next_title: self.queue.front().map( |t| t.short_title( NEXT_TITLE_CHARS ) ),
            queue_len: self.queue.len(),
            announcing: self.suspended || self.announcement.is_some(),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[tokio::test( start_paused = true )]
    async fn test_clock_counts_from_offset() {
        let mut clock = PlaybackClock::default();
        let t0 = Instant::now();
        clock.start( t0, 30, 1.0 );
        assert_eq!( clock.elapsed_secs( t0 + Duration::from_secs( 12 ), 300 ), 42 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_clock_excludes_pauses() {
        let mut clock = PlaybackClock::default();
        let t0 = Instant::now();
        clock.start( t0, 0, 1.0 );

        assert!( clock.pause( t0 + Duration::from_secs( 10 ) ) );
        // Still paused: the open pause is excluded too.
        assert_eq!( clock.elapsed_secs( t0 + Duration::from_secs( 25 ), 300 ), 10 );
        assert!( clock.resume( t0 + Duration::from_secs( 30 ) ) );
        assert_eq!( clock.elapsed_secs( t0 + Duration::from_secs( 35 ), 300 ), 15 );
        assert_eq!( clock.total_paused(), Duration::from_secs( 20 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_double_pause_does_not_double_count() {
        let mut clock = PlaybackClock::default();
        let t0 = Instant::now();
        clock.start( t0, 0, 1.0 );
        assert!( clock.pause( t0 + Duration::from_secs( 5 ) ) );
        assert!( !clock.pause( t0 + Duration::from_secs( 8 ) ) );
        clock.resume( t0 + Duration::from_secs( 10 ) );
        assert_eq!( clock.total_paused(), Duration::from_secs( 5 ) );
        assert!( !clock.resume( t0 + Duration::from_secs( 11 ) ) );
        assert_eq!( clock.total_paused(), Duration::from_secs( 5 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_clock_speed_and_clamp() {
        let mut clock = PlaybackClock::default();
        let t0 = Instant::now();
        clock.start( t0, 10, 1.25 );
        assert_eq!( clock.elapsed_secs( t0 + Duration::from_secs( 8 ), 300 ), 20 );
        assert_eq!( clock.elapsed_secs( t0 + Duration::from_secs( 1000 ), 300 ), 300 );
        assert_eq!( PlaybackClock::default().elapsed_secs( t0, 300 ), 0 );
    }
}
