//! Playback sessions
//!
//! A `Session` is the public face of one chat server's playback: queue
//! commands, transport controls and announcements. Its playback loop, the
//! progress refresher and any autoplay search run as background tasks that
//! end when the session is shut down.

use std::sync::{ Arc, Mutex as StdMutex, PoisonError };

use thiserror::Error;
use tokio::sync::{ broadcast, mpsc, Mutex };
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::autoplay::AutoplayExplorer;
use crate::config::SessionConfig;
use crate::effect::{ Effect, UnknownEffect };
use crate::engine::{ self, PlaybackEngine };
use crate::favorites::{ Favorite, FavoritesError, FavoritesStore };
use crate::external::{
    AnnouncementError, AnnouncementProvider, DisplaySink, PlaybackCompletion, PlaybackProcess,
    ProcessStartError, TrackCatalog,
};
use crate::interrupt;
use crate::presentation::{ PresentationSync, SessionView };
use crate::queue::{ LoopMode, QueueError };
use crate::settings::{ GuildSettings, SettingsStore };
use crate::signal::AdvanceSignal;
use crate::state::{ PlaybackPhase, SessionEvent, SessionState };
use crate::track::{ Requester, Track };


/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;


/// Errors returned by session commands.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Nothing is playing" )]
    NothingPlaying,

    #[error( "Nothing to skip" )]
    NothingToSkip,

    #[error( "Volume must be between 0 and 1, got {0}" )]
    InvalidVolume( f32 ),

    #[error( transparent )]
    UnknownEffect( #[from] UnknownEffect ),

    #[error( "Need at least two queued tracks to shuffle" )]
    NotEnoughToShuffle,

    #[error( transparent )]
    Queue( #[from] QueueError ),

    #[error( transparent )]
    Announcement( #[from] AnnouncementError ),

    #[error( transparent )]
    Process( #[from] ProcessStartError ),

    #[error( "'{0}' is already a favorite" )]
    AlreadyFavorite( String ),

    #[error( transparent )]
    Favorites( #[from] FavoritesError ),

    #[error( "Session {0} is closed" )]
    Closed( String ),
}


/// External services a session talks to.
#[derive( Clone )]
pub struct Collaborators {
    pub catalog: Arc<dyn TrackCatalog>,
    pub process: Arc<dyn PlaybackProcess>,
    pub announcer: Arc<dyn AnnouncementProvider>,
    pub display: Arc<dyn DisplaySink>,
    pub settings: Arc<dyn SettingsStore>,
    pub favorites: Arc<dyn FavoritesStore>,
}


/// State and services shared by a session's tasks.
pub(crate) struct SessionShared {
    pub id: String,
    pub config: SessionConfig,
    pub state: Mutex<SessionState>,
    pub advance: AdvanceSignal,
    pub catalog: Arc<dyn TrackCatalog>,
    pub process: Arc<dyn PlaybackProcess>,
    pub announcer: Arc<dyn AnnouncementProvider>,
    pub settings: Arc<dyn SettingsStore>,
    pub favorites: Arc<dyn FavoritesStore>,
    pub presentation: PresentationSync,
    pub explorer: AutoplayExplorer,
    pub completions: mpsc::UnboundedSender<PlaybackCompletion>,
    pub announcement_lock: Mutex<()>,
    pub events: broadcast::Sender<SessionEvent>,
}


impl SessionShared {
    /// Schedules a display push of the current state.
    pub fn publish( &self, state: &SessionState ) {
        if !state.closed {
            self.presentation.schedule( state.view( Instant::now() ) );
        }
    }
}


#[derive( Default )]
struct Tasks {
    playback: Option<JoinHandle<()>>,
    progress: Option<JoinHandle<()>>,
}


/// Playback session of one chat server.
pub struct Session {
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
    tasks: StdMutex<Tasks>,
}


impl Session {
    /// Creates a session and starts its background tasks.
    ///
    /// Stored volume and autoplay settings are applied when available.
    pub async fn start( id: impl Into<String>, config: SessionConfig, collaborators: Collaborators ) -> Arc<Self> {
        let id = id.into();
        let stored = match collaborators.settings.load( &id ).await {
            Ok( stored ) => stored,
            Err( e ) => {
                tracing::warn!( "[{}] Failed to load settings, using defaults: {}", id, e );
                GuildSettings::default()
            }
        };
        let volume = stored.volume
            .filter( |v| ( 0.0..=1.0 ).contains( v ) )
            .unwrap_or( config.default_volume );

        let ( events, _ ) = broadcast::channel( EVENT_CAPACITY );
        let ( completions_tx, completions_rx ) = mpsc::unbounded_channel();
        let state = SessionState::new( volume, stored.autoplay_enabled, config.autoplay.recent_window, events.clone() );
        let presentation = PresentationSync::new(
            id.clone(),
            collaborators.display,
            config.push_cooldown(),
            config.rate_limit_backoff(),
        );

        let shared = Arc::new( SessionShared {
            id: id.clone(),
            explorer: AutoplayExplorer::new( config.autoplay.clone() ),
            config,
            state: Mutex::new( state ),
            advance: AdvanceSignal::new(),
            catalog: collaborators.catalog,
            process: collaborators.process,
            announcer: collaborators.announcer,
            settings: collaborators.settings,
            favorites: collaborators.favorites,
            presentation,
            completions: completions_tx,
            announcement_lock: Mutex::new( () ),
            events,
        });

        let cancel = CancellationToken::new();
        let playback = tokio::spawn(
            PlaybackEngine::new( Arc::clone( &shared ), completions_rx ).run( cancel.clone() )
        );
        let progress = tokio::spawn( engine::refresh_progress( Arc::clone( &shared ), cancel.clone() ) );

        tracing::info!( "[{}] Session started (volume {:.0}%, autoplay {})", id, volume * 100.0, stored.autoplay_enabled );
        Arc::new( Self {
            shared,
            cancel,
            tasks: StdMutex::new( Tasks { playback: Some( playback ), progress: Some( progress ) } ),
        })
    }


    pub fn id( &self ) -> &str {
        &self.shared.id
    }


    pub fn config( &self ) -> &SessionConfig {
        &self.shared.config
    }


    /// Subscribes to session events.
    pub fn subscribe( &self ) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }


    /// Locks state for a command, failing once the session is closed.
    async fn command( &self ) -> Result<tokio::sync::MutexGuard<'_, SessionState>, SessionError> {
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err( SessionError::Closed( self.shared.id.clone() ) );
        }
        Ok( state )
    }


    /// Appends a track and returns its 1-based queue position.
    pub async fn enqueue( &self, track: Track ) -> Result<usize, SessionError> {
        let mut state = self.command().await?;
        state.cancel_autoplay();
        tracing::info!( "[{}] Queued '{}'", self.shared.id, track.title );
        state.queue.append( track );
        let position = state.queue.len();
        self.shared.advance.signal();
        self.shared.publish( &state );
        Ok( position )
    }


    /// Appends several tracks in order and returns how many were added.
    pub async fn enqueue_many( &self, tracks: Vec<Track> ) -> Result<usize, SessionError> {
        let mut state = self.command().await?;
        state.cancel_autoplay();
        let count = tracks.len();
        state.queue.append_many( tracks );
        tracing::info!( "[{}] Queued {} tracks", self.shared.id, count );
        self.shared.advance.signal();
        self.shared.publish( &state );
        Ok( count )
    }


    /// Skips the current track, loading or playing. Returns its title.
    pub async fn skip( &self ) -> Result<String, SessionError> {
        let mut state = self.command().await?;
        let skippable = state.active.is_some() || state.phase == PlaybackPhase::Loading;
        let title = match &state.current {
            Some( track ) if skippable => track.title.clone(),
            _ => return Err( SessionError::NothingToSkip ),
        };

        if let Some( active ) = state.active.take() {
            active.handle.stop();
        }
        // Invalidates the stopped stream's completion and any start in flight.
        state.slot += 1;
        state.consecutive_failures = 0;
        state.failing_locator = None;
        engine::retire_current( &mut state, true, None );
        tracing::info!( "[{}] Skipped '{}'", self.shared.id, title );
        self.shared.advance.signal();
        self.shared.publish( &state );
        Ok( title )
    }


    /// Pauses playback. Returns false if already paused.
    pub async fn pause( &self ) -> Result<bool, SessionError> {
        let mut state = self.command().await?;
        let phase = state.phase;
        match phase {
            PlaybackPhase::Paused => Ok( false ),
            PlaybackPhase::Playing => {
                let now = Instant::now();
                if !state.clock.pause( now ) {
                    return Ok( false );
                }
                if let Some( active ) = &state.active {
                    active.handle.pause();
                }
                state.set_phase( PlaybackPhase::Paused );
                self.shared.publish( &state );
                Ok( true )
            }
            _ => Err( SessionError::NothingPlaying ),
        }
    }


    /// Resumes playback. Returns false if already playing.
    pub async fn resume( &self ) -> Result<bool, SessionError> {
        let mut state = self.command().await?;
        let phase = state.phase;
        match phase {
            PlaybackPhase::Playing => Ok( false ),
            PlaybackPhase::Paused => {
                state.clock.resume( Instant::now() );
                if let Some( active ) = &state.active {
                    active.handle.resume();
                }
                state.set_phase( PlaybackPhase::Playing );
                self.shared.publish( &state );
                Ok( true )
            }
            _ => Err( SessionError::NothingPlaying ),
        }
    }


    /// Pauses or resumes. Returns true if now paused.
    pub async fn toggle_pause( &self ) -> Result<bool, SessionError> {
        let paused = self.command().await?.phase == PlaybackPhase::Paused;
        if paused {
            self.resume().await.map( |_| false )
        } else {
            self.pause().await.map( |_| true )
        }
    }


    /// Sets the volume, 0.0 to 1.0, and persists it.
    pub async fn set_volume( &self, volume: f32 ) -> Result<(), SessionError> {
        if !( 0.0..=1.0 ).contains( &volume ) {
            return Err( SessionError::InvalidVolume( volume ) );
        }
        let settings = {
            let mut state = self.command().await?;
            state.volume = volume;
            if let Some( active ) = &state.active {
                active.handle.set_volume( volume );
            }
            self.shared.publish( &state );
            Self::settings_of( &state )
        };
        self.persist( settings ).await;
        Ok(())
    }


    pub async fn set_loop_mode( &self, mode: LoopMode ) -> Result<(), SessionError> {
        let mut state = self.command().await?;
        state.loop_mode = mode;
        state.skip_repeat = false;
        tracing::info!( "[{}] Loop mode: {}", self.shared.id, mode );
        self.shared.publish( &state );
        Ok(())
    }


    /// Steps none → track → queue → none and returns the new mode.
    pub async fn cycle_loop_mode( &self ) -> Result<LoopMode, SessionError> {
        let mode = self.command().await?.loop_mode.next();
        self.set_loop_mode( mode ).await?;
        Ok( mode )
    }


    /// Changes the audio effect by name. A playing track restarts with the
    /// new effect from its current position. Returns false if unchanged.
    pub async fn set_effect( &self, name: &str ) -> Result<bool, SessionError> {
        let effect: Effect = name.parse()?;
        let mut state = self.command().await?;
        if state.effect == effect {
            return Ok( false );
        }
        state.effect = effect;
        tracing::info!( "[{}] Effect: {}", self.shared.id, effect );

        if state.active.is_some() {
            if let Some( offset ) = engine::requeue_current( &mut state, Instant::now(), false ) {
                tracing::info!( "[{}] Restarting at {}s with {}", self.shared.id, offset, effect );
            }
            self.shared.advance.signal();
        }
        self.shared.publish( &state );
        Ok( true )
    }


    /// Flips autoplay, persists it and returns the new value.
    pub async fn toggle_autoplay( &self ) -> Result<bool, SessionError> {
        let ( enabled, settings ) = {
            let mut state = self.command().await?;
            state.autoplay_enabled = !state.autoplay_enabled;
            if !state.autoplay_enabled {
                state.cancel_autoplay();
            }
            self.shared.publish( &state );
            ( state.autoplay_enabled, Self::settings_of( &state ) )
        };
        tracing::info!( "[{}] Autoplay {}", self.shared.id, if enabled { "on" } else { "off" } );
        self.persist( settings ).await;
        Ok( enabled )
    }


    pub async fn shuffle_queue( &self ) -> Result<(), SessionError> {
        let mut state = self.command().await?;
        if state.queue.len() < 2 {
            return Err( SessionError::NotEnoughToShuffle );
        }
        state.cancel_autoplay();
        state.queue.shuffle();
        self.shared.publish( &state );
        Ok(())
    }


    /// Empties the queue and returns how many tracks were removed.
    pub async fn clear_queue( &self ) -> Result<usize, SessionError> {
        let mut state = self.command().await?;
        state.cancel_autoplay();
        let removed = state.queue.clear();
        self.shared.publish( &state );
        Ok( removed )
    }


    /// Removes the queued track at a 0-based index.
    pub async fn remove_at( &self, index: usize ) -> Result<Track, SessionError> {
        let mut state = self.command().await?;
        state.cancel_autoplay();
        let track = state.queue.remove_at( index )?;
        self.shared.publish( &state );
        Ok( track )
    }


    /// Moves the queued track at a 0-based index to the head.
    pub async fn move_to_front( &self, index: usize ) -> Result<(), SessionError> {
        let mut state = self.command().await?;
        state.cancel_autoplay();
        state.queue.move_to_front( index )?;
        self.shared.publish( &state );
        Ok(())
    }


    /// Saves the current track to `user`'s favorites.
    pub async fn favorite_current( &self, user: u64 ) -> Result<Favorite, SessionError> {
        let favorite = {
            let state = self.command().await?;
            let track = state.current.as_ref().ok_or( SessionError::NothingPlaying )?;
            Favorite { title: track.title.clone(), locator: track.locator.clone() }
        };
        if !self.shared.favorites.add( user, favorite.clone() ).await? {
            return Err( SessionError::AlreadyFavorite( favorite.title ) );
        }
        tracing::info!( "[{}] User {} saved '{}' as a favorite", self.shared.id, user, favorite.title );
        Ok( favorite )
    }


    pub async fn favorites( &self, user: u64 ) -> Result<Vec<Favorite>, SessionError> {
        Ok( self.shared.favorites.list( user ).await? )
    }


    /// Resolves saved locators and queues them for `user`. Locators that no
    /// longer resolve are skipped. Returns how many were queued.
    pub async fn enqueue_favorites( &self, user: u64, locators: &[String] ) -> Result<usize, SessionError> {
        self.command().await?.cancel_autoplay();

        let limit = self.shared.config.resolve_timeout();
        let mut tracks = Vec::with_capacity( locators.len() );
        for locator in locators {
            match tokio::time::timeout( limit, self.shared.catalog.resolve( locator ) ).await {
                Ok( Ok( info ) ) => tracks.push( Track::from_info( info, Requester::User( user ) ) ),
                Ok( Err( e ) ) => tracing::warn!( "[{}] Skipping favorite {}: {}", self.shared.id, locator, e ),
                Err( _ ) => tracing::warn!( "[{}] Skipping favorite {}: resolve timed out", self.shared.id, locator ),
            }
        }
        if tracks.is_empty() {
            return Ok( 0 );
        }
        self.enqueue_many( tracks ).await
    }


    /// Deletes saved favorites by locator and returns how many went.
    pub async fn remove_favorites( &self, user: u64, locators: &[String] ) -> Result<usize, SessionError> {
        let removed = self.shared.favorites.remove( user, locators ).await?;
        tracing::info!( "[{}] User {} removed {} favorites", self.shared.id, user, removed );
        Ok( removed )
    }


    /// Plays a spoken announcement over the session, then resumes.
    pub async fn interrupt_with_announcement( &self, text: &str ) -> Result<(), SessionError> {
        interrupt::announce( &self.shared, text ).await
    }


    pub async fn view( &self ) -> SessionView {
        self.shared.state.lock().await.view( Instant::now() )
    }


    pub async fn phase( &self ) -> PlaybackPhase {
        self.shared.state.lock().await.phase
    }


    pub async fn current_title( &self ) -> Option<String> {
        self.shared.state.lock().await.current.as_ref().map( |t| t.title.clone() )
    }


    pub async fn queue_titles( &self ) -> Vec<String> {
        self.shared.state.lock().await.queue.iter().map( |t| t.title.clone() ).collect()
    }


    pub async fn volume( &self ) -> f32 {
        self.shared.state.lock().await.volume
    }


    pub async fn is_closed( &self ) -> bool {
        self.shared.state.lock().await.closed
    }


    fn settings_of( state: &SessionState ) -> GuildSettings {
        GuildSettings { volume: Some( state.volume ), autoplay_enabled: state.autoplay_enabled }
    }


    async fn persist( &self, settings: GuildSettings ) {
        if let Err( e ) = self.shared.settings.save( &self.shared.id, &settings ).await {
            tracing::warn!( "[{}] Failed to save settings: {}", self.shared.id, e );
        }
    }


    /// Stops every task and stream the session owns. Idempotent.
    pub async fn shutdown( &self ) {
        self.cancel.cancel();
        let tasks = std::mem::take( &mut *self.tasks.lock().unwrap_or_else( PoisonError::into_inner ) );
        for task in [ tasks.playback, tasks.progress ].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }

        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.cancel_autoplay();
        self.shared.presentation.cancel();

        if let Some( active ) = state.active.take() {
            active.handle.stop();
        }
        if let Some( announcement ) = state.announcement.take() {
            if let Some( handle ) = announcement.handle {
                handle.stop();
            }
            // Dropping `done` wakes the waiting announcer.
        }
        state.suspended = false;
        state.current = None;
        state.queue.clear();
        state.clock.reset();
        state.set_phase( PlaybackPhase::Idle );
        tracing::info!( "[{}] Session shut down", self.shared.id );
    }
}


impl Drop for Session {
    fn drop( &mut self ) {
        self.cancel.cancel();
    }
}
