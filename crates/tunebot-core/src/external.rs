//! Collaborator contracts
//!
//! Everything the core consumes but does not implement: track resolution,
//! the audio process, speech synthesis and the remote display. Implementors
//! live in the bot frontend (and in the CLI simulator).

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::effect::Effect;
use crate::presentation::SessionView;
use crate::track::TrackInfo;


/// Errors from resolving a locator or query to a playable track.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
pub enum ResolutionError {
    #[error( "No track found for '{0}'" )]
    NotFound( String ),

    #[error( "No stream address for '{0}'" )]
    NoStream( String ),

    #[error( "Resolution timed out after {0}s" )]
    Timeout( u64 ),

    #[error( "Catalog error: {0}" )]
    Backend( String ),
}


/// Error from a best-effort catalog search.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
#[error( "Search failed: {0}" )]
pub struct SearchError( pub String );


/// Error from starting an audio process.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
#[error( "Failed to start audio: {0}" )]
pub struct ProcessStartError( pub String );


/// Error from synthesizing an announcement.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
pub enum AnnouncementError {
    #[error( "Speech synthesis failed: {0}" )]
    Synthesis( String ),

    #[error( "Speech synthesis timed out" )]
    Timeout,
}


/// Error from pushing a snapshot to the display.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
pub enum PushError {
    #[error( "Display rate limit hit" )]
    RateLimited,

    #[error( "Display push failed: {0}" )]
    Failed( String ),
}


/// Resolves locators and searches for candidate tracks.
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Resolves a URL or free-text query to a single track.
    async fn resolve( &self, query: &str ) -> Result<TrackInfo, ResolutionError>;

    /// Returns up to `limit` candidates for a query.
    async fn search( &self, query: &str, limit: usize ) -> Result<Vec<TrackInfo>, SearchError>;
}


/// Turns announcement text into a playable clip.
#[async_trait]
pub trait AnnouncementProvider: Send + Sync {
    async fn synthesize( &self, text: &str ) -> Result<AnnouncementClip, AnnouncementError>;
}


/// A synthesized announcement ready to play.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct AnnouncementClip {
    pub text: String,
    /// File path or URL of the rendered audio.
    pub locator: String,
}


/// Parameters for starting a track.
#[derive( Debug, Clone, PartialEq )]
pub struct StartRequest {
    pub title: String,
    pub stream_locator: String,
    pub seek_offset_secs: u64,
    pub effect: Effect,
    pub volume: f32,
}


/// Handle to audio that is currently playing.
pub trait ActiveAudio: Send + Sync {
    fn stop( &self );
    fn pause( &self );
    fn resume( &self );
    fn set_volume( &self, volume: f32 );
}


/// Starts audio on the session's voice connection.
///
/// Implementations must call `CompletionSender::complete` once the audio
/// ends for any reason, including `ActiveAudio::stop`.
#[async_trait]
pub trait PlaybackProcess: Send + Sync {
    async fn start(
        &self,
        request: StartRequest,
        done: CompletionSender,
    ) -> Result<Box<dyn ActiveAudio>, ProcessStartError>;

    async fn play_announcement(
        &self,
        clip: AnnouncementClip,
        done: CompletionSender,
    ) -> Result<Box<dyn ActiveAudio>, ProcessStartError>;
}


/// Receives read-only session snapshots.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    async fn push( &self, view: &SessionView ) -> Result<(), PushError>;
}


/// What a completion message refers to.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum CompletionKind {
    Track,
    Announcement,
}


/// Completion message delivered to the session loop.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct PlaybackCompletion {
    pub generation: u64,
    pub kind: CompletionKind,
    pub track_locator: Option<String>,
    pub error: Option<String>,
    /// True when the engine stopped this audio for an announcement.
    pub was_interrupted: bool,
}


/// One-shot completion callback handed to the playback process.
#[derive( Debug )]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<PlaybackCompletion>,
    generation: u64,
    kind: CompletionKind,
    track_locator: Option<String>,
    interrupted: Arc<AtomicBool>,
}


impl CompletionSender {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<PlaybackCompletion>,
        generation: u64,
        kind: CompletionKind,
        track_locator: Option<String>,
    ) -> Self {
        Self {
            tx,
            generation,
            kind,
            track_locator,
            interrupted: Arc::new( AtomicBool::new( false ) ),
        }
    }


    /// Shared flag the engine raises before stopping audio for an announcement.
    pub(crate) fn interrupt_flag( &self ) -> Arc<AtomicBool> {
        Arc::clone( &self.interrupted )
    }


    pub fn generation( &self ) -> u64 {
        self.generation
    }


    pub fn kind( &self ) -> CompletionKind {
        self.kind
    }


    /// Reports that the audio ended, with an error if it failed mid-stream.
    pub fn complete( self, error: Option<String> ) {
        let message = PlaybackCompletion {
            generation: self.generation,
            kind: self.kind,
            track_locator: self.track_locator,
            error,
            was_interrupted: self.interrupted.load( Ordering::Relaxed ),
        };
        // The loop is gone once the session is torn down.
        let _ = self.tx.send( message );
    }
}
