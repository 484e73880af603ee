//! Simulated collaborators
//!
//! A catalog backed by a fixed track list, an audio process that "plays"
//! on tokio timers, a speech stub and a console display.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ Context, Result };
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use tunebot_core::{
    ActiveAudio, AnnouncementClip, AnnouncementError, AnnouncementProvider, CompletionSender,
    DisplaySink, PlaybackProcess, ProcessStartError, PushError, ResolutionError, SearchError,
    SessionView, StartRequest, TrackCatalog, TrackInfo,
};

use crate::view;


/// Resolution latency of the simulated catalog.
const CATALOG_LATENCY: Duration = Duration::from_millis( 150 );

/// Spoken length per character of announcement text.
const SPEECH_PER_CHAR: Duration = Duration::from_millis( 60 );


fn sim_track( title: &str, uploader: &str, duration_secs: u64 ) -> TrackInfo {
    TrackInfo {
        locator: format!( "sim://{}", title.to_lowercase().replace( ' ', "-" ) ),
        title: title.to_string(),
        duration_secs,
        uploader: uploader.to_string(),
        thumbnail: None,
        stream_locator: None,
    }
}


pub struct SimCatalog {
    tracks: Vec<TrackInfo>,
}


impl SimCatalog {
    /// A small built-in library. "Dead Air" never yields a stream.
    pub fn builtin() -> Self {
        let mut dead = sim_track( "Dead Air", "Nobody", 200 );
        dead.stream_locator = Some( String::new() );

        Self {
            tracks: vec![
                sim_track( "Blue Sky", "The Meridians", 214 ),
                sim_track( "Blue Sky (Official Audio)", "The Meridians", 214 ),
                sim_track( "Red Dawn", "The Meridians", 187 ),
                sim_track( "Harbor Lights", "The Meridians", 251 ),
                sim_track( "Harbor Lights reaction", "Couch Critics", 540 ),
                sim_track( "Glass Garden", "Ivy Static", 199 ),
                sim_track( "Glass Garden (Lyrics)", "Ivy Static", 199 ),
                sim_track( "Night Drive", "Ivy Static", 305 ),
                sim_track( "Intro Jingle", "Ivy Static", 40 ),
                sim_track( "Ten Hour Loop", "Ivy Static", 36000 ),
                dead,
            ],
        }
    }


    /// Loads a JSON array of track objects.
    pub fn from_file( path: &Path ) -> Result<Self> {
        let contents = std::fs::read_to_string( path )
            .with_context( || format!( "Failed to read catalog {}", path.display() ) )?;
        let tracks: Vec<TrackInfo> = serde_json::from_str( &contents )
            .with_context( || format!( "Malformed catalog {}", path.display() ) )?;
        tracing::info!( "Loaded {} tracks from {}", tracks.len(), path.display() );
        Ok( Self { tracks } )
    }


    fn stream_of( track: &TrackInfo ) -> String {
        match &track.stream_locator {
            Some( stream ) => stream.clone(),
            None => format!( "{}#stream", track.locator ),
        }
    }


    /// Length of the track behind a stream address.
    pub fn duration_of( &self, stream_locator: &str ) -> Option<u64> {
        self.tracks
            .iter()
            .find( |t| Self::stream_of( t ) == stream_locator )
            .map( |t| t.duration_secs )
    }
}


#[async_trait]
impl TrackCatalog for SimCatalog {
    async fn resolve( &self, query: &str ) -> Result<TrackInfo, ResolutionError> {
        tokio::time::sleep( CATALOG_LATENCY ).await;
        let needle = query.to_lowercase();
        let found = self.tracks
            .iter()
            .find( |t| t.locator == query )
            .or_else( || self.tracks.iter().find( |t| t.title.to_lowercase().contains( &needle ) ) )
            .ok_or_else( || ResolutionError::NotFound( query.to_string() ) )?;

        Ok( TrackInfo { stream_locator: Some( Self::stream_of( found ) ), ..found.clone() } )
    }


    async fn search( &self, query: &str, limit: usize ) -> Result<Vec<TrackInfo>, SearchError> {
        tokio::time::sleep( CATALOG_LATENCY ).await;
        let words: Vec<String> = query.to_lowercase().split_whitespace().map( str::to_string ).collect();
        if words.is_empty() {
            return Err( SearchError( "empty query".into() ) );
        }
        Ok( self.tracks
            .iter()
            .filter( |t| {
                let haystack = format!( "{} {}", t.title, t.uploader ).to_lowercase();
                words.iter().any( |w| haystack.contains( w.as_str() ) )
            })
            .take( limit )
            .cloned()
            .collect() )
    }
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
enum Transport {
    Playing,
    Paused,
    Stopped,
}


struct SimAudio {
    label: String,
    transport: watch::Sender<Transport>,
}


impl ActiveAudio for SimAudio {
    fn stop( &self ) {
        self.transport.send_replace( Transport::Stopped );
    }


    fn pause( &self ) {
        self.transport.send_replace( Transport::Paused );
    }


    fn resume( &self ) {
        self.transport.send_replace( Transport::Playing );
    }


    fn set_volume( &self, volume: f32 ) {
        tracing::debug!( "[sim] '{}' volume {:.0}%", self.label, volume * 100.0 );
    }
}


/// Counts down `length`, honouring pause and stop, then reports completion.
async fn play_for( mut length: Duration, mut transport: watch::Receiver<Transport>, done: CompletionSender ) {
    loop {
        let state = *transport.borrow_and_update();
        match state {
            Transport::Stopped => break,
            Transport::Paused => {
                if transport.changed().await.is_err() {
                    break;
                }
            }
            Transport::Playing => {
                let started = Instant::now();
                tokio::select! {
                    _ = tokio::time::sleep( length ) => break,
                    changed = transport.changed() => {
                        length = length.saturating_sub( started.elapsed() );
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    done.complete( None );
}


/// Plays on timers, `time_scale` times faster than real time.
pub struct SimProcess {
    catalog: Arc<SimCatalog>,
    time_scale: f64,
}


impl SimProcess {
    pub fn new( catalog: Arc<SimCatalog>, time_scale: f64 ) -> Self {
        Self { catalog, time_scale: if time_scale > 0.0 { time_scale } else { 1.0 } }
    }


    fn spawn( &self, label: String, length: Duration, done: CompletionSender ) -> Box<dyn ActiveAudio> {
        let ( tx, rx ) = watch::channel( Transport::Playing );
        tokio::spawn( play_for( length.div_f64( self.time_scale ), rx, done ) );
        Box::new( SimAudio { label, transport: tx } )
    }
}


#[async_trait]
impl PlaybackProcess for SimProcess {
    async fn start(
        &self,
        request: StartRequest,
        done: CompletionSender,
    ) -> Result<Box<dyn ActiveAudio>, ProcessStartError> {
        let duration = self.catalog
            .duration_of( &request.stream_locator )
            .ok_or_else( || ProcessStartError( format!( "unknown stream {}", request.stream_locator ) ) )?;
        let remaining = duration.saturating_sub( request.seek_offset_secs ) as f64;
        let length = Duration::from_secs_f64( remaining / request.effect.speed_factor() );

        tracing::debug!(
            "[sim] Start '{}' at {}s, filter '{}', {:?} of audio",
            request.title,
            request.seek_offset_secs,
            request.effect.filter(),
            length
        );
        Ok( self.spawn( request.title, length, done ) )
    }


    async fn play_announcement(
        &self,
        clip: AnnouncementClip,
        done: CompletionSender,
    ) -> Result<Box<dyn ActiveAudio>, ProcessStartError> {
        let chars = clip.text.chars().count().max( 10 ) as u32;
        println!( "(announcement) \"{}\"", clip.text );
        Ok( self.spawn( clip.locator, SPEECH_PER_CHAR * chars, done ) )
    }
}


/// Speech stub: every non-empty text "renders" instantly.
#[derive( Default )]
pub struct SimAnnouncer;


#[async_trait]
impl AnnouncementProvider for SimAnnouncer {
    async fn synthesize( &self, text: &str ) -> Result<AnnouncementClip, AnnouncementError> {
        if text.trim().is_empty() {
            return Err( AnnouncementError::Synthesis( "nothing to say".into() ) );
        }
        Ok( AnnouncementClip { text: text.to_string(), locator: format!( "tts://{}", text.len() ) } )
    }
}


/// Prints each pushed snapshot.
pub struct ConsoleDisplay {
    quiet: bool,
}


impl ConsoleDisplay {
    pub fn new( quiet: bool ) -> Self {
        Self { quiet }
    }
}


#[async_trait]
impl DisplaySink for ConsoleDisplay {
    async fn push( &self, view: &SessionView ) -> Result<(), PushError> {
        if !self.quiet {
            println!( "{}", view::render( view ) );
        }
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[tokio::test( start_paused = true )]
    async fn test_builtin_resolve_and_search() {
        let catalog = SimCatalog::builtin();
        let info = catalog.resolve( "red dawn" ).await.unwrap();
        assert_eq!( info.title, "Red Dawn" );
        let stream = info.stream_locator.unwrap();
        assert_eq!( catalog.duration_of( &stream ), Some( 187 ) );

        assert!( matches!( catalog.resolve( "unheard of" ).await, Err( ResolutionError::NotFound( _ ) ) ) );
        assert_eq!( catalog.resolve( "dead air" ).await.unwrap().stream_locator.as_deref(), Some( "" ) );

        let found = catalog.search( "The Meridians", 3 ).await.unwrap();
        assert_eq!( found.len(), 3 );
    }
}
