//! Shared fakes for session scenario tests.

#![allow( dead_code )]

use std::collections::HashMap;
use std::sync::{ Arc, Mutex };
use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tunebot_core::{
    ActiveAudio, AnnouncementClip, AnnouncementError, AnnouncementProvider, Collaborators,
    CompletionSender, DisplaySink, MemoryFavoritesStore, MemorySettingsStore, PlaybackProcess, ProcessStartError,
    PushError, Requester, ResolutionError, SearchError, Session, SessionConfig, SessionEvent,
    SessionView, StartRequest, Track, TrackCatalog, TrackInfo,
};


/// Polls a condition on virtual time until it holds.
macro_rules! wait_until {
    ( $cond:expr ) => {{
        let mut reached = false;
        for _ in 0..2000 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep( std::time::Duration::from_millis( 10 ) ).await;
        }
        assert!( reached, "timed out waiting for {}", stringify!( $cond ) );
    }};
}


pub const UPLOADER: &str = "Band";


pub fn track( title: &str, duration_secs: u64 ) -> Track {
    Track {
        locator: format!( "fake://{}", title ),
        title: title.to_string(),
        duration_secs,
        uploader: UPLOADER.to_string(),
        thumbnail: None,
        requester: Requester::User( 1 ),
        stream_locator: None,
    }
}


pub fn info( title: &str, uploader: &str, duration_secs: u64 ) -> TrackInfo {
    TrackInfo {
        locator: format!( "fake://{}", title ),
        title: title.to_string(),
        duration_secs,
        uploader: uploader.to_string(),
        ..Default::default()
    }
}


pub fn drain( rx: &mut broadcast::Receiver<SessionEvent> ) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok( event ) = rx.try_recv() {
        events.push( event );
    }
    events
}


#[derive( Default )]
pub struct FakeCatalog {
    /// Remaining resolve failures per locator.
    failures: Mutex<HashMap<String, usize>>,
    resolve_calls: Mutex<Vec<String>>,
    resolve_delay: Mutex<Duration>,
    search_results: Mutex<Vec<TrackInfo>>,
    search_delay: Mutex<Duration>,
    queries: Mutex<Vec<String>>,
}


impl FakeCatalog {
    pub fn fail( &self, locator: &str, times: usize ) {
        self.failures.lock().unwrap().insert( locator.to_string(), times );
    }


    pub fn set_resolve_delay( &self, delay: Duration ) {
        *self.resolve_delay.lock().unwrap() = delay;
    }


    pub fn set_search_results( &self, results: Vec<TrackInfo> ) {
        *self.search_results.lock().unwrap() = results;
    }


    pub fn set_search_delay( &self, delay: Duration ) {
        *self.search_delay.lock().unwrap() = delay;
    }


    pub fn resolve_calls( &self ) -> Vec<String> {
        self.resolve_calls.lock().unwrap().clone()
    }


    pub fn queries( &self ) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}


#[async_trait]
impl TrackCatalog for FakeCatalog {
    async fn resolve( &self, query: &str ) -> Result<TrackInfo, ResolutionError> {
        self.resolve_calls.lock().unwrap().push( query.to_string() );
        let delay = *self.resolve_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep( delay ).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some( remaining ) = failures.get_mut( query ) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err( ResolutionError::NotFound( query.to_string() ) );
                }
            }
        }

        Ok( TrackInfo {
            locator: query.to_string(),
            title: query.trim_start_matches( "fake://" ).to_string(),
            duration_secs: 200,
            uploader: UPLOADER.to_string(),
            thumbnail: None,
            stream_locator: Some( format!( "stream:{}", query ) ),
        })
    }


    async fn search( &self, query: &str, limit: usize ) -> Result<Vec<TrackInfo>, SearchError> {
        self.queries.lock().unwrap().push( query.to_string() );
        let delay = *self.search_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep( delay ).await;
        }
        Ok( self.search_results.lock().unwrap().iter().take( limit ).cloned().collect() )
    }
}


/// One started track or announcement.
pub struct FakeStream {
    pub request: Option<StartRequest>,
    pub clip: Option<AnnouncementClip>,
    done: Mutex<Option<CompletionSender>>,
    pub stopped: AtomicBool,
    pub paused: AtomicBool,
    pub volume: Mutex<f32>,
}


impl FakeStream {
    fn new( request: Option<StartRequest>, clip: Option<AnnouncementClip>, done: CompletionSender ) -> Arc<Self> {
        let volume = request.as_ref().map( |r| r.volume ).unwrap_or( 1.0 );
        Arc::new( Self {
            request,
            clip,
            done: Mutex::new( Some( done ) ),
            stopped: AtomicBool::new( false ),
            paused: AtomicBool::new( false ),
            volume: Mutex::new( volume ),
        })
    }


    /// Reports the end of this audio. Returns false if already reported.
    pub fn finish( &self, error: Option<String> ) -> bool {
        match self.done.lock().unwrap().take() {
            Some( done ) => {
                done.complete( error );
                true
            }
            None => false,
        }
    }


    pub fn is_stopped( &self ) -> bool {
        self.stopped.load( Ordering::SeqCst )
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::SeqCst )
    }
}


struct FakeHandle( Arc<FakeStream> );


impl ActiveAudio for FakeHandle {
    fn stop( &self ) {
        self.0.stopped.store( true, Ordering::SeqCst );
        self.0.finish( None );
    }


    fn pause( &self ) {
        self.0.paused.store( true, Ordering::SeqCst );
    }


    fn resume( &self ) {
        self.0.paused.store( false, Ordering::SeqCst );
    }


    fn set_volume( &self, volume: f32 ) {
        *self.0.volume.lock().unwrap() = volume;
    }
}


#[derive( Default )]
pub struct FakeProcess {
    tracks: Mutex<Vec<Arc<FakeStream>>>,
    announcements: Mutex<Vec<Arc<FakeStream>>>,
    fail_starts: AtomicUsize,
    fail_announcements: AtomicBool,
}


impl FakeProcess {
    pub fn fail_next_starts( &self, n: usize ) {
        self.fail_starts.store( n, Ordering::SeqCst );
    }


    pub fn fail_announcements( &self ) {
        self.fail_announcements.store( true, Ordering::SeqCst );
    }


    pub fn starts( &self ) -> Vec<StartRequest> {
        self.tracks.lock().unwrap().iter().filter_map( |s| s.request.clone() ).collect()
    }


    pub fn started_titles( &self ) -> Vec<String> {
        self.starts().into_iter().map( |r| r.title ).collect()
    }


    pub fn stream( &self, index: usize ) -> Arc<FakeStream> {
        Arc::clone( &self.tracks.lock().unwrap()[ index ] )
    }


    /// Ends the newest track stream naturally.
    pub fn finish_latest( &self ) -> bool {
        let latest = self.tracks.lock().unwrap().last().cloned();
        latest.is_some_and( |s| s.finish( None ) )
    }


    pub fn announcements( &self ) -> Vec<Arc<FakeStream>> {
        self.announcements.lock().unwrap().clone()
    }


    pub fn finish_announcement( &self ) -> bool {
        let latest = self.announcements.lock().unwrap().last().cloned();
        latest.is_some_and( |s| s.finish( None ) )
    }
}


#[async_trait]
impl PlaybackProcess for FakeProcess {
    async fn start(
        &self,
        request: StartRequest,
        done: CompletionSender,
    ) -> Result<Box<dyn ActiveAudio>, ProcessStartError> {
        let failing = self.fail_starts
            .fetch_update( Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub( 1 ) )
            .is_ok();
        if failing {
            return Err( ProcessStartError( "encoder crashed".into() ) );
        }
        let stream = FakeStream::new( Some( request ), None, done );
        self.tracks.lock().unwrap().push( Arc::clone( &stream ) );
        Ok( Box::new( FakeHandle( stream ) ) )
    }


    async fn play_announcement(
        &self,
        clip: AnnouncementClip,
        done: CompletionSender,
    ) -> Result<Box<dyn ActiveAudio>, ProcessStartError> {
        if self.fail_announcements.load( Ordering::SeqCst ) {
            return Err( ProcessStartError( "voice connection lost".into() ) );
        }
        let stream = FakeStream::new( None, Some( clip ), done );
        self.announcements.lock().unwrap().push( Arc::clone( &stream ) );
        Ok( Box::new( FakeHandle( stream ) ) )
    }
}


#[derive( Default )]
pub struct FakeAnnouncer {
    failing: AtomicBool,
}


impl FakeAnnouncer {
    pub fn fail( &self ) {
        self.failing.store( true, Ordering::SeqCst );
    }
}


#[async_trait]
impl AnnouncementProvider for FakeAnnouncer {
    async fn synthesize( &self, text: &str ) -> Result<AnnouncementClip, AnnouncementError> {
        if self.failing.load( Ordering::SeqCst ) {
            return Err( AnnouncementError::Synthesis( "voice unavailable".into() ) );
        }
        Ok( AnnouncementClip { text: text.to_string(), locator: format!( "tts://{}", text.len() ) } )
    }
}


#[derive( Default )]
pub struct RecordingDisplay {
    views: Mutex<Vec<SessionView>>,
}


impl RecordingDisplay {
    pub fn views( &self ) -> Vec<SessionView> {
        self.views.lock().unwrap().clone()
    }
}


#[async_trait]
impl DisplaySink for RecordingDisplay {
    async fn push( &self, view: &SessionView ) -> Result<(), PushError> {
        self.views.lock().unwrap().push( view.clone() );
        Ok(())
    }
}


/// A session wired to fakes.
pub struct Harness {
    pub session: Arc<Session>,
    pub catalog: Arc<FakeCatalog>,
    pub process: Arc<FakeProcess>,
    pub announcer: Arc<FakeAnnouncer>,
    pub display: Arc<RecordingDisplay>,
    pub settings: Arc<MemorySettingsStore>,
    pub favorites: Arc<MemoryFavoritesStore>,
}


pub struct Fakes {
    pub catalog: Arc<FakeCatalog>,
    pub process: Arc<FakeProcess>,
    pub announcer: Arc<FakeAnnouncer>,
    pub display: Arc<RecordingDisplay>,
    pub settings: Arc<MemorySettingsStore>,
    pub favorites: Arc<MemoryFavoritesStore>,
}


impl Fakes {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new( FakeCatalog::default() ),
            process: Arc::new( FakeProcess::default() ),
            announcer: Arc::new( FakeAnnouncer::default() ),
            display: Arc::new( RecordingDisplay::default() ),
            settings: Arc::new( MemorySettingsStore::new() ),
            favorites: Arc::new( MemoryFavoritesStore::new() ),
        }
    }


    pub fn collaborators( &self ) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            process: self.process.clone(),
            announcer: self.announcer.clone(),
            display: self.display.clone(),
            settings: self.settings.clone(),
            favorites: self.favorites.clone(),
        }
    }
}


impl Harness {
    pub async fn start() -> Self {
        Self::with_config( SessionConfig::default() ).await
    }


    pub async fn with_config( config: SessionConfig ) -> Self {
        Self::from_fakes( Fakes::new(), config ).await
    }


    pub async fn from_fakes( fakes: Fakes, config: SessionConfig ) -> Self {
        let session = Session::start( "guild-1", config, fakes.collaborators() ).await;
        Self {
            session,
            catalog: fakes.catalog,
            process: fakes.process,
            announcer: fakes.announcer,
            display: fakes.display,
            settings: fakes.settings,
            favorites: fakes.favorites,
        }
    }
}
