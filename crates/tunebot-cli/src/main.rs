//! Tunebot CLI - console shell for a playback session

mod cli;
mod command;
mod sim;
mod view;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tracing_subscriber::EnvFilter;

use cli::Args;
use command::Command;
use sim::{ ConsoleDisplay, SimAnnouncer, SimCatalog, SimProcess };

use tunebot_core::{
    CachedAnnouncer, Collaborators, Effect, FavoritesStore, JsonFavoritesStore, JsonSettingsStore,
    MemoryFavoritesStore, MemorySettingsStore, PresenceOutcome, PresencePolicy, Requester, Session,
    SessionConfig, SessionEvent, SessionRegistry, SettingsStore, Track, TrackCatalog, VoiceEvent,
};


/// Platform user id the shell queues tracks as.
const SHELL_USER: u64 = 0;


/// Whether the shell keeps reading input.
enum Flow {
    Continue,
    Quit,
}


/// Shell state.
struct App {
    registry: Arc<SessionRegistry>,
    presence: Arc<PresencePolicy>,
    catalog: Arc<SimCatalog>,
    session_id: String,
    /// Simulated listeners in the voice channel.
    listeners: usize,
    /// Session whose events are being printed.
    watched: Option<Arc<Session>>,
}


impl App {
    /// Returns the driven session, creating it if needed.
    async fn session( &mut self ) -> Arc<Session> {
        let session = self.registry.get_or_create( &self.session_id ).await;
        let is_watched = self.watched.as_ref().is_some_and( |w| Arc::ptr_eq( w, &session ) );
        if !is_watched {
            tokio::spawn( print_events( session.subscribe() ) );
            self.watched = Some( Arc::clone( &session ) );
            self.presence.handle( &self.session_id, VoiceEvent::BotJoined ).await;
        }
        session
    }


    async fn execute( &mut self, cmd: Command ) -> Result<Flow> {
        if matches!( cmd, Command::Quit ) {
            return Ok( Flow::Quit );
        }
        if matches!( cmd, Command::Help ) {
            println!( "{}", command::help_text() );
            return Ok( Flow::Continue );
        }
        if matches!( cmd, Command::Leave ) {
            let outcome = self.presence.handle( &self.session_id, VoiceEvent::BotLeft ).await;
            if outcome == PresenceOutcome::Vacated {
                println!( "Left session {}", self.session_id );
            } else {
                println!( "No active session" );
            }
            self.watched = None;
            return Ok( Flow::Continue );
        }

        let session = self.session().await;
        match cmd {
            Command::Play { query } => {
                let info = self.catalog.resolve( &query ).await?;
                let track = Track::from_info( info, Requester::User( SHELL_USER ) );
                let title = track.title.clone();
                let position = session.enqueue( track ).await?;
                println!( "Queued '{}' at position {}", title, position );
            }
            Command::Search { term } => {
                let results = self.catalog.search( &term, 10 ).await?;
                if results.is_empty() {
                    println!( "No matches" );
                }
                for info in results {
                    println!( "  {} - {} [{}]", info.uploader, info.title, view::format_time( info.duration_secs ) );
                }
            }
            Command::Remove { position } => {
                let track = session.remove_at( position - 1 ).await?;
                println!( "Removed '{}'", track.title );
            }
            Command::Front { position } => {
                session.move_to_front( position - 1 ).await?;
                println!( "Moved track {} to the front", position );
            }
            Command::Shuffle => {
                session.shuffle_queue().await?;
                println!( "Queue shuffled" );
            }
            Command::Clear => {
                let removed = session.clear_queue().await?;
                println!( "Removed {} tracks", removed );
            }
            Command::Queue => {
                let titles = session.queue_titles().await;
                if titles.is_empty() {
                    println!( "Queue is empty" );
                }
                for ( i, title ) in titles.iter().enumerate() {
                    println!( "  {}. {}", i + 1, title );
                }
            }
            Command::Skip => {
                let title = session.skip().await?;
                println!( "Skipped '{}'", title );
            }
            Command::Pause => {
                if !session.pause().await? {
                    println!( "Already paused" );
                }
            }
            Command::Resume => {
                if !session.resume().await? {
                    println!( "Already playing" );
                }
            }
            Command::Toggle => {
                let paused = session.toggle_pause().await?;
                println!( "{}", if paused { "Paused" } else { "Resumed" } );
            }
            Command::Volume { level: Some( level ) } => {
                session.set_volume( level as f32 / 100.0 ).await?;
                println!( "Volume {}%", level );
            }
            Command::Volume { level: None } => {
                println!( "Volume {:.0}%", session.volume().await * 100.0 );
            }
            Command::Loop { mode: Some( mode ) } => {
                session.set_loop_mode( mode ).await?;
                println!( "{}", mode );
            }
            Command::Loop { mode: None } => {
                println!( "{}", session.cycle_loop_mode().await? );
            }
            Command::Effect { name: Some( name ) } => {
                if session.set_effect( &name ).await? {
                    println!( "Effect set to {}", name );
                } else {
                    println!( "Effect unchanged" );
                }
            }
            Command::Effect { name: None } => {
                let names: Vec<_> = Effect::ALL.iter().map( |e| e.name() ).collect();
                println!( "Current: {}. Available: {}", session.view().await.effect, names.join( ", " ) );
            }
            Command::Autoplay => {
                let enabled = session.toggle_autoplay().await?;
                println!( "Autoplay {}", if enabled { "on" } else { "off" } );
            }
            Command::Now => {
                println!( "{}", view::render( &session.view().await ) );
            }
            Command::Say { text } => {
                // Runs in the background so the shell stays responsive.
                tokio::spawn( async move {
                    if let Err( e ) = session.interrupt_with_announcement( &text ).await {
                        println!( "Announcement failed: {}", e );
                    }
                });
            }
            Command::Favorite => {
                let saved = session.favorite_current( SHELL_USER ).await?;
                println!( "Saved '{}' to favorites", saved.title );
            }
            Command::Favorites => {
                let saved = session.favorites( SHELL_USER ).await?;
                if saved.is_empty() {
                    println!( "No favorites yet" );
                }
                for ( i, favorite ) in saved.iter().enumerate() {
                    println!( "  {}. {}", i + 1, favorite.title );
                }
            }
            Command::PlayFavorites { position } => {
                let saved = session.favorites( SHELL_USER ).await?;
                let locators: Vec<String> = match position {
                    Some( n ) => saved.get( n - 1 ).map( |f| f.locator.clone() ).into_iter().collect(),
                    None => saved.into_iter().map( |f| f.locator ).collect(),
                };
                if locators.is_empty() {
                    println!( "No such favorite" );
                } else {
                    let count = session.enqueue_favorites( SHELL_USER, &locators ).await?;
                    println!( "Queued {} favorites", count );
                }
            }
            Command::Unfavorite { position } => {
                let saved = session.favorites( SHELL_USER ).await?;
                match saved.get( position - 1 ) {
                    Some( favorite ) => {
                        session.remove_favorites( SHELL_USER, &[ favorite.locator.clone() ] ).await?;
                        println!( "Deleted '{}' from favorites", favorite.title );
                    }
                    None => println!( "No such favorite" ),
                }
            }
            Command::Arrive { name } => {
                self.listeners += 1;
                let event = VoiceEvent::MemberJoined { display_name: name, listeners: self.listeners };
                self.presence.handle( &self.session_id, event ).await;
            }
            Command::Depart => {
                self.listeners = self.listeners.saturating_sub( 1 );
                let event = VoiceEvent::MemberLeft { listeners: self.listeners };
                let presence = Arc::clone( &self.presence );
                let id = self.session_id.clone();
                // The grace period runs in the background.
                tokio::spawn( async move {
                    if presence.handle( &id, event ).await == PresenceOutcome::Vacated {
                        println!( "Left alone, session {} closed", id );
                    }
                });
            }
            Command::Leave | Command::Help | Command::Quit => {}
        }
        Ok( Flow::Continue )
    }
}


/// Prints notable session events until the session goes away.
async fn print_events( mut events: tokio::sync::broadcast::Receiver<SessionEvent> ) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok( event ) => {
                if let Some( notice ) = event.notice() {
                    println!( "! {}", notice );
                }
                if let SessionEvent::AutoplayQueued { title, .. } = &event {
                    println!( "(autoplay) Queued '{}'", title );
                }
            }
            Err( RecvError::Lagged( skipped ) ) => {
                tracing::debug!( "Event printer skipped {} events", skipped );
            }
            Err( RecvError::Closed ) => break,
        }
    }
}


fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "info" ) );
    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( std::io::stderr )
        .init();
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = match &args.config {
        Some( path ) => SessionConfig::load( path )?,
        None => SessionConfig::load_default()?,
    };

    let catalog = Arc::new( match &args.catalog {
        Some( path ) => SimCatalog::from_file( path )?,
        None => SimCatalog::builtin(),
    });
    let settings: Arc<dyn SettingsStore> = if args.ephemeral {
        Arc::new( MemorySettingsStore::new() )
    } else {
        Arc::new( JsonSettingsStore::open_default()? )
    };
    let favorites: Arc<dyn FavoritesStore> = if args.ephemeral {
        Arc::new( MemoryFavoritesStore::new() )
    } else {
        Arc::new( JsonFavoritesStore::open_default()? )
    };

    let announcer = Arc::new( CachedAnnouncer::new( Arc::new( SimAnnouncer ) ) );
    announcer.precache( [ config.presence.bot_greeting.clone() ] ).await;
    announcer.cleanup( config.presence.clip_max_age() );

    let collaborators = Collaborators {
        catalog: catalog.clone(),
        process: Arc::new( SimProcess::new( Arc::clone( &catalog ), args.time_scale ) ),
        announcer,
        display: Arc::new( ConsoleDisplay::new( args.quiet ) ),
        settings,
        favorites,
    };

    let registry = Arc::new( SessionRegistry::new( config, collaborators ) );
    let mut app = App {
        presence: Arc::new( PresencePolicy::new( Arc::clone( &registry ) ) ),
        registry,
        catalog,
        session_id: args.session.clone(),
        listeners: 0,
        watched: None,
    };

    println!( "tunebot: driving session '{}'. Type /help for commands.", app.session_id );
    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    while let Some( line ) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match Command::parse( &line ) {
            Ok( cmd ) => cmd,
            Err( e ) => {
                println!( "{}", e );
                continue;
            }
        };
        match app.execute( cmd ).await {
            Ok( Flow::Continue ) => {}
            Ok( Flow::Quit ) => break,
            Err( e ) => println!( "Error: {}", e ),
        }
    }

    app.registry.shutdown_all().await;
    Ok(())
}
