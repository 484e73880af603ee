//! Per-session settings persistence
//!
//! Volume and the autoplay toggle survive restarts. Everything else about a
//! session is rebuilt from scratch.

use std::collections::{ BTreeMap, HashMap };
use std::path::{ Path, PathBuf };
use std::sync::{ Mutex, PoisonError };

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Errors from reading or writing stored settings.
#[derive( Debug, Error )]
pub enum SettingsError {
    #[error( "Settings I/O failed: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Settings file is malformed: {0}" )]
    Parse( #[from] serde_json::Error ),

    #[error( "No configuration directory on this platform" )]
    NoConfigDir,
}


/// Stored settings of one session.
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
#[serde( default )]
pub struct GuildSettings {
    /// Last volume set, or `None` to use the configured default.
    pub volume: Option<f32>,

    pub autoplay_enabled: bool,
}


/// Loads and saves `GuildSettings` by session id.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns stored settings, or defaults when nothing is stored.
    async fn load( &self, session_id: &str ) -> Result<GuildSettings, SettingsError>;

    async fn save( &self, session_id: &str, settings: &GuildSettings ) -> Result<(), SettingsError>;
}


/// All sessions' settings in one pretty-printed JSON object keyed by id.
pub struct JsonSettingsStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    lock: tokio::sync::Mutex<()>,
}


impl JsonSettingsStore {
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self { path: path.into(), lock: tokio::sync::Mutex::new( () ) }
    }


    /// Returns the path to the settings file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "tunebot" ).join( "guild_settings.json" ) )
    }


    /// Opens the store at the platform default location.
    pub fn open_default() -> Result<Self, SettingsError> {
        Self::default_path().map( Self::new ).ok_or( SettingsError::NoConfigDir )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    async fn read_all( &self ) -> Result<BTreeMap<String, GuildSettings>, SettingsError> {
        let contents = match tokio::fs::read_to_string( &self.path ).await {
            Ok( contents ) => contents,
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => return Ok( BTreeMap::new() ),
            Err( e ) => return Err( e.into() ),
        };
        if contents.trim().is_empty() {
            return Ok( BTreeMap::new() );
        }
        Ok( serde_json::from_str( &contents )? )
    }
}


#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load( &self, session_id: &str ) -> Result<GuildSettings, SettingsError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        Ok( all.remove( session_id ).unwrap_or_default() )
    }


    async fn save( &self, session_id: &str, settings: &GuildSettings ) -> Result<(), SettingsError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert( session_id.to_string(), settings.clone() );

        // Create parent directory if needed
        if let Some( parent ) = self.path.parent() {
            tokio::fs::create_dir_all( parent ).await?;
        }
        let json = serde_json::to_string_pretty( &all )?;
        tokio::fs::write( &self.path, json ).await?;
        tracing::debug!( "Saved settings for {} to {}", session_id, self.path.display() );
        Ok(())
    }
}


/// In-process store for tests and ephemeral runs.
#[derive( Debug, Default )]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, GuildSettings>>,
}


impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }


    /// Returns what is stored for `session_id`, if anything.
    pub fn get( &self, session_id: &str ) -> Option<GuildSettings> {
        self.entries.lock().unwrap_or_else( PoisonError::into_inner ).get( session_id ).cloned()
    }
}


#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load( &self, session_id: &str ) -> Result<GuildSettings, SettingsError> {
        Ok( self.get( session_id ).unwrap_or_default() )
    }


    async fn save( &self, session_id: &str, settings: &GuildSettings ) -> Result<(), SettingsError> {
        self.entries
            .lock()
            .unwrap_or_else( PoisonError::into_inner )
            .insert( session_id.to_string(), settings.clone() );
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use tempfile::TempDir;


    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let store = JsonSettingsStore::new( dir.path().join( "nested" ).join( "settings.json" ) );
        assert_eq!( store.load( "guild-1" ).await.unwrap(), GuildSettings::default() );
    }


    #[tokio::test]
    async fn test_sessions_are_stored_independently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let store = JsonSettingsStore::new( &path );

        let one = GuildSettings { volume: Some( 0.8 ), autoplay_enabled: true };
        let two = GuildSettings { volume: None, autoplay_enabled: false };
        store.save( "one", &one ).await.unwrap();
        store.save( "two", &two ).await.unwrap();

        let reopened = JsonSettingsStore::new( &path );
        assert_eq!( reopened.load( "one" ).await.unwrap(), one );
        assert_eq!( reopened.load( "two" ).await.unwrap(), two );
        assert_eq!( reopened.load( "three" ).await.unwrap(), GuildSettings::default() );
    }


    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );
        std::fs::write( &path, "{ not json" ).unwrap();
        let store = JsonSettingsStore::new( &path );
        assert!( matches!( store.load( "x" ).await, Err( SettingsError::Parse( _ ) ) ) );
    }


    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySettingsStore::new();
        assert!( store.get( "a" ).is_none() );
        let settings = GuildSettings { volume: Some( 0.3 ), autoplay_enabled: true };
        store.save( "a", &settings ).await.unwrap();
        assert_eq!( store.load( "a" ).await.unwrap(), settings );
    }
}
