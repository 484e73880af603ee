//! Per-user favorites
//!
//! Saved tracks keyed by platform user id. Favorites follow the user, not
//! the session, so one store serves every session.

use std::collections::BTreeMap;
use std::path::{ Path, PathBuf };
use std::sync::{ Mutex, PoisonError };

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Errors that can occur while reading or writing favorites.
#[derive( Debug, Error )]
pub enum FavoritesError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Malformed favorites file: {0}" )]
    Parse( #[from] serde_json::Error ),

    #[error( "No config directory available" )]
    NoConfigDir,
}


/// A saved track.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Favorite {
    pub title: String,
    pub locator: String,
}


#[async_trait]
pub trait FavoritesStore: Send + Sync {
    /// The user's favorites, oldest first.
    async fn list( &self, user: u64 ) -> Result<Vec<Favorite>, FavoritesError>;

    /// Saves a favorite. Returns false if its locator is already saved.
    async fn add( &self, user: u64, favorite: Favorite ) -> Result<bool, FavoritesError>;

    /// Deletes favorites by locator and returns how many went.
    async fn remove( &self, user: u64, locators: &[String] ) -> Result<usize, FavoritesError>;
}


type FavoritesMap = BTreeMap<String, Vec<Favorite>>;


fn add_to( all: &mut FavoritesMap, user: u64, favorite: Favorite ) -> bool {
    let saved = all.entry( user.to_string() ).or_default();
    if saved.iter().any( |f| f.locator == favorite.locator ) {
        return false;
    }
    saved.push( favorite );
    true
}


fn remove_from( all: &mut FavoritesMap, user: u64, locators: &[String] ) -> usize {
    let key = user.to_string();
    let Some( saved ) = all.get_mut( &key ) else {
        return 0;
    };
    let before = saved.len();
    saved.retain( |f| !locators.contains( &f.locator ) );
    let removed = before - saved.len();
    if saved.is_empty() {
        all.remove( &key );
    }
    removed
}


/// Favorites kept in one JSON object keyed by user id.
pub struct JsonFavoritesStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}


impl JsonFavoritesStore {
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self { path: path.into(), lock: tokio::sync::Mutex::new( () ) }
    }


    /// Returns the default favorites file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "tunebot" ).join( "favorites.json" ) )
    }


    pub fn open_default() -> Result<Self, FavoritesError> {
        Self::default_path().map( Self::new ).ok_or( FavoritesError::NoConfigDir )
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    async fn read_all( &self ) -> Result<FavoritesMap, FavoritesError> {
        let contents = match tokio::fs::read_to_string( &self.path ).await {
            Ok( contents ) => contents,
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => return Ok( FavoritesMap::new() ),
            Err( e ) => return Err( e.into() ),
        };
        if contents.trim().is_empty() {
            return Ok( FavoritesMap::new() );
        }
        Ok( serde_json::from_str( &contents )? )
    }


    async fn write_all( &self, all: &FavoritesMap ) -> Result<(), FavoritesError> {
        if let Some( parent ) = self.path.parent() {
            tokio::fs::create_dir_all( parent ).await?;
        }
        tokio::fs::write( &self.path, serde_json::to_string_pretty( all )? ).await?;
        Ok(())
    }
}


#[async_trait]
impl FavoritesStore for JsonFavoritesStore {
    async fn list( &self, user: u64 ) -> Result<Vec<Favorite>, FavoritesError> {
        let _guard = self.lock.lock().await;
        Ok( self.read_all().await?.remove( &user.to_string() ).unwrap_or_default() )
    }


    async fn add( &self, user: u64, favorite: Favorite ) -> Result<bool, FavoritesError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        if !add_to( &mut all, user, favorite ) {
            return Ok( false );
        }
        self.write_all( &all ).await?;
        Ok( true )
    }


    async fn remove( &self, user: u64, locators: &[String] ) -> Result<usize, FavoritesError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        let removed = remove_from( &mut all, user, locators );
        if removed > 0 {
            self.write_all( &all ).await?;
        }
        tracing::debug!( "Removed {} favorites of user {}", removed, user );
        Ok( removed )
    }
}


#[derive( Debug, Default )]
pub struct MemoryFavoritesStore {
    entries: Mutex<FavoritesMap>,
}


impl MemoryFavoritesStore {
    pub fn new() -> Self {
        Self::default()
    }


    fn entries( &self ) -> std::sync::MutexGuard<'_, FavoritesMap> {
        self.entries.lock().unwrap_or_else( PoisonError::into_inner )
    }
}


#[async_trait]
impl FavoritesStore for MemoryFavoritesStore {
    async fn list( &self, user: u64 ) -> Result<Vec<Favorite>, FavoritesError> {
        Ok( self.entries().get( &user.to_string() ).cloned().unwrap_or_default() )
    }


    async fn add( &self, user: u64, favorite: Favorite ) -> Result<bool, FavoritesError> {
        Ok( add_to( &mut self.entries(), user, favorite ) )
    }


    async fn remove( &self, user: u64, locators: &[String] ) -> Result<usize, FavoritesError> {
        Ok( remove_from( &mut self.entries(), user, locators ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use tempfile::TempDir;


    fn fav( title: &str ) -> Favorite {
        Favorite { title: title.to_string(), locator: format!( "https://example.test/{}", title ) }
    }


    #[tokio::test]
    async fn test_duplicate_locator_is_rejected() {
        let store = MemoryFavoritesStore::new();
        assert!( store.add( 7, fav( "a" ) ).await.unwrap() );
        assert!( !store.add( 7, fav( "a" ) ).await.unwrap() );
        assert!( store.add( 8, fav( "a" ) ).await.unwrap() );
        assert_eq!( store.list( 7 ).await.unwrap(), vec![ fav( "a" ) ] );
    }


    #[tokio::test]
    async fn test_json_store_persists_per_user() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "nested" ).join( "favorites.json" );
        let store = JsonFavoritesStore::new( &path );
        store.add( 1, fav( "a" ) ).await.unwrap();
        store.add( 1, fav( "b" ) ).await.unwrap();
        store.add( 2, fav( "c" ) ).await.unwrap();

        let reopened = JsonFavoritesStore::new( &path );
        assert_eq!( reopened.list( 1 ).await.unwrap(), vec![ fav( "a" ), fav( "b" ) ] );
        assert_eq!( reopened.list( 2 ).await.unwrap(), vec![ fav( "c" ) ] );
        assert!( reopened.list( 3 ).await.unwrap().is_empty() );
    }


    #[tokio::test]
    async fn test_remove_drops_emptied_users() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "favorites.json" );
        let store = JsonFavoritesStore::new( &path );
        store.add( 1, fav( "a" ) ).await.unwrap();
        store.add( 1, fav( "b" ) ).await.unwrap();

        let gone = vec![ fav( "a" ).locator, fav( "b" ).locator, "https://example.test/zzz".to_string() ];
        assert_eq!( store.remove( 1, &gone ).await.unwrap(), 2 );
        assert_eq!( store.remove( 1, &gone ).await.unwrap(), 0 );

        let raw = std::fs::read_to_string( &path ).unwrap();
        assert!( !raw.contains( "\"1\"" ) );
    }
}
