//! Announcement clip cache
//!
//! Greetings repeat a lot, so synthesized clips are kept by their text and
//! reused. Entries unused for longer than a maximum age can be pruned.

use std::collections::HashMap;
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::external::{ AnnouncementClip, AnnouncementError, AnnouncementProvider };


struct CachedClip {
    clip: AnnouncementClip,
    last_used: Instant,
}


/// Caching wrapper around another announcement provider.
pub struct CachedAnnouncer {
    inner: Arc<dyn AnnouncementProvider>,
    clips: Mutex<HashMap<String, CachedClip>>,
}


impl CachedAnnouncer {
    pub fn new( inner: Arc<dyn AnnouncementProvider> ) -> Self {
        Self { inner, clips: Mutex::new( HashMap::new() ) }
    }


    fn clips( &self ) -> MutexGuard<'_, HashMap<String, CachedClip>> {
        self.clips.lock().unwrap_or_else( PoisonError::into_inner )
    }


    /// Synthesizes every text not cached yet, concurrently.
    ///
    /// Returns how many of the texts are cached afterwards. Failures are
    /// logged and left out.
    pub async fn precache<I>( &self, texts: I ) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut wanted: Vec<String> = texts.into_iter().collect();
        wanted.sort();
        wanted.dedup();

        let mut tasks = JoinSet::new();
        for text in wanted.iter().filter( |t| !self.contains( t ) ) {
            let inner = Arc::clone( &self.inner );
            let text = text.clone();
            tasks.spawn( async move {
                let result = inner.synthesize( &text ).await;
                ( text, result )
            });
        }

        let mut created = 0;
        while let Some( joined ) = tasks.join_next().await {
            match joined {
                Ok( ( text, Ok( clip ) ) ) => {
                    self.clips().insert( text, CachedClip { clip, last_used: Instant::now() } );
                    created += 1;
                }
                Ok( ( text, Err( e ) ) ) => tracing::warn!( "[Clip cache] Could not precache '{}': {}", text, e ),
                Err( e ) => tracing::warn!( "[Clip cache] Precache task failed: {}", e ),
            }
        }

        let cached = wanted.iter().filter( |t| self.contains( t ) ).count();
        tracing::info!( "[Clip cache] Precached {} new clips, {} of {} ready", created, cached, wanted.len() );
        cached
    }


    /// Drops clips unused for longer than `max_age`. Returns how many went.
    pub fn cleanup( &self, max_age: Duration ) -> usize {
        let now = Instant::now();
        let mut clips = self.clips();
        let before = clips.len();
        clips.retain( |_, cached| now.duration_since( cached.last_used ) <= max_age );
        let pruned = before - clips.len();
        tracing::info!( "[Clip cache] Pruned {} stale clips", pruned );
        pruned
    }


    pub fn contains( &self, text: &str ) -> bool {
        self.clips().contains_key( text )
    }


    pub fn len( &self ) -> usize {
        self.clips().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.clips().is_empty()
    }
}


#[async_trait]
impl AnnouncementProvider for CachedAnnouncer {
    async fn synthesize( &self, text: &str ) -> Result<AnnouncementClip, AnnouncementError> {
        let hit = self.clips().get_mut( text ).map( |cached| {
            cached.last_used = Instant::now();
            cached.clip.clone()
        });
        if let Some( clip ) = hit {
            return Ok( clip );
        }

        let clip = self.inner.synthesize( text ).await?;
        tracing::debug!( "[Clip cache] New clip for '{}'", text );
        self.clips().insert( text.to_string(), CachedClip { clip: clip.clone(), last_used: Instant::now() } );
        Ok( clip )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::atomic::{ AtomicUsize, Ordering };


    #[derive( Default )]
    struct CountingVoice {
        calls: AtomicUsize,
    }


    #[async_trait]
    impl AnnouncementProvider for CountingVoice {
        async fn synthesize( &self, text: &str ) -> Result<AnnouncementClip, AnnouncementError> {
            self.calls.fetch_add( 1, Ordering::SeqCst );
            if text.is_empty() {
                return Err( AnnouncementError::Synthesis( "empty".into() ) );
            }
            Ok( AnnouncementClip { text: text.to_string(), locator: format!( "tts://{}", text ) } )
        }
    }


    #[tokio::test]
    async fn test_repeated_text_synthesizes_once() {
        let voice = Arc::new( CountingVoice::default() );
        let cache = CachedAnnouncer::new( voice.clone() );

        let first = cache.synthesize( "hello" ).await.unwrap();
        let second = cache.synthesize( "hello" ).await.unwrap();
        assert_eq!( first, second );
        assert_eq!( voice.calls.load( Ordering::SeqCst ), 1 );
        assert!( cache.synthesize( "" ).await.is_err() );
        assert_eq!( cache.len(), 1 );
    }


    #[tokio::test]
    async fn test_precache_skips_known_and_failed_texts() {
        let voice = Arc::new( CountingVoice::default() );
        let cache = CachedAnnouncer::new( voice.clone() );
        cache.synthesize( "a" ).await.unwrap();

        let ready = cache.precache( [ "a", "b", "b", "", "c" ].map( String::from ) ).await;
        assert_eq!( ready, 3 );
        // "a" was already cached and "b" is deduplicated.
        assert_eq!( voice.calls.load( Ordering::SeqCst ), 4 );
        assert!( cache.contains( "c" ) );
        assert!( !cache.contains( "" ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_cleanup_prunes_only_stale_clips() {
        let cache = CachedAnnouncer::new( Arc::new( CountingVoice::default() ) );
        cache.synthesize( "old" ).await.unwrap();
        cache.synthesize( "fresh" ).await.unwrap();

        tokio::time::advance( Duration::from_secs( 90 ) ).await;
        // Using a clip keeps it alive.
        cache.synthesize( "fresh" ).await.unwrap();
        tokio::time::advance( Duration::from_secs( 30 ) ).await;

        assert_eq!( cache.cleanup( Duration::from_secs( 100 ) ), 1 );
        assert!( cache.contains( "fresh" ) );
        assert!( !cache.contains( "old" ) );
    }
}
