//! Autoplay explorer
//!
//! When the queue drains with autoplay on, search the catalog around what
//! just played, filter out near-duplicates and off-length results, score
//! what is left and queue one weighted-random pick.

use std::collections::VecDeque;
use std::sync::{ Arc, OnceLock };

use rand::Rng;
use rand::distributions::{ Distribution, WeightedIndex };
use rand::seq::SliceRandom;
use regex::Regex;

use crate::config::AutoplayConfig;
use crate::session::SessionShared;
use crate::similarity::TitleSimilarity;
use crate::state::SessionEvent;
use crate::track::{ Requester, Track, TrackInfo };


struct TitlePatterns {
    annotations: Regex,
    keywords: Regex,
    dashes: Regex,
    disallowed: Regex,
}


fn patterns() -> &'static TitlePatterns {
    static PATTERNS: OnceLock<TitlePatterns> = OnceLock::new();
    PATTERNS.get_or_init( || TitlePatterns {
        annotations: Regex::new( r"\([^)]*\)|\[[^\]]*\]" ).expect( "valid annotation pattern" ),
        keywords: Regex::new(
            r"\b(?:music video|lyric video|official|lyrics|audio|cover|live|mv|가사|공식|커버|라이브)\b"
        ).expect( "valid keyword pattern" ),
        dashes: Regex::new( r"\s*[-–—]\s*" ).expect( "valid dash pattern" ),
        disallowed: Regex::new( r"[^a-z0-9\s\x{AC00}-\x{D7A3}]" ).expect( "valid charset pattern" ),
    })
}


/// Reduces a title to its comparable core.
///
/// "Artist - Song (Official MV) [4K]" becomes "artist song".
pub fn normalize_title( title: &str ) -> String {
    let p = patterns();
    let lowered = title.to_lowercase();
    let stripped = p.annotations.replace_all( &lowered, " " );
    let stripped = p.keywords.replace_all( &stripped, " " );
    let stripped = p.dashes.replace_all( &stripped, " " );
    let stripped = p.disallowed.replace_all( &stripped, "" );
    stripped.split_whitespace().collect::<Vec<_>>().join( " " )
}


/// A normalized title with the uploader it came from.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct RecentEntry {
    pub title: String,
    pub uploader: String,
}


/// Bounded window of recently played titles, oldest first.
#[derive( Debug, Clone )]
pub struct RecentTitles {
    entries: VecDeque<RecentEntry>,
    capacity: usize,
}


impl RecentTitles {
    pub fn new( capacity: usize ) -> Self {
        Self { entries: VecDeque::with_capacity( capacity ), capacity: capacity.max( 1 ) }
    }


    /// Adds an entry, evicting the oldest past capacity. A repeat of the
    /// newest entry is not stored twice.
    pub fn push( &mut self, entry: RecentEntry ) {
        if entry.title.is_empty() || self.entries.back() == Some( &entry ) {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back( entry );
    }


    pub fn latest( &self ) -> Option<&RecentEntry> {
        self.entries.back()
    }


    /// The newest `n` entries.
    pub fn newest( &self, n: usize ) -> Vec<&RecentEntry> {
        let skip = self.entries.len().saturating_sub( n );
        self.entries.iter().skip( skip ).collect()
    }


    pub fn titles( &self ) -> impl Iterator<Item = &str> {
        self.entries.iter().map( |e| e.title.as_str() )
    }


    pub fn len( &self ) -> usize {
        self.entries.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.entries.is_empty()
    }
}


/// What a search is built around.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Seed {
    pub title: String,
    pub uploader: String,
}


/// A search result that survived filtering.
#[derive( Debug, Clone, PartialEq )]
pub struct Candidate {
    pub info: TrackInfo,
    pub score: i32,
}


/// Selection policy for autoplay follow-ups.
pub struct AutoplayExplorer {
    config: AutoplayConfig,
    similarity: Box<dyn TitleSimilarity>,
}


impl AutoplayExplorer {
    pub fn new( config: AutoplayConfig ) -> Self {
        let similarity = config.similarity.build();
        Self { config, similarity }
    }


    /// Builds an explorer with a custom similarity strategy.
    pub fn with_similarity( config: AutoplayConfig, similarity: Box<dyn TitleSimilarity> ) -> Self {
        Self { config, similarity }
    }


    pub fn config( &self ) -> &AutoplayConfig {
        &self.config
    }


    /// Records a played track in the recent window.
    pub fn record( &self, recent: &mut RecentTitles, track: &Track ) {
        recent.push( RecentEntry {
            title: normalize_title( &track.title ),
            uploader: track.uploader.clone(),
        });
    }


    /// Picks the seed: usually the finished track, sometimes an older one
    /// so the search does not drift through one uploader's catalog.
    pub fn pick_seed<R: Rng + ?Sized>( &self, rng: &mut R, recent: &RecentTitles, finished: &Track ) -> Seed {
        let p = self.config.seed_shuffle_probability.clamp( 0.0, 1.0 );
        if recent.len() > 1 && rng.gen_bool( p ) {
            if let Some( entry ) = recent.newest( self.config.seed_pool.max( 1 ) ).choose( rng ) {
                tracing::info!( "[Autoplay] Seeding from earlier title '{}'", entry.title );
                return Seed { title: entry.title.clone(), uploader: entry.uploader.clone() };
            }
        }
        Seed { title: normalize_title( &finished.title ), uploader: finished.uploader.clone() }
    }


    /// Builds the search query for a seed.
    pub fn query<R: Rng + ?Sized>( &self, rng: &mut R, seed: &Seed ) -> String {
        let p = self.config.title_query_probability.clamp( 0.0, 1.0 );
        if !seed.title.is_empty() && rng.gen_bool( p ) {
            format!( "{} {}", seed.uploader, seed.title )
        } else {
            seed.uploader.clone()
        }
    }


    /// Returns true if `normalized` is too close to any recent title.
    pub fn is_too_similar( &self, normalized: &str, recent: &RecentTitles ) -> bool {
        recent.titles().any( |t| self.similarity.score( normalized, t ) > self.config.similarity_threshold )
    }


    /// Keyword and uploader scoring.
    pub fn score( &self, info: &TrackInfo, seed: &Seed ) -> i32 {
        let title = info.title.to_lowercase();
        let mut score = 0;
        if self.config.positive_keywords.iter().any( |kw| title.contains( kw.as_str() ) ) {
            score += self.config.positive_weight;
        }
        if self.config.negative_keywords.iter().any( |kw| title.contains( kw.as_str() ) ) {
            score -= self.config.negative_weight;
        }
        if info.uploader == seed.uploader {
            score += self.config.uploader_weight;
        }
        score
    }


    /// Filters search results and keeps those with a non-negative score.
    pub fn candidates( &self, results: Vec<TrackInfo>, recent: &RecentTitles, seed: &Seed ) -> Vec<Candidate> {
        results
            .into_iter()
            .filter( |info| {
                let normalized = normalize_title( &info.title );
                !normalized.is_empty()
                    && info.duration_secs > self.config.min_duration_secs
                    && info.duration_secs < self.config.max_duration_secs
                    && !self.is_too_similar( &normalized, recent )
            })
            .filter_map( |info| {
                let score = self.score( &info, seed );
                ( score >= 0 ).then_some( Candidate { info, score } )
            })
            .collect()
    }


    /// Weighted-random pick, weight = score + 1.
    pub fn choose<R: Rng + ?Sized>( &self, rng: &mut R, mut candidates: Vec<Candidate> ) -> Option<Candidate> {
        let weights: Vec<u32> = candidates.iter().map( |c| c.score.max( 0 ) as u32 + 1 ).collect();
        let index = WeightedIndex::new( &weights ).ok()?.sample( rng );
        Some( candidates.swap_remove( index ) )
    }
}


/// Background task body: explore and queue one follow-up for `finished`.
pub(crate) async fn explore( shared: Arc<SessionShared>, finished: Track ) {
    let ( query, seed, recent ) = {
        let mut state = shared.state.lock().await;
        shared.explorer.record( &mut state.recent, &finished );
        let mut rng = rand::thread_rng();
        let seed = shared.explorer.pick_seed( &mut rng, &state.recent, &finished );
        let query = shared.explorer.query( &mut rng, &seed );
        ( query, seed, state.recent.clone() )
    };

    let config = shared.explorer.config();
    tracing::info!( "[{}] [Autoplay] Searching for a follow-up: '{}'", shared.id, query );

    let search = shared.catalog.search( &query, config.search_limit );
    let results = match tokio::time::timeout( std::time::Duration::from_secs( config.search_timeout_secs ), search ).await {
        Ok( Ok( results ) ) => results,
        Ok( Err( e ) ) => {
            tracing::warn!( "[{}] [Autoplay] {}", shared.id, e );
            return;
        }
        Err( _ ) => {
            tracing::warn!( "[{}] [Autoplay] Search timed out", shared.id );
            return;
        }
    };
    if results.is_empty() {
        tracing::warn!( "[{}] [Autoplay] No search results", shared.id );
        return;
    }

    let candidates = shared.explorer.candidates( results, &recent, &seed );
    tracing::info!( "[{}] [Autoplay] {} candidates after filtering", shared.id, candidates.len() );

    let chosen = {
        let mut rng = rand::thread_rng();
        shared.explorer.choose( &mut rng, candidates )
    };
    let Some( chosen ) = chosen else {
        tracing::info!( "[{}] [Autoplay] No usable candidate", shared.id );
        return;
    };

    let mut state = shared.state.lock().await;
    if state.closed {
        return;
    }
    let track = Track::from_info( chosen.info, Requester::Autoplay );
    tracing::info!( "[{}] [Autoplay] Queued '{}' (score {})", shared.id, track.title, chosen.score );
    state.emit( SessionEvent::AutoplayQueued { title: track.title.clone(), score: chosen.score } );
    state.queue.append( track );
    if state.active.is_none() && state.current.is_none() {
        shared.advance.signal();
    }
    shared.publish( &state );
}


#[cfg( test )]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;


    fn info( title: &str, uploader: &str, duration_secs: u64 ) -> TrackInfo {
        TrackInfo {
            locator: format!( "https://example.test/{}", title.replace( ' ', "_" ) ),
            title: title.to_string(),
            duration_secs,
            uploader: uploader.to_string(),
            ..Default::default()
        }
    }


    fn finished( title: &str, uploader: &str ) -> Track {
        Track::from_info( info( title, uploader, 200 ), Requester::User( 1 ) )
    }


    fn seed( uploader: &str ) -> Seed {
        Seed { title: "anything".into(), uploader: uploader.into() }
    }


    #[test]
    fn test_normalize_strips_annotations_and_keywords() {
        assert_eq!( normalize_title( "Artist - Song (Official MV) [4K]" ), "artist song" );
        assert_eq!( normalize_title( "SONG — Lyrics Video!!" ), "song video" );
        assert_eq!( normalize_title( "노래 제목 (가사) 공식" ), "노래 제목" );
        assert_eq!( normalize_title( "Olive Branch" ), "olive branch" );
        assert_eq!( normalize_title( "(Official Audio)" ), "" );
    }


    #[test]
    fn test_recent_window_is_bounded() {
        let mut recent = RecentTitles::new( 3 );
        for n in 0..5 {
            recent.push( RecentEntry { title: format!( "t{}", n ), uploader: "u".into() } );
        }
        assert_eq!( recent.titles().collect::<Vec<_>>(), vec![ "t2", "t3", "t4" ] );
        recent.push( RecentEntry { title: "t4".into(), uploader: "u".into() } );
        assert_eq!( recent.len(), 3 );
    }


    #[test]
    fn test_duration_bounds_are_exclusive() {
        let explorer = AutoplayExplorer::new( AutoplayConfig::default() );
        let recent = RecentTitles::new( 20 );
        let results = vec![
            info( "exactly ninety", "u", 90 ),
            info( "ninety one", "u", 91 ),
            info( "five ninety nine", "u", 599 ),
            info( "exactly six hundred", "u", 600 ),
            info( "jingle", "u", 30 ),
        ];
        let kept: Vec<_> = explorer.candidates( results, &recent, &seed( "u" ) )
            .into_iter()
            .map( |c| c.info.duration_secs )
            .collect();
        assert_eq!( kept, vec![ 91, 599 ] );
    }


    #[test]
    fn test_near_duplicates_are_rejected() {
        let explorer = AutoplayExplorer::new( AutoplayConfig::default() );
        let mut recent = RecentTitles::new( 20 );
        explorer.record( &mut recent, &finished( "Artist - Blue Sky (Official Audio)", "Artist" ) );

        let results = vec![
            info( "Artist - Blue Sky [Lyrics]", "Artist", 200 ),
            info( "Artist - Blue Skys", "Artist", 200 ),
            info( "Artist - Red Dawn", "Artist", 200 ),
        ];
        let kept: Vec<_> = explorer.candidates( results, &recent, &seed( "Artist" ) )
            .into_iter()
            .map( |c| c.info.title )
            .collect();
        assert_eq!( kept, vec![ "Artist - Red Dawn" ] );
    }


    #[test]
    fn test_threshold_is_configurable() {
        let mut config = AutoplayConfig::default();
        config.similarity_threshold = 0.99;
        let explorer = AutoplayExplorer::new( config );
        let mut recent = RecentTitles::new( 20 );
        explorer.record( &mut recent, &finished( "Blue Sky", "A" ) );
        assert!( !explorer.is_too_similar( "blue skys", &recent ) );
        assert!( explorer.is_too_similar( "blue sky", &recent ) );
    }


    #[test]
    fn test_scoring_weights() {
        let explorer = AutoplayExplorer::new( AutoplayConfig::default() );
        let s = seed( "Artist" );
        assert_eq!( explorer.score( &info( "Song (Official Audio)", "Artist", 200 ), &s ), 3 );
        assert_eq!( explorer.score( &info( "Song lyrics", "Other", 200 ), &s ), 2 );
        assert_eq!( explorer.score( &info( "Song reaction", "Artist", 200 ), &s ), -4 );
        assert_eq!( explorer.score( &info( "Song", "Other", 200 ), &s ), 0 );
    }


    #[test]
    fn test_negative_scores_are_dropped() {
        let explorer = AutoplayExplorer::new( AutoplayConfig::default() );
        let recent = RecentTitles::new( 20 );
        let results = vec![ info( "Song Live at Hall", "Other", 200 ), info( "Other Song", "Other", 200 ) ];
        let kept = explorer.candidates( results, &recent, &seed( "Artist" ) );
        assert_eq!( kept.len(), 1 );
        assert_eq!( kept[ 0 ].info.title, "Other Song" );
    }


    #[test]
    fn test_choose_respects_weights() {
        let explorer = AutoplayExplorer::new( AutoplayConfig::default() );
        let mut rng = StdRng::seed_from_u64( 7 );
        let mut heavy = 0;
        for _ in 0..1000 {
            let pool = vec![
                Candidate { info: info( "light", "u", 200 ), score: 0 },
                Candidate { info: info( "heavy", "u", 200 ), score: 9 },
            ];
            if explorer.choose( &mut rng, pool ).unwrap().info.title == "heavy" {
                heavy += 1;
            }
        }
        // Expected share is 10/11.
        assert!( heavy > 850, "heavy picked {} times", heavy );
        assert!( explorer.choose( &mut rng, Vec::new() ).is_none() );
    }


    #[test]
    fn test_seed_and_query_follow_probabilities() {
        let mut config = AutoplayConfig::default();
        config.seed_shuffle_probability = 0.0;
        config.title_query_probability = 1.0;
        let explorer = AutoplayExplorer::new( config );
        let mut rng = StdRng::seed_from_u64( 1 );

        let mut recent = RecentTitles::new( 20 );
        explorer.record( &mut recent, &finished( "Old Song", "Old Artist" ) );
        let last = finished( "New Song (MV)", "New Artist" );
        explorer.record( &mut recent, &last );

        let seed = explorer.pick_seed( &mut rng, &recent, &last );
        assert_eq!( seed, Seed { title: "new song".into(), uploader: "New Artist".into() } );
        assert_eq!( explorer.query( &mut rng, &seed ), "New Artist new song" );

        let mut config = AutoplayConfig::default();
        config.seed_shuffle_probability = 1.0;
        config.title_query_probability = 0.0;
        let explorer = AutoplayExplorer::new( config );
        let seed = explorer.pick_seed( &mut rng, &recent, &last );
        assert!( seed.uploader == "Old Artist" || seed.uploader == "New Artist" );
        assert_eq!( explorer.query( &mut rng, &seed ), seed.uploader );
    }
}
