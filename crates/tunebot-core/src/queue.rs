//! Queue management
//!
//! Handles pending-track ordering, loop modes, shuffle and removal.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::track::Track;


/// Errors that can occur with queue operations.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum QueueError {
    #[error( "Index {index} is out of range (queue has {len} tracks)" )]
    OutOfRange { index: usize, len: usize },

    #[error( "Invalid loop mode: '{0}'. Use 'none', 'track', or 'queue'" )]
    InvalidLoopMode( String ),
}


/// Loop mode for a session.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Queue,
}


impl LoopMode {
    /// Returns the next mode in the none -> track -> queue cycle.
    pub fn next( self ) -> Self {
        match self {
            LoopMode::None => LoopMode::Track,
            LoopMode::Track => LoopMode::Queue,
            LoopMode::Queue => LoopMode::None,
        }
    }


    /// Returns the display name of the mode.
    pub fn name( &self ) -> &'static str {
        match self {
            LoopMode::None => "No loop",
            LoopMode::Track => "Loop track",
            LoopMode::Queue => "Loop queue",
        }
    }
}


impl fmt::Display for LoopMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.name() )
    }
}


impl FromStr for LoopMode {
    type Err = QueueError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" | "0" => Ok( LoopMode::None ),
            "track" | "one" | "song" | "1" => Ok( LoopMode::Track ),
            "queue" | "all" | "2" => Ok( LoopMode::Queue ),
            _ => Err( QueueError::InvalidLoopMode( s.to_string() ) ),
        }
    }
}


/// Ordered list of tracks waiting to play.
///
/// Not synchronized on its own; the session lock serializes access.
#[derive( Debug, Default )]
pub struct QueueManager {
    tracks: VecDeque<Track>,
}


impl QueueManager {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }


    /// Adds a track to the end of the queue.
    pub fn append( &mut self, track: Track ) {
        self.tracks.push_back( track );
    }


    /// Adds multiple tracks to the end of the queue.
    pub fn append_many( &mut self, tracks: impl IntoIterator<Item = Track> ) {
        self.tracks.extend( tracks );
    }


    /// Puts a track at the head so it is picked next.
    pub fn prepend( &mut self, track: Track ) {
        self.tracks.push_front( track );
    }


    /// Takes the head of the queue.
    pub fn pop_front( &mut self ) -> Option<Track> {
        self.tracks.pop_front()
    }


    /// Removes the track at `index`.
    pub fn remove_at( &mut self, index: usize ) -> Result<Track, QueueError> {
        let len = self.tracks.len();
        self.tracks.remove( index ).ok_or( QueueError::OutOfRange { index, len } )
    }


    /// Moves the track at `index` to the head of the queue.
    pub fn move_to_front( &mut self, index: usize ) -> Result<(), QueueError> {
        let track = self.remove_at( index )?;
        self.tracks.push_front( track );
        Ok(())
    }


    /// Shuffles the queue in place.
    pub fn shuffle( &mut self ) {
        let mut rng = rand::thread_rng();
        self.tracks.make_contiguous().shuffle( &mut rng );
    }


    /// Clears the queue.
    ///
    /// @returns The number of tracks removed
    pub fn clear( &mut self ) -> usize {
        let count = self.tracks.len();
        self.tracks.clear();
        count
    }


    /// Gets the track that would play next.
    pub fn front( &self ) -> Option<&Track> {
        self.tracks.front()
    }


    /// Iterates queued tracks in play order.
    pub fn iter( &self ) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }


    /// Gets the number of queued tracks.
    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    /// Returns true if nothing is queued.
    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::track::{ Requester, TrackInfo };
    use proptest::prelude::*;


    fn track( name: &str ) -> Track {
        Track::from_info(
            TrackInfo {
                locator: format!( "https://example.test/{}", name ),
                title: name.to_string(),
                duration_secs: 200,
                uploader: "tester".into(),
                ..Default::default()
            },
            Requester::User( 1 ),
        )
    }


    fn titles( queue: &QueueManager ) -> Vec<String> {
        queue.iter().map( |t| t.title.clone() ).collect()
    }


    #[test]
    fn test_prepend_goes_to_head() {
        let mut queue = QueueManager::new();
        queue.append( track( "a" ) );
        queue.append( track( "b" ) );
        queue.prepend( track( "x" ) );
        assert_eq!( titles( &queue ), vec![ "x", "a", "b" ] );
        assert_eq!( queue.pop_front().map( |t| t.title ), Some( "x".to_string() ) );
    }


    #[test]
    fn test_remove_out_of_range() {
        let mut queue = QueueManager::new();
        queue.append( track( "a" ) );
        assert_eq!( queue.remove_at( 3 ), Err( QueueError::OutOfRange { index: 3, len: 1 } ) );
        assert_eq!( queue.len(), 1 );
    }


    #[test]
    fn test_move_to_front() {
        let mut queue = QueueManager::new();
        queue.append_many( [ track( "a" ), track( "b" ), track( "c" ) ] );
        queue.move_to_front( 2 ).unwrap();
        assert_eq!( titles( &queue ), vec![ "c", "a", "b" ] );
        assert!( queue.move_to_front( 9 ).is_err() );
    }


    #[test]
    fn test_shuffle_keeps_tracks() {
        let mut queue = QueueManager::new();
        queue.append_many( ( 0..20 ).map( |i| track( &i.to_string() ) ) );
        queue.shuffle();
        let mut after = titles( &queue );
        after.sort();
        let mut expected: Vec<String> = ( 0..20 ).map( |i| i.to_string() ).collect();
        expected.sort();
        assert_eq!( after, expected );
    }


    #[test]
    fn test_loop_mode_cycle_and_parse() {
        assert_eq!( LoopMode::None.next(), LoopMode::Track );
        assert_eq!( LoopMode::Queue.next(), LoopMode::None );
        assert_eq!( "ALL".parse::<LoopMode>(), Ok( LoopMode::Queue ) );
        assert!( "sometimes".parse::<LoopMode>().is_err() );
    }


    #[derive( Debug, Clone )]
    enum Op {
        Append,
        Prepend,
        Pop,
        Remove( usize ),
        Front( usize ),
        Clear,
    }


    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just( Op::Append ),
            Just( Op::Prepend ),
            Just( Op::Pop ),
            ( 0usize..8 ).prop_map( Op::Remove ),
            ( 0usize..8 ).prop_map( Op::Front ),
            Just( Op::Clear ),
        ]
    }


    proptest! {
        #[test]
        fn prop_clear_returns_length( ops in prop::collection::vec( op(), 0..40 ) ) {
            let mut queue = QueueManager::new();
            for ( i, op ) in ops.into_iter().enumerate() {
                match op {
                    Op::Append => queue.append( track( &i.to_string() ) ),
                    Op::Prepend => queue.prepend( track( &i.to_string() ) ),
                    Op::Pop => { let _ = queue.pop_front(); }
                    Op::Remove( idx ) => { let _ = queue.remove_at( idx ); }
                    Op::Front( idx ) => { let _ = queue.move_to_front( idx ); }
                    Op::Clear => { let _ = queue.clear(); }
                }
            }
            let before = queue.len();
            prop_assert_eq!( queue.clear(), before );
            prop_assert!( queue.is_empty() );
        }
    }
}
