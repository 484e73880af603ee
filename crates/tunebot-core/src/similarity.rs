//! Title similarity strategies used by autoplay filtering.

use serde::{ Deserialize, Serialize };


/// Scores how alike two normalized titles are, from 0.0 to 1.0.
pub trait TitleSimilarity: Send + Sync {
    fn score( &self, a: &str, b: &str ) -> f64;
}


/// Normalized Levenshtein similarity.
#[derive( Debug, Clone, Copy, Default )]
pub struct EditDistance;


impl TitleSimilarity for EditDistance {
    fn score( &self, a: &str, b: &str ) -> f64 {
        strsim::normalized_levenshtein( a, b )
    }
}


/// Containment ratio: the share of the longer title covered by the shorter
/// one when one contains the other, 0.0 otherwise.
#[derive( Debug, Clone, Copy, Default )]
pub struct SubstringOverlap;


impl TitleSimilarity for SubstringOverlap {
    fn score( &self, a: &str, b: &str ) -> f64 {
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let ( short, long ) = if a.chars().count() <= b.chars().count() { ( a, b ) } else { ( b, a ) };
        if short.is_empty() || !long.contains( short ) {
            return 0.0;
        }
        short.chars().count() as f64 / long.chars().count() as f64
    }
}


/// Which similarity strategy a session uses.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum SimilarityKind {
    #[default]
    EditDistance,
    SubstringOverlap,
}


impl SimilarityKind {
    /// Builds the configured strategy.
    pub fn build( self ) -> Box<dyn TitleSimilarity> {
        match self {
            SimilarityKind::EditDistance => Box::new( EditDistance ),
            SimilarityKind::SubstringOverlap => Box::new( SubstringOverlap ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_edit_distance_identical_and_distinct() {
        assert_eq!( EditDistance.score( "blue sky", "blue sky" ), 1.0 );
        assert!( EditDistance.score( "blue sky", "red dawn" ) < 0.5 );
        assert!( EditDistance.score( "blue sky", "blue skys" ) > 0.85 );
    }


    #[test]
    fn test_substring_overlap() {
        assert_eq!( SubstringOverlap.score( "blue sky", "blue sky" ), 1.0 );
        assert_eq!( SubstringOverlap.score( "blue", "blue sky" ), 0.5 );
        assert_eq!( SubstringOverlap.score( "blue sky", "red" ), 0.0 );
        assert_eq!( SubstringOverlap.score( "", "red" ), 0.0 );
    }
}
