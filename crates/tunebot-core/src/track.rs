//! Track data model
//!
//! Catalog metadata as it comes back from a resolver, and the queued
//! `Track` built from it.

use serde::{ Deserialize, Serialize };


/// Who asked for a track.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
pub enum Requester {
    /// A chat member, by platform user id.
    User( u64 ),

    /// The autoplay explorer filled the queue.
    Autoplay,
}


impl Requester {
    /// Returns a short label for display footers.
    pub fn label( &self ) -> String {
        match self {
            Requester::User( id ) => format!( "<@{}>", id ),
            Requester::Autoplay => "autoplay".to_string(),
        }
    }
}


/// Track metadata returned by a catalog.
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
#[serde( default )]
pub struct TrackInfo {
    /// Stable page URL or id the track can be re-resolved from.
    pub locator: String,
    pub title: String,
    pub duration_secs: u64,
    pub uploader: String,
    pub thumbnail: Option<String>,
    /// Direct stream address. Usually short-lived.
    pub stream_locator: Option<String>,
}


/// A playable item in a session queue.
#[derive( Debug, Clone, PartialEq )]
pub struct Track {
    pub locator: String,
    pub title: String,
    pub duration_secs: u64,
    pub uploader: String,
    pub thumbnail: Option<String>,
    pub requester: Requester,
    /// Filled in by the engine right before each start.
    pub stream_locator: Option<String>,
}


impl Track {
    /// Builds a queued track from catalog metadata.
    pub fn from_info( info: TrackInfo, requester: Requester ) -> Self {
        let title = if info.title.trim().is_empty() {
            "Unknown title".to_string()
        } else {
            info.title
        };
        let uploader = if info.uploader.trim().is_empty() {
            "Unknown artist".to_string()
        } else {
            info.uploader
        };

        Self {
            locator: info.locator,
            title,
            duration_secs: info.duration_secs,
            uploader,
            thumbnail: info.thumbnail,
            requester,
            stream_locator: info.stream_locator,
        }
    }


    /// Returns the title cut to `max` characters with a trailing ellipsis.
    pub fn short_title( &self, max: usize ) -> String {
        if self.title.chars().count() > max {
            let cut: String = self.title.chars().take( max ).collect();
            format!( "{}...", cut )
        } else {
            self.title.clone()
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_from_info_fills_placeholders() {
        let track = Track::from_info( TrackInfo::default(), Requester::Autoplay );
        assert_eq!( track.title, "Unknown title" );
        assert_eq!( track.uploader, "Unknown artist" );
        assert_eq!( track.requester, Requester::Autoplay );
    }


    #[test]
    fn test_short_title_counts_chars() {
        let info = TrackInfo { title: "가나다라마바사".into(), ..Default::default() };
        let track = Track::from_info( info, Requester::User( 7 ) );
        assert_eq!( track.short_title( 3 ), "가나다..." );
        assert_eq!( track.short_title( 30 ), "가나다라마바사" );
    }
}
