//! Console rendering of session snapshots.

use tunebot_core::{ PlaybackPhase, SessionView };


/// Width of the progress bar in cells.
const BAR_WIDTH: usize = 24;


/// Formats seconds as "m:ss", or "h:mm:ss" past an hour.
pub fn format_time( secs: u64 ) -> String {
    let ( h, m, s ) = ( secs / 3600, ( secs % 3600 ) / 60, secs % 60 );
    if h > 0 {
        format!( "{}:{:02}:{:02}", h, m, s )
    } else {
        format!( "{}:{:02}", m, s )
    }
}


/// Renders a fixed-width bar for a 0.0 to 1.0 progress fraction.
pub fn progress_bar( progress: f64, width: usize ) -> String {
    let filled = ( ( progress.clamp( 0.0, 1.0 ) * width as f64 ).round() as usize ).min( width );
    format!( "{}{}", "=".repeat( filled ), "-".repeat( width - filled ) )
}


/// Renders the now-playing panel.
pub fn render( view: &SessionView ) -> String {
    let status = format!(
        "vol {}% | {} | autoplay {} | effect {}",
        view.volume_percent,
        view.loop_mode,
        if view.autoplay { "on" } else { "off" },
        view.effect
    );

    let mut lines = Vec::new();
    match &view.title {
        Some( title ) => {
            let tag = if view.announcing { "announcing" } else { view.phase.name() };
            lines.push( format!(
                "[{}] {} ({})",
                tag,
                title,
                view.uploader.as_deref().unwrap_or( "unknown" )
            ));
            if matches!( view.phase, PlaybackPhase::Playing | PlaybackPhase::Paused ) {
                lines.push( format!(
                    "  [{}] {} / {}",
                    progress_bar( view.progress, BAR_WIDTH ),
                    format_time( view.elapsed_secs ),
                    format_time( view.duration_secs )
                ));
            }
        }
        None if view.announcing => lines.push( "[announcing]".to_string() ),
        None => lines.push( "[idle] Nothing playing".to_string() ),
    }
    lines.push( format!( "  {}", status ) );
    if let Some( next ) = &view.next_title {
        lines.push( format!( "  up next: {} ({} queued)", next, view.queue_len ) );
    }
    lines.join( "\n" )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0 ), "0:00" );
        assert_eq!( format_time( 75 ), "1:15" );
        assert_eq!( format_time( 3725 ), "1:02:05" );
    }


    #[test]
    fn test_progress_bar() {
        assert_eq!( progress_bar( 0.0, 4 ), "----" );
        assert_eq!( progress_bar( 0.5, 4 ), "==--" );
        assert_eq!( progress_bar( 2.0, 4 ), "====" );
    }


    #[test]
    fn test_render_idle() {
        let out = render( &SessionView { volume_percent: 50, ..Default::default() } );
        assert!( out.starts_with( "[idle] Nothing playing" ) );
        assert!( out.contains( "vol 50% | No loop | autoplay off | effect none" ) );
        assert!( !out.contains( "up next" ) );
    }


    #[test]
    fn test_render_playing() {
        let view = SessionView {
            phase: PlaybackPhase::Playing,
            title: Some( "Blue Sky".into() ),
            uploader: Some( "Band".into() ),
            elapsed_secs: 60,
            duration_secs: 240,
            progress: 0.25,
            next_title: Some( "Red Dawn".into() ),
            queue_len: 2,
            ..Default::default()
        };
        let out = render( &view );
        assert!( out.starts_with( "[playing] Blue Sky (Band)" ) );
        assert!( out.contains( "1:00 / 4:00" ) );
        assert!( out.contains( "up next: Red Dawn (2 queued)" ) );
    }
}
