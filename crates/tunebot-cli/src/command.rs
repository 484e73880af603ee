//! Shell command parsing.
//!
//! Commands are parsed from one input line (a leading `/` is optional) and
//! map onto session operations.

use thiserror::Error;

use tunebot_core::LoopMode;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed shell command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Queue commands
    Play { query: String },
    Search { term: String },
    Remove { position: usize },
    Front { position: usize },
    Shuffle,
    Clear,
    Queue,

    // Playback commands
    Skip,
    Pause,
    Resume,
    Toggle,
    Volume { level: Option<u32> },
    Loop { mode: Option<LoopMode> },
    Effect { name: Option<String> },
    Autoplay,
    Now,
    Say { text: String },

    // Favorites commands
    Favorite,
    Favorites,
    PlayFavorites { position: Option<usize> },
    Unfavorite { position: usize },

    // Presence commands
    Arrive { name: String },
    Depart,

    // Session commands
    Leave,
    Help,
    Quit,
}


impl Command {
    /// Parses a command line.
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim().trim_start_matches( '/' );
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Queue commands
            "play" | "p" | "add" | "a" => {
                let query = args
                    .ok_or_else( || CommandError::MissingArgument( "track or search query".into() ) )?;
                Ok( Command::Play { query: query.to_string() } )
            }
            "search" | "find" | "?" => {
                let term = args
                    .ok_or_else( || CommandError::MissingArgument( "search term".into() ) )?;
                Ok( Command::Search { term: term.to_string() } )
            }
            "remove" | "rm" | "del" => Ok( Command::Remove { position: parse_position( args )? } ),
            "front" | "top" | "mv" => Ok( Command::Front { position: parse_position( args )? } ),
            "shuffle" | "sh" => Ok( Command::Shuffle ),
            "clear" | "cl" => Ok( Command::Clear ),
            "queue" | "ls" => Ok( Command::Queue ),

            // Playback commands
            "skip" | "next" | "n" => Ok( Command::Skip ),
            "pause" | "pa" => Ok( Command::Pause ),
            "resume" | "r" => Ok( Command::Resume ),
            "toggle" | "t" => Ok( Command::Toggle ),
            "vol" | "volume" => {
                let level = args.map( parse_volume ).transpose()?;
                Ok( Command::Volume { level } )
            }
            "loop" | "repeat" | "rep" => {
                let mode = args
                    .map( |s| s.parse::<LoopMode>() )
                    .transpose()
                    .map_err( |e| CommandError::InvalidArgument( e.to_string() ) )?;
                Ok( Command::Loop { mode } )
            }
            "effect" | "fx" => Ok( Command::Effect { name: args.map( str::to_string ) } ),
            "autoplay" | "ap" => Ok( Command::Autoplay ),
            "now" | "np" => Ok( Command::Now ),
            "say" | "tts" => {
                let text = args
                    .ok_or_else( || CommandError::MissingArgument( "announcement text".into() ) )?;
                Ok( Command::Say { text: text.to_string() } )
            }

            // Favorites commands
            "fav" | "star" => Ok( Command::Favorite ),
            "favs" | "favorites" => Ok( Command::Favorites ),
            "favplay" | "fp" => {
                let position = args.map( |s| parse_position( Some( s ) ) ).transpose()?;
                Ok( Command::PlayFavorites { position } )
            }
            "unfav" | "unstar" => Ok( Command::Unfavorite { position: parse_position( args )? } ),

            // Presence commands
            "arrive" | "join" => {
                let name = args
                    .ok_or_else( || CommandError::MissingArgument( "listener name".into() ) )?;
                Ok( Command::Arrive { name: name.to_string() } )
            }
            "depart" | "part" => Ok( Command::Depart ),

            // Session commands
            "leave" | "stop" => Ok( Command::Leave ),
            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Parses a 1-based queue position.
fn parse_position( args: Option<&str> ) -> Result<usize, CommandError> {
    let s = args.ok_or_else( || CommandError::MissingArgument( "queue position".into() ) )?;
    match s.parse::<usize>() {
        Ok( n ) if n >= 1 => Ok( n ),
        _ => Err( CommandError::InvalidArgument( format!( "Invalid queue position: {}", s ) ) ),
    }
}


/// Parses a volume percentage, 0 to 100.
fn parse_volume( s: &str ) -> Result<u32, CommandError> {
    match s.trim_end_matches( '%' ).parse::<u32>() {
        Ok( level ) if level <= 100 => Ok( level ),
        _ => Err( CommandError::InvalidArgument( format!( "Volume must be 0-100, got '{}'", s ) ) ),
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Queue Commands:
  /play <query>     Queue a track by title or locator
  /search <term>    List catalog matches
  /remove <n>       Remove queued track n
  /front <n>        Move queued track n to the front
  /shuffle          Shuffle the queue
  /clear            Clear the queue
  /queue            Show the queue

Playback Commands:
  /skip             Skip the current track
  /pause, /resume   Pause or resume
  /toggle           Toggle pause
  /vol [0-100]      Show or set volume
  /loop [mode]      Set loop (none/track/queue), or cycle
  /effect [name]    Set effect (none/bassboost/speedup/nightcore/vaporwave)
  /autoplay         Toggle autoplay
  /now              Show what is playing
  /say <text>       Speak an announcement over the music

Favorites Commands:
  /fav              Save the current track
  /favs             List saved tracks
  /favplay [n]      Queue saved track n, or all of them
  /unfav <n>        Delete saved track n

Presence Commands:
  /arrive <name>    Simulate a listener joining the channel
  /depart           Simulate a listener leaving the channel

Session Commands:
  /leave            Tear the session down
  /help             Show this help
  /quit             Exit tunebot"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play() {
        let cmd = Command::parse( "play never gonna give" ).unwrap();
        assert_eq!( cmd, Command::Play { query: "never gonna give".into() } );
    }


    #[test]
    fn test_parse_with_slash_and_alias() {
        assert_eq!( Command::parse( "/a sunrise" ).unwrap(), Command::Play { query: "sunrise".into() } );
        assert_eq!( Command::parse( "/n" ).unwrap(), Command::Skip );
    }


    #[test]
    fn test_parse_loop_with_mode() {
        assert_eq!( Command::parse( "loop queue" ).unwrap(), Command::Loop { mode: Some( LoopMode::Queue ) } );
        assert_eq!( Command::parse( "repeat" ).unwrap(), Command::Loop { mode: None } );
        assert!( matches!( Command::parse( "loop sideways" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_volume() {
        assert_eq!( Command::parse( "vol 40" ).unwrap(), Command::Volume { level: Some( 40 ) } );
        assert_eq!( Command::parse( "vol 40%" ).unwrap(), Command::Volume { level: Some( 40 ) } );
        assert_eq!( Command::parse( "vol" ).unwrap(), Command::Volume { level: None } );
        assert!( matches!( Command::parse( "vol 140" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_positions() {
        assert_eq!( Command::parse( "rm 2" ).unwrap(), Command::Remove { position: 2 } );
        assert_eq!( Command::parse( "front 1" ).unwrap(), Command::Front { position: 1 } );
        assert!( matches!( Command::parse( "rm 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "rm" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_effect() {
        assert_eq!( Command::parse( "fx nightcore" ).unwrap(), Command::Effect { name: Some( "nightcore".into() ) } );
        assert_eq!( Command::parse( "effect" ).unwrap(), Command::Effect { name: None } );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "foobar" ), Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "   " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "say" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "play   " ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_favorites_and_presence() {
        assert_eq!( Command::parse( "fav" ).unwrap(), Command::Favorite );
        assert_eq!( Command::parse( "/favplay" ).unwrap(), Command::PlayFavorites { position: None } );
        assert_eq!( Command::parse( "fp 2" ).unwrap(), Command::PlayFavorites { position: Some( 2 ) } );
        assert_eq!( Command::parse( "unfav 1" ).unwrap(), Command::Unfavorite { position: 1 } );
        assert!( matches!( Command::parse( "unfav" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "fp 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert_eq!( Command::parse( "arrive Ann Lee" ).unwrap(), Command::Arrive { name: "Ann Lee".into() } );
        assert_eq!( Command::parse( "depart" ).unwrap(), Command::Depart );
    }
}
