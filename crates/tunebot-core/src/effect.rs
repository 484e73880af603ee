//! Audio effect profiles
//!
//! Each effect maps to a filter chain handed to the playback process and a
//! speed factor used when computing elapsed time.

use std::fmt;
use std::str::FromStr;

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Error returned for an unrecognised effect name.
#[derive( Debug, Error, PartialEq, Eq )]
#[error( "Unknown effect: '{0}'. Use none, bassboost, speedup, nightcore, or vaporwave" )]
pub struct UnknownEffect( pub String );


/// Audio effect applied to the active stream.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Effect {
    #[default]
    None,
    BassBoost,
    SpeedUp,
    Nightcore,
    Vaporwave,
}


impl Effect {
    /// All effects, in menu order.
    pub const ALL: [Effect; 5] = [
        Effect::None,
        Effect::BassBoost,
        Effect::SpeedUp,
        Effect::Nightcore,
        Effect::Vaporwave,
    ];


    /// Returns the filter chain for the transcoder, empty for `None`.
    pub fn filter( &self ) -> &'static str {
        match self {
            Effect::None => "",
            Effect::BassBoost => "bass=g=15",
            Effect::SpeedUp => "rubberband=tempo=1.25",
            Effect::Nightcore => "atempo=1.2,asetrate=48000*1.2",
            Effect::Vaporwave => "atempo=0.8,asetrate=48000*0.85",
        }
    }


    /// How many seconds of source audio play per wall-clock second.
    pub fn speed_factor( &self ) -> f64 {
        match self {
            Effect::SpeedUp => 1.25,
            Effect::Nightcore => 1.2,
            Effect::Vaporwave => 0.8,
            Effect::None | Effect::BassBoost => 1.0,
        }
    }


    /// Returns the canonical lowercase name.
    pub fn name( &self ) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::BassBoost => "bassboost",
            Effect::SpeedUp => "speedup",
            Effect::Nightcore => "nightcore",
            Effect::Vaporwave => "vaporwave",
        }
    }
}


impl fmt::Display for Effect {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.name() )
    }
}


impl FromStr for Effect {
    type Err = UnknownEffect;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Effect::ALL
            .iter()
            .copied()
            .find( |e| e.name() == wanted )
            .or( match wanted.as_str() {
                "off" | "" => Some( Effect::None ),
                "bass" => Some( Effect::BassBoost ),
                _ => None,
            })
            .ok_or( UnknownEffect( s.to_string() ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!( "Nightcore".parse::<Effect>(), Ok( Effect::Nightcore ) );
        assert_eq!( "bass".parse::<Effect>(), Ok( Effect::BassBoost ) );
        assert_eq!( "off".parse::<Effect>(), Ok( Effect::None ) );
        assert!( "chipmunk".parse::<Effect>().is_err() );
    }


    #[test]
    fn test_speed_factors() {
        assert_eq!( Effect::None.speed_factor(), 1.0 );
        assert_eq!( Effect::BassBoost.speed_factor(), 1.0 );
        assert_eq!( Effect::Vaporwave.speed_factor(), 0.8 );
        assert!( Effect::None.filter().is_empty() );
    }
}
