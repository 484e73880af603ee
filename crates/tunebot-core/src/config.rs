//! Session configuration
//!
//! Timing budgets, failure policy and autoplay tuning. Everything has a
//! default so a partial JSON file is enough.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::similarity::SimilarityKind;


/// Errors that can occur while loading configuration.
#[derive( Debug, Error )]
pub enum ConfigError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Invalid config file: {0}" )]
    Parse( #[from] serde_json::Error ),

    #[error( "Invalid value for {field}: {reason}" )]
    Invalid { field: &'static str, reason: String },
}


/// Per-session runtime configuration.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct SessionConfig {
    /// Minimum gap between two display pushes.
    pub push_cooldown_ms: u64,

    /// Wait before the single retry after a rate-limit response.
    pub rate_limit_backoff_ms: u64,

    /// How often a playing session refreshes its progress display.
    pub progress_interval_secs: u64,

    /// Upper bound on a single catalog resolve call.
    pub resolve_timeout_secs: u64,

    /// Upper bound on announcement synthesis.
    pub announcement_timeout_secs: u64,

    /// Failed starts in a row before the queue is dropped.
    pub max_consecutive_failures: u32,

    /// Volume for sessions with no stored preference.
    pub default_volume: f32,

    pub autoplay: AutoplayConfig,

    pub presence: PresenceConfig,
}


impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            push_cooldown_ms: 2_000,
            rate_limit_backoff_ms: 5_000,
            progress_interval_secs: 10,
            resolve_timeout_secs: 20,
            announcement_timeout_secs: 15,
            max_consecutive_failures: 3,
            default_volume: 0.5,
            autoplay: AutoplayConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}


/// Autoplay search, filtering and scoring parameters.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct AutoplayConfig {
    /// Candidates requested from the catalog per exploration.
    pub search_limit: usize,

    /// Upper bound on the catalog search call.
    pub search_timeout_secs: u64,

    /// Candidates must be strictly longer than this.
    pub min_duration_secs: u64,

    /// Candidates must be strictly shorter than this.
    pub max_duration_secs: u64,

    /// Reject candidates more similar than this to a recent title.
    pub similarity_threshold: f64,

    pub similarity: SimilarityKind,

    /// Chance of seeding from an older recent title instead of the latest.
    pub seed_shuffle_probability: f64,

    /// How many of the newest recent titles an alternate seed is drawn from.
    pub seed_pool: usize,

    /// Chance of searching by uploader plus title rather than uploader only.
    pub title_query_probability: f64,

    /// Size of the recent-titles window.
    pub recent_window: usize,

    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub positive_weight: i32,
    pub negative_weight: i32,
    pub uploader_weight: i32,
}


impl Default for AutoplayConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map( |s| s.to_string() ).collect();
        Self {
            search_limit: 10,
            search_timeout_secs: 20,
            min_duration_secs: 90,
            max_duration_secs: 600,
            similarity_threshold: 0.85,
            similarity: SimilarityKind::EditDistance,
            seed_shuffle_probability: 0.2,
            seed_pool: 5,
            title_query_probability: 0.5,
            recent_window: 20,
            positive_keywords: words( &[ "official audio", "lyrics", "lyric video", "음원" ] ),
            negative_keywords: words( &[
                "reaction", "해석", "드라마", "애니", "장면", "코멘터리", "commentary", "live", "cover",
            ] ),
            positive_weight: 2,
            negative_weight: 5,
            uploader_weight: 1,
        }
    }
}


/// Greetings and auto-vacate timing.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct PresenceConfig {
    /// Pause between the bot joining and its own greeting.
    pub bot_greeting_delay_ms: u64,

    /// How long the bot waits alone before leaving.
    pub vacate_grace_ms: u64,

    pub bot_greeting: String,

    /// Greeting for a member; `{name}` is replaced by the display name.
    pub member_greeting: String,

    /// Display names longer than this are cut and marked with "...".
    pub max_name_chars: usize,

    /// Cached announcement clips unused this long are pruned.
    pub clip_max_age_secs: u64,
}


impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            bot_greeting_delay_ms: 1_500,
            vacate_grace_ms: 2_000,
            bot_greeting: "Tunebot has joined.".into(),
            member_greeting: "{name} has joined.".into(),
            max_name_chars: 10,
            clip_max_age_secs: 3 * 24 * 60 * 60,
        }
    }
}


impl PresenceConfig {
    pub fn bot_greeting_delay( &self ) -> Duration {
        Duration::from_millis( self.bot_greeting_delay_ms )
    }


    pub fn vacate_grace( &self ) -> Duration {
        Duration::from_millis( self.vacate_grace_ms )
    }


    pub fn clip_max_age( &self ) -> Duration {
        Duration::from_secs( self.clip_max_age_secs )
    }


    /// Greeting text for a member with `display_name`.
    pub fn member_greeting_for( &self, display_name: &str ) -> String {
        let name = if display_name.chars().count() > self.max_name_chars {
            let cut: String = display_name.chars().take( self.max_name_chars ).collect();
            format!( "{}...", cut )
        } else {
            display_name.to_string()
        };
        self.member_greeting.replace( "{name}", &name )
    }
}


fn probability( field: &'static str, value: f64 ) -> Result<(), ConfigError> {
    if ( 0.0..=1.0 ).contains( &value ) {
        Ok(())
    } else {
        Err( ConfigError::Invalid { field, reason: format!( "{} is not within 0..=1", value ) } )
    }
}


impl SessionConfig {
    /// Returns the default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "tunebot" ).join( "config.json" ) )
    }


    /// Loads and validates a config file.
    pub fn load( path: &Path ) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string( path )?;
        let config: Self = serde_json::from_str( &contents )?;
        config.validate()?;
        Ok( config )
    }


    /// Loads the default config file if it exists, defaults otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some( path ) if path.exists() => Self::load( &path ),
            _ => Ok( Self::default() ),
        }
    }


    /// Checks value ranges that serde cannot express.
    pub fn validate( &self ) -> Result<(), ConfigError> {
        if !( 0.0..=1.0 ).contains( &self.default_volume ) {
            return Err( ConfigError::Invalid {
                field: "default_volume",
                reason: format!( "{} is not within 0..=1", self.default_volume ),
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err( ConfigError::Invalid {
                field: "max_consecutive_failures",
                reason: "must be at least 1".into(),
            });
        }

        if self.progress_interval_secs == 0 {
            return Err( ConfigError::Invalid {
                field: "progress_interval_secs",
                reason: "must be at least 1".into(),
            });
        }

        let autoplay = &self.autoplay;
        if autoplay.min_duration_secs >= autoplay.max_duration_secs {
            return Err( ConfigError::Invalid {
                field: "autoplay.min_duration_secs",
                reason: format!(
                    "{} must be below max_duration_secs ({})",
                    autoplay.min_duration_secs,
                    autoplay.max_duration_secs
                ),
            });
        }
        if autoplay.recent_window == 0 {
            return Err( ConfigError::Invalid {
                field: "autoplay.recent_window",
                reason: "must be at least 1".into(),
            });
        }
        probability( "autoplay.similarity_threshold", autoplay.similarity_threshold )?;
        probability( "autoplay.seed_shuffle_probability", autoplay.seed_shuffle_probability )?;
        probability( "autoplay.title_query_probability", autoplay.title_query_probability )?;

        if self.presence.max_name_chars == 0 {
            return Err( ConfigError::Invalid {
                field: "presence.max_name_chars",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }


    pub fn push_cooldown( &self ) -> Duration {
        Duration::from_millis( self.push_cooldown_ms )
    }


    pub fn rate_limit_backoff( &self ) -> Duration {
        Duration::from_millis( self.rate_limit_backoff_ms )
    }


    pub fn progress_interval( &self ) -> Duration {
        Duration::from_secs( self.progress_interval_secs )
    }


    pub fn resolve_timeout( &self ) -> Duration {
        Duration::from_secs( self.resolve_timeout_secs )
    }


    pub fn announcement_timeout( &self ) -> Duration {
        Duration::from_secs( self.announcement_timeout_secs )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::Write;


    #[test]
    fn test_defaults_are_valid() {
        SessionConfig::default().validate().unwrap();
    }


    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!( file, r#"{{ "push_cooldown_ms": 500, "autoplay": {{ "similarity_threshold": 0.7 }} }}"# ).unwrap();

        let config = SessionConfig::load( file.path() ).unwrap();
        assert_eq!( config.push_cooldown(), Duration::from_millis( 500 ) );
        assert_eq!( config.autoplay.similarity_threshold, 0.7 );
        assert_eq!( config.autoplay.search_limit, 10 );
        assert_eq!( config.max_consecutive_failures, 3 );
    }


    #[test]
    fn test_rejects_inverted_duration_bounds() {
        let mut config = SessionConfig::default();
        config.autoplay.min_duration_secs = 700;
        assert!( matches!( config.validate(), Err( ConfigError::Invalid { .. } ) ) );
    }


    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = SessionConfig::default();
        config.autoplay.similarity_threshold = 85.0;
        assert!( config.validate().is_err() );
    }


    #[test]
    fn test_member_greeting_truncates_long_names() {
        let presence = PresenceConfig::default();
        assert_eq!( presence.member_greeting_for( "Ann" ), "Ann has joined." );
        assert_eq!( presence.member_greeting_for( "Bartholomew the Third" ), "Bartholome... has joined." );
        assert_eq!( presence.member_greeting_for( "김철수김철수김철수김철" ), "김철수김철수김철수김... has joined." );
    }
}
