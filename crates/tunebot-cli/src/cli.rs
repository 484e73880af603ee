//! Command-line argument parsing for tunebot.

use std::path::PathBuf;

use clap::Parser;


/// Tunebot - drive a playback session from the console.
#[derive( Parser, Debug )]
#[command( name = "tunebot" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Session config file (defaults to the platform config directory).
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Session id to drive.
    #[arg( short, long, default_value = "local" )]
    pub session: String,

    /// JSON file with the simulated catalog's tracks.
    #[arg( long )]
    pub catalog: Option<PathBuf>,

    /// Simulated playback speed; 10 plays a 3 minute track in 18 seconds.
    #[arg( short, long, default_value_t = 1.0 )]
    pub time_scale: f64,

    /// Keep settings in memory instead of the settings file.
    #[arg( long )]
    pub ephemeral: bool,

    /// Print the now-playing panel only on request.
    #[arg( short, long )]
    pub quiet: bool,
}
