//! Tunebot Core - Per-session playback orchestration
//!
//! This crate owns what plays in each chat server's voice session: the
//! track queue, the playback loop and its recovery, announcement
//! interruptions, autoplay follow-ups and the rate-limited display sync,
//! plus favorites, greetings and auto-vacate around it.
//! Audio, catalogs, speech and the display itself are collaborator traits.

pub mod autoplay;
pub mod clip_cache;
pub mod config;
pub mod effect;
mod engine;
pub mod external;
pub mod favorites;
mod interrupt;
pub mod presence;
pub mod presentation;
pub mod queue;
pub mod registry;
pub mod session;
pub mod settings;
pub mod signal;
pub mod similarity;
pub mod state;
pub mod track;

pub use autoplay::{ normalize_title, AutoplayExplorer, Candidate, RecentTitles };
pub use clip_cache::CachedAnnouncer;
pub use config::{ AutoplayConfig, ConfigError, PresenceConfig, SessionConfig };
pub use effect::{ Effect, UnknownEffect };
pub use external::{
    ActiveAudio, AnnouncementClip, AnnouncementError, AnnouncementProvider, CompletionKind,
    CompletionSender, DisplaySink, PlaybackCompletion, PlaybackProcess, ProcessStartError, PushError,
    ResolutionError, SearchError, StartRequest, TrackCatalog,
};
pub use favorites::{ Favorite, FavoritesError, FavoritesStore, JsonFavoritesStore, MemoryFavoritesStore };
pub use presence::{ PresenceOutcome, PresencePolicy, VoiceEvent };
pub use presentation::{ PresentationSync, SessionView };
pub use queue::{ LoopMode, QueueError, QueueManager };
pub use registry::SessionRegistry;
pub use session::{ Collaborators, Session, SessionError };
pub use settings::{ GuildSettings, JsonSettingsStore, MemorySettingsStore, SettingsError, SettingsStore };
pub use state::{ PlaybackClock, PlaybackPhase, SessionEvent };
pub use track::{ Requester, Track, TrackInfo };
