//! Voice presence policy
//!
//! Reacts to people coming and going in the bot's voice channel: arrivals
//! are greeted with an announcement, and a session whose channel stays
//! empty of listeners for the grace period is vacated.

use std::collections::HashMap;
use std::sync::{ Arc, Mutex, PoisonError };

use crate::config::PresenceConfig;
use crate::registry::SessionRegistry;
use crate::session::{ Session, SessionError };


/// A change in the bot's voice channel, as reported by the platform.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum VoiceEvent {
    /// The bot connected to a channel.
    BotJoined,
    /// The bot was disconnected.
    BotLeft,
    /// A member entered; `listeners` counts members now present, bot excluded.
    MemberJoined { display_name: String, listeners: usize },
    /// A member left; `listeners` counts members still present.
    MemberLeft { listeners: usize },
}


/// What the policy did about an event.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PresenceOutcome {
    Ignored,
    Greeted,
    Vacated,
    /// Someone came back during the grace period.
    Stayed,
}


pub struct PresencePolicy {
    registry: Arc<SessionRegistry>,
    config: PresenceConfig,
    /// Latest listener count per session.
    listeners: Mutex<HashMap<String, usize>>,
}


impl PresencePolicy {
    pub fn new( registry: Arc<SessionRegistry> ) -> Self {
        let config = registry.config().presence.clone();
        Self { registry, config, listeners: Mutex::new( HashMap::new() ) }
    }


    fn set_listeners( &self, session_id: &str, count: usize ) {
        self.listeners
            .lock()
            .unwrap_or_else( PoisonError::into_inner )
            .insert( session_id.to_string(), count );
    }


    fn listeners( &self, session_id: &str ) -> Option<usize> {
        self.listeners.lock().unwrap_or_else( PoisonError::into_inner ).get( session_id ).copied()
    }


    fn forget( &self, session_id: &str ) {
        self.listeners.lock().unwrap_or_else( PoisonError::into_inner ).remove( session_id );
    }


    /// Applies the policy to one event. Greetings play in the background;
    /// a vacate decision waits out the grace period before returning.
    pub async fn handle( &self, session_id: &str, event: VoiceEvent ) -> PresenceOutcome {
        match event {
            VoiceEvent::BotLeft => {
                self.forget( session_id );
                if self.registry.destroy( session_id ).await {
                    tracing::info!( "[{}] Disconnected, session released", session_id );
                    PresenceOutcome::Vacated
                } else {
                    PresenceOutcome::Ignored
                }
            }
            VoiceEvent::BotJoined => {
                let Some( session ) = self.registry.get( session_id ).await else {
                    return PresenceOutcome::Ignored;
                };
                greet( session, self.config.bot_greeting.clone(), Some( self.config.bot_greeting_delay() ) );
                PresenceOutcome::Greeted
            }
            VoiceEvent::MemberJoined { display_name, listeners } => {
                self.set_listeners( session_id, listeners );
                let Some( session ) = self.registry.get( session_id ).await else {
                    return PresenceOutcome::Ignored;
                };
                greet( session, self.config.member_greeting_for( &display_name ), None );
                PresenceOutcome::Greeted
            }
            VoiceEvent::MemberLeft { listeners } => {
                self.set_listeners( session_id, listeners );
                if listeners > 0 || self.registry.get( session_id ).await.is_none() {
                    return PresenceOutcome::Ignored;
                }

                tokio::time::sleep( self.config.vacate_grace() ).await;
                if self.listeners( session_id ).unwrap_or( 0 ) > 0 {
                    tracing::debug!( "[{}] Listener returned, staying", session_id );
                    return PresenceOutcome::Stayed;
                }
                self.forget( session_id );
                if self.registry.destroy( session_id ).await {
                    tracing::info!( "[{}] Left alone, vacating", session_id );
                    PresenceOutcome::Vacated
                } else {
                    PresenceOutcome::Ignored
                }
            }
        }
    }
}


fn greet( session: Arc<Session>, text: String, delay: Option<std::time::Duration> ) {
    tokio::spawn( async move {
        if let Some( delay ) = delay {
            tokio::time::sleep( delay ).await;
        }
        match session.interrupt_with_announcement( &text ).await {
            Ok(()) => {}
            Err( SessionError::Closed( _ ) ) => {}
            Err( e ) => tracing::warn!( "[{}] Greeting failed: {}", session.id(), e ),
        }
    });
}
