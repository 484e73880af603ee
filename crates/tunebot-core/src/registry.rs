//! Session registry
//!
//! Owns every live session, keyed by chat-server id.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::session::{ Collaborators, Session };


pub struct SessionRegistry {
    config: SessionConfig,
    collaborators: Collaborators,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}


impl SessionRegistry {
    pub fn new( config: SessionConfig, collaborators: Collaborators ) -> Self {
        Self { config, collaborators, sessions: Mutex::new( HashMap::new() ) }
    }


    pub fn config( &self ) -> &SessionConfig {
        &self.config
    }


    /// Returns the session for `id`, starting one on first use.
    ///
    /// The session is started outside the registry lock, so creating one
    /// session never waits on another's settings load. When two callers race
    /// on the same id the first insert wins and the other session is shut
    /// down again.
    pub async fn get_or_create( &self, id: &str ) -> Arc<Session> {
        if let Some( session ) = self.sessions.lock().await.get( id ) {
            return Arc::clone( session );
        }

        let started = Session::start( id, self.config.clone(), self.collaborators.clone() ).await;
        let existing = {
            let mut sessions = self.sessions.lock().await;
            match sessions.entry( id.to_string() ) {
                Entry::Occupied( entry ) => Some( Arc::clone( entry.get() ) ),
                Entry::Vacant( entry ) => {
                    entry.insert( Arc::clone( &started ) );
                    None
                }
            }
        };

        match existing {
            Some( existing ) => {
                tracing::debug!( "[{}] Lost a creation race, discarding the duplicate session", id );
                started.shutdown().await;
                existing
            }
            None => started,
        }
    }


    pub async fn get( &self, id: &str ) -> Option<Arc<Session>> {
        self.sessions.lock().await.get( id ).cloned()
    }


    /// Removes and shuts down a session. Returns false if none existed.
    pub async fn destroy( &self, id: &str ) -> bool {
        let removed = self.sessions.lock().await.remove( id );
        match removed {
            Some( session ) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }


    /// Shuts down every session.
    pub async fn shutdown_all( &self ) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().map( |( _, s )| s ).collect();
        for session in sessions {
            session.shutdown().await;
        }
    }


    pub async fn len( &self ) -> usize {
        self.sessions.lock().await.len()
    }


    pub async fn is_empty( &self ) -> bool {
        self.sessions.lock().await.is_empty()
    }


    /// Ids of live sessions, sorted.
    pub async fn ids( &self ) -> Vec<String> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
