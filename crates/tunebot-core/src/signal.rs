//! Edge-triggered advance signal
//!
//! At most one wake is stored: signalling several times before the loop
//! waits collapses into a single wake, and the loop re-reads state instead
//! of replaying events.

use tokio::sync::Notify;


#[derive( Debug, Default )]
pub struct AdvanceSignal {
    notify: Notify,
}


impl AdvanceSignal {
    pub fn new() -> Self {
        Self::default()
    }


    /// Requests that the loop re-evaluate what should play.
    pub fn signal( &self ) {
        self.notify.notify_one();
    }


    /// Waits for the next signal, consuming a stored one immediately.
    pub async fn wait( &self ) {
        self.notify.notified().await;
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::time::Duration;


    #[tokio::test]
    async fn test_repeated_signals_collapse() {
        let signal = AdvanceSignal::new();
        signal.signal();
        signal.signal();
        signal.signal();

        signal.wait().await;
        let second = tokio::time::timeout( Duration::from_millis( 20 ), signal.wait() ).await;
        assert!( second.is_err(), "only one wake should be stored" );
    }
}
