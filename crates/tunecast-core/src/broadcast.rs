//! Listener registry and chunk fan-out
//!
//! Every released chunk goes to every registered listener. Delivery is
//! non-blocking and isolated per listener: a slow or broken listener only
//! loses its own data.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;


/// Why a chunk could not be handed to a listener.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Error )]
pub enum DeliveryError {
    /// The listener is behind; this chunk is dropped for it.
    #[error( "Listener is lagging" )]
    Lagging,

    /// The listener is gone and will be unregistered.
    #[error( "Listener disconnected" )]
    Disconnected,
}


/// A subscriber to the broadcast.
///
/// `send` must not block: it is called from the pacing task.
pub trait Listener: Send + Sync {
    fn send( &self, chunk: &Bytes ) -> Result<(), DeliveryError>;
}


/// Identifies a registered listener.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord )]
pub struct ListenerId( u64 );


impl fmt::Display for ListenerId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "listener#{}", self.0 )
    }
}


/// Listener backed by a bounded channel.
#[derive( Debug, Clone )]
pub struct ChannelListener {
    tx: mpsc::Sender<Bytes>,
}


impl ChannelListener {
    /// Creates a listener queueing at most `capacity` chunks, plus the receiving end.
    pub fn new( capacity: usize ) -> ( Self, mpsc::Receiver<Bytes> ) {
        let ( tx, rx ) = mpsc::channel( capacity.max( 1 ) );
        ( Self { tx }, rx )
    }
}


impl Listener for ChannelListener {
    fn send( &self, chunk: &Bytes ) -> Result<(), DeliveryError> {
        self.tx.try_send( chunk.clone() ).map_err( |e| match e {
            mpsc::error::TrySendError::Full( _ ) => DeliveryError::Lagging,
            mpsc::error::TrySendError::Closed( _ ) => DeliveryError::Disconnected,
        })
    }
}


/// Registry of listeners and the fan-out over them.
#[derive( Default )]
pub struct Broadcaster {
    listeners: RwLock<HashMap<ListenerId, Arc<dyn Listener>>>,
    next_id: AtomicU64,
}


impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }


    /// Adds a listener. It receives chunks released from now on.
    pub fn register( &self, listener: Arc<dyn Listener> ) -> ListenerId {
        let id = ListenerId( self.next_id.fetch_add( 1, Ordering::Relaxed ) );
        let count = {
            let mut listeners = self.listeners.write();
            listeners.insert( id, listener );
            listeners.len()
        };
        tracing::info!( "{} joined ({} listening)", id, count );
        id
    }


    /// Removes a listener. Returns false if it was not registered.
    pub fn unregister( &self, id: ListenerId ) -> bool {
        let ( removed, count ) = {
            let mut listeners = self.listeners.write();
            let removed = listeners.remove( &id ).is_some();
            ( removed, listeners.len() )
        };
        if removed {
            tracing::info!( "{} left ({} listening)", id, count );
        }
        removed
    }


    /// Delivers `chunk` to every listener. Returns how many accepted it.
    pub fn on_chunk( &self, chunk: &Bytes ) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        {
            let listeners = self.listeners.read();
            for ( id, listener ) in listeners.iter() {
                match listener.send( chunk ) {
                    Ok(()) => delivered += 1,
                    Err( DeliveryError::Lagging ) => {
                        tracing::debug!( "{} lagging, dropped {} bytes", id, chunk.len() );
                    }
                    Err( DeliveryError::Disconnected ) => gone.push( *id ),
                }
            }
        }

        for id in gone {
            self.unregister( id );
        }

        delivered
    }


    /// Number of registered listeners.
    pub fn listener_count( &self ) -> usize {
        self.listeners.read().len()
    }
}


impl fmt::Debug for Broadcaster {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_struct( "Broadcaster" )
            .field( "listeners", &self.listener_count() )
            .finish()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    struct Broken;


    impl Listener for Broken {
        fn send( &self, _chunk: &Bytes ) -> Result<(), DeliveryError> {
            Err( DeliveryError::Lagging )
        }
    }


    fn chunk( byte: u8 ) -> Bytes {
        Bytes::from( vec![ byte; 4 ] )
    }


    #[test]
    fn test_late_listener_gets_only_new_chunks() {
        let broadcaster = Broadcaster::new();
        let ( early, mut early_rx ) = ChannelListener::new( 8 );
        broadcaster.register( Arc::new( early ) );

        broadcaster.on_chunk( &chunk( 1 ) );

        let ( late, mut late_rx ) = ChannelListener::new( 8 );
        broadcaster.register( Arc::new( late ) );
        broadcaster.on_chunk( &chunk( 2 ) );

        assert_eq!( early_rx.try_recv().unwrap(), chunk( 1 ) );
        assert_eq!( early_rx.try_recv().unwrap(), chunk( 2 ) );
        assert_eq!( late_rx.try_recv().unwrap(), chunk( 2 ) );
        assert!( late_rx.try_recv().is_err() );
    }


    #[test]
    fn test_failing_listener_isolated() {
        let broadcaster = Broadcaster::new();
        broadcaster.register( Arc::new( Broken ) );
        let ( good, mut good_rx ) = ChannelListener::new( 8 );
        broadcaster.register( Arc::new( good ) );

        assert_eq!( broadcaster.on_chunk( &chunk( 1 ) ), 1 );
        assert_eq!( broadcaster.on_chunk( &chunk( 2 ) ), 1 );
        assert_eq!( good_rx.try_recv().unwrap(), chunk( 1 ) );
        assert_eq!( good_rx.try_recv().unwrap(), chunk( 2 ) );
        assert_eq!( broadcaster.listener_count(), 2 );
    }


    #[test]
    fn test_lagging_listener_drops_only_its_chunks() {
        let broadcaster = Broadcaster::new();
        let ( slow, mut slow_rx ) = ChannelListener::new( 1 );
        let ( fast, mut fast_rx ) = ChannelListener::new( 8 );
        broadcaster.register( Arc::new( slow ) );
        broadcaster.register( Arc::new( fast ) );

        for i in 0..3 {
            broadcaster.on_chunk( &chunk( i ) );
        }

        assert_eq!( slow_rx.try_recv().unwrap(), chunk( 0 ) );
        assert!( slow_rx.try_recv().is_err() );
        for i in 0..3 {
            assert_eq!( fast_rx.try_recv().unwrap(), chunk( i ) );
        }
    }


    #[test]
    fn test_disconnected_listener_unregistered() {
        let broadcaster = Broadcaster::new();
        let ( listener, rx ) = ChannelListener::new( 4 );
        broadcaster.register( Arc::new( listener ) );
        drop( rx );

        assert_eq!( broadcaster.on_chunk( &chunk( 1 ) ), 0 );
        assert_eq!( broadcaster.listener_count(), 0 );
    }


    #[test]
    fn test_unregister() {
        let broadcaster = Broadcaster::new();
        let ( listener, mut rx ) = ChannelListener::new( 4 );
        let id = broadcaster.register( Arc::new( listener ) );

        assert!( broadcaster.unregister( id ) );
        assert!( !broadcaster.unregister( id ) );
        broadcaster.on_chunk( &chunk( 1 ) );
        assert!( rx.try_recv().is_err() );
    }
}
