//! Real-time pacing of track bytes
//!
//! A pacer reads a track's source and releases it to the broadcast no
//! faster than playback speed. Release goes through an [`EmissionGate`]
//! so a pacer that has been superseded can never put another chunk on air.
//! End of data is only reported once the released bytes have played out,
//! so the next track cannot start early.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{ mpsc, oneshot };
use tokio::task::JoinHandle;
use tokio::time::{ self, Instant };

use crate::broadcast::Broadcaster;
use crate::source::SharedSource;


/// Pacing parameters shared by every pacer a controller starts.
#[derive( Debug, Clone, Copy, Default, PartialEq, Eq )]
pub struct PacerConfig {
    /// Fixed chunk size in bytes. `None` uses a tenth of a second of audio.
    pub chunk_size: Option<usize>,
}


impl PacerConfig {
    /// Chunk size for a track streamed at `byte_rate`.
    pub fn chunk_size_for( &self, byte_rate: u64 ) -> usize {
        match self.chunk_size {
            Some( size ) => size.max( 1 ),
            None => ( byte_rate / 10 ).max( 1 ) as usize,
        }
    }
}


/// Terminal outcome of a pacer.
#[derive( Debug )]
pub enum PacerEvent {
    /// The source is exhausted.
    End,
    /// Reading the source failed.
    Failed( io::Error ),
}


/// A pacer event tagged with the generation of the pacer that raised it.
#[derive( Debug )]
pub struct PacerSignal {
    pub generation: u64,
    pub event: PacerEvent,
}


/// Only the live generation may release chunks.
///
/// The controller moves the generation on before stopping a pacer, which
/// both silences it and marks its pending end/error as stale.
#[derive( Debug )]
pub struct EmissionGate {
    live: Mutex<u64>,
    broadcaster: Arc<Broadcaster>,
}


impl EmissionGate {
    pub fn new( broadcaster: Arc<Broadcaster> ) -> Self {
        Self {
            live: Mutex::new( 0 ),
            broadcaster,
        }
    }


    /// The generation currently allowed to release.
    pub fn generation( &self ) -> u64 {
        *self.live.lock()
    }


    /// Invalidates the live generation and returns the new one.
    pub fn advance( &self ) -> u64 {
        let mut live = self.live.lock();
        *live += 1;
        *live
    }


    /// Broadcasts `chunk` if `generation` is still live.
    pub fn emit( &self, generation: u64, chunk: &Bytes ) -> bool {
        let live = self.live.lock();
        if *live != generation {
            return false;
        }
        self.broadcaster.on_chunk( chunk );
        true
    }


    pub fn broadcaster( &self ) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}


/// One pass over a source at a fixed byte rate.
pub struct Pacer {
    source: SharedSource,
    byte_rate: u64,
    chunk_size: usize,
    generation: u64,
    gate: Arc<EmissionGate>,
    events: mpsc::UnboundedSender<PacerSignal>,
}


impl Pacer {
    /// Prepares a pacer.
    ///
    /// @param source - Source to read; a pushed-back chunk is released first
    /// @param byte_rate - Playback speed in bytes per second
    /// @param generation - Gate generation this pacer releases under
    pub fn new(
        source: SharedSource,
        byte_rate: u64,
        config: PacerConfig,
        generation: u64,
        gate: Arc<EmissionGate>,
        events: mpsc::UnboundedSender<PacerSignal>,
    ) -> Self {
        let byte_rate = byte_rate.max( 1 );
        Self {
            source,
            byte_rate,
            chunk_size: config.chunk_size_for( byte_rate ),
            generation,
            gate,
            events,
        }
    }


    /// Starts releasing on a new task.
    pub fn spawn( self ) -> PacerHandle {
        let ( stop_tx, stop_rx ) = oneshot::channel();
        let generation = self.generation;

        tracing::debug!(
            "Pacer {} starting: {} B/s in {} byte chunks",
            generation,
            self.byte_rate,
            self.chunk_size
        );

        let task = tokio::spawn( self.run( stop_rx ) );

        PacerHandle {
            generation,
            stop: Some( stop_tx ),
            task,
        }
    }


    /// When the chunk after `released` bytes is due.
    fn due( &self, started: Instant, released: u64 ) -> Instant {
        let nanos = released as u128 * 1_000_000_000 / self.byte_rate as u128;
        started + Duration::from_nanos( nanos as u64 )
    }


    async fn run( self, mut stop: oneshot::Receiver<()> ) {
        // A resumed pass may not release before the last pass has played out.
        let started = match self.source.lock().await.take_played_until() {
            Some( at ) => at.max( Instant::now() ),
            None => Instant::now(),
        };
        let mut released: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut stop => return self.park( None, self.due( started, released ) ).await,
                next = async { self.source.lock().await.next_chunk( self.chunk_size ).await } => next,
            };

            let chunk = match next {
                Ok( Some( chunk ) ) => chunk,
                Ok( None ) => return self.play_out( &mut stop, started, released, PacerEvent::End ).await,
                Err( e ) => return self.play_out( &mut stop, started, released, PacerEvent::Failed( e ) ).await,
            };

            let due = self.due( started, released );
            tokio::select! {
                biased;
                _ = &mut stop => return self.park( Some( chunk ), due ).await,
                _ = time::sleep_until( due ) => {}
            }

            if !self.gate.emit( self.generation, &chunk ) {
                return self.park( Some( chunk ), due ).await;
            }
            released += chunk.len() as u64;
        }
    }


    /// Raises `event` once everything released has had time to play.
    async fn play_out(
        &self,
        stop: &mut oneshot::Receiver<()>,
        started: Instant,
        released: u64,
        event: PacerEvent,
    ) {
        let until = self.due( started, released );
        tokio::select! {
            biased;
            _ = stop => self.park( None, until ).await,
            _ = time::sleep_until( until ) => self.finish( event ),
        }
    }


    /// Leaves the source ready for a later pass.
    async fn park( &self, unreleased: Option<Bytes>, played_until: Instant ) {
        let mut source = self.source.lock().await;
        if let Some( chunk ) = unreleased {
            source.unread( chunk );
        }
        source.set_played_until( played_until );
    }


    fn finish( &self, event: PacerEvent ) {
        tracing::debug!( "Pacer {} finished: {:?}", self.generation, event );
        // The owner may already be gone during shutdown.
        let _ = self.events.send( PacerSignal {
            generation: self.generation,
            event,
        });
    }
}


/// Owner's handle on a running pacer.
#[derive( Debug )]
pub struct PacerHandle {
    generation: u64,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}


impl PacerHandle {
    pub fn generation( &self ) -> u64 {
        self.generation
    }


    /// Signals the pacer to stop and waits until its task has exited.
    ///
    /// Invalidate the generation on the gate first if no further chunk may
    /// be released.
    pub async fn stop( mut self ) {
        if let Some( stop ) = self.stop.take() {
            let _ = stop.send( () );
        }
        if let Err( e ) = ( &mut self.task ).await {
            tracing::warn!( "Pacer {} task failed: {}", self.generation, e );
        }
    }
}


impl Drop for PacerHandle {
    fn drop( &mut self ) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{ Context, Poll };

    use tokio::io::{ AsyncRead, ReadBuf };

    use crate::broadcast::ChannelListener;
    use crate::source;


    struct FailingReader;


    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready( Err( io::Error::new( io::ErrorKind::InvalidData, "corrupt" ) ) )
        }
    }


    struct Rig {
        gate: Arc<EmissionGate>,
        chunks: mpsc::Receiver<Bytes>,
        events_tx: mpsc::UnboundedSender<PacerSignal>,
        events: mpsc::UnboundedReceiver<PacerSignal>,
    }


    fn rig() -> Rig {
        let broadcaster = Arc::new( Broadcaster::new() );
        let ( listener, chunks ) = ChannelListener::new( 256 );
        broadcaster.register( Arc::new( listener ) );
        let ( events_tx, events ) = mpsc::unbounded_channel();
        Rig {
            gate: Arc::new( EmissionGate::new( broadcaster ) ),
            chunks,
            events_tx,
            events,
        }
    }


    fn drain( rx: &mut mpsc::Receiver<Bytes> ) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok( chunk ) = rx.try_recv() {
            out.push( chunk );
        }
        out
    }


    const FIXED: PacerConfig = PacerConfig { chunk_size: Some( 100 ) };


    #[test]
    fn test_default_chunk_size() {
        let config = PacerConfig::default();
        assert_eq!( config.chunk_size_for( 16_000 ), 1_600 );
        assert_eq!( config.chunk_size_for( 5 ), 1 );
        assert_eq!( FIXED.chunk_size_for( 16_000 ), 100 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_releases_at_byte_rate() {
        let mut rig = rig();
        let start = Instant::now();
        let data: Vec<u8> = ( 0..1000u32 ).map( |i| i as u8 ).collect();
        let src = source::shared( Box::new( Cursor::new( data.clone() ) ) );

        let live = rig.gate.generation();
        let _handle = Pacer::new( src, 1000, FIXED, live, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();

        time::sleep( Duration::from_millis( 450 ) ).await;
        assert_eq!( drain( &mut rig.chunks ).len(), 5 );

        time::sleep( Duration::from_millis( 500 ) ).await;
        let rest = drain( &mut rig.chunks );
        assert_eq!( rest.len(), 5 );
        assert_eq!( rest.last().unwrap()[ .. ], data[ 900.. ] );

        // The last chunk still has to play before the end is raised.
        assert!( rig.events.try_recv().is_err() );
        let signal = rig.events.recv().await.unwrap();
        assert_eq!( signal.generation, live );
        assert!( matches!( signal.event, PacerEvent::End ) );
        assert!( start.elapsed() >= Duration::from_millis( 1000 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_short_source_takes_its_play_time() {
        let mut rig = rig();
        let start = Instant::now();
        let src = source::shared( Box::new( Cursor::new( vec![ 5u8; 40 ] ) ) );

        let live = rig.gate.generation();
        let _handle = Pacer::new( src, 1000, FIXED, live, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();

        let signal = rig.events.recv().await.unwrap();
        assert!( matches!( signal.event, PacerEvent::End ) );
        assert!( start.elapsed() >= Duration::from_millis( 40 ) );
        assert_eq!( drain( &mut rig.chunks ).len(), 1 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_stop_pushes_back_unreleased_chunk() {
        let mut rig = rig();
        let src = source::shared( Box::new( Cursor::new( vec![ 1u8; 1000 ] ) ) );

        let live = rig.gate.generation();
        let handle = Pacer::new( Arc::clone( &src ), 1000, FIXED, live, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();

        time::sleep( Duration::from_millis( 250 ) ).await;
        rig.gate.advance();
        handle.stop().await;

        assert_eq!( drain( &mut rig.chunks ).len(), 3 );
        assert_eq!( src.lock().await.offset(), 300 );
        assert!( rig.events.try_recv().is_err() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_restart_waits_for_released_bytes_to_play() {
        let mut rig = rig();
        let src = source::shared( Box::new( Cursor::new( vec![ 1u8; 1000 ] ) ) );

        let live = rig.gate.generation();
        let handle = Pacer::new( Arc::clone( &src ), 1000, FIXED, live, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();

        time::sleep( Duration::from_millis( 250 ) ).await;
        let live = rig.gate.advance();
        handle.stop().await;
        assert_eq!( drain( &mut rig.chunks ).len(), 3 );

        // Chunk 2 went out at 200 ms and plays until 300 ms.
        let _handle = Pacer::new( Arc::clone( &src ), 1000, FIXED, live, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();
        time::sleep( Duration::from_millis( 40 ) ).await;
        assert!( drain( &mut rig.chunks ).is_empty() );

        time::sleep( Duration::from_millis( 20 ) ).await;
        let resumed = drain( &mut rig.chunks );
        assert_eq!( resumed.len(), 1 );
        assert_eq!( resumed[ 0 ].len(), 100 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_stale_generation_releases_nothing() {
        let mut rig = rig();
        let src = source::shared( Box::new( Cursor::new( vec![ 1u8; 1000 ] ) ) );

        let stale = rig.gate.generation();
        rig.gate.advance();
        let handle = Pacer::new( Arc::clone( &src ), 1000, FIXED, stale, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();

        time::sleep( Duration::from_millis( 500 ) ).await;
        handle.stop().await;

        assert!( drain( &mut rig.chunks ).is_empty() );
        assert_eq!( src.lock().await.offset(), 0 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_read_error_raised() {
        let mut rig = rig();
        let src = source::shared( Box::new( FailingReader ) );

        let live = rig.gate.generation();
        let _handle = Pacer::new( src, 1000, FIXED, live, Arc::clone( &rig.gate ), rig.events_tx.clone() ).spawn();

        let signal = rig.events.recv().await.unwrap();
        assert_eq!( signal.generation, live );
        assert!( matches!( signal.event, PacerEvent::Failed( ref e ) if e.kind() == io::ErrorKind::InvalidData ) );
        assert!( drain( &mut rig.chunks ).is_empty() );
    }
}
