//! Broadcast playback controller
//!
//! The controller owns the playlist and the single playback session. It
//! picks the current track, starts and stops pacers, and advances to the
//! next track when the current one ends or fails. All transitions run
//! under one lock so commands and pacer events are applied in order.

use std::fmt;
use std::sync::{ Arc, Weak };

use tokio::sync::{ broadcast, mpsc, Mutex };

use crate::broadcast::Broadcaster;
use crate::pacer::{ EmissionGate, Pacer, PacerConfig, PacerEvent, PacerHandle, PacerSignal };
use crate::playlist::{ Playlist, PlaylistError, Track };
use crate::source::{ self, SharedSource, SourceOpener };


/// Capacity of the playback event channel.
const EVENT_CAPACITY: usize = 64;


/// Current playback state.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}


impl fmt::Display for PlaybackState {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        })
    }
}


/// Events emitted by the controller for observers.
#[derive( Debug, Clone )]
pub enum PlaybackEvent {
    TrackChanged { track: Track },
    StateChanged { state: PlaybackState },
    TrackFailed { track: Track, message: String },
}


/// Point-in-time view of the controller.
#[derive( Debug, Clone )]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub track: Option<Track>,
    /// Bytes of the current track released so far.
    pub position: u64,
    pub listeners: usize,
    pub tracks: usize,
}


enum Session {
    Idle,
    Loaded {
        track: Track,
        source: SharedSource,
        /// Present while playing.
        pacer: Option<PacerHandle>,
    },
}


struct Core {
    playlist: Playlist,
    session: Session,
    /// Consecutive tracks that finished without releasing a byte.
    silent_tracks: usize,
}


impl Core {
    fn state( &self ) -> PlaybackState {
        match &self.session {
            Session::Idle => PlaybackState::Idle,
            Session::Loaded { pacer: Some( _ ), .. } => PlaybackState::Playing,
            Session::Loaded { pacer: None, .. } => PlaybackState::Paused,
        }
    }


    fn track( &self ) -> Option<&Track> {
        match &self.session {
            Session::Idle => None,
            Session::Loaded { track, .. } => Some( track ),
        }
    }
}


struct Shared {
    core: Mutex<Core>,
    opener: Arc<dyn SourceOpener>,
    gate: Arc<EmissionGate>,
    config: PacerConfig,
    signals: mpsc::UnboundedSender<PacerSignal>,
    events: broadcast::Sender<PlaybackEvent>,
}


/// Shared radio-style playback queue.
///
/// Cloning yields another handle to the same queue.
#[derive( Clone )]
pub struct PlaybackController {
    shared: Arc<Shared>,
}


impl PlaybackController {
    /// Creates an idle controller. Must be called inside a Tokio runtime.
    pub fn new(
        playlist: Playlist,
        opener: Arc<dyn SourceOpener>,
        broadcaster: Arc<Broadcaster>,
        config: PacerConfig,
    ) -> Self {
        let ( signals, signal_rx ) = mpsc::unbounded_channel();
        let ( events, _ ) = broadcast::channel( EVENT_CAPACITY );

        let shared = Arc::new( Shared {
            core: Mutex::new( Core {
                playlist,
                session: Session::Idle,
                silent_tracks: 0,
            }),
            opener,
            gate: Arc::new( EmissionGate::new( broadcaster ) ),
            config,
            signals,
            events,
        });

        tokio::spawn( Self::pump( Arc::downgrade( &shared ), signal_rx ) );

        Self { shared }
    }


    /// Feeds pacer end/error signals into the state machine.
    async fn pump( shared: Weak<Shared>, mut signals: mpsc::UnboundedReceiver<PacerSignal> ) {
        while let Some( signal ) = signals.recv().await {
            let Some( shared ) = shared.upgrade() else { break };
            shared.on_signal( signal ).await;
        }
        tracing::debug!( "Controller event pump exiting" );
    }


    /// Starts playback, or resumes it if a track is already loaded.
    pub async fn play( &self ) -> PlaybackState {
        self.shared.play().await
    }


    /// Skips to the next track in the playlist.
    pub async fn play_next( &self ) -> PlaybackState {
        self.shared.play_next().await
    }


    /// Pauses playback. No-op unless playing.
    pub async fn pause( &self ) -> PlaybackState {
        let mut core = self.shared.core.lock().await;
        self.shared.pause_locked( &mut core ).await;
        core.state()
    }


    /// Resumes a paused track where it left off. No-op unless paused.
    pub async fn resume( &self ) -> PlaybackState {
        let mut core = self.shared.core.lock().await;
        self.shared.resume_locked( &mut core );
        core.state()
    }


    /// Stops playback and unloads the current track.
    pub async fn stop( &self ) -> PlaybackState {
        let mut core = self.shared.core.lock().await;
        let before = core.state();
        self.shared.teardown( &mut core ).await;
        self.shared.announce( before, core.state() );
        core.state()
    }


    /// Replaces the playlist. The current track keeps playing.
    pub async fn load( &self, tracks: Vec<Track> ) -> Result<(), PlaylistError> {
        let mut core = self.shared.core.lock().await;
        core.playlist.load( tracks )
    }


    pub async fn state( &self ) -> PlaybackState {
        self.shared.core.lock().await.state()
    }


    pub async fn current_track( &self ) -> Option<Track> {
        self.shared.core.lock().await.track().cloned()
    }


    pub async fn status( &self ) -> PlaybackStatus {
        let core = self.shared.core.lock().await;
        let position = match &core.session {
            Session::Loaded { source, .. } => source.lock().await.offset(),
            Session::Idle => 0,
        };

        PlaybackStatus {
            state: core.state(),
            track: core.track().cloned(),
            position,
            listeners: self.shared.gate.broadcaster().listener_count(),
            tracks: core.playlist.len(),
        }
    }


    /// Subscribes to playback events.
    pub fn subscribe( &self ) -> broadcast::Receiver<PlaybackEvent> {
        self.shared.events.subscribe()
    }


    /// The broadcaster chunks are released to.
    pub fn broadcaster( &self ) -> &Arc<Broadcaster> {
        self.shared.gate.broadcaster()
    }
}


impl Shared {
    async fn play( &self ) -> PlaybackState {
        let mut core = self.core.lock().await;
        if matches!( core.session, Session::Idle ) {
            core.silent_tracks = 0;
            self.advance( &mut core ).await;
        } else {
            self.resume_locked( &mut core );
        }
        core.state()
    }


    async fn play_next( &self ) -> PlaybackState {
        let mut core = self.core.lock().await;
        core.silent_tracks = 0;
        self.advance( &mut core ).await;
        core.state()
    }


    async fn pause_locked( &self, core: &mut Core ) {
        let Session::Loaded { track, pacer, .. } = &mut core.session else { return };
        let Some( handle ) = pacer.take() else { return };

        // Silence the pacer and mark its end-of-stream stale before stopping it.
        self.gate.advance();
        handle.stop().await;

        tracing::info!( "Paused {}", track.name() );
        self.publish( PlaybackEvent::StateChanged { state: PlaybackState::Paused } );
    }


    fn resume_locked( &self, core: &mut Core ) {
        let Session::Loaded { track, source, pacer } = &mut core.session else { return };
        if pacer.is_some() {
            return;
        }

        *pacer = Some( self.start_pacer( track, source ) );

        tracing::info!( "Resumed {}", track.name() );
        self.publish( PlaybackEvent::StateChanged { state: PlaybackState::Playing } );
    }


    fn start_pacer( &self, track: &Track, source: &SharedSource ) -> PacerHandle {
        let generation = self.gate.advance();
        Pacer::new(
            Arc::clone( source ),
            track.byte_rate(),
            self.config,
            generation,
            Arc::clone( &self.gate ),
            self.signals.clone(),
        ).spawn()
    }


    /// Unloads the session, stopping its pacer first.
    async fn teardown( &self, core: &mut Core ) {
        let previous = std::mem::replace( &mut core.session, Session::Idle );
        self.gate.advance();

        if let Session::Loaded { pacer: Some( handle ), .. } = previous {
            handle.stop().await;
        }
    }


    /// Moves on to the next playable track, or goes idle.
    ///
    /// A track whose source cannot be opened is skipped; after a full lap of
    /// failures the controller gives up and idles.
    async fn advance( &self, core: &mut Core ) {
        let before = core.state();
        self.teardown( core ).await;

        for _ in 0..core.playlist.len() {
            let track = match core.playlist.next() {
                Ok( track ) => track,
                Err( _ ) => break,
            };

            match self.opener.open( track.path() ) {
                Ok( reader ) => {
                    let source = source::shared( reader );
                    let pacer = self.start_pacer( &track, &source );

                    tracing::info!( "Playing {} at {} B/s", track.name(), track.byte_rate() );
                    core.session = Session::Loaded {
                        track: track.clone(),
                        source,
                        pacer: Some( pacer ),
                    };

                    self.publish( PlaybackEvent::TrackChanged { track } );
                    self.announce( before, PlaybackState::Playing );
                    return;
                }
                Err( e ) => {
                    tracing::warn!( "Skipping {}: {}", track.name(), e );
                    self.publish( PlaybackEvent::TrackFailed {
                        track,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!( "No tracks available, idling" );
        self.announce( before, PlaybackState::Idle );
    }


    /// Applies a pacer's end or error, ignoring signals from superseded pacers.
    ///
    /// After a full lap of tracks that end or fail without releasing any
    /// bytes the controller idles instead of cycling through them forever.
    async fn on_signal( &self, signal: PacerSignal ) {
        let mut core = self.core.lock().await;

        let Session::Loaded { track, source, pacer: Some( handle ) } = &core.session else {
            tracing::debug!( "Ignoring signal from pacer {} while not playing", signal.generation );
            return;
        };
        if handle.generation() != signal.generation {
            tracing::debug!( "Ignoring signal from stale pacer {}", signal.generation );
            return;
        }

        match signal.event {
            PacerEvent::End => tracing::info!( "Finished {}", track.name() ),
            PacerEvent::Failed( e ) => {
                tracing::warn!( "Stream error on {}: {}", track.name(), e );
                self.publish( PlaybackEvent::TrackFailed {
                    track: track.clone(),
                    message: e.to_string(),
                });
            }
        }

        let silent = source.lock().await.offset() == 0;
        if silent {
            core.silent_tracks += 1;
        } else {
            core.silent_tracks = 0;
        }

        if core.silent_tracks >= core.playlist.len() {
            tracing::warn!( "No track released any audio in a full lap, idling" );
            core.silent_tracks = 0;
            self.teardown( &mut core ).await;
            self.announce( PlaybackState::Playing, PlaybackState::Idle );
            return;
        }

        self.advance( &mut core ).await;
    }


    fn announce( &self, before: PlaybackState, after: PlaybackState ) {
        if before != after {
            self.publish( PlaybackEvent::StateChanged { state: after } );
        }
    }


    fn publish( &self, event: PlaybackEvent ) {
        // No subscribers is fine.
        let _ = self.events.send( event );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{ self, Cursor };
    use std::path::{ Path, PathBuf };
    use std::pin::Pin;
    use std::task::{ Context, Poll };
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{ AsyncRead, ReadBuf };
    use tokio::task::JoinSet;
    use tokio::time;

    use crate::broadcast::ChannelListener;
    use crate::source::ByteSource;


    enum Entry {
        Data( Vec<u8> ),
        Corrupt,
        Missing,
    }


    #[derive( Default )]
    struct MemoryOpener {
        files: HashMap<PathBuf, Entry>,
    }


    impl MemoryOpener {
        fn with( mut self, name: &str, entry: Entry ) -> Self {
            self.files.insert( PathBuf::from( name ), entry );
            self
        }
    }


    impl SourceOpener for MemoryOpener {
        fn open( &self, path: &Path ) -> io::Result<Box<dyn ByteSource>> {
            match self.files.get( path ) {
                Some( Entry::Data( data ) ) => Ok( Box::new( Cursor::new( data.clone() ) ) ),
                Some( Entry::Corrupt ) => Ok( Box::new( CorruptReader ) ),
                Some( Entry::Missing ) | None => Err( io::Error::new( io::ErrorKind::NotFound, "missing" ) ),
            }
        }
    }


    struct CorruptReader;


    impl AsyncRead for CorruptReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready( Err( io::Error::new( io::ErrorKind::InvalidData, "bad frame" ) ) )
        }
    }


    struct Rig {
        controller: PlaybackController,
        chunks: mpsc::Receiver<Bytes>,
        events: broadcast::Receiver<PlaybackEvent>,
    }


    /// Builds a controller over `tracks` (name, byte rate) with 1/10 s chunks.
    fn rig( tracks: &[( &str, u64 )], opener: MemoryOpener ) -> Rig {
        let playlist = Playlist::with_tracks(
            tracks.iter().map( |( name, rate )| Track::new( *name, *rate ) ).collect()
        );
        let broadcaster = Arc::new( Broadcaster::new() );
        let ( listener, chunks ) = ChannelListener::new( 1024 );
        broadcaster.register( Arc::new( listener ) );

        let controller = PlaybackController::new(
            playlist,
            Arc::new( opener ),
            broadcaster,
            PacerConfig::default(),
        );
        let events = controller.subscribe();

        Rig { controller, chunks, events }
    }


    fn drain( rx: &mut mpsc::Receiver<Bytes> ) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok( chunk ) = rx.try_recv() {
            out.push( chunk );
        }
        out
    }


    async fn next_track_change( events: &mut broadcast::Receiver<PlaybackEvent> ) -> Track {
        let wait = async {
            loop {
                if let PlaybackEvent::TrackChanged { track } = events.recv().await.unwrap() {
                    return track;
                }
            }
        };
        time::timeout( Duration::from_secs( 60 ), wait ).await.unwrap()
    }


    async fn cursor( controller: &PlaybackController ) -> usize {
        controller.shared.core.lock().await.playlist.cursor()
    }


    #[tokio::test( start_paused = true )]
    async fn test_play_on_empty_playlist_stays_idle() {
        let mut rig = rig( &[], MemoryOpener::default() );

        assert_eq!( rig.controller.play().await, PlaybackState::Idle );
        assert_eq!( rig.controller.pause().await, PlaybackState::Idle );
        assert_eq!( rig.controller.resume().await, PlaybackState::Idle );
        assert!( rig.controller.current_track().await.is_none() );
        assert!( rig.events.try_recv().is_err() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_end_to_end_scenario() {
        // A at the default rate, B probed at 320 kbit/s, C unparseable so default.
        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( vec![ b'a'; 4_800 ] ) )
            .with( "B", Entry::Data( vec![ b'b'; 8_000 ] ) )
            .with( "C", Entry::Data( vec![ b'c'; 1_600 ] ) );
        let mut rig = rig( &[ ( "A", 16_000 ), ( "B", 40_000 ), ( "C", 16_000 ) ], opener );

        assert_eq!( rig.controller.play().await, PlaybackState::Playing );
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "A" ) );

        time::sleep( Duration::from_millis( 50 ) ).await;
        assert_eq!( rig.controller.pause().await, PlaybackState::Paused );
        let before_pause = drain( &mut rig.chunks );
        assert_eq!( before_pause.len(), 1 );

        time::sleep( Duration::from_secs( 10 ) ).await;
        assert!( drain( &mut rig.chunks ).is_empty() );
        assert_eq!( rig.controller.state().await, PlaybackState::Paused );

        assert_eq!( rig.controller.resume().await, PlaybackState::Playing );
        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "A" ) );
        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "B" ) );
        assert_eq!( rig.controller.state().await, PlaybackState::Playing );

        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "C" ) );
        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "A" ) );
        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "B" ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_pause_then_resume_continues_stream() {
        let data: Vec<u8> = ( 0..4_800u32 ).map( |i| ( i % 251 ) as u8 ).collect();
        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( data.clone() ) )
            .with( "B", Entry::Data( vec![ 0; 16_000 ] ) );
        let mut rig = rig( &[ ( "A", 16_000 ), ( "B", 16_000 ) ], opener );

        rig.controller.play().await;
        time::sleep( Duration::from_millis( 150 ) ).await;
        rig.controller.pause().await;
        let mut received = drain( &mut rig.chunks );
        assert_eq!( received.len(), 2 );
        assert_eq!( cursor( &rig.controller ).await, 1 );

        // The chunk released at 100 ms is still playing until 200 ms.
        rig.controller.resume().await;
        time::sleep( Duration::from_millis( 40 ) ).await;
        assert!( drain( &mut rig.chunks ).is_empty() );

        time::sleep( Duration::from_millis( 160 ) ).await;
        received.extend( drain( &mut rig.chunks ) );

        // The stream runs straight on into B once A has played out.
        let replayed: Vec<u8> = received.iter().flat_map( |c| c.iter().copied() ).collect();
        assert_eq!( &replayed[ ..data.len() ], &data[ .. ] );
        assert_eq!( cursor( &rig.controller ).await, 0 );
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "B" ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_pause_suppresses_pending_end() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( vec![ 1; 1_600 ] ) )
            .with( "B", Entry::Data( vec![ 2; 1_600 ] ) );
        let rig = rig( &[ ( "A", 16_000 ), ( "B", 16_000 ) ], opener );
        let controller = &rig.controller;

        controller.play().await;
        {
            // Hold the lock so the end-of-data signal queues up behind the pause.
            let mut core = controller.shared.core.lock().await;
            time::sleep( Duration::from_millis( 150 ) ).await;
            controller.shared.pause_locked( &mut core ).await;
        }
        time::sleep( Duration::from_secs( 1 ) ).await;

        assert_eq!( controller.state().await, PlaybackState::Paused );
        assert_eq!( controller.current_track().await.unwrap().path(), Path::new( "A" ) );
        assert_eq!( cursor( controller ).await, 1 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_read_error_advances_once() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Corrupt )
            .with( "B", Entry::Data( vec![ 2; 160_000 ] ) )
            .with( "C", Entry::Data( vec![ 3; 160_000 ] ) );
        let mut rig = rig( &[ ( "A", 16_000 ), ( "B", 16_000 ), ( "C", 16_000 ) ], opener );

        rig.controller.play().await;
        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "A" ) );
        assert_eq!( next_track_change( &mut rig.events ).await.path(), Path::new( "B" ) );

        time::sleep( Duration::from_millis( 500 ) ).await;
        assert_eq!( rig.controller.state().await, PlaybackState::Playing );
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "B" ) );
        assert_eq!( cursor( &rig.controller ).await, 2 );
        assert!( drain( &mut rig.chunks ).iter().all( |c| c.iter().all( |b| *b == 2 ) ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_unopenable_tracks_skipped_then_idle() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Missing )
            .with( "B", Entry::Data( vec![ 2; 1_600 ] ) );
        let rig = rig( &[ ( "A", 16_000 ), ( "B", 16_000 ) ], opener );

        assert_eq!( rig.controller.play().await, PlaybackState::Playing );
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "B" ) );

        let all_missing = self::rig( &[ ( "X", 16_000 ), ( "Y", 16_000 ) ], MemoryOpener::default() );
        assert_eq!( all_missing.controller.play().await, PlaybackState::Idle );
        assert!( all_missing.controller.current_track().await.is_none() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_unplayable_tracks_idle_after_a_lap() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Corrupt )
            .with( "B", Entry::Corrupt )
            .with( "C", Entry::Data( Vec::new() ) );
        let mut rig = rig( &[ ( "A", 16_000 ), ( "B", 16_000 ), ( "C", 16_000 ) ], opener );

        assert_eq!( rig.controller.play().await, PlaybackState::Playing );

        let mut failures = 0;
        let idle = async {
            loop {
                match rig.events.recv().await.unwrap() {
                    PlaybackEvent::TrackFailed { .. } => failures += 1,
                    PlaybackEvent::StateChanged { state: PlaybackState::Idle } => return,
                    _ => {}
                }
            }
        };
        time::timeout( Duration::from_secs( 1 ), idle ).await.unwrap();

        assert_eq!( failures, 2 );
        assert_eq!( rig.controller.state().await, PlaybackState::Idle );
        assert!( rig.controller.current_track().await.is_none() );
        assert!( drain( &mut rig.chunks ).is_empty() );

        // A later play starts a fresh lap.
        assert_eq!( rig.controller.play().await, PlaybackState::Playing );
    }


    #[tokio::test( start_paused = true )]
    async fn test_release_rate_holds_across_tracks_and_resume() {
        const RATE: u64 = 16_000;
        const CHUNK: u64 = RATE / 10;

        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( vec![ 1; 1_600 ] ) )
            .with( "B", Entry::Data( vec![ 2; 800 ] ) )
            .with( "C", Entry::Data( vec![ 3; 1_600 ] ) )
            .with( "D", Entry::Data( vec![ 4; 400 ] ) );
        let mut rig = rig( &[ ( "A", RATE ), ( "B", RATE ), ( "C", RATE ), ( "D", RATE ) ], opener );
        let start = time::Instant::now();

        let mut total = 0u64;
        let mut check = |chunks: Vec<Bytes>| {
            total += chunks.iter().map( |c| c.len() as u64 ).sum::<u64>();
            let allowed = RATE * start.elapsed().as_millis() as u64 / 1_000;
            assert!( total <= allowed + CHUNK, "released {} bytes, {} allowed", total, allowed + CHUNK );
            assert!( total + CHUNK >= allowed, "released {} bytes, {} expected", total, allowed );
        };

        rig.controller.play().await;
        for _ in 0..19 {
            time::sleep( Duration::from_millis( 50 ) ).await;
            check( drain( &mut rig.chunks ) );
        }

        rig.controller.pause().await;
        rig.controller.resume().await;
        for _ in 0..10 {
            time::sleep( Duration::from_millis( 50 ) ).await;
            check( drain( &mut rig.chunks ) );
        }
    }


    #[tokio::test( start_paused = true )]
    async fn test_single_flight_under_racing_commands() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( vec![ 1; 100_000 ] ) )
            .with( "B", Entry::Data( vec![ 2; 100_000 ] ) );
        let mut rig = rig( &[ ( "A", 1_000 ), ( "B", 1_000 ) ], opener );

        let mut racers = JoinSet::new();
        for i in 0..24 {
            let controller = rig.controller.clone();
            racers.spawn( async move {
                match i % 4 {
                    0 => controller.play().await,
                    1 => controller.resume().await,
                    2 => controller.play_next().await,
                    _ => controller.pause().await,
                }
            });
        }
        while racers.join_next().await.is_some() {}

        rig.controller.play().await;
        time::sleep( Duration::from_millis( 50 ) ).await;
        drain( &mut rig.chunks );

        // One pacer at 1000 B/s in 100 byte chunks releases at 100..=900 ms.
        time::sleep( Duration::from_millis( 900 ) ).await;
        let chunks = drain( &mut rig.chunks );
        assert_eq!( chunks.len(), 9 );
        let first = chunks[ 0 ][ 0 ];
        assert!( chunks.iter().all( |c| c.iter().all( |b| *b == first ) ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_play_next_and_stop() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( vec![ 1; 16_000 ] ) )
            .with( "B", Entry::Data( vec![ 2; 16_000 ] ) );
        let mut rig = rig( &[ ( "A", 16_000 ), ( "B", 16_000 ) ], opener );

        rig.controller.play().await;
        assert_eq!( rig.controller.play_next().await, PlaybackState::Playing );
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "B" ) );

        assert_eq!( rig.controller.stop().await, PlaybackState::Idle );
        drain( &mut rig.chunks );
        time::sleep( Duration::from_secs( 2 ) ).await;
        assert!( drain( &mut rig.chunks ).is_empty() );

        let status = rig.controller.status().await;
        assert_eq!( status.state, PlaybackState::Idle );
        assert_eq!( status.listeners, 1 );
        assert_eq!( status.tracks, 2 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_load_replaces_playlist() {
        let opener = MemoryOpener::default()
            .with( "A", Entry::Data( vec![ 1; 16_000 ] ) )
            .with( "Z", Entry::Data( vec![ 9; 16_000 ] ) );
        let rig = rig( &[ ( "A", 16_000 ) ], opener );

        rig.controller.play().await;
        rig.controller.load( vec![ Track::new( "Z", 16_000 ) ] ).await.unwrap();
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "A" ) );

        rig.controller.play_next().await;
        assert_eq!( rig.controller.current_track().await.unwrap().path(), Path::new( "Z" ) );

        assert_eq!( rig.controller.load( Vec::new() ).await, Err( PlaylistError::EmptyDirectory ) );
    }
}
