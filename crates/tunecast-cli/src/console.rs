//! Console control surface
//!
//! Executes parsed commands against the playback controller and renders
//! a one-line reply for the operator.

use std::path::PathBuf;
use std::sync::Arc;

use tunecast_core::command::{ self, Command };
use tunecast_core::{ library, BitrateResolver, PlaybackController, PlaybackStatus };


/// What the console loop should do after a command.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Reply {
    Text( String ),
    Quit,
}


/// Dispatches commands for one music directory.
pub struct Console {
    controller: PlaybackController,
    music_dir: PathBuf,
    extensions: Vec<String>,
    resolver: Arc<BitrateResolver>,
}


impl Console {
    pub fn new(
        controller: PlaybackController,
        music_dir: PathBuf,
        extensions: Vec<String>,
        resolver: Arc<BitrateResolver>,
    ) -> Self {
        Self {
            controller,
            music_dir,
            extensions,
            resolver,
        }
    }


    /// Parses and executes one input line.
    pub async fn handle_line( &self, line: &str ) -> Reply {
        match Command::parse( line ) {
            Ok( command ) => self.execute( command ).await,
            Err( e ) => Reply::Text( format!( "{} (try 'help')", e ) ),
        }
    }


    pub async fn execute( &self, command: Command ) -> Reply {
        let text = match command {
            Command::Play => format!( "{}", self.controller.play().await ),
            Command::Pause => format!( "{}", self.controller.pause().await ),
            Command::Resume => format!( "{}", self.controller.resume().await ),
            Command::Next => format!( "{}", self.controller.play_next().await ),
            Command::Stop => format!( "{}", self.controller.stop().await ),
            Command::Status => render_status( &self.controller.status().await ),
            Command::Reload => self.reload().await,
            Command::Help => command::help_text().to_string(),
            Command::Quit => return Reply::Quit,
        };

        Reply::Text( text )
    }


    async fn reload( &self ) -> String {
        let tracks = match library::load_tracks(
            &self.music_dir,
            self.extensions.as_slice(),
            Arc::clone( &self.resolver ),
        ).await {
            Ok( tracks ) => tracks,
            Err( e ) => return format!( "reload failed: {}", e ),
        };

        let count = tracks.len();
        match self.controller.load( tracks ).await {
            Ok(()) => format!( "loaded {} tracks", count ),
            Err( e ) => format!( "{}: {}", self.music_dir.display(), e ),
        }
    }
}


/// Formats a status snapshot on one line.
pub fn render_status( status: &PlaybackStatus ) -> String {
    let track = match &status.track {
        Some( track ) => {
            let seconds = status.position as f64 / track.byte_rate() as f64;
            format!(
                "{} [{}:{:02}]",
                track.name(),
                seconds as u64 / 60,
                seconds as u64 % 60
            )
        }
        None => "nothing".to_string(),
    };

    format!(
        "{}: {} | {} listening | {} tracks queued",
        status.state,
        track,
        status.listeners,
        status.tracks
    )
}


#[cfg( test )]
mod tests {
    use super::*;
    use tunecast_core::{ BitrateProbe, Broadcaster, FileOpener, PacerConfig, PlaybackState, Playlist, Track };


    struct NoProbe;


    impl BitrateProbe for NoProbe {
        fn probe_bitrate( &self, _path: &std::path::Path ) -> Option<String> {
            None
        }
    }


    fn console( dir: &std::path::Path ) -> Console {
        let controller = PlaybackController::new(
            Playlist::new(),
            Arc::new( FileOpener ),
            Arc::new( Broadcaster::new() ),
            PacerConfig::default(),
        );
        Console::new(
            controller,
            dir.to_path_buf(),
            vec![ "mp3".to_string() ],
            Arc::new( BitrateResolver::new( Arc::new( NoProbe ) ) ),
        )
    }


    #[test]
    fn test_render_status() {
        let status = PlaybackStatus {
            state: PlaybackState::Playing,
            track: Some( Track::new( "/music/song.mp3", 16_000 ) ),
            position: 16_000 * 75,
            listeners: 3,
            tracks: 12,
        };
        assert_eq!(
            render_status( &status ),
            "playing: song.mp3 [1:15] | 3 listening | 12 tracks queued"
        );
    }


    #[tokio::test]
    async fn test_reload_then_play() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write( dir.path().join( "a.mp3" ), vec![ 0u8; 64_000 ] ).unwrap();
        let console = console( dir.path() );

        assert_eq!( console.handle_line( "play" ).await, Reply::Text( "idle".into() ) );
        assert_eq!( console.handle_line( "reload" ).await, Reply::Text( "loaded 1 tracks".into() ) );
        assert_eq!( console.handle_line( "play" ).await, Reply::Text( "playing".into() ) );
        assert_eq!( console.handle_line( "pause" ).await, Reply::Text( "paused".into() ) );
        assert_eq!( console.handle_line( "stop" ).await, Reply::Text( "idle".into() ) );
    }


    #[tokio::test]
    async fn test_reload_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let console = console( dir.path() );

        let Reply::Text( text ) = console.handle_line( "reload" ).await else { panic!( "expected text" ) };
        assert!( text.ends_with( "No eligible tracks found" ) );
    }


    #[tokio::test]
    async fn test_quit_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let console = console( dir.path() );

        assert_eq!( console.handle_line( "q" ).await, Reply::Quit );
        let Reply::Text( text ) = console.handle_line( "dance" ).await else { panic!( "expected text" ) };
        assert!( text.starts_with( "Unknown command: dance" ) );
    }
}
