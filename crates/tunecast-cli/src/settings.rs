//! Application settings management
//!
//! Settings live in a JSON file; command-line flags override them.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use tunecast_core::library::DEFAULT_EXTENSIONS;
use tunecast_core::DEFAULT_BITRATE;

use crate::cli::Args;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Directory of tracks to broadcast
    pub music_dir: Option<PathBuf>,

    /// Listen address for the HTTP stream
    pub bind: String,

    /// Fallback bitrate (bit/s) for files that cannot be probed
    pub default_bitrate: u64,

    /// Fixed chunk size in bytes
    pub chunk_size: Option<usize>,

    /// Included file extensions
    pub extensions: Vec<String>,

    /// Start playing as soon as the tracks are loaded
    pub autoplay: bool,

    /// Chunks buffered per listener before it starts losing audio
    pub listener_queue: usize,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            music_dir: None,
            bind: "0.0.0.0:8000".to_string(),
            default_bitrate: DEFAULT_BITRATE,
            chunk_size: None,
            extensions: DEFAULT_EXTENSIONS.iter().map( |e| e.to_string() ).collect(),
            autoplay: true,
            listener_queue: 64,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "tunecast" ).join( "settings.json" ) )
    }


    /// Loads settings from `path`, falling back to defaults on any problem.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => match serde_json::from_str( &contents ) {
                Ok( settings ) => settings,
                Err( e ) => {
                    tracing::warn!( "Ignoring malformed settings {:?}: {}", path, e );
                    Self::default()
                }
            },
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to `path`.
    pub fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Overrides settings with whatever was given on the command line.
    pub fn apply_args( &mut self, args: &Args ) {
        if let Some( dir ) = &args.dir {
            self.music_dir = Some( dir.clone() );
        }
        if let Some( bind ) = &args.bind {
            self.bind = bind.clone();
        }
        if let Some( bitrate ) = args.bitrate {
            self.default_bitrate = bitrate;
        }
        if args.chunk_size.is_some() {
            self.chunk_size = args.chunk_size;
        }
        if !args.extensions.is_empty() {
            self.extensions = args.extensions
                .iter()
                .map( |e| e.trim_start_matches( '.' ).to_string() )
                .collect();
        }
        if args.no_autoplay {
            self.autoplay = false;
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!( Settings::load_from( &dir.path().join( "none.json" ) ), Settings::default() );
    }


    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "bind": "127.0.0.1:9000", "default_bitrate": 192000 }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.bind, "127.0.0.1:9000" );
        assert_eq!( settings.default_bitrate, 192_000 );
        assert_eq!( settings.extensions, vec![ "mp3".to_string() ] );
        assert!( settings.autoplay );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "{ not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let settings = Settings {
            music_dir: Some( PathBuf::from( "/srv/music" ) ),
            chunk_size: Some( 4096 ),
            ..Settings::default()
        };

        settings.save_to( &path );
        assert_eq!( Settings::load_from( &path ), settings );
    }


    #[test]
    fn test_args_override() {
        let mut settings = Settings::default();
        let args = Args {
            dir: Some( PathBuf::from( "/music" ) ),
            bitrate: Some( 96_000 ),
            extensions: vec![ ".ogg".into(), "mp3".into() ],
            no_autoplay: true,
            ..Args::default()
        };

        settings.apply_args( &args );
        assert_eq!( settings.music_dir, Some( PathBuf::from( "/music" ) ) );
        assert_eq!( settings.default_bitrate, 96_000 );
        assert_eq!( settings.extensions, vec![ "ogg".to_string(), "mp3".to_string() ] );
        assert!( !settings.autoplay );
        assert_eq!( settings.bind, "0.0.0.0:8000" );
    }
}
