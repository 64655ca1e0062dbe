//! Library scanning and track loading
//!
//! Lists the audio files of a music directory and turns them into
//! [`Track`]s by probing every file for its bitrate.

use std::path::{ Path, PathBuf };
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::bitrate::BitrateResolver;
use crate::playlist::Track;


/// Extensions loaded when nothing else is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[ "mp3" ];


/// Errors that can occur during library operations.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Probe task failed: {0}" )]
    Probe( #[from] tokio::task::JoinError ),
}


/// Lists the files directly inside `dir` whose extension is in `extensions`.
///
/// The match is case-insensitive and the result is sorted by path so the
/// order is stable between calls.
pub fn list_tracks<S: AsRef<str>>( dir: &Path, extensions: &[S] ) -> Result<Vec<PathBuf>, LibraryError> {
    let entries = match std::fs::read_dir( dir ) {
        Ok( e ) => e,
        Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err( LibraryError::NotFound( dir.to_path_buf() ) );
        }
        Err( e ) => return Err( LibraryError::Io( e ) ),
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map( |entry| entry.path() )
        .filter( |path| path.is_file() && has_extension( path, extensions ) )
        .collect();
    paths.sort();

    tracing::debug!( "Found {} candidate files in {:?}", paths.len(), dir );
    Ok( paths )
}


/// Lists `dir` and resolves every file's byte rate.
///
/// Probes run concurrently on the blocking pool; the result keeps the
/// listing order.
pub async fn load_tracks<S: AsRef<str>>(
    dir: &Path,
    extensions: &[S],
    resolver: Arc<BitrateResolver>,
) -> Result<Vec<Track>, LibraryError> {
    let paths = list_tracks( dir, extensions )?;
    let tracks = resolve_tracks( paths, resolver ).await?;

    tracing::info!( "Resolved {} tracks from {:?}", tracks.len(), dir );
    Ok( tracks )
}


/// Resolves the byte rate of each path concurrently.
pub async fn resolve_tracks(
    paths: Vec<PathBuf>,
    resolver: Arc<BitrateResolver>,
) -> Result<Vec<Track>, LibraryError> {
    let mut probes = JoinSet::new();
    for ( index, path ) in paths.into_iter().enumerate() {
        let resolver = Arc::clone( &resolver );
        probes.spawn_blocking( move || {
            let byte_rate = resolver.resolve( &path );
            ( index, Track::new( path, byte_rate ) )
        });
    }

    let mut resolved = Vec::with_capacity( probes.len() );
    while let Some( result ) = probes.join_next().await {
        resolved.push( result? );
    }
    resolved.sort_by_key( |( index, _ )| *index );

    Ok( resolved.into_iter().map( |( _, track )| track ).collect() )
}


/// Checks if a file has one of the given extensions.
fn has_extension<S: AsRef<str>>( path: &Path, extensions: &[S] ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| extensions.iter().any( |x| x.as_ref().eq_ignore_ascii_case( e ) ) )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::bitrate::BitrateProbe;


    struct NameProbe;


    impl BitrateProbe for NameProbe {
        fn probe_bitrate( &self, path: &Path ) -> Option<String> {
            match path.file_name()?.to_str()? {
                "b.mp3" => Some( "320000".into() ),
                "c.mp3" => Some( "garbage".into() ),
                _ => None,
            }
        }
    }


    fn touch( dir: &Path, name: &str ) {
        std::fs::write( dir.join( name ), b"" ).unwrap();
    }


    #[test]
    fn test_list_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch( dir.path(), "b.mp3" );
        touch( dir.path(), "a.MP3" );
        touch( dir.path(), "cover.jpg" );
        touch( dir.path(), "notes.txt" );
        std::fs::create_dir( dir.path().join( "sub.mp3" ) ).unwrap();

        let found = list_tracks( dir.path(), DEFAULT_EXTENSIONS ).unwrap();
        let names: Vec<_> = found
            .iter()
            .map( |p| p.file_name().unwrap().to_str().unwrap() )
            .collect();
        assert_eq!( names, vec![ "a.MP3", "b.mp3" ] );
    }


    #[test]
    fn test_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = list_tracks( &dir.path().join( "nope" ), DEFAULT_EXTENSIONS );
        assert!( matches!( result, Err( LibraryError::NotFound( _ ) ) ) );
    }


    #[tokio::test]
    async fn test_load_tracks_resolves_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in [ "c.mp3", "a.mp3", "b.mp3" ] {
            touch( dir.path(), name );
        }

        let resolver = Arc::new( BitrateResolver::new( Arc::new( NameProbe ) ) );
        let tracks = load_tracks( dir.path(), &[ "mp3" ], resolver ).await.unwrap();

        let summary: Vec<_> = tracks.iter().map( |t| ( t.name(), t.byte_rate() ) ).collect();
        assert_eq!( summary, vec![
            ( "a.mp3".to_string(), 16_000 ),
            ( "b.mp3".to_string(), 40_000 ),
            ( "c.mp3".to_string(), 16_000 ),
        ]);
    }


    #[tokio::test]
    async fn test_load_tracks_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        touch( dir.path(), "readme.md" );

        let resolver = Arc::new( BitrateResolver::new( Arc::new( NameProbe ) ) );
        let tracks = load_tracks( dir.path(), DEFAULT_EXTENSIONS, resolver ).await.unwrap();
        assert!( tracks.is_empty() );
    }
}
