//! Playlist and track selection
//!
//! Holds the ordered, fixed-at-load list of tracks and the cursor that
//! drives cyclic "next track" selection.

use std::path::{ Path, PathBuf };

use thiserror::Error;


/// Errors that can occur with playlist operations.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum PlaylistError {
    #[error( "No eligible tracks found" )]
    EmptyDirectory,

    #[error( "No tracks available" )]
    NoTracksAvailable,
}


/// A playable file and the byte rate it must be streamed at.
#[derive( Debug, Clone, PartialEq, Eq, Hash )]
pub struct Track {
    path: PathBuf,
    byte_rate: u64,
}


impl Track {
    /// Creates a track. A zero byte rate is raised to 1 so pacing never divides by zero.
    pub fn new( path: impl Into<PathBuf>, byte_rate: u64 ) -> Self {
        Self {
            path: path.into(),
            byte_rate: byte_rate.max( 1 ),
        }
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    /// Bytes per second of real-time playback.
    pub fn byte_rate( &self ) -> u64 {
        self.byte_rate
    }


    /// File name for display, falling back to the full path.
    pub fn name( &self ) -> String {
        self.path
            .file_name()
            .map( |n| n.to_string_lossy().into_owned() )
            .unwrap_or_else( || self.path.display().to_string() )
    }
}


/// Ordered track list with a wrapping cursor.
#[derive( Debug, Default )]
pub struct Playlist {
    tracks: Vec<Track>,
    cursor: usize,
    current_index: Option<usize>,
}


impl Playlist {
    /// Creates a new empty playlist.
    pub fn new() -> Self {
        Self::default()
    }


    /// Creates a playlist already loaded with `tracks`.
    pub fn with_tracks( tracks: Vec<Track> ) -> Self {
        Self {
            tracks,
            cursor: 0,
            current_index: None,
        }
    }


    /// Replaces the whole track list and rewinds the cursor.
    ///
    /// An empty list still replaces the old contents, then reports
    /// `EmptyDirectory` so the caller knows there is nothing to play.
    pub fn load( &mut self, tracks: Vec<Track> ) -> Result<(), PlaylistError> {
        self.tracks = tracks;
        self.cursor = 0;
        self.current_index = None;

        if self.tracks.is_empty() {
            return Err( PlaylistError::EmptyDirectory );
        }

        tracing::info!( "Loaded {} tracks", self.tracks.len() );
        Ok(())
    }


    /// Returns the track at the cursor and moves the cursor on, wrapping at the end.
    pub fn next( &mut self ) -> Result<Track, PlaylistError> {
        if self.tracks.is_empty() {
            return Err( PlaylistError::NoTracksAvailable );
        }

        let index = self.cursor;
        self.cursor = ( index + 1 ) % self.tracks.len();
        self.current_index = Some( index );

        Ok( self.tracks[ index ].clone() )
    }


    /// The most recently selected track.
    pub fn current( &self ) -> Option<&Track> {
        self.current_index.and_then( |i| self.tracks.get( i ) )
    }


    /// Index of the track the next call to `next()` will return.
    pub fn cursor( &self ) -> usize {
        self.cursor
    }


    /// Gets all tracks in the playlist.
    pub fn tracks( &self ) -> &[Track] {
        &self.tracks
    }


    /// Gets the number of tracks.
    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    /// Returns true if the playlist is empty.
    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn tracks( names: &[&str] ) -> Vec<Track> {
        names.iter().map( |n| Track::new( *n, 16_000 ) ).collect()
    }


    #[test]
    fn test_next_cycles() {
        let mut playlist = Playlist::with_tracks( tracks( &[ "a.mp3", "b.mp3", "c.mp3" ] ) );
        let n = playlist.len();

        let picked: Vec<Track> = ( 0..n * 3 + 2 ).map( |_| playlist.next().unwrap() ).collect();

        for i in 0..picked.len() - n {
            assert_eq!( picked[ i ], picked[ i + n ] );
        }
        assert_eq!( picked[ 0 ].path(), Path::new( "a.mp3" ) );
        assert_eq!( picked[ 2 ].path(), Path::new( "c.mp3" ) );
        assert_eq!( picked[ 3 ].path(), Path::new( "a.mp3" ) );
    }


    #[test]
    fn test_next_single_track_repeats() {
        let mut playlist = Playlist::with_tracks( tracks( &[ "only.mp3" ] ) );
        for _ in 0..4 {
            assert_eq!( playlist.next().unwrap().path(), Path::new( "only.mp3" ) );
            assert_eq!( playlist.cursor(), 0 );
        }
    }


    #[test]
    fn test_next_on_empty() {
        let mut playlist = Playlist::new();
        for _ in 0..3 {
            assert_eq!( playlist.next(), Err( PlaylistError::NoTracksAvailable ) );
        }
        assert!( playlist.current().is_none() );
    }


    #[test]
    fn test_current_does_not_advance() {
        let mut playlist = Playlist::with_tracks( tracks( &[ "a.mp3", "b.mp3" ] ) );
        assert!( playlist.current().is_none() );

        playlist.next().unwrap();
        assert_eq!( playlist.current().unwrap().path(), Path::new( "a.mp3" ) );
        assert_eq!( playlist.current().unwrap().path(), Path::new( "a.mp3" ) );
        assert_eq!( playlist.cursor(), 1 );
    }


    #[test]
    fn test_load_resets_cursor() {
        let mut playlist = Playlist::with_tracks( tracks( &[ "a.mp3", "b.mp3" ] ) );
        playlist.next().unwrap();

        playlist.load( tracks( &[ "x.mp3", "y.mp3", "z.mp3" ] ) ).unwrap();
        assert_eq!( playlist.cursor(), 0 );
        assert!( playlist.current().is_none() );
        assert_eq!( playlist.next().unwrap().path(), Path::new( "x.mp3" ) );
    }


    #[test]
    fn test_load_empty() {
        let mut playlist = Playlist::with_tracks( tracks( &[ "a.mp3" ] ) );
        assert_eq!( playlist.load( Vec::new() ), Err( PlaylistError::EmptyDirectory ) );
        assert!( playlist.is_empty() );
        assert_eq!( playlist.next(), Err( PlaylistError::NoTracksAvailable ) );
    }


    #[test]
    fn test_track_zero_rate_clamped() {
        let track = Track::new( "/music/silence.mp3", 0 );
        assert_eq!( track.byte_rate(), 1 );
        assert_eq!( track.name(), "silence.mp3" );
    }
}
