//! Track byte sources
//!
//! A source is read sequentially until exhausted. The controller keeps one
//! open per loaded track so a resumed pacer carries on where the last one
//! stopped.

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{ AsyncRead, AsyncReadExt };
use tokio::sync::Mutex;
use tokio::time::Instant;


/// Readable stream of a track's raw bytes.
///
/// `Ok(0)` from a read means the data is exhausted; read failures are
/// reported as errors.
pub trait ByteSource: AsyncRead + Send + Unpin {}

impl<T: AsyncRead + Send + Unpin> ByteSource for T {}


/// Opens byte sources for track paths.
pub trait SourceOpener: Send + Sync {
    fn open( &self, path: &Path ) -> io::Result<Box<dyn ByteSource>>;
}


/// Opens tracks from the local filesystem.
#[derive( Debug, Default, Clone, Copy )]
pub struct FileOpener;


impl SourceOpener for FileOpener {
    fn open( &self, path: &Path ) -> io::Result<Box<dyn ByteSource>> {
        let file = std::fs::File::open( path )?;
        Ok( Box::new( tokio::fs::File::from_std( file ) ) )
    }
}


/// Position-tracking reader with a one-chunk push-back slot.
pub struct SourceCursor {
    reader: Box<dyn ByteSource>,
    pending: Option<Bytes>,
    offset: u64,
    played_until: Option<Instant>,
}


impl SourceCursor {
    pub fn new( reader: Box<dyn ByteSource> ) -> Self {
        Self {
            reader,
            pending: None,
            offset: 0,
            played_until: None,
        }
    }


    /// Returns the next chunk of at most `max` bytes, or `None` at end of data.
    ///
    /// A chunk pushed back with [`unread`](Self::unread) is returned first, whole.
    pub async fn next_chunk( &mut self, max: usize ) -> io::Result<Option<Bytes>> {
        if let Some( chunk ) = self.pending.take() {
            self.offset += chunk.len() as u64;
            return Ok( Some( chunk ) );
        }

        let mut buf = vec![ 0u8; max.max( 1 ) ];
        let n = loop {
            match self.reader.read( &mut buf ).await {
                Ok( n ) => break n,
                Err( e ) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err( e ) => return Err( e ),
            }
        };

        if n == 0 {
            return Ok( None );
        }

        buf.truncate( n );
        self.offset += n as u64;
        Ok( Some( Bytes::from( buf ) ) )
    }


    /// Pushes an unreleased chunk back so the next read returns it again.
    pub fn unread( &mut self, chunk: Bytes ) {
        debug_assert!( self.pending.is_none(), "only one chunk can be pushed back" );
        self.offset -= chunk.len() as u64;
        self.pending = Some( chunk );
    }


    /// Records when the bytes released so far finish playing.
    pub fn set_played_until( &mut self, at: Instant ) {
        self.played_until = Some( at );
    }


    /// Takes the instant left by a stopped pacer, if any.
    pub fn take_played_until( &mut self ) -> Option<Instant> {
        self.played_until.take()
    }


    /// Bytes handed out and not pushed back.
    pub fn offset( &self ) -> u64 {
        self.offset
    }
}


/// A cursor shared between the controller and the pacer reading it.
pub type SharedSource = Arc<Mutex<SourceCursor>>;


/// Wraps a freshly opened reader for sharing.
pub fn shared( reader: Box<dyn ByteSource> ) -> SharedSource {
    Arc::new( Mutex::new( SourceCursor::new( reader ) ) )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::Cursor;


    #[tokio::test]
    async fn test_chunks_until_end() {
        let mut cursor = SourceCursor::new( Box::new( Cursor::new( vec![ 7u8; 10 ] ) ) );

        let first = cursor.next_chunk( 4 ).await.unwrap().unwrap();
        assert_eq!( first.len(), 4 );
        let second = cursor.next_chunk( 4 ).await.unwrap().unwrap();
        assert_eq!( second.len(), 4 );
        let third = cursor.next_chunk( 4 ).await.unwrap().unwrap();
        assert_eq!( third.len(), 2 );
        assert!( cursor.next_chunk( 4 ).await.unwrap().is_none() );
        assert_eq!( cursor.offset(), 10 );
    }


    #[tokio::test]
    async fn test_unread_is_replayed() {
        let data: Vec<u8> = ( 0..8 ).collect();
        let mut cursor = SourceCursor::new( Box::new( Cursor::new( data ) ) );

        let chunk = cursor.next_chunk( 3 ).await.unwrap().unwrap();
        cursor.unread( chunk.clone() );
        assert_eq!( cursor.offset(), 0 );

        assert_eq!( cursor.next_chunk( 3 ).await.unwrap().unwrap(), chunk );
        assert_eq!( &cursor.next_chunk( 3 ).await.unwrap().unwrap()[ .. ], &[ 3, 4, 5 ] );
        assert_eq!( cursor.offset(), 6 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_played_until_taken_once() {
        let mut cursor = SourceCursor::new( Box::new( Cursor::new( vec![ 1u8; 4 ] ) ) );
        assert!( cursor.take_played_until().is_none() );

        let at = Instant::now() + std::time::Duration::from_millis( 70 );
        cursor.set_played_until( at );
        assert_eq!( cursor.take_played_until(), Some( at ) );
        assert!( cursor.take_played_until().is_none() );
    }


    #[tokio::test]
    async fn test_file_opener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "a.mp3" );
        std::fs::write( &path, b"abc" ).unwrap();

        let mut cursor = SourceCursor::new( FileOpener.open( &path ).unwrap() );
        assert_eq!( &cursor.next_chunk( 16 ).await.unwrap().unwrap()[ .. ], b"abc" );
        assert!( cursor.next_chunk( 16 ).await.unwrap().is_none() );

        assert!( FileOpener.open( &dir.path().join( "missing.mp3" ) ).is_err() );
    }
}
