//! HTTP listener transport
//!
//! `GET /` and `GET /stream` answer with an endless `audio/mpeg` body fed
//! from the broadcaster. Each response body is one registered listener and
//! unregisters itself when the client goes away and the body is dropped.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ Context, Poll };

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{ IntoResponse, Response },
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tunecast_core::{ Broadcaster, ChannelListener, ListenerId };


/// Shared state for the stream handlers.
#[derive( Clone )]
struct StreamState {
    broadcaster: Arc<Broadcaster>,
    queue: usize,
}


/// Serves listeners until the socket fails.
pub async fn serve( listener: TcpListener, broadcaster: Arc<Broadcaster>, queue: usize ) -> io::Result<()> {
    axum::serve( listener, router( broadcaster, queue ) ).await
}


fn router( broadcaster: Arc<Broadcaster>, queue: usize ) -> Router {
    Router::new()
        .route( "/", get( handle_stream ) )
        .route( "/stream", get( handle_stream ) )
        .with_state( StreamState { broadcaster, queue } )
}


async fn handle_stream( State( state ): State<StreamState> ) -> Response {
    let stream = ListenerStream::register( state.broadcaster, state.queue );
    let body = Body::from_stream( stream );

    (
        [
            ( header::CONTENT_TYPE, "audio/mpeg" ),
            ( header::CACHE_CONTROL, "no-cache, no-store" ),
        ],
        body,
    ).into_response()
}


/// Chunks for one listener; unregisters on drop.
struct ListenerStream {
    id: ListenerId,
    chunks: mpsc::Receiver<Bytes>,
    broadcaster: Arc<Broadcaster>,
}


impl ListenerStream {
    fn register( broadcaster: Arc<Broadcaster>, queue: usize ) -> Self {
        let ( listener, chunks ) = ChannelListener::new( queue );
        let id = broadcaster.register( Arc::new( listener ) );
        tracing::debug!( "HTTP client is {}", id );

        Self { id, chunks, broadcaster }
    }
}


impl Stream for ListenerStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next( mut self: Pin<&mut Self>, cx: &mut Context<'_> ) -> Poll<Option<Self::Item>> {
        self.chunks.poll_recv( cx ).map( |chunk| chunk.map( Ok ) )
    }
}


impl Drop for ListenerStream {
    fn drop( &mut self ) {
        self.broadcaster.unregister( self.id );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::io::{ AsyncReadExt, AsyncWriteExt };
    use tokio::net::TcpStream;


    async fn start() -> ( SocketAddr, Arc<Broadcaster> ) {
        let listener = TcpListener::bind( "127.0.0.1:0" ).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broadcaster = Arc::new( Broadcaster::new() );
        tokio::spawn( serve( listener, Arc::clone( &broadcaster ), 16 ) );
        ( addr, broadcaster )
    }


    async fn wait_for_listeners( broadcaster: &Broadcaster, count: usize ) {
        for _ in 0..200 {
            if broadcaster.listener_count() == count {
                return;
            }
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }
        panic!( "expected {} listeners, have {}", count, broadcaster.listener_count() );
    }


    /// Reads until `needle` shows up in the response.
    async fn read_until( client: &mut TcpStream, needle: &[u8] ) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [ 0u8; 1024 ];
        while !received.windows( needle.len() ).any( |w| w == needle ) {
            let n = tokio::time::timeout( Duration::from_secs( 5 ), client.read( &mut buf ) )
                .await
                .unwrap()
                .unwrap();
            assert!( n > 0, "connection closed early: {:?}", String::from_utf8_lossy( &received ) );
            received.extend_from_slice( &buf[ ..n ] );
        }
        received
    }


    #[tokio::test]
    async fn test_streams_chunks_after_headers() {
        let ( addr, broadcaster ) = start().await;

        let mut client = TcpStream::connect( addr ).await.unwrap();
        client.write_all( b"GET /stream HTTP/1.1\r\nHost: radio\r\n\r\n" ).await.unwrap();
        wait_for_listeners( &broadcaster, 1 ).await;

        broadcaster.on_chunk( &Bytes::from_static( b"ID3-frame" ) );

        let received = read_until( &mut client, b"ID3-frame" ).await;
        let text = String::from_utf8_lossy( &received ).to_ascii_lowercase();
        assert!( text.starts_with( "http/1.1 200 ok" ) );
        assert!( text.contains( "content-type: audio/mpeg" ) );
        assert!( !text.contains( "content-length" ) );
    }


    #[tokio::test]
    async fn test_unknown_path_is_not_a_listener() {
        let ( addr, broadcaster ) = start().await;

        let mut client = TcpStream::connect( addr ).await.unwrap();
        client.write_all( b"GET /favicon.ico HTTP/1.1\r\nHost: radio\r\n\r\n" ).await.unwrap();

        let received = read_until( &mut client, b"\r\n\r\n" ).await;
        assert!( received.starts_with( b"HTTP/1.1 404" ) );
        assert_eq!( broadcaster.listener_count(), 0 );
    }


    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let ( addr, broadcaster ) = start().await;

        let mut client = TcpStream::connect( addr ).await.unwrap();
        client.write_all( b"GET / HTTP/1.1\r\nHost: radio\r\n\r\n" ).await.unwrap();
        wait_for_listeners( &broadcaster, 1 ).await;

        drop( client );

        // The body is dropped once writing to the closed connection fails.
        for _ in 0..200 {
            if broadcaster.listener_count() == 0 {
                return;
            }
            broadcaster.on_chunk( &Bytes::from_static( b"frame" ) );
            tokio::time::sleep( Duration::from_millis( 10 ) ).await;
        }
        panic!( "listener still registered after disconnect" );
    }
}
