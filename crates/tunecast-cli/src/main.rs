//! tunecast CLI - shared radio-style broadcaster

mod cli;
mod console;
mod server;
mod settings;

use std::sync::Arc;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use cli::Args;
use console::{ Console, Reply };
use settings::Settings;

use tunecast_core::{
    library, BitrateResolver, Broadcaster, FileOpener, PacerConfig, PlaybackController,
    PlaybackEvent, Playlist, SymphoniaProbe,
};


/// Logs go to stderr so stdout stays readable for the console.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "info" ) );
    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( std::io::stderr )
        .init();
}


/// Mirrors controller events into the log.
async fn log_events( controller: PlaybackController ) {
    let mut events = controller.subscribe();
    loop {
        match events.recv().await {
            Ok( PlaybackEvent::TrackChanged { track } ) => {
                tracing::info!( "Now playing: {}", track.name() );
            }
            Ok( PlaybackEvent::StateChanged { state } ) => {
                tracing::debug!( "State: {}", state );
            }
            Ok( PlaybackEvent::TrackFailed { track, message } ) => {
                tracing::warn!( "Track {} failed: {}", track.name(), message );
            }
            Err( tokio::sync::broadcast::error::RecvError::Lagged( n ) ) => {
                tracing::debug!( "Event log skipped {} events", n );
            }
            Err( tokio::sync::broadcast::error::RecvError::Closed ) => break,
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let settings_path = args.config.clone().or_else( Settings::settings_path );
    let mut settings = match &settings_path {
        Some( path ) => Settings::load_from( path ),
        None => Settings::default(),
    };
    settings.apply_args( &args );

    if args.save_config {
        match &settings_path {
            Some( path ) => {
                settings.save_to( path );
                tracing::info!( "Saved settings to {:?}", path );
            }
            None => tracing::warn!( "No settings location available" ),
        }
    }

    let music_dir = settings.music_dir
        .clone()
        .context( "No music directory given (pass one or set music_dir in settings)" )?;

    let resolver = Arc::new(
        BitrateResolver::new( Arc::new( SymphoniaProbe::new() ) )
            .with_default_bitrate( settings.default_bitrate )
    );

    let tracks = library::load_tracks( &music_dir, settings.extensions.as_slice(), Arc::clone( &resolver ) )
        .await
        .with_context( || format!( "Failed to load tracks from {}", music_dir.display() ) )?;

    let mut playlist = Playlist::new();
    if let Err( e ) = playlist.load( tracks ) {
        tracing::warn!( "{}: {}", music_dir.display(), e );
    }

    let broadcaster = Arc::new( Broadcaster::new() );
    let controller = PlaybackController::new(
        playlist,
        Arc::new( FileOpener ),
        Arc::clone( &broadcaster ),
        PacerConfig { chunk_size: settings.chunk_size },
    );

    let listener = TcpListener::bind( &settings.bind )
        .await
        .with_context( || format!( "Failed to bind {}", settings.bind ) )?;
    tracing::info!( "Listening on http://{}", listener.local_addr()? );

    let queue = settings.listener_queue;
    tokio::spawn( async move {
        if let Err( e ) = server::serve( listener, broadcaster, queue ).await {
            tracing::error!( "Listener socket failed: {}", e );
        }
    });
    tokio::spawn( log_events( controller.clone() ) );

    if settings.autoplay {
        controller.play().await;
    }

    let console = Console::new(
        controller.clone(),
        music_dir,
        settings.extensions.clone(),
        resolver,
    );

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    let mut stdin_open = true;
    loop {
        let line = tokio::select! {
            line = lines.next_line(), if stdin_open => line?,
            _ = tokio::signal::ctrl_c() => break,
        };

        // Without a console keep broadcasting until Ctrl-C.
        let Some( line ) = line else {
            tracing::info!( "Console closed, press Ctrl-C to stop" );
            stdin_open = false;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        match console.handle_line( &line ).await {
            Reply::Text( text ) => println!( "{}", text ),
            Reply::Quit => break,
        }
    }

    controller.stop().await;
    tracing::info!( "Shut down" );
    Ok(())
}
