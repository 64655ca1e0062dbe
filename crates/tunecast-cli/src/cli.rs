//! Command-line argument parsing for tunecast.

use std::path::PathBuf;

use clap::Parser;


/// tunecast - A shared radio-style broadcast of a music directory.
#[derive( Parser, Debug, Default )]
#[command( name = "tunecast" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Directory of tracks to broadcast.
    pub dir: Option<PathBuf>,

    /// Address to serve listeners on (e.g. 0.0.0.0:8000).
    #[arg( short, long )]
    pub bind: Option<String>,

    /// Bitrate in bit/s assumed for files that cannot be probed.
    #[arg( long )]
    pub bitrate: Option<u64>,

    /// Fixed chunk size in bytes (default: a tenth of a second of audio).
    #[arg( long )]
    pub chunk_size: Option<usize>,

    /// File extension to include; repeat for several.
    #[arg( long = "ext" )]
    pub extensions: Vec<String>,

    /// Wait for a `play` command instead of starting immediately.
    #[arg( long )]
    pub no_autoplay: bool,

    /// Settings file to use instead of the default location.
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Write the effective settings back to the settings file.
    #[arg( long )]
    pub save_config: bool,
}
