//! Bitrate probing via Symphonia
//!
//! Works out how many bytes per second a track must be streamed at.
//! Probing is best-effort: anything the prober cannot tell us falls back
//! to a default rate instead of failing the track.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;


/// Bitrate assumed for files the prober knows nothing about.
pub const DEFAULT_BITRATE: u64 = 128_000;


/// Source of raw bitrate information for a file.
///
/// Implementations report the bit rate as text, the way container probers
/// do, or `None` when it is not known.
pub trait BitrateProbe: Send + Sync {
    fn probe_bitrate( &self, path: &Path ) -> Option<String>;
}


/// Probe that reports the average bitrate of a container.
///
/// The average is `file size * 8 / duration`, with the duration taken from
/// the first audio track's frame count and sample rate.
#[derive( Debug, Default, Clone, Copy )]
pub struct SymphoniaProbe;


impl SymphoniaProbe {
    pub fn new() -> Self {
        Self
    }


    fn average_bitrate( path: &Path ) -> Option<u64> {
        let file = File::open( path ).ok()?;
        let size = file.metadata().ok()?.len();
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions::default() );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .ok()?;

        let track = probed.format
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )?;

        let sample_rate = track.codec_params.sample_rate? as f64;
        let frames = track.codec_params.n_frames? as f64;
        let duration = frames / sample_rate;
        if duration <= 0.0 {
            return None;
        }

        Some( ( size as f64 * 8.0 / duration ).round() as u64 )
    }
}


impl BitrateProbe for SymphoniaProbe {
    fn probe_bitrate( &self, path: &Path ) -> Option<String> {
        let bitrate = Self::average_bitrate( path );
        tracing::debug!( "Probed {:?}: {:?} bit/s", path, bitrate );
        bitrate.map( |b| b.to_string() )
    }
}


/// Resolves a track's streaming byte rate from its probed bitrate.
#[derive( Clone )]
pub struct BitrateResolver {
    probe: Arc<dyn BitrateProbe>,
    default_bitrate: u64,
}


impl BitrateResolver {
    /// Creates a resolver using `DEFAULT_BITRATE` as the fallback.
    pub fn new( probe: Arc<dyn BitrateProbe> ) -> Self {
        Self {
            probe,
            default_bitrate: DEFAULT_BITRATE,
        }
    }


    /// Replaces the fallback bitrate (bits per second).
    ///
    /// Values below 8 bit/s cannot be expressed as a byte rate and are ignored.
    pub fn with_default_bitrate( mut self, bits_per_second: u64 ) -> Self {
        if bits_per_second >= 8 {
            self.default_bitrate = bits_per_second;
        } else {
            tracing::warn!( "Ignoring default bitrate {} bit/s", bits_per_second );
        }
        self
    }


    /// The fallback bitrate in bits per second.
    pub fn default_bitrate( &self ) -> u64 {
        self.default_bitrate
    }


    /// Returns the byte rate for `path`. Never fails.
    pub fn resolve( &self, path: &Path ) -> u64 {
        let raw = self.probe.probe_bitrate( path );
        let bits = match raw.as_deref().and_then( parse_bitrate ) {
            Some( bits ) => bits,
            None => {
                tracing::debug!(
                    "No usable bitrate for {:?} ({:?}), using {} bit/s",
                    path,
                    raw,
                    self.default_bitrate
                );
                self.default_bitrate
            }
        };

        bits / 8
    }
}


impl std::fmt::Debug for BitrateResolver {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "BitrateResolver" )
            .field( "default_bitrate", &self.default_bitrate )
            .finish_non_exhaustive()
    }
}


/// Parses a textual bit rate, rejecting values that yield no whole byte per second.
fn parse_bitrate( raw: &str ) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter( |bits| *bits >= 8 )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;


    struct FixedProbe( HashMap<PathBuf, String> );


    impl BitrateProbe for FixedProbe {
        fn probe_bitrate( &self, path: &Path ) -> Option<String> {
            self.0.get( path ).cloned()
        }
    }


    fn resolver( entries: &[( &str, &str )] ) -> BitrateResolver {
        let map = entries
            .iter()
            .map( |( p, v )| ( PathBuf::from( p ), v.to_string() ) )
            .collect();
        BitrateResolver::new( Arc::new( FixedProbe( map ) ) )
    }


    #[test]
    fn test_resolve_probed() {
        let resolver = resolver( &[ ( "b.mp3", "320000" ) ] );
        assert_eq!( resolver.resolve( Path::new( "b.mp3" ) ), 40_000 );
    }


    #[test]
    fn test_resolve_missing_defaults() {
        let resolver = resolver( &[] );
        assert_eq!( resolver.resolve( Path::new( "a.mp3" ) ), 16_000 );
    }


    #[test]
    fn test_resolve_unparseable_defaults() {
        let resolver = resolver( &[ ( "c.mp3", "N/A" ), ( "d.mp3", "0" ), ( "e.mp3", "" ) ] );
        assert_eq!( resolver.resolve( Path::new( "c.mp3" ) ), 16_000 );
        assert_eq!( resolver.resolve( Path::new( "d.mp3" ) ), 16_000 );
        assert_eq!( resolver.resolve( Path::new( "e.mp3" ) ), 16_000 );
    }


    #[test]
    fn test_custom_default() {
        let resolver = resolver( &[] ).with_default_bitrate( 192_000 );
        assert_eq!( resolver.resolve( Path::new( "a.mp3" ) ), 24_000 );

        let resolver = resolver.with_default_bitrate( 3 );
        assert_eq!( resolver.default_bitrate(), 192_000 );
    }


    #[test]
    fn test_symphonia_probe_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join( "noise.mp3" );
        std::fs::write( &bogus, b"definitely not audio" ).unwrap();

        assert_eq!( SymphoniaProbe::new().probe_bitrate( &bogus ), None );
        assert_eq!( SymphoniaProbe::new().probe_bitrate( &dir.path().join( "missing.mp3" ) ), None );
    }
}
