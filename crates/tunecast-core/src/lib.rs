//! tunecast Core - Shared broadcast queue engine
//!
//! This crate provides the playlist, bitrate resolution, real-time pacing
//! and listener fan-out behind a radio-style broadcast, plus the playback
//! controller that ties them together.

pub mod bitrate;
pub mod broadcast;
pub mod command;
pub mod library;
pub mod pacer;
pub mod player;
pub mod playlist;
pub mod source;

pub use bitrate::{ BitrateProbe, BitrateResolver, SymphoniaProbe, DEFAULT_BITRATE };
pub use broadcast::{ Broadcaster, ChannelListener, DeliveryError, Listener, ListenerId };
pub use command::{ Command, CommandError };
pub use pacer::PacerConfig;
pub use player::{ PlaybackController, PlaybackEvent, PlaybackState, PlaybackStatus };
pub use playlist::{ Playlist, PlaylistError, Track };
pub use source::{ FileOpener, SourceOpener };
