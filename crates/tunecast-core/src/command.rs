//! Control command parsing.
//!
//! Commands arrive as plain text lines (from a console or any other
//! control surface) and map onto the playback controller's operations.

use thiserror::Error;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),
}


/// Parsed control command.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Command {
    // Playback commands
    Play,
    Pause,
    Resume,
    Next,
    Stop,

    // Queue commands
    Reload,
    Status,

    // Session commands
    Help,
    Quit,
}


impl Command {
    /// Parses a command line. A leading `/` is accepted and ignored.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let input = input.strip_prefix( '/' ).unwrap_or( input );
        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();

        let command = match cmd.as_str() {
            "play" | "p" => Command::Play,
            "pause" | "pa" => Command::Pause,
            "resume" | "r" => Command::Resume,
            "next" | "n" | "skip" => Command::Next,
            "stop" | "st" => Command::Stop,
            "reload" | "rescan" => Command::Reload,
            "status" | "s" => Command::Status,
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,

            "" => return Err( CommandError::Unknown( "empty command".into() ) ),
            other => return Err( CommandError::Unknown( other.to_string() ) ),
        };

        if let Some( extra ) = parts.next() {
            return Err( CommandError::InvalidArgument(
                format!( "'{}' takes no arguments, got '{}'", cmd, extra )
            ));
        }

        Ok( command )
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Play => "Start playback or resume",
            Command::Pause => "Pause the broadcast",
            Command::Resume => "Resume the broadcast",
            Command::Next => "Skip to the next track",
            Command::Stop => "Stop and unload the current track",
            Command::Reload => "Rescan the music directory",
            Command::Status => "Show what is on air",
            Command::Help => "Show help",
            Command::Quit => "Shut down",
        }
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Playback Commands:
  play            Start playback or resume      [p]
  pause           Pause the broadcast           [pa]
  resume          Resume the broadcast          [r]
  next            Skip to the next track        [n]
  stop            Stop and unload the track     [st]

Queue Commands:
  reload          Rescan the music directory
  status          Show what is on air           [s]

Other Commands:
  help            Show this help                [?]
  quit            Shut down                     [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play() {
        assert_eq!( Command::parse( "play" ).unwrap(), Command::Play );
        assert_eq!( Command::parse( "  P " ).unwrap(), Command::Play );
    }


    #[test]
    fn test_parse_slash_prefix() {
        assert_eq!( Command::parse( "/pause" ).unwrap(), Command::Pause );
        assert_eq!( Command::parse( "/n" ).unwrap(), Command::Next );
    }


    #[test]
    fn test_parse_aliases() {
        assert_eq!( Command::parse( "r" ).unwrap(), Command::Resume );
        assert_eq!( Command::parse( "skip" ).unwrap(), Command::Next );
        assert_eq!( Command::parse( "exit" ).unwrap(), Command::Quit );
        assert_eq!( Command::parse( "?" ).unwrap(), Command::Help );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "seek 1:30" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_empty() {
        assert!( matches!( Command::parse( "   " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_extra_argument() {
        let result = Command::parse( "pause now" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }
}
