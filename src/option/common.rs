//! Options shared by every command

use std::io::IsTerminal;

use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::option::FlagParser;

#[derive(Debug, Clone, Default, clap::Args)]
pub struct Common {
    /// Log every registry request and response
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Print verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// [Preview] Do not show progress output
    #[arg(long = "no-tty")]
    pub no_tty: bool,

    /// Set when stderr is an interactive terminal and output may use it
    #[arg(skip)]
    pub tty: bool,
}

impl Common {
    /// Logger honoring the debug and verbose flags
    pub fn logger(&self) -> Logger {
        Logger::new(self.debug || self.verbose)
    }

    // stderr is the TTY; stdout stays pipeable
    fn parse_tty(&mut self, is_terminal: bool) -> Result<()> {
        if !self.no_tty && is_terminal {
            if self.debug {
                return Err(TargetError::Validation(
                    "cannot use --debug, add --no-tty to suppress terminal output".to_string(),
                ));
            }
            self.tty = true;
        }
        Ok(())
    }
}

impl FlagParser for Common {
    fn parse(&mut self, _logger: &Logger) -> Result<()> {
        self.parse_tty(std::io::stderr().is_terminal())
    }
}
