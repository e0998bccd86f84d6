//! Operator-facing terminal output.

use console::{Term, style};
use std::io;

/// Coloured terminal output honouring `--verbose` and `--quiet`
#[derive(Debug, Clone)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
    out: Term,
    err: Term,
}

impl OutputManager {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            out: Term::stdout(),
            err: Term::stderr(),
        }
    }

    /// Message shown only with `--verbose`
    pub fn verbose(&self, message: &str) -> io::Result<()> {
        if self.verbose && !self.quiet {
            self.out.write_line(&style(message).dim().to_string())?;
        }
        Ok(())
    }

    pub fn progress(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.out
            .write_line(&format!("{} {}", style("→").blue(), message))
    }

    pub fn success(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.out
            .write_line(&format!("{} {}", style("✓").green().bold(), message))
    }

    pub fn warn(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.err
            .write_line(&format!("{} {}", style("!").yellow().bold(), message))
    }

    /// Errors are printed even in quiet mode
    pub fn error(&self, message: &str) -> io::Result<()> {
        self.err
            .write_line(&format!("{} {}", style("✗").red().bold(), message))
    }

    pub fn section(&self, title: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.out.write_line("")?;
        self.out.write_line(&style(title).bold().to_string())
    }

    pub fn indent(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.out.write_line(&format!("  {}", message))
    }

    /// Machine-readable output; never suppressed
    pub fn data(&self, text: &str) -> io::Result<()> {
        self.out.write_line(text)
    }
}
