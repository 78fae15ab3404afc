use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::build::CompressionPreset;
use crate::session::View;

#[derive(Parser, Debug)]
#[command(name = "zipsession")]
#[command(version)]
#[command(about = "Build and browse archives in a session that survives restarts", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipsession add notes.txt photo.jpg        stage two files\n  \
  zipsession build                          write archive.zip to the output dir\n  \
  zipsession open https://example.com/a.zip open a remote archive\n  \
  zipsession queue remove 'docs/*'          drop matching entries from the queue\n  \
  zipsession extract -p | more              send queued entries via pipe into more")]
pub struct Cli {
    /// File holding the persisted session
    #[arg(long, env = "ZIPSESSION_STATE", default_value = ".zipsession.json", global = true)]
    pub state_file: PathBuf,

    /// Directory that receives built archives and extracted entries
    #[arg(long, env = "ZIPSESSION_OUT", default_value = ".", global = true)]
    pub out_dir: PathBuf,

    /// Seconds between periodic flushes in shell mode
    #[arg(long, default_value_t = 5, global = true)]
    pub flush_interval_secs: u64,

    /// Archives larger than this are not persisted with their bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024, global = true)]
    pub max_persisted_bytes: usize,

    /// Quiet mode
    #[arg(short = 'q', global = true)]
    pub quiet: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the current session
    Status,

    /// Stage files (paths or HTTP URLs) for the next build
    Add {
        #[arg(required = true, value_name = "FILE")]
        sources: Vec<String>,
    },

    /// Remove staged files by name
    Unstage {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Set the name of the archive to build
    Name { name: String },

    /// Set the compression preset
    Preset {
        #[arg(value_enum)]
        preset: CompressionPreset,
    },

    /// Build the staged files into a ZIP archive
    Build {
        /// Encrypt entries with a passphrase
        #[arg(long)]
        password: Option<String>,

        /// Write the archive to stdout
        #[arg(short = 'p')]
        pipe: bool,
    },

    /// Open an archive (path or HTTP URL) for browsing
    Open {
        #[arg(value_name = "FILE")]
        source: String,

        /// Passphrase for encrypted entries
        #[arg(long)]
        password: Option<String>,
    },

    /// Supply the passphrase of an encrypted archive
    Unlock { password: String },

    /// List archive entries
    Ls {
        /// List verbosely
        #[arg(short = 'v')]
        verbose: bool,

        /// Only entries matching this pattern
        pattern: Option<String>,
    },

    /// Edit the download queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Extract every queued entry
    Extract {
        /// Extract files to pipe, no messages
        #[arg(short = 'p')]
        pipe: bool,
    },

    /// Open one entry: print it if it is viewable, otherwise save it
    Show { path: String },

    /// Write one entry's bytes to stdout
    Cat { path: String },

    /// Switch the active view
    View {
        #[arg(value_enum)]
        view: View,
    },

    /// Discard the session
    Clear,

    /// Keep the session open and read commands from stdin
    Shell,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    /// Queue entries; `*` and `?` patterns are expanded
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Unqueue entries; `*` and `?` patterns are expanded
    Remove {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Empty the queue
    Clear,

    /// Queue every file of the archive
    All,
}

/// One line typed in shell mode.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Status)
    }
}

/// Returns `true` if the pattern contains `*` or `?` wildcards.
pub fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Split a shell line into words, honouring single and double quotes.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
