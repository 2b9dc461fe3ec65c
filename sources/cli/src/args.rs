use std::path::PathBuf;

use clap::Parser;

/// Weave flow methods in compiled class files.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about)]
pub struct Cli {
    /// Directories to scan for .class files. Each is also a class path root
    /// for resolving referenced classes.
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,

    /// Extra class path roots used for resolution only; classes under these
    /// are never rewritten.
    #[arg(long = "classpath", short = 'p')]
    pub class_path: Vec<PathBuf>,

    /// Report what would change without writing anything back.
    #[arg(long)]
    pub dry_run: bool,

    /// Log progress for every file, not only summaries.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
