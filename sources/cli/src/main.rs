use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::Result;
use args::Cli;
use clap::Parser;
use tracing::{error, info, Level};
use weaver::{ClassPathProvider, Outcome, Weaver};

mod args;

fn collect_class_files(root: &Path, into: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_class_files(&path, into)?;
        } else if path.extension().map(|e| e == "class").unwrap_or(false) {
            into.push(path);
        }
    }
    Ok(())
}

struct Tally {
    transformed: usize,
    skipped: usize,
    already: usize,
    failed: usize,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut resolution_roots = cli.roots.clone();
    resolution_roots.extend(cli.class_path.clone());
    let weaver = Weaver::new(Box::new(ClassPathProvider::new(resolution_roots)));

    let mut files = Vec::new();
    for root in cli.roots.iter() {
        if let Err(err) = collect_class_files(root, &mut files) {
            error!("could not scan {}: {}", root.display(), err);
            exit(2);
        }
    }
    files.sort();

    let mut tally = Tally {
        transformed: 0,
        skipped: 0,
        already: 0,
        failed: 0,
    };

    for file in files.iter() {
        let outcome = if cli.dry_run {
            fs::read(file)
                .map_err(|e| weaver::WeaveError::Input(e.into()))
                .and_then(|bytes| weaver.transform(&bytes))
        } else {
            weaver.transform_path(file)
        };

        match outcome {
            Ok(Outcome::Transformed(_)) => {
                info!("woven      {}", file.display());
                tally.transformed += 1;
            }
            Ok(Outcome::AlreadyTransformed) => {
                info!("up-to-date {}", file.display());
                tally.already += 1;
            }
            Ok(Outcome::NoFlowMethods) => {
                tally.skipped += 1;
            }
            Err(err) => {
                error!("failed     {}: {}", file.display(), err);
                tally.failed += 1;
            }
        }
    }

    info!(
        "{} woven, {} already woven, {} without flow methods, {} failed{}",
        tally.transformed,
        tally.already,
        tally.skipped,
        tally.failed,
        if cli.dry_run { " (dry run)" } else { "" }
    );

    if tally.failed > 0 {
        exit(1);
    }
}
