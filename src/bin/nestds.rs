// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use nestds::{
    path::default_config_path, AnnotateRequest, DiffEngine, DiffRequest, EngineConfig,
    Git2Backend, IgnoreSubdatasets, PathAnnotator, PathRecord, RepoBackend, ResultStatus,
    RevisionSpec, UntrackedMode,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{fs, path::PathBuf, process::exit};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  nestds [options] <nestds-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file instead of the default one.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Print records as JSON lines.
    #[arg(short, long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config = load_config(self.config)?;
        let backend = Git2Backend::new(config.git.clone());
        let output = Output { json: self.json };

        match self.command {
            Command::Annotate(opts) => run_annotate(opts, &backend, &config, output),
            Command::Diff(opts) => run_diff(opts, &backend, &config, output),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Annotate paths with dataset ownership, type, and state.
    #[command(override_usage = "nestds annotate [options] [<path>]...")]
    Annotate(AnnotateOptions),

    /// Compare content state of a dataset.
    #[command(override_usage = "nestds diff [options] [<path>]...")]
    Diff(DiffOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AnnotateOptions {
    /// Paths to annotate.
    #[arg(value_name = "path")]
    pub paths: Vec<String>,

    /// Reference dataset to anchor paths to.
    #[arg(short, long, value_name = "dataset")]
    pub dataset: Option<PathBuf>,

    /// Recurse into subdatasets.
    #[arg(short, long)]
    pub recursive: bool,

    /// Limit recursion depth.
    #[arg(short = 'R', long, value_name = "levels")]
    pub recursion_limit: Option<i32>,

    /// Only report what changed since revision.
    #[arg(short, long, value_name = "revision")]
    pub modified: Option<String>,

    /// Only report uncommitted changes.
    #[arg(short, long, conflicts_with = "modified")]
    pub uncommitted: bool,

    /// Result status for paths that do not exist.
    #[arg(long, value_name = "status", conflicts_with = "strict")]
    pub unavailable_status: Option<ResultStatus>,

    /// Treat missing paths as impossible to process.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Constrain comparison to paths.
    #[arg(value_name = "path")]
    pub paths: Vec<PathBuf>,

    /// Dataset to compare, or any path inside of it.
    #[arg(short, long, value_name = "dataset", default_value = ".")]
    pub dataset: PathBuf,

    /// Revision to compare from.
    #[arg(short, long, value_name = "revision", default_value = "HEAD")]
    pub from: String,

    /// Revision to compare to instead of the working tree.
    #[arg(short, long, value_name = "revision")]
    pub to: Option<String>,

    /// Compare against the index instead of the working tree.
    #[arg(short, long, conflicts_with = "to")]
    pub staged: bool,

    /// Granularity of untracked content.
    #[arg(short, long, value_enum, default_value_t = UntrackedArg::Normal)]
    pub untracked: UntrackedArg,

    /// Subdataset state to ignore.
    #[arg(short, long, value_enum, default_value_t = IgnoreArg::None)]
    pub ignore_subdatasets: IgnoreArg,

    /// Also report unchanged content.
    #[arg(short, long)]
    pub clean: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UntrackedArg {
    No,
    Normal,
    All,
}

impl From<UntrackedArg> for UntrackedMode {
    fn from(arg: UntrackedArg) -> Self {
        match arg {
            UntrackedArg::No => Self::No,
            UntrackedArg::Normal => Self::Normal,
            UntrackedArg::All => Self::All,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IgnoreArg {
    None,
    Untracked,
    Dirty,
    All,
}

impl From<IgnoreArg> for IgnoreSubdatasets {
    fn from(arg: IgnoreArg) -> Self {
        match arg {
            IgnoreArg::None => Self::None,
            IgnoreArg::Untracked => Self::Untracked,
            IgnoreArg::Dirty => Self::Dirty,
            IgnoreArg::All => Self::All,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, record: &PathRecord) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{record}");
        }

        Ok(())
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    let (path, explicit) = match path {
        Some(path) => (path, true),
        None => (default_config_path()?, false),
    };

    match fs::read_to_string(&path) {
        Ok(data) => Ok(data
            .parse::<EngineConfig>()
            .with_context(|| format!("invalid configuration file {:?}", path.display()))?),
        Err(error) if !explicit && error.kind() == std::io::ErrorKind::NotFound => {
            debug!("no configuration at {:?}, use defaults", path.display());
            Ok(EngineConfig::default())
        }
        Err(error) => {
            Err(error).with_context(|| format!("cannot read configuration {:?}", path.display()))
        }
    }
}

fn run_annotate(
    opts: AnnotateOptions,
    backend: &Git2Backend,
    config: &EngineConfig,
    output: Output,
) -> Result<()> {
    let unavailable = opts
        .unavailable_status
        .or(opts.strict.then_some(ResultStatus::Impossible));
    let mut request = AnnotateRequest::new(opts.paths, unavailable)
        .recursive(opts.recursive, opts.recursion_limit);

    if let Some(dataset) = opts.dataset {
        request = request.refds(nestds::path::resolve_against_cwd(dataset)?);
    }

    if opts.uncommitted {
        request = request.modified(RevisionSpec::Uncommitted);
    } else if let Some(since) = opts.modified {
        request = request.modified(RevisionSpec::Since(since));
    }

    let mut failed = false;
    for record in PathAnnotator::new(backend, config).annotate(request) {
        let record = record?;
        failed |= record.status.is_some_and(|status| status.is_failure());
        output.emit(&record)?;
    }

    if failed {
        anyhow::bail!("some paths could not be annotated");
    }

    Ok(())
}

fn run_diff(
    opts: DiffOptions,
    backend: &Git2Backend,
    config: &EngineConfig,
    output: Output,
) -> Result<()> {
    let location = nestds::path::resolve_against_cwd(&opts.dataset)?;
    let dataset = backend
        .get_toppath(&location)?
        .with_context(|| format!("{:?} is not part of any dataset", location.display()))?;
    let mut request = DiffRequest::new(opts.from)
        .untracked(opts.untracked.into())
        .ignore_subdatasets(opts.ignore_subdatasets.into())
        .staged(opts.staged)
        .report_clean(opts.clean);

    if let Some(to) = opts.to {
        request = request.to(to);
    }

    if !opts.paths.is_empty() {
        let paths = opts
            .paths
            .iter()
            .map(nestds::path::resolve_against_cwd)
            .collect::<Result<Vec<_>, _>>()?;
        request = request.paths(paths);
    }

    let outcome = DiffEngine::new(backend, config).diff(&dataset, &request)?;
    let mut failed = false;
    for record in outcome.into_records(&dataset, Some(&dataset)) {
        failed |= record.status.is_some_and(|status| status.is_failure());
        output.emit(&record)?;
    }

    if failed {
        anyhow::bail!("comparison of {:?} was impossible", dataset.display());
    }

    Ok(())
}
