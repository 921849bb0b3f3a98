use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deltatest::config::{Config, FixBudget};
use deltatest::error::Error;
use deltatest::git::{self, GitSource};
use deltatest::llm::backend::{build_provider, CompletionOptions};
use deltatest::llm::orchestrator::LlmGenerator;
use deltatest::logger::LogLevel;
use deltatest::testgen::file::{ContentSource, LocalFs};
use deltatest::testgen::format::{CommandFormatter, Formatter};
use deltatest::testgen::generator::{FixRequest, GenerateRequest, TestGenerator};
use deltatest::testgen::runner::{CommandRunner, TestRunner};
use deltatest::testgen::typecheck::{TscChecker, TypeChecker};
use deltatest::{Collaborators, Pipeline, RunContext, RunSummary};

#[derive(Parser, Debug)]
#[command(
    name = "deltatest",
    version,
    about = "Generate, validate and repair unit tests for the functions a diff touched."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Generate tests for a diff, write them, run and repair them
    Run(RunArgs),
    /// Print the targets a diff would produce, as JSON
    Targets(DiffArgs),
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Unified diff file (`-` for stdin). Defaults to `git diff`.
    #[arg(long)]
    diff: Option<PathBuf>,

    /// Diff the working tree against this ref
    #[arg(long, conflicts_with = "diff")]
    base: Option<String>,

    /// Read sources and existing tests at this ref instead of the working tree
    #[arg(long)]
    at: Option<String>,

    /// Repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Target every exported declaration of each changed file
    #[arg(long)]
    all_exports: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    diff: DiffArgs,

    /// Generate and merge, but write nothing and run nothing
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    max_targets: Option<usize>,

    /// Number of repair rounds, or `inf`
    #[arg(long, value_parser = parse_budget)]
    max_fix_attempts: Option<FixBudget>,

    #[arg(long)]
    coverage: bool,

    /// Scaffold `it.todo` cases instead of full tests
    #[arg(long)]
    scaffold: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn parse_budget(s: &str) -> Result<FixBudget, String> {
    FixBudget::parse(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("DELTATEST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed CLI arguments");

    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        CliCommand::Run(args) => run(args),
        CliCommand::Targets(args) => targets(args),
    }
}

/* ============================================================
   Commands
   ============================================================ */

fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut cfg = load_config(&args.diff)?;
    cfg.dry_run |= args.dry_run;
    cfg.coverage |= args.coverage;
    cfg.scaffold_only |= args.scaffold;
    if let Some(n) = args.max_targets {
        cfg.max_targets = n;
    }
    if let Some(b) = args.max_fix_attempts {
        cfg.max_fix_attempts = b;
    }
    cfg.validate()?;

    let root = args.diff.repo.clone();
    let diff = read_diff(&args.diff)?;

    let provider = build_provider(&cfg.llm).context("LLM backend")?;
    let generator = LlmGenerator::new(
        provider,
        CompletionOptions {
            max_tokens: cfg.llm.max_tokens,
            temperature: None,
        },
    );

    let files = content_source(&root, args.diff.at.as_deref());
    let runner = cfg
        .runner
        .enabled
        .then(|| CommandRunner::new(&root, &cfg.runner));
    let checker = cfg
        .typecheck
        .enabled
        .then(|| TscChecker::new(&root, cfg.typecheck.command.clone()));
    let formatter = cfg
        .format_command
        .as_ref()
        .map(|c| CommandFormatter::new(&root, c.clone()));

    let ctx = RunContext::new(cfg, &root);
    let mut pipeline = Pipeline::new(
        ctx,
        Collaborators {
            generator: &generator,
            files: files.as_ref(),
            runner: runner.as_ref().map(|r| r as &dyn TestRunner),
            type_checker: checker.as_ref().map(|c| c as &dyn TypeChecker),
            formatter: formatter.as_ref().map(|f| f as &dyn Formatter),
        },
    );

    let summary = match pipeline.run(&diff) {
        Ok(s) => s,
        Err(Error::MissingRunner) => {
            bail!("the fix loop and coverage need a test runner; enable [runner] or pass --max-fix-attempts 0")
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    let log = &pipeline.context().log;
    tracing::debug!(
        warnings = log.count(LogLevel::Warn),
        errors = log.count(LogLevel::Error),
        "run log"
    );

    Ok(if summary.tests_failed > 0 || !summary.errors.is_empty() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn targets(args: DiffArgs) -> anyhow::Result<ExitCode> {
    let mut cfg = load_config(&args)?;
    cfg.validate()?;
    let root = args.repo.clone();
    let diff = read_diff(&args)?;
    let files = content_source(&root, args.at.as_deref());

    let mut pipeline = Pipeline::new(
        RunContext::new(cfg, &root),
        Collaborators {
            generator: &NoGenerator,
            files: files.as_ref(),
            runner: None,
            type_checker: None,
            formatter: None,
        },
    );

    let mut summary = RunSummary::default();
    let found = pipeline.targets(&diff, &mut summary);
    println!("{}", serde_json::to_string_pretty(&found)?);

    for e in &summary.errors {
        tracing::warn!("{}: {}", e.subject, e.message);
    }
    Ok(ExitCode::SUCCESS)
}

/* ============================================================
   Helpers
   ============================================================ */

/// Stands in for the backend where no generation happens.
struct NoGenerator;

impl TestGenerator for NoGenerator {
    fn generate(&self, _: &GenerateRequest<'_>) -> deltatest::Result<String> {
        Err(Error::MissingGenerator)
    }

    fn fix(&self, _: &FixRequest<'_>) -> deltatest::Result<String> {
        Err(Error::MissingGenerator)
    }
}

fn load_config(args: &DiffArgs) -> anyhow::Result<Config> {
    let mut cfg = Config::load(&args.repo, args.config.as_deref())?;
    cfg.extraction.test_all_exports |= args.all_exports;
    Ok(cfg)
}

fn read_diff(args: &DiffArgs) -> anyhow::Result<String> {
    match &args.diff {
        Some(p) if p.as_os_str() == "-" => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s).context("reading diff from stdin")?;
            Ok(s)
        }
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display())),
        None => {
            if !git::is_git_repo(&args.repo) {
                bail!("{} is not a git repository; pass --diff", args.repo.display());
            }
            Ok(git::diff(&args.repo, args.base.as_deref())?)
        }
    }
}

fn content_source(root: &Path, at: Option<&str>) -> Box<dyn ContentSource> {
    match at {
        Some(reference) => Box::new(GitSource::new(root, reference)),
        None => Box::new(LocalFs::new(root)),
    }
}

fn print_summary(s: &RunSummary) {
    println!("run {}", s.run_id);
    println!(
        "targets: {} processed, {} dropped; tests generated: {}",
        s.targets_processed, s.targets_dropped, s.tests_generated
    );
    println!(
        "tests: {} passed, {} failed, {} total",
        s.tests_passed, s.tests_failed, s.tests_total
    );
    for (path, state) in &s.file_states {
        println!("  {path}: {state:?}");
    }
    if let Some(c) = &s.coverage_report {
        println!(
            "coverage: lines {:.2}%, statements {:.2}%, functions {:.2}%, branches {:.2}%",
            c.lines.pct, c.statements.pct, c.functions.pct, c.branches.pct
        );
    }
    if let Some(d) = &s.coverage_delta {
        println!(
            "coverage delta: lines {:+.2}, statements {:+.2}, functions {:+.2}, branches {:+.2}",
            d.lines, d.statements, d.functions, d.branches
        );
    }
    for e in &s.errors {
        println!("error: {}: {}", e.subject, e.message);
    }
}
