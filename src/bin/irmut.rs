use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use irmut::diagnostics::{Diagnostics, IdeDiagnosticsKind};
use irmut::filters::{
    DistanceFilter, FilePathFilter, Filters, FunctionNameFilter, NoDebugInfoFilter,
};
use irmut::mutations_finder::MutationsFinder;
use irmut::mutators::Mutators;
use irmut::program::Program;
use irmut::report::{ReportFormat, RunSummary, render_report};
use irmut::toolchain::Toolchain;
use irmut::{Configuration, Driver};

#[derive(Debug, Parser)]
#[command(name = "irmut")]
#[command(about = "Mutation testing for IR modules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the mutation pipeline over a set of JSON modules.
    Run(RunArgs),
    /// Compile one JSON module into an object file (usable with --dylib or --object).
    Compile {
        /// Module to compile.
        module: PathBuf,
        /// Object file to write.
        #[arg(long)]
        output: PathBuf,
    },
    /// List mutation operators.
    Mutators,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// JSON modules making up the program.
    #[arg(required = true)]
    modules: Vec<PathBuf>,
    /// JSON configuration file; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// General worker pool size.
    #[arg(long)]
    workers: Option<usize>,
    /// Coverage discovery pool size.
    #[arg(long)]
    test_workers: Option<usize>,
    /// Mutant execution pool size.
    #[arg(long)]
    mutant_workers: Option<usize>,
    /// Skip compilation and execution of mutants.
    #[arg(long)]
    dry_run: bool,
    /// Operator ids or groups (comma separated). Defaults to the `default` group.
    #[arg(long, value_delimiter = ',')]
    mutators: Vec<String>,
    /// Skip functions whose name contains this fragment.
    #[arg(long)]
    exclude_function: Vec<String>,
    /// Skip mutation points whose file contains this fragment.
    #[arg(long)]
    exclude_path: Vec<String>,
    /// Only keep mutation points whose file contains this fragment.
    #[arg(long)]
    include_path: Vec<String>,
    /// Skip functions reached only deeper than this call distance.
    #[arg(long)]
    max_distance: Option<u32>,
    /// Skip functions, instructions and points without a source location.
    #[arg(long)]
    require_debug_info: bool,
    /// Emit compiler-style diagnostics for these mutants.
    #[arg(long, value_enum)]
    ide_reporter: Option<IdeReporter>,
    /// Per-test wall-clock limit in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Object files to preload as dynamic libraries.
    #[arg(long)]
    dylib: Vec<PathBuf>,
    /// Precompiled object files added to every link set.
    #[arg(long)]
    object: Vec<PathBuf>,
    /// Directory caching compiled objects.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Report format.
    #[arg(long, value_enum, default_value = "md")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Markdown
    Md,
    /// JSON
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IdeReporter {
    /// Surviving mutants only.
    Survived,
    /// Killed mutants only.
    Killed,
    /// Every mutant.
    All,
}

fn make_config(args: &RunArgs) -> Result<Configuration> {
    let mut config = match &args.config {
        Some(path) => Configuration::from_json_file(path)?,
        None => Configuration::default(),
    };
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(workers) = args.test_workers {
        config = config.with_test_execution_workers(workers);
    }
    if let Some(workers) = args.mutant_workers {
        config = config.with_mutant_execution_workers(workers);
    }
    if args.dry_run {
        config = config.with_dry_run(true);
    }
    if let Some(reporter) = args.ide_reporter {
        config = config.with_diagnostics(match reporter {
            IdeReporter::Survived => IdeDiagnosticsKind::Survived,
            IdeReporter::Killed => IdeDiagnosticsKind::Killed,
            IdeReporter::All => IdeDiagnosticsKind::All,
        });
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    if let Some(cache_dir) = &args.cache_dir {
        config = config.with_cache_directory(cache_dir.clone());
    }
    Ok(config)
}

fn make_filters(args: &RunArgs) -> Filters {
    let mut filters = Filters::new();
    if args.require_debug_info {
        filters = filters
            .with_function_filter(NoDebugInfoFilter)
            .with_instruction_filter(NoDebugInfoFilter)
            .with_mutation_filter(NoDebugInfoFilter);
    }
    if !args.exclude_function.is_empty() {
        filters = filters.with_function_filter(FunctionNameFilter::excluding(
            args.exclude_function.iter().cloned(),
        ));
    }
    if let Some(max) = args.max_distance {
        filters = filters.with_function_filter(DistanceFilter::new(max));
    }
    if !args.exclude_path.is_empty() || !args.include_path.is_empty() {
        let mut paths = FilePathFilter::new();
        for fragment in &args.include_path {
            paths = paths.include(fragment.clone());
        }
        for fragment in &args.exclude_path {
            paths = paths.exclude(fragment.clone());
        }
        filters = filters.with_mutation_filter(paths);
    }
    filters
}

fn run(args: RunArgs) -> Result<()> {
    let config = make_config(&args)?;
    let finder = MutationsFinder::from_ids(args.mutators.as_slice())?;
    let program = Program::from_module_paths(args.modules.as_slice())?
        .with_dynamic_libraries(args.dylib.clone())
        .load_precompiled_objects(args.object.as_slice())?;

    let diagnostics = Diagnostics::new();
    let result = Driver::new(program, &config, &diagnostics)
        .with_filters(make_filters(&args))
        .with_mutations_finder(finder)
        .run()?;

    let format = match args.format {
        OutputFormat::Md => ReportFormat::Markdown,
        OutputFormat::Json => ReportFormat::Json,
    };
    println!("{}", render_report(&result, format));

    let summary = RunSummary::from_result(&result);
    eprintln!(
        "summary: killed={}, survived={}, mutation_score={:.2}%",
        summary.killed, summary.survived, summary.mutation_score
    );
    if diagnostics.error_count() > 0 {
        bail!("{} stage errors reported", diagnostics.error_count());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("irmut=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args)?,
        Command::Compile { module, output } => {
            let program = Program::from_module_paths(&[&module])?;
            let bitcode = program
                .bitcode()
                .first()
                .with_context(|| format!("no module loaded from {}", module.display()))?;
            let object = Toolchain::default().compile(bitcode, None, &Diagnostics::new())?;
            object.write_to(&output)?;
            println!("wrote {} ({} functions)", output.display(), object.functions.len());
        }
        Command::Mutators => {
            for mutator in Mutators::all() {
                println!("{}\t{}", mutator.id(), mutator.description());
            }
        }
    }
    Ok(())
}
