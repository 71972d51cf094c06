use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wdl2cwl::config::DEFAULT_LOG_FILTER;
use wdl2cwl::diagnostic::has_errors;
use wdl2cwl::{BatchOptions, Config, ConvertError, Converter, Diagnostic, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "wdl2cwl", version)]
#[command(about = "Convert WDL workflows to CWL")]
struct Cli {
    /// Debug logging for this crate
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert one file; the destination extension picks the target
    Convert(ConvertArgs),
    /// Convert every matching file under a directory
    ConvertDir(ConvertDirArgs),
    /// Print the resolved IR as JSON
    Parse(ParseArgs),
    /// Print call dependencies and parallelism as JSON
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args, Debug)]
struct WriteArgs {
    /// Write output even when validation reports errors
    #[arg(long, action = ArgAction::SetTrue)]
    best_effort: bool,
    /// yaml or json, when the destination extension does not decide it
    #[arg(long)]
    format: Option<OutputFormat>,
    /// Write string-keyed maps as Any instead of failing
    #[arg(long, action = ArgAction::SetTrue)]
    degrade_maps: bool,
    /// Drop runtime keys without a CWL field instead of keeping them as hints
    #[arg(long = "no-runtime-hints", action = ArgAction::SetTrue)]
    no_runtime_hints: bool,
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    source: PathBuf,
    destination: PathBuf,
    /// Report every diagnostic and fail on any error
    #[arg(long, action = ArgAction::SetTrue)]
    validate: bool,
    #[command(flatten)]
    write: WriteArgs,
}

#[derive(clap::Args, Debug)]
struct ConvertDirArgs {
    source_dir: PathBuf,
    destination_dir: PathBuf,
    #[arg(long, default_value = "*.wdl")]
    pattern: String,
    #[arg(long = "no-recursive", action = ArgAction::SetTrue)]
    no_recursive: bool,
    #[arg(long, default_value = "cwl")]
    target: String,
    /// Concurrent conversions; defaults to WDL2CWL_JOBS
    #[arg(long)]
    jobs: Option<usize>,
    /// Also write the batch report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    #[command(flatten)]
    write: WriteArgs,
}

#[derive(clap::Args, Debug)]
struct ParseArgs {
    source: PathBuf,
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    source: PathBuf,
    /// Print the Graphviz DOT rendering instead of JSON
    #[arg(long, action = ArgAction::SetTrue)]
    dot: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_logging(&config, cli.verbose);

    let converter = Converter::from_config(&config);
    let result = match cli.command {
        Commands::Convert(args) => convert_command(converter, args).await,
        Commands::ConvertDir(args) => convert_dir_command(converter, &config, args).await,
        Commands::Parse(args) => parse_command(converter, args).await,
        Commands::Analyze(args) => analyze_command(converter, args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("wdl2cwl=debug")
    } else {
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn with_write_args(converter: Converter, args: &WriteArgs) -> Converter {
    let mut options = converter.writer_options().clone();
    options.best_effort = args.best_effort;
    options.degrade_maps = args.degrade_maps;
    options.emit_runtime_hints = !args.no_runtime_hints;
    if let Some(format) = args.format {
        options.format = format;
    }
    converter.with_writer_options(options)
}

fn print_diagnostics<'a>(diagnostics: impl IntoIterator<Item = &'a Diagnostic>) {
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic);
    }
}

async fn convert_command(converter: Converter, args: ConvertArgs) -> Result<ExitCode, ConvertError> {
    let converter = with_write_args(converter, &args.write);

    if args.validate {
        let (valid, diagnostics) = converter.validate_file(&args.source).await?;
        print_diagnostics(&diagnostics);
        if !valid && !args.write.best_effort {
            return Ok(ExitCode::from(1));
        }
    }

    let conversion = converter.convert_file(&args.source, &args.destination).await?;
    if !args.validate {
        print_diagnostics(conversion.warnings());
    }
    info!(destination = %args.destination.display(), "wrote output");

    if args.validate && has_errors(&conversion.diagnostics) {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

async fn convert_dir_command(
    converter: Converter,
    config: &Config,
    args: ConvertDirArgs,
) -> Result<ExitCode, ConvertError> {
    let converter = with_write_args(converter, &args.write);
    let options = BatchOptions {
        pattern: args.pattern,
        recursive: !args.no_recursive,
        target: args.target,
        jobs: args.jobs.unwrap_or(config.jobs),
    };
    let report = converter
        .convert_dir(&args.source_dir, &args.destination_dir, &options)
        .await?;

    for outcome in &report.outcomes {
        match outcome {
            wdl2cwl::FileOutcome::Converted {
                source,
                destination,
                warnings,
            } => println!(
                "ok     {} -> {} ({} warnings)",
                source.display(),
                destination.display(),
                warnings
            ),
            wdl2cwl::FileOutcome::Failed { source, error } => {
                println!("failed {}: {}", source.display(), error)
            }
        }
    }
    println!(
        "{} converted, {} failed",
        report.succeeded(),
        report.failed()
    );

    if let Some(path) = &args.report {
        tokio::fs::write(path, report.to_json()?)
            .await
            .map_err(|e| ConvertError::io(path, e))?;
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn parse_command(converter: Converter, args: ParseArgs) -> Result<ExitCode, ConvertError> {
    let (workflow, diagnostics) = converter.parse_file(&args.source).await?;
    print_diagnostics(&diagnostics);
    println!("{}", serde_json::to_string_pretty(&workflow)?);
    Ok(if has_errors(&diagnostics) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

async fn analyze_command(converter: Converter, args: AnalyzeArgs) -> Result<ExitCode, ConvertError> {
    let report = converter.analyze_file(&args.source).await?;
    if args.dot {
        print!("{}", report.dot);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(if report.has_cycles {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
