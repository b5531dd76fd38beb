use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use qr_core::{
    worker_in_folder, LogLevel, QualificationRunOptions, QualificationRunner, DEFAULT_REPORT_NAME,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn cli() -> Command {
    Command::new("qualification-runner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs every project of a qualification plan and builds the report configuration")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Qualification plan file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Output folder"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Delete the content of a non-empty output folder"),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .default_value(DEFAULT_REPORT_NAME)
                .help("Report configuration file name, without extension"),
        )
        .arg(
            Arg::new("pksim")
                .short('p')
                .long("pksim")
                .value_parser(value_parser!(PathBuf))
                .help("Installation folder of the simulation worker"),
        )
        .arg(
            Arg::new("worker")
                .long("worker")
                .value_parser(value_parser!(PathBuf))
                .help("Worker executable; overrides --pksim"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("Information")
                .value_parser(value_parser!(LogLevel))
                .help("Debug, Information, Warning or Error"),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .long("log")
                .value_parser(value_parser!(PathBuf))
                .help("Log file shared by the runner and every worker"),
        )
        .arg(
            Arg::new("max-parallel")
                .long("max-parallel")
                .value_parser(value_parser!(usize))
                .help("Maximum number of concurrently running workers"),
        )
        .arg(
            Arg::new("preserve-temp")
                .long("preserve-temp")
                .action(ArgAction::SetTrue)
                .help("Keep existing project temp folders"),
        )
}

fn run_options(matches: &ArgMatches) -> Result<QualificationRunOptions> {
    let Some(input) = matches.get_one::<PathBuf>("input") else {
        bail!("missing --input");
    };
    let Some(output) = matches.get_one::<PathBuf>("output") else {
        bail!("missing --output");
    };
    let worker = match (
        matches.get_one::<PathBuf>("worker"),
        matches.get_one::<PathBuf>("pksim"),
    ) {
        (Some(worker), _) => worker.clone(),
        (None, Some(folder)) => worker_in_folder(folder),
        (None, None) => bail!("either --pksim or --worker is required"),
    };

    let mut options = QualificationRunOptions::new(input, output, worker)
        .with_force(matches.get_flag("force"))
        .with_preserve_temp(matches.get_flag("preserve-temp"));
    if let Some(name) = matches.get_one::<String>("name") {
        options = options.with_report_name(name);
    }
    if let Some(level) = matches.get_one::<LogLevel>("log-level") {
        options = options.with_log_level(*level);
    }
    if let Some(log) = matches.get_one::<PathBuf>("log") {
        options = options.with_shared_log_file(log);
    }
    if let Some(max) = matches.get_one::<usize>("max-parallel") {
        options = options.with_max_concurrent_projects(*max);
    }
    Ok(options)
}

/// Console output plus an optional plain-text copy in `log_file`
///
/// `RUST_LOG` overrides `level`.
fn init_tracing(level: LogLevel, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_tracing_level().as_str().to_lowercase()));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let folder = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(folder)
                .with_context(|| format!("cannot create log folder {}", folder.display()))?;
            let Some(file_name) = path.file_name() else {
                bail!("invalid log file {}", path.display());
            };
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(folder, file_name));
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("cannot install tracing subscriber")?;
    Ok(guard)
}

async fn run(options: QualificationRunOptions) -> Result<PathBuf> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping running workers");
                cancel.cancel();
            }
        });
    }

    let report = QualificationRunner::new(options).run_batch(&cancel).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let options = match run_options(&matches) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_tracing(options.log_level, options.shared_log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(options).await {
        Ok(report) => {
            info!(report = %report.display(), "Report configuration written");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<QualificationRunOptions> {
        let matches = cli().try_get_matches_from(
            std::iter::once("qualification-runner").chain(args.iter().copied()),
        )?;
        run_options(&matches)
    }

    #[test]
    fn defaults() {
        let options = parse(&["-i", "plan.json", "-o", "out", "-p", "/opt/pksim"]).unwrap();
        assert_eq!(options.configuration_file, Path::new("plan.json"));
        assert_eq!(options.output_folder, Path::new("out"));
        assert_eq!(options.worker_path, worker_in_folder("/opt/pksim"));
        assert_eq!(options.report_name, DEFAULT_REPORT_NAME);
        assert_eq!(options.log_level, LogLevel::Information);
        assert!(!options.force);
        assert_eq!(options.shared_log_file, None);
    }

    #[test]
    fn explicit_worker_wins_over_installation_folder() {
        let options = parse(&[
            "-i", "plan.json", "-o", "out", "-p", "/opt/pksim", "--worker", "/usr/bin/worker",
            "-f", "-n", "report", "--log-level", "Debug", "-l", "runner.log",
            "--max-parallel", "3",
        ])
        .unwrap();
        assert_eq!(options.worker_path, Path::new("/usr/bin/worker"));
        assert!(options.force);
        assert_eq!(options.report_name, "report");
        assert_eq!(options.log_level, LogLevel::Debug);
        assert_eq!(options.shared_log_file.as_deref(), Some(Path::new("runner.log")));
        assert_eq!(options.max_concurrent_projects, 3);
    }

    #[test]
    fn worker_location_is_required() {
        let err = parse(&["-i", "plan.json", "-o", "out"]).unwrap_err();
        assert!(err.to_string().contains("--pksim"));
    }

    #[test]
    fn input_is_required() {
        assert!(parse(&["-o", "out", "-p", "/opt/pksim"]).is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(parse(&["-i", "p.json", "-o", "out", "-p", "x", "--log-level", "Verbose"]).is_err());
    }
}
