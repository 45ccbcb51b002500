use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

use orbit::config::{
    event_handler, overwrite, set_from_device, set_to_device, target, wildcard_source, with_hash,
    ConfigFile, EngineOptions,
};
use orbit::{Engine, ReportCollector};

fn main() -> Result<()> {
    let matches = Command::new("orbit")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fan-out file copy: mirror source trees onto multiple destinations in one pass")
        .arg(
            Arg::new("source")
                .value_name("SOURCE")
                .help("source file or directory; may be given more than once")
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("DIR")
                .help("destination directory; may be given more than once")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-target")
                .long("no-target")
                .help("do not treat the last source argument as an implicit target")
                .action(ArgAction::SetTrue)
                .conflicts_with("target"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("load defaults from a TOML config file instead of the usual search path"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_name("N")
                .help("worker thread count per side (overridden to 1 by --from-linear/--to-linear)"),
        )
        .arg(
            Arg::new("no-overwrite")
                .short('n')
                .long("no-overwrite")
                .help("fail rather than overwrite an existing destination file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("hash")
                .long("hash")
                .help("compute a SHA-256 digest of each file while copying")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("progress")
                .short('p')
                .long("progress")
                .help("display a progress bar")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("PATH")
                .help("write a JSON report of every file and error to PATH"),
        )
        .arg(
            Arg::new("report-indent")
                .long("report-indent")
                .help("pretty-print the JSON report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("from-linear")
                .long("from-linear")
                .help("treat the source device as linear-access, e.g. a tape drive")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("to-linear")
                .long("to-linear")
                .help("treat a destination device as linear-access, e.g. a tape drive")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("enable debug-level logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("PATH")
                .help("write structured JSON logs to PATH instead of stdout"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let log_file = matches.get_one::<String>("log-file").map(PathBuf::from);
    orbit::logging::init_logging(verbose, log_file.as_deref())
        .context("failed to initialize logging")?;

    let mut sources: Vec<PathBuf> = matches
        .get_many::<String>("source")
        .unwrap()
        .map(PathBuf::from)
        .collect();
    let mut targets: Vec<PathBuf> = matches
        .get_many::<String>("target")
        .map(|vs| vs.map(PathBuf::from).collect())
        .unwrap_or_default();

    // No --target given: the last positional source doubles as the sole
    // target, unless --no-target says to leave targets empty (engine
    // start-up then rejects the run for having no destination).
    if targets.is_empty() && !matches.get_flag("no-target") {
        if let Some(implicit) = sources.pop() {
            targets.push(implicit);
        }
    }

    let report_path = matches.get_one::<String>("report").map(PathBuf::from);
    let report_indent = matches.get_flag("report-indent");
    let with_hash_flag = matches.get_flag("hash") || report_path.is_some();

    let config_file = match matches.get_one::<String>("config") {
        Some(path) => ConfigFile::load(std::path::Path::new(path))
            .with_context(|| format!("failed to load config file {path}"))?,
        None => ConfigFile::load_with_fallback(),
    };

    let threads = matches
        .get_one::<String>("threads")
        .map(|s| s.parse::<usize>())
        .transpose()
        .context("--threads must be a positive integer")?;

    let mut opt_list = vec![
        wildcard_source(sources),
        target(targets),
        overwrite(!matches.get_flag("no-overwrite")),
        with_hash(with_hash_flag),
        set_from_device(matches.get_flag("from-linear"), threads),
        set_to_device(matches.get_flag("to-linear"), threads),
    ];

    if matches.get_flag("progress") {
        opt_list.push(event_handler(orbit::progress::new_progress_bar()));
    }

    let report_collector = ReportCollector::new();
    if report_path.is_some() {
        opt_list.push(event_handler(report_collector.handler()));
    }

    let mut opts = EngineOptions::default().apply(opt_list);
    config_file.apply_to(&mut opts);

    let engine = Engine::start(opts).context("failed to start copy engine")?;
    engine.wait();

    if let Some(path) = report_path {
        let report = report_collector.report();
        let json = report
            .to_json(report_indent)
            .context("failed to serialize report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    Ok(())
}

