use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::eyre::{bail, eyre};
use log::{info, warn};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use addmc_rs::cluster::ClusteringHeuristic;
use addmc_rs::cnf::{Cnf, WeightFormat, STDIN_PATH};
use addmc_rs::counter::{Counter, OutputFormat};
use addmc_rs::ordering::{VarOrder, VarOrderingHeuristic};
use addmc_rs::reader::JoinTreeReader;
use addmc_rs::Error;

/// Time the main thread gets to report on its own after a signal.
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(author, version, about, allow_negative_numbers = true)]
struct Cli {
    /// CNF file, `-` for stdin.
    #[arg(long = "cf", value_name = "FILE", default_value = STDIN_PATH)]
    cnf_file: PathBuf,

    /// Weight format: 1 UNWEIGHTED, 2 MINIC2D, 3 CACHET, 4 MCC.
    #[arg(long = "wf", value_name = "INT", default_value = "4", value_parser = parse_weight_format)]
    weight_format: WeightFormat,

    /// Join tree file, `-` for a planner piping into stdin.
    #[arg(long = "jf", value_name = "FILE")]
    jt_file: Option<PathBuf>,

    /// Seconds to wait for a join tree from stdin before stopping the planner.
    #[arg(long = "jw", value_name = "FLOAT", default_value = "10.0")]
    jt_wait: f64,

    /// Output format: 1 JOIN_TREE, 2 MODEL_COUNT.
    #[arg(long = "of", value_name = "INT", default_value = "2", value_parser = parse_output_format)]
    output_format: OutputFormat,

    /// Clustering heuristic: 1 MONOLITHIC, 2 LINEAR, 3 BUCKET_LIST, 4 BUCKET_TREE, 5 BOUQUET_LIST, 6 BOUQUET_TREE.
    #[arg(long = "ch", value_name = "INT", default_value = "6", value_parser = parse_clustering)]
    clustering: ClusteringHeuristic,

    /// Cluster variable ordering: 1 APPEARANCE, 2 DECLARATION, 3 RANDOM, 4 MCS, 5 LEXP, 6 LEXM (negative to invert).
    #[arg(long = "cv", value_name = "INT", default_value = "5", value_parser = parse_var_order)]
    cluster_order: VarOrder,

    /// Diagram variable ordering, numbered as for `--cv`.
    #[arg(long = "dv", value_name = "INT", default_value = "4", value_parser = parse_var_order)]
    diagram_order: VarOrder,

    /// Seed of the random variable ordering.
    #[arg(long = "rs", value_name = "INT", default_value = "10")]
    random_seed: u64,

    /// 0 warnings, 1 progress, 2 details, 3 everything.
    #[arg(long, value_name = "INT", default_value = "1")]
    verbosity: u8,

    /// Compare an unweighted count against an exact count.
    #[arg(long)]
    verify: bool,

    /// Count with every clustering heuristic and warn about disagreements.
    #[arg(long)]
    check: bool,
}

fn choice(s: &str, max: usize) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(i) if (1..=max).contains(&i) => Ok(i - 1),
        _ => Err(format!("expected an integer in 1..={}", max)),
    }
}

fn parse_weight_format(s: &str) -> Result<WeightFormat, String> {
    const FORMATS: [WeightFormat; 4] = [
        WeightFormat::Unweighted,
        WeightFormat::Minic2d,
        WeightFormat::Cachet,
        WeightFormat::Mcc,
    ];
    Ok(FORMATS[choice(s, FORMATS.len())?])
}

fn parse_output_format(s: &str) -> Result<OutputFormat, String> {
    const FORMATS: [OutputFormat; 2] = [OutputFormat::JoinTree, OutputFormat::ModelCount];
    Ok(FORMATS[choice(s, FORMATS.len())?])
}

fn parse_clustering(s: &str) -> Result<ClusteringHeuristic, String> {
    Ok(ClusteringHeuristic::ALL[choice(s, ClusteringHeuristic::ALL.len())?])
}

fn parse_var_order(s: &str) -> Result<VarOrder, String> {
    let all = VarOrderingHeuristic::ALL;
    match s.strip_prefix('-') {
        Some(rest) => Ok(VarOrder::inverted(all[choice(rest, all.len())?])),
        None => Ok(VarOrder::new(all[choice(s, all.len())?])),
    }
}

/// The result lines on stdout, printed exactly once.
struct Report {
    start: Instant,
    weighted: bool,
    done: AtomicBool,
}

impl Report {
    /// Print the count and the elapsed time, unless already printed.
    fn model_count(&self, count: f64) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        let kind = if self.weighted { "wmc" } else { "mc" };
        println!("s {} {}", kind, count);
        self.seconds();
        true
    }

    fn seconds(&self) {
        println!("c seconds {}", self.start.elapsed().as_secs_f64());
        let _ = io::stdout().flush();
    }
}

#[cfg(unix)]
fn install_signal_handler(interrupt: Arc<AtomicBool>, report: Arc<Report>) -> color_eyre::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        for signal in signals.forever() {
            warn!("Received signal {}", signal);
            interrupt.store(true, Ordering::SeqCst);
            std::thread::sleep(INTERRUPT_GRACE);
            if report.model_count(0.0) {
                std::process::exit(1);
            }
        }
    });
    Ok(())
}

fn init_logging(verbosity: u8) -> color_eyre::Result<()> {
    let mut config = ConfigBuilder::new();
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => {
            config.add_filter_ignore_str("addmc_rs::add");
            LevelFilter::Debug
        }
        _ => LevelFilter::Trace,
    };
    TermLogger::init(level, config.build(), TerminalMode::Stderr, ColorChoice::Auto)?;
    Ok(())
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let start = Instant::now();
    let args = Cli::parse();
    init_logging(args.verbosity)?;
    info!("args = {:?}", args);

    println!("c pid {}", std::process::id());

    let stdin = Path::new(STDIN_PATH);
    if args.cnf_file == stdin && args.jt_file.as_deref() == Some(stdin) {
        bail!("the CNF and the join tree cannot both come from stdin");
    }
    let wait = Duration::try_from_secs_f64(args.jt_wait).map_err(|e| eyre!("bad --jw {}: {}", args.jt_wait, e))?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let report = Arc::new(Report {
        start,
        weighted: args.weight_format.is_weighted(),
        done: AtomicBool::new(false),
    });
    #[cfg(unix)]
    install_signal_handler(interrupt.clone(), report.clone())?;

    let cnf = Cnf::from_path(&args.cnf_file, args.weight_format)?;

    let counter = Counter::new(args.clustering)
        .with_cluster_order(args.cluster_order)
        .with_diagram_order(args.diagram_order)
        .with_seed(args.random_seed)
        .with_interrupt(interrupt);

    if args.output_format == OutputFormat::JoinTree {
        let tree = counter.construct_join_tree(&cnf)?;
        tree.write_protocol(&mut io::stdout().lock())?;
        report.seconds();
        return Ok(());
    }

    let count = match &args.jt_file {
        Some(path) => {
            let tree = JoinTreeReader::from_path(path, wait)?;
            if let Some(seconds) = tree.planner_seconds() {
                info!("Planner took {} seconds", seconds);
            }
            counter.count_join_tree(&cnf, &tree)
        }
        None if args.check => counter.cross_check(&cnf),
        None => counter.count(&cnf),
    };
    let count = match count {
        Ok(count) => count,
        Err(Error::Interrupted) => {
            report.model_count(0.0);
            bail!(Error::Interrupted);
        }
        Err(e) => return Err(e.into()),
    };

    if args.verify {
        counter.verify(&cnf, count)?;
    }
    report.model_count(count);

    Ok(())
}
