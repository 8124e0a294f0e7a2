//! `ssixd`: open the chain database, load checkpoints, and serve the core
//! until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ssix_consensus::checkpoints::MAINNET_CHECKPOINTS;
use ssix_consensus::dns::SystemTxtFetcher;
use ssix_consensus::{Checkpoints, Currency};
use ssix_crypto::DalekOracle;
use ssix_log::{log_error, log_info, log_warn};
use ssix_node::Core;
use ssix_storage::fjall::FjallStore;

const POLL_TICK: Duration = Duration::from_millis(250);
const IDLE_TICK: Duration = Duration::from_secs(60);

struct Options {
    data_dir: PathBuf,
    testnet: bool,
    log_level: ssix_log::Level,
    log_json: bool,
    checkpoint_file: Option<PathBuf>,
    checkpoint_hosts: Vec<String>,
    dns_resolver: SocketAddr,
}

impl Options {
    fn default_data_dir(testnet: bool) -> PathBuf {
        let mut dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        dir.push(if testnet { ".ssix-testnet" } else { ".ssix" });
        dir
    }

    fn parse() -> Result<Self, String> {
        let mut data_dir: Option<PathBuf> = None;
        let mut testnet = false;
        let mut log_level = ssix_log::Level::Info;
        let mut log_json = false;
        let mut checkpoint_file = None;
        let mut checkpoint_hosts = Vec::new();
        let mut dns_resolver: SocketAddr = "1.1.1.1:53".parse().expect("literal resolver");

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--data-dir" => {
                    let value = args.next().ok_or("--data-dir needs a path")?;
                    data_dir = Some(PathBuf::from(value));
                }
                "--testnet" => testnet = true,
                "--log-level" => {
                    let value = args.next().ok_or("--log-level needs a value")?;
                    log_level = ssix_log::Level::parse(&value)
                        .ok_or_else(|| format!("unknown log level {value}"))?;
                }
                "--log-json" => log_json = true,
                "--checkpoints" => {
                    let value = args.next().ok_or("--checkpoints needs a file")?;
                    checkpoint_file = Some(PathBuf::from(value));
                }
                "--checkpoint-host" => {
                    let value = args.next().ok_or("--checkpoint-host needs a hostname")?;
                    checkpoint_hosts.push(value);
                }
                "--dns-resolver" => {
                    let value = args.next().ok_or("--dns-resolver needs host:port")?;
                    dns_resolver = value
                        .parse()
                        .map_err(|_| format!("bad resolver address {value}"))?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => return Err(format!("unknown option {other}")),
            }
        }

        Ok(Self {
            data_dir: data_dir.unwrap_or_else(|| Self::default_data_dir(testnet)),
            testnet,
            log_level,
            log_json,
            checkpoint_file,
            checkpoint_hosts,
            dns_resolver,
        })
    }
}

fn print_usage() {
    eprintln!(
        "ssixd [--data-dir PATH] [--testnet] [--log-level LEVEL] [--log-json]\n      \
         [--checkpoints FILE] [--checkpoint-host HOST]... [--dns-resolver HOST:PORT]"
    );
}

fn load_checkpoints(options: &Options) -> Result<Checkpoints, String> {
    let mut checkpoints = if options.testnet {
        Checkpoints::new()
    } else {
        Checkpoints::with_compiled(MAINNET_CHECKPOINTS)
            .map_err(|err| format!("compiled checkpoints: {err}"))?
    };

    if let Some(path) = &options.checkpoint_file {
        checkpoints
            .load_from_file(path)
            .map_err(|err| format!("checkpoint file {}: {err}", path.display()))?;
    }

    if !options.checkpoint_hosts.is_empty() {
        let hosts: Vec<&str> = options
            .checkpoint_hosts
            .iter()
            .map(String::as_str)
            .collect();
        let fetcher = SystemTxtFetcher::new(options.dns_resolver);
        if let Err(err) = checkpoints.load_from_dns(&hosts, &fetcher) {
            // DNS is best-effort hardening; the compiled table still holds.
            log_warn!("DNS checkpoint load failed: {err}");
        }
    }
    Ok(checkpoints)
}

fn run() -> Result<(), String> {
    let options = Options::parse()?;
    ssix_log::init(
        options.log_level,
        if options.log_json {
            ssix_log::Format::Json
        } else {
            ssix_log::Format::Text
        },
        true,
    );

    let currency = Arc::new(
        Currency::builder()
            .testnet(options.testnet)
            .build()
            .map_err(|err| format!("currency parameters: {err}"))?,
    );
    let checkpoints = load_checkpoints(&options)?;

    std::fs::create_dir_all(&options.data_dir)
        .map_err(|err| format!("data dir {}: {err}", options.data_dir.display()))?;
    let store = FjallStore::open(options.data_dir.join("chain"))
        .map_err(|err| format!("open chain database: {err}"))?;

    let core = Arc::new(
        Core::new(currency, Arc::new(DalekOracle::new()), checkpoints, store)
            .map_err(|err| format!("chain init: {err}"))?,
    );
    let (height, hash, work) = core.tip();
    log_info!("node ready at height {height}, tip {hash}, work {work}");

    let stop = Arc::new(AtomicBool::new(false));
    spawn_console(Arc::clone(&core), Arc::clone(&stop));

    let mut since_idle = Duration::ZERO;
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_TICK);
        since_idle += POLL_TICK;
        if since_idle >= IDLE_TICK {
            since_idle = Duration::ZERO;
            core.on_idle();
        }
    }

    log_info!("shutting down");
    core.shutdown();
    Ok(())
}

/// Operator console on stdin: `status`, `exit`. When stdin closes (e.g.
/// running under a supervisor) the node keeps serving until killed.
fn spawn_console(core: Arc<Core<FjallStore>>, stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            match line.trim() {
                "exit" | "quit" => {
                    stop.store(true, Ordering::SeqCst);
                    return;
                }
                "status" => {
                    let (height, hash, work) = core.tip();
                    println!(
                        "height {height}, tip {hash}, work {work}, pool {}",
                        core.pool_size()
                    );
                }
                "" => {}
                other => println!("unknown command: {other}"),
            }
        }
    });
}

fn main() -> ExitCode {
    if let Err(err) = run() {
        log_error!("{err}");
        eprintln!("ssixd: {err}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
