use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_sentry::{
    database::ProxyStore,
    proxy::{sweep, validator, ProxyTester, SweepConfig, TesterConfig},
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Proxy validation, live testing, and health tracking
#[derive(Parser)]
#[command(name = "proxy-sentry")]
#[command(about = "Validate, test, and track the health of HTTP proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path
    #[arg(short, long, default_value = "proxies.db")]
    database: String,

    /// Echo endpoint the probe is sent through the proxy
    #[arg(long, default_value = "https://api.ipify.org?format=json")]
    echo_url: String,

    /// JSON field of the echo response carrying the egress IP
    #[arg(long, default_value = "ip")]
    ip_field: String,

    /// Geo lookup service root
    #[arg(long, default_value = "http://ip-api.com/json")]
    geo_url: String,

    /// Probe timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a proxy string without any network access
    Validate {
        /// Proxy in HOST:PORT or HOST:PORT:USER:PASS form
        proxy: String,
    },
    /// Print a proxy string with its password masked
    Mask {
        proxy: String,
    },
    /// Live-test a single proxy
    Test {
        proxy: String,
    },
    /// Test all proxies from a file and split live/dead
    Check {
        /// Input file, one proxy per line
        input: PathBuf,
        /// Output file for live proxies
        #[arg(short, long)]
        live: Option<PathBuf>,
        /// Output file for dead proxies
        #[arg(short = 'x', long)]
        dead: Option<PathBuf>,
        /// Number of concurrent tests
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
    },
    /// Add a proxy to the store
    Add {
        proxy: String,
        /// Optional display label
        #[arg(short, long)]
        label: Option<String>,
        /// Test the proxy right after storing it
        #[arg(short, long)]
        test: bool,
    },
    /// Import proxies from a file into the store
    Import {
        input: PathBuf,
        /// Label prefix applied to imported proxies
        #[arg(short, long)]
        label_prefix: Option<String>,
    },
    /// List stored proxies
    List {
        /// Filter by status (untested, live, dead)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Remove stored proxies by id
    Remove {
        ids: Vec<String>,
    },
    /// Re-test stale stored proxies
    Sweep {
        /// Re-test proxies not checked within this many hours
        #[arg(long, default_value = "24")]
        stale_hours: u64,
        /// Delete proxies that test dead
        #[arg(long)]
        remove_dead: bool,
        /// Number of concurrent tests
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
    },
    /// Show store health counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let tester_config = TesterConfig::new()
        .with_echo_url(cli.echo_url.as_str())
        .with_ip_field(cli.ip_field.as_str())
        .with_geo_url(cli.geo_url.as_str())
        .with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::Validate { proxy } => match validator::validate(&proxy) {
            Ok(endpoint) => {
                println!("valid: {}", validator::mask(&endpoint.to_full_string()));
            }
            Err(err) => {
                eprintln!("invalid: {}", err);
                std::process::exit(1);
            }
        },
        Commands::Mask { proxy } => {
            println!("{}", validator::mask(&proxy));
        }
        Commands::Test { proxy } => {
            let tester = ProxyTester::new(tester_config);
            let result = tester.test(&proxy).await;
            print_result(&validator::mask(&proxy), &result);
            if !result.is_live() {
                std::process::exit(1);
            }
        }
        Commands::Check {
            input,
            live,
            dead,
            concurrency,
        } => {
            let lines = read_lines(&input)?;
            println!("Loaded {} lines from {:?}", lines.len(), input);

            let tester = ProxyTester::new(tester_config);
            let results = sweep::test_batch(&tester, &lines, concurrency).await;

            let (live_results, dead_results): (Vec<_>, Vec<_>) =
                results.into_iter().partition(|(_, r)| r.is_live());

            println!(
                "Results: {} live, {} dead",
                live_results.len(),
                dead_results.len()
            );

            for (raw, result) in &live_results {
                println!(
                    "  {} ({}ms, {})",
                    validator::mask(raw),
                    result.latency_ms.unwrap_or_default(),
                    result.country.as_deref().unwrap_or("Unknown")
                );
            }

            if let Some(path) = live {
                save_lines(&live_results, &path)?;
                println!("Saved {} live proxies to {:?}", live_results.len(), path);
            }
            if let Some(path) = dead {
                save_lines(&dead_results, &path)?;
                println!("Saved {} dead proxies to {:?}", dead_results.len(), path);
            }
        }
        Commands::Add { proxy, label, test } => {
            let store = ProxyStore::new(&cli.database).await?;
            let outcome = store.add(&proxy, label.as_deref()).await?;

            if outcome.created {
                println!("Added: {} ({})", outcome.record.masked(), outcome.record.id);
            } else {
                println!(
                    "Already stored: {} ({})",
                    outcome.record.masked(),
                    outcome.record.id
                );
            }

            if test {
                let tester = ProxyTester::new(tester_config);
                let result = tester.test(&outcome.record.proxy).await;
                store.apply_test_result(&outcome.record.id, &result).await?;
                print_result(&outcome.record.masked(), &result);
            }
        }
        Commands::Import { input, label_prefix } => {
            let store = ProxyStore::new(&cli.database).await?;
            let lines = read_lines(&input)?;
            let summary = store.add_bulk(&lines, label_prefix.as_deref()).await?;
            println!(
                "Imported: {} added, {} existing, {} invalid",
                summary.added, summary.existing, summary.invalid
            );
        }
        Commands::List { status } => {
            let store = ProxyStore::new(&cli.database).await?;
            let records = store.list(status.as_deref()).await?;

            if records.is_empty() {
                println!("No proxies found.");
            } else {
                for record in records {
                    let latency = record
                        .latency_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} {} [{}] {} {} {}",
                        record.id,
                        record.masked(),
                        record.status,
                        latency,
                        record.country.as_deref().unwrap_or("Unknown"),
                        record.label.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Remove { ids } => {
            let store = ProxyStore::new(&cli.database).await?;
            let removed = store.remove(&ids).await?;
            println!("Removed {} proxies", removed);
        }
        Commands::Sweep {
            stale_hours,
            remove_dead,
            concurrency,
        } => {
            let store = ProxyStore::new(&cli.database).await?;
            let tester = ProxyTester::new(tester_config);
            let config = SweepConfig::new()
                .with_max_age(Duration::from_secs(stale_hours * 60 * 60))
                .with_remove_dead(remove_dead)
                .with_concurrency(concurrency);

            let summary = sweep::run(&store, &tester, &config).await?;
            println!(
                "Sweep: {} checked, {} live, {} dead, {} removed",
                summary.checked, summary.live, summary.dead, summary.removed
            );
        }
        Commands::Stats => {
            let store = ProxyStore::new(&cli.database).await?;
            let stats = store.stats().await?;
            println!(
                "Total: {}, live: {}, dead: {}",
                stats.total, stats.live, stats.dead
            );
        }
    }

    Ok(())
}

fn print_result(masked: &str, result: &proxy_sentry::ProxyTestResult) {
    if result.is_live() {
        println!(
            "{} is LIVE: {}ms, ip {}, {}",
            masked,
            result.latency_ms.unwrap_or_default(),
            result.egress_ip.as_deref().unwrap_or("unknown"),
            result.country.as_deref().unwrap_or("Unknown")
        );
    } else {
        println!(
            "{} is DEAD: {}",
            masked,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(String::from).collect())
}

fn save_lines(results: &[(String, proxy_sentry::ProxyTestResult)], path: &Path) -> Result<()> {
    let content: String = results
        .iter()
        .map(|(raw, _)| raw.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, content)?;
    Ok(())
}
