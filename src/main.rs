mod cli;

use clap::Parser;
use cli::{BatchReport, Cli, Commands, FetchArgs, RequestReport};
use fetchbatch::cache::{CacheLimits, FjallCacheStore};
use fetchbatch::config::CacheBackend;
use fetchbatch::observability::init_tracing;
use fetchbatch::{Config, Manager, Request};
use std::io::Write;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.telemetry.log_filter);

    match cli.command {
        Commands::Fetch(args) => fetch(config, args).await?,
        Commands::Prune => prune(&config)?,
    }

    Ok(())
}

async fn fetch(mut config: Config, args: FetchArgs) -> Result<(), AnyError> {
    config.engine.no_cache |= args.no_cache;
    config.engine.force_recache |= args.recache;
    let parallel = config.engine.parallel && !args.serial;

    let mut manager = Manager::new(config)?;
    for source in args.sources {
        manager.add(
            Request::builder()
                .source(source)
                .maybe_timeout(args.timeout)
                .maybe_max_retries(args.retries)
                .build(),
        );
    }
    manager.execute(parallel).await;

    let report = BatchReport {
        summary: manager.summary(),
        requests: manager.requests().iter().map(RequestReport::from).collect(),
    };

    let mut stdout = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &report)?;
        writeln!(stdout)?;
    } else {
        for request in &report.requests {
            writeln!(stdout, "{}", request.line())?;
        }
        let summary = report.summary;
        writeln!(
            stdout,
            "{} ok, {} failed, {} from cache, {} bytes",
            summary.succeeded, summary.failed, summary.cache_hits, summary.bytes
        )?;
    }

    if args.body {
        for request in manager.requests() {
            if let Some(content) = request.content() {
                stdout.write_all(content)?;
                writeln!(stdout)?;
            }
        }
    }

    Ok(())
}

fn prune(config: &Config) -> Result<(), AnyError> {
    if config.cache.backend != CacheBackend::Fjall {
        println!("Cache backend is not persistent; nothing to prune");
        return Ok(());
    }

    let store = FjallCacheStore::open(&config.cache.path, CacheLimits::from(&config.cache))?;
    let pruned = store.prune_expired()?;
    println!("Pruned {pruned} expired entries");
    Ok(())
}
