use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Builder;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cmsgate::auth::ApiKey;
use cmsgate::cli::{Cli, Commands, ServeArgs};
use cmsgate::dns::DnsResolver;
use cmsgate::rate_limit::create_scan_request_limiter;
use cmsgate::scanner::Scanner;
use cmsgate::server::{self, AppState};
use cmsgate::validation::{validate_domain, DomainName};

fn main() -> Result<()> {
    // Scans are subprocess-bound; a few workers are plenty.
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let worker_threads = num_cpus.clamp(2, 8);

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main(worker_threads))
}

async fn async_main(worker_threads: usize) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("Configured Tokio runtime with {} worker threads", worker_threads);

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Scan { domain, scanner } => {
            let domain = DomainName::parse(&domain)
                .with_context(|| format!("invalid domain {domain:?}"))?;
            info!("Scanning single domain: {}", domain);

            let report = Scanner::new(scanner.to_config())
                .scan(&domain)
                .await
                .context("could not query domain")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Validate { domain } => {
            validate_domain(&domain).with_context(|| format!("invalid domain {domain:?}"))?;
            println!("ok");
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let api_key = ApiKey::new(&args.api_key).context("invalid API_KEY")?;

    let dns = if args.require_dns {
        Some(Arc::new(DnsResolver::new()?))
    } else {
        None
    };

    info!(
        listen_addr = %args.listen,
        rate_limit = args.rate_limit,
        result_dir = %args.scanner.result_dir.display(),
        max_concurrent_scans = args.scanner.max_concurrent_scans,
        require_dns = args.require_dns,
        "configuration loaded",
    );

    let state = AppState {
        scanner: Arc::new(Scanner::new(args.scanner.to_config())),
        limiter: Arc::new(create_scan_request_limiter(args.rate_limit)),
        api_key,
        dns,
    };

    server::serve(args.listen, state).await
}
