use std::{env, sync::Arc};

use dotenv::dotenv;
use portranks::{
    asns::{AsnCache, BgpView},
    campaign::{CampaignSettings, Coordinator},
    config::Config,
    exclude,
    report::JsonReportWriter,
    scanner::Masscan,
    tracing::init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv().ok();

    // first command line argument is the location of the config file
    let args = env::args().collect::<Box<[String]>>();
    let config_file = args.get(1).cloned().unwrap_or("config.toml".to_string());
    println!("parsing config at {config_file}");
    let config = Config::from_file(&config_file)?;

    init_tracing(&config);
    info!("Logging initialized");

    let exclude = match &config.exclude_file {
        Some(path) => {
            let ranges = exclude::parse_file(path)?;
            info!(
                "excluding {} ips ({} ranges)",
                ranges.count(),
                ranges.ranges().len()
            );
            Some(ranges)
        }
        None => None,
    };

    let source = BgpView::new(&config.lookup)?;
    let cache = Arc::new(AsnCache::new(&config.cache_dir, Box::new(source)));
    let coordinator = Coordinator::new(
        cache,
        Arc::new(Masscan::new(config.scanner.clone())),
        CampaignSettings {
            results_dir: config.results_dir.clone(),
            buckets: config.buckets,
            malformed_lines: config.malformed_lines,
            exclude,
        },
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, stopping");
                cancel.cancel();
            }
        }
    });

    info!("Running {} campaigns", config.campaigns.len());
    let reports = coordinator
        .run_all(&config.campaigns, config.concurrency, &cancel)
        .await;

    let writer = JsonReportWriter::new(&config.report_dir);
    let mut written = 0;
    for report in &reports {
        match writer.write(report).await {
            Ok(Some(_)) => written += 1,
            Ok(None) => info!(asn = %report.asn, ports = %report.ports, "No successful scans"),
            Err(err) => error!(asn = %report.asn, "{err}"),
        }
    }

    info!("Done, wrote {written} of {} reports", reports.len());
    Ok(())
}
