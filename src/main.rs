use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use route_mapper::cli::Args;
use route_mapper::config::Config;
use route_mapper::deviation::DeviationReport;
use route_mapper::export::{Exporter, MapReport, TextReport};
use route_mapper::logging::init_logging;
use route_mapper::probe::{IcmpTransport, check_permissions, permission_hint};
use route_mapper::range::AddressRange;
use route_mapper::state::AddressFamily;
use route_mapper::topology::TopologyGraph;
use route_mapper::trace::ProbeEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Usage errors exit 1, not clap's default 2
            let _ = e.print();
            std::process::exit(1);
        }
    };

    init_logging(args.verbose);

    let config = Config::from(&args);
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let range = match AddressRange::parse(&args.start, &args.end) {
        Ok(range) => range,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let targets = match range.targets() {
        Ok(targets) => targets,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Not fatal: each target then records an unresponsive route
    match check_permissions(range.family() == AddressFamily::V6) {
        Ok(capability) => info!(?capability, "ICMP socket available"),
        Err(e) => warn!("{}\n{}", e, permission_hint()),
    }

    info!(
        family = %range.family(),
        start = %range.start(),
        end = %range.end(),
        targets = targets.len(),
        workers = config.workers,
        "mapping range"
    );

    let cancel = CancellationToken::new();

    // Setup Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let engine = ProbeEngine::new(config, IcmpTransport, cancel);
    let routes = engine.run(&targets).await;

    let graph = TopologyGraph::build(&routes);
    let deviations = DeviationReport::detect(&routes);
    let report = MapReport::new(&routes, &graph, &deviations);

    let mut exporter = TextReport::new(std::io::stdout().lock());
    exporter.export(&report).context("Failed to export map")?;

    Ok(())
}
