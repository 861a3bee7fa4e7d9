use std::io::Write;
use std::net::IpAddr;

use super::contract::{ExportError, Exporter, MapReport};

fn host(addr: &Option<IpAddr>) -> String {
    match addr {
        Some(ip) => ip.to_string(),
        None => "*".to_string(),
    }
}

/// Write a plain text summary of a finished map
pub fn write_report<W: Write>(report: &MapReport, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "route-mapper report")?;
    writeln!(writer, "Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    match report.baseline {
        Some(ip) => writeln!(writer, "Baseline: {}", ip)?,
        None => writeln!(writer, "Baseline: none")?,
    }
    writeln!(writer)?;

    writeln!(writer, "Routes")?;
    writeln!(writer, "{:<40} {:>4}  {:<9} Path", "Target", "Hops", "Status")?;
    writeln!(writer, "{}", "-".repeat(80))?;
    for route in &report.routes {
        let path: Vec<String> = route.hops.iter().map(host).collect();
        writeln!(
            writer,
            "{:<40} {:>4}  {:<9} {}",
            route.target,
            route.hops.len(),
            if route.complete { "complete" } else { "truncated" },
            path.join(" ")
        )?;
    }
    for target in &report.abandoned {
        writeln!(writer, "{:<40} {:>4}  {:<9}", target, "-", "abandoned")?;
    }
    writeln!(writer)?;

    writeln!(writer, "Routers")?;
    writeln!(writer, "{:<40} {:>6}", "Address", "Degree")?;
    writeln!(writer, "{}", "-".repeat(48))?;
    for node in &report.nodes {
        writeln!(writer, "{:<40} {:>6}", node.address, node.degree)?;
    }
    writeln!(writer)?;

    writeln!(writer, "Links")?;
    writeln!(writer, "{}", "-".repeat(48))?;
    for edge in &report.edges {
        let targets: Vec<String> = edge.targets.iter().map(|t| t.to_string()).collect();
        writeln!(
            writer,
            "{} - {}  ({} targets: {})",
            edge.endpoints[0],
            edge.endpoints[1],
            targets.len(),
            targets.join(", ")
        )?;
    }
    writeln!(writer)?;

    writeln!(writer, "Deviations from baseline")?;
    if report.deviations.is_empty() {
        writeln!(writer, "none")?;
        return Ok(());
    }
    writeln!(writer, "{:<40} {:>5}  {:<40} {:>5}", "Target", "Index", "Hop", "Total")?;
    writeln!(writer, "{}", "-".repeat(96))?;
    for deviation in &report.deviations {
        writeln!(
            writer,
            "{:<40} {:>5}  {:<40} {:>5}",
            deviation.target,
            deviation.index,
            host(&deviation.hop),
            deviation.divergence_count
        )?;
    }

    Ok(())
}

/// Renders the map as text to any writer, stdout in the binary
pub struct TextReport<W: Write> {
    writer: W,
}

impl<W: Write> TextReport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Exporter for TextReport<W> {
    fn export(&mut self, report: &MapReport) -> Result<(), ExportError> {
        write_report(report, &mut self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}
