//! Report commands

use anyhow::{anyhow, Result};
use tally_core::models::{WealthInterval, WealthReport};

use super::ApiClient;

pub async fn cmd_wealth(client: &ApiClient, interval: &str, periods: Option<u32>) -> Result<()> {
    // Unknown intervals fail before any request is made
    let interval: WealthInterval = interval.parse().map_err(|e: String| anyhow!(e))?;

    let mut path = format!("/api/wealth/chart?interval={}", interval.as_str());
    if let Some(periods) = periods {
        path.push_str(&format!("&periods={}", periods));
    }
    let report: WealthReport = client.get(&path).await?;

    println!();
    println!("💰 Net worth by {}", interval.as_str());
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   {:<12} {:>14} {:>14} {:>14}",
        "Date", "Assets", "Liabilities", "Net worth"
    );
    for point in &report.data_points {
        println!(
            "   {:<12} {:>14.2} {:>14.2} {:>14.2}",
            point.date, point.assets, point.liabilities, point.net_worth
        );
    }
    println!();
    Ok(())
}
