//! Factor catalogue listing — `refinery factors`.

use anyhow::{Result, bail};
use console::style;
use refinery::config::Config;
use refinery::enrichment::{FactorCategory, FactorInfo};

pub fn cmd_factors(config: &Config, category: Option<&str>) -> Result<()> {
    let catalogue = super::load_catalogue(config)?;

    let factors: Vec<&FactorInfo> = match category {
        Some(raw) => {
            let Some(category) = FactorCategory::parse_loose(raw) else {
                bail!(
                    "Unknown category '{}'. Expected one of: trend, mean_reversion, volatility, risk_off, carry",
                    raw
                );
            };
            catalogue.by_category(category)
        }
        None => catalogue.all().iter().collect(),
    };

    println!();
    for factor in &factors {
        println!(
            "{} {} {}",
            style(&factor.name).bold(),
            style(format!("[{}]", factor.category)).cyan(),
            style(&factor.frequency).dim()
        );
        println!("    {}", factor.intuition);
    }
    println!();
    println!("{} factor(s)", factors.len());
    Ok(())
}
