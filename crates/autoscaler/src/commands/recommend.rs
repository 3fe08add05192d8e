//! `recommend`: one-shot sizing for a single demand value

use anyhow::Result;
use colored::Colorize;
use scaler_lib::scaling::{recommend, RecommendedAction};

use crate::output::{print_json, OutputFormat};

pub fn run(demand: f64, capacity_per_server: f64, format: OutputFormat) -> Result<()> {
    let recommendation = recommend(demand, capacity_per_server)?;

    match format {
        OutputFormat::Json => print_json(&recommendation)?,
        OutputFormat::Table => {
            let action = match recommendation.action {
                RecommendedAction::ScaleOut => recommendation.action.to_string().yellow().bold(),
                RecommendedAction::Maintain => recommendation.action.to_string().green().bold(),
            };
            println!("Demand:                 {:.2}", recommendation.demand);
            println!("Servers recommended:    {}", recommendation.servers_recommended);
            println!("Action:                 {}", action);
        }
    }

    Ok(())
}
