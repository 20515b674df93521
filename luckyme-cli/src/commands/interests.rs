//! `luckyme interests` — show a generated interest profile.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use luckyme_core::interest;

#[derive(Args, Debug)]
pub struct InterestsArgs {
    /// Center of the profile.
    #[arg(long)]
    pub luck: u64,

    /// Attribute pool size.
    #[arg(long, default_value_t = 100)]
    pub pool: u64,

    /// Number of interests before zero weights are dropped.
    #[arg(long, default_value_t = 5)]
    pub count: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InterestRow {
    #[tabled(rename = "interest")]
    id: String,
    #[tabled(rename = "weight")]
    weight: u64,
}

impl InterestsArgs {
    pub fn run(self) -> Result<()> {
        let profile = interest::generate(self.luck, self.pool, self.count);

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&profile).context("failed to render interests JSON")?
            );
            return Ok(());
        }

        if profile.is_empty() {
            println!("no interests (pool {}, count {})", self.pool, self.count);
            return Ok(());
        }

        let total = profile.total_weight();
        let rows: Vec<InterestRow> = profile
            .interests
            .into_iter()
            .map(|attr| InterestRow {
                id: attr.value,
                weight: attr.weight,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("total weight: {total}");
        Ok(())
    }
}
