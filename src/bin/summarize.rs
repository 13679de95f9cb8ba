use clap::Parser;
use itertools::Itertools;
use std::path::PathBuf;
use yf_calendar_crawler::calendar::{Category, Pipeline};
use yf_calendar_crawler::data::{latest_file, load_records};

/// Print a per-date summary of the latest output file of each category.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Records to print per category
    #[arg(long, default_value_t = 3)]
    show: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    for category in Category::ALL {
        let Some(path) = latest_file(&args.dir, category)? else {
            println!("{}: no file found", category);
            continue;
        };

        let mut pipeline = Pipeline::new();
        let records = load_records(&path)?
            .iter()
            .filter_map(|value| pipeline.accept_value(value).ok())
            .map(|v| v.into_inner())
            .collect::<Vec<_>>();

        println!("{}", "=".repeat(50));
        println!(
            "{} ({}): {} records, {} rejected",
            category.as_str().to_uppercase(),
            path.display(),
            records.len(),
            pipeline.rejected()
        );
        for (date, group) in &records.iter().map(|r| r.date).sorted().group_by(|d| *d) {
            println!("  {}: {}", date, group.count());
        }
        for record in records.iter().take(args.show) {
            println!("{}", "-".repeat(50));
            print!("{}", record);
        }
    }

    Ok(())
}
