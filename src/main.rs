use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};

use sinkscan::client::CompletionClient;
use sinkscan::config::Config;
use sinkscan::pipeline::{self, PipelineOptions};
use sinkscan::prompt::PromptVariant;
use sinkscan::{extract, report, workitems};

#[derive(Parser, Debug)]
#[command(
    name = "sinkscan",
    about = "Annotate a source corpus with data-sink services using an LLM",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Work-item artifact produced by `sinkscan extract`
    #[arg(long, default_value = "sink_files.json")]
    work_items: PathBuf,

    /// Corpus root directory that work-item paths are relative to
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Output artifact path
    #[arg(long, default_value = "service_extraction.json")]
    output: PathBuf,

    /// Work items analyzed concurrently per batch
    #[arg(long, default_value_t = pipeline::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Ask for service identifiers as named in code (embeds a worked example)
    #[arg(long)]
    strict_naming: bool,

    /// Per-request timeout in seconds; a hung call fails its item, not the run
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape a data-sink log listing into the work-item artifact
    Extract {
        /// Plain-text listing with path and `Code summary:` lines
        #[arg(default_value = "data_sinks.txt")]
        input: PathBuf,

        /// Work-item artifact to write
        #[arg(long, default_value = "sink_files.json")]
        output: PathBuf,

        /// Directory name to rebase absolute paths against
        #[arg(long)]
        marker: Option<String>,
    },
    /// Render the aggregate artifact into a browsable HTML report
    Report {
        /// Aggregate artifact produced by the annotation run
        #[arg(default_value = "service_extraction.json")]
        input: PathBuf,

        /// Report path (defaults to index.html next to the artifact)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Extract {
            input,
            output,
            marker,
        }) => {
            let count = extract::run(&input, &output, marker.as_deref())?;
            println!("Saved {} work items to {}", count, output.display());
            Ok(())
        }
        Some(Command::Report { input, output }) => {
            report::run(&input, output.as_deref())?;
            Ok(())
        }
        None => annotate(cli.run).await,
    }
}

/// Run the full annotation pipeline to completion.
async fn annotate(args: RunArgs) -> Result<()> {
    let config = Config::load();
    let client = CompletionClient::new(&config, Duration::from_secs(args.timeout_secs))?;

    let items = workitems::load_work_items(&args.work_items)?;
    println!(
        "Analyzing {} files in batches of {}",
        items.len(),
        args.batch_size
    );

    let options = PipelineOptions {
        root: args.root,
        batch_size: args.batch_size,
        variant: if args.strict_naming {
            PromptVariant::StrictNaming
        } else {
            PromptVariant::Base
        },
    };

    let aggregate = pipeline::run(Arc::new(client), &items, &options).await;
    pipeline::write_aggregate(&aggregate, &args.output)?;
    pipeline::print_summary(&aggregate, &args.output);
    Ok(())
}
