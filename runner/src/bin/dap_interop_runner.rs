use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use dap_interop_core::time::RealClock;
use dap_interop_runner::{
    catalog::{filter_test_cases, test_cases},
    config::{RunnerConfig, read_config},
    container::{ContainerSubstrate, pull_images},
    models::{ImageSet, Role},
    orchestrator::Orchestrator,
    report::RunReport,
    trace::{install_trace_subscriber, verbosity_level},
};
use futures::StreamExt;
use std::{path::PathBuf, pin::pin, process::ExitCode};
use tracing::{error, info};

/// Run DAP interoperability tests against containerized implementations.
#[derive(Debug, Parser)]
#[command(name = "dap_interop_runner", version)]
struct Options {
    /// Path to configuration YAML.
    #[arg(long, env = "CONFIG_FILE", num_args = 1)]
    config_file: Option<PathBuf>,

    /// Client image, replacing the images listed in the configuration file.
    #[arg(long, requires_all = ["leader", "helper", "collector"])]
    client: Option<String>,

    /// Leader image, replacing the images listed in the configuration file.
    #[arg(long, requires_all = ["client", "helper", "collector"])]
    leader: Option<String>,

    /// Helper image, replacing the images listed in the configuration file.
    #[arg(long, requires_all = ["client", "leader", "collector"])]
    helper: Option<String>,

    /// Collector image, replacing the images listed in the configuration file.
    #[arg(long, requires_all = ["client", "leader", "helper"])]
    collector: Option<String>,

    /// Pull the latest version of every image before testing.
    #[arg(long)]
    pull: bool,

    /// List the selected test cases and exit.
    #[arg(long)]
    list: bool,

    /// Number of test scenarios to run concurrently.
    #[arg(long, short, default_value_t = 1)]
    jobs: usize,

    /// Log more. May be repeated. Ignored when RUST_LOG is set.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only run test cases whose name contains one of these strings.
    filters: Vec<String>,
}

impl Options {
    fn image_set(&self) -> Option<ImageSet> {
        Some(ImageSet {
            client: self.client.clone()?,
            leader: self.leader.clone()?,
            helper: self.helper.clone()?,
            collector: self.collector.clone()?,
        })
    }
}

/// Lines printed after every scenario's result: the filter note, if any, then one tally per
/// image set.
fn summary_lines(report: &RunReport, filter_note: Option<String>) -> Vec<String> {
    filter_note.into_iter().chain(report.summaries()).collect()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let options = Options::parse();

    let mut config = match &options.config_file {
        Some(path) => read_config(path)?,
        None => RunnerConfig::default(),
    };
    install_trace_subscriber(&config.logging_config, verbosity_level(options.verbose))
        .context("couldn't install tracing subscriber")?;

    let all_test_cases = test_cases();
    let selected = filter_test_cases(&all_test_cases, &options.filters);
    if options.list {
        for test_case in &selected {
            println!("{}", test_case.name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(image_set) = options.image_set() {
        config.images = image_set.into();
    }
    let missing_roles = config.images.missing_roles();
    if !missing_roles.is_empty() {
        bail!(
            "no images given for {}; list them in the configuration file or pass all of \
             --client, --leader, --helper and --collector",
            missing_roles
                .iter()
                .map(Role::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if options.pull {
        pull_images(config.images.distinct_images())
            .await
            .context("couldn't pull images")?;
    }

    let image_sets = config.images.image_sets();
    info!(
        image_sets = image_sets.len(),
        test_cases = selected.len(),
        jobs = options.jobs,
        "starting test run"
    );
    let orchestrator = Orchestrator::new(
        ContainerSubstrate::new(),
        RealClock::default(),
        config.orchestrator,
    )?;

    let mut report = RunReport::default();
    let mut results = pin!(orchestrator.run_matrix(&image_sets, &selected, options.jobs));
    while let Some(result) = results.next().await {
        println!("{result}");
        if let Some(error) = &result.error {
            error!(image_set = %result.image_set, test_case = %result.test_case, %error, "test failed");
        }
        report.record(result);
    }

    let filter_note = (!options.filters.is_empty()).then(|| {
        format!(
            "Filter selected {} out of {} test cases",
            selected.len(),
            all_test_cases.len()
        )
    });
    println!();
    for line in summary_lines(&report, filter_note) {
        println!("{line}");
    }

    if report.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "Logs from failed tests were saved below {}",
            orchestrator.config().error_log_directory.display()
        );
        Ok(ExitCode::FAILURE)
    }
}
