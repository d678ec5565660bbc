//! CLI Entry Point for uwb-hil
//!
//! Provides command-line interface for:
//! - Running the UWB manager suite against a phone or the mock device
//! - Listing the available tests
//! - Printing the current UWB state of a device
//!
//! # Usage
//!
//! Run the configured tests on the attached phone:
//! ```bash
//! uwb-hil run
//! ```
//!
//! Run two tests on the mock and print JSON results:
//! ```bash
//! uwb-hil run --mock --test test_toggle_uwb_state --test test_enable_uwb_state --json
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uwb_hil::config::{HilConfig, DEFAULT_CONFIG_PATH};
use uwb_hil::hardware::{AndroidUwbDevice, MockUwbDevice, UwbDevice};
use uwb_hil::logging;
use uwb_hil::suite::{SuiteResult, TestOutcome, UwbManagerSuite, UwbTestCase};

#[derive(Parser)]
#[command(name = "uwb-hil")]
#[command(about = "Hardware-in-the-loop tests for Android UWB", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the UWB manager suite
    Run {
        /// Use the simulated device instead of a phone
        #[arg(long)]
        mock: bool,

        /// Test to run (repeatable); defaults to the configured selection
        #[arg(long = "test", value_name = "NAME")]
        tests: Vec<String>,

        /// Print the suite result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// List the available tests
    List,

    /// Print the current UWB state of the device
    State {
        /// Use the simulated device instead of a phone
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HilConfig::load_from(&cli.config)?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Run { mock, tests, json } => run_suite(&config, mock, &tests, json).await,
        Commands::List => {
            list_tests(&config);
            Ok(())
        }
        Commands::State { mock } => {
            if mock {
                print_state(&MockUwbDevice::new()).await
            } else {
                let device = AndroidUwbDevice::connect(&config).await?;
                let result = print_state(&device).await;
                device.disconnect().await;
                result
            }
        }
    }
}

async fn run_suite(config: &HilConfig, mock: bool, tests: &[String], json: bool) -> Result<()> {
    let cases = if tests.is_empty() {
        config.selected_tests()?
    } else {
        tests
            .iter()
            .map(|name| UwbTestCase::from_name(name))
            .collect::<Result<Vec<_>, _>>()?
    };

    if !json {
        println!("📡 {} - {} test(s)", config.application.name, cases.len());
    }

    let result = if mock {
        if !json {
            println!("🔧 Using mock UWB device");
        }
        UwbManagerSuite::new(MockUwbDevice::new(), config)
            .run(&cases)
            .await
    } else {
        let device = AndroidUwbDevice::connect(config).await?;
        let suite = UwbManagerSuite::new(device, config);
        let result = suite.run(&cases).await;
        suite.into_device().disconnect().await;
        result
    };

    if json {
        println!("{}", result.to_json()?);
    } else {
        print_report(&result);
    }

    if !result.all_passed() {
        bail!(
            "{} of {} test(s) did not pass",
            result.results.len() - result.count(TestOutcome::Passed),
            result.results.len()
        );
    }
    Ok(())
}

fn print_report(result: &SuiteResult) {
    println!();
    for test in &result.results {
        let icon = match test.outcome {
            TestOutcome::Passed => "✅",
            TestOutcome::Failed => "❌",
            TestOutcome::Error => "💥",
        };
        println!(
            "{icon} {:<48} {:>4} {:>7.1}s",
            test.name,
            test.outcome.to_string(),
            test.duration.as_secs_f64()
        );
        if let Some(message) = &test.message {
            println!("     {message}");
        }
    }
    println!();
    println!("{}", result.summary());
}

fn list_tests(config: &HilConfig) {
    for case in UwbTestCase::ALL {
        let marker = if config.suite.tests.iter().any(|name| name == case.name()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<48} {}", case.name(), case.description());
    }
    println!();
    println!("* selected by configuration");
}

async fn print_state<D: UwbDevice>(device: &D) -> Result<()> {
    println!("Build:         {}", device.build_id().await?);
    println!("UWB enabled:   {}", device.is_uwb_enabled().await?);
    let state = device.adapter_state().await?;
    println!("Adapter state: {state} ({})", state.code());
    println!("Airplane mode: {}", device.airplane_mode().await?);
    Ok(())
}
