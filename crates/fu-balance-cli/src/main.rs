//! `fu-balance` command-line driver.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fu_balance::balance::{
    analyze, analyze_function, overuse_rate, BalanceConfig, BalancePass, Balancer,
    CapacityProfile, FunctionalUnit, UsageVector,
};
use fu_balance::ir::{parse_module, LoopBody, ParsedModule};

#[derive(Parser)]
#[command(name = "fu-balance")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Estimate and rebalance GPU functional-unit usage of loop bodies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the instruction mix of a function and of each innermost loop
    Mix {
        /// Input file in textual IR
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Rebalance every innermost loop and print the rewritten function
    Balance {
        /// Input file in textual IR
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Overuse bound a rewrite must beat on its first iteration
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum scan rounds per loop
        #[arg(long = "max-iters")]
        max_iters: Option<usize>,

        /// Write the rewritten function here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ProfileArgs {
    /// Built-in capacity profile (defaults to FU_BALANCE_PROFILE or sm_35)
    #[arg(long)]
    profile: Option<String>,

    /// JSON capacity profile; takes precedence over --profile
    #[arg(long = "profile-file", value_name = "FILE")]
    profile_file: Option<PathBuf>,
}

impl ProfileArgs {
    fn load(&self) -> Result<CapacityProfile> {
        if let Some(path) = &self.profile_file {
            return CapacityProfile::from_path(path)
                .with_context(|| format!("loading capacity profile {}", path.display()));
        }
        match self
            .profile
            .as_deref()
            .or_else(|| fu_balance::profile_override())
        {
            Some(name) => CapacityProfile::by_name(name).map_err(Into::into),
            None => Ok(CapacityProfile::sm_35()),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "fu_balance=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Mix {
            input,
            profile,
            format,
        } => mix(&input, &profile.load()?, format),
        Commands::Balance {
            input,
            profile,
            threshold,
            max_iters,
            output,
        } => {
            let mut config = BalanceConfig::from_env();
            if threshold.is_some() {
                config.threshold = threshold;
            }
            if let Some(max_iters) = max_iters {
                config.max_iterations = max_iters;
            }
            balance(&input, &profile.load()?, config, output.as_deref())
        }
    }
}

fn read_module(path: &Path) -> Result<ParsedModule> {
    let src = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_module(&src).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Serialize)]
struct MixEntry {
    scope: String,
    usage: Vec<(FunctionalUnit, u64)>,
    overuse: f64,
}

impl MixEntry {
    fn new(scope: String, usage: &UsageVector, profile: &CapacityProfile) -> Self {
        Self {
            scope,
            usage: usage.iter().collect(),
            overuse: overuse_rate(usage, profile),
        }
    }
}

fn mix(input: &Path, profile: &CapacityProfile, format: Format) -> Result<()> {
    let module = read_module(input)?;
    let function = &module.function;

    let mut entries = vec![MixEntry::new(
        format!("@{}", function.name),
        &analyze_function(function, &module.frequencies)?,
        profile,
    )];
    for info in module.loops.innermost() {
        let body = LoopBody::from_loop(info, &module.frequencies);
        entries.push(MixEntry::new(
            format!("loop @{}", info.label),
            &analyze(function, &body)?,
            profile,
        ));
    }

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            for entry in &entries {
                println!("{}", entry.scope);
                for (unit, count) in &entry.usage {
                    println!("{} {count}", unit.short_name());
                }
                println!("overuse {:.4} ({})\n", entry.overuse, profile.name());
            }
        }
    }
    Ok(())
}

fn balance(
    input: &Path,
    profile: &CapacityProfile,
    config: BalanceConfig,
    output: Option<&Path>,
) -> Result<()> {
    let mut module = read_module(input)?;
    let pass = BalancePass::new(Balancer::new(profile).with_config(config));
    let report = pass
        .run(&mut module.function, &module.frequencies, &module.loops)
        .with_context(|| format!("balancing @{}", module.function.name))?;

    for entry in &report.loops {
        let outcome = &entry.outcome;
        if entry.skipped {
            eprintln!("loop @{}: skipped (contains nested loops)", entry.label);
            continue;
        }
        eprintln!(
            "loop @{}: {} rewrite(s), overuse {:.4} -> {:.4}",
            entry.label,
            outcome.applied.len(),
            outcome.initial_overuse,
            outcome.overuse
        );
        for applied in &outcome.applied {
            eprintln!("  {} (overuse {:.4})", applied.rule, applied.overuse);
        }
    }

    let text = module.to_text();
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?
        }
        None => print!("{text}"),
    }
    Ok(())
}
