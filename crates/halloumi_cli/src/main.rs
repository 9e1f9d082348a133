//! Halloumi CLI
//!
//! Compiles the built-in stack catalog into CloudFormation templates.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod catalog;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use halloumi_plan::{CompileOptions, Compiler, Environment, DEFAULT_MAX_DEPTH};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "halloumi")]
#[command(about = "Halloumi - compile resource graphs into CloudFormation templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a stack into a template
    Compile {
        /// Stack name
        stack: String,
        /// Write the template to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Environment override, may be repeated
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Ignore the process environment
        #[arg(long)]
        clean_env: bool,
        /// Override the template description
        #[arg(long)]
        description: Option<String>,
        /// Maximum compound nesting depth
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,
        /// Emit compact JSON
        #[arg(long)]
        compact: bool,
        /// Print the template digest to stderr
        #[arg(long)]
        digest: bool,
    },
    /// List the available stacks
    List,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Process environment first, explicit overrides last
fn environment(overrides: Vec<(String, String)>, clean: bool) -> Environment {
    let mut environment = if clean {
        Environment::new()
    } else {
        process_environment(std::env::vars_os())
    };
    for (key, value) in overrides {
        environment.set(key, value);
    }
    environment
}

/// Variables that are not valid UTF-8 are skipped with a warning
fn process_environment(vars: impl Iterator<Item = (OsString, OsString)>) -> Environment {
    vars.filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
        (Ok(key), Ok(value)) => Some((key, value)),
        (key, _) => {
            tracing::warn!(key = ?key, "skipping environment variable that is not valid UTF-8");
            None
        }
    })
    .collect()
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, format!("{}\n", text))
            .wrap_err_with(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", text)?;
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = catalog::registry()?;

    match cli.command {
        Commands::Compile {
            stack,
            output,
            env,
            clean_env,
            description,
            max_depth,
            compact,
            digest,
        } => {
            if !registry.contains(&stack) {
                return Err(eyre!(
                    "unknown stack '{}', available: {}",
                    stack,
                    registry.names().join(", ")
                ));
            }
            let mut options = CompileOptions::new()
                .with_max_depth(max_depth)
                .with_pretty(!compact);
            if let Some(description) = description {
                options = options.with_description(description);
            }
            let compiler = Compiler::new(registry).with_options(options);
            let environment = environment(env, clean_env);

            let template = compiler.compile(&stack, &environment)?;
            let text = if compact {
                template.to_json()?
            } else {
                template.to_json_pretty()?
            };
            write_output(output.as_deref(), &text)?;
            info!(stack = %stack, resources = template.resources.len(), "template compiled");
            if digest {
                eprintln!("{}", template.digest()?);
            }
            Ok(())
        }
        Commands::List => {
            for name in registry.names() {
                let stack = registry.get(name)?;
                println!("{:<16} {}", name, stack.description().unwrap_or(""));
            }
            Ok(())
        }
    }
}
