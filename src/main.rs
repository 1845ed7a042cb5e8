//! Herd - run commands on many hosts in parallel over SSH.
//!
//! This is the main entry point for the Herd CLI.

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands, SampleArgs};
use herd::config::{Config, Settings};
use herd::provider::{register_builtin_providers, Loader};
use herd::scripting::ScriptEngine;
use herd::ssh::SshExecutor;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("herd: {}", err);
            std::process::exit(1);
        }
    };
    init_logging(&config.settings, cli.verbose);

    register_builtin_providers();
    let loader = Loader::from_config(&config)?;
    let executor = Arc::new(
        SshExecutor::new(
            config.settings.agent_timeout,
            config.settings.connect_timeout,
        )
        .await?,
    );
    let mut engine = ScriptEngine::new(config.settings.clone(), loader, executor.clone());

    let exit_code = match cli.command {
        Commands::Run(args) => {
            apply_sampling(&mut engine, &args.sampling);
            let mut argv = args.filters;
            let split_at = argv.len();
            argv.extend(args.command);
            match engine.parse_command_line(&argv, Some(split_at)) {
                Ok(()) => {
                    engine.execute().await;
                    engine.save_history();
                    exit_code_for(&engine)
                }
                Err(err) => {
                    error!("{}", err);
                    1
                }
            }
        }
        Commands::Interactive(args) => {
            apply_sampling(&mut engine, &args.sampling);
            match engine.parse_command_line(&args.filters, None) {
                Ok(()) => {
                    engine.execute().await;
                    cli::interactive::run_loop(&mut engine).await;
                    engine.save_history();
                    exit_code_for(&engine)
                }
                Err(err) => {
                    error!("{}", err);
                    1
                }
            }
        }
        Commands::List(args) => {
            apply_sampling(&mut engine, &args.sampling);
            let filters = if args.filters.is_empty() {
                vec!["*".to_string()]
            } else {
                args.filters
            };
            match engine.parse_command_line(&filters, None) {
                Ok(()) => {
                    let mut line = String::from("list hosts");
                    if args.oneline {
                        line.push_str(" oneline");
                    }
                    if args.csv {
                        line.push_str(" csv");
                    }
                    for attribute in &args.attributes {
                        line.push(' ');
                        line.push_str(attribute);
                    }
                    engine
                        .parse_code_line(&line)
                        .expect("list command is well formed");
                    engine.execute().await;
                    if engine.errors() > 0 {
                        1
                    } else {
                        0
                    }
                }
                Err(err) => {
                    error!("{}", err);
                    1
                }
            }
        }
    };

    engine.end().await;
    executor.close();
    std::process::exit(exit_code);
}

fn apply_sampling(engine: &mut ScriptEngine, sampling: &SampleArgs) {
    if let Some(count) = sampling.count {
        engine.set_sampling(count, sampling.sample.clone());
    }
}

// 0 on success, 1 on engine errors, 2 when any host failed.
fn exit_code_for(engine: &ScriptEngine) -> i32 {
    if engine.host_failures() > 0 {
        2
    } else if engine.errors() > 0 {
        1
    } else {
        0
    }
}

/// Initialize logging from the configured level, overridden by -v flags.
fn init_logging(settings: &Settings, verbose: u8) {
    let filter = match verbose {
        0 => settings.log_level.as_filter().to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(verbose >= 2)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}
