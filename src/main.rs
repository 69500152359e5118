mod call;
mod cleanup;
mod cli;
mod details;
mod domcmd;
mod peek;
mod start;
mod status;
mod stop;
mod support;
mod tail;

use clap::{CommandFactory, Parser, error::ErrorKind};
use serde::Serialize;

use bdg::config;
use bdg::error::{AppError, ExitCode};

use cli::{Cli, Command, CompletionsArgs, ConfigCommand, ManArgs};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are informational, not errors — print as-is
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.print().expect("failed to write to stdout");
                std::process::exit(0);
            }
            // All other clap errors → JSON on stderr with the arguments code
            let msg = e.kind().to_string();
            let full = e.to_string();
            let clean = full
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty()
                        && !trimmed.starts_with("For more information")
                        && !trimmed.starts_with("Usage:")
                })
                .map(|line| line.strip_prefix("error: ").unwrap_or(line).trim())
                .collect::<Vec<_>>()
                .join(", ");
            let clean = if clean.is_empty() { msg } else { clean };
            let app_err = AppError {
                message: clean,
                code: ExitCode::InvalidArguments,
                custom_json: None,
            };
            app_err.print_json_stderr();
            std::process::exit(app_err.code as i32);
        }
    };

    if let Err(e) = run(&cli).await {
        e.print_json_stderr();
        std::process::exit(e.code as i32);
    }
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    match &cli.command {
        Command::Start(args) => start::execute_start(&cli.global, args).await,
        Command::Stop(args) => stop::execute_stop(&cli.global, args).await,
        Command::Status => status::execute_status(&cli.global).await,
        Command::Peek(args) => peek::execute_peek(&cli.global, args).await,
        Command::Tail(args) => tail::execute_tail(&cli.global, args).await,
        Command::Details(args) => details::execute_details(&cli.global, args).await,
        Command::Cdp(args) => call::execute_cdp(&cli.global, args).await,
        Command::Dom(args) => domcmd::execute_dom(&cli.global, args).await,
        Command::Cleanup => cleanup::execute_cleanup(&cli.global),
        Command::Config(args) => execute_config(cli, &args.command),
        Command::Completions(args) => execute_completions(args),
        Command::Man(args) => execute_man(args),
    }
}

#[derive(Serialize)]
struct ConfigInitOutput {
    created: String,
}

#[derive(Serialize)]
struct ConfigPathOutput {
    config_path: Option<String>,
}

fn execute_config(cli: &Cli, cmd: &ConfigCommand) -> Result<(), AppError> {
    let (config_path, config_file) = config::load_config(cli.global.config.as_deref());
    match cmd {
        ConfigCommand::Show => {
            let resolved = config::resolve(config_path, &config_file);
            support::print_output(&resolved, &cli.global.output)
        }
        ConfigCommand::Init(args) => {
            let path = config::init_config(args.path.as_deref())?;
            support::print_output(
                &ConfigInitOutput {
                    created: path.display().to_string(),
                },
                &cli.global.output,
            )
        }
        ConfigCommand::Path => support::print_output(
            &ConfigPathOutput {
                config_path: config_path.map(|p| p.display().to_string()),
            },
            &cli.global.output,
        ),
    }
}

#[allow(clippy::unnecessary_wraps)]
fn execute_completions(args: &CompletionsArgs) -> Result<(), AppError> {
    let mut cmd = Cli::command();
    clap_complete::generate(args.shell, &mut cmd, "bdg", &mut std::io::stdout());
    Ok(())
}

fn execute_man(args: &ManArgs) -> Result<(), AppError> {
    let cmd = Cli::command();

    let target = match &args.command {
        None => cmd,
        Some(name) => find_subcommand(&cmd, name).ok_or_else(|| AppError {
            message: format!("unknown command: {name}"),
            code: ExitCode::InvalidArguments,
            custom_json: None,
        })?,
    };

    let man = clap_mangen::Man::new(target);
    man.render(&mut std::io::stdout()).map_err(|e| AppError {
        message: format!("failed to render man page: {e}"),
        code: ExitCode::UnhandledException,
        custom_json: None,
    })?;
    Ok(())
}

fn find_subcommand(cmd: &clap::Command, name: &str) -> Option<clap::Command> {
    let parent_name = cmd.get_name().to_string();
    for sub in cmd.get_subcommands() {
        if sub.get_name() == name {
            let full_name = format!("{parent_name}-{name}");
            let leaked: &'static str = Box::leak(full_name.into_boxed_str());
            return Some(sub.clone().name(leaked));
        }
    }
    None
}
