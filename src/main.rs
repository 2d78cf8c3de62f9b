use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ferry::{
    Config,
    cli::{Cli, Commands, ConfigCommands, HistoryCommands, repl},
    core::agent::{Agent, ModeController, ToolRegistry, default_preamble},
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.prompt.is_some() && cli.command.is_some() {
        anyhow::bail!("Cannot use both a prompt and a subcommand");
    }

    match &cli.command {
        Some(Commands::Config { command }) => {
            match command {
                ConfigCommands::Show => {
                    let config = Config::load()?;
                    println!("{}", toml::to_string_pretty(&config)?);
                }
                ConfigCommands::Path => {
                    println!("{}", Config::config_path()?.display());
                }
            }
            return Ok(());
        }
        Some(Commands::History {
            command: HistoryCommands::Clear,
        }) => {
            let path = Config::history_path()?;
            match std::fs::remove_file(&path) {
                Ok(()) => println!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("No saved conversation");
                }
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        Some(Commands::Chat) | None => {}
    }

    let mut config = Config::load()?;
    cli.apply_overrides(&mut config.agent);
    let mut agent = build_agent(&config)?;

    let history_path = Config::history_path()?;
    if cli.r#continue {
        agent
            .load_history(&history_path)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    match cli.prompt {
        Some(prompt) => {
            let mut renderer = repl::TerminalRenderer::stdio();
            let result = agent
                .chat(&prompt, &mut |event| renderer.render(event))
                .await;
            renderer.end_turn();
            result.map_err(|e| anyhow::anyhow!("{e}"))?;
            if cli.r#continue {
                agent
                    .save_history(&history_path)
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
            }
            Ok(())
        }
        None => repl::run(&mut agent, &history_path).await,
    }
}

fn build_agent(config: &Config) -> anyhow::Result<Agent> {
    let agent_config = &config.agent;
    let provider = agent_config.create_provider()?;
    let working_dir = std::env::current_dir()?;

    let modes = ModeController::new(
        agent_config.mode,
        default_preamble(&agent_config.model, &working_dir),
    )
    .with_prompts(agent_config.plan_prompt(), agent_config.execute_prompt());

    Ok(Agent::new(provider, agent_config.to_settings())
        .with_tools(ToolRegistry::with_builtins(agent_config.shell_timeout()))
        .with_modes(modes)
        .with_working_dir(working_dir))
}
