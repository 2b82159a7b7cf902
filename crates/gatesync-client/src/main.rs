use std::io::Write;

use anyhow::Result;
use clap::Parser;
use gatesync_client::{render, CommandAction, CommandRegistry, GatewayClient, Input, Output};
use gatesync_core::EventKind;
use gatesync_session::projection::{can_submit, status_label};
use gatesync_util::init_tracing;
use tokio::io::{AsyncBufReadExt, BufReader};

mod cli;

use cli::{load_config, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = std::env::current_dir()?;
    let config = load_config(&cli, &project_dir)?;

    let guard = init_tracing(Some(config.log_level), config.log_dir.clone(), cli.print_logs);
    if let Some(path) = &guard.log_path {
        eprintln!("logging to {}", path.display());
    }
    tracing::info!(url = %config.gateway_url, "starting gatesync");

    let mut client = GatewayClient::new(&config);
    client.install_core_handlers();

    let status = client.status_store();
    let _printer = client.dispatcher().on_any(move |kind, event| {
        if let Some(output) = render(event) {
            print_output(output);
        }
        if matches!(
            kind,
            EventKind::Open | EventKind::Close | EventKind::Config | EventKind::ProviderSet
        ) {
            println!("({})", status_label(status.lock().status()));
        }
    });

    client.connect();
    let result = repl(&mut client).await;
    client.disconnect();
    result
}

async fn repl(client: &mut GatewayClient) -> Result<()> {
    let registry = CommandRegistry::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(event) => client.dispatch(&event),
                None => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if !handle_input(client, &registry, &line) {
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `false` when the user asked to quit.
fn handle_input(client: &GatewayClient, registry: &CommandRegistry, line: &str) -> bool {
    match registry.parse(line) {
        Input::Empty => {}
        Input::Chat(prompt) => {
            if !can_submit(&client.session(), &client.status()) {
                println!("(busy or offline, prompt not sent)");
            } else if !client.send_chat(&prompt) {
                println!("(not connected, prompt not sent)");
            }
        }
        Input::Command { action, argument } => {
            let sent = match (action, argument) {
                (CommandAction::Quit, _) => return false,
                (CommandAction::Help, _) => {
                    println!("{}", registry.help_text());
                    true
                }
                (CommandAction::ReloadSession, _) => client.request_session(),
                (CommandAction::ListModels, _) => client.get_models(),
                (CommandAction::SetProvider, Some(provider)) => client.set_provider(&provider),
                (CommandAction::SetModel, Some(model)) => client.set_model(&model),
                (CommandAction::SetProvider | CommandAction::SetModel, None) => false,
            };
            if !sent {
                println!("(not connected)");
            }
        }
        Input::MissingArgument(usage) => println!("usage: {}", usage),
        Input::Unknown(name) => println!("unknown command {}, try /help", name),
    }
    true
}

fn print_output(output: Output) {
    match output {
        Output::Inline(text) => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        Output::Line(text) => println!("{}", text),
    }
}
