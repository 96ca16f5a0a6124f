//! Terminal client for the relay.

use std::process::ExitCode;

use clap::Parser;
use relay_client::{ClientConfig, ClientEvent, ClientSession, Direction};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Lowest port a relay may listen on.
const MIN_PORT: u16 = 1024;

const HELP: &str = "\
commands:
  message <to> <text>   send a message
  users                 list known users
  contacts              list your contacts
  add <name>            add a contact
  remove <name>         remove a contact
  history [name]        show message history
  help                  show this help
  exit                  leave the chat";

#[derive(Debug, Parser)]
#[command(name = "relay-client", version, about = "Terminal client for the chat relay")]
struct Args {
    /// Server address
    #[arg(default_value = "127.0.0.1")]
    addr: String,

    /// Server port (1024-65535)
    #[arg(default_value_t = 7777)]
    port: u32,

    /// Display name to log in with
    #[arg(short, long)]
    name: String,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Message { to: String, text: String },
    Users,
    Contacts,
    Add(String),
    Remove(String),
    History(Option<String>),
    Help,
    Exit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let name_arg = |cmd: &str| {
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            Err(format!("usage: {cmd} <name>"))
        } else {
            Ok(rest.to_string())
        }
    };

    match word {
        "message" => match rest.split_once(char::is_whitespace) {
            Some((to, text)) if !text.trim().is_empty() => Ok(Command::Message {
                to: to.to_string(),
                text: text.trim().to_string(),
            }),
            _ => Err("usage: message <to> <text>".to_string()),
        },
        "users" => Ok(Command::Users),
        "contacts" => Ok(Command::Contacts),
        "add" => name_arg("add").map(Command::Add),
        "remove" => name_arg("remove").map(Command::Remove),
        "history" if rest.is_empty() => Ok(Command::History(None)),
        "history" => name_arg("history").map(|name| Command::History(Some(name))),
        "help" => Ok(Command::Help),
        "exit" => Ok(Command::Exit),
        "" => Err(String::new()),
        other => Err(format!("unknown command {other:?}, try `help`")),
    }
}

async fn execute(session: &ClientSession, command: Command) {
    let result = match command {
        Command::Message { to, text } => session.send_chat(&to, &text).await,
        Command::Users => session.refresh_users().await.map(|users| {
            println!("users: {}", users.join(", "));
        }),
        Command::Contacts => session.refresh_contacts().await.map(|contacts| {
            println!("contacts: {}", contacts.join(", "));
        }),
        Command::Add(name) => session.add_contact(&name).await,
        Command::Remove(name) => session.remove_contact(&name).await,
        Command::History(peer) => {
            for entry in session.history(peer.as_deref()) {
                let arrow = match entry.direction {
                    Direction::Incoming => "<-",
                    Direction::Outgoing => "->",
                };
                println!("{arrow} {}: {}", entry.peer, entry.text);
            }
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Exit => Ok(()),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let port = match u16::try_from(args.port) {
        Ok(port) if port >= MIN_PORT => port,
        _ => {
            eprintln!("port must be between {MIN_PORT} and 65535, got {}", args.port);
            return ExitCode::FAILURE;
        }
    };
    let addr = format!("{}:{port}", args.addr);

    let (session, mut events) =
        match ClientSession::connect(&addr, &args.name, ClientConfig::default()).await {
            Ok(connected) => connected,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        };
    let receiver = session.spawn_receiver();
    println!("logged in as {}; type `help` for commands", session.name());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let code = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Message { from, text }) => println!("{from}: {text}"),
                Some(ClientEvent::ConnectionLost) | None => {
                    eprintln!("connection to server lost");
                    break ExitCode::FAILURE;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Command::Exit) => break ExitCode::SUCCESS,
                    Ok(command) => execute(&session, command).await,
                    Err(usage) if usage.is_empty() => {}
                    Err(usage) => eprintln!("{usage}"),
                },
                // End of input counts as exit.
                Ok(None) => break ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("stdin: {e}");
                    break ExitCode::FAILURE;
                }
            },
        }
    };

    session.shutdown().await;
    let _ = receiver.await;
    code
}
