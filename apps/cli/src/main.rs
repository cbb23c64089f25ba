use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use multichat_core_sdk::{
    client::BackendClient,
    config::{self, Settings},
    dispatch::{Dispatcher, Strategy},
    executor::{CodeRunner, PythonRunner},
    llm::HttpBackend,
    models::{
        ChatRequest, CodeExecutionRequest, Message, DEFAULT_EXEC_TIMEOUT_SECS, DEFAULT_MAX_TURNS,
    },
    server,
    session::Session,
    telemetry,
    turn::orchestrate,
};

/**
 * \brief Talk to several models at once, locally or through a running server.
 */
#[derive(Parser, Debug)]
#[command(name = "multichat", version, about = "Multi-model chat orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Start the HTTP backend (`/chat`, `/execute-code`, `/health`).
     */
    Serve {
        /// Defaults to 0.0.0.0:$PORT
        #[arg(long)]
        addr: Option<String>,
    },

    /**
     * \brief Send a prompt to every endpoint; without `--prompt`, read prompts from stdin.
     */
    Chat {
        #[arg(long)]
        prompt: Option<String>,
        /// TOML file with [[endpoints]] tables; defaults to MODEL_A/MODEL_B from the environment
        #[arg(long)]
        endpoints: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        auto_continue: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
        max_turns: u32,
        /// Route through a running server instead of calling providers directly
        #[arg(long)]
        backend: Option<String>,
        /// Let each endpoint see what the earlier ones answered
        #[arg(long, default_value_t = false)]
        relay: bool,
        /// Run RUN-CODE blocks found in replies
        #[arg(long, default_value_t = false)]
        exec_code: bool,
    },

    /**
     * \brief Show which default-endpoint variables are missing.
     */
    Health {
        #[arg(long)]
        backend: Option<String>,
    },

    /**
     * \brief Run a Python snippet the way `/execute-code` does.
     */
    Exec {
        #[arg(long)]
        code: String,
        #[arg(long, default_value_t = DEFAULT_EXEC_TIMEOUT_SECS)]
        timeout: u64,
        #[arg(long)]
        backend: Option<String>,
    },
}

enum Driver {
    Local(Dispatcher),
    Remote(BackendClient),
}

impl Driver {
    async fn send(&self, request: &ChatRequest) -> Result<Vec<Message>> {
        match self {
            Driver::Local(dispatcher) => Ok(orchestrate(dispatcher, request).await),
            Driver::Remote(client) => Ok(client.chat(request).await?.responses),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::from_env().context("load settings failed")?;
    telemetry::set_enabled(settings.telemetry);
    if let Some(dir) = &settings.log_dir {
        telemetry::set_log_dir(dir);
    }

    match cli.command {
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| format!("0.0.0.0:{}", settings.port));
            server::run(&addr, settings).await?;
        }
        Commands::Chat {
            prompt,
            endpoints,
            auto_continue,
            max_turns,
            backend,
            relay,
            exec_code,
        } => {
            let endpoints = match endpoints {
                Some(path) => config::load_endpoints(&path)
                    .with_context(|| format!("load endpoints from {} failed", path.display()))?,
                // The server applies its own defaults to an empty list.
                None if backend.is_some() => Vec::new(),
                None => settings.default_endpoints.clone(),
            };
            let driver = match backend {
                Some(url) => Driver::Remote(BackendClient::new(&url)),
                None => {
                    let mut dispatcher = Dispatcher::new(Arc::new(HttpBackend::default()));
                    if relay || settings.relay {
                        dispatcher = dispatcher.with_strategy(Strategy::relay());
                    }
                    if exec_code {
                        dispatcher = dispatcher.with_code_runner(
                            Arc::new(PythonRunner::new(settings.python.clone())),
                            Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
                        );
                    }
                    Driver::Local(dispatcher)
                }
            };

            let mut session = Session::new(endpoints);
            match prompt {
                Some(text) => {
                    session = submit(&session, &driver, &text, auto_continue, max_turns).await?;
                }
                None => {
                    session = repl(session, &driver, auto_continue, max_turns).await?;
                }
            }
            telemetry::log_event(
                "cli.chat",
                &format!(
                    "done turns={} messages={}",
                    session.turns().len(),
                    session.messages().len()
                ),
            );
        }
        Commands::Health { backend } => {
            let report = match backend {
                Some(url) => BackendClient::new(&url)
                    .health()
                    .await
                    .context("health request failed")?,
                None => config::health_report(&settings),
            };
            println!("status: {}", report.status);
            for var in &report.missing_env_vars {
                println!("  missing: {}", var);
            }
            for ep in &report.default_endpoints {
                println!("  default endpoint: {} ({})", ep.name, ep.model);
            }
        }
        Commands::Exec {
            code,
            timeout,
            backend,
        } => {
            let output = match backend {
                Some(url) => {
                    BackendClient::new(&url)
                        .execute_code(&CodeExecutionRequest { code, timeout })
                        .await
                        .context("execute-code request failed")?
                        .output
                }
                None => {
                    PythonRunner::new(settings.python.clone())
                        .run(&code, Duration::from_secs(timeout))
                        .await
                }
            };
            print!("{}", output);
        }
    }

    Ok(())
}

/**
 * \brief One user submission through the session state machine. Prints the new messages.
 */
async fn submit(
    session: &Session,
    driver: &Driver,
    text: &str,
    auto_continue: bool,
    max_turns: u32,
) -> Result<Session> {
    let pending = session.begin_submit(text)?;
    let next = if !pending.can_dispatch() {
        pending.reject_without_endpoints()?
    } else {
        match driver
            .send(&pending.chat_request(auto_continue, max_turns))
            .await
        {
            Ok(replies) => pending.complete_submit(replies)?,
            Err(e) => {
                telemetry::log_error("cli.chat", &format!("submit failed: {}", e));
                pending.fail_submit(&format!("Error: {:#}", e))?
            }
        }
    };
    print_messages(&next.messages()[pending.messages().len()..]);
    Ok(next)
}

async fn repl(
    mut session: Session,
    driver: &Driver,
    auto_continue: bool,
    max_turns: u32,
) -> Result<Session> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("read stdin failed")? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/transcript" => {
                for (i, turn) in session.turns().iter().enumerate() {
                    println!("--- turn {}", i + 1);
                    print_messages(turn.messages);
                }
            }
            text => {
                session = submit(&session, driver, text, auto_continue, max_turns).await?;
            }
        }
    }
    Ok(session)
}

fn print_messages(messages: &[Message]) {
    for msg in messages {
        let label = msg
            .name
            .clone()
            .unwrap_or_else(|| format!("{:?}", msg.role).to_lowercase());
        println!("[{}] {}", label, msg.content);
    }
}
