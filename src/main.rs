use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use remo_gateway::api::{ApiServer, ApiState};
use remo_gateway::chat::{ChatGateway, ChatReply};
use remo_gateway::persona::{PersonaCatalog, PersonaSpeechBinding};
use remo_gateway::speech::SpeechService;
use remo_gateway::voice::{Transcriber, VoiceRenderer};
use remo_gateway::Config;

/// Remo - Voice-enabled assistant gateway
#[derive(Parser)]
#[command(name = "remo", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable speech output (for headless servers without audio hardware)
    #[arg(long, env = "REMO_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server (default)
    Serve,
    /// Chat from the terminal; interactive when no message is given
    Chat {
        /// Message to send
        message: Option<String>,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
        /// Speak replies
        #[arg(long)]
        speak: bool,
    },
    /// List personas
    Personas,
    /// List workspaces on the model backend
    Workspaces,
    /// Check that the model backend accepts the API key
    CheckAuth,
    /// List voices offered by the speech backend
    Voices,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Persona whose voice to use
        #[arg(short, long)]
        persona: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,remo_gateway=info",
        1 => "info,remo_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Long-lived services, wired once at startup
struct Services {
    config: Config,
    catalog: Arc<PersonaCatalog>,
    speech: Arc<SpeechService>,
    gateway: Arc<ChatGateway>,
    _binding: Arc<PersonaSpeechBinding>,
}

impl Services {
    async fn build(config: Config) -> Self {
        let renderer = Arc::new(VoiceRenderer::detect(&config.voice).await);
        let catalog = Arc::new(PersonaCatalog::open(config.persona_store.clone()));
        let binding = PersonaSpeechBinding::attach(&catalog, renderer.clone());
        let speech = Arc::new(SpeechService::new(renderer, catalog.clone()));
        let gateway = Arc::new(
            ChatGateway::new(&config.llm)
                .with_personas(catalog.clone())
                .with_speech(speech.clone()),
        );

        Self {
            config,
            catalog,
            speech,
            gateway,
            _binding: binding,
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(cli.disable_voice)?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    let services = Services::build(config).await;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(services).await,
        Command::Chat {
            message,
            no_stream,
            speak,
        } => {
            let streaming = !no_stream && services.config.llm.stream;
            match message {
                Some(message) => chat_once(&services, &message, streaming, speak).await,
                None => chat_interactive(&services, streaming, speak).await,
            }
        }
        Command::Personas => {
            list_personas(&services.catalog);
            Ok(())
        }
        Command::Workspaces => list_workspaces(&services.gateway).await,
        Command::CheckAuth => check_auth(&services.gateway).await,
        Command::Voices => list_voices(&services.speech).await,
        Command::TestTts { text, persona } => test_tts(&services.speech, &text, persona.as_deref()).await,
    }
}

async fn serve(services: Services) -> anyhow::Result<()> {
    let state = Arc::new(ApiState {
        gateway: services.gateway.clone(),
        catalog: services.catalog.clone(),
        speech: services.speech.clone(),
        transcriber: Arc::new(Transcriber::new(&services.config.stt)),
    });

    let port = services.config.api_server.port;
    tracing::info!(
        port,
        persona = %services.catalog.active_id(),
        voice = services.speech.renderer().is_available(),
        "starting remo gateway"
    );

    let server = ApiServer::new(state, port).spawn();
    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            services.speech.stop().await;
        }
    }
    Ok(())
}

async fn chat_once(services: &Services, message: &str, streaming: bool, speak: bool) -> anyhow::Result<()> {
    let reply = if speak {
        services.gateway.send_and_speak(message, streaming).await?
    } else {
        services.gateway.send(message, streaming).await?
    };
    print_reply(reply).await?;

    if speak {
        // Let background speech finish before the process exits
        services.speech.wait_idle().await;
    }
    Ok(())
}

async fn print_reply(reply: ChatReply) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    match reply {
        ChatReply::Complete(text) => writeln!(stdout, "{text}")?,
        ChatReply::Stream(mut stream) => {
            while let Some(fragment) = stream.next().await {
                write!(stdout, "{}", fragment?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }
    Ok(())
}

async fn chat_interactive(services: &Services, streaming: bool, speak: bool) -> anyhow::Result<()> {
    let persona = services.catalog.active();
    println!("{}: {}", persona.display_name, persona.greeting);
    println!("(commands: /personas, /persona <id>, /history, /clear, /quit)\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => {}
            ("/quit" | "/exit", _) => break,
            ("/personas", _) => list_personas(&services.catalog),
            ("/persona", id) => {
                if services.catalog.set_active(id.trim()) {
                    let persona = services.catalog.active();
                    println!("{}: {}", persona.display_name, persona.greeting);
                } else {
                    println!("unknown persona: {id}");
                }
            }
            ("/history", _) => {
                for message in services.gateway.history().await {
                    println!("[{:?}] {}", message.role, message.content);
                }
            }
            ("/clear", _) => {
                services.gateway.clear_history().await;
                println!("history cleared");
            }
            _ => {
                let reply = if speak {
                    services.gateway.send_and_speak(line, streaming).await
                } else {
                    services.gateway.send(line, streaming).await
                };
                match reply {
                    Ok(reply) => {
                        if let Err(e) = print_reply(reply).await {
                            eprintln!("error: {e}");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
        }
    }

    services.speech.stop().await;
    Ok(())
}

fn list_personas(catalog: &PersonaCatalog) {
    let active = catalog.active_id();
    for (id, description) in catalog.list() {
        let marker = if id == active { "*" } else { " " };
        println!("{marker} {id:<14} {description}");
    }
}

async fn list_workspaces(gateway: &ChatGateway) -> anyhow::Result<()> {
    let workspaces = gateway.list_workspaces().await?;
    if workspaces.is_empty() {
        println!("No workspaces found");
    }
    for workspace in workspaces {
        let marker = if workspace.slug == gateway.workspace() { "*" } else { " " };
        println!("{marker} {:<20} {}", workspace.slug, workspace.name);
    }
    Ok(())
}

async fn check_auth(gateway: &ChatGateway) -> anyhow::Result<()> {
    if gateway.check_auth().await? {
        println!("API key accepted");
        Ok(())
    } else {
        anyhow::bail!("API key rejected by the model backend")
    }
}

async fn list_voices(speech: &SpeechService) -> anyhow::Result<()> {
    for voice in speech.voices().await? {
        println!("{:<12} {}", voice.code, voice.name);
    }
    Ok(())
}

async fn test_tts(speech: &SpeechService, text: &str, persona: Option<&str>) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let status = speech.status().await;
    if !status.renderer.available {
        anyhow::bail!("no speech backend found (install espeak or espeak-ng)");
    }
    println!("Backend: {:?}", status.renderer.backend);

    if speech.speak(text, persona, true).await {
        println!("\n---");
        println!("If you heard the speech, TTS is working!");
        Ok(())
    } else {
        let status = speech.status().await;
        anyhow::bail!(
            "speech failed: {}",
            status.renderer.last_error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
