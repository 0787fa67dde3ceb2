use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use call_bridge::retention;
use call_bridge::{
    ApiServerBuilder, AudioStore, Config, ElevenLabsSynthesizer, OpenAiChat, SessionStore,
    SpeechRenderer,
};

/// Call Bridge - phone calls answered by an AI voice assistant
#[derive(Parser)]
#[command(name = "callbridge", version, about)]
struct Cli {
    /// Port to listen on (overrides CALLBRIDGE_PORT / config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize one reply into the audio directory
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Run one retention pass over the audio directory and exit
    Sweep,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,call_bridge=info",
        1 => "info,call_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let port = cli.port.unwrap_or(config.server.port);

    match cli.command {
        Some(Command::TestTts { text }) => test_tts(&config, port, &text).await,
        Some(Command::Sweep) => sweep(&config).await,
        None => serve(config, port).await,
    }
}

async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let generator = Arc::new(chat(&config)?);
    let synthesizer = Arc::new(synthesizer(&config)?);

    tracing::info!(
        port,
        model = generator.model(),
        voice_id = synthesizer.voice_id(),
        custom_prompt = config.llm.system_prompt.is_some(),
        audio_dir = %config.server.audio_dir.display(),
        "starting call bridge"
    );

    let audio = AudioStore::new(&config.server.audio_dir)?;
    let sessions = Arc::new(SessionStore::new());

    tokio::spawn(retention::start_retention_task(
        audio.clone(),
        sessions.clone(),
        config.retention,
    ));

    let server = ApiServerBuilder::new(generator, synthesizer, audio, port)
        .sessions(sessions)
        .system_prompt(config.llm.system_prompt.clone())
        .public_url(config.server.public_url.clone())
        .build();

    server.run().await?;
    Ok(())
}

fn chat(config: &Config) -> anyhow::Result<OpenAiChat> {
    let mut chat = OpenAiChat::new(config.openai_key()?, config.llm.model.clone())?;
    if let Some(base) = &config.llm.api_base {
        chat = chat.with_api_base(base.as_str());
    }
    Ok(chat)
}

fn synthesizer(config: &Config) -> anyhow::Result<ElevenLabsSynthesizer> {
    let mut tts =
        ElevenLabsSynthesizer::new(config.elevenlabs_key()?, config.voice.voice_id.clone())?
            .with_model(config.voice.model.clone());
    if let Some(base) = &config.voice.api_base {
        tts = tts.with_api_base(base.as_str());
    }
    Ok(tts)
}

/// Render a reply the same way a call turn does
async fn test_tts(config: &Config, port: u16, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let base = match &config.server.public_url {
        Some(url) => url.clone(),
        None => Url::parse(&format!("http://localhost:{port}/"))?,
    };

    let renderer = SpeechRenderer::new(
        Arc::new(synthesizer(config)?),
        AudioStore::new(&config.server.audio_dir)?,
    );
    let rendered = renderer.render(text, &base).await?;

    println!("Stored {}", rendered.filename);
    println!("Playable at {}", rendered.url);
    Ok(())
}

/// Delete expired audio without starting the server
async fn sweep(config: &Config) -> anyhow::Result<()> {
    let audio = AudioStore::new(&config.server.audio_dir)?;
    let report = retention::sweep_once(&audio, &SessionStore::new(), &config.retention).await;
    println!("Removed {} audio file(s)", report.audio_files);
    Ok(())
}
