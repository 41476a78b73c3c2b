//! agribot - voice farming assistant CLI

mod config;
mod location;
mod tools;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use agribot_live::transports::GeminiLiveTransport;
use agribot_live::{ConnectionState, SkyCondition, Turn};
use agribot_session::{
    Assistant, AssistantConfig, AssistantEvent, AudioCapture, AudioSink, BoxedDataTool,
    NullCapture, NullSink,
};

/// agribot - talk to a farming assistant
#[derive(Parser, Debug)]
#[command(name = "agribot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use for the live session
    #[arg(short, long)]
    model: Option<String>,

    /// Voice for spoken responses
    #[arg(long)]
    voice: Option<String>,

    /// Home district for crop price lookups
    #[arg(short, long)]
    district: Option<String>,

    /// Run without sound hardware (transcript only)
    #[arg(long)]
    no_audio: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("agribot=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "agribot=warn".into()),
            )
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Load config file
    let cfg = config::Config::load();

    let Some(api_key) = cfg.get_api_key() else {
        eprintln!("Error: No Gemini API key found");
        eprintln!();
        eprintln!("Set your API key with: export GEMINI_API_KEY=your-key");
        eprintln!("Or add it to the config file: agribot --init-config");
        std::process::exit(1);
    };

    // Merge config with CLI args (CLI takes precedence)
    let mut assistant_config = AssistantConfig::default();
    if let Some(model) = args.model.or(cfg.model.clone()) {
        assistant_config.model = model;
    }
    if let Some(voice) = args.voice.or(cfg.voice.clone()) {
        assistant_config.voice = voice;
    }
    if let Some(prompt) = cfg.system_prompt() {
        assistant_config.system_instruction = prompt;
    }

    let tools: Vec<BoxedDataTool> = vec![
        Arc::new(tools::WeatherForecastTool::new()),
        Arc::new(tools::CropPricesTool::new()),
    ];

    let (capture, sink) = open_devices(args.no_audio).await?;
    let transport = Arc::new(GeminiLiveTransport::new(api_key));
    let mut assistant = Assistant::new(transport, capture, sink, tools, assistant_config)
        .with_location_provider(Arc::new(location::IpLocationProvider));
    if let Some(district) = args.district.or(cfg.district.clone()) {
        assistant = assistant.with_default_district(district);
    }

    let mut events = assistant.subscribe();
    if let Err(e) = assistant.start().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    println!("Connected. Speak into the microphone; press Ctrl-C to stop.");
    println!();

    let mut printer = TurnPrinter::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                assistant.stop();
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let done = matches!(
                        &event,
                        AssistantEvent::Error { .. }
                            | AssistantEvent::StateChanged {
                                state: ConnectionState::Disconnected
                            }
                    );
                    printer.handle(&event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("dropped {skipped} events, display may be stale");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    println!();
    println!("Goodbye.");
    Ok(())
}

#[cfg(feature = "device")]
async fn open_devices(no_audio: bool) -> anyhow::Result<(Arc<dyn AudioCapture>, Box<dyn AudioSink>)> {
    use agribot_session::device::{CpalCapture, CpalSink};
    if no_audio {
        return Ok((Arc::new(NullCapture), Box::new(NullSink::new())));
    }
    let sink = CpalSink::open().await?;
    Ok((Arc::new(CpalCapture), Box::new(sink)))
}

#[cfg(not(feature = "device"))]
async fn open_devices(no_audio: bool) -> anyhow::Result<(Arc<dyn AudioCapture>, Box<dyn AudioSink>)> {
    if !no_audio {
        eprintln!("Note: built without the `device` feature; running transcript-only.");
    }
    Ok((Arc::new(NullCapture), Box::new(NullSink::new())))
}

/// Prints finalized turns as the conversation advances
struct TurnPrinter {
    printed: usize,
}

impl TurnPrinter {
    fn new() -> Self {
        Self { printed: 0 }
    }

    fn handle(&mut self, event: &AssistantEvent) {
        match event {
            AssistantEvent::LogUpdated { turns } => {
                while self.printed < turns.len() && turns[self.printed].is_final {
                    print_turn(&turns[self.printed]);
                    self.printed += 1;
                }
            }
            AssistantEvent::ToolCallStart { name, .. } => {
                println!("[Looking up {}...]", name);
            }
            AssistantEvent::ToolCallEnd { name, ok: false, .. } => {
                println!("[{} failed]", name);
            }
            AssistantEvent::Warning { message } => {
                eprintln!("Warning: {}", message);
            }
            AssistantEvent::Error { message } => {
                eprintln!("Error: {}", message);
            }
            AssistantEvent::StateChanged { state } => {
                tracing::debug!(state = state.name(), "connection state changed");
            }
            _ => {}
        }
    }
}

fn print_turn(turn: &Turn) {
    let speaker = match turn.role {
        agribot_live::Role::User => "You",
        agribot_live::Role::Model => "Agribot",
    };
    if let Some(text) = &turn.text {
        println!("{}: {}", speaker, text);
    }
    if let Some(weather) = &turn.weather {
        println!(
            "  Weather in {}: {} {}",
            weather.location,
            weather.temperature,
            condition_icon(weather.condition)
        );
        for day in &weather.forecast {
            println!(
                "    {:<10} {} {}",
                day.day,
                day.temperature,
                condition_icon(day.condition)
            );
        }
    }
    if let Some(prices) = &turn.crop_prices {
        println!("  {} prices in {}:", prices.crop, prices.district);
        for quote in &prices.prices {
            println!(
                "    {:<22} {:<18} grade {}",
                quote.market_name, quote.price, quote.grade
            );
        }
    }
}

fn condition_icon(condition: SkyCondition) -> &'static str {
    match condition {
        SkyCondition::Sunny => "sunny",
        SkyCondition::Cloudy => "cloudy",
        SkyCondition::Rainy => "rainy",
    }
}
