use std::path::PathBuf;
use std::time::Duration;

use anosys_core::{
    AiClient, Config, Exporter, FunctionLogger, Instrumented,
    model::{ChatCompletionRequest, ChatMessage, EmbeddingInput, EmbeddingRequest, ImageRequest},
    providers::openai::OpenAI,
};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "anosys telemetry smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Environment variables still apply on top.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Tag recorded as `source` on exported spans
    #[arg(long, global = true)]
    source: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an instrumented chat completion request
    Chat {
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Stream an instrumented chat completion (prints deltas live)
    ChatStream {
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Send an instrumented embedding request
    Embed {
        #[arg(long, default_value = "text-embedding-3-small")]
        model: String,
        #[arg(short, long, help = "Input text")]
        input: String,
    },
    /// Generate an image through the instrumented client
    Image {
        #[arg(long)]
        model: Option<String>,
        #[arg(short, long)]
        prompt: String,
        #[arg(long)]
        size: Option<String>,
    },
    /// Send a raw event: a JSON object of field name to value
    Event {
        #[arg(long)]
        json: String,
    },
    /// Count words through the function logger
    Count {
        #[arg(short, long)]
        text: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    let mut cfg = cfg.with_env_lookup(|k| std::env::var(k).ok());
    if cli.source.is_some() {
        cfg.source = cli.source.clone();
    }
    Ok(cfg)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,anosys_core=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    init_tracing(cfg.verbose);

    let exporter = Exporter::from_config(&cfg).await?;

    match cli.command {
        Commands::Chat { model, message } => {
            let client = Instrumented::new(OpenAI::from_env()?, exporter.clone());
            let req = ChatCompletionRequest::new(model, vec![ChatMessage::user(message)]);
            let resp = client
                .create_chat_completion(req)
                .await?
                .into_complete()
                .ok_or_else(|| anyhow::anyhow!("expected a complete response"))?;
            for choice in &resp.choices {
                println!("{}", choice.message.content.as_deref().unwrap_or_default());
            }
        }
        Commands::ChatStream { model, message } => {
            let client = Instrumented::new(OpenAI::from_env()?, exporter.clone());
            let req = ChatCompletionRequest::new(model, vec![ChatMessage::user(message)]).streaming();
            let mut stream = client
                .create_chat_completion(req)
                .await?
                .into_stream()
                .ok_or_else(|| anyhow::anyhow!("expected a stream"))?;
            use std::io::{self, Write};
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for part in &chunk.choices {
                            if let Some(text) = &part.delta.content {
                                print!("{text}");
                                io::stdout().flush().ok();
                            }
                            if let Some(reason) = &part.finish_reason {
                                println!();
                                eprintln!("[stop: {reason}]");
                            }
                        }
                    }
                    Err(err) => {
                        eprintln!("[error: {err}]");
                        break;
                    }
                }
            }
        }
        Commands::Embed { model, input } => {
            let client = Instrumented::new(OpenAI::from_env()?, exporter.clone());
            let req = EmbeddingRequest {
                model,
                input: EmbeddingInput::Single(input),
                dimensions: None,
                user: None,
            };
            let resp = client.create_embedding(req).await?;
            for e in &resp.data {
                println!("{} -> dim={}", e.index, e.embedding.len());
            }
        }
        Commands::Image {
            model,
            prompt,
            size,
        } => {
            let client = Instrumented::new(OpenAI::from_env()?, exporter.clone());
            let req = ImageRequest {
                prompt,
                model,
                n: Some(1),
                size,
                quality: None,
                response_format: None,
            };
            let resp = client.generate_image(req).await?;
            for image in &resp.data {
                println!("{}", image.url.as_deref().unwrap_or("<b64 payload>"));
            }
        }
        Commands::Event { json } => {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            let serde_json::Value::Object(record) = value else {
                anyhow::bail!("event must be a JSON object");
            };
            exporter.log_event(record).await;
        }
        Commands::Count { text } => {
            let source = cfg.source.clone().unwrap_or_else(|| "anosys-cli".into());
            let logged = FunctionLogger::new(exporter.clone(), source).wrap("count_words", count_words);
            println!("{}", logged.run(text.as_str()));
        }
    }

    if !exporter.flush(Duration::from_secs(5)).await {
        tracing::warn!("telemetry still in flight at exit; some records may be lost");
    }
    Ok(())
}
