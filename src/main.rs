use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use codeai_rs::app::App;
use codeai_rs::config::Config;
use codeai_rs::diagram::client::DiagramClient;
use codeai_rs::diagram::render::DiagramPipeline;
use codeai_rs::diagram::MermaidRenderer;
use codeai_rs::llm::offline::OfflineEndpoint;
use codeai_rs::llm::openai_client::OpenAIClient;
use codeai_rs::llm::ModelEndpoint;
use codeai_rs::repo::parse_repo;
use codeai_rs::session::Role;
use codeai_rs::streaming::SessionEvent;
use codeai_rs::tui::Tui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Coding assistant chat with code and diagram inspection", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    debug: bool,
    #[arg(long, global = true, help = "Answer with the built-in canned responder instead of the network")]
    offline: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message and stream the reply to stdout
    Ask {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Fetch a repository's architecture model and render it
    Diagram {
        /// `owner/repo` or `https://github.com/owner/repo`
        repo: String,
        #[arg(short, long, help = "Write the SVG here instead of stdout")]
        out: Option<PathBuf>,
        #[arg(long, help = "Print the diagram source without rendering")]
        source_only: bool,
    },
}

fn init_logging(debug_enabled: bool, to_file: bool) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug_enabled { "debug" } else { "info" }),
    );
    if to_file {
        // the terminal belongs to the TUI
        let path = std::env::temp_dir().join("codeai.log");
        let file = std::fs::File::create(&path).with_context(|| format!("cannot create log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn build_endpoint(config: &Config, offline: bool) -> Arc<dyn ModelEndpoint> {
    match config.openai_api_key() {
        Some(api_key) if !offline => {
            let model = config.model();
            log::info!("Using OpenAI-compatible endpoint at {} (model: {})", config.openai_base_url(), model);
            Arc::new(OpenAIClient::new(Some(api_key), &config.openai_base_url(), &model))
        }
        _ => {
            log::info!("Using offline responder");
            Arc::new(OfflineEndpoint::new())
        }
    }
}

async fn run_ask(mut app: App, message: &str) -> Result<()> {
    if !app.submit(message) {
        bail!("Nothing to send");
    }
    let mut stdout = std::io::stdout();
    while let Some(event) = app.recv_event().await {
        match &event {
            SessionEvent::TextDelta(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            SessionEvent::ToolCallRequested(call) => eprintln!("[tool] {} {}", call.name, serde_json::Value::Object(call.arguments.clone())),
            _ => {}
        }
        app.apply_event(event);
    }
    writeln!(stdout)?;

    match app.conversation.last() {
        Some(m) if m.role() == Role::Assistant => Ok(()),
        _ => bail!("{}", app.status().unwrap_or("The turn did not complete")),
    }
}

async fn run_diagram(config: &Config, repo: &str, out: Option<PathBuf>, source_only: bool) -> Result<()> {
    let repo = parse_repo(repo)?;
    let Some(endpoint) = config.diagram_endpoint() else {
        bail!("No diagram endpoint configured; set diagram.endpoint or CODEAI_DIAGRAM_URL");
    };
    if config.diagram_engine() != "mermaid" {
        log::warn!("Unknown diagram engine '{}', using mermaid", config.diagram_engine());
    }

    let model = DiagramClient::new(&endpoint).fetch_model(&repo.url()).await?;
    let source = codeai_rs::diagram::generate(&model);
    for collision in &source.collisions {
        eprintln!("warning: node id '{}' is shared by {:?}", collision.node_id, collision.raw_ids);
    }
    for rel in &source.dangling {
        eprintln!("warning: dropped relationship {} -> {}", rel.source, rel.destination);
    }
    if source_only {
        print!("{}", source.text);
        return Ok(());
    }

    let pipeline = DiagramPipeline::new(Arc::new(MermaidRenderer));
    let rendered = pipeline.render_source(&source.text).await?;
    match out {
        Some(path) => {
            std::fs::write(&path, &rendered.svg).with_context(|| format!("cannot write {:?}", path))?;
            log::info!("Wrote {}x{} diagram for {} to {:?}", rendered.width, rendered.height, repo, path);
        }
        None => println!("{}", rendered.svg),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    let debug_enabled = cli.debug || config.debug_enabled();
    init_logging(debug_enabled, cli.command.is_none())?;

    log::info!("CodeAI starting...");
    log::debug!("CLI args: {:?}", cli);

    match cli.command {
        Some(Command::Ask { message }) => {
            let endpoint = build_endpoint(&config, cli.offline);
            let app = App::new(config, endpoint, Arc::new(MermaidRenderer));
            run_ask(app, &message.join(" ")).await?;
        }
        Some(Command::Diagram { repo, out, source_only }) => {
            run_diagram(&config, &repo, out, source_only).await?;
        }
        None => {
            let endpoint = build_endpoint(&config, cli.offline);
            let mut app = App::new(config, endpoint, Arc::new(MermaidRenderer));
            let mut tui = Tui::new()?;
            tui.run_loop(&mut app).await?;
        }
    }

    log::info!("Application finished.");
    Ok(())
}
