use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_image_gallery::{
    config::{ClientSettings, ServiceSettings},
    gallery::{
        FeedKind, FileBackend, GalleryOrchestrator, HttpGalleryApi, MemoBackend, MemoStore,
        MemoryBackend, Notice, NoticeLevel, Outcome, SystemClock,
    },
    modelscope::ModelScopeProvider,
    service::{AppState, build_router},
    storage::{ImageTable, JsonFileTable, LocalFileStorage, MemoryTable},
};

#[derive(Parser)]
#[command(name = "ai-image-gallery")]
#[command(version, about = "AI image gallery service and terminal client")]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(short = 'v', long, default_value = "info", global = true)]
    log_level: String,

    /// Keep the page memo in memory only for this run
    #[arg(long, global = true)]
    no_memo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the generation & query HTTP service
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Keep image records in memory; stored files are still written
        #[arg(long)]
        ephemeral: bool,
    },
    /// Generate one image from a prompt
    Generate { prompt: String },
    /// List the gallery, or search it when a term is given
    Browse {
        #[arg(short, long, default_value = "")]
        term: String,
        /// Number of pages to walk
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_filter = format!(
        "ai_image_gallery={level},tower_http={level}",
        level = cli.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            ephemeral,
        } => serve(port, data_dir, ephemeral).await,
        Command::Generate { prompt } => generate(&prompt, cli.no_memo).await,
        Command::Browse { term, pages } => browse(&term, pages, cli.no_memo).await,
    }
}

async fn serve(port: Option<u16>, data_dir: Option<PathBuf>, ephemeral: bool) -> Result<()> {
    let mut settings = ServiceSettings::from_env();
    if let Some(port) = port {
        let host = settings
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        settings.bind_address = format!("{host}:{port}");
    }
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }

    let provider = ModelScopeProvider::new(settings.require_api_key()?)
        .with_api_root(settings.modelscope_api_root.clone())
        .with_model(settings.modelscope_model.clone());
    let storage = LocalFileStorage::new(settings.data_dir.clone(), settings.public_url.clone());
    let table: Arc<dyn ImageTable> = if ephemeral {
        Arc::new(MemoryTable::new())
    } else {
        Arc::new(JsonFileTable::new(settings.data_dir.clone()))
    };
    let router = build_router(AppState {
        provider: Arc::new(provider),
        storage: Arc::new(storage),
        table,
    });

    let tcp_listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    tracing::info!(
        bind = %settings.bind_address,
        data_dir = %settings.data_dir.display(),
        public_url = %settings.public_url,
        ephemeral,
        "image gallery service started"
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn client(no_memo: bool) -> Result<GalleryOrchestrator> {
    let settings = ClientSettings::from_env()?;
    let backend: Arc<dyn MemoBackend> = if no_memo {
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(FileBackend::new(settings.memo_dir.clone()))
    };
    let memo = MemoStore::new(backend, Arc::new(SystemClock));
    let api = HttpGalleryApi::new(&settings.api_url);
    Ok(GalleryOrchestrator::new(Arc::new(api), memo, settings.page_limit))
}

fn print_notices(notices: Vec<Notice>) {
    for notice in notices {
        let label = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        };
        match notice.description {
            Some(description) => println!("[{label}] {}: {description}", notice.title),
            None => println!("[{label}] {}", notice.title),
        }
    }
}

async fn generate(prompt: &str, no_memo: bool) -> Result<()> {
    let gallery = client(no_memo)?;
    match gallery.submit_prompt(prompt).await {
        Outcome::Rejected => println!("prompt must not be empty"),
        Outcome::Completed => {
            if let Some(url) = gallery.last_generated_image() {
                println!("{url}");
            }
        }
        _ => {}
    }
    print_notices(gallery.take_notices());
    Ok(())
}

async fn browse(term: &str, pages: u32, no_memo: bool) -> Result<()> {
    let gallery = client(no_memo)?;
    let term = term.trim();
    let mut outcome = if term.is_empty() {
        gallery.initial_load().await
    } else {
        gallery.load_page(term, true).await
    };
    for _ in 1..pages {
        if !matches!(outcome, Outcome::Completed | Outcome::ServedFromMemo) {
            break;
        }
        outcome = gallery.load_more(term).await;
    }

    let snapshot = gallery.snapshot(FeedKind::for_term(term));
    for item in &snapshot.items {
        println!("{}\t{}\t{}", item.id, item.prompt, item.image_url);
    }
    if snapshot.has_more {
        println!("(more results available)");
    }
    print_notices(gallery.take_notices());
    Ok(())
}
