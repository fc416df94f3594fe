use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use zipblob::http::{self, AppState};
use zipblob::store::{BlobStore, S3BlobStore};
use zipblob::telemetry::{self, LogFormat};
use zipblob::{Settings, ZipService, ui};

#[derive(Parser)]
#[command(name = "zipblob", version, about = "Zip objects in an S3 bucket into a new archive in the same bucket")]
struct Cli {
    /// JSON settings file; ZIPBLOB_* environment variables override it
    #[arg(long, global = true, env = "ZIPBLOB_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to listen on
        #[arg(long, env = "ZIPBLOB_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },
    /// Zip the given object keys once and print the archive key
    Zip {
        /// Object keys, in the order they should appear in the archive
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_logging(cli.log_format)?;

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), anyhow::Error::from(e));
            std::process::exit(2);
        }
    };

    let store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::connect(&settings).await);
    let zips = Arc::new(ZipService::new(store, &settings));

    // Ctrl-C cancels in-flight work, which cleans up its partial archives
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    match cli.command {
        Commands::Serve { listen } => {
            let listener = TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;

            info!(%listen, bucket = %settings.bucket, prefix = %settings.output_prefix, "listening");

            http::serve(listener, Arc::new(AppState { zips, shutdown }))
                .await
                .context("server terminated unexpectedly")?;
        }
        Commands::Zip { paths } => {
            let spinner = ui::create_spinner(format!("Zipping {} files", paths.len()));
            let result = zips.zip_files(&paths, &shutdown).await;
            spinner.finish_and_clear();

            match result {
                Ok(output) => println!("{output}"),
                Err(e) => {
                    eprintln!("{} {:#}", "Error:".red().bold(), anyhow::Error::from(e));
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
