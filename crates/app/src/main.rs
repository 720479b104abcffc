mod repl;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use agri_chat_client::{AdvisoryHttpClient, ConversationId};
use agri_chat_session::{ChatSessionController, SensorAttachmentSource};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::repl::{QueuedImagePicker, RouteState};
use crate::settings::AppSettings;

#[derive(Debug, Parser)]
#[command(name = "agri-assistant")]
#[command(about = "Terminal client for the agricultural advisory assistant", long_about = None)]
struct Args {
    /// Settings file to read instead of the per-user default
    #[arg(long)]
    config: Option<PathBuf>,
    /// Conversation to open on start
    #[arg(long)]
    open: Option<String>,
}

fn init_tracing() {
    // Logs go to stderr so they never interleave with the transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();

    let config_path = args.config.or_else(AppSettings::default_config_path);
    let settings = AppSettings::load(config_path.as_deref());
    tracing::info!(settings = ?settings, "settings loaded");

    let client = match AdvisoryHttpClient::new(settings.client_config()) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            tracing::error!(error = %error, "failed to create backend client");
            return ExitCode::FAILURE;
        }
    };

    let images = Arc::new(QueuedImagePicker::default());
    let attachment_source = Arc::new(SensorAttachmentSource::new(
        client.clone(),
        images.clone(),
        settings.coordinates(),
    ));
    let route = RouteState::new(args.open.map(ConversationId::from));
    let controller = ChatSessionController::new(
        client,
        attachment_source,
        Box::new(route.clone()),
        settings.session_options(),
    );

    match repl::run(controller, route, images).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "terminal session failed");
            ExitCode::FAILURE
        }
    }
}
