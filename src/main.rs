use std::sync::Arc;

use mail_relay::config::ForwardingConfig;
use mail_relay::mailer::{ApiMailer, Mailer, SmtpConfig, SmtpMailer};
use mail_relay::pipeline::RelayHandler;
use mail_relay::server::relay_routes;
use mail_relay::storage::{FsStore, ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let port: u16 = std::env::var("MAIL_RELAY_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let store_root =
        std::env::var("MAIL_RELAY_STORE_ROOT").unwrap_or_else(|_| "./data/mail".to_string());

    let config = ForwardingConfig::load().unwrap_or_else(|e| {
        eprintln!("Error: Failed to load forwarding configuration: {e}");
        std::process::exit(1);
    });

    eprintln!("📨 Mail Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Events: http://0.0.0.0:{port}/events");
    eprintln!("   Store: {store_root} (bucket: {})", config.email_bucket);
    eprintln!(
        "   Rules: {} address, {} domain-rewrite",
        config.forward_mapping.len(),
        config.forward_domain_mapping.len()
    );

    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(store_root));

    // An HTTP mail API takes precedence; otherwise fall back to SMTP.
    let mailer: Arc<dyn Mailer> = if let Ok(endpoint) = std::env::var("MAIL_RELAY_API_URL") {
        let token = std::env::var("MAIL_RELAY_API_TOKEN").unwrap_or_else(|_| {
            eprintln!("Error: MAIL_RELAY_API_TOKEN not set (required with MAIL_RELAY_API_URL)");
            std::process::exit(1);
        });
        eprintln!("   Mailer: HTTP API ({endpoint})\n");
        Arc::new(ApiMailer::new(endpoint, token.into()))
    } else if let Some(smtp) = SmtpConfig::from_env() {
        eprintln!("   Mailer: SMTP ({}:{})\n", smtp.host, smtp.port);
        Arc::new(SmtpMailer::new(smtp))
    } else {
        eprintln!("Error: no outbound mailer configured");
        eprintln!("  set MAIL_RELAY_API_URL + MAIL_RELAY_API_TOKEN, or MAIL_RELAY_SMTP_HOST");
        std::process::exit(1);
    };

    let handler = Arc::new(RelayHandler::new(Arc::new(config), store, mailer));
    let app = relay_routes(handler);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "Mail relay listening");
    axum::serve(listener, app).await?;

    Ok(())
}
