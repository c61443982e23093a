use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ja3rp_proxy::{tls, Ja3Ext, ProxyConfig, Server};

#[derive(Parser)]
#[command(name = "ja3rp")]
#[command(about = "HTTP(S) server and reverse proxy that filters TLS clients by JA3 fingerprint")]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(long, short, env = "JA3RP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8443
    #[arg(long, env = "JA3RP_LISTEN")]
    listen: Option<String>,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long, env = "JA3RP_CERT")]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "JA3RP_KEY")]
    key: Option<PathBuf>,

    /// Forward every request to this origin instead of serving the echo route
    #[arg(long, env = "JA3RP_DESTINATION")]
    destination: Option<String>,

    /// Only these JA3 digests may connect (comma-separated)
    #[arg(long, value_delimiter = ',', env = "JA3RP_JA3_WHITELIST")]
    ja3_whitelist: Vec<String>,

    /// These JA3 digests are refused (comma-separated)
    #[arg(long, value_delimiter = ',', env = "JA3RP_JA3_BLACKLIST")]
    ja3_blacklist: Vec<String>,

    /// Only these client IPs may connect (comma-separated)
    #[arg(long, value_delimiter = ',', env = "JA3RP_IP_WHITELIST")]
    ip_whitelist: Vec<String>,

    /// These client IPs are refused (comma-separated)
    #[arg(long, value_delimiter = ',', env = "JA3RP_IP_BLACKLIST")]
    ip_blacklist: Vec<String>,

    /// Seconds allowed for the ClientHello and for the rest of the handshake
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Check configuration and TLS material, then exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    let config = load_config(&args)?;
    let mut options = config.server_options()?;
    if options.destination.is_none() {
        options.router = Some(echo_router());
    }

    if args.validate {
        if let (Some(cert), Some(key)) = (&config.tls.cert_path, &config.tls.key_path) {
            tls::server_config_from_pem(cert, key).context("TLS material")?;
        }
        println!("configuration OK");
        return Ok(());
    }

    let server = Arc::new(Server::new(config.server.listen.clone(), options)?);
    tokio::spawn({
        let server = server.clone();
        async move {
            shutdown_signal().await;
            info!("Shutting down");
            server.close();
        }
    });

    match (&config.tls.cert_path, &config.tls.key_path) {
        (Some(cert), Some(key)) => server.listen_and_serve_tls(cert, key).await?,
        _ => {
            warn!("No certificate configured; serving plain HTTP without fingerprinting");
            server.listen_and_serve().await?
        }
    }
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(args: &Args) -> Result<ProxyConfig> {
    let mut config = match &args.config {
        Some(path) => ProxyConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ProxyConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if let Some(secs) = args.handshake_timeout {
        config.server.handshake_timeout_secs = secs;
    }
    if args.cert.is_some() || args.key.is_some() {
        config.tls.cert_path = args.cert.clone();
        config.tls.key_path = args.key.clone();
    }
    if let Some(destination) = &args.destination {
        config.proxy.destination = Some(destination.clone());
    }
    override_list(&mut config.policy.ja3_whitelist, &args.ja3_whitelist);
    override_list(&mut config.policy.ja3_blacklist, &args.ja3_blacklist);
    override_list(&mut config.policy.ip_whitelist, &args.ip_whitelist);
    override_list(&mut config.policy.ip_blacklist, &args.ip_blacklist);

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn override_list(target: &mut Vec<String>, flag: &[String]) {
    let values: Vec<String> = flag
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !values.is_empty() {
        *target = values;
    }
}

/// `/` answers with the caller's own fingerprint.
fn echo_router() -> Router {
    Router::new().route("/", get(echo))
}

async fn echo(req: Request) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ja3": req.ja3(),
        "ja3_raw": req.ja3_raw(),
        "client": req.connection().map(|c| c.remote_addr.to_string()),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
