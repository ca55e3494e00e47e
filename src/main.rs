//! Product Authenticity Verifier Service
//!
//! Serves the verification API and keeps the trusted root set in sync with
//! the issuer's trust source.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use authenticity_verifier::config::Config;
use authenticity_verifier::membership::MembershipVerifier;
use authenticity_verifier::orchestrator::VerificationEngine;
use authenticity_verifier::rate_limit::{RateLimitStore, RateLimiter};
use authenticity_verifier::redis_store::RedisRateLimitStore;
use authenticity_verifier::root_registry::RootRegistry;
use authenticity_verifier::root_signer::IssuerVerifier;
use authenticity_verifier::server::{routes, AppState};
use authenticity_verifier::tag_auth::TagAuthenticator;
use authenticity_verifier::trust_source::TrustSourceClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "verifier.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting product authenticity verifier");

    // Load configuration (environment variables override the file)
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                "Failed to load config file {}: {}. Using environment variables.",
                args.config, e
            );
            Config::from_env().context("Failed to load configuration from environment variables")?
        }
    };
    info!("Configuration loaded successfully");

    // Initialize components
    let tags = TagAuthenticator::from_hex(
        &config.tag_master_key,
        &config.tag_application_id,
        &config.tag_system_identifier,
    )?;

    let membership = MembershipVerifier::load(
        &config.verification_key_path,
        config.circuit_version,
        config.verification_key_fingerprint.as_deref(),
    )
    .with_context(|| format!("Failed to load verification key {}", config.verification_key_path))?;

    let registry = Arc::new(build_registry(&config)?);
    info!("Root registry initialized with {} trusted roots", registry.len());

    let limiter: Arc<dyn RateLimitStore> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis admission store");
            Arc::new(RedisRateLimitStore::new(url, config.rate_limit()).await?)
        }
        None => Arc::new(RateLimiter::new(config.rate_limit())),
    };
    let limits = limiter.config();
    info!(
        "Rate limit: {} requests per {} ms",
        limits.max_requests, limits.window_ms
    );

    let engine = VerificationEngine::new(registry.clone(), Arc::new(tags), Arc::new(membership))
        .with_proof_timeout(config.proof_timeout());

    let trust_source = match &config.trust_source_url {
        Some(url) => Some(TrustSourceClient::new(url, config.request_timeout())?),
        None => None,
    };

    info!("All components initialized successfully");

    // Start HTTP server
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr))?;
    let server = warp::serve(routes(AppState { engine, limiter })).run(addr);
    info!("Verification server listening on {}", addr);

    let refresh_period = Duration::from_secs(config.trust_refresh_interval_secs);

    // Run server and trust source refresh concurrently
    tokio::select! {
        _ = server => {
            error!("HTTP server stopped unexpectedly");
        }
        _ = refresh_trusted_roots(trust_source, registry, refresh_period) => {
            error!("Trust source refresh loop stopped unexpectedly");
        }
    }

    Ok(())
}

/// Registry seeded from configured revocations and signed roots
fn build_registry(config: &Config) -> Result<RootRegistry> {
    let mut registry = RootRegistry::with_issuer(IssuerVerifier::from_hex(&config.issuer_address)?);
    if let Some(secs) = config.trust_max_staleness_secs {
        registry = registry.with_max_staleness(chrono::Duration::seconds(secs as i64));
    }

    for root in &config.revoked_roots {
        registry.revoke_root(root)?;
    }

    for signed in &config.trusted_roots {
        if let Err(e) = registry.add_signed_root(signed) {
            warn!("Ignoring configured root {}: {}", signed.root, e);
        }
    }

    Ok(registry)
}

/// Periodically republish the trusted set from the trust source
async fn refresh_trusted_roots(
    client: Option<TrustSourceClient>,
    registry: Arc<RootRegistry>,
    period: Duration,
) {
    let Some(client) = client else {
        // Static deployment: nothing to refresh
        return std::future::pending().await;
    };

    let mut ticker = interval(period);
    loop {
        ticker.tick().await;

        match client.refresh(&registry).await {
            Ok(count) => info!("Trusted root set refreshed: {} roots", count),
            Err(e) => error!("Error refreshing trusted roots: {}", e),
        }
    }
}
