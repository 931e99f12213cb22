//! Token intermediary for the time tracker.
//!
//! Holds the FreeAgent client secret and relays code and refresh exchanges for clients that must
//! never see it.

// std
use std::{
	net::{IpAddr, SocketAddr},
	process::ExitCode,
	sync::Arc,
};
// crates.io
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use url::Url;
// self
use timeslip_auth::{
	auth::ProviderId,
	oauth::TokenEndpointClient,
	proxy::{self, ProxyState},
};

#[derive(Debug, Parser)]
#[command(version, about = "Relays OAuth token exchanges so clients never hold the client secret.")]
struct Cli {
	/// Interface to listen on.
	#[arg(long, env = "TIMESLIP_PROXY_HOST", default_value = "127.0.0.1")]
	host: IpAddr,
	/// Port to listen on.
	#[arg(long, env = "TIMESLIP_PROXY_PORT", default_value_t = 3000)]
	port: u16,
	/// Provider slug served under `/api/<provider>/...`.
	#[arg(long, env = "TIMESLIP_PROVIDER", default_value = "freeagent")]
	provider: String,
	/// OAuth client identifier.
	#[arg(long, env = "FREEAGENT_CLIENT_ID")]
	client_id: String,
	/// OAuth client secret.
	#[arg(long, env = "FREEAGENT_CLIENT_SECRET", hide_env_values = true)]
	client_secret: String,
	/// Provider token endpoint.
	#[arg(long, env = "FREEAGENT_TOKEN_URL", default_value = "https://api.freeagent.com/v2/token_endpoint")]
	token_url: Url,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!("{e}");

			ExitCode::FAILURE
		},
	}
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
	let provider = ProviderId::new(&cli.provider)?;
	let upstream = TokenEndpointClient::with_reqwest(&cli.token_url, cli.client_id, cli.client_secret)?;
	let app = proxy::router(ProxyState::new(provider.clone(), Arc::new(upstream)));
	let addr = SocketAddr::new(cli.host, cli.port);
	let listener = TcpListener::bind(addr).await?;

	tracing::info!(%addr, %provider, token_url = %cli.token_url, "Token proxy listening.");

	axum::serve(listener, app).await?;

	Ok(())
}
