// std
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
// crates.io
use axum::{
	Router,
	extract::{Query, State},
	http::StatusCode,
	response::{Html, IntoResponse},
	routing::get,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	redirect::{BrowserSurface, BrowsingContext, CallbackParams, RedirectCapture, std_timeout},
};

/// Default loopback port registered as the desktop redirect.
pub const DEFAULT_LOOPBACK_PORT: u16 = 8080;
/// Default callback path.
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth/callback";

const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Redirect variant that binds a short-lived HTTP listener on the loopback interface.
///
/// The listener exists only for the duration of one [`capture`](crate::redirect::RedirectListener::capture)
/// call. It serves the callback path, answers `GET /health`, and returns 404 for anything else.
#[derive(Clone)]
pub struct LoopbackHttpRedirect {
	bind_ip: IpAddr,
	port: u16,
	public_host: String,
	path: String,
	browser: Arc<dyn BrowsingContext>,
}
impl LoopbackHttpRedirect {
	/// Listener on `127.0.0.1:8080` advertising `http://localhost:8080/oauth/callback`.
	pub fn new(browser: Arc<dyn BrowsingContext>) -> Self {
		Self {
			bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
			port: DEFAULT_LOOPBACK_PORT,
			public_host: "localhost".into(),
			path: DEFAULT_CALLBACK_PATH.into(),
			browser,
		}
	}

	/// Overrides the port. `0` binds an ephemeral port and advertises whichever was assigned.
	pub fn with_port(mut self, port: u16) -> Self {
		self.port = port;

		self
	}

	/// Overrides the callback path.
	pub fn with_path(mut self, path: impl Into<String>) -> Self {
		let path = path.into();

		self.path = if path.starts_with('/') { path } else { format!("/{path}") };

		self
	}

	/// Overrides the host name embedded in the redirect URI (defaults to `localhost`).
	pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
		self.public_host = host.into();

		self
	}

	pub(crate) async fn capture<F>(&self, build_url: F, timeout: Duration) -> Result<RedirectCapture>
	where
		F: Send + FnOnce(&Url) -> Url,
	{
		let addr = SocketAddr::new(self.bind_ip, self.port);
		let listener = TcpListener::bind(addr)
			.await
			.map_err(|source| ConfigError::LoopbackBind { addr: addr.to_string(), source })?;
		let bound = listener
			.local_addr()
			.map_err(|source| ConfigError::LoopbackBind { addr: addr.to_string(), source })?;
		let redirect_uri =
			Url::parse(&format!("http://{}:{}{}", self.public_host, bound.port(), self.path))
				.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let (callback_tx, callback_rx) = oneshot::channel();
		let mut session = LoopbackSession::start(listener, &self.path, callback_tx);

		#[cfg(feature = "tracing")]
		tracing::debug!(%redirect_uri, "Loopback redirect listener started.");

		let authorize_url = build_url(&redirect_uri);
		let surface: Arc<dyn BrowserSurface> = Arc::from(self.browser.open(&authorize_url)?);

		session.surface = Some(surface.clone());

		let outcome = tokio::select! {
			received = callback_rx => match received {
				Ok(params) => Ok(RedirectCapture { redirect_uri, params }),
				Err(_) => Err(Error::AuthorizationIncomplete {
					reason: "the loopback listener stopped before a redirect arrived".into(),
				}),
			},
			_ = surface.closed() => Err(Error::AuthorizationIncomplete {
				reason: "the authorization window was closed".into(),
			}),
			_ = tokio::time::sleep(std_timeout(timeout)) =>
				Err(Error::AuthorizationTimeout { waited: timeout }),
		};

		session.close().await;

		outcome
	}
}
impl Debug for LoopbackHttpRedirect {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LoopbackHttpRedirect")
			.field("bind_ip", &self.bind_ip)
			.field("port", &self.port)
			.field("public_host", &self.public_host)
			.field("path", &self.path)
			.finish_non_exhaustive()
	}
}

/// Owns the running listener and the opened surface; dropping it releases both.
struct LoopbackSession {
	shutdown: Option<oneshot::Sender<()>>,
	server: Option<JoinHandle<()>>,
	surface: Option<Arc<dyn BrowserSurface>>,
}
impl LoopbackSession {
	fn start(listener: TcpListener, path: &str, callback: oneshot::Sender<CallbackParams>) -> Self {
		let sender: CallbackSender = Arc::new(Mutex::new(Some(callback)));
		let router = Router::new()
			.route(path, get(receive_callback))
			.route("/health", get(health))
			.fallback(not_found)
			.with_state(sender);
		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
		let server = tokio::spawn(async move {
			let served = axum::serve(listener, router)
				.with_graceful_shutdown(async move {
					let _ = shutdown_rx.await;
				})
				.await;

			#[cfg(feature = "tracing")]
			{
				if let Err(e) = served {
					tracing::warn!(error = %e, "Loopback redirect listener failed.");
				}
			}
			#[cfg(not(feature = "tracing"))]
			let _ = served;
		});

		Self { shutdown: Some(shutdown_tx), server: Some(server), surface: None }
	}

	/// Closes the surface, then lets in-flight responses finish before stopping the listener.
	async fn close(mut self) {
		if let Some(surface) = self.surface.take() {
			surface.close();
		}
		if let Some(shutdown) = self.shutdown.take() {
			let _ = shutdown.send(());
		}
		if let Some(mut server) = self.server.take()
			&& tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err()
		{
			server.abort();
		}
	}
}
impl Drop for LoopbackSession {
	fn drop(&mut self) {
		if let Some(surface) = self.surface.take() {
			surface.close();
		}
		if let Some(shutdown) = self.shutdown.take() {
			let _ = shutdown.send(());
		}
		if let Some(server) = self.server.take() {
			server.abort();
		}
	}
}

async fn receive_callback(
	State(sender): State<CallbackSender>,
	Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
	let page = match (&params.error, &params.code) {
		(Some(error), _) => (
			StatusCode::OK,
			Html(render_page("Authorization failed", &format!("Error: {}", escape_html(error)))),
		),
		(None, Some(_)) => (
			StatusCode::OK,
			Html(render_page(
				"Authorization successful",
				"You can close this window and return to the application.",
			)),
		),
		(None, None) => (
			StatusCode::BAD_REQUEST,
			Html(render_page("Authorization failed", "No authorization code was received.")),
		),
	};

	// Only the first redirect counts; later hits still get a page.
	if let Some(tx) = sender.lock().take() {
		let _ = tx.send(params);
	}

	page
}

async fn health() -> &'static str {
	"OK"
}

async fn not_found() -> StatusCode {
	StatusCode::NOT_FOUND
}

fn render_page(title: &str, message: &str) -> String {
	format!(
		"<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
		 <body style=\"font-family: sans-serif; text-align: center; padding: 50px;\">\
		 <h1>{title}</h1><p>{message}</p></body></html>"
	)
}

fn escape_html(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#39;"),
			_ => escaped.push(c),
		}
	}

	escaped
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn escapes_provider_supplied_text() {
		assert_eq!(escape_html("<script>\"x\"</script>"), "&lt;script&gt;&quot;x&quot;&lt;/script&gt;");
	}

	#[test]
	fn normalizes_callback_path() {
		struct Never;
		impl BrowsingContext for Never {
			fn open(&self, _: &Url) -> Result<Box<dyn BrowserSurface>> {
				Err(ConfigError::BrowserLaunch { message: "unused".into() }.into())
			}
		}

		let redirect = LoopbackHttpRedirect::new(Arc::new(Never)).with_path("cb");

		assert_eq!(redirect.path, "/cb");
	}
}
