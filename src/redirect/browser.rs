// self
use crate::_prelude::*;
#[cfg(feature = "system-browser")] use crate::error::ConfigError;

/// Boxed future resolving when a browsing surface is closed by the user.
pub type SurfaceClosed<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Host capability that shows the authorization page to the user.
pub trait BrowsingContext
where
	Self: Send + Sync,
{
	/// Opens `url` in a user-facing surface.
	fn open(&self, url: &Url) -> Result<Box<dyn BrowserSurface>>;
}

/// Handle to an opened authorization page.
pub trait BrowserSurface
where
	Self: Send + Sync,
{
	/// Resolves when the user closes the surface. Surfaces that cannot observe closing never
	/// resolve.
	fn closed(&self) -> SurfaceClosed<'_>;

	/// Closes the surface. Must be idempotent.
	fn close(&self);
}

/// Opens the authorization page in the system browser.
///
/// A system browser tab cannot be observed or closed, so only the redirect or the timeout ends
/// the wait.
#[cfg(feature = "system-browser")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;
#[cfg(feature = "system-browser")]
impl BrowsingContext for SystemBrowser {
	fn open(&self, url: &Url) -> Result<Box<dyn BrowserSurface>> {
		webbrowser::open(url.as_str())
			.map_err(|e| ConfigError::BrowserLaunch { message: e.to_string() })?;

		Ok(Box::new(DetachedSurface))
	}
}

/// Surface for pages the crate cannot observe after opening.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedSurface;
impl BrowserSurface for DetachedSurface {
	fn closed(&self) -> SurfaceClosed<'_> {
		Box::pin(std::future::pending())
	}

	fn close(&self) {}
}
