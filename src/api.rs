//! Typed FreeAgent helpers layered on the authenticated request client.
//!
//! These wrappers only shape payloads and interpret responses; authentication, refresh, and the
//! single `401` retry all happen in [`AuthenticatedRequestClient`].

// crates.io
use oauth2::http::Method;
use serde::de::DeserializeOwned;
use time::Date;
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	flows::{ApiResponse, AuthenticatedRequestClient, RequestOptions},
	http::HttpTransport,
	oauth::TransportErrorMapper,
};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Failures of the typed API helpers.
#[derive(Debug, ThisError)]
pub enum ApiError {
	/// Authentication or transport failure from the request client.
	#[error(transparent)]
	Auth(#[from] Error),
	/// The API answered with a non-success status; the body is passed through untouched.
	#[error("Accounting API answered with status {status}.")]
	Status {
		/// HTTP status.
		status: u16,
		/// Response body as text.
		body: String,
	},
	/// A success body did not have the expected shape.
	#[error("Accounting API payload could not be decoded at `{path}`: {message}")]
	Decode {
		/// JSON path of the failure.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Caller input was rejected before sending.
	#[error("Invalid input: {0}.")]
	InvalidInput(&'static str),
}

/// `GET /users/me` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct User {
	/// Resource URL; used as the `user` reference on timeslips.
	pub url: String,
	/// Given name.
	#[serde(default)]
	pub first_name: Option<String>,
	/// Family name.
	#[serde(default)]
	pub last_name: Option<String>,
	/// Login e-mail.
	#[serde(default)]
	pub email: Option<String>,
}

/// Client contact.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Contact {
	/// Resource URL.
	pub url: String,
	/// Company name; preferred for display.
	#[serde(default)]
	pub organisation_name: Option<String>,
	/// Given name.
	#[serde(default)]
	pub first_name: Option<String>,
	/// Family name.
	#[serde(default)]
	pub last_name: Option<String>,
	/// Contact e-mail.
	#[serde(default)]
	pub email: Option<String>,
	/// Number of active projects billed to the contact.
	#[serde(default)]
	pub active_projects_count: u32,
}
impl Contact {
	/// Organisation name, else `first last`, else `Unnamed Contact`.
	pub fn display_name(&self) -> String {
		if let Some(organisation) = self.organisation_name.as_deref().filter(|s| !s.is_empty()) {
			return organisation.to_owned();
		}

		let person = format!(
			"{} {}",
			self.first_name.as_deref().unwrap_or_default(),
			self.last_name.as_deref().unwrap_or_default()
		);
		let person = person.trim();

		if person.is_empty() { "Unnamed Contact".into() } else { person.to_owned() }
	}
}

/// Project billed to a contact.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Project {
	/// Resource URL.
	pub url: String,
	/// Project name.
	pub name: String,
	/// Owning contact URL.
	#[serde(default)]
	pub contact: Option<String>,
	/// Project status (`Active`, `Completed`, ...).
	#[serde(default)]
	pub status: Option<String>,
	/// Billing currency.
	#[serde(default)]
	pub currency: Option<String>,
}

/// Task within a project.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Task {
	/// Resource URL.
	pub url: String,
	/// Task name.
	pub name: String,
	/// Owning project URL.
	#[serde(default)]
	pub project: Option<String>,
	/// Whether time booked to the task is billable.
	#[serde(default)]
	pub is_billable: bool,
	/// Task status.
	#[serde(default)]
	pub status: Option<String>,
}

/// Timeslip to create.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewTimeslip {
	/// Task URL.
	pub task: String,
	/// User URL.
	pub user: String,
	/// Project URL.
	pub project: String,
	/// Work date, sent as `YYYY-MM-DD`.
	#[serde(with = "iso_date")]
	pub dated_on: Date,
	/// Decimal hours; must be positive.
	pub hours: f64,
	/// Free-text description.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub comment: Option<String>,
}

/// Created timeslip.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Timeslip {
	/// Resource URL.
	pub url: String,
	/// Task URL.
	pub task: String,
	/// User URL.
	pub user: String,
	/// Project URL.
	pub project: String,
	/// Work date.
	#[serde(with = "iso_date")]
	pub dated_on: Date,
	/// Booked hours, as the API reports them (a decimal string).
	#[serde(deserialize_with = "hours_as_text")]
	pub hours: String,
	/// Free-text description.
	#[serde(default)]
	pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
	user: User,
}

#[derive(Debug, Deserialize)]
struct ContactsEnvelope {
	#[serde(default)]
	contacts: Vec<Contact>,
}

#[derive(Debug, Deserialize)]
struct ProjectsEnvelope {
	#[serde(default)]
	projects: Vec<Project>,
}

#[derive(Debug, Deserialize)]
struct TasksEnvelope {
	#[serde(default)]
	tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
	task: Task,
}

#[derive(Debug, Deserialize)]
struct TimeslipEnvelope {
	timeslip: Timeslip,
}

/// FreeAgent resources needed to book time.
pub struct AccountingApi<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	requests: Arc<AuthenticatedRequestClient<C, M>>,
}
impl<C, M> AccountingApi<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Wraps a shared request client.
	pub fn new(requests: Arc<AuthenticatedRequestClient<C, M>>) -> Self {
		Self { requests }
	}

	/// `GET /users/me`.
	pub async fn current_user(&self) -> Result<User, ApiError> {
		let envelope: UserEnvelope = self.get("/users/me").await?;

		Ok(envelope.user)
	}

	/// `GET /contacts?view=clients&sort=name`.
	pub async fn contacts(&self) -> Result<Vec<Contact>, ApiError> {
		let envelope: ContactsEnvelope = self.get("/contacts?view=clients&sort=name").await?;

		Ok(envelope.contacts)
	}

	/// Active projects, optionally restricted to one contact.
	pub async fn projects(&self, contact: Option<&str>) -> Result<Vec<Project>, ApiError> {
		let endpoint = match contact {
			Some(contact) => format!(
				"/projects?{}",
				query(&[("view", "active"), ("contact", contact), ("sort", "name")])
			),
			None => "/projects?view=active&sort=contact".into(),
		};
		let envelope: ProjectsEnvelope = self.get(&endpoint).await?;

		Ok(envelope.projects)
	}

	/// Active tasks of a project, sorted by name.
	pub async fn tasks_for_project(&self, project: &str) -> Result<Vec<Task>, ApiError> {
		let endpoint =
			format!("/tasks?{}", query(&[("project", project), ("view", "active"), ("sort", "name")]));
		let envelope: TasksEnvelope = self.get(&endpoint).await?;

		Ok(envelope.tasks)
	}

	/// Creates an active, billable task in `project`.
	pub async fn create_task(&self, project: &str, name: &str) -> Result<Task, ApiError> {
		if name.trim().is_empty() {
			return Err(ApiError::InvalidInput("task name must not be empty"));
		}

		let endpoint = format!("/tasks?{}", query(&[("project", project)]));
		let payload = serde_json::json!({
			"task": { "name": name, "is_billable": true, "status": "Active" }
		});
		let envelope: TaskEnvelope = self.send(&endpoint, Method::POST, &payload).await?;

		Ok(envelope.task)
	}

	/// `POST /timeslips`.
	pub async fn create_timeslip(&self, timeslip: &NewTimeslip) -> Result<Timeslip, ApiError> {
		if !timeslip.hours.is_finite() || timeslip.hours <= 0. {
			return Err(ApiError::InvalidInput("hours must be positive"));
		}
		if timeslip.task.is_empty() || timeslip.project.is_empty() {
			return Err(ApiError::InvalidInput("project and task URLs are required"));
		}

		let payload = serde_json::json!({ "timeslip": timeslip });
		let envelope: TimeslipEnvelope = self.send("/timeslips", Method::POST, &payload).await?;

		Ok(envelope.timeslip)
	}

	async fn get<T>(&self, endpoint: &str) -> Result<T, ApiError>
	where
		T: DeserializeOwned,
	{
		decode(self.requests.request(endpoint, &RequestOptions::get()).await?)
	}

	async fn send<T, B>(&self, endpoint: &str, method: Method, payload: &B) -> Result<T, ApiError>
	where
		T: DeserializeOwned,
		B: ?Sized + Serialize,
	{
		let options = RequestOptions::json(method, payload)?;

		decode(self.requests.request(endpoint, &options).await?)
	}
}
impl<C, M> Debug for AccountingApi<C, M>
where
	C: ?Sized + HttpTransport,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccountingApi").field("requests", &self.requests).finish()
	}
}

fn query(pairs: &[(&str, &str)]) -> String {
	form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

fn decode<T>(response: ApiResponse) -> Result<T, ApiError>
where
	T: DeserializeOwned,
{
	if !response.is_success() {
		return Err(ApiError::Status { status: response.status.as_u16(), body: response.text() });
	}

	let de = &mut serde_json::Deserializer::from_slice(&response.body);

	serde_path_to_error::deserialize(de).map_err(|e| ApiError::Decode {
		path: e.path().to_string(),
		message: e.inner().to_string(),
	})
}

fn hours_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: serde::Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Hours {
		Text(String),
		Number(serde_json::Number),
	}

	Ok(match Hours::deserialize(deserializer)? {
		Hours::Text(text) => text,
		Hours::Number(number) => number.to_string(),
	})
}
