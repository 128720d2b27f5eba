//! Group directory service and its view models.
//!
//! The groups screen is the canonical consumer of the resilient fetch path:
//! it asks for live groups, and when the network keeps failing it renders the
//! seeded offline groups together with the degraded-mode banner.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	fetch::policy::{CancelToken, FetchOutcome, execute_with_retry},
	http::{client::ApiClient, retry::RetryPolicy},
};

/// UI-facing summary of a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	/// Server-assigned group identifier.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Short description shown on the group card; empty when the server has none.
	pub description: String,
	/// Number of members.
	pub member_count: u32,
	/// Whether the signed-in user is a member.
	pub joined: bool,
}

/// Wire representation of a group as returned by the API.
///
/// Tolerant of absent optional fields so older backend versions keep working.
#[derive(Debug, Deserialize)]
struct GroupDto {
	id: String,
	name: String,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	member_count: Option<u32>,
	#[serde(default)]
	joined: Option<bool>,
}
impl From<GroupDto> for Group {
	fn from(dto: GroupDto) -> Self {
		Self {
			id: dto.id,
			name: dto.name,
			description: dto.description.unwrap_or_default(),
			member_count: dto.member_count.unwrap_or(0),
			joined: dto.joined.unwrap_or(false),
		}
	}
}

/// The three seeded groups served when live data cannot be obtained.
pub fn seed_groups() -> Vec<Group> {
	vec![
		Group {
			id: "seed-morning-run".into(),
			name: "Morning Run Club".into(),
			description: "Easy 5k loops before work, all paces welcome.".into(),
			member_count: 128,
			joined: false,
		},
		Group {
			id: "seed-trail-weekend".into(),
			name: "Weekend Trail Warriors".into(),
			description: "Long trail runs and hikes every Saturday.".into(),
			member_count: 86,
			joined: false,
		},
		Group {
			id: "seed-sunrise-yoga".into(),
			name: "Sunrise Yoga Circle".into(),
			description: "Recovery stretching and yoga at dawn.".into(),
			member_count: 54,
			joined: false,
		},
	]
}

/// Group directory operations against the Stride API.
#[derive(Clone, Debug)]
pub struct GroupService {
	client: ApiClient,
	retry: RetryPolicy,
}
impl GroupService {
	/// Create a service with the default retry policy.
	pub fn new(client: ApiClient) -> Self {
		Self { client, retry: RetryPolicy::default() }
	}

	/// Create a service with an explicit retry policy.
	pub fn with_retry_policy(client: ApiClient, retry: RetryPolicy) -> Result<Self> {
		retry.validate()?;

		Ok(Self { client, retry })
	}

	/// Fetch the group directory.
	pub async fn list_groups(&self) -> Result<Vec<Group>> {
		let dtos: Vec<GroupDto> = self.client.get_json("v1/groups").await?;

		Ok(dtos.into_iter().map(Group::from).collect())
	}

	/// Join a group, returning its updated summary.
	pub async fn join_group(&self, group_id: &str) -> Result<Group> {
		let path = format!("v1/groups/{group_id}/join");
		let dto: GroupDto = self.client.post_json(&path, &serde_json::json!({})).await?;

		Ok(dto.into())
	}

	/// Fetch the group directory, degrading to the seeded groups when the
	/// network keeps failing.
	///
	/// A "try again" action simply calls this again; every call starts a
	/// fresh attempt cycle.
	pub async fn list_groups_or_offline(&self, cancel: &CancelToken) -> FetchOutcome<Vec<Group>> {
		execute_with_retry(|| self.list_groups(), seed_groups(), &self.retry, cancel).await
	}
}
