//! Profile resolver: maps participant ids to community profiles.
//!
//! Each id is looked up concurrently against the profile-search endpoint
//! (`?type=user&q=<id>`). Lookups never fail the refresh: a request error, a
//! malformed answer, or no exact username match all resolve to the default
//! avatar.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::ProfilesConfig;
use crate::error::{FetchError, FetchResult};
use crate::utils::fanout::{DEFAULT_MAX_WORKERS, fan_out};

/// Display data for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    /// Absolute avatar URL; never empty.
    pub avatar_url: String,
    pub profile_url: String,
}

/// Answer of the profile-search endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub users: Vec<UserCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct UserCandidate {
    pub user: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: Option<String>,
}

/// Avatar of the candidate whose username equals `id` exactly.
pub fn match_avatar<'a>(response: &'a SearchResponse, id: &str) -> Option<&'a str> {
    response
        .users
        .iter()
        .find(|candidate| candidate.user == id)
        .and_then(|candidate| candidate.avatar_url.as_deref())
        .filter(|url| !url.is_empty())
}

/// Resolve a host-relative path (`/avatars/x.svg`) against `host`.
pub fn absolutize(host: &str, url: &str) -> String {
    if url.starts_with('/') {
        format!("{}{url}", host.trim_end_matches('/'))
    } else {
        url.to_string()
    }
}

/// Concurrent profile lookups against one search endpoint.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    agent: ureq::Agent,
    search_url: String,
    host: String,
    default_avatar: String,
    timeout: Duration,
    max_workers: usize,
}

impl ProfileResolver {
    /// Build a resolver with its own connection pool.
    pub fn from_config(config: &ProfilesConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .build();
        Self::with_agent(agent, config)
    }

    /// Build a resolver on a shared agent. The per-request timeout still comes
    /// from `config`.
    pub fn with_agent(agent: ureq::Agent, config: &ProfilesConfig) -> Self {
        Self {
            agent,
            search_url: config.search_url.clone(),
            host: config.host.trim_end_matches('/').to_string(),
            default_avatar: absolutize(&config.host, &config.default_avatar),
            timeout: config.timeout(),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    pub fn default_avatar(&self) -> &str {
        &self.default_avatar
    }

    /// Cache key for a lookup of `ids` (order-insensitive).
    pub fn cache_key(&self, ids: &[String]) -> String {
        let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        format!("profiles:{}:{}", self.search_url, sorted.join(","))
    }

    /// Resolve every distinct id. Output follows completion order.
    pub fn resolve(&self, ids: &[String]) -> Vec<Profile> {
        let mut unique: Vec<&String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        fan_out(&unique, self.max_workers, |id| self.resolve_one(id))
            .into_iter()
            .map(|(_, profile)| profile)
            .collect()
    }

    /// Resolve a single id, falling back to the default avatar on any failure.
    pub fn resolve_one(&self, id: &str) -> Profile {
        let avatar = self.lookup(id).ok().flatten();
        self.profile_for(id, avatar.as_deref())
    }

    /// Query the search endpoint and return the exact match's avatar.
    pub fn lookup(&self, id: &str) -> FetchResult<Option<String>> {
        let response = self
            .agent
            .get(&self.search_url)
            .timeout(self.timeout)
            .query("type", "user")
            .query("q", id)
            .call()
            .map_err(|e| FetchError::from_ureq(&self.search_url, e))?;

        let text = response.into_string().map_err(|source| FetchError::Body {
            url: self.search_url.clone(),
            source,
        })?;
        let parsed: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| FetchError::parse(format!("profile search for {id}"), e))?;

        Ok(match_avatar(&parsed, id).map(str::to_string))
    }

    fn profile_for(&self, id: &str, avatar: Option<&str>) -> Profile {
        let avatar_url = match avatar {
            Some(url) => absolutize(&self.host, url),
            None => self.default_avatar.clone(),
        };
        Profile {
            id: id.to_string(),
            display_name: id.to_string(),
            avatar_url,
            profile_url: format!("{}/{id}", self.host),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
