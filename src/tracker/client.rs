//! GraphQL client for the experiment-tracking service.
//!
//! Uses the synchronous `ureq` HTTP client with one shared [`ureq::Agent`] so
//! that concurrent run queries reuse pooled connections. Provides:
//!
//! - **query**: POST a named operation and decode its `data` member.
//! - **run_names**: cursor-paginated listing of run names in a project.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::schema::TrackerConfig;
use crate::error::{FetchError, FetchResult};

/// Filter used by the tracker UI to list every named run.
const NAMED_RUNS_FILTER: &str = r#"{"name":{"$ne":null}}"#;

const RUN_LISTING_QUERY: &str = r#"
query ProjectRuns($projectName: String!, $entityName: String!, $filters: JSONString, $limit: Int, $cursor: String, $order: String) {
  project(name: $projectName, entityName: $entityName) {
    runs(filters: $filters, first: $limit, after: $cursor, order: $order) {
      edges { node { name } }
      pageInfo { endCursor hasNextPage }
    }
  }
}
"#;

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RunListingData {
    project: Option<RunListingProject>,
}

#[derive(Debug, Deserialize)]
struct RunListingProject {
    runs: RunConnection,
}

#[derive(Debug, Deserialize)]
struct RunConnection {
    edges: Vec<RunEdge>,
    #[serde(rename = "pageInfo")]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct RunEdge {
    node: RunNameNode,
}

#[derive(Debug, Deserialize)]
struct RunNameNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
}

// ---------------------------------------------------------------------------
// Listing order
// ---------------------------------------------------------------------------

/// Sort order for run listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrder {
    /// Running runs first, as the tracker UI shows them.
    StateDesc,
    /// Newest run first.
    CreatedDesc,
}

impl RunOrder {
    fn as_str(self) -> &'static str {
        match self {
            Self::StateDesc => "-state",
            Self::CreatedDesc => "-created_at",
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Synchronous GraphQL client, cheap to clone and safe to share across
/// worker threads.
#[derive(Clone)]
pub struct GraphqlClient {
    agent: ureq::Agent,
    url: String,
    authorization: Option<String>,
    max_retries: u32,
}

impl std::fmt::Debug for GraphqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphqlClient")
            .field("url", &self.url)
            .field("authenticated", &self.authorization.is_some())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GraphqlClient {
    /// Build a client from the resolved tracker config.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build();
        Self::with_agent(agent, config)
    }

    /// Build a client around an existing agent (shares its connection pool).
    pub fn with_agent(agent: ureq::Agent, config: &TrackerConfig) -> Self {
        let authorization = (!config.api_key.is_empty())
            .then(|| format!("Basic {}", BASE64.encode(format!("api:{}", config.api_key))));
        Self {
            agent,
            url: config.graphql_url.clone(),
            authorization,
            max_retries: config.max_retries,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a GraphQL operation and decode its `data` member.
    ///
    /// Returns `Ok(None)` when the service answers with `data: null` and no
    /// errors. A non-empty `errors` array is a [`FetchError::Query`].
    pub fn query<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> FetchResult<Option<T>> {
        let body = json!({
            "operationName": operation,
            "query": query,
            "variables": variables,
        });

        let text = self.post_with_reconnect(&body)?;
        decode_response(operation, &text)
    }

    /// List run names in `entity/project`, following cursors until the last
    /// page or until `limit` names have been collected.
    pub fn run_names(
        &self,
        entity: &str,
        project: &str,
        page_size: u32,
        order: RunOrder,
        limit: Option<usize>,
    ) -> FetchResult<Vec<String>> {
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let first = match limit {
                Some(max) => page_size.min((max - names.len()) as u32),
                None => page_size,
            };
            let variables = json!({
                "entityName": entity,
                "projectName": project,
                "filters": NAMED_RUNS_FILTER,
                "limit": first,
                "cursor": cursor,
                "order": order.as_str(),
            });

            let data: Option<RunListingData> =
                self.query("ProjectRuns", RUN_LISTING_QUERY, variables)?;
            let Some(project_data) = data.and_then(|d| d.project) else {
                return Err(FetchError::Query {
                    operation: "ProjectRuns".to_string(),
                    message: format!("project {entity}/{project} not found"),
                });
            };

            let connection = project_data.runs;
            let page_len = connection.edges.len();
            names.extend(connection.edges.into_iter().map(|edge| edge.node.name));

            if limit.is_some_and(|max| names.len() >= max) {
                break;
            }
            match connection.page_info {
                Some(PageInfo {
                    has_next_page: true,
                    end_cursor: Some(next),
                }) if page_len > 0 => cursor = Some(next),
                _ => break,
            }
        }

        Ok(names)
    }

    /// POST the body, reconnecting on connection-level failures only.
    fn post_with_reconnect(&self, body: &Value) -> FetchResult<String> {
        let mut attempt = 0;
        loop {
            match self.post_once(body) {
                Err(e) if e.is_reconnectable() && attempt < self.max_retries => {
                    attempt += 1;
                    std::thread::sleep(reconnect_delay(attempt));
                }
                result => return result,
            }
        }
    }

    fn post_once(&self, body: &Value) -> FetchResult<String> {
        let mut request = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        if let Some(ref auth) = self.authorization {
            request = request.set("Authorization", auth);
        }

        let response = request
            .send_json(body)
            .map_err(|e| FetchError::from_ureq(&self.url, e))?;

        response.into_string().map_err(|source| FetchError::Body {
            url: self.url.clone(),
            source,
        })
    }
}

/// Linear backoff between reconnect attempts, capped at two seconds.
fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_millis((250 * u64::from(attempt)).min(2000))
}

/// Decode a GraphQL response envelope.
fn decode_response<T: DeserializeOwned>(operation: &str, text: &str) -> FetchResult<Option<T>> {
    let envelope: GraphqlResponse<T> = serde_json::from_str(text)
        .map_err(|e| FetchError::parse(format!("{operation} response"), e))?;

    if !envelope.errors.is_empty() {
        let message = envelope
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(FetchError::Query {
            operation: operation.to_string(),
            message,
        });
    }

    Ok(envelope.data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
