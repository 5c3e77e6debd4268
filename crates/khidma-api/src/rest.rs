// REST data API client
//
// Wraps `reqwest::Client` with PostgREST-style URL construction, filter
// rendering, and error-body unwrapping. Row-level security is enforced
// server-side by the bearer token the client was built with; filters here
// narrow results, they do not authorize them.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;

// ── Filters ─────────────────────────────────────────────────────────

/// A single server-side filter predicate on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
    /// `column >= value`
    Gte { column: String, value: String },
    /// `column IN (values...)`
    In { column: String, values: Vec<String> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Gte {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn any_of(column: impl Into<String>, values: Vec<String>) -> Self {
        Self::In {
            column: column.into(),
            values,
        }
    }

    /// Render as a `(key, value)` query pair in PostgREST operator syntax.
    fn to_query_pair(&self) -> (String, String) {
        match self {
            Self::Eq { column, value } => (column.clone(), format!("eq.{value}")),
            Self::Gte { column, value } => (column.clone(), format!("gte.{value}")),
            Self::In { column, values } => (column.clone(), format!("in.({})", values.join(","))),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ── RestClient ──────────────────────────────────────────────────────

/// Client for the backend's REST data surface.
///
/// All aggregate recomputation and initial loads go through this client;
/// it is also what the CRUD screens write through. Holds no session state
/// itself -- the `reqwest::Client` carries the project key and bearer
/// token as default headers.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a full URL for a table path: `{base}/rest/v1/{table}`.
    pub(crate) fn table_url(&self, table: &str, filters: &[Filter]) -> Result<Url, Error> {
        let mut url = self.base_url.join(&format!("rest/v1/{table}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                let (k, v) = filter.to_query_pair();
                pairs.append_pair(&k, &v);
            }
        }
        Ok(url)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Fetch all rows of `table` matching `filters`, deserialized as `T`.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> Result<Vec<T>, Error> {
        let url = self.table_url(table, filters)?;
        debug!(%url, table, "select");

        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp).await?;
        parse_json(resp).await
    }

    /// Count rows of `table` matching `filters` without fetching them.
    ///
    /// Issues a HEAD request with `Prefer: count=exact`; the total comes
    /// back in the `Content-Range` header (`items 0-24/57` or `*/57`).
    pub async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, Error> {
        let url = self.table_url(table, filters)?;
        debug!(%url, table, "count");

        let resp = self
            .http
            .head(url)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let range = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::CountUnavailable("Content-Range header missing".into()))?;

        parse_content_range_total(range)
            .ok_or_else(|| Error::CountUnavailable(format!("malformed Content-Range: {range}")))
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert a row, returning the stored representation.
    pub async fn insert<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        row: &B,
    ) -> Result<T, Error> {
        let url = self.table_url(table, &[])?;
        debug!(%url, table, "insert");

        let resp = self
            .http
            .post(url)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        // Representation comes back as a one-element array.
        let mut rows: Vec<T> = parse_json(resp).await?;
        rows.pop().ok_or_else(|| Error::Deserialization {
            message: "insert returned no representation".into(),
            body: String::new(),
        })
    }

    /// Patch rows matching `filters` with the given partial body.
    pub async fn update<B: Serialize>(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &B,
    ) -> Result<(), Error> {
        let url = self.table_url(table, filters)?;
        debug!(%url, table, "update");

        let resp = self.http.patch(url).json(patch).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Delete rows matching `filters`.
    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), Error> {
        let url = self.table_url(table, filters)?;
        debug!(%url, table, "delete");

        let resp = self.http.delete(url).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

// ── Response helpers ────────────────────────────────────────────────

/// Map non-2xx responses to [`Error::Rest`] with the parsed error body.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let parsed: Option<RestErrorBody> = serde_json::from_str(&text).ok();
    let (message, code) = match parsed {
        Some(body) => (body.message.unwrap_or_else(|| text.clone()), body.code),
        None => (text, None),
    };

    Err(Error::Rest {
        message,
        code,
        status: status.as_u16(),
    })
}

/// Deserialize a response body, keeping the raw text for diagnostics.
async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

/// Extract the total from a `Content-Range` value: `items 0-24/57` → 57.
fn parse_content_range_total(range: &str) -> Option<u64> {
    let total = range.rsplit('/').next()?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_renders_postgrest_operators() {
        assert_eq!(
            Filter::eq("status", "pending").to_query_pair(),
            ("status".to_string(), "eq.pending".to_string())
        );
        assert_eq!(
            Filter::gte("created_at", "2026-01-01").to_query_pair(),
            ("created_at".to_string(), "gte.2026-01-01".to_string())
        );
        assert_eq!(
            Filter::any_of("id", vec!["a".into(), "b".into()]).to_query_pair(),
            ("id".to_string(), "in.(a,b)".to_string())
        );
    }

    #[test]
    fn content_range_total_parses_both_shapes() {
        assert_eq!(parse_content_range_total("items 0-24/57"), Some(57));
        assert_eq!(parse_content_range_total("*/3"), Some(3));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn table_url_appends_filters() {
        let client = RestClient::new(
            reqwest::Client::new(),
            Url::parse("https://proj.example.com").expect("url"),
        );
        let url = client
            .table_url("documents", &[Filter::eq("status", "pending")])
            .expect("url");
        assert_eq!(url.path(), "/rest/v1/documents");
        assert_eq!(url.query(), Some("status=eq.pending"));
    }
}
