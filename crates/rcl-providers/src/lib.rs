//! Third-party metadata collaborators.
//!
//! Two kinds of input arrive from outside the ledger: person attribute bags
//! (gender, birthday) from a metadata API, and per-person episode counts
//! scraped from a show's full-credits page. Both are consumed as loosely
//! structured data that may simply be absent; absence is an expected outcome,
//! not an error.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "rcl-providers";

/// Loosely structured attribute bag for one person. Every field is optional;
/// the reconciliation policy decides what, if anything, gets written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersonAttributes {
    pub gender: Option<String>,
    pub birthday: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Fetch attributes for a person by their numeric external id. `Ok(None)`
/// means the provider knows nothing about this person.
#[async_trait]
pub trait PersonMetadataProvider: Send + Sync {
    async fn person_attributes(
        &self,
        numeric_id: &str,
    ) -> Result<Option<PersonAttributes>, ProviderError>;
}

/// Map the provider's numeric gender code to a display value. Zero or
/// unknown codes come back empty so callers never write junk.
pub fn gender_from_code(code: Option<u8>) -> Option<String> {
    match code {
        Some(1) => Some("Female".to_string()),
        Some(2) => Some("Male".to_string()),
        _ => None,
    }
}

/// Fixture-backed provider: a map of numeric id -> attributes, loadable from
/// a JSON file. Used by tests and offline runs.
#[derive(Debug, Default, Clone)]
pub struct FixtureProvider {
    attributes: HashMap<String, PersonAttributes>,
}

impl FixtureProvider {
    pub fn new(attributes: HashMap<String, PersonAttributes>) -> Self {
        Self { attributes }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let attributes: HashMap<String, PersonAttributes> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self { attributes })
    }
}

#[async_trait]
impl PersonMetadataProvider for FixtureProvider {
    async fn person_attributes(
        &self,
        numeric_id: &str,
    ) -> Result<Option<PersonAttributes>, ProviderError> {
        Ok(self.attributes.get(numeric_id).cloned())
    }
}

/// Person detail payload as returned by the metadata API. Fields we do not
/// consume are ignored by serde.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonDetailResponse {
    pub gender: Option<u8>,
    pub birthday: Option<String>,
}

/// Reduce a raw detail payload to the attribute bag the ledger consumes.
/// Blank birthday strings are treated as absent.
pub fn attributes_from_detail(detail: &PersonDetailResponse) -> PersonAttributes {
    PersonAttributes {
        gender: gender_from_code(detail.gender),
        birthday: detail
            .birthday
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string),
    }
}

/// Live provider backed by the metadata HTTP API.
#[derive(Debug, Clone)]
pub struct HttpMetadataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpMetadataProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Reads `RCL_METADATA_BASE_URL` (optional) and `RCL_METADATA_API_KEY`
    /// (required).
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("RCL_METADATA_BASE_URL")
            .unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string());
        let api_key =
            std::env::var("RCL_METADATA_API_KEY").context("RCL_METADATA_API_KEY is not set")?;
        Ok(Self::new(base_url, api_key))
    }
}

#[async_trait]
impl PersonMetadataProvider for HttpMetadataProvider {
    async fn person_attributes(
        &self,
        numeric_id: &str,
    ) -> Result<Option<PersonAttributes>, ProviderError> {
        let url = format!(
            "{}/person/{}?api_key={}",
            self.base_url.trim_end_matches('/'),
            numeric_id,
            self.api_key
        );
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ProviderError::Message(format!(
                "metadata lookup for person {numeric_id} failed with status {}",
                response.status()
            )));
        }
        let detail: PersonDetailResponse = response.json().await?;
        Ok(Some(attributes_from_detail(&detail)))
    }
}

/// Episode counts and name fallbacks parsed from one full-credits HTML page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditsIndex {
    /// person alnum id -> episode count, where the page stated one
    pub episodes_by_id: HashMap<String, u32>,
    /// normalized display name -> person alnum id
    pub id_by_name: HashMap<String, String>,
}

impl CreditsIndex {
    pub fn episodes_for_name(&self, name: &str) -> Option<u32> {
        let id = self.id_by_name.get(&normalize_name(name))?;
        self.episodes_by_id.get(id).copied()
    }
}

/// Collapse whitespace and lowercase, for the name-keyed fallback lookup.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse a full-credits page. Handles both the classic table layout and the
/// newer list layout; rows without a person link are skipped.
pub fn parse_credits_page(html: &str) -> Result<CreditsIndex, ProviderError> {
    let document = Html::parse_document(html);
    let row_selectors = [
        Selector::parse("table.cast_list tr").map_err(|e| ProviderError::Message(e.to_string()))?,
        Selector::parse("[data-testid='sub-section-cast'] li")
            .map_err(|e| ProviderError::Message(e.to_string()))?,
    ];
    let link_selector = Selector::parse("a[href*='/name/nm']")
        .map_err(|e| ProviderError::Message(e.to_string()))?;

    let mut index = CreditsIndex::default();
    for selector in &row_selectors {
        for node in document.select(selector) {
            // A row may carry several anchors for the same person (photo
            // first, then the text link); take the id from the first one and
            // the display name from the first with visible text.
            let mut person_id: Option<String> = None;
            let mut name_text: Option<String> = None;
            for link in node.select(&link_selector) {
                let Some(id) = link
                    .value()
                    .attr("href")
                    .and_then(extract_person_id_from_href)
                else {
                    continue;
                };
                person_id.get_or_insert(id);
                if name_text.is_none() {
                    let text = link.text().collect::<String>();
                    if !text.trim().is_empty() {
                        name_text = Some(text);
                    }
                }
            }
            let Some(person_id) = person_id else {
                continue;
            };

            if let Some(name) = name_text {
                index
                    .id_by_name
                    .entry(normalize_name(&name))
                    .or_insert_with(|| person_id.clone());
            }

            let row_text = node.text().collect::<Vec<_>>().join(" ");
            if let Some(count) = episode_count_from_text(&row_text) {
                index.episodes_by_id.entry(person_id).or_insert(count);
            }
        }
    }
    Ok(index)
}

fn extract_person_id_from_href(href: &str) -> Option<String> {
    let start = href.find("/name/nm")? + "/name/".len();
    let rest = &href[start..];
    let digits_end = rest[2..]
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| i + 2)
        .unwrap_or(rest.len());
    if digits_end <= 2 {
        return None;
    }
    Some(rest[..digits_end].to_string())
}

/// Find the first "N episode(s)" phrase in free text.
fn episode_count_from_text(text: &str) -> Option<u32> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for pair in words.windows(2) {
        if let Ok(count) = pair[0].parse::<u32>() {
            let follower = pair[1].to_ascii_lowercase();
            if follower.starts_with("episode") {
                return Some(count);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIC_CREDITS: &str = r#"
        <table class="cast_list">
          <tr>
            <td class="primary_photo"><a href="/name/nm0000001/"></a></td>
            <td><a href="/name/nm0000001/">Alex Host</a></td>
            <td>42 episodes</td>
          </tr>
          <tr>
            <td><a href="/name/nm0000002/?ref_=ttfc">Sam Guest</a></td>
            <td>1 episode</td>
          </tr>
          <tr><td>No link in this row</td></tr>
        </table>
    "#;

    #[test]
    fn classic_table_yields_ids_names_and_counts() {
        let index = parse_credits_page(CLASSIC_CREDITS).unwrap();
        assert_eq!(index.episodes_by_id.get("nm0000001"), Some(&42));
        assert_eq!(index.episodes_by_id.get("nm0000002"), Some(&1));
        assert_eq!(index.id_by_name.get("alex host"), Some(&"nm0000001".to_string()));
    }

    #[test]
    fn list_layout_is_also_parsed() {
        let html = r#"
            <div data-testid="sub-section-cast">
              <li><a href="/name/nm0000003/">Riley Judge</a> <span>7 episodes</span></li>
            </div>
        "#;
        let index = parse_credits_page(html).unwrap();
        assert_eq!(index.episodes_by_id.get("nm0000003"), Some(&7));
    }

    #[test]
    fn name_lookup_normalizes_whitespace_and_case() {
        let index = parse_credits_page(CLASSIC_CREDITS).unwrap();
        assert_eq!(index.episodes_for_name("  ALEX   Host "), Some(42));
        assert_eq!(index.episodes_for_name("Unknown Person"), None);
    }

    #[test]
    fn href_without_digits_is_rejected() {
        assert_eq!(extract_person_id_from_href("/name/nm/"), None);
        assert_eq!(
            extract_person_id_from_href("/name/nm0012345/?ref_=x"),
            Some("nm0012345".to_string())
        );
    }

    #[test]
    fn gender_codes_map_conservatively() {
        assert_eq!(gender_from_code(Some(1)).as_deref(), Some("Female"));
        assert_eq!(gender_from_code(Some(2)).as_deref(), Some("Male"));
        assert_eq!(gender_from_code(Some(0)), None);
        assert_eq!(gender_from_code(None), None);
    }

    #[test]
    fn detail_payload_reduces_to_the_attribute_bag() {
        let detail: PersonDetailResponse =
            serde_json::from_str(r#"{"gender": 1, "birthday": "1990-05-01", "name": "x"}"#)
                .unwrap();
        assert_eq!(
            attributes_from_detail(&detail),
            PersonAttributes {
                gender: Some("Female".into()),
                birthday: Some("1990-05-01".into()),
            }
        );

        let detail: PersonDetailResponse =
            serde_json::from_str(r#"{"gender": 0, "birthday": "  "}"#).unwrap();
        assert_eq!(attributes_from_detail(&detail), PersonAttributes::default());

        let detail: PersonDetailResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(attributes_from_detail(&detail), PersonAttributes::default());
    }

    #[tokio::test]
    async fn fixture_provider_returns_none_for_unknown_person() {
        let mut map = HashMap::new();
        map.insert(
            "500".to_string(),
            PersonAttributes {
                gender: Some("Female".into()),
                birthday: Some("1990-05-01".into()),
            },
        );
        let provider = FixtureProvider::new(map);
        assert!(provider
            .person_attributes("500")
            .await
            .unwrap()
            .is_some());
        assert!(provider
            .person_attributes("501")
            .await
            .unwrap()
            .is_none());
    }
}
