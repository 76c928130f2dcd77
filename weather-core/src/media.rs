//! Optional enrichments: travel videos and an embeddable map.
//!
//! Both collaborators exist only when their API key is configured. Their
//! failures never reach the weather flow; the orchestrator drops the section.

use std::fmt::Debug;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{
    Config,
    model::{NormalizedLocation, TravelVideo},
    provider::{ProviderError, http_client},
};

pub const MAX_VIDEOS: usize = 3;
pub const YOUTUBE_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const MAPS_EMBED_URL: &str = "https://www.google.com/maps/embed/v1/place";

#[async_trait]
pub trait VideoProvider: Send + Sync + Debug {
    /// Up to [`MAX_VIDEOS`] results.
    async fn search_travel_videos(
        &self,
        location_text: &str,
    ) -> Result<Vec<TravelVideo>, ProviderError>;
}

pub trait MapProvider: Send + Sync + Debug {
    fn embed_url(&self, location: &NormalizedLocation) -> Result<Url, url::ParseError>;
}

#[derive(Debug, Clone)]
pub struct YouTubeVideoProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl YouTubeVideoProvider {
    pub fn with_client(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: YOUTUBE_BASE_URL.to_string(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct YtSearchResponse {
    #[serde(default)]
    items: Vec<YtItem>,
}

#[derive(Debug, Deserialize)]
struct YtItem {
    id: YtId,
    snippet: YtSnippet,
}

#[derive(Debug, Deserialize)]
struct YtId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtSnippet {
    title: String,
}

#[async_trait]
impl VideoProvider for YouTubeVideoProvider {
    async fn search_travel_videos(
        &self,
        location_text: &str,
    ) -> Result<Vec<TravelVideo>, ProviderError> {
        let url = format!("{}/search", self.base_url);
        debug!(%url, location = location_text, "YouTube search");

        let q = format!("{location_text} travel");
        let max_results = MAX_VIDEOS.to_string();
        let res = self
            .http
            .get(&url)
            .query(&[
                ("part", "snippet"),
                ("q", q.as_str()),
                ("type", "video"),
                ("maxResults", max_results.as_str()),
                ("order", "viewCount"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: YtSearchResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .items
            .into_iter()
            .filter_map(|item| {
                item.id.video_id.map(|id| TravelVideo {
                    title: item.snippet.title,
                    url: format!("https://www.youtube.com/watch?v={id}"),
                })
            })
            .take(MAX_VIDEOS)
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct GoogleMapsEmbed {
    api_key: String,
}

impl GoogleMapsEmbed {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

impl MapProvider for GoogleMapsEmbed {
    fn embed_url(&self, location: &NormalizedLocation) -> Result<Url, url::ParseError> {
        let place = match location.coordinates() {
            Some((lat, lon)) => format!("{lat},{lon}"),
            None => location.normalized_value.clone(),
        };
        Url::parse_with_params(
            MAPS_EMBED_URL,
            &[("key", self.api_key.as_str()), ("q", place.as_str())],
        )
    }
}

/// Build whichever enrichments have credentials. Missing keys disable the feature.
pub fn media_from_config(
    config: &Config,
) -> anyhow::Result<(Option<Box<dyn VideoProvider>>, Option<Box<dyn MapProvider>>)> {
    let videos: Option<Box<dyn VideoProvider>> = match config.video_api_key() {
        Some(key) => {
            let http = http_client(config.request_timeout())?;
            Some(Box::new(YouTubeVideoProvider::with_client(key.to_owned(), http)))
        }
        None => {
            debug!("no video API key configured; travel videos disabled");
            None
        }
    };

    let maps: Option<Box<dyn MapProvider>> = match config.maps_api_key() {
        Some(key) => Some(Box::new(GoogleMapsEmbed::new(key.to_owned()))),
        None => {
            debug!("no maps API key configured; map embed disabled");
            None
        }
    };

    Ok((videos, maps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationParser;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_returns_at_most_three_videos() {
        let server = MockServer::start().await;
        let item = |id: &str, title: &str| {
            serde_json::json!({ "id": { "videoId": id }, "snippet": { "title": title } })
        };
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Paris, FR travel"))
            .and(query_param("maxResults", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    item("a1", "Paris in 4K"),
                    { "id": { "kind": "youtube#channel" }, "snippet": { "title": "A channel" } },
                    item("b2", "Paris food tour"),
                    item("c3", "Paris on a budget"),
                    item("d4", "One too many"),
                ]
            })))
            .mount(&server)
            .await;

        let provider = YouTubeVideoProvider::with_client("KEY".into(), Client::new())
            .with_base_url(server.uri());
        let videos = provider.search_travel_videos("Paris, FR").await.expect("videos");

        assert_eq!(videos.len(), 3);
        assert_eq!(videos[0].url, "https://www.youtube.com/watch?v=a1");
        assert_eq!(videos[1].title, "Paris food tour");
    }

    #[tokio::test]
    async fn quota_errors_surface_as_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quotaExceeded"))
            .mount(&server)
            .await;

        let provider = YouTubeVideoProvider::with_client("KEY".into(), Client::new())
            .with_base_url(server.uri());
        let err = provider.search_travel_videos("Paris").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized { status: 403 }));
    }

    #[test]
    fn embed_url_uses_coordinates_when_known() {
        let maps = GoogleMapsEmbed::new("MAPKEY".into());
        let coords = LocationParser::classify("48.8584, 2.2945").expect("coords");
        let url = maps.embed_url(&coords).expect("url");
        assert_eq!(url.host_str(), Some("www.google.com"));
        let q: Vec<_> = url
            .query_pairs()
            .filter(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(q, vec!["48.8584,2.2945".to_string()]);

        let city = LocationParser::classify("paris, fr").expect("city");
        let url = maps.embed_url(&city).expect("url");
        assert!(url.as_str().contains("q=Paris%2C+FR"));
    }

    #[test]
    fn missing_keys_disable_enrichments() {
        let cfg = Config::default();
        let (videos, maps) = media_from_config(&cfg).expect("no error without keys");
        assert!(videos.is_none());
        assert!(maps.is_none());
    }
}
