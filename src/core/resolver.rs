//! Remote archive resolution
//!
//! Turns a (board, release, variant) triple into a concrete image download
//! URL by probing the archive's per-board directory listings. Archives are
//! inconsistent about board-name casing and punctuation, so several spellings
//! are tried; redirect chains are followed manually because the listing
//! endpoints bounce through mirrors.

use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::time::Duration;

use crate::config::defaults;
use crate::core::model::ImageVariant;
use crate::error::ResolveError;

/// Resolves image URLs against an archive server
#[derive(Debug, Clone)]
pub struct ArchiveResolver {
    client: reqwest::Client,
    base_url: String,
}

impl ArchiveResolver {
    /// Resolver against the default archive
    pub fn new() -> Self {
        Self::with_base_url(defaults::ARCHIVE_BASE_URL)
    }

    /// Resolver against a specific archive base URL (tests use this)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            // Redirects are followed by hand so the whole chain is visible.
            client: reqwest::Client::builder()
                .redirect(Policy::none())
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Resolve the newest matching image URL.
    pub async fn resolve(
        &self,
        board: &str,
        release: &str,
        variant: ImageVariant,
        desktop: Option<&str>,
    ) -> Result<String, ResolveError> {
        for spelling in name_variants(board) {
            let listing_url = format!("{}/{}/archive/", self.base_url, spelling);
            let body = match self.fetch_following_redirects(&listing_url).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!("listing probe '{}' failed: {}", listing_url, e);
                    continue;
                }
            };

            let mut candidates: Vec<String> = extract_image_names(&body)
                .into_iter()
                .filter(|name| matches_selection(name, release, variant, desktop))
                .collect();

            // Archive filenames embed dates; lexicographically last is a
            // reasonable recency proxy.
            candidates.sort();
            if let Some(name) = candidates.pop() {
                return Ok(format!("{listing_url}{name}"));
            }
        }

        Err(ResolveError::ImageNotFound {
            board: board.to_string(),
            release: release.to_string(),
        })
    }

    /// GET a URL, walking the redirect chain hop by hop.
    async fn fetch_following_redirects(&self, url: &str) -> Result<String, ResolveError> {
        let mut current = url.to_string();

        for _ in 0..=defaults::MAX_REDIRECT_HOPS {
            let response = self.client.get(&current).send().await.map_err(|e| {
                ResolveError::Network {
                    url: current.clone(),
                    error: e.to_string(),
                }
            })?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| ResolveError::Network {
                        url: current.clone(),
                        error: "redirect without Location header".to_string(),
                    })?;

                // Location may be relative; resolve against the current URL.
                current = Url::parse(&current)
                    .and_then(|base| base.join(location))
                    .map_err(|e| ResolveError::Network {
                        url: current.clone(),
                        error: e.to_string(),
                    })?
                    .to_string();
                continue;
            }

            if !response.status().is_success() {
                return Err(ResolveError::Network {
                    url: current,
                    error: format!("HTTP {}", response.status()),
                });
            }

            return response.text().await.map_err(|e| ResolveError::Network {
                url: current.clone(),
                error: e.to_string(),
            });
        }

        Err(ResolveError::TooManyRedirects {
            url: url.to_string(),
        })
    }
}

impl Default for ArchiveResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Board-name spellings to probe, most likely first
fn name_variants(board: &str) -> Vec<String> {
    let lower = board.to_lowercase();
    let candidates = [
        board.to_string(),
        lower.clone(),
        lower.replace('-', ""),
        capitalize(&lower),
    ];

    let mut variants: Vec<String> = Vec::new();
    for candidate in candidates {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Pull candidate image filenames out of a directory listing page
fn extract_image_names(listing: &str) -> Vec<String> {
    let pattern = Regex::new(r#"href="([^"/]+\.img\.xz)""#).expect("static regex");
    pattern
        .captures_iter(listing)
        .map(|c| c[1].to_string())
        .collect()
}

/// Release and variant filter applied to candidate filenames
fn matches_selection(
    name: &str,
    release: &str,
    variant: ImageVariant,
    desktop: Option<&str>,
) -> bool {
    let name = name.to_lowercase();
    if !name.contains(&release.to_lowercase()) {
        return false;
    }
    match variant {
        ImageVariant::Minimal => name.contains("minimal"),
        ImageVariant::Desktop => match desktop {
            Some(environment) => name.contains(&environment.to_lowercase()),
            None => !name.contains("minimal"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_variants_cover_casing_and_punctuation() {
        let variants = name_variants("rock-5b");
        assert!(variants.contains(&"rock-5b".to_string()));
        assert!(variants.contains(&"rock5b".to_string()));
        assert!(variants.contains(&"Rock-5b".to_string()));
    }

    #[test]
    fn test_name_variants_dedup() {
        let variants = name_variants("nanopi");
        let mut sorted = variants.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(variants.len(), sorted.len());
    }

    #[test]
    fn test_extract_image_names_from_listing() {
        let listing = r#"
            <a href="Armbian_24.2.1_Rock-5b_bookworm_legacy_minimal.img.xz">x</a>
            <a href="Armbian_24.2.1_Rock-5b_bookworm_legacy_minimal.img.xz.sha">y</a>
            <a href="subdir/">z</a>
        "#;
        let names = extract_image_names(listing);
        assert_eq!(
            names,
            vec!["Armbian_24.2.1_Rock-5b_bookworm_legacy_minimal.img.xz"]
        );
    }

    #[test]
    fn test_matches_selection_minimal() {
        assert!(matches_selection(
            "Armbian_24_Rock-5b_bookworm_minimal.img.xz",
            "bookworm",
            ImageVariant::Minimal,
            None
        ));
        assert!(!matches_selection(
            "Armbian_24_Rock-5b_bookworm_gnome.img.xz",
            "bookworm",
            ImageVariant::Minimal,
            None
        ));
    }

    #[test]
    fn test_matches_selection_desktop_environment() {
        assert!(matches_selection(
            "Armbian_24_Rock-5b_bookworm_Gnome.img.xz",
            "bookworm",
            ImageVariant::Desktop,
            Some("gnome")
        ));
        assert!(!matches_selection(
            "Armbian_24_Rock-5b_bookworm_xfce.img.xz",
            "bookworm",
            ImageVariant::Desktop,
            Some("gnome")
        ));
    }

    #[test]
    fn test_matches_selection_rejects_other_release() {
        assert!(!matches_selection(
            "Armbian_24_Rock-5b_jammy_minimal.img.xz",
            "bookworm",
            ImageVariant::Minimal,
            None
        ));
    }
}
