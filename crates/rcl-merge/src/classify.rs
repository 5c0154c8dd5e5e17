//! Eligibility classification for (person, show) pairings.
//!
//! Show formats vary widely in what counts as a meaningful appearance: one
//! episode of a celebrity panel format is notable, one episode of a long-run
//! docuseries usually is not. The policy is data: ordered keyword lists per
//! category plus per-category thresholds, with compiled-in defaults and an
//! optional YAML override file. Keyword lists are checked in declaration
//! order, so an ambiguous title resolves the same way on every run.

use std::path::Path;

use anyhow::Context;
use rcl_core::AggregateStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowCategory {
    CelebrityEpisodic,
    Competition,
    RealitySeries,
    Other,
}

/// Classification outcome for one (show, participation) pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub include: bool,
    pub category: ShowCategory,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityPolicy {
    pub celebrity_episodic_keywords: Vec<String>,
    pub competition_keywords: Vec<String>,
    pub reality_series_keywords: Vec<String>,
    /// Titles that match a competition keyword but run as short episodic
    /// formats, reclassified before the competition list is consulted.
    pub episodic_overrides: Vec<String>,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub celebrity_min_episodes: u32,
    pub celebrity_min_seasons: u32,
    pub competition_min_episodes: u32,
    pub competition_min_seasons: u32,
    pub reality_min_episodes: u32,
    pub other_min_episodes: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            celebrity_min_episodes: 1,
            celebrity_min_seasons: 1,
            competition_min_episodes: 2,
            competition_min_seasons: 2,
            reality_min_episodes: 3,
            other_min_episodes: 2,
        }
    }
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        fn list(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            celebrity_episodic_keywords: list(&[
                "celebrity family feud",
                "wife swap",
                "celebrity wife swap",
                "stars on mars",
                "celebrity big brother",
                "celebrity apprentice",
                "dancing with the stars",
                "masked singer",
            ]),
            competition_keywords: list(&[
                "survivor",
                "big brother",
                "amazing race",
                "bachelor",
                "bachelorette",
                "love island",
                "traitors",
                "challenge",
                "real world",
                "are you the one",
                "temptation island",
                "too hot to handle",
            ]),
            reality_series_keywords: list(&[
                "housewives",
                "kardashian",
                "below deck",
                "vanderpump",
                "southern charm",
                "summer house",
                "jersey shore",
            ]),
            episodic_overrides: list(&["celebrity big brother"]),
            thresholds: Thresholds::default(),
        }
    }
}

impl EligibilityPolicy {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn category_for(&self, show_name: &str) -> ShowCategory {
        let lowered = show_name.to_lowercase();
        let matches_any = |keywords: &[String]| keywords.iter().any(|k| lowered.contains(k));

        if matches_any(&self.celebrity_episodic_keywords) {
            return ShowCategory::CelebrityEpisodic;
        }
        if matches_any(&self.competition_keywords) {
            if matches_any(&self.episodic_overrides) {
                return ShowCategory::CelebrityEpisodic;
            }
            return ShowCategory::Competition;
        }
        if matches_any(&self.reality_series_keywords) {
            return ShowCategory::RealitySeries;
        }
        ShowCategory::Other
    }

    /// Classify one pairing. Missing participation data counts as zero.
    pub fn classify(
        &self,
        show_name: &str,
        episodes: Option<u32>,
        seasons: Option<u32>,
    ) -> Decision {
        let category = self.category_for(show_name);
        let episodes = episodes.unwrap_or(0);
        let seasons = seasons.unwrap_or(0);
        let t = &self.thresholds;

        let (include, reason) = match category {
            ShowCategory::CelebrityEpisodic => {
                if episodes >= t.celebrity_min_episodes || seasons >= t.celebrity_min_seasons {
                    (true, format!("celebrity format participant ({episodes} eps)"))
                } else {
                    (false, "no recorded participation in celebrity format".to_string())
                }
            }
            ShowCategory::Competition => {
                if episodes >= t.competition_min_episodes {
                    (true, format!("competition participant ({episodes} eps)"))
                } else if seasons >= t.competition_min_seasons {
                    (true, format!("multi-season competition participant ({seasons} seasons)"))
                } else {
                    (
                        false,
                        format!(
                            "competition participation below threshold ({episodes} eps, need {})",
                            t.competition_min_episodes
                        ),
                    )
                }
            }
            ShowCategory::RealitySeries => {
                if episodes >= t.reality_min_episodes {
                    (true, format!("reality series cast ({episodes} eps)"))
                } else {
                    (
                        false,
                        format!(
                            "reality series appearance below threshold ({episodes} eps, need {})",
                            t.reality_min_episodes
                        ),
                    )
                }
            }
            ShowCategory::Other => {
                if episodes >= t.other_min_episodes {
                    (true, format!("uncategorized show ({episodes} eps)"))
                } else {
                    (false, format!("uncategorized show with minimal appearance ({episodes} eps)"))
                }
            }
        };

        Decision {
            include,
            category,
            reason,
        }
    }
}

/// Coarser prune rule, independent of per-show thresholds: a person whose
/// whole aggregate spans a single distinct show is a prune candidate.
pub fn prune_single_show(stats: &AggregateStats) -> bool {
    stats.distinct_show_count() == 1
}
