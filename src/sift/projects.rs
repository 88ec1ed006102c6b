use crate::sift::config::SiftProjectConfig;
use crate::sift::event::{RawEvent, parse_timestamp};
use crate::sift::similarity::{name_similarity, normalize_name};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const MISC_PROJECT: &str = "misc";

const GENERIC_TECH_TERMS: [&str; 7] = ["api", "app", "web", "code", "data", "server", "client"];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "was", "were", "this", "that", "from", "they", "have", "had",
    "what", "when", "where", "who", "how", "why", "but", "not", "all", "any", "can", "her",
    "his", "has", "you", "your", "been", "being", "are", "said", "each", "which", "will",
    "about", "could", "would", "should", "there", "their", "them", "then", "than", "some",
    "time", "may", "way", "many", "use", "now", "him", "its", "two", "more", "very", "after",
    "back", "other", "she", "one", "only", "new", "years", "know", "also", "get", "through",
    "much", "before", "too", "same", "look", "work", "life", "even", "most", "think", "here",
    "make", "well", "down", "first", "right", "see", "over", "such", "take", "come", "good",
    "few", "own", "under", "last", "find", "give", "does", "made", "part", "these", "into",
    "just", "like", "using", "used",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Project {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            keywords: Vec::new(),
            tags: Vec::new(),
            repos: Vec::new(),
            path: None,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub description: String,
    /// Free-form category such as `development` or `research`.
    pub kind: String,
    pub occurred_at: String,
    #[serde(default)]
    pub technologies: Vec<String>,
}

/// A project suggested by analysis. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedProject {
    pub name: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CreationCheck {
    Accept,
    TooFewActivities { count: usize, required: usize },
    TooFewDays { days: usize, required: usize },
    SimilarTo { existing: String, score: f64 },
}

impl CreationCheck {
    pub fn accepted(&self) -> bool {
        matches!(self, CreationCheck::Accept)
    }

    pub fn reason(&self) -> String {
        match self {
            CreationCheck::Accept => "accepted".to_string(),
            CreationCheck::TooFewActivities { count, required } => {
                format!("{count} activities, need {required}")
            }
            CreationCheck::TooFewDays { days, required } => {
                format!("activity on {days} day(s), need {required}")
            }
            CreationCheck::SimilarTo { existing, score } => {
                format!("too similar to `{existing}` ({score:.2})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ProjectDecision {
    Create {
        name: String,
        keywords: Vec<String>,
    },
    MergeInto {
        proposed: String,
        existing: String,
    },
    Discard {
        name: String,
        reason: String,
    },
}

/// Conservative project creation, fuzzy merging and cheap heuristic
/// matching of activities to known projects.
#[derive(Debug, Clone)]
pub struct ProjectClassifier {
    cfg: SiftProjectConfig,
    tz: Tz,
}

impl ProjectClassifier {
    pub fn new(cfg: &SiftProjectConfig) -> Self {
        // Timezone names are validated at config load.
        let tz = cfg.timezone.parse::<Tz>().unwrap_or(chrono_tz::UTC);
        Self {
            cfg: cfg.clone(),
            tz,
        }
    }

    pub fn should_create(&self, name: &str, activities: &[Activity], existing: &[Project]) -> bool {
        self.creation_check(name, activities, existing).accepted()
    }

    pub fn creation_check(
        &self,
        name: &str,
        activities: &[Activity],
        existing: &[Project],
    ) -> CreationCheck {
        if activities.len() < self.cfg.min_activities {
            return CreationCheck::TooFewActivities {
                count: activities.len(),
                required: self.cfg.min_activities,
            };
        }

        let days = self.distinct_days(activities);
        if days < self.cfg.min_distinct_days {
            return CreationCheck::TooFewDays {
                days,
                required: self.cfg.min_distinct_days,
            };
        }

        if let Some((existing, score)) = self.most_similar(name, existing)
            && score >= self.cfg.similarity_threshold
        {
            return CreationCheck::SimilarTo { existing, score };
        }

        CreationCheck::Accept
    }

    /// Calendar dates in the configured timezone. Unparsable timestamps
    /// contribute their leading `YYYY-MM-DD` text.
    pub fn distinct_days(&self, activities: &[Activity]) -> usize {
        activities
            .iter()
            .filter_map(|activity| match parse_timestamp(&activity.occurred_at) {
                Some(ts) => Some(ts.with_timezone(&self.tz).date_naive().to_string()),
                None => {
                    let raw = activity.occurred_at.trim();
                    (!raw.is_empty()).then(|| raw.chars().take(10).collect())
                }
            })
            .collect::<BTreeSet<String>>()
            .len()
    }

    fn most_similar(&self, name: &str, existing: &[Project]) -> Option<(String, f64)> {
        existing
            .iter()
            .map(|project| (project.name.clone(), name_similarity(name, &project.name)))
            .fold(None, |best, (candidate, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((candidate, score)),
            })
    }

    /// Group near-duplicate proposals under the first name seen in
    /// case-insensitive alphabetical order.
    pub fn merge_similar(
        &self,
        proposals: &[ProposedProject],
    ) -> BTreeMap<String, Vec<ProposedProject>> {
        let mut ordered: Vec<&ProposedProject> = proposals
            .iter()
            .filter(|p| !p.name.trim().is_empty())
            .collect();
        ordered.sort_by_key(|p| p.name.to_lowercase());

        let mut canonical: Vec<(String, String)> = Vec::new();
        let mut merged: BTreeMap<String, Vec<ProposedProject>> = BTreeMap::new();
        for proposal in ordered {
            let normalized = normalize_name(&proposal.name);
            let target = canonical
                .iter()
                .find(|(_, canon_norm)| {
                    name_similarity(&normalized, canon_norm) >= self.cfg.similarity_threshold
                })
                .map(|(name, _)| name.clone());
            let key = match target {
                Some(name) => name,
                None => {
                    canonical.push((proposal.name.clone(), normalized));
                    proposal.name.clone()
                }
            };
            merged.entry(key).or_default().push(proposal.clone());
        }
        merged
    }

    /// Distinguishing keywords for a project, sorted and capped.
    pub fn keywords(&self, name: &str, activities: &[Activity]) -> Vec<String> {
        let mut keywords: BTreeSet<String> = alpha_words(name)
            .filter(|w| !is_stop_word(w))
            .collect();

        for activity in activities {
            keywords.extend(
                alpha_words(&activity.description)
                    .filter(|w| w.chars().count() > 3 && !is_stop_word(w)),
            );
            keywords.extend(
                activity
                    .technologies
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| t.chars().count() > 1 && !is_stop_word(t)),
            );
        }

        keywords
            .into_iter()
            .filter(|k| !GENERIC_TECH_TERMS.contains(&k.as_str()))
            .take(self.cfg.max_keywords)
            .collect()
    }

    /// Best existing project for an activity, or `misc` when no project
    /// scores at least `suggest_min_score`.
    pub fn suggest_project(
        &self,
        description: &str,
        technologies: &[String],
        existing: &[Project],
    ) -> String {
        let desc = description.to_lowercase();
        let techs: BTreeSet<String> = technologies.iter().map(|t| t.to_lowercase()).collect();

        let mut ordered: Vec<&Project> = existing.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut best: Option<(&str, u32)> = None;
        for project in ordered {
            let mut score = 0u32;
            if desc.contains(&project.name.to_lowercase()) {
                score += 10;
            }
            let keywords: BTreeSet<String> =
                project.keywords.iter().map(|k| k.to_lowercase()).collect();
            score += 2 * keywords.iter().filter(|k| desc.contains(k.as_str())).count() as u32;
            score += 3 * project
                .tags
                .iter()
                .filter(|t| desc.contains(&t.to_lowercase()))
                .count() as u32;
            score += 2 * techs.intersection(&keywords).count() as u32;

            if best.is_none_or(|(_, top)| score > top) {
                best = Some((&project.name, score));
            }
        }

        match best {
            Some((name, score)) if score >= self.cfg.suggest_min_score => name.to_string(),
            _ => MISC_PROJECT.to_string(),
        }
    }

    /// Proposals that pass the creation rule, with keywords attached.
    pub fn conservative_recommendations(
        &self,
        proposals: &[ProposedProject],
        activities_by_project: &BTreeMap<String, Vec<Activity>>,
        existing: &[Project],
    ) -> Vec<ProposedProject> {
        let approved: Vec<ProposedProject> = proposals
            .iter()
            .filter_map(|proposal| {
                let activities = activities_by_project
                    .get(&proposal.name)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                self.should_create(&proposal.name, activities, existing)
                    .then(|| ProposedProject {
                        keywords: self.keywords(&proposal.name, activities),
                        ..proposal.clone()
                    })
            })
            .collect();
        info!(
            event = "conservative_filter",
            proposed = proposals.len(),
            approved = approved.len()
        );
        approved
    }

    /// Decide per canonical proposal: merge into an existing project,
    /// create a new one, or discard. `history` holds the candidate
    /// activities accumulated so far, keyed by proposal name.
    pub fn resolve(
        &self,
        proposals: &[ProposedProject],
        existing: &[Project],
        history: &BTreeMap<String, Vec<Activity>>,
    ) -> Vec<ProjectDecision> {
        let mut decisions = Vec::new();
        for (canonical, group) in self.merge_similar(proposals) {
            if let Some((existing_name, score)) = self.most_similar(&canonical, existing)
                && score >= self.cfg.similarity_threshold
            {
                debug!(event = "project_merge", proposed = %canonical, existing = %existing_name, score);
                decisions.push(ProjectDecision::MergeInto {
                    proposed: canonical,
                    existing: existing_name,
                });
                continue;
            }

            let mut activities: Vec<Activity> =
                history.get(&canonical).cloned().unwrap_or_default();
            for proposal in &group {
                for activity in &proposal.activities {
                    if !activities.contains(activity) {
                        activities.push(activity.clone());
                    }
                }
            }

            let check = self.creation_check(&canonical, &activities, existing);
            if check.accepted() {
                let keywords = self.keywords(&canonical, &activities);
                info!(event = "project_create", name = %canonical, activities = activities.len());
                decisions.push(ProjectDecision::Create {
                    name: canonical,
                    keywords,
                });
            } else {
                debug!(event = "project_discard", name = %canonical, reason = %check.reason());
                decisions.push(ProjectDecision::Discard {
                    name: canonical,
                    reason: check.reason(),
                });
            }
        }
        decisions
    }

    /// Map a raw event to a project by repository, then the longest
    /// matching path prefix, then keyword hits in the payload.
    pub fn classify_event(&self, event: &RawEvent, projects: &[Project]) -> Option<String> {
        let mut ordered: Vec<&Project> = projects.iter().filter(|p| p.active).collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        if let Some(repo) = payload_field(event, "repo")
            && let Some(project) = ordered.iter().find(|p| {
                p.repos
                    .iter()
                    .any(|r| !r.is_empty() && (repo.ends_with(r.as_str()) || repo.contains(r.as_str())))
            })
        {
            return Some(project.name.clone());
        }

        if let Some(path) = payload_field(event, "path") {
            let best = ordered
                .iter()
                .filter_map(|p| {
                    p.path
                        .as_deref()
                        .filter(|root| !root.is_empty() && path.starts_with(root))
                        .map(|root| (root.len(), p.name.as_str()))
                })
                .fold(None::<(usize, &str)>, |best, cand| match best {
                    Some((len, _)) if len >= cand.0 => best,
                    _ => Some(cand),
                });
            if let Some((_, name)) = best {
                return Some(name.to_string());
            }
        }

        let text = event.payload.to_string().to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        for project in ordered {
            let hits = project
                .keywords
                .iter()
                .filter(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
                .count();
            if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
                best = Some((&project.name, hits));
            }
        }
        best.map(|(name, _)| name.to_string())
    }
}

fn payload_field<'a>(event: &'a RawEvent, key: &str) -> Option<&'a str> {
    event
        .payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
}

fn alpha_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}
