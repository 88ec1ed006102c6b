use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis transport failed: {0}")]
    Transport(String),
    #[error("analysis provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("analysis response is not JSON: {0}")]
    Parse(String),
    #[error("analysis response failed validation: {0}")]
    Invalid(String),
    #[error("analysis gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("analysis provider misconfigured: {0}")]
    Config(String),
}

impl AnalysisError {
    /// Only configuration errors are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AnalysisError::Config(_))
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Transport(err.to_string())
    }
}

/// One unit of analysis work: the event text plus the auxiliary context
/// every chunk carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    pub task: String,
    pub primary: String,
    pub known_projects: Vec<String>,
    pub known_technologies: Vec<String>,
    /// Full `owner/name` repositories named by the events behind `primary`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
    /// `(index, total)` when the primary text was split.
    pub chunk: Option<(usize, usize)>,
}

impl AnalysisRequest {
    pub fn new(task: &str, primary: String) -> Self {
        Self {
            task: task.to_string(),
            primary,
            known_projects: Vec::new(),
            known_technologies: Vec::new(),
            repositories: Vec::new(),
            chunk: None,
        }
    }

    pub fn with_context(mut self, projects: Vec<String>, technologies: Vec<String>) -> Self {
        self.known_projects = projects;
        self.known_technologies = technologies;
        self
    }

    pub fn with_repositories(mut self, repositories: Vec<String>) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn auxiliary_text(&self) -> String {
        format!(
            "Known projects: {}\nKnown technologies: {}",
            serde_json::to_string(&self.known_projects).unwrap_or_default(),
            serde_json::to_string(&self.known_technologies).unwrap_or_default()
        )
    }

    pub fn for_chunk(&self, primary: String, index: usize, total: usize) -> Self {
        Self {
            primary,
            chunk: Some((index, total)),
            ..self.clone()
        }
    }

    pub fn total_chars(&self) -> usize {
        self.primary.chars().count() + self.auxiliary_text().chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityFinding {
    Text(String),
    Detailed {
        description: String,
        #[serde(default, alias = "type")]
        kind: Option<String>,
        #[serde(default, alias = "timestamp")]
        occurred_at: Option<String>,
        #[serde(default)]
        technologies: Vec<String>,
    },
}

impl ActivityFinding {
    pub fn description(&self) -> &str {
        match self {
            ActivityFinding::Text(text) => text,
            ActivityFinding::Detailed { description, .. } => description,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            ActivityFinding::Text(_) => None,
            ActivityFinding::Detailed { kind, .. } => kind.as_deref(),
        }
    }

    pub fn occurred_at(&self) -> Option<&str> {
        match self {
            ActivityFinding::Text(_) => None,
            ActivityFinding::Detailed { occurred_at, .. } => occurred_at.as_deref(),
        }
    }

    pub fn technologies(&self) -> &[String] {
        match self {
            ActivityFinding::Text(_) => &[],
            ActivityFinding::Detailed { technologies, .. } => technologies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFinding {
    pub name: String,
    #[serde(default, alias = "description")]
    pub rationale: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub activities: Vec<ActivityFinding>,
    #[serde(default, alias = "technologies")]
    pub technologies_used: Vec<String>,
    #[serde(default)]
    pub new_project: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotableMoment {
    pub description: String,
    #[serde(default)]
    pub tweetable: bool,
    #[serde(default)]
    pub tweet_draft: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetDraft {
    #[serde(alias = "tweet", alias = "content")]
    pub text: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Structured analysis output. A list that the model omitted stays `None`
/// so "not reported" is distinguishable from "reported empty".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub projects: Option<Vec<ProjectFinding>>,
    #[serde(default)]
    pub activities: Option<Vec<ActivityFinding>>,
    #[serde(default)]
    pub notable_moments: Option<Vec<NotableMoment>>,
    #[serde(default)]
    pub tweet_drafts: Option<Vec<TweetDraft>>,
    #[serde(default)]
    pub technologies: Option<Vec<String>>,
}

fn extend_list<T>(into: &mut Option<Vec<T>>, from: Option<Vec<T>>) {
    if let Some(items) = from {
        into.get_or_insert_with(Vec::new).extend(items);
    }
}

fn list_len<T>(list: &Option<Vec<T>>) -> usize {
    list.as_ref().map_or(0, Vec::len)
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.finding_count() == 0
    }

    pub fn finding_count(&self) -> usize {
        list_len(&self.projects)
            + list_len(&self.activities)
            + list_len(&self.notable_moments)
            + list_len(&self.tweet_drafts)
            + list_len(&self.technologies)
    }

    /// Append `other`'s lists after ours, keeping order.
    pub fn merge(&mut self, other: AnalysisResult) {
        extend_list(&mut self.projects, other.projects);
        extend_list(&mut self.activities, other.activities);
        extend_list(&mut self.notable_moments, other.notable_moments);
        extend_list(&mut self.tweet_drafts, other.tweet_drafts);
        extend_list(&mut self.technologies, other.technologies);
    }

    /// Tweet drafts reported directly plus those attached to tweetable
    /// notable moments.
    pub fn all_tweet_drafts(&self) -> Vec<TweetDraft> {
        let mut drafts: Vec<TweetDraft> = self.tweet_drafts.clone().unwrap_or_default();
        for moment in self.notable_moments.iter().flatten() {
            if let Some(text) = moment.tweet_draft.as_deref().map(str::trim)
                && moment.tweetable
                && !text.is_empty()
            {
                drafts.push(TweetDraft {
                    text: text.to_string(),
                    project: moment.project.clone(),
                    description: Some(moment.description.clone()),
                });
            }
        }
        drafts
    }

    fn validated(mut self) -> Self {
        if let Some(projects) = self.projects.as_mut() {
            projects.retain(|p| !p.name.trim().is_empty());
            for project in projects.iter_mut() {
                project.name = project.name.trim().to_string();
                project
                    .activities
                    .retain(|a| !a.description().trim().is_empty());
                project.technologies_used.retain(|t| !t.trim().is_empty());
            }
        }
        if let Some(activities) = self.activities.as_mut() {
            activities.retain(|a| !a.description().trim().is_empty());
        }
        if let Some(moments) = self.notable_moments.as_mut() {
            moments.retain(|m| !m.description.trim().is_empty());
        }
        if let Some(drafts) = self.tweet_drafts.as_mut() {
            drafts.retain(|d| !d.text.trim().is_empty());
        }
        if let Some(techs) = self.technologies.as_mut() {
            techs.retain(|t| !t.trim().is_empty());
        }
        self
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map_or(0, |idx| idx + 1);
    let lang = after[..body_start].trim();
    if !lang.is_empty() && !lang.eq_ignore_ascii_case("json") && !lang.eq_ignore_ascii_case("json5") {
        return None;
    }
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_json_value(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .or_else(|| json5::from_str::<Value>(candidate).ok())
}

/// Extract the structured result from a model reply. Tries a fenced code
/// block, then the outermost braces, then the whole text; each candidate
/// is read as strict JSON first and JSON5 second.
pub fn parse_analysis_response(text: &str) -> Result<AnalysisResult, AnalysisError> {
    let candidates = [fenced_block(text), outer_braces(text), Some(text.trim())];
    let value = candidates
        .into_iter()
        .flatten()
        .filter(|c| !c.is_empty())
        .find_map(parse_json_value)
        .ok_or_else(|| {
            AnalysisError::Parse(crate::sift::util::truncate_with_ellipsis(text.trim(), 120))
        })?;

    if !value.is_object() {
        return Err(AnalysisError::Invalid(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    let result: AnalysisResult =
        serde_json::from_value(value).map_err(|err| AnalysisError::Invalid(err.to_string()))?;
    Ok(result.validated())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "projects": [
            {"name": "ledger", "activities": ["wrote importer", {"description": "added reports", "type": "development"}], "technologies_used": ["rust"], "new_project": true},
            {"name": "  ", "activities": []}
        ],
        "technologies": ["rust", ""],
        "notable_moments": [{"description": "first import ran", "tweetable": true, "tweet_draft": "ledger imports work"}]
    }"#;

    #[test]
    fn parses_plain_json_and_drops_blank_entries() {
        let result = parse_analysis_response(SAMPLE).expect("parse");
        let projects = result.projects.as_ref().expect("projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].activities.len(), 2);
        assert_eq!(projects[0].activities[1].kind(), Some("development"));
        assert_eq!(result.technologies, Some(vec!["rust".to_string()]));
        assert!(result.activities.is_none());
    }

    #[test]
    fn prefers_fenced_block() {
        let reply = format!("Here you go:\n```json\n{SAMPLE}\n```\nThanks!");
        let result = parse_analysis_response(&reply).expect("parse");
        assert_eq!(result.notable_moments.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn falls_back_to_outer_braces_and_json5() {
        let reply = "Sure. {projects: [{name: 'ledger',},], technologies: ['sqlite']} done";
        let result = parse_analysis_response(reply).expect("parse");
        assert_eq!(result.projects.as_ref().map(Vec::len), Some(1));
        assert_eq!(result.technologies, Some(vec!["sqlite".to_string()]));
    }

    #[test]
    fn rejects_prose_and_non_objects() {
        assert!(matches!(
            parse_analysis_response("I could not analyze this."),
            Err(AnalysisError::Parse(_))
        ));
        assert!(matches!(
            parse_analysis_response("[1, 2, 3]"),
            Err(AnalysisError::Invalid(_))
        ));
    }

    #[test]
    fn merge_concatenates_in_order_and_tracks_presence() {
        let mut first = AnalysisResult {
            technologies: Some(vec!["rust".into()]),
            ..AnalysisResult::default()
        };
        assert!(!first.is_empty());
        first.merge(AnalysisResult {
            technologies: Some(vec!["sqlite".into()]),
            activities: Some(vec![ActivityFinding::Text("did a thing".into())]),
            ..AnalysisResult::default()
        });
        assert_eq!(
            first.technologies,
            Some(vec!["rust".to_string(), "sqlite".to_string()])
        );
        assert_eq!(first.activities.as_ref().map(Vec::len), Some(1));
        assert!(first.projects.is_none());
        assert!(AnalysisResult::default().is_empty());
    }

    #[test]
    fn tweetable_moments_become_drafts() {
        let result = parse_analysis_response(SAMPLE).expect("parse");
        let drafts = result.all_tweet_drafts();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "ledger imports work");
    }
}
