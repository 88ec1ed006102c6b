use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;

use crate::commands::{CommandReport, open_workspace};
use crate::sift::projects::{Project, ProjectClassifier, ProposedProject};
use crate::sift::similarity::name_similarity;
use crate::sift::store::{EventStore, ProjectRegistry};

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub repos: Vec<String>,
    pub path: Option<String>,
}

pub fn list() -> Result<CommandReport> {
    let mut report = CommandReport::new("projects-list");
    let ws = open_workspace()?;
    let projects = ws.store.projects()?;
    report.detail(format!("count={}", projects.len()));
    for project in projects {
        let activities = ws.store.activities_for(&project.name)?.len();
        report.detail(format!(
            "project={} active={} activities={} keywords={}",
            project.name,
            project.active,
            activities,
            project.keywords.join(",")
        ));
    }
    Ok(report)
}

pub fn add(opts: &AddOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("projects-add");
    let name = opts.name.trim();
    if name.is_empty() {
        report.issue("project name must not be empty");
        return Ok(report);
    }

    let ws = open_workspace()?;
    let threshold = ws.cfg.projects.similarity_threshold;
    if let Some((existing, score)) = ws
        .store
        .projects()?
        .iter()
        .map(|p| (p.name.clone(), name_similarity(name, &p.name)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
    {
        report.issue(format!(
            "`{name}` is too similar to existing project `{existing}` ({score:.2})"
        ));
        return Ok(report);
    }

    let project = Project {
        description: opts.description.clone(),
        keywords: opts.keywords.clone(),
        tags: opts.tags.clone(),
        repos: opts.repos.clone(),
        path: opts.path.clone(),
        ..Project::named(name)
    };
    if ws.store.create_project(&project, Utc::now())? {
        report.detail(format!("created={name}"));
    } else {
        report.issue(format!("project `{name}` already exists"));
    }
    Ok(report)
}

pub fn suggest(description: &str, technologies: &[String]) -> Result<CommandReport> {
    let mut report = CommandReport::new("projects-suggest");
    let ws = open_workspace()?;
    let classifier = ProjectClassifier::new(&ws.cfg.projects);
    let existing = ws.store.projects()?;
    let project = classifier.suggest_project(description, technologies, &existing);
    report.detail(format!("project={project}"));
    Ok(report)
}

/// Names that have accumulated activity without being registered, and
/// whether the creation rule would accept them now.
pub fn candidates() -> Result<CommandReport> {
    let mut report = CommandReport::new("projects-candidates");
    let ws = open_workspace()?;
    let classifier = ProjectClassifier::new(&ws.cfg.projects);
    let existing = ws.store.projects()?;

    let mut history: BTreeMap<String, Vec<_>> = BTreeMap::new();
    let mut proposals = Vec::new();
    for name in ws.store.candidate_project_names()? {
        let activities = ws.store.activities_for(&name)?;
        proposals.push(ProposedProject {
            name: name.clone(),
            rationale: String::new(),
            keywords: Vec::new(),
            activities: Vec::new(),
            technologies: Vec::new(),
        });
        history.insert(name, activities);
    }

    let approved = classifier.conservative_recommendations(&proposals, &history, &existing);
    report.detail(format!("candidates={}", proposals.len()));
    for proposal in &proposals {
        let activities = history.get(&proposal.name).map(Vec::as_slice).unwrap_or_default();
        match approved.iter().find(|p| p.name == proposal.name) {
            Some(ok) => report.detail(format!(
                "candidate={} activities={} ready=true keywords={}",
                proposal.name,
                activities.len(),
                ok.keywords.join(",")
            )),
            None => report.detail(format!(
                "candidate={} activities={} ready=false reason={}",
                proposal.name,
                activities.len(),
                classifier
                    .creation_check(&proposal.name, activities, &existing)
                    .reason()
            )),
        }
    }
    Ok(report)
}

pub fn classify(limit: usize) -> Result<CommandReport> {
    let mut report = CommandReport::new("projects-classify");
    let ws = open_workspace()?;
    let classifier = ProjectClassifier::new(&ws.cfg.projects);
    let projects = ws.store.projects()?;

    let events = ws.store.unprocessed_events(limit)?;
    let mut matched = 0usize;
    for event in &events {
        if let Some(project) = classifier.classify_event(event, &projects) {
            matched += 1;
            report.detail(format!("event={} project={project}", event.id));
        }
    }
    report.detail(format!("scanned={} matched={matched}", events.len()));
    Ok(report)
}
