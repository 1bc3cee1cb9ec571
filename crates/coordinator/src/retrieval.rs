//! Adapter results and their rendering into prompt context.

use std::fmt::Write as _;

use ticketline_memory::ScoredRecord;
use ticketline_sources::{Issue, TimeEntry, WebHit};

const DESCRIPTION_PREVIEW_CHARS: usize = 200;

/// What a data source returned for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResult {
    /// Pre-formatted reference data listing
    Metadata(String),
    Tickets(Vec<Issue>),
    Issue(Box<Issue>),
    TimeEntries(Vec<TimeEntry>),
    Similar(Vec<ScoredRecord>),
    WebResults {
        answer: Option<String>,
        hits: Vec<WebHit>,
    },
    /// Outcome of a create or update call
    Mutation(String),
    /// A note for the response model, such as a clarification request
    Text(String),
    Nothing,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::Tickets(_) => "tickets",
            Self::Issue(_) => "issue",
            Self::TimeEntries(_) => "time_entries",
            Self::Similar(_) => "similar",
            Self::WebResults { .. } => "web_results",
            Self::Mutation(_) => "mutation",
            Self::Text(_) => "text",
            Self::Nothing => "nothing",
        }
    }

    /// Plain-text form included in the response prompt.
    pub fn render(&self) -> String {
        match self {
            Self::Metadata(text) | Self::Mutation(text) | Self::Text(text) => text.clone(),
            Self::Tickets(issues) => render_tickets(issues),
            Self::Issue(issue) => render_issue(issue),
            Self::TimeEntries(entries) => render_time_entries(entries),
            Self::Similar(records) => render_similar(records),
            Self::WebResults { answer, hits } => render_web(answer.as_deref(), hits),
            Self::Nothing => String::new(),
        }
    }
}

fn issue_line(issue: &Issue) -> String {
    format!(
        "• #{}: {} [Project: {} | Status: {} | Priority: {} | Assignee: {}]",
        issue.id,
        issue.subject,
        issue.project_name(),
        issue.status_name(),
        issue.priority_name(),
        issue.assignee_name()
    )
}

fn render_tickets(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "No matching issues found.".to_string();
    }
    let mut out = format!("Found {} issue(s):", issues.len());
    for issue in issues {
        out.push('\n');
        out.push_str(&issue_line(issue));
    }
    out
}

fn render_issue(issue: &Issue) -> String {
    let mut out = format!("Issue #{}: {}", issue.id, issue.subject);
    let _ = write!(
        out,
        "\nProject: {}\nTracker: {}\nStatus: {}\nPriority: {}\nAssignee: {}",
        issue.project_name(),
        issue.tracker_name(),
        issue.status_name(),
        issue.priority_name(),
        issue.assignee_name()
    );
    if let Some(author) = &issue.author {
        let _ = write!(out, "\nAuthor: {}", author.name);
    }
    if let Some(created) = &issue.created_on {
        let _ = write!(out, "\nCreated: {created}");
    }
    if let Some(updated) = &issue.updated_on {
        let _ = write!(out, "\nUpdated: {updated}");
    }
    if let Some(description) = issue.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = write!(out, "\nDescription: {description}");
    }
    out
}

fn render_time_entries(entries: &[TimeEntry]) -> String {
    if entries.is_empty() {
        return "No time entries found.".to_string();
    }
    let total: f64 = entries.iter().map(|e| e.hours).sum();
    let mut out = format!("Found {} time entries ({total:.2} hours total):", entries.len());
    for entry in entries {
        let who = entry.user.as_ref().map(|u| u.name.as_str()).unwrap_or("Unknown");
        let project = entry
            .project
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or("N/A");
        let _ = write!(
            out,
            "\n• {} {:.2}h by {} on {}",
            entry.spent_on.as_deref().unwrap_or("N/A"),
            entry.hours,
            who,
            project
        );
        if let Some(issue) = &entry.issue {
            let _ = write!(out, " (issue #{})", issue.id);
        }
        if let Some(activity) = &entry.activity {
            let _ = write!(out, " [{}]", activity.name);
        }
        if let Some(comments) = entry.comments.as_deref().filter(|c| !c.is_empty()) {
            let _ = write!(out, ": {comments}");
        }
    }
    out
}

fn render_similar(records: &[ScoredRecord]) -> String {
    if records.is_empty() {
        return "No similar issues found.".to_string();
    }
    let mut out = format!("Found {} similar issue(s):", records.len());
    for record in records {
        let doc = &record.document;
        let _ = write!(
            out,
            "\n• #{}: {} [Project: {} | Status: {} | similarity {:.2}]",
            doc.issue_id, doc.subject, doc.project, doc.status, record.score
        );
        let preview: String = doc.content.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
        if let Some(description) = preview.split("Description: ").nth(1) {
            let _ = write!(out, "\n  {description}");
        }
    }
    out
}

fn render_web(answer: Option<&str>, hits: &[WebHit]) -> String {
    let mut out = String::new();
    if let Some(answer) = answer {
        let _ = write!(out, "Summary: {answer}");
    }
    if hits.is_empty() {
        if out.is_empty() {
            out.push_str("No web results found.");
        }
        return out;
    }
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str("Sources:");
    for hit in hits {
        let _ = write!(out, "\n• {} ({})\n  {}", hit.title, hit.url, hit.snippet);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketline_memory::IndexDocument;
    use ticketline_sources::NamedRef;

    fn issue(id: u64, subject: &str) -> Issue {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "subject": subject,
            "project": {"id": 1, "name": "Portal"},
            "status": {"id": 1, "name": "New"}
        }))
        .unwrap()
    }

    #[test]
    fn tickets_render_one_line_each() {
        let text = RetrievalResult::Tickets(vec![issue(1, "Login fails"), issue(2, "Logout slow")])
            .render();
        assert!(text.starts_with("Found 2 issue(s):"));
        assert!(text.contains("#1: Login fails [Project: Portal | Status: New"));
        assert!(text.contains("Assignee: Unassigned"));
        assert_eq!(
            RetrievalResult::Tickets(vec![]).render(),
            "No matching issues found."
        );
    }

    #[test]
    fn issue_render_includes_assignee_and_description() {
        let mut detailed = issue(9, "Export broken");
        detailed.assigned_to = Some(NamedRef {
            id: 3,
            name: "Dana Lee".into(),
        });
        detailed.description = Some("CSV export returns 500".into());
        let text = RetrievalResult::Issue(Box::new(detailed)).render();
        assert!(text.contains("Assignee: Dana Lee"));
        assert!(text.contains("Description: CSV export returns 500"));
    }

    #[test]
    fn similar_render_shows_scores() {
        let record = ScoredRecord {
            document: IndexDocument {
                issue_id: 4,
                subject: "SSO login loop".into(),
                project: "Portal".into(),
                tracker: "Bug".into(),
                status: "New".into(),
                priority: "High".into(),
                created_on: None,
                content: "Issue #4: SSO login loop\nDescription: redirect loop".into(),
            },
            score: 0.873,
        };
        let text = RetrievalResult::Similar(vec![record]).render();
        assert!(text.contains("#4: SSO login loop"));
        assert!(text.contains("similarity 0.87"));
        assert!(text.contains("redirect loop"));
    }

    #[test]
    fn web_render_handles_missing_answer() {
        let text = RetrievalResult::WebResults {
            answer: None,
            hits: vec![WebHit {
                title: "Redmine guide".into(),
                url: "https://www.redmine.org/guide".into(),
                snippet: "Getting started".into(),
            }],
        }
        .render();
        assert!(text.starts_with("Sources:"));
        assert!(RetrievalResult::Nothing.render().is_empty());
    }
}
