//! Notification content, computed at send time from the live issue and project

use faultline_entities::types::EventLevel;
use faultline_entities::{issues, projects};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub title: String,
    /// Plain-text summary, one fact per line
    pub body: String,
    pub fields: Vec<(&'static str, String)>,
    /// Absolute link to the issue when a base url is configured
    pub link: Option<String>,
    /// Hex colour for sinks that support accents
    pub color: &'static str,
}

impl RenderedMessage {
    /// Title, body and link joined for sinks that only take one text blob
    pub fn text(&self) -> String {
        let mut text = format!("{}\n\n{}", self.title, self.body);
        if let Some(link) = &self.link {
            text.push_str("\n\n");
            text.push_str(link);
        }
        text
    }

    pub fn markdown(&self) -> String {
        let mut text = format!("**{}**\n\n", self.title);
        for (name, value) in &self.fields {
            text.push_str(&format!("**{}:** {}\n", name, value));
        }
        if let Some(link) = &self.link {
            text.push_str(&format!("\n[Open issue]({})", link));
        }
        text
    }

    pub fn html(&self) -> String {
        let rows = self
            .fields
            .iter()
            .map(|(name, value)| {
                format!(
                    "<p><strong>{}:</strong> {}</p>",
                    escape_html(name),
                    escape_html(value)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let link = self
            .link
            .as_ref()
            .map(|link| {
                format!(
                    r#"<p><a href="{0}">{0}</a></p>"#,
                    escape_html(link)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<div style="font-family: Arial, sans-serif;">
    <div style="border-left: 4px solid {color}; padding-left: 15px;">
        <h2 style="color: {color};">{title}</h2>
        <div style="color: #666; font-size: 0.9em;">
{rows}
        </div>
        {link}
    </div>
</div>"#,
            color = self.color,
            title = escape_html(&self.title),
        )
    }
}

pub fn level_color(level: EventLevel) -> &'static str {
    match level {
        EventLevel::Fatal | EventLevel::Exception | EventLevel::Error => "#ff0000",
        EventLevel::Warning => "#ffa500",
        EventLevel::Info | EventLevel::Debug => "#0088cc",
    }
}

pub fn issue_link(base_url: &str, project: &projects::Model, issue: &issues::Model) -> String {
    format!(
        "{}/projects/{}/issues/{}",
        base_url.trim_end_matches('/'),
        project.slug,
        issue.id
    )
}

pub fn render(
    issue: &issues::Model,
    project: &projects::Model,
    is_regression: bool,
    base_url: Option<&str>,
) -> RenderedMessage {
    let headline = if is_regression {
        "Regression"
    } else {
        "New error"
    };
    let title = format!("[{}] {}: {}", project.name, headline, issue.title);

    let fields = vec![
        ("Project", project.name.clone()),
        ("Level", issue.level.to_string()),
        ("Platform", issue.platform.clone()),
        ("Events", issue.total_events.to_string()),
        ("First seen", issue.first_seen.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("Last seen", issue.last_seen.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("Fingerprint", issue.fingerprint.clone()),
    ];
    let body = fields
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n");

    RenderedMessage {
        title,
        body,
        fields,
        link: base_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| issue_link(url, project, issue)),
        color: level_color(issue.level),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
