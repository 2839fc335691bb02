//! Printable views of tab snapshots.

use serde::Serialize;
use tabmux_pty::SessionSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabReport {
    pub id: u64,
    pub status: String,
    pub active: bool,
    /// `colsxrows`
    pub geometry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub lines: Vec<String>,
}

impl From<SessionSnapshot> for TabReport {
    fn from(snapshot: SessionSnapshot) -> Self {
        let mut lines = snapshot.lines;
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        Self {
            id: snapshot.id,
            status: snapshot.status.to_string(),
            active: snapshot.active,
            geometry: snapshot.geometry.to_string(),
            pid: snapshot.pid,
            title: snapshot.title,
            lines,
        }
    }
}

pub fn render_text(reports: &[TabReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let active = if report.active { ", active" } else { "" };
        out.push_str(&format!(
            "== tab {} [{}{active}] {} ==\n",
            report.id, report.status, report.geometry
        ));
        if let Some(title) = &report.title {
            out.push_str(&format!("title: {title}\n"));
        }
        for line in &report.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

pub fn render_json(reports: &[TabReport]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}
