//! Tab scripts: one action per line, `#` starts a comment.
//!
//! ```text
//! open
//! run ls -la
//! wait 200
//! type echo hi\n
//! viewport 1024x768
//! switch 1
//! close 2
//! dump
//! ```

use std::time::Duration;

use anyhow::{bail, Context as _};
use tabmux_pty::{MuxHandle, SessionId, SessionSnapshot};
use tabmux_vt::Viewport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Open,
    Close(SessionId),
    Switch(SessionId),
    /// Raw keystrokes for the active tab.
    Type(Vec<u8>),
    Run(String),
    Viewport(Viewport),
    Wait(Duration),
    Dump,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub line: usize,
    pub action: Action,
}

pub fn parse(source: &str) -> anyhow::Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let action = parse_action(line).with_context(|| format!("line {}: `{line}`", index + 1))?;
        steps.push(Step {
            line: index + 1,
            action,
        });
    }
    Ok(steps)
}

fn parse_action(line: &str) -> anyhow::Result<Action> {
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    let action = match word {
        "open" => Action::Open,
        "close" => Action::Close(parse_id(rest)?),
        "switch" => Action::Switch(parse_id(rest)?),
        "type" => Action::Type(unescape(rest)),
        "run" => {
            if rest.is_empty() {
                bail!("run needs a command");
            }
            Action::Run(rest.to_string())
        }
        "viewport" => Action::Viewport(parse_viewport(rest)?),
        "wait" => {
            let ms: u64 = rest.parse().context("wait needs milliseconds")?;
            Action::Wait(Duration::from_millis(ms))
        }
        "dump" => Action::Dump,
        other => bail!("unknown action `{other}`"),
    };
    Ok(action)
}

fn parse_id(text: &str) -> anyhow::Result<SessionId> {
    text.parse().with_context(|| format!("`{text}` is not a tab id"))
}

fn parse_viewport(text: &str) -> anyhow::Result<Viewport> {
    let (width, height) = text
        .split_once('x')
        .with_context(|| format!("viewport must look like 800x600, got `{text}`"))?;
    Ok(Viewport::new(
        width.trim().parse().context("bad viewport width")?,
        height.trim().parse().context("bad viewport height")?,
    ))
}

/// Expand `\n`, `\r`, `\t`, `\e` and `\\`. Other escapes are kept as written.
pub fn unescape(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('e') => out.push(0x1b),
            Some('\\') => out.push(b'\\'),
            Some(other) => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}

/// Run `steps` against a live multiplexer, returning what each `dump` saw.
pub async fn run(handle: &MuxHandle, steps: &[Step]) -> anyhow::Result<Vec<Vec<SessionSnapshot>>> {
    let mut dumps = Vec::new();
    for step in steps {
        log::debug!("script line {}: {:?}", step.line, step.action);
        let context = || format!("script line {}", step.line);
        match &step.action {
            Action::Open => {
                handle.open_tab().await.with_context(context)?;
            }
            Action::Close(id) => handle.close_tab(*id).await.with_context(context)?,
            Action::Switch(id) => handle.activate(*id).await.with_context(context)?,
            Action::Type(data) => handle.keystrokes(data.clone()).with_context(context)?,
            Action::Run(command) => handle
                .run_command(command.as_str())
                .await
                .with_context(context)?,
            Action::Viewport(viewport) => handle.resize_viewport(*viewport).with_context(context)?,
            Action::Wait(duration) => tokio::time::sleep(*duration).await,
            Action::Dump => dumps.push(dump(handle).await.with_context(context)?),
        }
    }
    Ok(dumps)
}

async fn dump(handle: &MuxHandle) -> anyhow::Result<Vec<SessionSnapshot>> {
    let mut snapshots = Vec::new();
    for tab in handle.tabs().await? {
        if let Some(snapshot) = handle.snapshot(tab.id).await? {
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}
