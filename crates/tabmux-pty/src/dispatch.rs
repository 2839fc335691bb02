//! The "run command" path: live passthrough or one-shot fallback.

use std::sync::Arc;

use tabmux_vt::RenderSurface;

use crate::backend::SessionId;
use crate::event::Event;
use crate::fallback::RunOutput;
use crate::multiplexer::{MuxError, Multiplexer, RED, RESET};

impl<S: RenderSurface> Multiplexer<S> {
    /// Run `command` in the active tab.
    ///
    /// A live shell receives the command as typed input. Otherwise the command
    /// runs to completion through the fallback runner and its result is
    /// written to the tab as one block when [`Event::RunFinished`] arrives.
    pub fn run_command(&mut self, command: &str) -> Result<(), MuxError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(MuxError::EmptyCommand);
        }
        let id = self.active.ok_or(MuxError::NoActiveTab)?;
        let Some(session) = self.registry.lookup_mut(id) else {
            return Err(MuxError::UnknownTab(id));
        };

        if session.is_live() {
            if let Some(backend) = &self.backend {
                let line = format!("{command}\n");
                return backend.write(id, line.as_bytes()).map_err(|source| {
                    log::warn!("failed to send command to tab {id}: {source}");
                    let notice = format!("{RED}Failed to send command: {source}{RESET}\r\n");
                    session.write_output(notice.as_bytes());
                    MuxError::WriteFailed { id, source }
                });
            }
        }

        if session.command_in_flight() {
            return Err(MuxError::CommandInFlight(id));
        }
        session.set_command_in_flight(true);

        let runner = Arc::clone(&self.runner);
        let inbox = self.inbox.clone();
        let command = command.to_string();
        log::debug!("running `{command}` in tab {id} without a shell");
        tokio::spawn(async move {
            let output = runner.run_once(&command).await;
            let _ = inbox.send(Event::RunFinished { id, command, output });
        });
        Ok(())
    }

    pub(crate) fn finish_run(&mut self, id: SessionId, command: &str, output: &RunOutput) {
        let Some(session) = self.registry.lookup_mut(id) else {
            log::debug!("dropping result of `{command}` for closed tab {id}");
            return;
        };
        session.set_command_in_flight(false);
        session.write_output(render_run_block(command, output).as_bytes());
    }
}

/// Command echo, stdout, stderr in red, then the exit marker.
pub(crate) fn render_run_block(command: &str, output: &RunOutput) -> String {
    let mut block = format!("$ {command}\r\n");
    if !output.stdout.is_empty() {
        block.push_str(&output.stdout);
        if !output.stdout.ends_with('\n') {
            block.push_str("\r\n");
        }
    }
    if !output.stderr.is_empty() {
        block.push_str(RED);
        block.push_str(output.stderr.trim_end_matches(['\r', '\n']));
        block.push_str(RESET);
        block.push_str("\r\n");
    }
    block.push_str(&format!("[exit {}]\r\n", output.exit_code));
    block
}
