use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use log::{debug, info, warn};

use crate::docker;
use crate::render::{PauseGate, Screen};
use crate::tabs::{Direction, TabRegistry};

const PROMPT_FG: Color = Color::AnsiValue(245);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SwitchBackward,
    SwitchForward,
    ToggleInstructions,
    RunCommand,
    OpenShell,
    Quit,
}

pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter(stdout: &mut io::Stdout) -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(stdout, EnterAlternateScreen, Hide)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, Show, LeaveAlternateScreen);
    }
}

// Foreground actions and the command prompt need the cooked terminal back;
// dropping this restores the raw-mode UI state whichever way they end.
struct RawModeSuspend;

impl RawModeSuspend {
    fn begin() -> io::Result<Self> {
        terminal::disable_raw_mode()?;
        execute!(io::stdout(), Show)?;
        Ok(Self)
    }
}

impl Drop for RawModeSuspend {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Hide);
        let _ = terminal::enable_raw_mode();
    }
}

pub fn action_for_key(key: &KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Char('a') | KeyCode::Char('A') => Some(Action::SwitchBackward),
        KeyCode::Char('d') | KeyCode::Char('D') => Some(Action::SwitchForward),
        KeyCode::Char('i') | KeyCode::Char('I') => Some(Action::ToggleInstructions),
        KeyCode::Char(' ') => Some(Action::RunCommand),
        KeyCode::Enter => Some(Action::OpenShell),
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(Action::Quit),
        _ => None,
    }
}

/// Blocks on raw keypresses until quit. Every foreground action runs under a
/// pause guard, so its terminal output never interleaves with a background
/// frame, and exactly one render follows it.
pub fn run_event_loop(registry: &TabRegistry, screen: &Screen, gate: &PauseGate) -> Result<()> {
    loop {
        match event::read().context("reading terminal input")? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                let Some(action) = action_for_key(&key) else {
                    continue;
                };
                debug!("dispatching {action:?}");
                match action {
                    Action::SwitchBackward => {
                        registry.switch(Direction::Backward);
                        screen.draw()?;
                    }
                    Action::SwitchForward => {
                        registry.switch(Direction::Forward);
                        screen.draw()?;
                    }
                    Action::ToggleInstructions => {
                        screen.toggle_instructions();
                        screen.draw()?;
                    }
                    Action::RunCommand => prompt_and_run_command(registry, screen, gate)?,
                    Action::OpenShell => open_shell(registry, screen, gate)?,
                    Action::Quit => {
                        info!("quit requested");
                        return Ok(());
                    }
                }
            }
            Event::Resize(_, _) => screen.draw()?,
            _ => {}
        }
    }
}

fn prompt_and_run_command(registry: &TabRegistry, screen: &Screen, gate: &PauseGate) -> Result<()> {
    let _pause = gate.pause();
    screen.finish_pending_frame();
    let _cooked = RawModeSuspend::begin()?;
    let container = registry.active().container.clone();

    let mut stdout = io::stdout();
    execute!(
        stdout,
        Print("\r\n"),
        SetForegroundColor(PROMPT_FG),
        Print(format!("Command to execute in {} -$ ", container.name)),
        ResetColor
    )?;
    stdout.flush()?;

    let mut command = String::new();
    io::stdin()
        .read_line(&mut command)
        .context("reading the command line")?;
    let command = command.trim();
    if command.is_empty() {
        return Ok(());
    }
    if let Err(err) = docker::run_command(&container, command) {
        warn!("command execution failed: {err:#}");
    }
    Ok(())
}

fn open_shell(registry: &TabRegistry, screen: &Screen, gate: &PauseGate) -> Result<()> {
    let _pause = gate.pause();
    screen.finish_pending_frame();
    let _cooked = RawModeSuspend::begin()?;
    let container = registry.active().container.clone();
    if let Err(err) = docker::run_shell(&container) {
        warn!("shell session failed: {err:#}");
    }
    Ok(())
}

/// Cooperative repaint cadence: five checks per update interval, drawing
/// when the active tab has unseen lines or the heartbeat interval elapsed,
/// and never while a foreground action holds the pause gate.
pub fn spawn_render_scheduler(
    screen: Arc<Screen>,
    registry: Arc<TabRegistry>,
    gate: Arc<PauseGate>,
    update_interval: Duration,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("render-scheduler".to_owned())
        .spawn(move || {
            let cadence = update_interval / 5;
            while !stop.load(Ordering::Relaxed) {
                if !gate.is_paused() {
                    let due = registry.active().store.unseen_count() > 0
                        || screen.since_last_render() > update_interval;
                    if due && let Err(err) = screen.draw_gated(&gate) {
                        warn!("background render failed: {err}");
                    }
                }
                thread::sleep(cadence);
            }
        })
}

#[cfg(test)]
mod tests {
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::{action_for_key, Action};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn supported_keys_map_to_actions() {
        assert_eq!(
            action_for_key(&key(KeyCode::Char('a'))),
            Some(Action::SwitchBackward)
        );
        assert_eq!(
            action_for_key(&key(KeyCode::Char('D'))),
            Some(Action::SwitchForward)
        );
        assert_eq!(
            action_for_key(&key(KeyCode::Char('i'))),
            Some(Action::ToggleInstructions)
        );
        assert_eq!(
            action_for_key(&key(KeyCode::Char(' '))),
            Some(Action::RunCommand)
        );
        assert_eq!(action_for_key(&key(KeyCode::Enter)), Some(Action::OpenShell));
        assert_eq!(action_for_key(&key(KeyCode::Char('q'))), Some(Action::Quit));
    }

    #[test]
    fn ctrl_c_quits() {
        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(action_for_key(&event), Some(Action::Quit));
    }

    #[test]
    fn unmapped_keys_are_ignored() {
        assert_eq!(action_for_key(&key(KeyCode::Char('x'))), None);
        assert_eq!(action_for_key(&key(KeyCode::Esc)), None);
        assert_eq!(action_for_key(&key(KeyCode::Tab)), None);
    }
}
