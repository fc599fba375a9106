use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Timelike};
use crossterm::cursor::MoveTo;
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::queue;
use log::warn;

use crate::tabs::TabRegistry;

pub(crate) const CHROME_BG: Color = Color::AnsiValue(250);
pub(crate) const CHROME_FG: Color = Color::Black;
pub(crate) const PANEL_BG: Color = Color::AnsiValue(240);

const INSTRUCTIONS: &[&str] = &[
    " Instructions: [A] ↔ [D]  - Switch tabs (containers)",
    "               [Space]    - Execute a command in this container",
    "               [Enter]    - Open a shell in this container",
    "               [I]        - Minimize these instructions",
    "               [Q]        - Quit this browser",
];
const INSTRUCTIONS_MINIMIZED: &str = " [I] to expand instructions...";

#[derive(Debug)]
struct UiState {
    instructions_minimized: bool,
    last_render: Instant,
}

/// Composes and emits whole frames. A frame is always built in memory and
/// written in a single flush, so no reader of the terminal ever observes a
/// partial one; `frame_lock` keeps the input loop and the scheduler from
/// interleaving writes.
pub struct Screen {
    registry: Arc<TabRegistry>,
    ui: Mutex<UiState>,
    started_at: DateTime<Local>,
    frame_lock: Mutex<()>,
}

impl Screen {
    pub fn new(registry: Arc<TabRegistry>) -> Self {
        Self {
            registry,
            ui: Mutex::new(UiState {
                instructions_minimized: true,
                last_render: Instant::now(),
            }),
            started_at: Local::now(),
            frame_lock: Mutex::new(()),
        }
    }

    pub fn toggle_instructions(&self) {
        let mut ui = self.ui.lock().unwrap_or_else(PoisonError::into_inner);
        ui.instructions_minimized = !ui.instructions_minimized;
    }

    pub fn since_last_render(&self) -> Duration {
        self.ui
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_render
            .elapsed()
    }

    pub fn draw(&self) -> io::Result<()> {
        let _frame = self.frame_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.draw_locked()
    }

    /// Background variant: skips quietly when the pause gate went up while
    /// waiting for the frame lock, so a foreground action's terminal output
    /// is never painted over.
    pub fn draw_gated(&self, gate: &PauseGate) -> io::Result<()> {
        let _frame = self.frame_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.is_paused() {
            return Ok(());
        }
        self.draw_locked()
    }

    /// Blocks until any in-flight frame write has finished.
    pub fn finish_pending_frame(&self) {
        drop(self.frame_lock.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn draw_locked(&self) -> io::Result<()> {
        let (cols, rows) = terminal::size()?;
        let frame = self.compose(cols as usize, rows as usize)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&frame)?;
        stdout.flush()?;
        self.ui
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_render = Instant::now();
        Ok(())
    }

    fn compose(&self, cols: usize, rows: usize) -> io::Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(cols.saturating_mul(rows));
        queue!(frame, MoveTo(0, 0), Clear(ClearType::All))?;
        if cols == 0 || rows == 0 {
            return Ok(frame);
        }

        frame.extend_from_slice(&self.registry.render_tab_bar(cols)?);
        queue!(frame, Print("\r\n"))?;

        let active = self.registry.active();
        let status = format!(
            " {} - Capturing logs since {}",
            active.container.name,
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        queue!(
            frame,
            SetBackgroundColor(CHROME_BG),
            SetForegroundColor(CHROME_FG),
            Print(pad_to_width(&status, cols)),
            ResetColor,
            Print("\r\n")
        )?;

        let minimized = self
            .ui
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instructions_minimized;
        if minimized {
            queue!(
                frame,
                SetBackgroundColor(PANEL_BG),
                Print(pad_to_width(INSTRUCTIONS_MINIMIZED, cols)),
                ResetColor,
                Print("\r\n")
            )?;
        } else {
            for line in INSTRUCTIONS {
                queue!(
                    frame,
                    SetBackgroundColor(PANEL_BG),
                    Print(pad_to_width(line, cols)),
                    ResetColor,
                    Print("\r\n")
                )?;
            }
        }

        let mut previous: Option<DateTime<Local>> = None;
        for line in active.store.tail(body_rows(rows, minimized)) {
            let label = header_label(previous, line.timestamp);
            previous = Some(line.timestamp);

            let text_width = line.text.chars().count();
            let inline_label = match label {
                Some(label) if text_width + label.chars().count() <= cols => Some(label),
                Some(label) => {
                    // Too wide to share the row: give the header its own.
                    queue!(
                        frame,
                        SetBackgroundColor(CHROME_BG),
                        SetForegroundColor(CHROME_FG),
                        Print(format!("{label:>cols$}")),
                        ResetColor,
                        Print("\r\n")
                    )?;
                    None
                }
                None => None,
            };

            match line.severity.color() {
                Some(color) => {
                    queue!(frame, SetForegroundColor(color), Print(&line.text), ResetColor)?
                }
                None => queue!(frame, Print(&line.text))?,
            }
            if let Some(label) = inline_label {
                let padding = cols - text_width - label.chars().count();
                queue!(
                    frame,
                    Print(" ".repeat(padding)),
                    SetBackgroundColor(CHROME_BG),
                    SetForegroundColor(CHROME_FG),
                    Print(label),
                    ResetColor
                )?;
            }
            queue!(frame, Print("\r\n"))?;
        }
        Ok(frame)
    }
}

/// Pauses background rendering while a foreground action owns the terminal.
/// Dropping the (outermost) guard lowers the flag and fires the resume hook,
/// which triggers exactly one fresh render — on every exit path.
pub struct PauseGate {
    depth: Mutex<usize>,
    on_resume: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            depth: Mutex::new(0),
            on_resume: Mutex::new(None),
        }
    }

    pub fn set_resume_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_resume.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn is_paused(&self) -> bool {
        *self.depth.lock().unwrap_or_else(PoisonError::into_inner) > 0
    }

    pub fn pause(&self) -> PauseGuard<'_> {
        *self.depth.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        PauseGuard { gate: self }
    }
}

pub struct PauseGuard<'a> {
    gate: &'a PauseGate,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        let resumed = {
            let mut depth = self
                .gate
                .depth
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *depth -= 1;
            *depth == 0
        };
        if resumed {
            let hook = self
                .gate
                .on_resume
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(hook) = hook.as_ref() {
                hook();
            }
        }
    }
}

/// Wires the gate's resume hook to a fresh full render.
pub fn resume_with_render(gate: &PauseGate, screen: &Arc<Screen>) {
    let screen = Arc::clone(screen);
    gate.set_resume_hook(move || {
        if let Err(err) = screen.draw() {
            warn!("redraw after foreground action failed: {err}");
        }
    });
}

/// A right-aligned time header whenever the (date, hour, minute) bucket
/// differs from the previous line's in any unit; the format carries the
/// date only when the date itself changed.
fn header_label(previous: Option<DateTime<Local>>, current: DateTime<Local>) -> Option<String> {
    let date_changed =
        previous.is_none_or(|prev| prev.date_naive() != current.date_naive());
    let time_changed = previous
        .is_none_or(|prev| prev.hour() != current.hour() || prev.minute() != current.minute());
    if date_changed {
        Some(format!(" {} ", current.format("%Y-%m-%d %H:%M")))
    } else if time_changed {
        Some(format!(" {} ", current.format("%H:%M")))
    } else {
        None
    }
}

fn body_rows(rows: usize, instructions_minimized: bool) -> usize {
    let instruction_rows = if instructions_minimized {
        1
    } else {
        INSTRUCTIONS.len()
    };
    rows.saturating_sub(instruction_rows + 3).max(1)
}

fn pad_to_width(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_owned()
    } else {
        format!("{text}{}", " ".repeat(width - len))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::{Local, TimeZone};

    use super::{body_rows, header_label, pad_to_width, PauseGate, Screen, INSTRUCTIONS};
    use crate::docker::Container;
    use crate::store::{LogLine, LogStore};
    use crate::tabs::{Tab, TabRegistry};

    fn screen_with_lines(lines: &[LogLine]) -> Screen {
        let store = Arc::new(LogStore::new());
        for line in lines {
            store.append(line.clone());
        }
        let registry = TabRegistry::new(vec![Tab {
            container: Container {
                id: "abc".to_owned(),
                name: "api".to_owned(),
            },
            store,
        }]);
        Screen::new(Arc::new(registry))
    }

    fn at(day: u32, hour: u32, minute: u32) -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn first_line_gets_a_dated_header() {
        assert_eq!(
            header_label(None, at(1, 9, 15)),
            Some(" 2024-03-01 09:15 ".to_owned())
        );
    }

    #[test]
    fn header_appears_when_any_unit_changes() {
        // Same minute bucket: no header.
        assert_eq!(header_label(Some(at(1, 9, 15)), at(1, 9, 15)), None);
        // Minute changed: time-only header.
        assert_eq!(
            header_label(Some(at(1, 9, 15)), at(1, 9, 16)),
            Some(" 09:16 ".to_owned())
        );
        // Day boundary with hour and minute coinciding still gets a header,
        // and a dated one.
        assert_eq!(
            header_label(Some(at(1, 9, 15)), at(2, 9, 15)),
            Some(" 2024-03-02 09:15 ".to_owned())
        );
    }

    #[test]
    fn frame_contains_chrome_and_colored_body() {
        let screen = screen_with_lines(&[
            LogLine::classified(at(1, 9, 15), "ERROR: crashed".to_owned()),
            LogLine::classified(at(1, 9, 15), "plain".to_owned()),
        ]);
        let frame = screen.compose(80, 24).unwrap();
        let text = String::from_utf8_lossy(&frame);

        assert!(text.contains("api"));
        assert!(text.contains("Capturing logs since"));
        assert!(text.contains("[I] to expand instructions"));
        assert!(text.contains("ERROR: crashed"));
        assert!(text.contains("plain"));
        assert!(text.contains("2024-03-01 09:15"));
    }

    #[test]
    fn expanded_instructions_replace_the_one_liner() {
        let screen = screen_with_lines(&[]);
        screen.toggle_instructions();
        let frame = screen.compose(80, 24).unwrap();
        let text = String::from_utf8_lossy(&frame);
        for line in INSTRUCTIONS {
            assert!(text.contains(line.trim_end()));
        }
        assert!(!text.contains("[I] to expand instructions"));
    }

    #[test]
    fn wide_lines_push_the_header_onto_its_own_row() {
        let long = "x".repeat(30);
        let screen = screen_with_lines(&[LogLine::classified(at(1, 9, 15), long.clone())]);
        let frame = screen.compose(40, 24).unwrap();
        let text = String::from_utf8_lossy(&frame);

        let header_pos = text.find("2024-03-01 09:15").unwrap();
        let line_pos = text.find(&long).unwrap();
        assert!(
            header_pos < line_pos,
            "own-row header must precede the log line"
        );
    }

    #[test]
    fn narrow_header_shares_the_row_with_its_line() {
        let screen = screen_with_lines(&[LogLine::classified(at(1, 9, 15), "hi".to_owned())]);
        let frame = screen.compose(80, 24).unwrap();
        let text = String::from_utf8_lossy(&frame);

        let line_pos = text.find("hi").unwrap();
        let header_pos = text.find("2024-03-01 09:15").unwrap();
        assert!(line_pos < header_pos, "inline header trails the log line");
    }

    #[test]
    fn body_rows_tracks_instruction_rows() {
        assert_eq!(body_rows(24, true), 20);
        assert_eq!(body_rows(24, false), 24 - INSTRUCTIONS.len() - 3);
        assert_eq!(body_rows(3, false), 1);
    }

    #[test]
    fn pad_to_width_left_justifies() {
        assert_eq!(pad_to_width("ab", 4), "ab  ");
        assert_eq!(pad_to_width("abcd", 2), "abcd");
    }

    #[test]
    fn nested_pause_guards_render_once_on_outermost_release() {
        let gate = PauseGate::new();
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&renders);
        gate.set_resume_hook(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        assert!(!gate.is_paused());
        {
            let _outer = gate.pause();
            assert!(gate.is_paused());
            {
                let _inner = gate.pause();
                assert!(gate.is_paused());
            }
            assert_eq!(renders.load(Ordering::Relaxed), 0);
            assert!(gate.is_paused());
        }
        assert!(!gate.is_paused());
        assert_eq!(renders.load(Ordering::Relaxed), 1);
    }
}
