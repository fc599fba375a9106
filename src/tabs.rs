use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossterm::queue;
use crossterm::style::{Print, ResetColor, SetBackgroundColor, SetForegroundColor};

use crate::docker::Container;
use crate::render::{CHROME_BG, CHROME_FG};
use crate::store::LogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

pub struct Tab {
    pub container: Container,
    pub store: Arc<LogStore>,
}

/// Fixed, ordered set of tabs with exactly one active at all times.
pub struct TabRegistry {
    tabs: Vec<Tab>,
    active: AtomicUsize,
}

impl TabRegistry {
    pub fn new(tabs: Vec<Tab>) -> Self {
        debug_assert!(!tabs.is_empty());
        Self {
            tabs,
            active: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> &Tab {
        &self.tabs[self.active_index()]
    }

    pub fn switch(&self, direction: Direction) {
        let len = self.len();
        let step = match direction {
            Direction::Forward => 1,
            Direction::Backward => len - 1,
        };
        let next = (self.active_index() + step) % len;
        self.active.store(next, Ordering::Relaxed);
    }

    /// One line of ANSI output: badge, then the (possibly truncated) name,
    /// with the active tab highlighted.
    pub fn render_tab_bar(&self, width: usize) -> io::Result<Vec<u8>> {
        let names: Vec<&str> = self
            .tabs()
            .iter()
            .map(|tab| tab.container.name.as_str())
            .collect();
        let fitted = fit_names(&names, width);
        let active = self.active_index();

        let mut bar = Vec::new();
        for (i, (tab, name)) in self.tabs().iter().zip(&fitted).enumerate() {
            queue!(bar, Print(" "))?;
            match badge_glyph(tab.store.unseen_count()) {
                Some(glyph) => match tab.store.most_urgent_unseen().color() {
                    Some(color) => {
                        queue!(bar, SetForegroundColor(color), Print(glyph), ResetColor)?
                    }
                    None => queue!(bar, Print(glyph))?,
                },
                None => queue!(bar, Print(" "))?,
            }
            if i == active {
                queue!(
                    bar,
                    SetBackgroundColor(CHROME_BG),
                    SetForegroundColor(CHROME_FG)
                )?;
            }
            queue!(bar, Print(format!(" {name} ")), ResetColor)?;
        }
        Ok(bar)
    }
}

/// A rendered tab costs its name plus 4 columns of badge and padding. When
/// the full bar would not fit, every tab gets an equal share of the width
/// and over-long names are clipped with an ellipsis.
fn fit_names(names: &[&str], width: usize) -> Vec<String> {
    let full: usize = names.iter().map(|name| name.chars().count() + 4).sum();
    if full <= width || names.is_empty() {
        return names.iter().map(|name| (*name).to_owned()).collect();
    }
    let name_width = (width / names.len()).saturating_sub(4);
    names
        .iter()
        .map(|name| {
            if name.chars().count() <= name_width {
                (*name).to_owned()
            } else if name_width <= 1 {
                "…".chars().take(name_width).collect()
            } else {
                let mut clipped: String = name.chars().take(name_width - 1).collect();
                clipped.push('…');
                clipped
            }
        })
        .collect()
}

/// Unseen-line badge: the count up to 9, a single `*` beyond that.
fn badge_glyph(unseen: usize) -> Option<String> {
    match unseen {
        0 => None,
        1..=9 => Some(unseen.to_string()),
        _ => Some("*".to_owned()),
    }
}
