//! View-model composition: what the renderer should show, with no pixels.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::node::favorites::Favorites;
use crate::node::status::{PollFault, StatusSnapshot};
use crate::platform::pal::{Reading, SystemInfo};
use crate::ui::state::UiState;

const SELECTED_MARK: &str = "> ";
const UNSELECTED_MARK: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Main,
    Favorites,
}

/// Rendering hint so a renderer can colour lines consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    /// IP address header.
    Info,
    Uptime,
    /// The "Favourites" entry on the main screen.
    Menu,
    Node,
    Favorite,
    Exit,
    /// Non-selectable stand-in when there are no nodes to list.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewLine {
    pub text: String,
    pub style: LineStyle,
    pub selected: bool,
}

impl ViewLine {
    fn plain(text: impl Into<String>, style: LineStyle) -> Self {
        Self {
            text: text.into(),
            style,
            selected: false,
        }
    }

    fn item(text: impl Into<String>, style: LineStyle, selected: bool) -> Self {
        Self {
            text: text.into(),
            style,
            selected,
        }
    }
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewModel {
    pub screen: Screen,
    pub selected: usize,
    pub stale: bool,
    pub lines: Vec<ViewLine>,
}

/// Build the frame for the current state and data.
#[must_use]
pub fn compose(
    state: UiState,
    snapshot: &StatusSnapshot,
    favorites: &Favorites,
    system: &SystemInfo,
) -> ViewModel {
    match state {
        UiState::Main { cursor } => {
            let mut lines = vec![
                ViewLine::plain(ip_line(system.ip), LineStyle::Info),
                ViewLine::plain(uptime_line(system.uptime), LineStyle::Uptime),
                ViewLine::item("Favourites", LineStyle::Menu, cursor == 0),
            ];
            if snapshot.nodes.is_empty() {
                lines.push(ViewLine::plain(placeholder(snapshot), LineStyle::Placeholder));
            }
            for (i, node) in snapshot.nodes.iter().enumerate() {
                lines.push(ViewLine::item(
                    node_label(&node.node_id, favorites),
                    LineStyle::Node,
                    cursor == i + 1,
                ));
            }
            ViewModel {
                screen: Screen::Main,
                selected: cursor,
                stale: snapshot.stale,
                lines,
            }
        }
        UiState::Favorites { cursor } => {
            let mut lines: Vec<ViewLine> = favorites
                .iter()
                .enumerate()
                .map(|(i, fav)| {
                    ViewLine::item(
                        format!("{}: {}", fav.name, fav.node_id),
                        LineStyle::Favorite,
                        cursor == i,
                    )
                })
                .collect();
            lines.push(ViewLine::item(
                "Exit",
                LineStyle::Exit,
                cursor == favorites.len(),
            ));
            ViewModel {
                screen: Screen::Favorites,
                selected: cursor,
                stale: snapshot.stale,
                lines,
            }
        }
    }
}

/// `"<favorite name>: <id>"` when the node is a favorite, else `"Node: <id>"`.
#[must_use]
pub fn node_label(node_id: &str, favorites: &Favorites) -> String {
    format!("{}: {node_id}", favorites.name_for(node_id).unwrap_or("Node"))
}

fn placeholder(snapshot: &StatusSnapshot) -> &'static str {
    match snapshot.fault {
        Some(PollFault::ToolMissing) => "Nodes: No tool",
        Some(PollFault::CommandFailed | PollFault::Unparseable) => "Nodes: Err",
        None => "Nodes: None",
    }
}

fn ip_line(ip: Reading<std::net::IpAddr>) -> String {
    match ip {
        Reading::Loading => "IP: Loading...".to_string(),
        Reading::Ready(ip) => format!("IP: {ip}"),
        Reading::Failed => "IP: Error".to_string(),
    }
}

fn uptime_line(uptime: Reading<Duration>) -> String {
    match uptime {
        Reading::Loading => "Uptime: Loading...".to_string(),
        Reading::Ready(up) => format!("Uptime: {}", format_uptime(up)),
        Reading::Failed => "Uptime: Error".to_string(),
    }
}

/// `DD:HH:MM`; days keep growing past two digits.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    format!("{days:02}:{hours:02}:{minutes:02}")
}

/// Plain-text rendering, one line per entry, selection marked with `>`.
#[must_use]
pub fn render_text(view: &ViewModel) -> String {
    let mut out = String::new();
    for (i, line) in view.lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mark = if line.selected { SELECTED_MARK } else { UNSELECTED_MARK };
        let _ = write!(out, "{mark}{}", line.text);
    }
    if view.stale {
        out.push_str("\n  (stale)");
    }
    out
}
