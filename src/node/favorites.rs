//! Favorites store: a bounded, ordered list of named node shortcuts.
//!
//! Source format is line-oriented text:
//!
//! ```text
//! # comment
//! Hub,12345
//! Parrot, 40894
//! ```
//!
//! Blank and `#` lines are ignored. Data lines split on the first comma into
//! a name and a node id. Lines without a comma, or with an empty side after
//! trimming, are counted as malformed and skipped. Only the first
//! [`FAVORITES_CAPACITY`] valid lines are kept; later valid lines are counted
//! as overflow.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PanelError, Result};

/// Maximum number of favorites shown on the favorites screen.
pub const FAVORITES_CAPACITY: usize = 6;

const COMMENT_MARKER: char = '#';

/// A named shortcut to a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    pub name: String,
    pub node_id: String,
}

impl Favorite {
    #[must_use]
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
        }
    }
}

/// Immutable favorites list, at most [`FAVORITES_CAPACITY`] entries in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Favorites {
    entries: Vec<Favorite>,
}

impl Favorites {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Favorite] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Favorite> {
        self.entries.get(index)
    }

    /// Name of the first favorite pointing at `node_id`.
    #[must_use]
    pub fn name_for(&self, node_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|fav| fav.node_id == node_id)
            .map(|fav| fav.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Favorite> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Favorites {
    type Item = &'a Favorite;
    type IntoIter = std::slice::Iter<'a, Favorite>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Outcome of parsing a favorites source, with diagnostic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FavoritesReport {
    pub favorites: Favorites,
    /// Data lines that were not `name,node_id`.
    pub malformed_lines: usize,
    /// Valid lines past the capacity.
    pub overflow_lines: usize,
}

/// Loads favorites from disk.
pub struct FavoritesStore;

impl FavoritesStore {
    /// Read and parse the favorites file.
    ///
    /// A missing or unreadable file is a [`PanelError::Favorites`]; callers
    /// degrade to [`Favorites::empty`].
    pub fn load(path: &Path) -> Result<FavoritesReport> {
        let raw = fs::read_to_string(path).map_err(|source| PanelError::Favorites {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(parse_favorites(&raw))
    }
}

/// Parse favorites text. Never fails; bad lines only bump counters.
#[must_use]
pub fn parse_favorites(raw: &str) -> FavoritesReport {
    let mut report = FavoritesReport::default();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER) {
            continue;
        }

        let Some(favorite) = parse_line(trimmed) else {
            report.malformed_lines += 1;
            continue;
        };

        if report.favorites.entries.len() < FAVORITES_CAPACITY {
            report.favorites.entries.push(favorite);
        } else {
            report.overflow_lines += 1;
        }
    }

    report
}

fn parse_line(line: &str) -> Option<Favorite> {
    let (name, node_id) = line.split_once(',')?;
    let name = name.trim();
    let node_id = node_id.trim();
    if name.is_empty() || node_id.is_empty() {
        return None;
    }
    Some(Favorite::new(name, node_id))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;

    fn pairs(report: &FavoritesReport) -> Vec<(&str, &str)> {
        report
            .favorites
            .iter()
            .map(|f| (f.name.as_str(), f.node_id.as_str()))
            .collect()
    }

    #[test]
    fn parses_documented_sample() {
        let report = parse_favorites("Hub,12345\nParrot,40894\n#comment\n\nClub,57699");
        assert_eq!(
            pairs(&report),
            vec![("Hub", "12345"), ("Parrot", "40894"), ("Club", "57699")]
        );
        assert_eq!(report.malformed_lines, 0);
        assert_eq!(report.overflow_lines, 0);
    }

    #[test]
    fn trims_whitespace_around_fields() {
        let report = parse_favorites("  Hub  ,  12345  \r\n");
        assert_eq!(pairs(&report), vec![("Hub", "12345")]);
    }

    #[test]
    fn splits_on_first_comma_only() {
        let report = parse_favorites("Net,2000,extra");
        assert_eq!(pairs(&report), vec![("Net", "2000,extra")]);
    }

    #[test]
    fn bare_node_number_is_malformed() {
        let report = parse_favorites("58175\nHub,12345");
        assert_eq!(pairs(&report), vec![("Hub", "12345")]);
        assert_eq!(report.malformed_lines, 1);
    }

    #[test]
    fn empty_sides_are_malformed() {
        let report = parse_favorites(",12345\nHub,\n , \nOk,1");
        assert_eq!(pairs(&report), vec![("Ok", "1")]);
        assert_eq!(report.malformed_lines, 3);
    }

    #[test]
    fn indented_comment_is_skipped() {
        let report = parse_favorites("   # Hub,12345\nClub,57699");
        assert_eq!(pairs(&report), vec![("Club", "57699")]);
        assert_eq!(report.malformed_lines, 0);
    }

    #[test]
    fn overflow_is_counted_but_not_kept() {
        let raw = (1..=9)
            .map(|i| format!("N{i},{i}000"))
            .collect::<Vec<_>>()
            .join("\n");
        let report = parse_favorites(&format!("{raw}\nbroken"));
        assert_eq!(report.favorites.len(), FAVORITES_CAPACITY);
        assert_eq!(report.favorites.get(5).unwrap().name, "N6");
        assert_eq!(report.overflow_lines, 3);
        assert_eq!(report.malformed_lines, 1);
    }

    #[test]
    fn name_lookup_uses_first_match() {
        let report = parse_favorites("Hub,1\nHub Again,1\nClub,2");
        assert_eq!(report.favorites.name_for("1"), Some("Hub"));
        assert_eq!(report.favorites.name_for("2"), Some("Club"));
        assert_eq!(report.favorites.name_for("3"), None);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favourites.txt");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "# my nets\nHub,12345\nParrot,40894").unwrap();

        let report = FavoritesStore::load(&path).expect("load");
        assert_eq!(pairs(&report), vec![("Hub", "12345"), ("Parrot", "40894")]);
    }

    #[test]
    fn load_missing_file_is_favorites_error() {
        let err = FavoritesStore::load(Path::new("/nonexistent/aspanel/favourites.txt"))
            .expect_err("missing file should error");
        assert_eq!(err.code(), "ASP-2001");
    }

    fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{0,10}[A-Za-z0-9]"
    }

    fn arb_node() -> impl Strategy<Value = String> {
        "[0-9]{1,6}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn keeps_first_six_valid_lines_in_order(
            entries in prop::collection::vec((arb_name(), arb_node()), 0..12),
            noise in prop::collection::vec(prop_oneof![
                Just(String::new()),
                Just("# comment".to_string()),
                Just("garbage".to_string()),
            ], 0..6),
        ) {
            let mut lines: Vec<String> = entries
                .iter()
                .map(|(name, node)| format!("{name},{node}"))
                .collect();
            for (i, extra) in noise.iter().enumerate() {
                let at = (i * 3).min(lines.len());
                lines.insert(at, extra.clone());
            }

            let report = parse_favorites(&lines.join("\n"));
            let expected: Vec<Favorite> = entries
                .iter()
                .take(FAVORITES_CAPACITY)
                .map(|(name, node)| Favorite::new(name.clone(), node.clone()))
                .collect();

            prop_assert_eq!(report.favorites.as_slice(), expected.as_slice());
            prop_assert_eq!(
                report.overflow_lines,
                entries.len().saturating_sub(FAVORITES_CAPACITY)
            );
        }
    }
}
