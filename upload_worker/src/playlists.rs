//! Playlist routing: an ordered list of case-insensitive title patterns, each
//! pointing at an environment-provided playlist identifier. A mapping with no
//! configured identifier contributes nothing.

use regex::RegexBuilder;

/// Built-in routing table: pattern → environment variable holding the
/// playlist identifier on the video host.
const RULES: [(&str, &str); 4] = [
    ("^City Commission", "PLAYLIST_CITY_COMMISSION"),
    ("^General Policy Committee", "PLAYLIST_GENERAL_POLICY_COMMITTEE"),
    ("^Plan Board", "PLAYLIST_PLAN_BOARD"),
    ("^Community Redevelopment Agency", "PLAYLIST_CRA"),
];

pub struct PlaylistRule {
    pattern: regex::Regex,
    playlist_id: Option<String>,
}

impl PlaylistRule {
    pub fn new(pattern: &str, playlist_id: Option<String>) -> Result<Self, regex::Error> {
        Ok(PlaylistRule {
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            playlist_id: playlist_id.filter(|id| !id.is_empty()),
        })
    }
}

/// The standard table with identifiers pulled from the environment.
pub fn rules_from_env() -> Vec<PlaylistRule> {
    RULES
        .iter()
        .filter_map(|(pattern, var)| PlaylistRule::new(pattern, std::env::var(var).ok()).ok())
        .collect()
}

/// Playlist identifiers for a meeting title, in table order.
pub fn match_playlists(title: &str, rules: &[PlaylistRule]) -> Vec<String> {
    rules
        .iter()
        .filter(|rule| rule.pattern.is_match(title))
        .filter_map(|rule| rule.playlist_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(p2: Option<&str>) -> Vec<PlaylistRule> {
        vec![
            PlaylistRule::new("^City Commission", Some("P1".to_string())).unwrap(),
            PlaylistRule::new("^General Policy Committee", p2.map(String::from)).unwrap(),
        ]
    }

    #[test]
    fn matches_by_prefix_case_insensitively() {
        let rules = table(Some("P2"));
        assert_eq!(
            match_playlists("General Policy Committee - Work Session", &rules),
            vec!["P2".to_string()]
        );
        assert_eq!(
            match_playlists("city commission - Regular Meeting", &rules),
            vec!["P1".to_string()]
        );
        assert!(match_playlists("Historic Preservation Board", &rules).is_empty());
    }

    #[test]
    fn unset_identifier_contributes_nothing() {
        let rules = table(None);
        assert!(match_playlists("General Policy Committee - Work Session", &rules).is_empty());
    }

    #[test]
    fn empty_identifier_contributes_nothing() {
        let rules = table(Some(""));
        assert!(match_playlists("General Policy Committee - Work Session", &rules).is_empty());
    }

    #[test]
    fn results_keep_table_order() {
        let rules = vec![
            PlaylistRule::new("Commission", Some("A".to_string())).unwrap(),
            PlaylistRule::new("^City", Some("B".to_string())).unwrap(),
        ];
        assert_eq!(
            match_playlists("City Commission", &rules),
            vec!["A".to_string(), "B".to_string()]
        );
    }
}
