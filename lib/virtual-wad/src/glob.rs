//! Case-insensitive shell-style name matching.

use glob::{MatchOptions, Pattern};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled name pattern. Only `*` and `?` are wildcards; every other
/// character, `[` and `]` included, matches itself.
#[derive(Debug, Clone)]
pub(crate) struct NameGlob {
    pattern: Option<Pattern>,
}

impl NameGlob {
    pub(crate) fn new(pattern: &str) -> Self {
        let pattern = Pattern::new(&translate(pattern)).ok();
        Self { pattern }
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.matches_with(name, OPTIONS))
    }
}

/// Rewrite a shell-style name pattern into `glob` syntax: literal runs are
/// escaped and consecutive `*` collapse into one.
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut literal = String::new();
    let mut last_star = false;
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                out.push_str(&Pattern::escape(&literal));
                literal.clear();
                if c == '*' && last_star {
                    continue;
                }
                out.push(c);
                last_star = c == '*';
            }
            _ => {
                literal.push(c);
                last_star = false;
            }
        }
    }
    out.push_str(&Pattern::escape(&literal));
    out
}

#[cfg(test)]
mod test_glob {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(NameGlob::new("*").matches("ANYTHING"));
        assert!(NameGlob::new("e1m?").matches("E1M1"));
        assert!(!NameGlob::new("e1m?").matches("E1M10"));
        assert!(NameGlob::new("d_*").matches("D_RUNNIN"));
        assert!(!NameGlob::new("d_*").matches("DS_PISTOL"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(NameGlob::new("Playpal").matches("PLAYPAL"));
    }

    #[test]
    fn test_brackets_are_literal() {
        let open = NameGlob::new("VILE[*");
        assert!(open.matches("VILE[1"));
        assert!(!open.matches("VILE]1"));

        let class = NameGlob::new("VILE[]]1");
        assert!(!class.matches("VILE]1"));
        assert!(!class.matches("VILE[1"));
        assert!(class.matches("vile[]]1"));

        let bracketed = NameGlob::new("[V]ILE?1");
        assert!(!bracketed.matches("VILE[1"));
        assert!(!bracketed.matches("VILE]1"));
        assert!(bracketed.matches("[V]ILEA1"));
    }

    #[test]
    fn test_repeated_stars_collapse() {
        assert!(NameGlob::new("A**").matches("AB"));
        assert!(NameGlob::new("**").matches("X"));
        assert!(NameGlob::new("*?*").matches("Q"));
        assert!(!NameGlob::new("*?*").matches(""));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let glob = NameGlob::new("[abc");
        assert!(glob.matches("[ABC"));
        assert!(!glob.matches("A"));
    }
}
