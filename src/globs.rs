//! Ordered glob rules used to select the input files of a task and to decide
//! which watch bindings a changed file belongs to.
//!
//! Rules are evaluated in order: an inclusion (`src/**/*.js`) marks a path as
//! selected, an exclusion (`!src/js/vendor/**`) unmarks it. Brace
//! alternatives (`*.{jpg,png}`) expand into one rule per alternative.

use std::collections::HashSet;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::GlobsError;

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Rule {
    Include { base: Utf8PathBuf, pattern: Pattern },
    Exclude(Pattern),
}

#[derive(Debug, Clone)]
pub struct Globs {
    rules: Vec<Rule>,
}

/// A file picked by [`Globs::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    /// Path relative to the project root.
    pub path: Utf8PathBuf,
    /// Static prefix of the rule which selected the file.
    pub base: Utf8PathBuf,
}

impl Selected {
    /// Path relative to the base, which is where the file lands under the
    /// destination directory.
    pub fn relative(&self) -> &Utf8Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

impl Globs {
    pub fn new<I, S>(rules: I) -> Result<Self, GlobsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();

        for rule in rules {
            let rule = rule.as_ref();
            let (negated, rule) = match rule.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, rule),
            };

            for alternative in expand_braces(rule)? {
                let pattern = Pattern::new(&alternative)
                    .map_err(|e| GlobsError::Pattern(alternative.clone(), e))?;

                compiled.push(if negated {
                    Rule::Exclude(pattern)
                } else {
                    Rule::Include {
                        base: static_base(&alternative),
                        pattern,
                    }
                });
            }
        }

        Ok(Self { rules: compiled })
    }

    /// Whether a path relative to the project root is selected by the rules.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        let mut matched = false;

        for rule in &self.rules {
            match rule {
                Rule::Include { pattern, .. } if pattern.matches_with(path.as_str(), OPTIONS) => {
                    matched = true
                }
                Rule::Exclude(pattern) if pattern.matches_with(path.as_str(), OPTIONS) => {
                    matched = false
                }
                _ => {}
            }
        }

        matched
    }

    /// Lists the files under `root` selected by the rules. Files come in rule
    /// order, alphabetically within a rule, each at most once.
    pub fn select(&self, root: &Utf8Path) -> Result<Vec<Selected>, GlobsError> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();

        for rule in &self.rules {
            let Rule::Include { base, pattern } = rule else {
                continue;
            };

            let full = if is_current_dir(root) {
                pattern.as_str().to_string()
            } else {
                format!("{}/{}", Pattern::escape(root.as_str()), pattern.as_str())
            };

            let entries =
                glob::glob_with(&full, OPTIONS).map_err(|e| GlobsError::Pattern(full.clone(), e))?;

            for entry in entries {
                let path = Utf8PathBuf::try_from(entry?)?;
                if !path.is_file() {
                    continue;
                }

                let path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                if self.matches(&path) && seen.insert(path.clone()) {
                    selected.push(Selected {
                        path,
                        base: base.clone(),
                    });
                }
            }
        }

        Ok(selected)
    }

    /// Static directories of all inclusions, relative to the project root.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        let mut roots = Vec::new();
        for rule in &self.rules {
            if let Rule::Include { base, .. } = rule
                && !roots.contains(base)
            {
                roots.push(base.clone());
            }
        }
        roots
    }
}

fn is_current_dir(path: &Utf8Path) -> bool {
    path.as_str().is_empty() || path == "."
}

fn has_magic(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Directory prefix of a pattern up to the first component with a wildcard.
/// A pattern without wildcards names a file, so its base is the parent.
fn static_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components.iter().position(|c| has_magic(c.as_str())) {
        Some(split) => components
            .iter()
            .take(split)
            .filter(|c| !matches!(c, Utf8Component::CurDir))
            .collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

/// Expands `a/{b,c}/*.{x,y}` into every combination, left to right.
fn expand_braces(pattern: &str) -> Result<Vec<String>, GlobsError> {
    let Some(open) = pattern.find('{') else {
        return if pattern.contains('}') {
            Err(GlobsError::Braces(pattern.to_string()))
        } else {
            Ok(vec![pattern.to_string()])
        };
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();

    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }

    let close = close.ok_or_else(|| GlobsError::Braces(pattern.to_string()))?;
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];

    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for window in bounds.windows(2) {
        let alternative = &pattern[window[0] + 1..window[1]];
        let joined = format!("{prefix}{alternative}{suffix}");
        expanded.extend(expand_braces(&joined)?);
    }

    Ok(expanded)
}
