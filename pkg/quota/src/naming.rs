use std::fmt;

use crate::error::QuotaError;

/// Longest project or namespace name the quota objects can carry: the
/// namespace is also the suffix of its `default-<namespace>` quota object.
pub const MAX_NAME_LEN: usize = 63;

/// First rule a project or namespace name breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameProblem {
    Empty,
    TooLong(usize),
    /// Names must begin and end with a lowercase letter or digit.
    BadEdge(char),
    BadChar { at: usize, found: char },
}

impl fmt::Display for NameProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameProblem::Empty => write!(f, "name is empty"),
            NameProblem::TooLong(len) => write!(f, "{} characters, at most {} allowed", len, MAX_NAME_LEN),
            NameProblem::BadEdge(c) => write!(f, "'{}' may not begin or end a name", c),
            NameProblem::BadChar { at, found } => {
                write!(f, "'{}' at position {} is not a lowercase letter, digit or '-'", found, at)
            }
        }
    }
}

fn label_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

/// Find the first problem with `name`, if any.
pub fn name_problem(name: &str) -> Option<NameProblem> {
    let (Some(first), Some(last)) = (name.chars().next(), name.chars().last()) else {
        return Some(NameProblem::Empty);
    };
    if name.len() > MAX_NAME_LEN {
        return Some(NameProblem::TooLong(name.len()));
    }
    if let Some((at, found)) = name.chars().enumerate().find(|&(_, c)| !(label_char(c) || c == '-')) {
        return Some(NameProblem::BadChar { at, found });
    }
    [first, last]
        .into_iter()
        .find(|c| !label_char(*c))
        .map(NameProblem::BadEdge)
}

pub(crate) fn check_name(kind: &'static str, name: &str) -> Result<(), QuotaError> {
    match name_problem(name) {
        None => Ok(()),
        Some(problem) => Err(QuotaError::InvalidName {
            kind,
            name: name.to_string(),
            problem,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotaErrorCode;

    #[test]
    fn accepts_project_and_namespace_names() {
        for name in ["p-abc12", "ns-1", "a", "0", "cattle-resources-system"] {
            assert_eq!(name_problem(name), None, "{}", name);
        }
        assert_eq!(name_problem(&"n".repeat(MAX_NAME_LEN)), None);
    }

    #[test]
    fn reports_first_problem() {
        assert_eq!(name_problem(""), Some(NameProblem::Empty));
        assert_eq!(name_problem(&"n".repeat(64)), Some(NameProblem::TooLong(64)));
        assert_eq!(name_problem("-ns"), Some(NameProblem::BadEdge('-')));
        assert_eq!(name_problem("ns-"), Some(NameProblem::BadEdge('-')));
        assert_eq!(name_problem("Ns"), Some(NameProblem::BadChar { at: 0, found: 'N' }));
        assert_eq!(name_problem("my_ns"), Some(NameProblem::BadChar { at: 2, found: '_' }));
    }

    #[test]
    fn error_names_the_object_kind() {
        let err = check_name("project", "Not_Valid").unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::InvalidName);
        assert_eq!(
            err.to_string(),
            "invalid project name 'Not_Valid': 'N' at position 0 is not a lowercase letter, digit or '-'"
        );
        assert!(check_name("namespace", "ns-1").is_ok());
    }
}
