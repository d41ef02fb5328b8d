// src/repo.rs
use std::sync::OnceLock;

use regex::Regex;

use crate::error::RepoError;

const SHORT_FORM: &str = r"^([a-zA-Z0-9_-]+)/([a-zA-Z0-9_.-]+)$";
const FULL_URL: &str = r"^https://github\.com/([a-zA-Z0-9_-]+)/([a-zA-Z0-9_.-]+)/?$";

fn patterns() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| (Regex::new(SHORT_FORM).expect("valid regex"), Regex::new(FULL_URL).expect("valid regex")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Accepts `owner/repo` or `https://github.com/owner/repo[/]`.
pub fn parse_repo(input: &str) -> Result<RepoId, RepoError> {
    if input.trim().is_empty() {
        return Err(RepoError::Empty);
    }
    let (short, full) = patterns();
    let caps = short
        .captures(input)
        .or_else(|| full.captures(input))
        .ok_or(RepoError::InvalidFormat)?;
    Ok(RepoId {
        owner: caps[1].to_string(),
        name: caps[2].to_string(),
    })
}
