use faultline_core::{FaultlineError, FaultlineResult};

/// Turn the repository shorthands operators type into a cloneable URL.
///
/// `owner/repo` and `github.com/owner/repo` expand to GitHub https URLs,
/// GitHub URLs gain a `.git` suffix, SSH URLs and anything else (other
/// hosts, local paths) pass through untouched.
pub fn normalize_repo_url(input: &str) -> FaultlineResult<String> {
    let url = input.trim();
    if url.is_empty() {
        return Err(FaultlineError::Validation("repoUrl is required".into()));
    }

    if url.starts_with("git@") {
        return Ok(url.to_string());
    }

    if url.contains("://") {
        if url.contains("github.com") {
            return Ok(with_git_suffix(url));
        }
        return Ok(url.to_string());
    }

    if url.starts_with("github.com/") {
        return Ok(with_git_suffix(&format!("https://{url}")));
    }

    if is_owner_repo(url) {
        let repo = url.trim_end_matches(".git");
        return Ok(format!("https://github.com/{repo}.git"));
    }

    Ok(url.to_string())
}

/// Last path segment without `.git`.
pub fn repo_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .map(|s| s.trim_end_matches(".git"))
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown-repo")
        .to_string()
}

fn with_git_suffix(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with(".git") {
        url.to_string()
    } else {
        format!("{url}.git")
    }
}

fn is_owner_repo(s: &str) -> bool {
    let mut parts = s.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !owner.is_empty()
        && !repo.is_empty()
        && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && repo
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}
