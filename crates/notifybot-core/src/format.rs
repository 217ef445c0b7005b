//! Human readable text for change events.
//!
//! Shared by notifiers that write mail-like messages so subjects look the
//! same everywhere.

use crate::events::Event;
use crate::types::{Branch, Commit, Hash, Tag};

/// `<abbreviated hash>: <title>`
pub fn commit_line(commit: &Commit) -> String {
    format!("{}: {}", commit.hash.abbreviate(), commit.title())
}

/// Subject for new commits: the title of a single commit, a count otherwise
pub fn commits_subject(repository: &str, branch: &Branch, commits: &[Commit]) -> String {
    match commits {
        [single] => format!("{repository}: {branch}: {}", single.title()),
        _ => format!("{repository}: {branch}: {} new changesets", commits.len()),
    }
}

pub fn tag_subject(repository: &str, tag: &Tag, hash: &Hash) -> String {
    format!(
        "{repository}: Added tag {tag} for changeset {}",
        hash.abbreviate()
    )
}

pub fn new_branch_subject(
    repository: &str,
    commits: &[Commit],
    parent: &Branch,
    branch: &Branch,
) -> String {
    format!(
        "{repository}: created branch {branch} based on the branch {parent} containing {} unique commit{}",
        commits.len(),
        if commits.len() == 1 { "" } else { "s" }
    )
}

pub fn new_branch_body(commits: &[Commit], parent: &Branch, branch: &Branch) -> String {
    if commits.is_empty() {
        return format!("The new branch {branch} is currently identical to the {parent} branch.\n");
    }
    let mut body = format!("The following commits are unique to the {branch} branch:\n");
    for commit in commits {
        body.push_str(&commit_line(commit));
        body.push('\n');
    }
    body
}

/// Subject line for any event
pub fn event_subject(repository: &str, event: &Event) -> String {
    match event {
        Event::NewCommits { branch, commits } => commits_subject(repository, branch, commits),
        Event::NewTagCommit { commit, tag, .. } => tag_subject(repository, tag, &commit.hash),
        Event::NewOpenJdkTagCommits { commits, tag, .. } => {
            let tagged = commits
                .last()
                .map(|c| c.hash.clone())
                .unwrap_or_else(Hash::empty_tree);
            tag_subject(repository, tag.tag(), &tagged)
        }
        Event::NewBranch {
            parent,
            branch,
            commits,
        } => new_branch_subject(repository, commits, parent, branch),
    }
}

/// Body text for any event
pub fn event_body(event: &Event) -> String {
    match event {
        Event::NewBranch {
            parent,
            branch,
            commits,
        } => new_branch_body(commits, parent, branch),
        Event::NewTagCommit { annotation, .. } | Event::NewOpenJdkTagCommits { annotation, .. } => {
            let mut body = String::new();
            if let Some(annotation) = annotation {
                body.push_str(annotation.message.trim_end());
                body.push_str("\n\n");
            }
            for commit in event.commits() {
                body.push_str(&commit_line(commit));
                body.push('\n');
            }
            body
        }
        Event::NewCommits { commits, .. } => commits
            .iter()
            .map(|c| format!("{}\n", commit_line(c)))
            .collect(),
    }
}
