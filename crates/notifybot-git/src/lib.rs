// # notifybot-git
//
// git CLI implementations of the repository and history store traits.
//
// ## Purpose
//
// - `GitRepository`: a bare mirror of the watched repository, refreshed
//   with `git fetch` on every poll
// - `GitRefStore`: the update history on a branch of a remote repository,
//   written with compare-and-swap pushes
//
// Every command runs with system and user configuration disabled and
// terminal prompts off, so behaviour does not depend on the host.
//
// ## Registration
//
// ```rust,ignore
// let registry = NotifierRegistry::with_builtin_stores();
// notifybot_git::register(&registry);
// ```

mod command;
mod repository;
mod store;

pub use command::{Git, GitError, git_available};
pub use repository::GitRepository;
pub use store::{GitRefStore, GitRefStoreFactory};

use notifybot_core::NotifierRegistry;

/// Register the `git` history store
pub fn register(registry: &NotifierRegistry) {
    registry.register_store("git", Box::new(GitRefStoreFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_git_store() {
        let registry = NotifierRegistry::with_builtin_stores();
        assert!(!registry.has_store("git"));
        register(&registry);
        assert!(registry.has_store("git"));
    }
}
