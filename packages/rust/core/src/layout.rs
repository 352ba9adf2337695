//! Work-directory layout: the artifacts handed between planner, executors,
//! and finisher.

use pyramerge_storage::uri;

/// Instruction shard for agent `split` (1-based): `todo.<N>.list`.
pub fn todo_list_path(directory: &str, split: usize) -> String {
    uri::join(directory, &format!("todo.{split}.list"))
}

/// Root registry handed to the finisher: `todo.finisher.list`.
pub fn finisher_list_path(directory: &str) -> String {
    uri::join(directory, "todo.finisher.list")
}

/// Checkpoint record of agent `split`: `slab.<N>.last`, raw text holding
/// one destination path.
pub fn checkpoint_path(directory: &str, split: usize) -> String {
    uri::join(directory, &format!("slab.{split}.last"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        assert_eq!(todo_list_path("file:///w", 3), "file:///w/todo.3.list");
        assert_eq!(finisher_list_path("file:///w"), "file:///w/todo.finisher.list");
        assert_eq!(checkpoint_path("file:///w", 3), "file:///w/slab.3.last");
    }
}
