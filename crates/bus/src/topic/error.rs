use thiserror::Error;

/// Errors raised while building a topic hierarchy.
#[derive(Debug, Error)]
pub enum Error {
    /// The same topic name was declared more than once.
    #[error("topic {0} declared more than once")]
    DuplicateTopic(String),

    /// A topic names a parent that was never declared.
    #[error("topic {topic} names unknown parent {parent}")]
    UnknownParent {
        /// The topic carrying the bad parent reference.
        topic: String,
        /// The undeclared parent name.
        parent: String,
    },

    /// A parent chain loops back on itself.
    #[error("parent chain of topic {0} contains a cycle")]
    ParentCycle(String),

    /// A message type was bound to a topic that was never declared.
    #[error("message type {tag} bound to unknown topic {topic}")]
    UnknownBindingTarget {
        /// The message type tag.
        tag: &'static str,
        /// The undeclared topic name.
        topic: String,
    },

    /// The same message type was bound more than once.
    #[error("message type {0} bound more than once")]
    DuplicateBinding(&'static str),
}
