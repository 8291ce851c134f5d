mod error;

pub use error::Error;

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::message::BusMessage;

/// Metadata key holding a topic's broker-native routing identifier.
///
/// Populated once the topic is provisioned out-of-band; subscriptions are
/// created against this identifier, not the topic name.
pub const ROUTING_ID: &str = "routing_id";

/// A named routing channel in the topic taxonomy.
#[derive(Clone, Debug)]
pub struct Topic {
    name: String,
    parent: Option<String>,
    children: BTreeSet<String>,
    metadata: HashMap<String, String>,
}

impl Topic {
    /// The topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent topic name, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Names of the direct child topics.
    #[must_use]
    pub const fn children(&self) -> &BTreeSet<String> {
        &self.children
    }

    /// Looks up an externally-provisioned metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Declaration of a single topic, consumed by the hierarchy builder.
#[derive(Clone, Debug)]
pub struct TopicSpec {
    name: String,
    parent: Option<String>,
    metadata: HashMap<String, String>,
}

impl TopicSpec {
    /// Declares a topic with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            metadata: HashMap::new(),
        }
    }

    /// Places the topic beneath a parent topic.
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attaches the broker-native routing identifier.
    #[must_use]
    pub fn routing_id(self, value: impl Into<String>) -> Self {
        self.metadata(ROUTING_ID, value)
    }
}

/// Builder for [`TopicHierarchy`]. Validation happens at [`build`].
///
/// [`build`]: TopicHierarchyBuilder::build
#[derive(Debug, Default)]
pub struct TopicHierarchyBuilder {
    specs: Vec<TopicSpec>,
    bindings: Vec<(&'static str, String)>,
}

impl TopicHierarchyBuilder {
    /// Declares a topic.
    #[must_use]
    pub fn topic(mut self, spec: TopicSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Binds message type `M` to the named topic.
    #[must_use]
    pub fn bind<M>(mut self, topic: impl Into<String>) -> Self
    where
        M: BusMessage,
    {
        self.bindings.push((M::TYPE_TAG, topic.into()));
        self
    }

    /// Validates the declarations and produces the immutable hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate topics, unknown parents, parent
    /// cycles, bindings to unknown topics, or duplicate type bindings.
    pub fn build(self) -> Result<TopicHierarchy, Error> {
        let mut topics: HashMap<String, Topic> = HashMap::new();

        for spec in self.specs {
            if topics.contains_key(&spec.name) {
                return Err(Error::DuplicateTopic(spec.name));
            }
            topics.insert(
                spec.name.clone(),
                Topic {
                    name: spec.name,
                    parent: spec.parent,
                    children: BTreeSet::new(),
                    metadata: spec.metadata,
                },
            );
        }

        let edges: Vec<(String, String)> = topics
            .values()
            .filter_map(|t| t.parent.clone().map(|p| (p, t.name.clone())))
            .collect();
        for (parent, child) in edges {
            if !topics.contains_key(&parent) {
                return Err(Error::UnknownParent {
                    topic: child,
                    parent,
                });
            }
            if let Some(topic) = topics.get_mut(&parent) {
                topic.children.insert(child);
            }
        }

        for name in topics.keys() {
            let mut seen = HashSet::new();
            let mut cursor = name.clone();
            while let Some(parent) = topics[&cursor].parent.clone() {
                if !seen.insert(cursor.clone()) {
                    return Err(Error::ParentCycle(name.clone()));
                }
                cursor = parent;
            }
        }

        let mut bindings: HashMap<&'static str, String> = HashMap::new();
        for (tag, topic) in self.bindings {
            if !topics.contains_key(&topic) {
                return Err(Error::UnknownBindingTarget { tag, topic });
            }
            if bindings.insert(tag, topic).is_some() {
                return Err(Error::DuplicateBinding(tag));
            }
        }

        Ok(TopicHierarchy { topics, bindings })
    }
}

/// The static topic topology plus type-tag bindings.
///
/// Built once at process start and shared read-only; every instance in the
/// fleet must agree on it so topic names and queue derivation line up.
#[derive(Debug)]
pub struct TopicHierarchy {
    topics: HashMap<String, Topic>,
    bindings: HashMap<&'static str, String>,
}

impl TopicHierarchy {
    /// Starts declaring a hierarchy.
    #[must_use]
    pub fn builder() -> TopicHierarchyBuilder {
        TopicHierarchyBuilder::default()
    }

    /// Looks up a topic by name.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    /// Resolves the topic bound to a message type tag.
    ///
    /// `None` means the type is unbound; callers decide whether that is
    /// fatal (handler registration) or ignorable (best-effort publish).
    #[must_use]
    pub fn resolve(&self, type_tag: &str) -> Option<&Topic> {
        self.bindings
            .get(type_tag)
            .and_then(|name| self.topics.get(name))
    }

    /// Expands a topic into itself plus all transitive descendants.
    ///
    /// Computed post-order (children before the topic itself) and returned
    /// deduplicated. `None` if the topic is unknown.
    #[must_use]
    pub fn expand(&self, name: &str) -> Option<BTreeSet<String>> {
        let topic = self.topics.get(name)?;
        let mut ordered = Vec::new();
        self.collect_post_order(topic, &mut ordered);
        Some(ordered.into_iter().collect())
    }

    /// Looks up externally-provisioned metadata on a topic.
    #[must_use]
    pub fn metadata(&self, name: &str, key: &str) -> Option<&str> {
        self.topics.get(name).and_then(|t| t.metadata(key))
    }

    /// The broker-native routing identifier of a topic, if provisioned.
    #[must_use]
    pub fn routing_id(&self, name: &str) -> Option<&str> {
        self.metadata(name, ROUTING_ID)
    }

    fn collect_post_order(&self, topic: &Topic, out: &mut Vec<String>) {
        for child in &topic.children {
            if let Some(child) = self.topics.get(child) {
                self.collect_post_order(child, out);
            }
        }
        out.push(topic.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct OrderCreated;

    impl BusMessage for OrderCreated {
        const TYPE_TAG: &'static str = "order_created";
    }

    fn orders_hierarchy() -> TopicHierarchy {
        TopicHierarchy::builder()
            .topic(TopicSpec::new("orders").routing_id("native:orders"))
            .topic(TopicSpec::new("orders.created").parent("orders"))
            .topic(
                TopicSpec::new("orders.created.priority")
                    .parent("orders.created")
                    .routing_id("native:orders.created.priority"),
            )
            .topic(TopicSpec::new("payments"))
            .bind::<OrderCreated>("orders.created")
            .build()
            .unwrap()
    }

    #[test]
    fn expand_contains_descendants_exactly_once() {
        let hierarchy = orders_hierarchy();
        let closure = hierarchy.expand("orders").unwrap();
        assert_eq!(closure.len(), 3);
        assert!(closure.contains("orders"));
        assert!(closure.contains("orders.created"));
        assert!(closure.contains("orders.created.priority"));
    }

    #[test]
    fn expand_excludes_ancestors_and_siblings() {
        let hierarchy = orders_hierarchy();
        let closure = hierarchy.expand("orders.created").unwrap();
        assert_eq!(closure.len(), 2);
        assert!(!closure.contains("orders"));
        assert!(!closure.contains("payments"));
    }

    #[test]
    fn expand_of_leaf_is_singleton() {
        let hierarchy = orders_hierarchy();
        let closure = hierarchy.expand("payments").unwrap();
        assert_eq!(closure.len(), 1);
    }

    #[test]
    fn expand_of_unknown_topic_is_none() {
        assert!(orders_hierarchy().expand("refunds").is_none());
    }

    #[test]
    fn resolve_follows_type_binding() {
        let hierarchy = orders_hierarchy();
        assert_eq!(
            hierarchy.resolve(OrderCreated::TYPE_TAG).unwrap().name(),
            "orders.created"
        );
        assert!(hierarchy.resolve("unbound").is_none());
    }

    #[test]
    fn metadata_lookup() {
        let hierarchy = orders_hierarchy();
        assert_eq!(hierarchy.routing_id("orders"), Some("native:orders"));
        assert_eq!(hierarchy.routing_id("orders.created"), None);
    }

    #[test]
    fn build_rejects_unknown_parent() {
        let result = TopicHierarchy::builder()
            .topic(TopicSpec::new("a").parent("missing"))
            .build();
        assert!(matches!(result, Err(Error::UnknownParent { .. })));
    }

    #[test]
    fn build_rejects_duplicate_topic() {
        let result = TopicHierarchy::builder()
            .topic(TopicSpec::new("a"))
            .topic(TopicSpec::new("a"))
            .build();
        assert!(matches!(result, Err(Error::DuplicateTopic(_))));
    }

    #[test]
    fn build_rejects_parent_cycle() {
        let result = TopicHierarchy::builder()
            .topic(TopicSpec::new("a").parent("b"))
            .topic(TopicSpec::new("b").parent("a"))
            .build();
        assert!(matches!(result, Err(Error::ParentCycle(_))));
    }

    #[test]
    fn build_rejects_bad_bindings() {
        let result = TopicHierarchy::builder()
            .bind::<OrderCreated>("missing")
            .build();
        assert!(matches!(result, Err(Error::UnknownBindingTarget { .. })));

        let result = TopicHierarchy::builder()
            .topic(TopicSpec::new("orders.created"))
            .bind::<OrderCreated>("orders.created")
            .bind::<OrderCreated>("orders.created")
            .build();
        assert!(matches!(result, Err(Error::DuplicateBinding(_))));
    }
}
