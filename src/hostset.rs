//! Ordered, deduplicated host collections.

use std::sync::Arc;

use crate::host::Host;

/// An ordered sequence of hosts, uniquely keyed by name.
#[derive(Debug, Clone, Default)]
pub struct HostSet {
    hosts: Vec<Arc<Host>>,
}

impl HostSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hosts in the set.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Appends a host; call [`uniq`](Self::uniq) afterwards to restore the
    /// uniqueness invariant when the host may already be present.
    pub fn push(&mut self, host: Arc<Host>) {
        self.hosts.push(host);
    }

    /// Iterates over the hosts in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Host>> {
        self.hosts.iter()
    }

    /// Stable sort by an attribute priority list.
    ///
    /// An empty list sorts by host name. Hosts missing an attribute sort
    /// last within that tier; ties fall through to the next attribute, then
    /// to the name.
    pub fn sort(&mut self, attributes: &[String]) {
        self.hosts
            .sort_by(|a, b| a.compare(b.as_ref(), attributes));
    }

    /// Removes duplicate names, preserving the first occurrence.
    pub fn uniq(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.hosts.retain(|h| seen.insert(h.name.clone()));
    }

    /// Keeps only hosts for which the predicate holds.
    pub fn retain(&mut self, mut keep: impl FnMut(&Arc<Host>) -> bool) {
        self.hosts.retain(|h| keep(h));
    }

    /// Appends all hosts from an iterator.
    pub fn extend(&mut self, hosts: impl IntoIterator<Item = Arc<Host>>) {
        self.hosts.extend(hosts);
    }

    /// Deterministically selects `count` hosts.
    ///
    /// The sort key is a checksum of the seed concatenated with the host
    /// name, so the same seed always yields the same subset regardless of
    /// discovery order.
    pub fn sample(&self, count: usize, seed: &str) -> HostSet {
        let mut keyed: Vec<(u32, &Arc<Host>)> = self
            .hosts
            .iter()
            .map(|h| {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(seed.as_bytes());
                hasher.update(h.name.as_bytes());
                (hasher.finalize(), h)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        HostSet {
            hosts: keyed.into_iter().take(count).map(|(_, h)| h.clone()).collect(),
        }
    }
}

impl FromIterator<Arc<Host>> for HostSet {
    fn from_iter<T: IntoIterator<Item = Arc<Host>>>(iter: T) -> Self {
        Self {
            hosts: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HostSet {
    type Item = &'a Arc<Host>;
    type IntoIter = std::slice::Iter<'a, Arc<Host>>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Attributes;
    use crate::value::Value;

    fn host(name: &str, pairs: &[(&str, &str)]) -> Arc<Host> {
        let attributes: Attributes = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Arc::new(Host::new(name, "", attributes))
    }

    fn names(set: &HostSet) -> Vec<&str> {
        set.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_sort_by_attribute_grid() {
        // site × role grid sorts the same way regardless of insert order.
        let mut set: HostSet = vec![
            host("host-a.example.com", &[("site", "site1"), ("role", "db")]),
            host("host-b.example.com", &[("site", "site2"), ("role", "db")]),
            host("host-c.example.com", &[("site", "site1"), ("role", "app")]),
            host("host-d.example.com", &[("site", "site2"), ("role", "app")]),
        ]
        .into_iter()
        .collect();

        set.sort(&["site".into(), "name".into()]);
        assert_eq!(
            names(&set),
            vec![
                "host-a.example.com",
                "host-c.example.com",
                "host-b.example.com",
                "host-d.example.com"
            ]
        );

        set.sort(&["site".into(), "role".into()]);
        assert_eq!(
            names(&set),
            vec![
                "host-c.example.com",
                "host-a.example.com",
                "host-d.example.com",
                "host-b.example.com"
            ]
        );
    }

    #[test]
    fn test_sort_with_no_attributes_uses_name() {
        let mut set: HostSet = vec![host("b", &[]), host("a", &[]), host("c", &[])]
            .into_iter()
            .collect();
        set.sort(&[]);
        assert_eq!(names(&set), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_uniq_preserves_first_occurrence() {
        let mut set: HostSet = vec![
            host("a", &[("n", "1")]),
            host("b", &[]),
            host("a", &[("n", "2")]),
        ]
        .into_iter()
        .collect();
        set.uniq();
        assert_eq!(names(&set), vec!["a", "b"]);
        assert_eq!(
            set.iter().next().unwrap().attributes.get("n"),
            Some(&Value::String("1".into()))
        );
    }

    #[test]
    fn test_sample_is_deterministic_and_order_independent() {
        let forward: HostSet = (0..20).map(|i| host(&format!("host-{}", i), &[])).collect();
        let backward: HostSet = (0..20)
            .rev()
            .map(|i| host(&format!("host-{}", i), &[]))
            .collect();

        let s1 = forward.sample(5, "seed");
        let s2 = backward.sample(5, "seed");
        assert_eq!(s1.len(), 5);
        assert_eq!(names(&s1), names(&s2));

        let other = forward.sample(5, "other-seed");
        assert_ne!(names(&s1), names(&other));
    }

    #[test]
    fn test_sample_larger_than_set_returns_all() {
        let set: HostSet = (0..3).map(|i| host(&format!("h{}", i), &[])).collect();
        assert_eq!(set.sample(10, "x").len(), 3);
    }
}
