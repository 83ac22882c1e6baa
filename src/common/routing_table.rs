//! Kademlia routing table as a binary tree of k-buckets.

use crate::common::{Contact, Id, ID_BITS};

/// K = the default maximum size of a k-bucket.
pub const DEFAULT_BUCKET_SIZE_K: usize = 20;
/// Default number of least recently seen contacts to ping when a bucket overflows.
pub const DEFAULT_PING_COUNT: usize = 3;

/// Decides which of two versions of the same contact survives in the table.
///
/// Called with `(incumbent, candidate)`.
pub type Arbiter = fn(&Contact, &Contact) -> Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of an [Arbiter].
pub enum Selection {
    Incumbent,
    Candidate,
}

/// Default [Arbiter]: the contact with the higher [Contact::clock] wins,
/// the candidate wins ties.
pub fn clock_arbiter(incumbent: &Contact, candidate: &Contact) -> Selection {
    if incumbent.clock > candidate.clock {
        Selection::Incumbent
    } else {
        Selection::Candidate
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Outcome of [RoutingTable::add].
pub enum AddOutcome {
    /// The contact was new and is now stored.
    Added,
    /// The contact was known and the candidate replaced the `previous` version,
    /// moving it to the most recently seen end of its bucket.
    Updated { previous: Contact },
    /// Nothing changed, either the incumbent won arbitration, or the contact was the local node.
    Unchanged,
    /// The bucket is full and can't split. `oldest` are the least recently
    /// seen contacts (oldest first) that need a liveness check before the
    /// `candidate` may be admitted. The candidate was NOT inserted.
    Ping {
        oldest: Vec<Contact>,
        candidate: Contact,
    },
}

#[derive(Debug, Clone, Copy)]
struct Children {
    low: usize,
    high: usize,
}

#[derive(Debug, Clone)]
struct TreeNode {
    contacts: Vec<Contact>,
    /// Whether this node's prefix matches the local id.
    covers_local: bool,
    dont_split: bool,
    children: Option<Children>,
}

impl TreeNode {
    fn leaf(contacts: Vec<Contact>, covers_local: bool, dont_split: bool) -> Self {
        Self {
            contacts,
            covers_local,
            dont_split,
            children: None,
        }
    }
}

#[derive(Debug, Clone)]
/// Kademlia routing table keeping contacts sorted by XOR distance to a local [Id].
///
/// Nodes live in an arena, the root is at index `0`, and a node at depth `d`
/// splits on bit `d` of the ids it stores.
pub struct RoutingTable {
    id: Id,
    nodes: Vec<TreeNode>,
    bucket_size: usize,
    ping_count: usize,
    relaxed_split_depth: usize,
    arbiter: Arbiter,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            nodes: vec![TreeNode::leaf(vec![], true, false)],
            bucket_size: DEFAULT_BUCKET_SIZE_K,
            ping_count: DEFAULT_PING_COUNT,
            relaxed_split_depth: 0,
            arbiter: clock_arbiter,
        }
    }

    /// Set the maximum size of each bucket.
    ///
    /// Defaults to [DEFAULT_BUCKET_SIZE_K]
    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size.max(1);
        self
    }

    /// Set how many of the oldest contacts are returned in [AddOutcome::Ping].
    ///
    /// Defaults to [DEFAULT_PING_COUNT]
    pub fn with_ping_count(mut self, ping_count: usize) -> Self {
        self.ping_count = ping_count.max(1);
        self
    }

    /// Set the [Arbiter] used when adding an already known contact.
    ///
    /// Defaults to [clock_arbiter]
    pub fn with_arbiter(mut self, arbiter: Arbiter) -> Self {
        self.arbiter = arbiter;
        self
    }

    /// Buckets shallower than `depth` are allowed to split even if they
    /// don't cover the local id.
    ///
    /// Defaults to `0`
    pub fn with_relaxed_split_depth(mut self, depth: usize) -> Self {
        self.relaxed_split_depth = depth;
        self
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    // === Public Methods ===

    /// Add a contact, or update it if a contact with the same id is already known.
    pub fn add(&mut self, contact: Contact) -> AddOutcome {
        if contact.id() == &self.id {
            // Do not add self to the routing_table
            return AddOutcome::Unchanged;
        }

        let (index, depth) = self.leaf_for(contact.id());
        let bucket_size = self.bucket_size;
        let ping_count = self.ping_count;
        let arbiter = self.arbiter;

        let node = &mut self.nodes[index];

        if let Some(position) = node.contacts.iter().position(|c| c.id() == contact.id()) {
            return match arbiter(&node.contacts[position], &contact) {
                Selection::Incumbent => AddOutcome::Unchanged,
                Selection::Candidate => {
                    let previous = node.contacts.remove(position);
                    node.contacts.push(contact);

                    AddOutcome::Updated { previous }
                }
            };
        }

        if node.contacts.len() < bucket_size {
            node.contacts.push(contact);
            return AddOutcome::Added;
        }

        if node.dont_split || depth >= ID_BITS {
            return AddOutcome::Ping {
                oldest: node.contacts.iter().take(ping_count).cloned().collect(),
                candidate: contact,
            };
        }

        self.split(index, depth);
        self.add(contact)
    }

    /// Remove a contact from this routing table, returning it if it was present.
    pub fn remove(&mut self, id: &Id) -> Option<Contact> {
        let (index, _) = self.leaf_for(id);
        let contacts = &mut self.nodes[index].contacts;

        let position = contacts.iter().position(|c| c.id() == id)?;

        Some(contacts.remove(position))
    }

    /// Returns a copy of the contact with exactly this id.
    pub fn get(&self, id: &Id) -> Option<Contact> {
        let (index, _) = self.leaf_for(id);

        self.nodes[index]
            .contacts
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Returns `true` if a contact with this id is stored.
    pub fn contains(&self, id: &Id) -> bool {
        let (index, _) = self.leaf_for(id);

        self.nodes[index].contacts.iter().any(|c| c.id() == id)
    }

    /// Return up to `n` contacts sorted by ascending XOR distance to `target`.
    pub fn closest(&self, target: &Id, n: usize) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = Vec::new();
        // Closer subtree is pushed last so it is visited first.
        let mut stack = vec![(0_usize, 0_usize)];

        while let Some((index, depth)) = stack.pop() {
            if contacts.len() >= n {
                break;
            }

            let node = &self.nodes[index];

            match node.children {
                None => contacts.extend(node.contacts.iter().cloned()),
                Some(children) => {
                    let (near, far) = if target.bit(depth) {
                        (children.high, children.low)
                    } else {
                        (children.low, children.high)
                    };

                    stack.push((far, depth + 1));
                    stack.push((near, depth + 1));
                }
            }
        }

        contacts.sort_by_key(|c| c.id().xor(target));
        contacts.truncate(n);

        contacts
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|node| node.contacts.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn count(&self) -> usize {
        self.nodes.iter().map(|node| node.contacts.len()).sum()
    }

    /// Export an owned vector of all contacts in this routing table.
    pub fn to_vec(&self) -> Vec<Contact> {
        let mut contacts = Vec::with_capacity(self.count());
        let mut stack = vec![0_usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];

            match node.children {
                None => contacts.extend(node.contacts.iter().cloned()),
                Some(children) => {
                    stack.push(children.high);
                    stack.push(children.low);
                }
            }
        }

        contacts
    }

    // === Private Methods ===

    /// Returns the index and depth of the leaf responsible for `id`.
    fn leaf_for(&self, id: &Id) -> (usize, usize) {
        let mut index = 0;
        let mut depth = 0;

        while let Some(children) = self.nodes[index].children {
            index = if id.bit(depth) {
                children.high
            } else {
                children.low
            };
            depth += 1;
        }

        (index, depth)
    }

    fn split(&mut self, index: usize, depth: usize) {
        let contacts = std::mem::take(&mut self.nodes[index].contacts);
        let covers_local = self.nodes[index].covers_local;

        let (high, low): (Vec<Contact>, Vec<Contact>) =
            contacts.into_iter().partition(|c| c.id().bit(depth));

        let local_bit = self.id.bit(depth);
        let relaxed = depth + 1 < self.relaxed_split_depth;

        let low_covers_local = covers_local && !local_bit;
        let high_covers_local = covers_local && local_bit;

        let low_index = self.nodes.len();
        self.nodes.push(TreeNode::leaf(
            low,
            low_covers_local,
            !low_covers_local && !relaxed,
        ));
        let high_index = self.nodes.len();
        self.nodes.push(TreeNode::leaf(
            high,
            high_covers_local,
            !high_covers_local && !relaxed,
        ));

        self.nodes[index].children = Some(Children {
            low: low_index,
            high: high_index,
        });
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use crate::common::{Endpoint, NodeId, ID_SIZE};

    use super::*;

    fn random_contact() -> Contact {
        Contact::new(NodeId::random(), Endpoint::default())
    }

    /// Contact whose first bit differs from `local`.
    fn far_contact(local: &Id) -> Contact {
        loop {
            let contact = random_contact();
            if contact.id().bit(0) != local.bit(0) {
                return contact;
            }
        }
    }

    fn contact_with_prefix(bits: &[bool]) -> Contact {
        loop {
            let contact = random_contact();
            if bits
                .iter()
                .enumerate()
                .all(|(i, bit)| contact.id().bit(i) == *bit)
            {
                return contact;
            }
        }
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.add(random_contact());
        assert!(!table.is_empty());
    }

    #[test]
    fn to_vec() {
        let mut table = RoutingTable::new(Id::random());

        let mut expected: Vec<Contact> = vec![];

        for _ in 0..(DEFAULT_BUCKET_SIZE_K * 3) {
            expected.push(random_contact());
        }

        for contact in &expected {
            table.add(contact.clone());
        }

        let stored: HashSet<Id> = table.to_vec().iter().map(|c| *c.id()).collect();

        assert_eq!(stored.len(), table.count());
        for contact in table.to_vec() {
            assert!(expected.contains(&contact));
        }
    }

    #[test]
    fn contains() {
        let mut table = RoutingTable::new(Id::random());

        let contact = random_contact();

        assert!(!table.contains(contact.id()));

        table.add(contact.clone());
        assert!(table.contains(contact.id()));
    }

    #[test]
    fn remove() {
        let mut table = RoutingTable::new(Id::random());

        let contact = random_contact();

        table.add(contact.clone());
        table.add(random_contact());
        assert_eq!(table.to_vec().len(), 2);

        assert_eq!(table.remove(contact.id()), Some(contact.clone()));
        assert!(table.get(contact.id()).is_none());
        assert_eq!(table.to_vec().len(), 1);

        assert_eq!(table.remove(contact.id()), None);
        assert_eq!(table.to_vec().len(), 1);
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(Id::random());

        let contact1 = random_contact();
        let contact2 = Contact::new(
            *contact1.node_id(),
            Endpoint::new([1, 2, 3, 4].into(), Some(1), None),
        );

        assert_eq!(table.add(contact1), AddOutcome::Added);
        assert!(matches!(table.add(contact2), AddOutcome::Updated { .. }));

        assert_eq!(table.count(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let node_id = NodeId::random();
        let mut table = RoutingTable::new(node_id.id());

        let outcome = table.add(Contact::new(node_id, Endpoint::default()));

        assert_eq!(outcome, AddOutcome::Unchanged);
        assert!(table.is_empty())
    }

    #[test]
    fn clock_arbiter_keeps_higher_clock() {
        let mut table = RoutingTable::new(Id::random());
        let contact = random_contact();

        table.add(contact.clone().with_clock(5));

        assert_eq!(
            table.add(contact.clone().with_clock(3)),
            AddOutcome::Unchanged
        );
        assert_eq!(table.get(contact.id()).map(|c| c.clock), Some(5));

        // Ties keep the candidate
        let mut candidate = contact.clone().with_clock(5);
        candidate.endpoint = Endpoint::new([9, 9, 9, 9].into(), Some(9), None);
        assert!(matches!(
            table.add(candidate.clone()),
            AddOutcome::Updated { .. }
        ));
        assert_eq!(
            table.get(contact.id()).map(|c| c.endpoint),
            Some(candidate.endpoint)
        );

        table.add(contact.clone().with_clock(7));
        assert_eq!(table.get(contact.id()).map(|c| c.clock), Some(7));
    }

    #[test]
    fn update_moves_to_tail() {
        let mut table = RoutingTable::new(Id::random());

        let a = random_contact();
        let b = random_contact();

        table.add(a.clone());
        table.add(b.clone());
        table.add(a.clone().with_clock(1));

        assert_eq!(table.to_vec(), vec![b, a]);
    }

    #[test]
    fn custom_arbiter() {
        fn keep_incumbent(_: &Contact, _: &Contact) -> Selection {
            Selection::Incumbent
        }

        let mut table = RoutingTable::new(Id::random()).with_arbiter(keep_incumbent);
        let contact = random_contact();

        table.add(contact.clone());
        assert_eq!(
            table.add(contact.with_clock(100)),
            AddOutcome::Unchanged
        );
    }

    #[test]
    fn full_far_bucket_asks_for_ping() {
        let local = Id([0; ID_SIZE]);
        let mut table = RoutingTable::new(local);

        let contacts: Vec<Contact> = (0..DEFAULT_BUCKET_SIZE_K)
            .map(|_| far_contact(&local))
            .collect();

        for contact in &contacts {
            assert_eq!(table.add(contact.clone()), AddOutcome::Added);
        }

        let candidate = far_contact(&local);

        match table.add(candidate.clone()) {
            AddOutcome::Ping {
                oldest,
                candidate: returned,
            } => {
                assert_eq!(oldest, contacts[..DEFAULT_PING_COUNT].to_vec());
                assert_eq!(returned, candidate);
            }
            outcome => panic!("expected ping, got {outcome:?}"),
        }

        assert!(!table.contains(candidate.id()));
        assert_eq!(table.count(), DEFAULT_BUCKET_SIZE_K);
    }

    #[test]
    fn local_bucket_splits() {
        let mut table = RoutingTable::new(Id::random());

        for _ in 0..200 {
            let outcome = table.add(random_contact());
            assert!(matches!(
                outcome,
                AddOutcome::Added | AddOutcome::Ping { .. }
            ));
        }

        // Half the ids land in the far bucket, which fills up at K,
        // the rest keep splitting towards the local id.
        assert!(table.count() > DEFAULT_BUCKET_SIZE_K);
    }

    #[test]
    fn relaxed_split_depth() {
        let local = Id([0; ID_SIZE]);

        let contacts = [
            contact_with_prefix(&[true, false]),
            contact_with_prefix(&[true, false]),
            contact_with_prefix(&[true, true]),
            contact_with_prefix(&[true, true]),
        ];

        let mut strict = RoutingTable::new(local).with_bucket_size(2);
        let mut relaxed = RoutingTable::new(local)
            .with_bucket_size(2)
            .with_relaxed_split_depth(4);

        for contact in &contacts {
            strict.add(contact.clone());
            relaxed.add(contact.clone());
        }

        assert_eq!(strict.count(), 2);
        // The far half may keep splitting until depth 4.
        assert_eq!(relaxed.count(), 4);
    }

    #[test]
    fn closest() {
        let mut table = RoutingTable::new(Id::random());

        for _ in 0..100 {
            table.add(random_contact());
        }

        let target = Id::random();
        let closest = table.closest(&target, 10);

        assert_eq!(closest.len(), 10.min(table.count()));

        for pair in closest.windows(2) {
            assert!(pair[0].id().xor(&target) <= pair[1].id().xor(&target));
        }

        // Nothing left out is closer than the farthest returned contact.
        let farthest = closest[closest.len() - 1].id().xor(&target);
        for contact in table.to_vec() {
            if !closest.contains(&contact) {
                assert!(contact.id().xor(&target) >= farthest);
            }
        }
    }

    #[test]
    fn closest_more_than_count() {
        let mut table = RoutingTable::new(Id::random());

        for _ in 0..5 {
            table.add(random_contact());
        }

        assert_eq!(table.closest(&Id::random(), 20).len(), 5);
        assert!(RoutingTable::new(Id::random())
            .closest(&Id::random(), 20)
            .is_empty());
    }
}
