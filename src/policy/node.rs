use generational_arena::{Arena, Index};

/// The segment list an entry currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment {
  Window,
  Probation,
  Protected,
}

/// A policy-side record for one cache entry.
///
/// A node carries two independent pairs of links: `prev`/`next` thread
/// it onto exactly one segment list, while `prev_time`/`next_time`
/// thread it onto at most one timer-wheel bucket. Both orderings share
/// this single allocation; removing the node from one never disturbs
/// the other.
#[derive(Debug)]
pub(crate) struct Node<K> {
  pub(crate) key: K,
  pub(crate) hash: u64,
  pub(crate) segment: Segment,

  // Segment-list links.
  pub(crate) prev: Option<Index>,
  pub(crate) next: Option<Index>,

  // Timer-wheel links.
  pub(crate) prev_time: Option<Index>,
  pub(crate) next_time: Option<Index>,
  pub(crate) wheel_slot: Option<(usize, usize)>,
  pub(crate) expires_at: u64,
}

impl<K> Node<K> {
  pub(crate) fn new(key: K, hash: u64, expires_at: u64) -> Self {
    Self {
      key,
      hash,
      segment: Segment::Window,
      prev: None,
      next: None,
      prev_time: None,
      next_time: None,
      wheel_slot: None,
      expires_at,
    }
  }
}

/// A doubly-linked list over arena nodes. The head is the
/// most-recently-used end; the tail is the least-recently-used end.
/// The length is tracked separately so capacity checks never traverse.
#[derive(Debug, Default)]
pub(crate) struct NodeList {
  head: Option<Index>,
  tail: Option<Index>,
  len: usize,
}

impl NodeList {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub(crate) fn tail(&self) -> Option<Index> {
    self.tail
  }

  /// Links a detached node at the MRU end.
  pub(crate) fn push_front<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index) {
    let old_head = self.head;
    {
      let node = &mut nodes[index];
      node.prev = None;
      node.next = old_head;
    }
    if let Some(old_head) = old_head {
      nodes[old_head].prev = Some(index);
    } else {
      self.tail = Some(index);
    }
    self.head = Some(index);
    self.len += 1;
  }

  /// Detaches a node that is known to be in this list.
  pub(crate) fn unlink<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index) {
    let (prev, next) = {
      let node = &mut nodes[index];
      let links = (node.prev, node.next);
      node.prev = None;
      node.next = None;
      links
    };

    match prev {
      Some(prev) => nodes[prev].next = next,
      None => self.head = next,
    }
    match next {
      Some(next) => nodes[next].prev = prev,
      None => self.tail = prev,
    }
    self.len -= 1;
  }

  /// Moves a member node to the MRU end.
  pub(crate) fn move_to_front<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index) {
    if self.head == Some(index) {
      return;
    }
    self.unlink(nodes, index);
    self.push_front(nodes, index);
  }

  /// Detaches and returns the LRU node.
  pub(crate) fn pop_back<K>(&mut self, nodes: &mut Arena<Node<K>>) -> Option<Index> {
    let tail = self.tail?;
    self.unlink(nodes, tail);
    Some(tail)
  }

  pub(crate) fn clear(&mut self) {
    self.head = None;
    self.tail = None;
    self.len = 0;
  }

  // A helper for tests, to get the order of keys from MRU to LRU.
  #[cfg(test)]
  pub(crate) fn keys_as_vec<K: Clone>(&self, nodes: &Arena<Node<K>>) -> Vec<K> {
    let mut keys = Vec::new();
    let mut cursor = self.head;
    while let Some(index) = cursor {
      keys.push(nodes[index].key.clone());
      cursor = nodes[index].next;
    }
    keys
  }
}
