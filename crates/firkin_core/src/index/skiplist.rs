//! An arena-backed skip list over byte-string keys.
//!
//! Nodes live in an arena and link to each other by slot index, so the
//! structure has no raw pointers and unlinked nodes cannot dangle. Each
//! node owns one forward link per level it participates in, up to a level
//! drawn by repeated fair coin flips capped at [`MAX_LEVEL`].

use rand::Rng;

/// Maximum number of levels a node can participate in.
pub const MAX_LEVEL: usize = 10;

struct Node<V> {
    key: Vec<u8>,
    value: V,
    /// Forward link per level, `None` meaning end of list at that level.
    forward: Vec<Option<usize>>,
}

/// A probabilistic ordered map from byte keys to values.
///
/// Duplicate keys cannot exist by construction: inserting an existing key
/// overwrites its value in place. A level-0 traversal visits keys in
/// strictly ascending byte-lexicographic order.
pub struct SkipList<V> {
    /// Forward links out of the virtual head node, one per level.
    head: [Option<usize>; MAX_LEVEL],
    /// Node storage; freed slots are recycled through `free`.
    arena: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    len: usize,
}

impl<V> Default for SkipList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SkipList<V> {
    /// Creates an empty skip list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: [None; MAX_LEVEL],
            arena: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the list holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up the value for `key`.
    #[must_use]
    pub fn find(&self, key: &[u8]) -> Option<&V> {
        let idx = self.find_slot(key)?;
        Some(&self.node(idx).value)
    }

    /// Looks up the value for `key`, mutably.
    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let idx = self.find_slot(key)?;
        Some(&mut self.arena[idx].as_mut().expect("occupied slot").value)
    }

    /// Inserts `value` under `key`.
    ///
    /// If the key already exists its value is overwritten in place and
    /// `false` is returned; otherwise a new node is spliced in and `true`
    /// is returned.
    pub fn insert(&mut self, key: Vec<u8>, value: V) -> bool {
        let update = self.predecessors(&key);

        if let Some(idx) = self.forward_of(update[0], 0) {
            if self.node(idx).key == key {
                self.arena[idx].as_mut().expect("occupied slot").value = value;
                return false;
            }
        }

        let level = random_level();
        let idx = self.alloc(Node {
            key,
            value,
            forward: vec![None; level],
        });

        for (i, &pred) in update.iter().enumerate().take(level) {
            let next = self.forward_of(pred, i);
            self.arena[idx].as_mut().expect("occupied slot").forward[i] = next;
            self.set_forward(pred, i, Some(idx));
        }

        self.len += 1;
        true
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let update = self.predecessors(key);

        let idx = self.forward_of(update[0], 0)?;
        if self.node(idx).key != key {
            return None;
        }

        for (i, &pred) in update.iter().enumerate() {
            if self.forward_of(pred, i) == Some(idx) {
                let next = self.node(idx).forward[i];
                self.set_forward(pred, i, next);
            }
        }

        self.len -= 1;
        let node = self.arena[idx].take().expect("occupied slot");
        self.free.push(idx);
        Some(node.value)
    }

    /// Iterates over entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            list: self,
            cursor: self.head[0],
        }
    }

    /// Descends from the top level, recording the last node visited at
    /// each level before dropping down.
    fn predecessors(&self, key: &[u8]) -> [Option<usize>; MAX_LEVEL] {
        let mut update = [None; MAX_LEVEL];
        let mut cur: Option<usize> = None;

        for level in (0..MAX_LEVEL).rev() {
            while let Some(next) = self.forward_of(cur, level) {
                if self.node(next).key.as_slice() < key {
                    cur = Some(next);
                } else {
                    break;
                }
            }
            update[level] = cur;
        }

        update
    }

    fn find_slot(&self, key: &[u8]) -> Option<usize> {
        let update = self.predecessors(key);
        let idx = self.forward_of(update[0], 0)?;
        (self.node(idx).key == key).then_some(idx)
    }

    fn node(&self, idx: usize) -> &Node<V> {
        self.arena[idx].as_ref().expect("occupied slot")
    }

    /// Forward link of `node` (or the head when `None`) at `level`.
    fn forward_of(&self, node: Option<usize>, level: usize) -> Option<usize> {
        match node {
            None => self.head[level],
            Some(idx) => self.node(idx).forward[level],
        }
    }

    fn set_forward(&mut self, node: Option<usize>, level: usize, target: Option<usize>) {
        match node {
            None => self.head[level] = target,
            Some(idx) => {
                self.arena[idx].as_mut().expect("occupied slot").forward[level] = target;
            }
        }
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(node);
            idx
        } else {
            self.arena.push(Some(node));
            self.arena.len() - 1
        }
    }
}

impl<V> std::fmt::Debug for SkipList<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipList").field("len", &self.len).finish()
    }
}

/// Iterator over skip-list entries in ascending key order.
pub struct Iter<'a, V> {
    list: &'a SkipList<V>,
    cursor: Option<usize>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.list.node(idx);
        self.cursor = node.forward[0];
        Some((node.key.as_slice(), &node.value))
    }
}

/// Draws a node level by fair coin flips, capped at [`MAX_LEVEL`].
fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 1;
    while level < MAX_LEVEL && rng.gen::<bool>() {
        level += 1;
    }
    level
}
