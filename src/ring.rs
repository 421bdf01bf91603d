//! The ready ring: a circular doubly-linked list kept in an arena.
//!
//! Members live in slots of a `Vec` and point at each other by slot index,
//! so insertion and removal are O(1) relinks and no member is ever reached
//! through a dangling pointer. A removed member's slot is recycled for a
//! later insertion.

/// Position of a member in the ring's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot(usize);

struct Node<T> {
    value: T,
    prev: usize,
    next: usize,
}

pub struct Ring<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    /// Oldest member; walking `next` from here visits creation order.
    head: Option<usize>,
    len: usize,
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Ring<T> {
    pub fn new() -> Self {
        Ring {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<Slot> {
        self.head.map(Slot)
    }

    /// Newest member, just before the head.
    pub fn tail(&self) -> Option<Slot> {
        self.head.map(|h| Slot(self.node(h).prev))
    }

    /// Link `value` in at the tail.
    pub fn push_back(&mut self, value: T) -> Slot {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        };

        let (prev, next) = match self.head {
            None => (idx, idx),
            Some(head) => {
                let tail = self.node(head).prev;
                self.node_mut(tail).next = idx;
                self.node_mut(head).prev = idx;
                (tail, head)
            }
        };
        self.nodes[idx] = Some(Node { value, prev, next });
        if self.head.is_none() {
            self.head = Some(idx);
        }
        self.len += 1;
        Slot(idx)
    }

    /// Unlink the member at `slot`, joining its neighbours.
    ///
    /// Panics if `slot` is not a member.
    pub fn remove(&mut self, slot: Slot) -> T {
        let node = self.nodes[slot.0]
            .take()
            .unwrap_or_else(|| panic!("removing vacant ring slot {}", slot.0));
        self.len -= 1;

        if self.len == 0 {
            self.head = None;
        } else {
            self.node_mut(node.prev).next = node.next;
            self.node_mut(node.next).prev = node.prev;
            if self.head == Some(slot.0) {
                self.head = Some(node.next);
            }
        }
        self.free.push(slot.0);
        node.value
    }

    #[cfg(test)]
    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.nodes.get(slot.0)?.as_ref().map(|n| &n.value)
    }

    pub fn next(&self, slot: Slot) -> Slot {
        Slot(self.node(slot.0).next)
    }

    #[cfg(test)]
    pub fn prev(&self, slot: Slot) -> Slot {
        Slot(self.node(slot.0).prev)
    }

    /// One full lap starting after `from` and ending on `from` itself.
    pub fn lap_after(&self, from: Slot) -> LapAfter<'_, T> {
        LapAfter {
            ring: self,
            at: from,
            remaining: self.len,
        }
    }

    /// Members in ring order starting from the head.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> {
        let lap = match self.tail() {
            Some(tail) => self.lap_after(tail),
            None => LapAfter {
                ring: self,
                at: Slot(0),
                remaining: 0,
            },
        };
        lap.map(move |slot| (slot, &self.node(slot.0).value))
    }

    /// Slot of the first member, in ring order, matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Slot> {
        self.iter().find(|(_, v)| pred(v)).map(|(slot, _)| slot)
    }

    fn node(&self, idx: usize) -> &Node<T> {
        self.nodes[idx]
            .as_ref()
            .unwrap_or_else(|| panic!("ring link to vacant slot {}", idx))
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        self.nodes[idx]
            .as_mut()
            .unwrap_or_else(|| panic!("ring link to vacant slot {}", idx))
    }
}

impl<T> std::ops::Index<Slot> for Ring<T> {
    type Output = T;

    fn index(&self, slot: Slot) -> &T {
        &self.node(slot.0).value
    }
}

impl<T> std::ops::IndexMut<Slot> for Ring<T> {
    fn index_mut(&mut self, slot: Slot) -> &mut T {
        &mut self.node_mut(slot.0).value
    }
}

pub struct LapAfter<'a, T> {
    ring: &'a Ring<T>,
    at: Slot,
    remaining: usize,
}

impl<T> Iterator for LapAfter<'_, T> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.at = self.ring.next(self.at);
        Some(self.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(ring: &Ring<u32>) -> Vec<u32> {
        ring.iter().map(|(_, v)| *v).collect()
    }

    #[test]
    fn push_keeps_creation_order() {
        let mut ring = Ring::new();
        for v in 0..4 {
            ring.push_back(v);
        }
        assert_eq!(ring.len(), 4);
        assert_eq!(values(&ring), vec![0, 1, 2, 3]);
    }

    #[test]
    fn cycle_is_closed_both_ways() {
        let mut ring = Ring::new();
        let slots: Vec<Slot> = (0..3).map(|v| ring.push_back(v)).collect();
        for &slot in &slots {
            assert_eq!(ring.prev(ring.next(slot)), slot);
            assert_eq!(ring.next(ring.next(ring.next(slot))), slot);
        }
        assert_eq!(ring.tail(), Some(slots[2]));
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut ring = Ring::new();
        let a = ring.push_back(0);
        let b = ring.push_back(1);
        let c = ring.push_back(2);

        assert_eq!(ring.remove(b), 1);
        assert_eq!(ring.next(a), c);
        assert_eq!(ring.prev(c), a);
        assert_eq!(values(&ring), vec![0, 2]);
        assert!(ring.get(b).is_none());
    }

    #[test]
    fn removing_head_advances_it() {
        let mut ring = Ring::new();
        let a = ring.push_back(0);
        let b = ring.push_back(1);
        ring.remove(a);
        assert_eq!(ring.head(), Some(b));
        assert_eq!(ring.next(b), b);
        ring.remove(b);
        assert!(ring.is_empty());
        assert_eq!(ring.head(), None);
        assert_eq!(ring.iter().count(), 0);
    }

    #[test]
    fn lap_after_ends_on_start() {
        let mut ring = Ring::new();
        let slots: Vec<Slot> = (0..4).map(|v| ring.push_back(v)).collect();
        let lap: Vec<Slot> = ring.lap_after(slots[1]).collect();
        assert_eq!(lap, vec![slots[2], slots[3], slots[0], slots[1]]);
    }

    #[test]
    fn slots_are_recycled_at_the_tail() {
        let mut ring = Ring::new();
        let a = ring.push_back(0);
        ring.push_back(1);
        ring.remove(a);
        let d = ring.push_back(3);
        assert_eq!(d, a);
        assert_eq!(values(&ring), vec![1, 3]);
    }

    #[test]
    fn position_finds_first_match_in_ring_order() {
        let mut ring = Ring::new();
        ring.push_back(5);
        let b = ring.push_back(7);
        ring.push_back(7);
        assert_eq!(ring.position(|v| *v == 7), Some(b));
        assert_eq!(ring.position(|v| *v == 9), None);
    }
}
