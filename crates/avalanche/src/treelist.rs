//! Persistent fixed-fanout sequence with in-place edits.
//!
//! A `TreeList` is a tree of fan-out [`FANOUT`] nodes. Leaves hold the
//! elements; branches hold child references annotated with the number of
//! elements preceding the child. Every node belongs to a *family* sharing a
//! single timestamp cell, and every list handle carries the timestamp and
//! length at which it observed the tree.
//!
//! Mutations first try to take ownership of the family by atomically
//! advancing the shared timestamp from the handle's observed value. On
//! success the writer may fill empty slots or patch existing ones in place,
//! recording a per-slot activation timestamp; a reader at timestamp `t`
//! sees a slot exactly when its activation is `<= t`, so older handles keep
//! reading their version with no synchronisation beyond the
//! acquire/release pairing on the activation word itself. When ownership
//! cannot be taken, the affected spine is copied into a fresh family that
//! is invisible to readers of the old one.
//!
//! Patched-over elements accumulate as dead weight; once the dead weight
//! reaches the live length times the configured ratio, the next mutation
//! rebuilds the tree compactly.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tree fan-out. Any power of two between 16 and 64 works; 32 balances
/// depth against copy width.
const FANOUT: usize = 32;

/// Activation value meaning "never activated".
const NEVER: u64 = u64::MAX;

/// The shared timestamp cell of a node family.
#[derive(Debug, Default)]
struct Family {
    stamp: AtomicU64,
    /// Approximate dead weight accumulated across the family.
    dead: AtomicU64,
}

/// A reference to a child node, as stored in branch slots.
struct ChildRef<T> {
    node: Arc<Node<T>>,
    /// Timestamp at which the child is to be read when it belongs to a
    /// different family than the referencing node.
    stamp_seen: u64,
    /// Element count of the child as seen when the reference was written.
    len_seen: usize,
    /// Number of elements preceding this child within the parent.
    num_prior: usize,
}

impl<T> Clone for ChildRef<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            stamp_seen: self.stamp_seen,
            len_seen: self.len_seen,
            num_prior: self.num_prior,
        }
    }
}

enum Item<T> {
    Elem(T),
    Child(ChildRef<T>),
}

impl<T: Clone> Clone for Item<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Elem(e) => Self::Elem(e.clone()),
            Self::Child(c) => Self::Child(c.clone()),
        }
    }
}

/// One slot: a write-once primary value plus a write-once patch value, each
/// gated by an activation timestamp.
struct Slot<T> {
    primary_activation: AtomicU64,
    patch_activation: AtomicU64,
    primary: UnsafeCell<MaybeUninit<Item<T>>>,
    patch: UnsafeCell<MaybeUninit<Item<T>>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            primary_activation: AtomicU64::new(NEVER),
            patch_activation: AtomicU64::new(NEVER),
            primary: UnsafeCell::new(MaybeUninit::uninit()),
            patch: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The item visible at `stamp`, if any.
    fn visible(&self, stamp: u64) -> Option<&Item<T>> {
        if self.patch_activation.load(Ordering::Acquire) <= stamp {
            // SAFETY: the patch was initialised before its activation was
            // released at a timestamp <= stamp, and is never written again.
            return Some(unsafe { (*self.patch.get()).assume_init_ref() });
        }
        if self.primary_activation.load(Ordering::Acquire) <= stamp {
            // SAFETY: as above, for the primary value.
            return Some(unsafe { (*self.primary.get()).assume_init_ref() });
        }
        None
    }

    /// Writes the primary value and activates it at `stamp`.
    ///
    /// Caller must hold family ownership and the slot must be inactive.
    fn activate_primary(&self, item: Item<T>, stamp: u64) {
        debug_assert_eq!(self.primary_activation.load(Ordering::Relaxed), NEVER);
        // SAFETY: ownership of the family serialises writers, and an
        // activation of NEVER means no reader can alias this memory yet.
        unsafe {
            (*self.primary.get()).write(item);
        }
        self.primary_activation.store(stamp, Ordering::Release);
    }

    /// Writes the patch value and activates it at `stamp`.
    fn activate_patch(&self, item: Item<T>, stamp: u64) {
        debug_assert_eq!(self.patch_activation.load(Ordering::Relaxed), NEVER);
        // SAFETY: as for `activate_primary`; each slot is patched at most
        // once in its node's lifetime.
        unsafe {
            (*self.patch.get()).write(item);
        }
        self.patch_activation.store(stamp, Ordering::Release);
    }

    fn patch_used(&self) -> bool {
        self.patch_activation.load(Ordering::Acquire) != NEVER
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        // Exclusive access here; relaxed loads suffice.
        if self.primary_activation.load(Ordering::Relaxed) != NEVER {
            // SAFETY: an activated value is initialised and never dropped
            // elsewhere.
            unsafe { (*self.primary.get()).assume_init_drop() }
        }
        if self.patch_activation.load(Ordering::Relaxed) != NEVER {
            // SAFETY: as above.
            unsafe { (*self.patch.get()).assume_init_drop() }
        }
    }
}

struct Node<T> {
    height: u32,
    family: Arc<Family>,
    slots: Box<[Slot<T>]>,
}

// SAFETY: slot payloads are published with release stores on the activation
// word and read through acquire loads; activated payloads are immutable.
unsafe impl<T: Send + Sync> Sync for Node<T> {}
// SAFETY: the node owns its items; sending it moves ownership as a whole.
unsafe impl<T: Send + Sync> Send for Node<T> {}

impl<T> Node<T> {
    fn new(height: u32, family: Arc<Family>) -> Self {
        Self {
            height,
            family,
            slots: (0..FANOUT).map(|_| Slot::empty()).collect(),
        }
    }

    /// Number of slots visible at `stamp`.
    fn visible_count(&self, stamp: u64) -> usize {
        self.slots
            .iter()
            .take_while(|s| s.visible(stamp).is_some())
            .count()
    }
}

/// A persistent sequence handle: a root, the timestamp it reads at, and the
/// number of elements it exposes.
pub struct TreeList<T> {
    root: Option<Arc<Node<T>>>,
    stamp: u64,
    len: usize,
    /// Dead weight (in elements) at which a rebuild is triggered, expressed
    /// as a multiple of the live length.
    rebuild_ratio: u64,
}

impl<T> Clone for TreeList<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            stamp: self.stamp,
            len: self.len,
            rebuild_ratio: self.rebuild_ratio,
        }
    }
}

impl<T: Clone> Default for TreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for TreeList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Clone> TreeList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: None,
            stamp: 0,
            len: 0,
            rebuild_ratio: 1,
        }
    }

    /// Overrides the dead-weight multiple at which mutations rebuild the
    /// tree. The default of 1 bounds memory at roughly twice the optimum.
    #[must_use]
    pub fn with_rebuild_ratio(mut self, ratio: u64) -> Self {
        self.rebuild_ratio = ratio.max(1);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the element at `index`, or `None` when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let root = self.root.as_ref()?;
        Some(read_at(root, self.stamp, index, self.len))
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { list: self, pos: 0 }
    }

    /// Appends one element, returning the extended list. The receiver keeps
    /// seeing its own version.
    #[must_use]
    pub fn append(&self, value: T) -> Self {
        if self.should_rebuild() {
            let mut items = self.collect_items();
            items.push(value);
            return self.rebuilt(items);
        }

        let Some(root) = self.root.as_ref() else {
            // First element: fresh single-leaf family.
            let family = Arc::new(Family::default());
            let node = Node::new(0, Arc::clone(&family));
            node.slots[0].activate_primary(Item::Elem(value), 1);
            family.stamp.store(1, Ordering::Release);
            return Self {
                root: Some(Arc::new(node)),
                stamp: 1,
                len: 1,
                rebuild_ratio: self.rebuild_ratio,
            };
        };

        if let Some(new_stamp) = self.try_own(root) {
            if let Some(new_root) = append_owned(root, self.stamp, new_stamp, self.len, value) {
                return Self {
                    root: Some(new_root),
                    stamp: new_stamp,
                    len: self.len + 1,
                    rebuild_ratio: self.rebuild_ratio,
                };
            }
            return Self {
                root: Some(Arc::clone(root)),
                stamp: new_stamp,
                len: self.len + 1,
                rebuild_ratio: self.rebuild_ratio,
            };
        }

        // Lost the family: fork into a new one.
        let mut items = self.collect_items();
        items.push(value);
        self.rebuilt(items)
    }

    /// Replaces the element at `index`, returning the modified list.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn replace(&self, index: usize, value: T) -> Self {
        assert!(index < self.len, "replace index {index} out of range {}", self.len);

        if self.should_rebuild() {
            let mut items = self.collect_items();
            items[index] = value;
            return self.rebuilt(items);
        }

        let root = self.root.as_ref().expect("non-empty list has a root");
        if let Some(new_stamp) = self.try_own(root) {
            root.family.dead.fetch_add(1, Ordering::Relaxed);
            let new_root = replace_owned(root, self.stamp, new_stamp, index, self.len, value);
            return Self {
                root: Some(new_root.unwrap_or_else(|| Arc::clone(root))),
                stamp: new_stamp,
                len: self.len,
                rebuild_ratio: self.rebuild_ratio,
            };
        }

        let mut items = self.collect_items();
        items[index] = value;
        self.rebuilt(items)
    }

    /// Inserts `value` before `index` (which may equal the length).
    #[must_use]
    pub fn insert(&self, index: usize, value: T) -> Self {
        assert!(index <= self.len, "insert index {index} out of range {}", self.len);
        if index == self.len {
            return self.append(value);
        }
        let mut items = self.collect_items();
        items.insert(index, value);
        self.rebuilt(items)
    }

    /// Deletes `count` elements starting at `index`.
    #[must_use]
    pub fn delete(&self, index: usize, count: usize) -> Self {
        assert!(
            index.checked_add(count).is_some_and(|end| end <= self.len),
            "delete range out of bounds"
        );
        let mut items = self.collect_items();
        items.drain(index..index + count);
        self.rebuilt(items)
    }

    /// Concatenates `other` onto this list.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for item in other.iter() {
            result = result.append(item);
        }
        result
    }

    fn try_own(&self, root: &Arc<Node<T>>) -> Option<u64> {
        let new_stamp = self.stamp + 1;
        root.family
            .stamp
            .compare_exchange(self.stamp, new_stamp, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| new_stamp)
    }

    fn should_rebuild(&self) -> bool {
        let Some(root) = self.root.as_ref() else {
            return false;
        };
        let dead = root.family.dead.load(Ordering::Relaxed);
        dead >= (self.len as u64).max(1) * self.rebuild_ratio
    }

    fn collect_items(&self) -> Vec<T> {
        self.iter().collect()
    }

    fn rebuilt(&self, items: Vec<T>) -> Self {
        let mut list = Self::new().with_rebuild_ratio(self.rebuild_ratio);
        let family = Arc::new(Family::default());
        family.stamp.store(1, Ordering::Release);
        if items.is_empty() {
            return list;
        }
        let len = items.len();
        let root = build_compact(&items, &family);
        list.root = Some(root);
        list.stamp = 1;
        list.len = len;
        list
    }
}

impl<T: Clone> FromIterator<T> for TreeList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let items: Vec<T> = iter.into_iter().collect();
        TreeList::new().rebuilt(items)
    }
}

/// Iterator over a list version; yields clones of the elements.
pub struct Iter<'a, T> {
    list: &'a TreeList<T>,
    pos: usize,
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.list.get(self.pos)?;
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.list.len() - self.pos.min(self.list.len());
        (rest, Some(rest))
    }
}

/// Reads element `index` of the subtree rooted at `node`, which spans
/// `limit` elements when read at `stamp`.
fn read_at<T: Clone>(node: &Node<T>, stamp: u64, index: usize, limit: usize) -> T {
    if node.height == 0 {
        match node.slots[index].visible(stamp) {
            Some(Item::Elem(e)) => return e.clone(),
            _ => unreachable!("leaf slot within length must be visible"),
        }
    }

    let mut chosen: Option<(&ChildRef<T>, usize)> = None;
    for slot in &node.slots {
        let Some(Item::Child(child)) = slot.visible(stamp) else {
            break;
        };
        if child.num_prior > index {
            break;
        }
        chosen = Some((child, child.num_prior));
    }
    let (child, prior) = chosen.expect("index within span selects a child");

    // Child span: up to the next sibling's prior count, or to the limit.
    let mut child_limit = limit - prior;
    for slot in &node.slots {
        if let Some(Item::Child(sib)) = slot.visible(stamp)
            && sib.num_prior > prior
        {
            child_limit = child_limit.min(sib.num_prior - prior);
            break;
        }
    }

    let child_stamp = if Arc::ptr_eq(&child.node.family, &node.family) {
        stamp
    } else {
        child.stamp_seen
    };
    read_at(&child.node, child_stamp, index - prior, child_limit)
}

/// In-place append under family ownership. Returns a replacement root when
/// the tree had to grow upward, `None` when the existing root absorbed the
/// element.
fn append_owned<T: Clone>(
    root: &Arc<Node<T>>,
    old_stamp: u64,
    new_stamp: u64,
    len: usize,
    value: T,
) -> Option<Arc<Node<T>>> {
    if try_append_in(root, old_stamp, new_stamp, value.clone()) {
        return None;
    }

    // Root is full along its right spine: grow a level.
    let family = Arc::clone(&root.family);
    let new_root = Node::new(root.height + 1, Arc::clone(&family));
    new_root.slots[0].activate_primary(
        Item::Child(ChildRef {
            node: Arc::clone(root),
            stamp_seen: new_stamp,
            len_seen: len,
            num_prior: 0,
        }),
        new_stamp,
    );
    let spine = build_spine(root.height, &family, value, new_stamp);
    new_root.slots[1].activate_primary(
        Item::Child(ChildRef {
            node: spine,
            stamp_seen: new_stamp,
            len_seen: 1,
            num_prior: len,
        }),
        new_stamp,
    );
    Some(Arc::new(new_root))
}

/// Tries to place `value` in the rightmost position of `node`'s subtree.
fn try_append_in<T: Clone>(node: &Node<T>, old_stamp: u64, new_stamp: u64, value: T) -> bool {
    let visible = node.visible_count(old_stamp);
    if node.height == 0 {
        if visible < FANOUT {
            node.slots[visible].activate_primary(Item::Elem(value), new_stamp);
            return true;
        }
        return false;
    }

    debug_assert!(visible > 0, "branch nodes are never empty");
    let last = node.slots[visible - 1]
        .visible(old_stamp)
        .and_then(|item| match item {
            Item::Child(c) => Some(c.clone()),
            Item::Elem(_) => None,
        })
        .expect("branch slots hold children");

    // Only same-family children can grow in place.
    if Arc::ptr_eq(&last.node.family, &node.family)
        && try_append_in(&last.node, old_stamp, new_stamp, value.clone())
    {
        return true;
    }

    if visible < FANOUT {
        let prior = subtree_len_estimate(node, old_stamp, visible);
        let spine = build_spine(node.height - 1, &node.family, value, new_stamp);
        node.slots[visible].activate_primary(
            Item::Child(ChildRef {
                node: spine,
                stamp_seen: new_stamp,
                len_seen: 1,
                num_prior: prior,
            }),
            new_stamp,
        );
        return true;
    }
    false
}

/// Total span of the first `visible` children of a branch. Exact for the
/// non-final children; the final child is counted from its recorded length
/// plus any in-place growth, which appending tracks via its own length.
fn subtree_len_estimate<T: Clone>(node: &Node<T>, stamp: u64, visible: usize) -> usize {
    let Some(Item::Child(last)) = node.slots[visible - 1].visible(stamp) else {
        unreachable!("branch slots hold children");
    };
    if Arc::ptr_eq(&last.node.family, &node.family) {
        last.num_prior + subtree_len(&last.node, stamp)
    } else {
        last.num_prior + last.len_seen
    }
}

fn visible_stamp<T>(parent: &Node<T>, child: &ChildRef<T>, stamp: u64) -> u64 {
    if Arc::ptr_eq(&child.node.family, &parent.family) {
        stamp
    } else {
        child.stamp_seen
    }
}

fn subtree_len<T: Clone>(node: &Node<T>, stamp: u64) -> usize {
    let visible = node.visible_count(stamp);
    if node.height == 0 {
        return visible;
    }
    if visible == 0 {
        return 0;
    }
    subtree_len_estimate(node, stamp, visible)
}

/// Builds a minimal path of nodes of the given height holding one element.
fn build_spine<T: Clone>(height: u32, family: &Arc<Family>, value: T, stamp: u64) -> Arc<Node<T>> {
    let node = Node::new(0, Arc::clone(family));
    node.slots[0].activate_primary(Item::Elem(value), stamp);
    let mut current = Arc::new(node);
    for h in 1..=height {
        let parent = Node::new(h, Arc::clone(family));
        parent.slots[0].activate_primary(
            Item::Child(ChildRef {
                node: current,
                stamp_seen: stamp,
                len_seen: 1,
                num_prior: 0,
            }),
            stamp,
        );
        current = Arc::new(parent);
    }
    current
}

/// In-place replace under family ownership. Returns a replacement root when
/// patching forced node copies all the way up.
fn replace_owned<T: Clone>(
    root: &Arc<Node<T>>,
    old_stamp: u64,
    new_stamp: u64,
    index: usize,
    limit: usize,
    value: T,
) -> Option<Arc<Node<T>>> {
    replace_in(root, old_stamp, new_stamp, index, limit, value)
}

fn replace_in<T: Clone>(
    node: &Arc<Node<T>>,
    old_stamp: u64,
    new_stamp: u64,
    index: usize,
    limit: usize,
    value: T,
) -> Option<Arc<Node<T>>> {
    if node.height == 0 {
        if node.slots[index].patch_used() {
            // Patch slot spent: copy the leaf within the family.
            let copy = copy_node_visible(node, old_stamp, new_stamp);
            copy.slots[index].activate_patch(Item::Elem(value), new_stamp);
            return Some(Arc::new(copy));
        }
        node.slots[index].activate_patch(Item::Elem(value), new_stamp);
        return None;
    }

    let visible = node.visible_count(old_stamp);
    let mut child_ix = 0;
    let mut child: Option<ChildRef<T>> = None;
    for (i, slot) in node.slots.iter().enumerate().take(visible) {
        let Some(Item::Child(c)) = slot.visible(old_stamp) else {
            break;
        };
        if c.num_prior > index {
            break;
        }
        child_ix = i;
        child = Some(c.clone());
    }
    let child = child.expect("index within span selects a child");

    let mut child_limit = limit - child.num_prior;
    if child_ix + 1 < visible
        && let Some(Item::Child(sib)) = node.slots[child_ix + 1].visible(old_stamp)
    {
        child_limit = child_limit.min(sib.num_prior - child.num_prior);
    }

    let child_stamp = visible_stamp(node, &child, old_stamp);
    let replaced = if Arc::ptr_eq(&child.node.family, &node.family) {
        replace_in(&child.node, child_stamp, new_stamp, index - child.num_prior, child_limit, value)
    } else {
        // Foreign child: copy it into our family with the patch applied.
        let copy = copy_subtree_with(
            &child.node,
            child_stamp,
            new_stamp,
            &node.family,
            index - child.num_prior,
            child_limit,
            value,
        );
        Some(copy)
    };

    let new_child = replaced?;
    let new_ref = Item::Child(ChildRef {
        node: new_child,
        stamp_seen: new_stamp,
        len_seen: child.len_seen,
        num_prior: child.num_prior,
    });

    if node.slots[child_ix].patch_used() {
        let copy = copy_node_visible(node, old_stamp, new_stamp);
        copy.slots[child_ix].activate_patch(new_ref, new_stamp);
        return Some(Arc::new(copy));
    }
    node.slots[child_ix].activate_patch(new_ref, new_stamp);
    None
}

/// Copies the slots of `node` visible at `old_stamp` into a fresh node of
/// the same family, activated at `new_stamp`.
fn copy_node_visible<T: Clone>(node: &Node<T>, old_stamp: u64, new_stamp: u64) -> Node<T> {
    let copy = Node::new(node.height, Arc::clone(&node.family));
    for (i, slot) in node.slots.iter().enumerate() {
        let Some(item) = slot.visible(old_stamp) else {
            break;
        };
        copy.slots[i].activate_primary(item.clone(), new_stamp);
    }
    copy
}

/// Deep-copies a foreign subtree into `family`, applying one replacement.
fn copy_subtree_with<T: Clone>(
    node: &Node<T>,
    stamp: u64,
    new_stamp: u64,
    family: &Arc<Family>,
    index: usize,
    limit: usize,
    value: T,
) -> Arc<Node<T>> {
    let copy = Node::new(node.height, Arc::clone(family));
    if node.height == 0 {
        for (i, slot) in node.slots.iter().enumerate().take(limit) {
            let Some(Item::Elem(e)) = slot.visible(stamp) else {
                break;
            };
            let item = if i == index { value.clone() } else { e.clone() };
            copy.slots[i].activate_primary(Item::Elem(item), new_stamp);
        }
        return Arc::new(copy);
    }

    for (i, slot) in node.slots.iter().enumerate() {
        let Some(Item::Child(child)) = slot.visible(stamp) else {
            break;
        };
        if child.num_prior >= limit {
            break;
        }
        let child_stamp = visible_stamp(node, child, stamp);
        let mut child_limit = limit - child.num_prior;
        if let Some(Item::Child(sib)) = node.slots.get(i + 1).and_then(|s| s.visible(stamp))
            && sib.num_prior < limit
        {
            child_limit = child_limit.min(sib.num_prior - child.num_prior);
        }
        let span = child.num_prior..child.num_prior + child_limit;
        let new_child = if span.contains(&index) {
            copy_subtree_with(
                &child.node,
                child_stamp,
                new_stamp,
                family,
                index - child.num_prior,
                child_limit,
                value.clone(),
            )
        } else {
            Arc::clone(&child.node)
        };
        let foreign = !Arc::ptr_eq(&new_child.family, family);
        copy.slots[i].activate_primary(
            Item::Child(ChildRef {
                stamp_seen: if foreign { child_stamp } else { new_stamp },
                len_seen: child.len_seen,
                num_prior: child.num_prior,
                node: new_child,
            }),
            new_stamp,
        );
    }
    Arc::new(copy)
}

/// Builds a compact tree over `items` in a fresh family at stamp 1.
fn build_compact<T: Clone>(items: &[T], family: &Arc<Family>) -> Arc<Node<T>> {
    let mut level: Vec<(Arc<Node<T>>, usize)> = items
        .chunks(FANOUT)
        .map(|chunk| {
            let node = Node::new(0, Arc::clone(family));
            for (i, item) in chunk.iter().enumerate() {
                node.slots[i].activate_primary(Item::Elem(item.clone()), 1);
            }
            (Arc::new(node), chunk.len())
        })
        .collect();

    let mut height = 1;
    while level.len() > 1 {
        level = level
            .chunks(FANOUT)
            .map(|chunk| {
                let node = Node::new(height, Arc::clone(family));
                let mut prior = 0;
                for (i, (child, len)) in chunk.iter().enumerate() {
                    node.slots[i].activate_primary(
                        Item::Child(ChildRef {
                            node: Arc::clone(child),
                            stamp_seen: 1,
                            len_seen: *len,
                            num_prior: prior,
                        }),
                        1,
                    );
                    prior += len;
                }
                (Arc::new(node), prior)
            })
            .collect();
        height += 1;
    }
    level.pop().expect("non-empty input produces a root").0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(n: usize) -> TreeList<usize> {
        let mut list = TreeList::new();
        for i in 0..n {
            list = list.append(i);
        }
        list
    }

    #[test]
    fn append_extends_length_and_appends_at_the_end() {
        let list = list_of(10);
        let longer = list.append(99);
        assert_eq!(longer.len(), list.len() + 1);
        assert_eq!(longer.get(list.len()), Some(99));
    }

    #[test]
    fn old_references_keep_their_elements() {
        let base = list_of(100);
        let snapshot: Vec<usize> = base.iter().collect();

        let mut extended = base.clone();
        for i in 100..300 {
            extended = extended.append(i);
        }
        let patched = extended.replace(50, 5000);

        assert_eq!(base.iter().collect::<Vec<_>>(), snapshot);
        assert_eq!(base.get(50), Some(50));
        assert_eq!(patched.get(50), Some(5000));
        assert_eq!(extended.get(50), Some(50));
    }

    #[test]
    fn appends_cross_node_boundaries() {
        let list = list_of(FANOUT * FANOUT + 3);
        for i in [0, FANOUT - 1, FANOUT, FANOUT * FANOUT, FANOUT * FANOUT + 2] {
            assert_eq!(list.get(i), Some(i), "index {i}");
        }
        assert_eq!(list.get(FANOUT * FANOUT + 3), None);
    }

    #[test]
    fn replace_is_persistent_under_repeated_edits() {
        let base = list_of(40);
        let mut current = base.clone();
        for round in 0..10 {
            current = current.replace(7, round * 1000);
            assert_eq!(current.get(7), Some(round * 1000));
        }
        assert_eq!(base.get(7), Some(7));
    }

    #[test]
    fn divergent_writes_fork_families() {
        let base = list_of(20);
        let a = base.append(100);
        let b = base.append(200);
        assert_eq!(a.get(20), Some(100));
        assert_eq!(b.get(20), Some(200));
        assert_eq!(base.len(), 20);
    }

    #[test]
    fn insert_and_delete() {
        let list = list_of(10);
        let inserted = list.insert(3, 77);
        assert_eq!(inserted.len(), 11);
        assert_eq!(inserted.get(3), Some(77));
        assert_eq!(inserted.get(4), Some(3));

        let deleted = inserted.delete(3, 1);
        assert_eq!(deleted.iter().collect::<Vec<_>>(), list.iter().collect::<Vec<_>>());
    }

    #[test]
    fn concat_joins_sequences() {
        let left = list_of(5);
        let right: TreeList<usize> = (100..105).collect();
        let joined = left.concat(&right);
        assert_eq!(joined.len(), 10);
        assert_eq!(joined.get(7), Some(102));
    }

    #[test]
    fn rebuild_triggers_after_heavy_patching() {
        let mut list = list_of(8).with_rebuild_ratio(1);
        for i in 0..100 {
            list = list.replace(i % 8, i);
        }
        assert_eq!(list.len(), 8);
        assert_eq!(list.get(3), Some(99));
    }

    #[test]
    fn cross_thread_reads_need_no_writer_quiescence() {
        let base = list_of(1000);
        let reader = base.clone();
        let handle = std::thread::spawn(move || {
            let mut sum = 0usize;
            for v in reader.iter() {
                sum += v;
            }
            sum
        });

        let mut writer = base.clone();
        for i in 0..200 {
            writer = writer.replace(i, 0);
        }

        assert_eq!(handle.join().unwrap(), (0..1000).sum::<usize>());
    }
}
