use core::fmt;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

/// Case-insensitive lexicographic ordering used for every key comparison in
/// the map. Folds through the full Unicode lowercase mapping, not just ASCII.
fn cmp_keys(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

impl Color {
    /// Returns `true` if the color is [`Red`].
    ///
    /// [`Red`]: Color::Red
    #[must_use]
    fn is_red(&self) -> bool {
        matches!(self, Self::Red)
    }

    /// Returns `true` if the color is [`Black`].
    ///
    /// [`Black`]: Color::Black
    #[must_use]
    fn is_black(&self) -> bool {
        matches!(self, Self::Black)
    }
}

struct Node<V> {
    // key and value are uninit only for the shared sentinel used by the
    // delete routine, otherwise they must always be valid values
    key: MaybeUninit<String>,
    value: MaybeUninit<V>,
    color: Color,
    parent: Option<RawNode<V>>,
    left: Option<RawNode<V>>,
    right: Option<RawNode<V>>,
}

impl<V> fmt::Debug for Node<V>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("Node");
        f.field("key", unsafe { &self.key.assume_init_ref() })
            .field("value", unsafe { &self.value.assume_init_ref() })
            .field("color", &self.color);

        let mut dbg_link = |name: &str, node: &Option<RawNode<V>>| match node {
            Some(node) => {
                f.field(name, &Some(unsafe { node.key() }));
            }
            None => {
                f.field(name, &None::<&str>);
            }
        };
        dbg_link("parent", &self.parent);
        dbg_link("left", &self.left);
        dbg_link("right", &self.right);

        f.finish()
    }
}

/// Wrapper around `NonNull<Node<V>>` to provide convenient accessors so that
/// the rebalancing routines stay readable.
#[derive(Debug, PartialEq, Eq)]
#[repr(transparent)]
struct RawNode<V> {
    ptr: NonNull<Node<V>>,
}

impl<V> Clone for RawNode<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RawNode<V> {}

impl<V> RawNode<V> {
    fn dangling() -> Self {
        Self {
            ptr: NonNull::dangling(),
        }
    }

    fn from_node(node: Node<V>) -> Self {
        Self {
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(node))) },
        }
    }

    #[inline]
    fn as_ptr(&self) -> *mut Node<V> {
        self.ptr.as_ptr()
    }

    #[inline]
    unsafe fn as_ref<'a>(&self) -> &'a Node<V> {
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    unsafe fn key<'a>(&self) -> &'a str {
        unsafe { (*self.as_ptr()).key.assume_init_ref() }
    }

    #[inline]
    unsafe fn value_ref<'a>(&self) -> &'a V {
        unsafe { (*self.as_ptr()).value.assume_init_ref() }
    }

    #[inline]
    unsafe fn value_mut<'a>(&mut self) -> &'a mut V {
        unsafe { (*self.as_ptr()).value.assume_init_mut() }
    }

    #[inline]
    unsafe fn entry<'a>(&self) -> (&'a str, &'a V) {
        let ptr = self.as_ptr();
        unsafe { ((*ptr).key.assume_init_ref(), (*ptr).value.assume_init_ref()) }
    }

    #[inline]
    unsafe fn parent(&self) -> Option<RawNode<V>> {
        unsafe { (*self.as_ptr()).parent }
    }

    #[inline]
    unsafe fn set_parent(&mut self, new_parent: Option<RawNode<V>>) {
        unsafe {
            (*self.as_ptr()).parent = new_parent;
        }
    }

    #[inline]
    unsafe fn left(&self) -> Option<RawNode<V>> {
        unsafe { (*self.as_ptr()).left }
    }

    #[inline]
    unsafe fn set_left(&mut self, new_left: Option<RawNode<V>>) {
        unsafe {
            (*self.as_ptr()).left = new_left;
        }
    }

    #[inline]
    unsafe fn right(&self) -> Option<RawNode<V>> {
        unsafe { (*self.as_ptr()).right }
    }

    #[inline]
    unsafe fn set_right(&mut self, new_right: Option<RawNode<V>>) {
        unsafe {
            (*self.as_ptr()).right = new_right;
        }
    }

    #[inline]
    unsafe fn color(&self) -> Color {
        unsafe { (*self.as_ptr()).color }
    }

    #[inline]
    unsafe fn set_color(&mut self, new_color: Color) {
        unsafe { (*self.as_ptr()).color = new_color }
    }

    /// Which child of its parent this node is.
    ///
    /// If `self` is the shared sentinel it is not actually linked from the
    /// parent, so the result reports which child slot the parent has filled,
    /// i.e. the opposite of the slot the sentinel stands in for.
    #[inline]
    unsafe fn pos(&self) -> NodePos {
        let ptr = self.as_ptr();
        match unsafe { (*ptr).parent } {
            Some(p) => match unsafe { (p.left(), p.right()) } {
                (None, None) => unreachable!(),
                (None, Some(_)) => NodePos::Right,
                (Some(_), None) => NodePos::Left,
                (Some(left), Some(right)) => {
                    if ptr::eq(ptr, left.as_ptr()) {
                        NodePos::Left
                    } else {
                        debug_assert!(ptr::eq(ptr, right.as_ptr()));
                        NodePos::Right
                    }
                }
            },
            None => NodePos::Root,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePos {
    Root,
    Left,
    Right,
}

/// An ordered map from case-insensitive string keys to values, backed by a
/// red-black tree.
///
/// Keys compare by case-insensitive lexicographic order, so `"Apple"` and
/// `"apple"` name the same entry. The first inserted spelling of a key is the
/// one the map keeps; inserting a duplicate is a no-op and never overwrites
/// the stored value.
///
/// The tree maintains the usual red-black invariants, so `insert`, `delete`,
/// `get` and `depth` are all `O(log n)` regardless of the order keys arrive
/// in. [`RedBlackMap::is_valid`] re-checks the invariants from scratch and is
/// meant for tests and debugging, not as a runtime guard.
pub struct RedBlackMap<V> {
    // INVARIANTS:
    //  * if `len > 0` then `root` is a valid pointer to `Node`
    root: RawNode<V>,
    len: usize,
    // Shared sentinel standing in for a missing child during delete fix-up.
    // Always black with cleared parent outside of `delete_core`.
    sentinel: RawNode<V>,
    marker: PhantomData<Box<Node<V>>>,
}

impl<V> Drop for RedBlackMap<V> {
    fn drop(&mut self) {
        unsafe fn free<V>(node: RawNode<V>) {
            if let Some(l) = unsafe { node.left() } {
                unsafe { free(l) };
            }
            if let Some(r) = unsafe { node.right() } {
                unsafe { free(r) };
            }
            let mut node: Box<Node<V>> = unsafe { Box::from_raw(node.as_ptr()) };
            // key/value are always init on real nodes and must be dropped
            // manually because of the MaybeUninit wrappers
            unsafe {
                node.key.assume_init_drop();
                node.value.assume_init_drop();
            }
        }

        if self.len != 0 {
            self.len = 0;
            unsafe { free(self.root) };
        }
        // the sentinel's key/value were never initialized
        let _: Box<Node<V>> = unsafe { Box::from_raw(self.sentinel.as_ptr()) };
    }
}

impl<V> fmt::Debug for RedBlackMap<V>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct TreeDebug<'a, V> {
            root: RawNode<V>,
            marker: PhantomData<&'a Node<V>>,
        }

        impl<V> fmt::Debug for TreeDebug<'_, V>
        where
            V: fmt::Debug,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut f = f.debug_list();

                let mut func = |node: RawNode<V>| {
                    let node = unsafe { node.as_ref() };
                    f.entry(&node);
                };

                unsafe { RedBlackMap::inorder_core(self.root, &mut func) };
                f.finish()
            }
        }

        let mut f = f.debug_struct("RedBlackMap");
        f.field("len", &self.len);

        match self.len {
            0 => {
                f.field("root", &None::<&str>);
                let nodes: &[&str] = &[];
                f.field("nodes", &nodes);
            }
            _ => {
                f.field("root", &Some(unsafe { self.root.as_ref() }));
                f.field(
                    "nodes",
                    &TreeDebug {
                        root: self.root,
                        marker: PhantomData,
                    },
                );
            }
        }

        f.finish()
    }
}

impl<V> RedBlackMap<V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            root: RawNode::dangling(),
            len: 0,
            sentinel: RawNode::from_node(Node {
                key: MaybeUninit::uninit(),
                value: MaybeUninit::uninit(),
                color: Color::Black,
                parent: None,
                left: None,
                right: None,
            }),
            marker: PhantomData,
        }
    }

    /// Number of entries in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the value stored under `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.get_raw(key).map(|node| unsafe { node.value_ref() })
    }

    /// Like [`get`](Self::get) but also returns the spelling of the key the
    /// map actually stores, which may differ in case from `key`.
    pub fn get_key_value(&self, key: &str) -> Option<(&str, &V)> {
        self.get_raw(key).map(|node| unsafe { node.entry() })
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.get_raw(key).map(|mut node| unsafe { node.value_mut() })
    }

    /// 1-based depth of the node holding `key`, counting every node on the
    /// path from the root (the root itself has depth 1). Returns 0 if the key
    /// is absent or the map is empty.
    pub fn depth(&self, key: &str) -> usize {
        match self.get_raw(key) {
            Some(node) => {
                let mut depth = 1;
                let mut parent = unsafe { node.parent() };
                while let Some(p) = parent {
                    depth += 1;
                    parent = unsafe { p.parent() };
                }
                depth
            }
            None => 0,
        }
    }

    fn get_raw(&self, key: &str) -> Option<RawNode<V>> {
        if self.is_empty() {
            return None;
        }

        let mut x = self.root;
        loop {
            match cmp_keys(key, unsafe { x.key() }) {
                Ordering::Less => match unsafe { x.left() } {
                    Some(left) => x = left,
                    None => break,
                },
                Ordering::Equal => return Some(x),
                Ordering::Greater => match unsafe { x.right() } {
                    Some(right) => x = right,
                    None => break,
                },
            }
        }

        None
    }

    /// Inserts `key`/`value` unless a case-insensitively equal key already
    /// exists; a duplicate insert is a no-op and keeps the stored spelling
    /// and value.
    pub fn insert(&mut self, key: String, value: V) {
        // Move left/right down the tree until we find an empty slot
        let mut parent = None;
        let mut cursor = if self.is_empty() {
            None
        } else {
            Some(self.root)
        };
        while let Some(node) = cursor {
            parent = cursor;
            match cmp_keys(&key, unsafe { node.key() }) {
                Ordering::Less => cursor = unsafe { node.left() },
                // duplicate key, the existing entry wins
                Ordering::Equal => return,
                Ordering::Greater => cursor = unsafe { node.right() },
            }
        }

        // new node is a leaf, it cannot have left or right subtrees
        let new_node = RawNode::from_node(Node {
            key: MaybeUninit::new(key),
            value: MaybeUninit::new(value),
            color: Color::Red,
            parent,
            left: None,
            right: None,
        });

        // update parent to point to the new node
        match parent {
            Some(mut parent) => unsafe {
                match cmp_keys(new_node.key(), parent.key()) {
                    Ordering::Less => parent.set_left(Some(new_node)),
                    _ => parent.set_right(Some(new_node)),
                }
            },
            None => self.root = new_node,
        }

        self.len += 1;
        self.insert_fixup(new_node);
    }

    fn insert_fixup(&mut self, new_node: RawNode<V>) {
        // The only possible violation on entry is the new red node hanging
        // off a red parent. Each round of the loop either resolves it with
        // one or two rotations (and stops) or pushes it two levels up by
        // recoloring.
        let mut node = new_node;
        unsafe {
            loop {
                match node.parent() {
                    Some(mut parent) if parent.color().is_red() => {
                        debug_assert!(node.color().is_red());

                        match parent.pos() {
                            // the root is always black, a red parent cannot be it
                            NodePos::Root => unreachable!(),
                            NodePos::Left => {
                                // grandparent exists and is black: the parent
                                // is red so it is not the root, and a red
                                // grandparent over a red parent would have
                                // been fixed on an earlier round
                                let mut grand_parent = parent.parent().unwrap();
                                debug_assert!(grand_parent.color().is_black());
                                let uncle = grand_parent.right();

                                match uncle {
                                    Some(mut uncle) if uncle.color().is_red() => {
                                        // Red uncle: pull the blackness of the
                                        // grandparent down to both of its
                                        // children. Black heights are
                                        // unchanged, but the grandparent may
                                        // now clash with *its* parent, so
                                        // continue from there.
                                        parent.set_color(Color::Black);
                                        uncle.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        node = grand_parent;
                                    }
                                    _ => {
                                        // Black or absent uncle: rotate. A
                                        // bent node/parent/grandparent chain
                                        // (node is the inner grandchild) is
                                        // first straightened by rotating at
                                        // the parent, after which the roles
                                        // of node and parent have swapped.
                                        if let NodePos::Right = node.pos() {
                                            self.rotate_left(parent);
                                            mem::swap(&mut parent, &mut node);
                                        }

                                        // Straight chain: the parent takes
                                        // the grandparent's place and color,
                                        // the grandparent drops down as its
                                        // red child. This restores every
                                        // invariant, no further rounds needed.
                                        parent.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        self.rotate_right(grand_parent);
                                    }
                                }
                            }
                            NodePos::Right => {
                                // mirror of the Left branch
                                let mut grand_parent = parent.parent().unwrap();
                                debug_assert!(grand_parent.color().is_black());
                                let uncle = grand_parent.left();

                                match uncle {
                                    Some(mut uncle) if uncle.color().is_red() => {
                                        parent.set_color(Color::Black);
                                        uncle.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        node = grand_parent;
                                    }
                                    _ => {
                                        if let NodePos::Left = node.pos() {
                                            self.rotate_right(parent);
                                            mem::swap(&mut parent, &mut node);
                                        }

                                        parent.set_color(Color::Black);
                                        grand_parent.set_color(Color::Red);
                                        self.rotate_left(grand_parent);
                                    }
                                }
                            }
                        }
                    }
                    _ => break,
                }
            }

            self.root.set_color(Color::Black);
        }
    }

    fn rotate_left(&mut self, mut node: RawNode<V>) {
        //    p                       p
        //    |                       |
        // +-node-+               +-right-+
        // |      |      -->      |       |
        // a  +-right-+       +-node-+    c
        //    |       |       |      |
        //    b       c       a      b
        // where a, b, c can be any subtrees
        unsafe {
            if let Some(mut right) = node.right() {
                // attach b to node
                let b = right.left();
                node.set_right(b);
                if let Some(mut new_right) = node.right() {
                    new_right.set_parent(Some(node));
                }

                // attach right to parent
                let parent = node.parent();
                right.set_parent(parent);
                match node.pos() {
                    NodePos::Root => self.root = right,
                    NodePos::Left => parent.unwrap().set_left(Some(right)),
                    NodePos::Right => parent.unwrap().set_right(Some(right)),
                }

                // attach node to right
                right.set_left(Some(node));
                node.set_parent(Some(right));
            }
        }
    }

    fn rotate_right(&mut self, mut node: RawNode<V>) {
        //         p              p
        //         |              |
        //     +-node-+       +-left-+
        //     |      |       |      |
        // +-left-+   c  -->  a  +-node-+
        // |      |              |      |
        // a      b              b      c
        // where a, b, c can be any subtrees
        unsafe {
            if let Some(mut left) = node.left() {
                // attach b to node
                let b = left.right();
                node.set_left(b);
                if let Some(mut new_left) = node.left() {
                    new_left.set_parent(Some(node));
                }

                // attach left to parent
                let parent = node.parent();
                left.set_parent(parent);
                match node.pos() {
                    NodePos::Root => self.root = left,
                    NodePos::Left => parent.unwrap().set_left(Some(left)),
                    NodePos::Right => parent.unwrap().set_right(Some(left)),
                }

                // attach node to left
                left.set_right(Some(node));
                node.set_parent(Some(left));
            }
        }
    }

    /// Removes the entry stored under `key` (case-insensitive) and returns
    /// its stored key spelling and value, or `None` if the key is absent.
    pub fn delete(&mut self, key: &str) -> Option<(String, V)> {
        self.get_raw(key).map(|node| self.delete_core(node))
    }

    fn delete_core(&mut self, node: RawNode<V>) -> (String, V) {
        unsafe {
            // `removed` is the node physically unlinked from the tree; for
            // the two-children case it is the in-order successor, not `node`
            // itself.
            let mut removed = node;
            let mut removed_color = removed.color();
            // The node standing where `removed` used to be. If nothing got
            // promoted, the shared sentinel is parked there so that delete
            // fix-up has a black stand-in to work from.
            let fixup_target: RawNode<V>;
            match (node.left(), node.right()) {
                (None, child @ Some(_)) | (child @ Some(_), None) | (None, child @ None) => {
                    // zero or one child: splice the child (or nothing) into
                    // the node's place
                    self.replace_subtree(node, child);
                    fixup_target = child.unwrap_or(self.sentinel);
                }
                (Some(_), Some(right)) => {
                    // Two children: the in-order successor (minimum of the
                    // right subtree, it has no left child) structurally
                    // replaces `node` and takes over its color, so the key
                    // that really leaves the tree is the successor's old
                    // position.
                    removed = Self::min_of(right);
                    removed_color = removed.color();
                    let mut target = removed.right().unwrap_or(self.sentinel);

                    if ptr::eq(removed.as_ptr(), right.as_ptr()) {
                        // successor is the direct right child, its own right
                        // subtree stays in place
                        target.set_parent(Some(removed));
                    } else {
                        // unlink the successor from deeper in the subtree,
                        // then give it the node's right subtree
                        self.replace_subtree(removed, removed.right());
                        removed.set_right(node.right());
                        removed.right().unwrap().set_parent(Some(removed));
                    }
                    self.replace_subtree(node, Some(removed));
                    removed.set_left(node.left());
                    removed.left().unwrap().set_parent(Some(removed));
                    removed.set_color(node.color());
                    fixup_target = target;
                }
            }

            // Unlinking a red node never changes black heights. Unlinking a
            // black one does, and the fix-up repairs it starting from
            // whatever now occupies its place.
            if removed_color.is_black() {
                self.delete_fixup(fixup_target);
            }
            self.sentinel.set_parent(None);
            self.sentinel.set_color(Color::Black);

            let node = Box::from_raw(node.as_ptr());
            self.len -= 1;
            (node.key.assume_init(), node.value.assume_init())
        }
    }

    fn delete_fixup(&mut self, mut x: RawNode<V>) {
        // `x` carries the black height deficit left by the removed black
        // node ("doubly black" in CLRS terms). Each round either resolves
        // the deficit with rotations (and breaks) or pushes it one level up.
        //
        // If `x` is red, recoloring it black at the end settles the debt
        // immediately. If `x` is the root the missing black fell off every
        // path equally and nothing needs fixing.
        unsafe {
            while x.color().is_black() && x.parent().is_some() {
                let mut x_parent = x.parent().unwrap();
                let is_x_sentinel = ptr::eq(x.as_ptr(), self.sentinel.as_ptr());
                debug_assert!(
                    x_parent.left().is_some() || x_parent.right().is_some(),
                    "x's parent should have at least one child"
                );

                // `x` always has a sibling: the subtree `x` replaced had
                // black height >= 1, so the other side of the parent cannot
                // be empty without breaking the equal-black-height property
                // that still holds everywhere else.
                //
                // If `x` is the sentinel it is not linked from the parent,
                // so `pos()` reports the side of the parent's one real
                // child, the sibling's side.
                match (x.pos(), is_x_sentinel) {
                    (NodePos::Root, _) => unreachable!(),
                    (NodePos::Left, false) | (NodePos::Right, true) => {
                        // x is on the left, the sibling on the right
                        let mut sibling = x_parent.right().unwrap();
                        debug_assert!(!ptr::eq(sibling.as_ptr(), x.as_ptr()));
                        debug_assert!(!ptr::eq(sibling.as_ptr(), self.sentinel.as_ptr()));

                        if sibling.color().is_red() {
                            // Red sibling (parent necessarily black): rotate
                            // it above the parent. x's new sibling is one of
                            // the old sibling's black children, reducing to
                            // the black-sibling cases below with a red
                            // parent, which guarantees termination.
                            debug_assert!(x_parent.color().is_black());
                            sibling.set_color(Color::Black);
                            x_parent.set_color(Color::Red);
                            self.rotate_left(x_parent);
                            sibling = x_parent.right().unwrap();
                        }

                        debug_assert!(sibling.color().is_black());
                        let near_color =
                            sibling.left().map(|n| n.color()).unwrap_or(Color::Black);
                        let far_color =
                            sibling.right().map(|n| n.color()).unwrap_or(Color::Black);

                        if near_color.is_black() && far_color.is_black() {
                            // Both of the sibling's children black: strip one
                            // black off both sides by recoloring the sibling
                            // red, and move the deficit up to the parent.
                            sibling.set_color(Color::Red);
                            x = x_parent;
                        } else {
                            if far_color.is_black() {
                                // Near child red, far child black: rotate at
                                // the sibling so the red ends up on the far
                                // side, reducing to the terminal case.
                                sibling.left().unwrap().set_color(Color::Black);
                                sibling.set_color(Color::Red);
                                self.rotate_right(sibling);
                                sibling = x_parent.right().unwrap();
                            }

                            // Far child red: rotate the sibling above the
                            // parent. x's side gains a black ancestor, which
                            // pays off the deficit; the far child recolors
                            // black to keep its own side balanced. Done.
                            sibling.set_color(x_parent.color());
                            x_parent.set_color(Color::Black);
                            sibling.right().unwrap().set_color(Color::Black);
                            self.rotate_left(x_parent);
                            break;
                        }
                    }
                    (NodePos::Left, true) | (NodePos::Right, false) => {
                        // mirror: x on the right, sibling on the left
                        let mut sibling = x_parent.left().unwrap();
                        debug_assert!(!ptr::eq(sibling.as_ptr(), x.as_ptr()));
                        debug_assert!(!ptr::eq(sibling.as_ptr(), self.sentinel.as_ptr()));

                        if sibling.color().is_red() {
                            debug_assert!(x_parent.color().is_black());
                            sibling.set_color(Color::Black);
                            x_parent.set_color(Color::Red);
                            self.rotate_right(x_parent);
                            sibling = x_parent.left().unwrap();
                        }

                        debug_assert!(sibling.color().is_black());
                        let near_color =
                            sibling.right().map(|n| n.color()).unwrap_or(Color::Black);
                        let far_color =
                            sibling.left().map(|n| n.color()).unwrap_or(Color::Black);

                        if near_color.is_black() && far_color.is_black() {
                            sibling.set_color(Color::Red);
                            x = x_parent;
                        } else {
                            if far_color.is_black() {
                                sibling.right().unwrap().set_color(Color::Black);
                                sibling.set_color(Color::Red);
                                self.rotate_left(sibling);
                                sibling = x_parent.left().unwrap();
                            }

                            sibling.set_color(x_parent.color());
                            x_parent.set_color(Color::Black);
                            sibling.left().unwrap().set_color(Color::Black);
                            self.rotate_right(x_parent);
                            break;
                        }
                    }
                }
            }
            x.set_color(Color::Black);
        }
    }

    /// Replaces the subtree rooted at `old` with the subtree rooted at `new`.
    ///
    /// Only the parent-side links are rewired; `old`'s own child pointers are
    /// the caller's business. If `new` is `None` the shared sentinel's parent
    /// is pointed at the vacated slot so that delete fix-up can start there.
    unsafe fn replace_subtree(&mut self, old: RawNode<V>, new: Option<RawNode<V>>) {
        unsafe {
            match old.pos() {
                NodePos::Root => {
                    self.root = match new {
                        Some(new) => new,
                        None => RawNode::dangling(),
                    }
                }
                NodePos::Left => old.parent().unwrap().set_left(new),
                NodePos::Right => old.parent().unwrap().set_right(new),
            }

            if let Some(mut new) = new {
                new.set_parent(old.parent());
            } else {
                self.sentinel.set_parent(old.parent());
            }
        }
    }

    unsafe fn min_of(root: RawNode<V>) -> RawNode<V> {
        let mut x = root;
        while let Some(left) = unsafe { x.left() } {
            x = left;
        }

        x
    }

    unsafe fn inorder_core<F>(node: RawNode<V>, f: &mut F)
    where
        F: FnMut(RawNode<V>),
    {
        if let Some(l) = unsafe { node.left() } {
            unsafe { Self::inorder_core(l, f) };
        }
        f(node);
        if let Some(r) = unsafe { node.right() } {
            unsafe { Self::inorder_core(r, f) };
        }
    }

    /// Checks the red-black invariants from scratch, independently of the
    /// mutation logic:
    ///
    /// 1. the root is black,
    /// 2. no red node has a red child,
    /// 3. every path from the root to a missing child crosses the same
    ///    number of black nodes,
    /// 4. child -> parent back-pointers agree with the parent -> child links.
    ///
    /// An empty map is trivially valid. Intended for tests and debugging; a
    /// `false` here means the map has a bug, not that the caller did
    /// something wrong.
    pub fn is_valid(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        if unsafe { self.root.color() }.is_red() {
            return false;
        }
        if unsafe { self.root.parent() }.is_some() {
            return false;
        }

        // the black count of the first root-to-leaf path visited becomes the
        // expected count for every other path
        let mut expected = None;
        unsafe { Self::node_is_valid(self.root, 0, &mut expected) }
    }

    unsafe fn node_is_valid(
        node: RawNode<V>,
        blacks_above: usize,
        expected: &mut Option<usize>,
    ) -> bool {
        let color = unsafe { node.color() };
        let blacks = blacks_above + color.is_black() as usize;

        for child in [unsafe { node.left() }, unsafe { node.right() }] {
            match child {
                Some(child) => {
                    let parent_ok = unsafe { child.parent() }
                        .map(|p| ptr::eq(p.as_ptr(), node.as_ptr()))
                        .unwrap_or(false);
                    if !parent_ok {
                        return false;
                    }
                    if color.is_red() && unsafe { child.color() }.is_red() {
                        return false;
                    }
                    if !unsafe { Self::node_is_valid(child, blacks, expected) } {
                        return false;
                    }
                }
                // missing child = black NIL leaf, a path ends here
                None => {
                    if *expected.get_or_insert(blacks) != blacks {
                        return false;
                    }
                }
            }
        }

        true
    }
}

impl<V> Default for RedBlackMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(keys: &[&str]) -> RedBlackMap<i32> {
        let mut map = RedBlackMap::new();
        for (i, key) in keys.iter().enumerate() {
            map.insert((*key).to_owned(), i as i32);
        }
        map
    }

    #[test]
    fn empty() {
        let map: RedBlackMap<i32> = RedBlackMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.get("a"), None);
        assert_eq!(map.depth("a"), 0);
        assert!(map.is_valid());
    }

    #[test]
    fn three_keys_rebalance() {
        let map = map_of(&["b", "a", "c"]);
        assert_eq!(map.len(), 3);
        assert!(map.is_valid());

        let root = unsafe { map.root.as_ref() };
        assert_eq!(unsafe { root.key.assume_init_ref() }, "b");
        assert_eq!(root.color, Color::Black);
        assert_eq!(unsafe { root.left.unwrap().color() }, Color::Red);
        assert_eq!(unsafe { root.right.unwrap().color() }, Color::Red);

        assert_eq!(map.depth("b"), 1);
        assert_eq!(map.depth("a"), 2);
        assert_eq!(map.depth("c"), 2);
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        // worst case for a plain BST, which would degrade to a list
        let map = map_of(&["a", "b", "c", "d", "e", "f", "g"]);
        assert_eq!(map.len(), 7);
        assert!(map.is_valid());
        assert!(map.depth("g") <= 4, "depth was {}", map.depth("g"));
        for key in ["a", "b", "c", "d", "e", "f", "g"] {
            assert!(map.depth(key) >= 1);
        }
    }

    #[test]
    fn get_is_case_insensitive() {
        let map = map_of(&["Apple", "banana", "CHERRY"]);
        assert_eq!(map.get("apple"), Some(&0));
        assert_eq!(map.get("APPLE"), Some(&0));
        assert_eq!(map.get("Banana"), Some(&1));
        assert_eq!(map.get("cherry"), Some(&2));
        assert_eq!(map.get("durian"), None);
        assert_eq!(map.get_key_value("cHeRrY"), Some(("CHERRY", &2)));
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let mut map = RedBlackMap::new();
        map.insert("Apple".to_owned(), 1);
        map.insert("apple".to_owned(), 2);
        map.insert("APPLE".to_owned(), 3);

        assert_eq!(map.len(), 1);
        // the first spelling and value stay
        assert_eq!(map.get_key_value("aPpLe"), Some(("Apple", &1)));
        assert!(map.is_valid());
    }

    #[test]
    fn unicode_case_folding() {
        let mut map = RedBlackMap::new();
        map.insert("Ärger".to_owned(), 1);
        map.insert("ärger".to_owned(), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("ÄRGER"), Some(&1));
    }

    #[test]
    fn get_mut() {
        let mut map = map_of(&["x", "y"]);
        *map.get_mut("X").unwrap() = 42;
        assert_eq!(map.get("x"), Some(&42));
        assert_eq!(map.get_mut("z"), None);
    }

    #[test]
    fn delete_only_node() {
        let mut map = map_of(&["solo"]);
        assert_eq!(map.delete("SOLO"), Some(("solo".to_owned(), 0)));
        assert!(map.is_empty());
        assert!(map.is_valid());
        assert_eq!(map.delete("solo"), None);
        assert_eq!(map.get("solo"), None);
    }

    #[test]
    fn delete_in_reverse_insertion_order() {
        let keys = ["m", "f", "t", "c", "i", "p", "w", "a", "d", "g"];
        let mut map = map_of(&keys);
        assert_eq!(map.len(), keys.len());

        for (i, key) in keys.iter().enumerate().rev() {
            let removed = map.delete(key);
            assert_eq!(removed, Some(((*key).to_owned(), i as i32)));
            assert!(map.is_valid(), "invalid after deleting {key}: {map:#?}");
            assert_eq!(map.len(), i);
            assert_eq!(map.get(key), None);
            // second delete of the same key is a no-op
            assert_eq!(map.delete(key), None);
            assert_eq!(map.len(), i);
        }
        assert!(map.is_empty());
    }

    #[test]
    fn delete_node_with_two_children() {
        // "m" ends up as an interior node with two subtrees; removing it
        // exercises the successor replacement path
        let mut map = map_of(&["m", "f", "t", "c", "i", "p", "w"]);
        assert_eq!(map.delete("m"), Some(("m".to_owned(), 0)));
        assert!(map.is_valid());
        assert_eq!(map.len(), 6);
        for key in ["f", "t", "c", "i", "p", "w"] {
            assert!(map.get(key).is_some());
        }
    }

    #[test]
    fn delete_mixed_case_regression() {
        let keys = ["Oslo", "lima", "QUITO", "cairo", "Accra", "baku", "TUNIS"];
        let mut map = map_of(&keys);

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.delete(&key.to_uppercase()), Some(((*key).to_owned(), i as i32)));
            assert!(map.is_valid(), "invalid after deleting {key}");
        }
        assert!(map.is_empty());
    }

    #[test]
    fn depth_tracks_structure() {
        let map = map_of(&["b", "a", "c"]);
        assert_eq!(map.depth("B"), 1);
        assert_eq!(map.depth("A"), 2);
        assert_eq!(map.depth("C"), 2);
        assert_eq!(map.depth("nope"), 0);
    }

    mod proptests {
        use std::collections::HashMap;

        use proptest::prelude::*;
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        use super::*;

        #[cfg(not(miri))]
        const MAP_SIZE: usize = 300;
        #[cfg(miri)]
        const MAP_SIZE: usize = 30;

        #[cfg(not(miri))]
        const PROPTEST_CASES: u32 = 300;
        #[cfg(miri)]
        const PROPTEST_CASES: u32 = 10;

        // small alphabet with both cases so that case-folded duplicates
        // actually show up
        const KEY: &str = "[a-dA-D]{1,4}";

        proptest!(
            #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

            #[test]
            fn insert_get(
                inserts in proptest::collection::vec(KEY, 0..MAP_SIZE),
                access in proptest::collection::vec(KEY, 0..16),
            ) {
                let mut model: HashMap<String, i32> = HashMap::new();
                let mut map = RedBlackMap::new();
                for (i, key) in inserts.iter().enumerate() {
                    model.entry(key.to_lowercase()).or_insert(i as i32);
                    map.insert(key.clone(), i as i32);
                    prop_assert!(map.is_valid());
                    prop_assert_eq!(map.len(), model.len());
                }

                for key in inserts.iter().chain(access.iter()) {
                    prop_assert_eq!(map.get(key), model.get(&key.to_lowercase()));
                }
            }

            #[test]
            fn delete(
                inserts in proptest::collection::vec(KEY, 0..MAP_SIZE),
                access in proptest::collection::vec(KEY, 0..16),
            ) {
                let mut model: HashMap<String, i32> = HashMap::new();
                let mut map = RedBlackMap::new();
                for (i, key) in inserts.iter().enumerate() {
                    model.entry(key.to_lowercase()).or_insert(i as i32);
                    map.insert(key.clone(), i as i32);
                }

                let mut order = inserts.clone();
                order.shuffle(&mut thread_rng());
                for key in order.iter().chain(access.iter()) {
                    let expected = model.remove(&key.to_lowercase());
                    prop_assert_eq!(map.delete(key).map(|(_, v)| v), expected);
                    prop_assert!(map.is_valid());
                    prop_assert_eq!(map.len(), model.len());
                }
            }

            #[test]
            fn mixed_ops(
                ops in proptest::collection::vec((KEY, proptest::bool::ANY), 0..MAP_SIZE),
            ) {
                let mut model: HashMap<String, i32> = HashMap::new();
                let mut map = RedBlackMap::new();
                for (i, (key, is_insert)) in ops.iter().enumerate() {
                    if *is_insert {
                        model.entry(key.to_lowercase()).or_insert(i as i32);
                        map.insert(key.clone(), i as i32);
                    } else {
                        let expected = model.remove(&key.to_lowercase());
                        prop_assert_eq!(map.delete(key).map(|(_, v)| v), expected);
                    }
                    prop_assert!(map.is_valid());
                    prop_assert_eq!(map.len(), model.len());
                }
            }

            #[test]
            fn depth_is_logarithmic(
                inserts in proptest::collection::hash_set("[a-z]{1,8}", 1..MAP_SIZE),
            ) {
                let mut map = RedBlackMap::new();
                for key in &inserts {
                    map.insert(key.clone(), ());
                }

                // red-black trees guarantee height <= 2*log2(n + 1)
                let n = map.len() as f64;
                let bound = (2.0 * (n + 1.0).log2() + 1.0) as usize;
                for key in &inserts {
                    let depth = map.depth(key);
                    prop_assert!(
                        depth <= bound,
                        "depth {} of {:?} exceeds bound {} for {} keys",
                        depth, key, bound, map.len()
                    );
                }
            }
        );
    }
}
