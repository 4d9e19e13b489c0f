//! Unbalanced kd-tree over point positions, used for aggregation
//!
//! Nodes are the points themselves: each point in aggregation mode carries its
//! children, a reference to the slot that points at it, and its split axis.
//! Inserting a point also searches for its nearest neighbor among the points
//! already in the tree, recording it in the point's aggregate state.
use crate::store::{MeshStore, PointId};

/// The slot holding a reference to a node
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) enum Link {
    #[default]
    Root,
    Left(PointId),
    Right(PointId),
}

/// Tree linkage stored in each point
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct KdNode {
    pub left: Option<PointId>,
    pub right: Option<PointId>,
    pub parent: Link,
    pub axis: usize,
}

/// kd-tree rooted in a mesh's points
pub struct KdTree {
    root: Option<PointId>,
    /// Scale applied to split-plane distances when pruning
    ///
    /// 1 gives exact nearest neighbors; larger values prune more subtrees and
    /// may miss the true nearest point.
    delta: f64,
}

impl KdTree {
    /// Builds an empty tree with the given pruning factor
    pub fn new(delta: f64) -> Self {
        Self { root: None, delta }
    }

    /// Forgets every node
    ///
    /// Points keep their stale linkage; it is overwritten on insertion.
    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Root node, if any
    #[cfg(test)]
    pub fn root(&self) -> Option<PointId> {
        self.root
    }

    fn node<'a>(&self, store: &'a MeshStore, p: PointId) -> &'a KdNode {
        &store[p].neighbor().node
    }

    fn node_mut<'a>(
        &self,
        store: &'a mut MeshStore,
        p: PointId,
    ) -> &'a mut KdNode {
        &mut store[p].neighbor_mut().node
    }

    fn get(&self, store: &MeshStore, link: Link) -> Option<PointId> {
        match link {
            Link::Root => self.root,
            Link::Left(p) => self.node(store, p).left,
            Link::Right(p) => self.node(store, p).right,
        }
    }

    fn set(&mut self, store: &mut MeshStore, link: Link, v: Option<PointId>) {
        match link {
            Link::Root => self.root = v,
            Link::Left(p) => self.node_mut(store, p).left = v,
            Link::Right(p) => self.node_mut(store, p).right = v,
        }
    }

    /// Inserts a point, recording its nearest neighbor in the tree
    ///
    /// The point must already be in aggregation mode.
    pub fn insert(&mut self, store: &mut MeshStore, p: PointId) {
        self.insert_rec(store, p, Link::Root, 0, true);
    }

    /// Re-inserts a point, refreshing its nearest neighbor
    pub fn update(&mut self, store: &mut MeshStore, p: PointId) {
        self.remove(store, p);
        self.insert(store, p);
    }

    /// Walks down from `link`, searching for a closer neighbor than the one
    /// currently recorded in `p` and (if `ins` is set) attaching `p` at the
    /// empty slot reached along the way.
    fn insert_rec(
        &mut self,
        store: &mut MeshStore,
        p: PointId,
        link: Link,
        axis: usize,
        ins: bool,
    ) {
        let Some(m) = self.get(store, link) else {
            if ins {
                let n = store[p].neighbor_mut();
                n.dist = f64::INFINITY;
                n.nearest = None;
                n.node = KdNode {
                    left: None,
                    right: None,
                    parent: link,
                    axis,
                };
                self.set(store, link, Some(p));
            }
            return;
        };

        let pos = store[p].pos;
        let mpos = store[m].pos;
        let d = pos[axis] - mpos[axis];
        let split = d * d * self.delta;
        let next = (axis + 1) % 3;

        let (near, far) = if d < 0.0 {
            (Link::Left(m), Link::Right(m))
        } else {
            (Link::Right(m), Link::Left(m))
        };
        self.insert_rec(store, p, near, next, ins);
        if store[p].neighbor().dist < split {
            return;
        }
        self.insert_rec(store, p, far, next, false);

        let dist = (pos - mpos).norm_squared();
        let n = store[p].neighbor_mut();
        if dist < n.dist {
            n.dist = dist;
            n.nearest = Some(m);
        }
    }

    /// Finds the node with the smallest coordinate on `axis` in a subtree
    fn find_min(
        &self,
        store: &MeshStore,
        n: Option<PointId>,
        axis: usize,
    ) -> Option<PointId> {
        let n = n?;
        let node = self.node(store, n);
        let coord = |p: PointId| store[p].pos[axis];

        let mut best = self.find_min(store, node.left, axis);
        // Right subtrees only need visiting when they are split on another axis
        if node.axis != axis {
            if let Some(r) = self.find_min(store, node.right, axis) {
                if best.is_none_or(|b| coord(r) < coord(b)) {
                    best = Some(r);
                }
            }
        }
        match best {
            Some(b) if coord(b) <= coord(n) => Some(b),
            _ => Some(n),
        }
    }

    /// Removes a point from the tree
    pub fn remove(&mut self, store: &mut MeshStore, p: PointId) {
        let node = *self.node(store, p);
        if node.right.is_none() {
            let Some(left) = node.left else {
                self.set(store, node.parent, None);
                return;
            };
            // Hang the left subtree on the right, so that the replacement is
            // the minimum of what's left.
            let n = self.node_mut(store, p);
            n.right = Some(left);
            n.left = None;
            self.node_mut(store, left).parent = Link::Right(p);
        }

        let right = self.node(store, p).right;
        let Some(q) = self.find_min(store, right, node.axis) else {
            unreachable!("non-empty subtree has a minimum");
        };
        self.remove(store, q);

        // Removing q may have rewritten p's links, so read them again
        let node = *self.node(store, p);
        *self.node_mut(store, q) = node;
        self.set(store, node.parent, Some(q));
        if let Some(l) = node.left {
            self.node_mut(store, l).parent = Link::Left(q);
        }
        if let Some(r) = node.right {
            self.node_mut(store, r).parent = Link::Right(q);
        }
    }

    /// Checks parent links and split ordering in the whole tree
    ///
    /// # Panics
    /// If the tree is inconsistent
    pub fn verify(&self, store: &MeshStore) -> usize {
        let mut count = 0;
        let mut todo = vec![];
        if let Some(r) = self.root {
            assert_eq!(self.node(store, r).parent, Link::Root);
            todo.push(r);
        }
        while let Some(n) = todo.pop() {
            count += 1;
            let node = self.node(store, n);
            let v = store[n].pos[node.axis];
            for (child, link) in [
                (node.left, Link::Left(n)),
                (node.right, Link::Right(n)),
            ] {
                let Some(c) = child else { continue };
                assert_eq!(self.node(store, c).parent, link, "bad parent link");
                assert_eq!(self.node(store, c).axis, (node.axis + 1) % 3);
                let mut sub = vec![c];
                while let Some(s) = sub.pop() {
                    let w = store[s].pos[node.axis];
                    match link {
                        Link::Left(_) => assert!(w < v, "left subtree too big"),
                        _ => assert!(w >= v, "right subtree too small"),
                    }
                    let sn = self.node(store, s);
                    sub.extend(sn.left.into_iter().chain(sn.right));
                }
                todo.push(c);
            }
        }
        count
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        data::Format,
        store::{Neighbor, Scratch, arena::Allocation},
    };
    use nalgebra::Vector3;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_points(n: usize, seed: u64) -> (MeshStore, Vec<PointId>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = MeshStore::new(Format::COORDS, Allocation::FreeList);
        let pts = (0..n)
            .map(|_| {
                let pos = Vector3::new(rng.r#gen(), rng.r#gen(), rng.r#gen());
                let p = store.new_point(pos);
                store[p].scratch = Scratch::Aggregate(Neighbor::default());
                p
            })
            .collect();
        (store, pts)
    }

    fn brute_force(store: &MeshStore, p: PointId, others: &[PointId]) -> f64 {
        others
            .iter()
            .filter(|q| **q != p)
            .map(|q| (store[*q].pos - store[p].pos).norm_squared())
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn nearest_on_insert() {
        let (mut store, pts) = random_points(300, 1);
        let mut tree = KdTree::new(1.0);
        for (i, p) in pts.iter().enumerate() {
            tree.insert(&mut store, *p);
            let expected = brute_force(&store, *p, &pts[..i]);
            assert_eq!(store[*p].neighbor().dist, expected);
        }
        assert_eq!(tree.verify(&store), 300);
    }

    #[test]
    fn remove_and_update() {
        let (mut store, pts) = random_points(200, 2);
        let mut tree = KdTree::new(1.0);
        for p in &pts {
            tree.insert(&mut store, *p);
        }
        // Remove every other point, including whatever is at the root
        let mut live = vec![];
        for (i, p) in pts.iter().enumerate() {
            if i % 2 == 0 || Some(*p) == tree.root() {
                tree.remove(&mut store, *p);
            } else {
                live.push(*p);
            }
            tree.verify(&store);
        }
        assert_eq!(tree.verify(&store), live.len());

        // Updating a point finds its nearest neighbor among all others
        for p in &live {
            tree.update(&mut store, *p);
            assert_eq!(store[*p].neighbor().dist, brute_force(&store, *p, &live));
        }
        assert_eq!(tree.verify(&store), live.len());

        for p in &live {
            tree.remove(&mut store, *p);
        }
        assert_eq!(tree.root(), None);
    }

    #[test]
    fn relaxed_search() {
        let (mut store, pts) = random_points(100, 3);
        let mut tree = KdTree::new(4.0);
        for (i, p) in pts.iter().enumerate().skip(1) {
            if i == 1 {
                tree.insert(&mut store, pts[0]);
            }
            tree.insert(&mut store, *p);
            // Pruning may miss the nearest point but always finds some point
            let n = store[*p].neighbor();
            assert!(n.nearest.is_some());
            assert!(n.dist >= brute_force(&store, *p, &pts[..i]));
        }
    }
}
