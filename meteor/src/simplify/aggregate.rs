//! Nearest-pair point aggregation
use crate::{
    Error, Mesh,
    mesh::Mode,
    store::{Neighbor, Scratch},
};

impl Mesh {
    /// Contracts the two closest points in the mesh into their midpoint
    ///
    /// Unlike [`merge`](Self::merge), the pair doesn't need to share an edge;
    /// triangles are fixed up the same way.  Returns the number of points
    /// removed, which is 0 once fewer than two points remain.
    pub fn aggregate(&mut self) -> Result<usize, Error> {
        if self.is_building() {
            return self.latch(Err(Error::BuildInProgress("aggregate points")));
        }
        if self.mode != Mode::Aggregate {
            self.enter_aggregate_mode();
        }
        let r = self.contract_top();
        self.note_removed(r);
        Ok(r.points)
    }

    /// Rebuilds the kd-tree and heap keyed by nearest-neighbor distance
    fn enter_aggregate_mode(&mut self) {
        self.heap.seal();
        self.heap.unsort();

        let orphans: Vec<_> = self
            .heap
            .points()
            .iter()
            .copied()
            .filter(|p| self.store[*p].triangles().is_empty())
            .collect();
        for p in orphans {
            self.delete_point(p);
        }

        self.kd.clear();
        for i in 0..self.heap.len() {
            let p = self.heap.points()[i];
            self.store[p].scratch = Scratch::Aggregate(Neighbor::default());
            self.kd.insert(&mut self.store, p);
        }
        while self.heap.pending() > 0 {
            let p = self.heap.points()[self.heap.size()];
            self.heap.insert(&mut self.store, p);
        }
        self.mode = Mode::Aggregate;
        log::debug!("built kd-tree over {} points", self.point_count());
    }
}
