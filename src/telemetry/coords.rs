use crate::binding::Position;

/// Per-instance position trace accumulated since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateBuffers {
    per_instance: Vec<Vec<[i32; 3]>>,
}

impl CoordinateBuffers {
    pub fn new(num_agents: usize) -> Self {
        Self {
            per_instance: vec![Vec::new(); num_agents],
        }
    }

    /// Appends every non-sentinel sample and returns how many were kept.
    pub fn record(&mut self, positions: &[Position]) -> usize {
        let mut kept = 0;
        for (trace, pos) in self.per_instance.iter_mut().zip(positions) {
            if pos.is_sentinel() {
                continue;
            }
            trace.push(pos.triple());
            kept += 1;
        }
        kept
    }

    pub fn num_agents(&self) -> usize {
        self.per_instance.len()
    }

    pub fn instance(&self, index: usize) -> &[[i32; 3]] {
        self.per_instance.get(index).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[[i32; 3]])> {
        self.per_instance
            .iter()
            .enumerate()
            .map(|(i, trace)| (i, trace.as_slice()))
    }

    pub fn total_samples(&self) -> usize {
        self.per_instance.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_instance.iter().all(Vec::is_empty)
    }

    pub fn clear(&mut self) {
        for trace in &mut self.per_instance {
            trace.clear();
        }
    }

    /// Moves the samples out, leaving empty traces of the same shape.
    pub fn take(&mut self) -> CoordinateBuffers {
        let fresh = CoordinateBuffers::new(self.num_agents());
        std::mem::replace(self, fresh)
    }
}
