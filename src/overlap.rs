//! Frame-to-frame overlap bookkeeping.

/// Records which id pairs overlapped this frame and diffs against the
/// previous frame to detect begin and end of contact.
///
/// Keys pack two 16-bit ids into one `u32`, so tracked ids must stay below
/// `u16::MAX`.
#[derive(Clone, Debug, Default)]
pub struct OverlapKeeper {
    current: Vec<u32>,
    previous: Vec<u32>,
}

impl OverlapKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(id_a: u32, id_b: u32) -> u32 {
        debug_assert!(id_a <= u32::from(u16::MAX) && id_b <= u32::from(u16::MAX));
        let (low, high) = if id_a < id_b { (id_a, id_b) } else { (id_b, id_a) };
        (high << 16) | low
    }

    fn unpack(key: u32) -> (u32, u32) {
        (key >> 16, key & 0xffff)
    }

    /// Records that the two ids overlap this frame.
    pub fn set(&mut self, id_a: u32, id_b: u32) {
        let key = Self::key(id_a, id_b);
        match self.current.binary_search(&key) {
            Ok(_) => {}
            Err(position) => self.current.insert(position, key),
        }
    }

    /// Advances to the next frame: the current set becomes the previous one.
    pub fn tick(&mut self) {
        std::mem::swap(&mut self.current, &mut self.previous);
        self.current.clear();
    }

    /// Id pairs that appear this frame but not the previous one, and pairs
    /// that disappeared. Both lists are merge-scanned from the sorted key
    /// sets.
    pub fn diff(&self) -> (Vec<(u32, u32)>, Vec<(u32, u32)>) {
        let mut additions = Vec::new();
        let mut removals = Vec::new();

        let mut i = 0;
        let mut j = 0;
        while i < self.current.len() || j < self.previous.len() {
            if j == self.previous.len()
                || (i < self.current.len() && self.current[i] < self.previous[j])
            {
                additions.push(Self::unpack(self.current[i]));
                i += 1;
            } else if i == self.current.len() || self.previous[j] < self.current[i] {
                removals.push(Self::unpack(self.previous[j]));
                j += 1;
            } else {
                i += 1;
                j += 1;
            }
        }
        (additions, removals)
    }
}

/// Symmetric boolean matrix over body indices, stored as a packed lower
/// triangle. Used to tell fresh contacts from persisting ones.
#[derive(Clone, Debug, Default)]
pub struct CollisionMatrix {
    matrix: Vec<bool>,
}

impl CollisionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    fn element(index_a: usize, index_b: usize) -> usize {
        let (i, j) = if index_a > index_b {
            (index_a, index_b)
        } else {
            (index_b, index_a)
        };
        debug_assert!(i != j, "no self-collision entries");
        ((i * (i + 1)) >> 1) + j
    }

    pub fn get(&self, index_a: usize, index_b: usize) -> bool {
        self.matrix
            .get(Self::element(index_a, index_b))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, index_a: usize, index_b: usize, colliding: bool) {
        let element = Self::element(index_a, index_b);
        if element >= self.matrix.len() {
            self.matrix.resize(element + 1, false);
        }
        self.matrix[element] = colliding;
    }

    /// Resizes for `count` objects and clears all entries.
    pub fn reset(&mut self, count: usize) {
        self.matrix.clear();
        self.matrix.resize((count * (count + 1)) >> 1, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_report_additions_and_removals() {
        let mut keeper = OverlapKeeper::new();
        keeper.set(1, 2);
        keeper.set(5, 6);
        keeper.tick();
        keeper.set(1, 2);
        keeper.set(3, 4);

        let (additions, removals) = keeper.diff();
        assert_eq!(additions, vec![(4, 3)]);
        assert_eq!(removals, vec![(6, 5)]);
    }

    #[test]
    fn should_ignore_key_order_and_duplicates() {
        let mut keeper = OverlapKeeper::new();
        keeper.set(2, 1);
        keeper.set(1, 2);
        keeper.tick();
        keeper.set(1, 2);
        let (additions, removals) = keeper.diff();
        assert!(additions.is_empty());
        assert!(removals.is_empty());
    }

    #[test]
    fn should_track_pairs_symmetrically() {
        let mut matrix = CollisionMatrix::new();
        matrix.reset(4);
        matrix.set(0, 3, true);
        assert!(matrix.get(3, 0));
        assert!(!matrix.get(1, 2));
        matrix.reset(4);
        assert!(!matrix.get(0, 3));
    }
}
