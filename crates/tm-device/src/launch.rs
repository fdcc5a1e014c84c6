use std::fmt;

/// A three-component extent or index, used for grid and block shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Dim3 {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Dim3 { x, y, z }
    }

    /// A two-dimensional extent with `z = 1`.
    pub const fn xy(x: usize, y: usize) -> Self {
        Dim3 { x, y, z: 1 }
    }

    /// Total number of points covered by this extent.
    pub fn volume(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Returns true if any component is zero.
    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    /// Converts a linear index into a coordinate within this extent (x fastest).
    pub fn delinearize(&self, index: usize) -> Dim3 {
        Dim3 {
            x: index % self.x,
            y: (index / self.x) % self.y,
            z: index / (self.x * self.y),
        }
    }

    /// Converts a coordinate within this extent into a linear index (x fastest).
    pub fn linearize(&self, at: Dim3) -> usize {
        (at.z * self.y + at.y) * self.x + at.x
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Ceiling division for launch sizing.
pub fn ceil_div(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor)
}

/// Grid and block shape for a single kernel launch, plus the number of
/// f32 cells of shared memory each work-group needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_floats: usize,
}

impl LaunchConfig {
    /// Builds a configuration whose `width x width` work-groups cover a
    /// `rows x cols` output.
    ///
    /// The grid is `(ceil(cols / width), ceil(rows / width), 1)`: x walks
    /// output columns and y walks output rows. When either dimension is not
    /// a multiple of `width` the last group along it is only partially
    /// used; kernels guard their own excess workers.
    pub fn covering(rows: usize, cols: usize, width: usize, shared_floats: usize) -> Self {
        LaunchConfig {
            grid: Dim3::xy(ceil_div(cols, width), ceil_div(rows, width)),
            block: Dim3::xy(width, width),
            shared_floats,
        }
    }

    /// Number of workers in each work-group.
    pub fn threads_per_block(&self) -> usize {
        self.block.volume()
    }

    /// Number of work-groups in the grid.
    pub fn num_groups(&self) -> usize {
        self.grid.volume()
    }

    /// Shared memory each work-group needs, in bytes.
    pub fn shared_bytes(&self) -> usize {
        self.shared_floats * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(32, 16), 2);
        assert_eq!(ceil_div(33, 16), 3);
        assert_eq!(ceil_div(1, 16), 1);
        assert_eq!(ceil_div(0, 16), 0);
    }

    #[test]
    fn test_covering_exact() {
        let cfg = LaunchConfig::covering(32, 64, 16, 0);
        assert_eq!(cfg.grid, Dim3::xy(4, 2));
        assert_eq!(cfg.block, Dim3::xy(16, 16));
        assert_eq!(cfg.threads_per_block(), 256);
        assert_eq!(cfg.num_groups(), 8);
    }

    #[test]
    fn test_covering_ragged() {
        // 17 rows x 5 cols needs a second (mostly idle) row of groups.
        let cfg = LaunchConfig::covering(17, 5, 16, 512);
        assert_eq!(cfg.grid, Dim3::xy(1, 2));
        assert!(cfg.grid.x * cfg.block.x >= 5);
        assert!(cfg.grid.y * cfg.block.y >= 17);
        assert_eq!(cfg.shared_bytes(), 2048);
    }

    #[test]
    fn test_covering_single_element() {
        let cfg = LaunchConfig::covering(1, 1, 16, 0);
        assert_eq!(cfg.grid, Dim3::xy(1, 1));
        assert_eq!(cfg.threads_per_block(), 256);
    }

    #[test]
    fn test_linearize_roundtrip() {
        let grid = Dim3::new(3, 4, 2);
        for i in 0..grid.volume() {
            assert_eq!(grid.linearize(grid.delinearize(i)), i);
        }
        assert_eq!(grid.delinearize(5), Dim3::new(2, 1, 0));
        assert_eq!(grid.delinearize(12), Dim3::new(0, 0, 1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Dim3::xy(2, 3).to_string(), "(2, 3, 1)");
    }
}
