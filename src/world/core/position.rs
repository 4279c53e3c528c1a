use std::fmt;

/// Position of a chunk in the chunk lattice (chunk coordinates).
///
/// Each coordinate must fit in 16 signed bits so the triple packs into a
/// 64-bit residency key; the fourth 16-bit lane is reserved zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Pack the coordinates into the 64-bit residency key.
    pub fn pack(self) -> u64 {
        debug_assert!(
            self.x >= i16::MIN as i32
                && self.x <= i16::MAX as i32
                && self.y >= i16::MIN as i32
                && self.y <= i16::MAX as i32
                && self.z >= i16::MIN as i32
                && self.z <= i16::MAX as i32,
            "chunk coordinates must fit in 16 bits: {self}"
        );
        let x = self.x as i16 as u16 as u64;
        let y = self.y as i16 as u16 as u64;
        let z = self.z as i16 as u16 as u64;
        x | (y << 16) | (z << 32)
    }

    /// Inverse of [`ChunkPos::pack`].
    pub fn unpack(key: u64) -> Self {
        debug_assert_eq!(key >> 48, 0, "reserved key lane must be zero");
        Self {
            x: key as u16 as i16 as i32,
            y: (key >> 16) as u16 as i16 as i32,
            z: (key >> 32) as u16 as i16 as i32,
        }
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.x, self.y, self.z)
    }
}

/// Position of a voxel in the grid (voxel coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Chunk containing this voxel. Negative coordinates floor toward
    /// minus infinity.
    pub fn to_chunk_pos(self, edge: u32) -> ChunkPos {
        let edge = edge as i32;
        ChunkPos::new(
            self.x.div_euclid(edge),
            self.y.div_euclid(edge),
            self.z.div_euclid(edge),
        )
    }

    /// Index of this voxel within its chunk, x fastest.
    pub fn to_local_index(self, edge: u32) -> usize {
        let e = edge as i32;
        let lx = self.x.rem_euclid(e) as usize;
        let ly = self.y.rem_euclid(e) as usize;
        let lz = self.z.rem_euclid(e) as usize;
        let e = edge as usize;
        lx + e * (ly + e * lz)
    }
}

impl fmt::Display for VoxelPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.x, self.y, self.z)
    }
}

/// An axis-aligned box of voxels (or, via [`Region::to_chunk_region`], of
/// chunks): origin plus extent along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
    pub h: i32,
    pub d: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, z: i32, w: i32, h: i32, d: i32) -> Self {
        Self { x, y, z, w, h, d }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0 || self.d <= 0
    }

    /// Number of cells covered, zero for degenerate extents.
    pub fn cell_count(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.w as usize * self.h as usize * self.d as usize
        }
    }

    pub fn contains(&self, pos: VoxelPos) -> bool {
        pos.x >= self.x
            && pos.x < self.x + self.w
            && pos.y >= self.y
            && pos.y < self.y + self.h
            && pos.z >= self.z
            && pos.z < self.z + self.d
    }

    /// The smallest chunk-coordinate region covering every voxel of this
    /// region. Uses the inclusive max corner, so an exactly chunk-aligned
    /// region does not spill into a trailing chunk and an empty region maps
    /// to an empty region.
    pub fn to_chunk_region(&self, edge: u32) -> Region {
        if self.is_empty() {
            return Region::new(0, 0, 0, 0, 0, 0);
        }
        let min = VoxelPos::new(self.x, self.y, self.z).to_chunk_pos(edge);
        let max = VoxelPos::new(
            self.x + self.w - 1,
            self.y + self.h - 1,
            self.z + self.d - 1,
        )
        .to_chunk_pos(edge);
        Region::new(
            min.x,
            min.y,
            min.z,
            max.x - min.x + 1,
            max.y - min.y + 1,
            max.z - min.z + 1,
        )
    }

    /// Whether the chunk coordinate lies inside this chunk-space region.
    pub fn contains_chunk(&self, pos: ChunkPos) -> bool {
        self.contains(VoxelPos::new(pos.x, pos.y, pos.z))
    }

    /// Scan-order index of a chunk coordinate within this chunk-space
    /// region, x fastest. The chunk must lie inside the region.
    pub fn chunk_index(&self, pos: ChunkPos) -> usize {
        debug_assert!(self.contains_chunk(pos), "chunk {pos} outside region {self:?}");
        let lx = (pos.x - self.x) as usize;
        let ly = (pos.y - self.y) as usize;
        let lz = (pos.z - self.z) as usize;
        lx + self.w as usize * (ly + self.h as usize * lz)
    }

    /// Iterate the chunk coordinates of this chunk-space region in scan
    /// order (matching [`Region::chunk_index`]).
    pub fn chunk_positions(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        let (x0, y0, z0) = (self.x, self.y, self.z);
        let (w, h, d) = if self.is_empty() {
            (0, 0, 0)
        } else {
            (self.w, self.h, self.d)
        };
        (0..d).flat_map(move |dz| {
            (0..h).flat_map(move |dy| {
                (0..w).map(move |dx| ChunkPos::new(x0 + dx, y0 + dy, z0 + dz))
            })
        })
    }
}
