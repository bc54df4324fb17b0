//! Part planning and file slicing.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Bounds the chunk planner works within. The floor and ceiling are
/// backend-imposed multipart limits.
#[derive(Debug, Clone)]
pub struct PartLimits {
    /// Preferred part count for a file.
    pub target_parts: u64,
    pub min_part_size: u64,
    pub max_part_size: u64,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            target_parts: 1000,
            min_part_size: 5 * 1024 * 1024,
            max_part_size: 100 * 1024 * 1024,
        }
    }
}

/// Fixed part layout for one session.
///
/// Computed once at session creation and never recomputed mid-session: a
/// resumed upload must reconstruct identical part boundaries from
/// `part_size` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub part_size: u64,
    pub total_parts: u32,
}

impl PartPlan {
    /// Plans parts for a file of `size` bytes. Pure and deterministic.
    ///
    /// Targets `limits.target_parts` parts, clamps the part size to the
    /// backend bounds, then derives the count. An empty file still owns
    /// part 1.
    pub fn for_size(size: u64, limits: &PartLimits) -> Self {
        let mut part_size = size.div_ceil(limits.target_parts);
        part_size = part_size.clamp(limits.min_part_size, limits.max_part_size);
        let total_parts = size.div_ceil(part_size).max(1) as u32;
        Self {
            part_size,
            total_parts,
        }
    }

    /// Reconstructs a plan persisted in a session record.
    pub fn from_record(part_size: u64, total_parts: u32) -> Self {
        Self {
            part_size,
            total_parts,
        }
    }

    /// Byte range `[start, end)` of a part, reproducible from the part
    /// number alone so a retry slices the exact same bytes.
    pub fn byte_range(&self, part_number: u32, file_size: u64) -> (u64, u64) {
        let start = (part_number as u64 - 1) * self.part_size;
        let end = (start + self.part_size).min(file_size);
        (start, end.max(start))
    }
}

/// Reads exactly the bytes of `[offset, offset + len)` from a file.
///
/// Blocking; callers on the runtime go through `spawn_blocking`.
pub fn read_part(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn plan_targets_one_thousand_parts() {
        let limits = PartLimits::default();
        // 20 GiB -> ~20 MiB parts, within bounds.
        let size = 20 * 1024 * MIB;
        let plan = PartPlan::for_size(size, &limits);
        assert_eq!(plan.part_size, size.div_ceil(1000));
        assert_eq!(plan.total_parts, 1000);
    }

    #[test]
    fn small_file_clamps_to_min_part_size() {
        let limits = PartLimits::default();
        // 45 MiB: naive target would be 46 KiB parts; floor kicks in.
        let plan = PartPlan::for_size(45 * MIB, &limits);
        assert_eq!(plan.part_size, 5 * MIB);
        assert_eq!(plan.total_parts, 9);
    }

    #[test]
    fn huge_file_clamps_to_max_part_size() {
        let limits = PartLimits::default();
        // 200 TiB would want 200 GiB parts; ceiling kicks in.
        let plan = PartPlan::for_size(200 * 1024 * 1024 * MIB, &limits);
        assert_eq!(plan.part_size, 100 * MIB);
    }

    #[test]
    fn total_parts_is_ceiling_of_size_over_part_size() {
        let limits = PartLimits::default();
        for size in [1, 5 * MIB - 1, 5 * MIB, 5 * MIB + 1, 45 * MIB, 99 * MIB] {
            let plan = PartPlan::for_size(size, &limits);
            assert_eq!(
                plan.total_parts as u64,
                size.div_ceil(plan.part_size),
                "size={size}"
            );
            assert!(plan.part_size >= limits.min_part_size);
            assert!(plan.part_size <= limits.max_part_size);
        }
    }

    #[test]
    fn empty_file_owns_one_part() {
        let plan = PartPlan::for_size(0, &PartLimits::default());
        assert_eq!(plan.total_parts, 1);
        assert_eq!(plan.byte_range(1, 0), (0, 0));
    }

    #[test]
    fn byte_ranges_tile_the_file_exactly() {
        let limits = PartLimits {
            target_parts: 1000,
            min_part_size: 4,
            max_part_size: 4,
        };
        let size = 10u64;
        let plan = PartPlan::for_size(size, &limits);
        assert_eq!(plan.total_parts, 3);
        assert_eq!(plan.byte_range(1, size), (0, 4));
        assert_eq!(plan.byte_range(2, size), (4, 8));
        // Final part is short.
        assert_eq!(plan.byte_range(3, size), (8, 10));
    }

    #[test]
    fn read_part_returns_exact_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        assert_eq!(read_part(&path, 0, 4).unwrap(), b"0123");
        assert_eq!(read_part(&path, 4, 4).unwrap(), b"4567");
        assert_eq!(read_part(&path, 8, 2).unwrap(), b"89");
        assert!(read_part(&path, 8, 4).is_err());
    }
}
