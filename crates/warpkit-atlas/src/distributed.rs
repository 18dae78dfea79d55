//! Collective communication between atlas replicas.
//!
//! Every rank holds a full copy of the atlas and fits the affine parameters
//! of its own shard. Ranks only meet in [`ProcessGroup::all_reduce_sum`],
//! which every rank must call the same number of times.

use std::sync::{Arc, Barrier, Mutex};

use crate::error::{AtlasError, Result};

/// Abstract all-reduce backend.
pub trait ProcessGroup: Send + Sync {
    /// In-place sum all-reduce: afterwards `buf` holds the element-wise sum
    /// across all ranks.
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()>;

    /// Total number of ranks in the group.
    fn world_size(&self) -> usize;

    /// This rank's index (0-based).
    fn rank(&self) -> usize;
}

/// The trivial group of one process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn all_reduce_sum(&self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }
}

struct Shared {
    barrier: Barrier,
    sum: Mutex<Vec<f32>>,
}

/// Ranks running as threads of one process.
///
/// The collective accumulates into a shared buffer between two barrier
/// waits; a third wait keeps the next collective from clearing the buffer
/// before every rank has copied the result out.
pub struct LocalProcessGroup {
    rank_id: usize,
    world: usize,
    shared: Arc<Shared>,
}

impl LocalProcessGroup {
    /// Create one handle per rank, all sharing the same buffer.
    pub fn new_group(world_size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(world_size),
            sum: Mutex::new(Vec::new()),
        });
        (0..world_size)
            .map(|r| LocalProcessGroup {
                rank_id: r,
                world: world_size,
                shared: shared.clone(),
            })
            .collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<f32>>> {
        self.shared
            .sum
            .lock()
            .map_err(|_| AtlasError::distributed("a rank panicked during all-reduce"))
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<()> {
        // Every rank passes all four waits, whatever fails in between
        let reset = if self.shared.barrier.wait().is_leader() {
            self.lock().map(|mut sum| {
                sum.clear();
                sum.resize(buf.len(), 0.0);
            })
        } else {
            Ok(())
        };
        self.shared.barrier.wait();

        let accumulated = reset.and_then(|()| {
            let mut sum = self.lock()?;
            if sum.len() != buf.len() {
                return Err(AtlasError::distributed(format!(
                    "rank {} passed a buffer of {} values to a collective of a different size",
                    self.rank_id,
                    buf.len()
                )));
            }
            for (acc, v) in sum.iter_mut().zip(buf.iter()) {
                *acc += v;
            }
            Ok(())
        });
        self.shared.barrier.wait();

        let result = accumulated.and_then(|()| {
            buf.copy_from_slice(&self.lock()?);
            Ok(())
        });
        self.shared.barrier.wait();
        result
    }

    fn world_size(&self) -> usize {
        self.world
    }

    fn rank(&self) -> usize {
        self.rank_id
    }
}
