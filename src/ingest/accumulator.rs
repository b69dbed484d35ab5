/// Bounded batch owned by a single worker.
///
/// Never shared between tasks: each worker fills its own accumulator and
/// only the leftovers are merged at the end-of-pass barrier.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    batch_size: usize,
    pending: Vec<T>,
}

impl<T> BatchAccumulator<T> {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    /// Add an item; returns a full batch once `batch_size` items are pending.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.pending.push(item);
        if self.pending.len() >= self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Remove and return whatever is pending.
    pub fn take(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Re-split merged leftovers into batches of at most `batch_size`.
pub fn rebatch<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(batch_size),
            ));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_emits_full_batches() {
        let mut acc = BatchAccumulator::new(2);
        assert!(acc.push(1).is_none());
        assert_eq!(acc.push(2), Some(vec![1, 2]));
        assert!(acc.is_empty());
        assert!(acc.push(3).is_none());
        assert_eq!(acc.take(), vec![3]);
    }

    #[test]
    fn test_rebatch_respects_bound() {
        let batches = rebatch((0..7).collect(), 3);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        assert!(rebatch(Vec::<u8>::new(), 3).is_empty());
    }
}
