/// Inclusive block sub-ranges of at most `step` blocks, in ascending order.
///
/// The iterator is `Clone`, so a range can be walked again from the start.
/// A zero step is treated as one.
#[derive(Debug, Clone)]
pub struct BlockChunks {
    next: Option<u64>,
    end: u64,
    step: u64,
}

pub fn chunk_ranges(start: u64, end: u64, step: u64) -> BlockChunks {
    BlockChunks {
        next: (start <= end).then_some(start),
        end,
        step: step.max(1),
    }
}

impl Iterator for BlockChunks {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        let to = from.saturating_add(self.step - 1).min(self.end);
        self.next = if to < self.end { Some(to + 1) } else { None };
        Some((from, to))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            Some(from) => {
                let remaining = (self.end - from) / self.step + 1;
                let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
                (remaining, Some(remaining))
            }
            None => (0, Some(0)),
        }
    }
}

impl ExactSizeIterator for BlockChunks {}
