// Fixed-size scratch list. Snapshots are taken under the scheduler lock
// and walked after it is released, so nothing here ever allocates.

pub(crate) struct Batch<X, const N: usize> {
    items: [Option<X>; N],
    len: usize,
}

impl<X: Copy, const N: usize> Batch<X, N> {
    pub(crate) const fn new() -> Self {
        Self {
            items: [None; N],
            len: 0,
        }
    }

    /// Silently drops `item` when full.
    pub(crate) fn push(&mut self, item: X) -> bool {
        if self.len >= N {
            return false;
        }
        self.items[self.len] = Some(item);
        self.len += 1;
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<X, const N: usize> IntoIterator for Batch<X, N> {
    type Item = X;
    type IntoIter = core::iter::Flatten<core::array::IntoIter<Option<X>, N>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter().flatten()
    }
}
