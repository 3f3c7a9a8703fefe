use anyhow::{ensure, Result};
use std::fmt::Debug;
use std::ops::{Bound, Deref, DerefMut, Range, RangeBounds};

/// An owned byte buffer that exposes only a window (the "region") of its allocation.
///
/// Cutting a header off the front or padding off the back with [Data::shrink_to_subregion]
/// just moves the window, nothing is copied. The bytes outside the window stay allocated
/// and can be brought back with [Data::grow_region], which is how block headers get
/// prepended without reallocating the payload.
#[derive(Clone, Eq)]
pub struct Data {
    storage: Vec<u8>,
    // Invariant: region.start <= region.end <= storage.len()
    region: Range<usize>,
}

impl Data {
    pub fn empty() -> Self {
        Vec::new().into()
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Narrow the window to `range`, given relative to the current window.
    pub fn shrink_to_subregion(&mut self, range: impl RangeBounds<usize> + Debug) {
        let len = self.region.len();
        let start = match range.start_bound() {
            Bound::Unbounded => 0,
            Bound::Included(&x) => x,
            Bound::Excluded(&x) => x + 1,
        };
        let end = match range.end_bound() {
            Bound::Unbounded => len,
            Bound::Included(&x) => x + 1,
            Bound::Excluded(&x) => x,
        };
        assert!(
            start <= end && end <= len,
            "Tried to access subregion {:?} of a Data instance with length {}",
            range,
            len,
        );
        self.region = (self.region.start + start)..(self.region.start + end);
        self._assert_region_invariant();
    }

    /// Widen the window by the given number of bytes on each side, reallocating if the
    /// allocation doesn't have them available.
    pub fn grow_region(&mut self, add_prefix_bytes: usize, add_suffix_bytes: usize) {
        self.reserve(add_prefix_bytes, add_suffix_bytes);
        self.grow_region_fail_if_reallocation_necessary(add_prefix_bytes, add_suffix_bytes)
            .expect("Enough bytes were just reserved");
    }

    /// Like [Data::grow_region] but fails instead of reallocating.
    pub fn grow_region_fail_if_reallocation_necessary(
        &mut self,
        add_prefix_bytes: usize,
        add_suffix_bytes: usize,
    ) -> Result<()> {
        ensure!(
            self.available_prefix_bytes() >= add_prefix_bytes,
            "Tried to add {} prefix bytes but only {} are available",
            add_prefix_bytes,
            self.available_prefix_bytes(),
        );
        ensure!(
            self.available_suffix_bytes() >= add_suffix_bytes,
            "Tried to add {} suffix bytes but only {} are available",
            add_suffix_bytes,
            self.available_suffix_bytes(),
        );
        self.region = (self.region.start - add_prefix_bytes)..(self.region.end + add_suffix_bytes);
        self._assert_region_invariant();
        Ok(())
    }

    /// Make sure at least this many bytes are available outside the window on each side.
    /// Newly allocated bytes are zero.
    pub fn reserve(&mut self, prefix_bytes: usize, suffix_bytes: usize) {
        if self.available_prefix_bytes() < prefix_bytes
            || self.available_suffix_bytes() < suffix_bytes
        {
            let len = self.region.len();
            let mut storage = vec![0; prefix_bytes + len + suffix_bytes];
            storage[prefix_bytes..(prefix_bytes + len)].copy_from_slice(self.as_ref());
            self.storage = storage;
            self.region = prefix_bytes..(prefix_bytes + len);
            self._assert_region_invariant();
        }
    }

    pub fn available_prefix_bytes(&self) -> usize {
        self.region.start
    }

    pub fn available_suffix_bytes(&self) -> usize {
        self.storage.len() - self.region.end
    }

    /// Change the window length by moving its end. Growing exposes whatever bytes the
    /// allocation holds there, or zeroes if it has to reallocate.
    pub fn resize(&mut self, new_len: usize) {
        let len = self.region.len();
        if new_len < len {
            self.shrink_to_subregion(..new_len);
        } else {
            self.grow_region(0, new_len - len);
        }
    }

    fn _assert_region_invariant(&self) {
        assert!(
            self.region.start <= self.region.end && self.region.end <= self.storage.len(),
            "Region invariant violated: region {:?} with storage size {}",
            self.region,
            self.storage.len(),
        );
    }
}

impl From<Vec<u8>> for Data {
    fn from(storage: Vec<u8>) -> Data {
        let region = 0..storage.len();
        Self { storage, region }
    }
}

impl From<&[u8]> for Data {
    fn from(data: &[u8]) -> Data {
        data.to_vec().into()
    }
}

impl AsRef<[u8]> for Data {
    fn as_ref(&self) -> &[u8] {
        &self.storage[self.region.clone()]
    }
}

impl AsMut<[u8]> for Data {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.region.clone()]
    }
}

impl Deref for Data {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut()
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Data) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl Debug for Data {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "Data({})", hex::encode_upper(self.as_ref()))
    }
}
