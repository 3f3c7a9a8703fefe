use super::Data;

/// Wraps a buffer that is known to contain only zero bytes.
///
/// Serialization code that only writes the fields it cares about takes a [ZeroedData]
/// so that everything it doesn't touch is guaranteed to end up zeroed on disk.
pub struct ZeroedData<D: AsRef<[u8]> + AsMut<[u8]>> {
    data: D,
}

impl ZeroedData<Data> {
    pub fn new(len: usize) -> Self {
        Self {
            data: Data::from(vec![0; len]),
        }
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> ZeroedData<D> {
    /// Overwrite an existing buffer with zeroes, e.g. a block that is about to be reused
    /// for a different kind of content.
    pub fn fill_with_zeroes(mut data: D) -> Self {
        data.as_mut().fill(0);
        Self { data }
    }

    pub fn into_inner(self) -> D {
        self.data
    }
}
