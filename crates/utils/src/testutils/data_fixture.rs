use divrem::DivCeil;
use rand::{rngs::SmallRng, RngCore, SeedableRng};

use crate::data::Data;

const SECTION_SIZE: u64 = 2 * 1024;

/// Random but reproducible bytes of the given length.
pub fn data_fixture(len: usize, seed: u64) -> Data {
    Data::from(DataFixture::new(seed).get(len))
}

/// An endless reproducible pseudo-random byte stream.
///
/// The stream is cut into sections that are each generated by their own RNG, so any
/// window of the stream can be produced without generating what comes before it. Tests
/// use this to know the expected content of a blob at an arbitrary offset.
pub struct DataFixture {
    seed: u64,
}

impl DataFixture {
    pub fn new(seed: u64) -> Self {
        // Run the seed through the RNG once so that neighboring seeds don't produce
        // overlapping section seeds.
        let seed = SmallRng::seed_from_u64(seed).next_u64();
        Self { seed }
    }

    pub fn generate(&self, offset: u64, dest: &mut [u8]) {
        let mut written = 0;
        while written < dest.len() {
            let position = offset + written as u64;
            let section_index = position / SECTION_SIZE;
            let in_section_offset = (position % SECTION_SIZE) as usize;
            let num_bytes =
                (SECTION_SIZE as usize - in_section_offset).min(dest.len() - written);
            self._generate_section(
                section_index,
                in_section_offset,
                &mut dest[written..written + num_bytes],
            );
            written += num_bytes;
        }
    }

    pub fn get(&self, len: usize) -> Vec<u8> {
        let mut data = vec![0; len];
        self.generate(0, &mut data);
        data
    }

    fn _generate_section(&self, section_index: u64, in_section_offset: usize, dest: &mut [u8]) {
        assert!(in_section_offset + dest.len() <= SECTION_SIZE as usize);
        let mut rng = SmallRng::seed_from_u64(self.seed.wrapping_add(section_index));
        // fill_bytes works in 8 byte steps, so generate a multiple of that to stay deterministic
        let generated_len = DivCeil::div_ceil(in_section_offset + dest.len(), 8) * 8;
        let mut section = vec![0u8; generated_len];
        rng.fill_bytes(&mut section);
        dest.copy_from_slice(&section[in_section_offset..in_section_offset + dest.len()]);
    }
}
