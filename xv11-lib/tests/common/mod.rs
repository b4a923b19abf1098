#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use xv11::frame::{patch_checksum, FRAMES_PER_REVOLUTION, FRAME_LEN, INDEX_BASE, START};

/// Valid frame bytes for `position` (taken modulo a revolution).
pub fn frame_bytes(position: usize) -> [u8; FRAME_LEN] {
    let pos = position % FRAMES_PER_REVOLUTION;
    let mut dat = [0u8; FRAME_LEN];
    dat[0] = START;
    dat[1] = INDEX_BASE + u8::try_from(pos).unwrap();
    dat[2..4].copy_from_slice(&(300u16 * 64).to_le_bytes());
    for i in 0..4 {
        let distance = u16::try_from(100 + pos * 4 + i).unwrap();
        let start = 4 + i * 4;
        dat[start..start + 2].copy_from_slice(&distance.to_le_bytes());
        dat[start + 2..start + 4].copy_from_slice(&50u16.to_le_bytes());
    }
    patch_checksum(&mut dat);
    dat
}

/// Frame bytes for `position` with a single bit flipped so the checksum fails.
pub fn corrupt_frame_bytes(position: usize) -> [u8; FRAME_LEN] {
    let mut dat = frame_bytes(position);
    dat[8] ^= 0x01;
    dat
}

/// Builds synthetic sensor byte streams.
#[derive(Default)]
pub struct Stream {
    dat: Vec<u8>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Random bytes that never contain a start marker.
    pub fn garbage(mut self, len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.dat.extend((0..len).map(|_| rng.gen_range(0..START)));
        self
    }

    pub fn frames(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        for pos in positions {
            self.dat.extend_from_slice(&frame_bytes(pos));
        }
        self
    }

    pub fn revolution(self) -> Self {
        self.frames(0..FRAMES_PER_REVOLUTION)
    }

    /// A full revolution where the frames at `corrupt` positions fail their checksum.
    pub fn revolution_with(mut self, corrupt: &[usize]) -> Self {
        for pos in 0..FRAMES_PER_REVOLUTION {
            if corrupt.contains(&pos) {
                self.dat.extend_from_slice(&corrupt_frame_bytes(pos));
            } else {
                self.dat.extend_from_slice(&frame_bytes(pos));
            }
        }
        self
    }

    pub fn raw(mut self, dat: &[u8]) -> Self {
        self.dat.extend_from_slice(dat);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.dat
    }
}

/// A single revolution starting at index 0 is exactly what the default 45 frame
/// synchronization consumes: 45 to lock and 45 discarded to reach the next revolution.
pub fn sync_prefix() -> Stream {
    Stream::new().revolution()
}
