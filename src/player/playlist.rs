//! Play order of a playlist.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Playback modes requested with a playlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayOptions {
    pub shuffle: bool,
    pub repeat: bool,
}

/// Order in which the songs of a playlist are played, and the current entry.
///
/// Songs are referred to by their index in the loaded playlist; `order` is a
/// permutation of those indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    order: Vec<usize>,
    cursor: usize,
    shuffle: bool,
    repeat: bool,
}

impl Playlist {
    /// Creates the play order of `len` songs, shuffled if requested.
    pub fn new<R: Rng + ?Sized>(len: usize, options: PlayOptions, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        if options.shuffle {
            order.shuffle(rng);
        }
        Self {
            order,
            cursor: 0,
            shuffle: options.shuffle,
            repeat: options.repeat,
        }
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// Song indices in play order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Index of the current song.
    pub fn current(&self) -> Option<usize> {
        self.order.get(self.cursor).copied()
    }

    /// Moves on after the current song finished. Returns the next song, or `None`
    /// at the end of a non-repeating playlist.
    ///
    /// A repeating shuffled playlist is reshuffled on wraparound, never starting the
    /// new round with the song that just played.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<usize> {
        if self.cursor + 1 < self.order.len() {
            self.cursor += 1;
            return self.current();
        }
        if !self.repeat || self.order.is_empty() {
            return None;
        }

        if self.shuffle {
            let last = self.order[self.cursor];
            self.order.shuffle(rng);
            if self.order.len() > 1 && self.order[0] == last {
                let swap = rng.gen_range(1..self.order.len());
                self.order.swap(0, swap);
            }
        }
        self.cursor = 0;
        self.current()
    }

    /// Cursor a manual skip would land on, wrapping around only when repeating.
    pub fn peek_step(&self, forward: bool) -> Option<usize> {
        let len = self.order.len();
        if len == 0 {
            return None;
        }
        if forward {
            if self.cursor + 1 < len {
                Some(self.cursor + 1)
            } else if self.repeat {
                Some(0)
            } else {
                None
            }
        } else if self.cursor > 0 {
            Some(self.cursor - 1)
        } else if self.repeat {
            Some(len - 1)
        } else {
            None
        }
    }

    /// Skips one entry forward or back. Returns the new current song.
    pub fn step(&mut self, forward: bool) -> Option<usize> {
        self.cursor = self.peek_step(forward)?;
        self.current()
    }

    /// Turns shuffling on or off without changing the current song.
    ///
    /// Enabling shuffles only the entries after the current one; disabling restores
    /// the natural order and keeps the cursor on the current song.
    pub fn set_shuffle<R: Rng + ?Sized>(&mut self, enable: bool, rng: &mut R) {
        if enable == self.shuffle {
            return;
        }
        self.shuffle = enable;

        if enable {
            if self.cursor + 1 < self.order.len() {
                self.order[self.cursor + 1..].shuffle(rng);
            }
        } else if let Some(current) = self.current() {
            self.order.sort_unstable();
            self.cursor = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn options(shuffle: bool, repeat: bool) -> PlayOptions {
        PlayOptions { shuffle, repeat }
    }

    #[test]
    fn test_sequential_advance() {
        let mut rng = rng(1);
        let mut playlist = Playlist::new(3, options(false, false), &mut rng);
        assert_eq!(playlist.current(), Some(0));
        assert_eq!(playlist.advance(&mut rng), Some(1));
        assert_eq!(playlist.advance(&mut rng), Some(2));
        assert_eq!(playlist.advance(&mut rng), None);
        assert_eq!(playlist.current(), Some(2));
    }

    #[test]
    fn test_repeat_wraps() {
        let mut rng = rng(2);
        let mut playlist = Playlist::new(2, options(false, true), &mut rng);
        assert_eq!(playlist.advance(&mut rng), Some(1));
        assert_eq!(playlist.advance(&mut rng), Some(0));
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut rng = rng(3);
        let playlist = Playlist::new(10, options(true, false), &mut rng);
        let mut order = playlist.order().to_vec();
        order.sort_unstable();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_reshuffle_never_repeats_last_song_first() {
        for seed in 0..50 {
            let mut rng = rng(seed);
            let mut playlist = Playlist::new(3, options(true, true), &mut rng);
            playlist.advance(&mut rng);
            playlist.advance(&mut rng);
            let last = playlist.current();
            let first = playlist.advance(&mut rng);
            assert_ne!(first, last, "seed {}", seed);
        }
    }

    #[test]
    fn test_single_song_repeat() {
        let mut rng = rng(4);
        let mut playlist = Playlist::new(1, options(true, true), &mut rng);
        assert_eq!(playlist.advance(&mut rng), Some(0));
    }

    #[test]
    fn test_manual_steps() {
        let mut rng = rng(5);
        let mut playlist = Playlist::new(3, options(false, false), &mut rng);
        assert_eq!(playlist.peek_step(false), None);
        assert_eq!(playlist.step(true), Some(1));
        assert_eq!(playlist.step(false), Some(0));

        let mut repeating = Playlist::new(3, options(false, true), &mut rng);
        assert_eq!(repeating.step(false), Some(2));
        assert_eq!(repeating.step(true), Some(0));
    }

    #[test]
    fn test_set_shuffle_keeps_current() {
        let mut rng = rng(6);
        let mut playlist = Playlist::new(8, options(false, false), &mut rng);
        playlist.step(true);
        playlist.step(true);

        playlist.set_shuffle(true, &mut rng);
        assert_eq!(playlist.current(), Some(2));
        assert_eq!(&playlist.order()[..3], &[0, 1, 2]);

        playlist.step(true);
        let current = playlist.current();
        playlist.set_shuffle(false, &mut rng);
        assert_eq!(playlist.current(), current);
        assert_eq!(playlist.order(), &(0..8).collect::<Vec<_>>()[..]);
    }
}
