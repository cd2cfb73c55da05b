//! The random number generators of `seedling`

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Return a pseudo-random seed, drawn from the OS entropy behind
/// [`std::collections::hash_map::RandomState`].
#[must_use]
pub fn random_seed() -> u64 {
    use std::{
        collections::hash_map::RandomState,
        hash::{BuildHasher, Hasher},
    };
    RandomState::new().build_hasher().finish()
}

// https://prng.di.unimi.it/splitmix64.c
fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// The standard [`Rand`] implementation for `seedling`.
///
/// It is usually the right choice, with very good speed and a reasonable randomness.
/// Not cryptographically secure (which is not what you want during fuzzing ;) )
pub type StdRand = RomuDuoJrRand;

/// Faster and almost unbiased alternative to `rand % n`.
///
/// See: [An optimal algorithm for bounded random integers](https://github.com/apple/swift/pull/39143).
#[inline]
#[must_use]
fn fast_bound(rand: u64, n: usize) -> usize {
    let mul = u128::from(rand).wrapping_mul(u128::from(n as u64));
    (mul >> 64) as usize
}

/// Ways to get random around here.
/// Please note that these are not cryptographically secure.
/// Or, even if some might be by accident, at least they are not seeded in a cryptographically secure fashion.
pub trait Rand: Debug + Serialize + DeserializeOwned {
    /// Sets the seed of this Rand
    fn set_seed(&mut self, seed: u64);

    /// Gets the next 64 bit value
    fn next(&mut self) -> u64;

    /// Gets a value between 0.0 (inclusive) and 1.0 (exclusive)
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    fn next_float(&mut self) -> f64 {
        // both 2^53 and 2^-53 can be represented in f64 exactly
        const MAX: u64 = 1u64 << 53;
        const MAX_DIV: f64 = 1.0 / (MAX as f64);
        let u = self.next() & MAX.wrapping_sub(1);
        u as f64 * MAX_DIV
    }

    /// Returns true with specified probability
    #[inline]
    fn coinflip(&mut self, success_prob: f64) -> bool {
        debug_assert!((0.0..=1.0).contains(&success_prob));
        self.next_float() < success_prob
    }

    /// Gets a value below the given bound (exclusive)
    #[inline]
    fn below(&mut self, upper_bound_excl: usize) -> usize {
        debug_assert_ne!(upper_bound_excl, 0);
        fast_bound(self.next(), upper_bound_excl)
    }

    /// Gets a value between the given lower bound (inclusive) and upper bound (inclusive)
    #[inline]
    fn between(&mut self, lower_bound_incl: usize, upper_bound_incl: usize) -> usize {
        debug_assert!(lower_bound_incl <= upper_bound_incl);
        lower_bound_incl + self.below(upper_bound_incl - lower_bound_incl + 1)
    }

    /// Draws a uniform byte
    #[inline]
    fn next_byte(&mut self) -> u8 {
        self.below(256) as u8
    }

    /// Choose an item at random from the given slice, sampling uniformly.
    /// Returns `None` for an empty slice.
    #[inline]
    fn choose<'a, T>(&mut self, from: &'a [T]) -> Option<&'a T> {
        if from.is_empty() {
            None
        } else {
            Some(&from[self.below(from.len())])
        }
    }
}

/// Sample from a geometric distribution with the given mean.
///
/// Used by the havoc mutators to pick how many mutations to stack and how
/// many contiguous bytes each one touches.
#[must_use]
pub fn sample_geometric<R: Rand>(rand: &mut R, mean: f64) -> usize {
    let p = 1.0 / mean;
    let uniform = rand.next_float();
    let v = ((1.0 - uniform).ln() / (1.0 - p).ln()).ceil();
    if v < 0.0 {
        0
    } else {
        v as usize
    }
}

macro_rules! impl_default_new {
    ($rand: ty) => {
        impl Default for $rand {
            /// Creates a generator seeded with [`random_seed`].
            fn default() -> Self {
                Self::with_seed(random_seed())
            }
        }

        impl $rand {
            /// Creates a generator seeded with [`random_seed`].
            #[must_use]
            pub fn new() -> Self {
                Self::with_seed(random_seed())
            }
        }
    };
}

impl_default_new!(RomuDuoJrRand);

/// see <https://arxiv.org/pdf/2002.11331.pdf>
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct RomuDuoJrRand {
    x_state: u64,
    y_state: u64,
}

impl RomuDuoJrRand {
    /// Creates a new `RomuDuoJrRand` with the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let mut rand = Self {
            x_state: 0,
            y_state: 0,
        };
        rand.set_seed(seed);
        rand
    }
}

impl Rand for RomuDuoJrRand {
    fn set_seed(&mut self, mut seed: u64) {
        self.x_state = splitmix64(&mut seed);
        self.y_state = splitmix64(&mut seed);
    }

    #[inline]
    #[allow(clippy::unreadable_literal)]
    fn next(&mut self) -> u64 {
        let xp = self.x_state;
        self.x_state = 15241094284759029579_u64.wrapping_mul(self.y_state);
        self.y_state = self.y_state.wrapping_sub(xp).rotate_left(27);
        xp
    }
}
