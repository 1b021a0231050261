use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

/// Symbols used in the random part of a barcode. `0`, `O`, `1` and `I` are
/// left out so codes survive being read aloud or copied by hand.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of the random suffix.
pub const CODE_LENGTH: usize = 5;

/// Generates client barcodes of the form `FFB-YYYYMM-XXXXX`.
///
/// No storage lookup is made: the `UNIQUE` constraint on `clients.barcode_id`
/// is the only collision check.
#[derive(Debug, Clone)]
pub struct BarcodeGenerator {
    prefix: String,
    seeded: Option<RefCell<StdRng>>,
}

impl Default for BarcodeGenerator {
    fn default() -> Self {
        BarcodeGenerator::new("FFB")
    }
}

impl BarcodeGenerator {
    pub fn new(prefix: &str) -> Self {
        BarcodeGenerator {
            prefix: prefix.to_string(),
            seeded: None,
        }
    }

    /// A generator that draws from a fixed seed instead of the thread RNG.
    pub fn with_seed(prefix: &str, seed: u64) -> Self {
        BarcodeGenerator {
            prefix: prefix.to_string(),
            seeded: Some(RefCell::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Generate a barcode stamped with the current year and month.
    pub fn generate(&self) -> String {
        let now = Utc::now();
        match &self.seeded {
            Some(rng) => self.generate_at(now, &mut *rng.borrow_mut()),
            None => self.generate_at(now, &mut rand::thread_rng()),
        }
    }

    /// Generate a barcode for a given moment using the supplied RNG.
    pub fn generate_at<R: Rng + ?Sized>(&self, at: DateTime<Utc>, rng: &mut R) -> String {
        let code: String = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!("{}-{}-{}", self.prefix, at.format("%Y%m"), code)
    }

    /// Whether `value` looks like a barcode issued by this generator.
    pub fn is_well_formed(&self, value: &str) -> bool {
        let mut parts = value.splitn(3, '-');
        let (Some(prefix), Some(month), Some(code)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        prefix == self.prefix
            && month.len() == 6
            && month.bytes().all(|b| b.is_ascii_digit())
            && code.len() == CODE_LENGTH
            && code.bytes().all(|b| ALPHABET.contains(&b))
    }
}
