//! Key and row generation (C8): YCSB-style key choosers
//! (Uniform/Zipfian/Latest), field-length distributions, and row
//! (de)serialization built on `crate::encoding`.

use rand::Rng;

use crate::encoding::{decode_from_slice, encode_to_vec, Decode, Encode, EncodingError};

use super::types::RequestDistribution;

/// A row is a fixed number of named fields, each a byte string. Encoded
/// as `[u32 field_count][ (String, Vec<u8>) ... ]`, reusing the
/// `String`/`Vec<u8>` wire formats directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub fields: Vec<(String, Vec<u8>)>,
}

impl Encode for Row {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.fields.len() as u32).encode_to(buf)?;
        for (name, value) in &self.fields {
            name.encode_to(buf)?;
            value.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Row {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (count, mut offset) = u32::decode_from(buf)?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (name, n) = String::decode_from(&buf[offset..])?;
            offset += n;
            let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            fields.push((name, value));
        }
        Ok((Row { fields }, offset))
    }
}

impl Row {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        encode_to_vec(self)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Row, EncodingError> {
        decode_from_slice::<Row>(buf).map(|(row, _)| row)
    }
}

/// Generates synthetic field values for a row: `field_count` fields named
/// `field0..fieldN`, each a random byte string whose length is drawn from
/// a triangular-ish distribution around `field_len`.
#[derive(Clone)]
pub struct FieldGenerator {
    pub field_count: usize,
    pub field_len: usize,
}

impl FieldGenerator {
    pub fn generate(&self, rng: &mut impl Rng) -> Row {
        let fields = (0..self.field_count)
            .map(|i| {
                let len = self.sample_len(rng);
                let value: Vec<u8> = (0..len).map(|_| rng.random::<u8>()).collect();
                (format!("field{i}"), value)
            })
            .collect();
        Row { fields }
    }

    /// Uniform in `[field_len / 2, field_len * 3 / 2]`, matching the
    /// "zipfian-ish spread around a mean" field-length behavior typical
    /// of YCSB-style generators without needing a second distribution
    /// parameter.
    fn sample_len(&self, rng: &mut impl Rng) -> usize {
        let lo = self.field_len / 2;
        let hi = (self.field_len * 3 / 2).max(lo + 1);
        rng.random_range(lo..hi)
    }
}

/// Chooses which record (by row index, `0..record_count`) a request
/// should target.
pub enum KeyChooser {
    Uniform,
    Zipfian(ScrambledZipfian),
    Latest { max_inserted: std::sync::Arc<std::sync::atomic::AtomicU64> },
}

impl KeyChooser {
    /// `expected_new_keys` is the number of additional keys the tenant's
    /// script is expected to insert over the run (its `total_expected_ops`
    /// upper bound); a `Zipfian` chooser is built over
    /// `[0, record_count + expected_new_keys)` so keys inserted after
    /// load time are reachable by the distribution, not just the ones
    /// present at construction.
    pub fn new(dist: RequestDistribution, record_count: u64, zipfian_const: f64, expected_new_keys: u64) -> Self {
        match dist {
            RequestDistribution::Uniform => KeyChooser::Uniform,
            RequestDistribution::Zipfian => {
                KeyChooser::Zipfian(ScrambledZipfian::new(record_count + expected_new_keys, zipfian_const))
            }
            RequestDistribution::Latest => KeyChooser::Latest {
                max_inserted: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(record_count)),
            },
        }
    }

    pub fn next(&self, rng: &mut impl Rng, record_count: u64) -> u64 {
        match self {
            KeyChooser::Uniform => rng.random_range(0..record_count.max(1)),
            KeyChooser::Zipfian(z) => z.next(rng),
            KeyChooser::Latest { max_inserted } => {
                let max = max_inserted.load(std::sync::atomic::Ordering::Relaxed).max(1);
                // Skewed toward the most recently inserted end of the
                // keyspace by inverting a zipfian draw over the same range.
                let offset = zipfian_sample(rng, max, 0.99);
                max.saturating_sub(offset).min(max - 1)
            }
        }
    }

    /// Notifies a `Latest` chooser that the insertable range grew (a new
    /// row was appended); a no-op for other distributions.
    pub fn notify_inserted(&self, new_count: u64) {
        if let KeyChooser::Latest { max_inserted } = self {
            max_inserted.store(new_count, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

/// A Zipfian distribution over `[0, n)` whose output is scrambled through
/// a hash so that consecutive high-probability ranks don't map to
/// consecutive keys — avoiding artificial locality in the generated
/// access pattern.
pub struct ScrambledZipfian {
    n: u64,
    theta: f64,
    alpha: f64,
    zetan: f64,
    eta: f64,
}

impl ScrambledZipfian {
    pub fn new(n: u64, theta: f64) -> Self {
        let zeta2 = zeta(2, theta);
        let zetan = zeta(n.max(1), theta);
        let alpha = 1.0 / (1.0 - theta);
        let eta = (1.0 - (2.0 / n.max(2) as f64).powf(1.0 - theta)) / (1.0 - zeta2 / zetan);
        Self { n: n.max(1), theta, alpha, zetan, eta }
    }

    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        let rank = zipfian_rank(rng, self.n, self.theta, self.alpha, self.zetan, self.eta);
        scramble(rank, self.n)
    }
}

fn zipfian_sample(rng: &mut impl Rng, n: u64, theta: f64) -> u64 {
    ScrambledZipfian::new(n, theta).next(rng)
}

fn zeta(n: u64, theta: f64) -> f64 {
    (1..=n).map(|i| 1.0 / (i as f64).powf(theta)).sum()
}

#[allow(clippy::too_many_arguments)]
fn zipfian_rank(rng: &mut impl Rng, n: u64, theta: f64, alpha: f64, zetan: f64, eta: f64) -> u64 {
    let u: f64 = rng.random();
    let uz = u * zetan;
    if uz < 1.0 {
        return 0;
    }
    if uz < 1.0 + 0.5_f64.powf(theta) {
        return 1;
    }
    let rank = (n as f64 * (eta * u - eta + 1.0).powf(alpha)) as u64;
    rank.min(n - 1)
}

/// FNV-1a based scramble, deterministic for a given `rank`/`n` pair.
fn scramble(rank: u64, n: u64) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in rank.to_le_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash % n
}
