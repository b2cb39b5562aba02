//! Content digests used as cache keys.

use core::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use xxhash_rust::xxh3::Xxh3;

use crate::options::CompileOptions;

/// Bumped whenever the way fingerprints are computed changes,
/// so that persisted modules from older builds are never picked up.
const FINGERPRINT_SCHEME: u32 = 1;

/// Streams [`Hash`] input into xxh3-128.
pub struct FingerprintHasher(Xxh3);

impl Default for FingerprintHasher {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintHasher {
    /// Creates an empty hasher.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Xxh3::new())
    }

    /// Returns the 128-bit digest of everything written so far.
    #[inline]
    #[must_use]
    pub fn digest128(&self) -> u128 {
        self.0.digest128()
    }
}

impl Hasher for FingerprintHasher {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0.digest()
    }
}

/// Digest over (flattened source text, compile options, target profile).
///
/// Two equal fingerprints mean the compiled modules are interchangeable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[expect(clippy::exhaustive_structs, reason = "a plain digest")]
pub struct CompileFingerprint(pub u128);

impl CompileFingerprint {
    /// Computes the fingerprint of compiling `flattened_source` with `options`.
    #[inline]
    #[must_use]
    pub fn compute(flattened_source: &str, options: &CompileOptions) -> Self {
        let mut hasher = FingerprintHasher::new();
        FINGERPRINT_SCHEME.hash(&mut hasher);
        flattened_source.hash(&mut hasher);
        options.hash(&mut hasher);
        Self(hasher.digest128())
    }

    /// Short form for log messages.
    #[inline]
    #[must_use]
    pub fn short(self) -> String {
        let full = self.to_string();
        full.get(..12).unwrap_or(&full).to_owned()
    }
}

impl Display for CompileFingerprint {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::ShaderStage;

    #[test_log::test]
    fn distinct_inputs_give_distinct_fingerprints() {
        let vertex = CompileOptions::new(ShaderStage::Vertex);
        let a = CompileFingerprint::compute("void main() {}", &vertex);
        let b = CompileFingerprint::compute("void main() { }", &vertex);
        let c = CompileFingerprint::compute("void main() {}", &vertex.clone().profile("spirv_1_5"));
        let d = CompileFingerprint::compute(
            "void main() {}",
            &CompileOptions::new(ShaderStage::Vertex).define("SKINNED", "1"),
        );
        let all = [a, b, c, d];
        for (i, left) in all.iter().enumerate() {
            for right in all.iter().skip(i + 1) {
                assert_ne!(left, right);
            }
        }
    }

    #[test_log::test]
    fn equal_inputs_give_equal_fingerprints() {
        let options = CompileOptions::new(ShaderStage::Fragment).define("A", "1").define("B", "2");
        let reordered = CompileOptions::new(ShaderStage::Fragment)
            .define("B", "2")
            .define("A", "1");
        assert_eq!(
            CompileFingerprint::compute("x", &options),
            CompileFingerprint::compute("x", &reordered)
        );
    }

    #[test_log::test]
    fn displays_as_fixed_width_hex() {
        let fingerprint = CompileFingerprint(0xab);
        assert_eq!(fingerprint.to_string().len(), 32);
        assert_eq!(fingerprint.short(), "000000000000");
    }
}
