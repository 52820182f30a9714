use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{Hash as _, sha256};
use rand::RngCore as _;

/// A 32-byte payment preimage.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Preimage([u8; 32]);

impl Preimage {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hash(&self) -> sha256::Hash {
        sha256::Hash::hash(&self.0)
    }

    /// Hex encoded payment hash.
    pub fn payment_hash(&self) -> String {
        hex::encode(self.hash().to_byte_array())
    }
}

impl fmt::Display for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Never print the secret itself in debug output.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(hash={})", self.payment_hash())
    }
}

impl FromStr for Preimage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(s).map_err(|e| anyhow::anyhow!("decode preimage hex: {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow::anyhow!("preimage must be 32 bytes, got {}", b.len()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_sha256_of_bytes() -> anyhow::Result<()> {
        let preimage = Preimage::random();
        let parsed: Preimage = preimage.to_string().parse()?;
        assert_eq!(parsed, preimage);
        assert_eq!(
            parsed.payment_hash(),
            hex::encode(sha256::Hash::hash(preimage.as_bytes()).to_byte_array())
        );
        assert!("abcd".parse::<Preimage>().is_err());
        Ok(())
    }
}
