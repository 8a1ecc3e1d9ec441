//! Content fingerprints of nodes.
//!
//! A node's fingerprint hashes its kind id, its canonical parameters (the
//! sorted parameter map serialised as JSON) and, for every incoming edge in
//! input-socket then edge order, the target socket, the source socket and the
//! upstream node's fingerprint. Equal fingerprints therefore mean equal
//! results, and any upstream change propagates to every descendant.
//!
//! Source nodes hash their parameters only: a CSV file edited on disk keeps
//! its fingerprint until the node is re-parameterised.

use super::node_type::NodeKind;
use super::param::Params;
use crate::config::FingerprintAlgorithm;
use sha2::Digest;
use std::fmt;

const DOMAIN: &[u8] = b"witt-node-v1";

/// 256-bit content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const ZERO: Fingerprint = Fingerprint([0; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex digits, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One incoming edge as seen by the fingerprint.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamInput<'a> {
    pub target_socket: &'a str,
    pub source_socket: &'a str,
    pub fingerprint: Fingerprint,
}

enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

impl Hasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(bytes);
            }
            Hasher::Sha256(h) => h.update(bytes),
        }
    }

    /// Length-prefixed field, so adjacent fields cannot alias.
    fn field(&mut self, bytes: &[u8]) {
        self.update(&(bytes.len() as u64).to_le_bytes());
        self.update(bytes);
    }

    fn finish(self) -> Fingerprint {
        match self {
            Hasher::Blake3(h) => Fingerprint(*h.finalize().as_bytes()),
            Hasher::Sha256(h) => Fingerprint(h.finalize().into()),
        }
    }
}

/// Computes node fingerprints with the configured hash function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fingerprinter {
    algorithm: FingerprintAlgorithm,
}

impl Fingerprinter {
    pub fn new(algorithm: FingerprintAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> FingerprintAlgorithm {
        self.algorithm
    }

    fn hasher(&self) -> Hasher {
        match self.algorithm {
            FingerprintAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            FingerprintAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    /// Fingerprint of a node given its ordered upstream inputs.
    pub fn node(&self, kind: NodeKind, params: &Params, upstream: &[UpstreamInput<'_>]) -> Fingerprint {
        let mut hasher = self.hasher();
        hasher.field(DOMAIN);
        hasher.field(kind.id().as_bytes());

        // BTreeMap serialises with sorted keys; serde_json output is stable.
        let canonical = serde_json::to_vec(params).unwrap_or_default();
        hasher.field(&canonical);

        hasher.update(&(upstream.len() as u64).to_le_bytes());
        for input in upstream {
            hasher.field(input.target_socket.as_bytes());
            hasher.field(input.source_socket.as_bytes());
            hasher.update(input.fingerprint.as_bytes());
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::param::ParamValue;

    fn params(pairs: &[(&str, ParamValue)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_deterministic() {
        let fp = Fingerprinter::default();
        let p = params(&[("count", ParamValue::Int(5))]);
        assert_eq!(
            fp.node(NodeKind::RowsFirst, &p, &[]),
            fp.node(NodeKind::RowsFirst, &p, &[])
        );
    }

    #[test]
    fn test_kind_params_and_inputs_matter() {
        let fp = Fingerprinter::default();
        let a = params(&[("count", ParamValue::Int(5))]);
        let b = params(&[("count", ParamValue::Int(6))]);
        let base = fp.node(NodeKind::RowsFirst, &a, &[]);
        assert_ne!(base, fp.node(NodeKind::RowsLast, &a, &[]));
        assert_ne!(base, fp.node(NodeKind::RowsFirst, &b, &[]));

        let up = |f| UpstreamInput {
            target_socket: "table",
            source_socket: "table",
            fingerprint: f,
        };
        let x = Fingerprint::from_bytes([1; 32]);
        let y = Fingerprint::from_bytes([2; 32]);
        assert_ne!(
            fp.node(NodeKind::Union, &Params::new(), &[up(x), up(y)]),
            fp.node(NodeKind::Union, &Params::new(), &[up(y), up(x)])
        );
    }

    #[test]
    fn test_algorithms_differ() {
        let p = Params::new();
        let blake = Fingerprinter::new(FingerprintAlgorithm::Blake3).node(NodeKind::Union, &p, &[]);
        let sha = Fingerprinter::new(FingerprintAlgorithm::Sha256).node(NodeKind::Union, &p, &[]);
        assert_ne!(blake, sha);
        assert_eq!(blake.to_hex().len(), 64);
        assert_eq!(sha.short().len(), 12);
    }
}
