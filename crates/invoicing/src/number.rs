//! Human-facing invoice numbers: `INV-XXXX-YYYY`.
//!
//! `XXXX` is the tail of the creation timestamp and `YYYY` a random suffix,
//! both upper-case base36. Both come from the invoice's UUIDv7 so the number is
//! reproducible from the aggregate id when the stream is replayed.

use serde::{Deserialize, Serialize};

use dentaflow_core::AggregateId;

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PART_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    /// Derive the number for the invoice identified by `id`.
    pub fn for_invoice(id: &AggregateId) -> Self {
        let bytes = id.as_uuid().as_bytes();

        // UUIDv7: the first 48 bits are milliseconds since the epoch.
        let millis = bytes[..6]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        // The last 8 bytes are (mostly) random.
        let random = bytes[8..]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        Self(format!(
            "INV-{}-{}",
            base36_tail(millis, PART_LEN),
            base36_tail(random, PART_LEN)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The last `len` base36 digits of `value`, zero padded.
fn base36_tail(mut value: u64, len: usize) -> String {
    let mut digits = vec![b'0'; len];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    digits.into_iter().map(char::from).collect()
}
