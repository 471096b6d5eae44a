//! Legacy (non-witness) transaction wire format

use crate::error::{Result, TemplateError};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};

/// Append a CompactSize integer
pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Append a length-prefixed byte string
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn serialize_transaction(tx: &Transaction) -> ByteString {
    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());

    write_varint(&mut out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        out.extend_from_slice(&input.prevout.hash);
        out.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_var_bytes(&mut out, &input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_varint(&mut out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        write_var_bytes(&mut out, &output.script_pubkey);
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

pub fn deserialize_transaction(bytes: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(bytes);
    let version = reader.read_u32()?;

    let input_count = reader.read_varint()?;
    let mut inputs = Vec::new();
    for _ in 0..input_count {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(reader.read_bytes(32)?);
        let index = reader.read_u32()?;
        let script_sig = reader.read_var_bytes()?.to_vec();
        let sequence = reader.read_u32()?;
        inputs.push(TransactionInput {
            prevout: OutPoint { hash, index },
            script_sig,
            sequence,
        });
    }

    let output_count = reader.read_varint()?;
    let mut outputs = Vec::new();
    for _ in 0..output_count {
        let value = reader.read_u64()?;
        let script_pubkey = reader.read_var_bytes()?.to_vec();
        outputs.push(TransactionOutput {
            value,
            script_pubkey,
        });
    }

    let lock_time = reader.read_u32()?;
    if !reader.is_empty() {
        return Err(TemplateError::Serialization(format!(
            "{} trailing bytes after transaction",
            reader.remaining()
        )));
    }

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Double SHA-256 of the wire encoding
pub fn txid(tx: &Transaction) -> Hash {
    sha256d::Hash::hash(&serialize_transaction(tx)).into_inner()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(TemplateError::Serialization(format!(
                "unexpected end of data at offset {}: need {} bytes, have {}",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_varint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xfd => Ok(self.read_u16()? as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(TemplateError::Serialization(format!(
                "length prefix {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        self.read_bytes(len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TransactionInput {
                prevout: OutPoint {
                    hash: [0xab; 32],
                    index: 1,
                },
                script_sig: vec![0x51, 0x52],
                sequence: 0xfffffffe,
            }],
            outputs: vec![TransactionOutput {
                value: 50_000,
                script_pubkey: vec![0x6a, 0x01, 0x00],
            }],
            lock_time: 600_000,
        }
    }

    #[test]
    fn test_varint_boundaries() {
        let mut out = Vec::new();
        write_varint(&mut out, 0xfc);
        assert_eq!(out, vec![0xfc]);

        out.clear();
        write_varint(&mut out, 0xfd);
        assert_eq!(out, vec![0xfd, 0xfd, 0x00]);

        out.clear();
        write_varint(&mut out, 0x10000);
        assert_eq!(out, vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_transaction_layout() {
        let bytes = serialize_transaction(&sample_tx());
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes.len(), 4 + 1 + 32 + 4 + 1 + 2 + 4 + 1 + 8 + 1 + 3 + 4);
        assert_eq!(deserialize_transaction(&bytes).unwrap(), sample_tx());
    }

    #[test]
    fn test_truncated_and_trailing_data() {
        let bytes = serialize_transaction(&sample_tx());
        assert!(deserialize_transaction(&bytes[..bytes.len() - 1]).is_err());

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(deserialize_transaction(&extended).is_err());
    }

    #[test]
    fn test_genesis_coinbase_txid() {
        let raw = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";
        let tx = Transaction::from_hex(raw).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.outputs[0].value, 50 * 100_000_000);
        assert_eq!(
            tx.txid_hex(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(tx.to_hex(), raw);
    }

    #[test]
    fn test_txid_changes_with_content() {
        let tx = sample_tx();
        let mut other = sample_tx();
        other.lock_time += 1;
        assert_ne!(txid(&tx), txid(&other));
        assert_eq!(txid(&tx), txid(&sample_tx()));
    }
}
