//! Transactions, with segregated-witness aware serialization.

use bytes::BufMut;

use crate::encoding::{
    var_bytes_size, varint_size, DecodeError, DecodeResult, WireDecode, WireEncode, WireReader,
    WireWrite,
};
use crate::hash::{sha256d, Hash256};

/// Reference to a transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Outpoint {
    pub hash: Hash256,
    pub index: u32,
}

impl Outpoint {
    pub const SIZE: usize = 36;

    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }
}

impl WireEncode for Outpoint {
    fn wire_size(&self) -> usize {
        Self::SIZE
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_hash(&self.hash);
        buf.put_u32_le(self.index);
    }
}

impl WireDecode for Outpoint {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        Ok(Self {
            hash: r.read_hash()?,
            index: r.read_u32()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: Outpoint,
    pub script: Vec<u8>,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
}

impl Tx {
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Hash of the stripped serialization.
    pub fn txid(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(self.size(false));
        self.encode_with(&mut buf, false);
        sha256d(&buf)
    }

    /// Hash of the witness serialization (equal to `txid` without witness data).
    pub fn wtxid(&self) -> Hash256 {
        if !self.has_witness() {
            return self.txid();
        }
        let mut buf = Vec::with_capacity(self.size(true));
        self.encode_with(&mut buf, true);
        sha256d(&buf)
    }

    pub fn size(&self, witness: bool) -> usize {
        let mut size = 4 + varint_size(self.inputs.len() as u64);
        for input in &self.inputs {
            size += Outpoint::SIZE + var_bytes_size(input.script.len()) + 4;
        }
        size += varint_size(self.outputs.len() as u64);
        for output in &self.outputs {
            size += 8 + var_bytes_size(output.script.len());
        }
        size += 4;
        if witness && self.has_witness() {
            size += 2;
            for input in &self.inputs {
                size += varint_size(input.witness.len() as u64);
                size += input
                    .witness
                    .iter()
                    .map(|item| var_bytes_size(item.len()))
                    .sum::<usize>();
            }
        }
        size
    }

    pub fn encode_with<B: BufMut>(&self, buf: &mut B, witness: bool) {
        let witness = witness && self.has_witness();
        buf.put_i32_le(self.version);
        if witness {
            buf.put_u8(0);
            buf.put_u8(1);
        }
        buf.put_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.encode_into(buf);
            buf.put_var_bytes(&input.script);
            buf.put_u32_le(input.sequence);
        }
        buf.put_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            buf.put_i64_le(output.value);
            buf.put_var_bytes(&output.script);
        }
        if witness {
            for input in &self.inputs {
                buf.put_varint(input.witness.len() as u64);
                for item in &input.witness {
                    buf.put_var_bytes(item);
                }
            }
        }
        buf.put_u32_le(self.locktime);
    }
}

impl WireEncode for Tx {
    fn wire_size(&self) -> usize {
        self.size(true)
    }

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        self.encode_with(buf, true);
    }
}

impl WireDecode for Tx {
    fn decode_from(r: &mut WireReader<'_>) -> DecodeResult<Self> {
        let version = r.read_i32()?;
        let mut input_count = r.read_bounded_count("tx inputs")?;
        let mut segwit = false;
        if input_count == 0 {
            let flag = r.read_u8()?;
            if flag != 1 {
                return Err(DecodeError::Invalid("witness flag"));
            }
            segwit = true;
            input_count = r.read_bounded_count("tx inputs")?;
        }

        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxIn {
                prevout: Outpoint::decode_from(r)?,
                script: r.read_var_bytes("input script", r.remaining())?.to_vec(),
                sequence: r.read_u32()?,
                witness: Vec::new(),
            });
        }

        let output_count = r.read_bounded_count("tx outputs")?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOut {
                value: r.read_i64()?,
                script: r.read_var_bytes("output script", r.remaining())?.to_vec(),
            });
        }

        if segwit {
            for input in &mut inputs {
                let items = r.read_bounded_count("witness items")?;
                input.witness.reserve(items);
                for _ in 0..items {
                    let item = r.read_var_bytes("witness item", r.remaining())?;
                    input.witness.push(item.to_vec());
                }
            }
        }

        let locktime = r.read_u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }
}
