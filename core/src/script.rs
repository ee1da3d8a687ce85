//! Script introspection.
//!
//! The node never executes scripts itself; execution and signature checking
//! are a capability (`ScriptVerifier`) supplied at construction. What lives
//! here is the opcode walking needed for policy: push-only tests, sigop
//! counting, output template classification and the address hash feeding
//! the mempool indexes.

use crate::encode::{write_compact_size, write_var_bytes};
use bitflags::bitflags;
use ember_hash::H256;
use serde::{Deserialize, Serialize};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Sigops charged for an unaccompanied CHECKMULTISIG.
const MAX_MULTISIG_PUBKEYS: u32 = 20;

/// Policy cap on a scriptSig's serialized size.
pub const MAX_SCRIPT_SIG_SIZE: usize = 1650;

/// Policy cap on an OP_RETURN output script's size.
pub const MAX_NULL_DATA_SIZE: usize = 83;

bitflags! {
    /// Script verification flags handed to the `ScriptVerifier` capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VerifyFlags: u32 {
        const P2SH = 1;
        const STRICTENC = 1 << 1;
        const DERSIG = 1 << 2;
        const LOW_S = 1 << 3;
        const NULLDUMMY = 1 << 4;
        const SIGPUSHONLY = 1 << 5;
        const MINIMALDATA = 1 << 6;
        const DISCOURAGE_UPGRADABLE_NOPS = 1 << 7;
        const CLEANSTACK = 1 << 8;
        const CHECKLOCKTIMEVERIFY = 1 << 9;
        const CHECKSEQUENCEVERIFY = 1 << 10;
        const WITNESS = 1 << 11;
        const DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM = 1 << 12;
        const MINIMALIF = 1 << 13;
        const NULLFAIL = 1 << 14;
        const WITNESS_PUBKEYTYPE = 1 << 15;
    }
}

impl VerifyFlags {
    /// Flags every accepted block must satisfy.
    pub fn mandatory() -> Self {
        VerifyFlags::P2SH
    }

    /// The full standardness ladder applied at mempool admission.
    pub fn standard() -> Self {
        VerifyFlags::P2SH
            | VerifyFlags::STRICTENC
            | VerifyFlags::DERSIG
            | VerifyFlags::LOW_S
            | VerifyFlags::NULLDUMMY
            | VerifyFlags::MINIMALDATA
            | VerifyFlags::DISCOURAGE_UPGRADABLE_NOPS
            | VerifyFlags::CLEANSTACK
            | VerifyFlags::CHECKLOCKTIMEVERIFY
            | VerifyFlags::CHECKSEQUENCEVERIFY
            | VerifyFlags::WITNESS
            | VerifyFlags::DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
            | VerifyFlags::MINIMALIF
            | VerifyFlags::NULLFAIL
            | VerifyFlags::WITNESS_PUBKEYTYPE
    }
}

/// Standard output templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    NonStandard,
    PubKey,
    PubKeyHash,
    ScriptHash,
    Multisig { m: u8, n: u8 },
    NullData,
    WitnessKeyHash,
    WitnessScriptHash,
    WitnessUnknown,
}

/// One decoded script element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: u8,
    pub push: Option<&'a [u8]>,
}

#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

impl Script {
    pub fn new(raw: Vec<u8>) -> Self {
        Script(raw)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Iterate instructions. Stops silently at a truncated push, the same
    /// as the reference counting rules.
    pub fn instructions(&self) -> Instructions {
        Instructions {
            data: &self.0,
            pos: 0,
            malformed: false,
        }
    }

    /// Whether every element is a data push.
    pub fn is_push_only(&self) -> bool {
        let mut iter = self.instructions();
        for ins in iter.by_ref() {
            if ins.opcode > OP_16 {
                return false;
            }
        }
        !iter.malformed
    }

    /// Legacy sigop counting. With `accurate`, CHECKMULTISIG preceded by a
    /// small-integer push is charged for that many keys.
    pub fn sigops(&self, accurate: bool) -> u32 {
        let mut count = 0u32;
        let mut prev = 0xffu8;
        for ins in self.instructions() {
            match ins.opcode {
                OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    count += match prev {
                        OP_1..=OP_16 if accurate => u32::from(prev - OP_1 + 1),
                        _ => MAX_MULTISIG_PUBKEYS,
                    };
                }
                _ => {}
            }
            prev = ins.opcode;
        }
        count
    }

    /// The last push in the script, if the script is push-only. Used to
    /// recover P2SH redeem scripts.
    pub fn last_push(&self) -> Option<Vec<u8>> {
        if !self.is_push_only() {
            return None;
        }
        self.instructions()
            .filter_map(|ins| ins.push.map(|p| p.to_vec()))
            .last()
    }

    /// Classify against the standard templates.
    pub fn classify(&self) -> ScriptClass {
        let raw = &self.0;

        // Witness program: version byte plus a single 2..40 byte push.
        if let Some((version, program)) = self.witness_program() {
            return match (version, program.len()) {
                (0, 20) => ScriptClass::WitnessKeyHash,
                (0, 32) => ScriptClass::WitnessScriptHash,
                (0, _) => ScriptClass::NonStandard,
                _ => ScriptClass::WitnessUnknown,
            };
        }

        // P2PKH: DUP HASH160 <20> EQUALVERIFY CHECKSIG
        if raw.len() == 25
            && raw[0] == OP_DUP
            && raw[1] == OP_HASH160
            && raw[2] == 20
            && raw[23] == OP_EQUALVERIFY
            && raw[24] == OP_CHECKSIG
        {
            return ScriptClass::PubKeyHash;
        }

        // P2SH: HASH160 <20> EQUAL
        if raw.len() == 23 && raw[0] == OP_HASH160 && raw[1] == 20 && raw[22] == OP_EQUAL {
            return ScriptClass::ScriptHash;
        }

        // P2PK: <33|65> CHECKSIG
        if (raw.len() == 35 || raw.len() == 67)
            && raw[0] as usize == raw.len() - 2
            && raw[raw.len() - 1] == OP_CHECKSIG
        {
            return ScriptClass::PubKey;
        }

        // Null data: OP_RETURN followed by pushes only.
        if !raw.is_empty() && raw[0] == OP_RETURN {
            let rest = Script::new(raw[1..].to_vec());
            if rest.is_push_only() {
                return ScriptClass::NullData;
            }
            return ScriptClass::NonStandard;
        }

        // Bare multisig: m <keys...> n CHECKMULTISIG
        if raw.len() >= 3 && raw[raw.len() - 1] == OP_CHECKMULTISIG {
            if let (Some(n), Some(m)) = (small_int(raw[raw.len() - 2]), small_int(raw[0])) {
                if m >= 1 && m <= n {
                    let keys: Vec<_> = self
                        .instructions()
                        .filter(|ins| ins.push.is_some())
                        .collect();
                    if keys.len() == usize::from(n)
                        && keys
                            .iter()
                            .all(|k| matches!(k.push.map(<[u8]>::len), Some(33) | Some(65)))
                    {
                        return ScriptClass::Multisig { m, n };
                    }
                }
            }
        }

        ScriptClass::NonStandard
    }

    /// `(version, program)` when the script is a segwit program.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        let raw = &self.0;
        if raw.len() < 4 || raw.len() > 42 {
            return None;
        }
        let version = match raw[0] {
            OP_0 => 0,
            op @ OP_1..=OP_16 => op - OP_1 + 1,
            _ => return None,
        };
        let push_len = raw[1] as usize;
        if push_len < 2 || push_len > 40 || raw.len() != push_len + 2 {
            return None;
        }
        Some((version, &raw[2..]))
    }

    /// The hash to index this output under, padded to 32 bytes.
    pub fn address_hash(&self) -> Option<H256> {
        let raw = &self.0;
        let slice: &[u8] = match self.classify() {
            ScriptClass::PubKeyHash => &raw[3..23],
            ScriptClass::ScriptHash => &raw[2..22],
            ScriptClass::WitnessKeyHash => &raw[2..22],
            ScriptClass::WitnessScriptHash => &raw[2..34],
            _ => return None,
        };
        let mut padded = [0u8; 32];
        padded[..slice.len()].copy_from_slice(slice);
        Some(H256(padded))
    }

    /// Witness commitment hash when this is a BIP141 commitment output.
    pub fn witness_commitment(&self) -> Option<H256> {
        let raw = &self.0;
        if raw.len() >= 38
            && raw[0] == OP_RETURN
            && raw[1] == 0x24
            && raw[2..6] == [0xaa, 0x21, 0xa9, 0xed]
        {
            return H256::from_slice(&raw[6..38]);
        }
        None
    }

    pub fn p2pkh(hash: &[u8; 20]) -> Self {
        let mut raw = Vec::with_capacity(25);
        raw.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
        raw.extend_from_slice(hash);
        raw.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Script(raw)
    }

    pub fn p2wpkh(hash: &[u8; 20]) -> Self {
        let mut raw = Vec::with_capacity(22);
        raw.extend_from_slice(&[OP_0, 20]);
        raw.extend_from_slice(hash);
        Script(raw)
    }

    pub fn commitment(hash: &H256) -> Self {
        let mut raw = Vec::with_capacity(38);
        raw.extend_from_slice(&[OP_RETURN, 0x24, 0xaa, 0x21, 0xa9, 0xed]);
        raw.extend_from_slice(hash.as_bytes());
        Script(raw)
    }

    /// A minimal push-only script carrying arbitrary data, e.g. coinbase
    /// input scripts.
    pub fn pushes(items: &[&[u8]]) -> Self {
        let mut raw = Vec::new();
        for item in items {
            push_data(&mut raw, item);
        }
        Script(raw)
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.0);
    }

    /// Serialized size including the compact-size prefix.
    pub fn encoded_len(&self) -> usize {
        let mut prefix = Vec::with_capacity(9);
        write_compact_size(&mut prefix, self.0.len() as u64);
        prefix.len() + self.0.len()
    }
}

fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => buf.push(OP_0),
        len @ 1..=0x4b => {
            buf.push(len as u8);
            buf.extend_from_slice(data);
        }
        len @ 0x4c..=0xff => {
            buf.push(OP_PUSHDATA1);
            buf.push(len as u8);
            buf.extend_from_slice(data);
        }
        len => {
            buf.push(OP_PUSHDATA2);
            buf.extend_from_slice(&(len as u16).to_le_bytes());
            buf.extend_from_slice(data);
        }
    }
}

fn small_int(opcode: u8) -> Option<u8> {
    match opcode {
        OP_0 => Some(0),
        OP_1..=OP_16 => Some(opcode - OP_1 + 1),
        _ => None,
    }
}

pub struct Instructions<'a> {
    data: &'a [u8],
    pos: usize,
    malformed: bool,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Instruction<'a>> {
        if self.malformed || self.pos >= self.data.len() {
            return None;
        }
        let opcode = self.data[self.pos];
        self.pos += 1;

        let push_len = match opcode {
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => match self.data.get(self.pos) {
                Some(&len) => {
                    self.pos += 1;
                    Some(len as usize)
                }
                None => {
                    self.malformed = true;
                    return None;
                }
            },
            OP_PUSHDATA2 => {
                if self.data.len() - self.pos < 2 {
                    self.malformed = true;
                    return None;
                }
                let len =
                    u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]) as usize;
                self.pos += 2;
                Some(len)
            }
            OP_PUSHDATA4 => {
                if self.data.len() - self.pos < 4 {
                    self.malformed = true;
                    return None;
                }
                let mut len_bytes = [0u8; 4];
                len_bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
                self.pos += 4;
                Some(u32::from_le_bytes(len_bytes) as usize)
            }
            _ => None,
        };

        match push_len {
            Some(len) => {
                if self.data.len() - self.pos < len {
                    self.malformed = true;
                    None
                } else {
                    let push = &self.data[self.pos..self.pos + len];
                    self.pos += len;
                    Some(Instruction {
                        opcode,
                        push: Some(push),
                    })
                }
            }
            None => Some(Instruction { opcode, push: None }),
        }
    }
}
