//! The external term format codec (spec §4.2): encode/decode between
//! [`Term`](super::Term) and the tagged binary wire format, including the
//! top-level version byte and `Compressed` (zlib-deflate) framing.
//!
//! Tag layout mirrors `epmd.rs`'s `TAG_*` constants and `socket.rs`'s
//! big-endian read/write helpers, generalized from request/response framing
//! to the full recursive term grammar.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::value::{Atom, BigInt, Bitstring, ExternalFun, Fun, Integer, List, Pid, Port, Reference, Sign, Term};

const TAG_NEW_FLOAT: u8 = 70;
const TAG_BIT_BINARY: u8 = 77;
const TAG_COMPRESSED: u8 = 80;
const TAG_SMALL_INT: u8 = 97;
const TAG_INT: u8 = 98;
const TAG_OLD_FLOAT: u8 = 99;
const TAG_ATOM: u8 = 100;
const TAG_REF: u8 = 101;
const TAG_PORT: u8 = 102;
const TAG_PID: u8 = 103;
const TAG_SMALL_TUPLE: u8 = 104;
const TAG_LARGE_TUPLE: u8 = 105;
const TAG_NIL: u8 = 106;
const TAG_STRING: u8 = 107;
const TAG_LIST: u8 = 108;
const TAG_BINARY: u8 = 109;
const TAG_SMALL_BIG: u8 = 110;
const TAG_LARGE_BIG: u8 = 111;
const TAG_NEW_FUN: u8 = 112;
const TAG_EXTERNAL_FUN: u8 = 113;
const TAG_NEW_REF: u8 = 114;
const TAG_FUN: u8 = 117;

pub const VERSION: u8 = 131;

/// Deflated-term nesting limit (spec §9 open question resolution): a
/// `Compressed` term whose decompressed payload is itself `Compressed` may
/// nest at most this many levels before decode fails outright.
pub const MAX_COMPRESSED_DEPTH: u32 = 4;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EncodeError {
    #[error("tuple arity {0} exceeds the u32 large-tuple limit")]
    TupleTooLarge(usize),
    #[error("list length {0} exceeds the u32 limit")]
    ListTooLarge(usize),
    #[error("binary length {0} exceeds the u32 limit")]
    BinaryTooLarge(usize),
    #[error("bignum magnitude of {0} bytes exceeds the u32 limit")]
    IntegerTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("unexpected end of input while decoding")]
    UnexpectedEof,
    #[error("expected version byte 131, got {0}")]
    UnexpectedVersion(u8),
    #[error("unknown term tag {0}")]
    UnknownTag(u8),
    #[error("atom name is not valid latin-1: {0}")]
    InvalidAtom(#[from] super::value::AtomError),
    #[error("compressed term nesting exceeds the limit of {0}")]
    CompressedTooDeep(u32),
    #[error("compressed term declared size {declared} but inflated to {actual} bytes")]
    CompressedSizeMismatch { declared: u32, actual: usize },
    #[error("zlib inflate failed: {0}")]
    Inflate(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<std::io::ErrorKind> for DecodeError {
    fn from(_: std::io::ErrorKind) -> Self {
        DecodeError::UnexpectedEof
    }
}

/// Encode `term` as a standalone, version-prefixed external term.
pub fn encode(term: &Term) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    out.write_u8(VERSION)?;
    encode_term(term, &mut out)?;
    Ok(out)
}

/// Decode a standalone, version-prefixed external term (the inverse of
/// [`encode`]).
pub fn decode(bytes: &[u8]) -> Result<Term, DecodeError> {
    let mut cursor = bytes;
    let version = read_u8(&mut cursor)?;
    if version != VERSION {
        return Err(DecodeError::UnexpectedVersion(version));
    }
    decode_term(&mut cursor, 0)
}

/// Decode one version-prefixed term from the front of `bytes`, returning it
/// together with the number of bytes consumed. Used where two terms
/// (control tuple, then an optional payload) are packed back-to-back in one
/// frame, each with its own version byte, as in a distribution message.
pub fn decode_one(bytes: &[u8]) -> Result<(Term, usize), DecodeError> {
    let mut cursor = bytes;
    let version = read_u8(&mut cursor)?;
    if version != VERSION {
        return Err(DecodeError::UnexpectedVersion(version));
    }
    let term = decode_term(&mut cursor, 0)?;
    let consumed = bytes.len() - cursor.len();
    Ok((term, consumed))
}

fn read_u8(r: &mut &[u8]) -> Result<u8, DecodeError> {
    r.read_u8().map_err(|_| DecodeError::UnexpectedEof)
}
fn read_u16(r: &mut &[u8]) -> Result<u16, DecodeError> {
    r.read_u16::<BigEndian>().map_err(|_| DecodeError::UnexpectedEof)
}
fn read_u32(r: &mut &[u8]) -> Result<u32, DecodeError> {
    r.read_u32::<BigEndian>().map_err(|_| DecodeError::UnexpectedEof)
}
fn read_i32(r: &mut &[u8]) -> Result<i32, DecodeError> {
    r.read_i32::<BigEndian>().map_err(|_| DecodeError::UnexpectedEof)
}
fn read_f64(r: &mut &[u8]) -> Result<f64, DecodeError> {
    r.read_f64::<BigEndian>().map_err(|_| DecodeError::UnexpectedEof)
}
fn read_exact(r: &mut &[u8], len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| DecodeError::UnexpectedEof)?;
    Ok(buf)
}
fn read_atom_name(r: &mut &[u8]) -> Result<Atom, DecodeError> {
    let len = read_u16(r)? as usize;
    let bytes = read_exact(r, len)?;
    let name: String = bytes.iter().map(|&b| b as char).collect();
    Ok(Atom::new(name)?)
}

/// Encode `term` without the leading version byte; used recursively and as
/// the payload of a `Compressed` wrapper.
pub fn encode_term(term: &Term, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    match term {
        Term::Integer(i) => encode_integer(i, out)?,
        Term::Float(f) => {
            out.write_u8(TAG_NEW_FLOAT)?;
            out.write_f64::<BigEndian>(*f)?;
        }
        Term::Atom(a) => encode_atom(a, out)?,
        Term::String(codepoints) => encode_string(codepoints, out)?,
        Term::Binary(bytes) => {
            if bytes.len() > u32::MAX as usize {
                return Err(EncodeError::BinaryTooLarge(bytes.len()));
            }
            out.write_u8(TAG_BINARY)?;
            out.write_u32::<BigEndian>(bytes.len() as u32)?;
            out.extend_from_slice(bytes);
        }
        Term::Bitstring(b) => encode_bitstring(b, out)?,
        Term::Tuple(elems) => encode_tuple(elems, out)?,
        Term::List(list) => encode_list(list, out)?,
        Term::Pid(pid) => encode_pid(pid, out)?,
        Term::Port(port) => encode_port(port, out)?,
        Term::Reference(reference) => encode_reference(reference, out)?,
        Term::Fun(fun) => encode_fun(fun, out)?,
        Term::ExternalFun(ext) => encode_external_fun(ext, out)?,
        Term::Compressed(inner) => encode_compressed(inner, out)?,
    }
    Ok(())
}

fn encode_integer(i: &Integer, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if let Integer::Small(v) = i {
        if (0..=255).contains(v) {
            out.write_u8(TAG_SMALL_INT)?;
            out.write_u8(*v as u8)?;
            return Ok(());
        }
        if *v >= -(1i64 << 27) && *v < (1i64 << 27) {
            out.write_u8(TAG_INT)?;
            out.write_i32::<BigEndian>(*v as i32)?;
            return Ok(());
        }
    }
    let (sign, magnitude) = i.sign_magnitude();
    if magnitude.len() > u32::MAX as usize {
        return Err(EncodeError::IntegerTooLarge(magnitude.len()));
    }
    let sign_byte = match sign {
        Sign::Positive => 0u8,
        Sign::Negative => 1u8,
    };
    if magnitude.len() <= 255 {
        out.write_u8(TAG_SMALL_BIG)?;
        out.write_u8(magnitude.len() as u8)?;
        out.write_u8(sign_byte)?;
    } else {
        out.write_u8(TAG_LARGE_BIG)?;
        out.write_u32::<BigEndian>(magnitude.len() as u32)?;
        out.write_u8(sign_byte)?;
    }
    out.extend_from_slice(&magnitude);
    Ok(())
}

fn encode_atom(a: &Atom, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.write_u8(TAG_ATOM)?;
    let bytes: Vec<u8> = a.as_str().chars().map(|c| c as u8).collect();
    out.write_u16::<BigEndian>(bytes.len() as u16)?;
    out.extend_from_slice(&bytes);
    Ok(())
}

/// A `String` encodes via `STRING_EXT` when every code point fits a byte
/// and the length fits `u16`; otherwise it falls back to a proper list of
/// integer terms, one per code point. Empty strings encode as bare `nil`,
/// indistinguishable on the wire from an empty list.
fn encode_string(codepoints: &[u32], out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if codepoints.is_empty() {
        out.write_u8(TAG_NIL)?;
        return Ok(());
    }
    if codepoints.len() <= u16::MAX as usize && codepoints.iter().all(|&c| c <= 255) {
        out.write_u8(TAG_STRING)?;
        out.write_u16::<BigEndian>(codepoints.len() as u16)?;
        for &c in codepoints {
            out.write_u8(c as u8)?;
        }
        return Ok(());
    }
    out.write_u8(TAG_LIST)?;
    out.write_u32::<BigEndian>(codepoints.len() as u32)?;
    for &c in codepoints {
        encode_integer(&Integer::from_i64(c as i64), out)?;
    }
    out.write_u8(TAG_NIL)?;
    Ok(())
}

fn encode_bitstring(b: &Bitstring, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if b.bytes.len() > u32::MAX as usize {
        return Err(EncodeError::BinaryTooLarge(b.bytes.len()));
    }
    out.write_u8(TAG_BIT_BINARY)?;
    out.write_u32::<BigEndian>(b.bytes.len() as u32)?;
    out.write_u8(if b.pad_bits == 0 { 8 } else { 8 - b.pad_bits })?;
    out.extend_from_slice(&b.bytes);
    Ok(())
}

fn encode_tuple(elems: &[Term], out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if elems.len() <= 255 {
        out.write_u8(TAG_SMALL_TUPLE)?;
        out.write_u8(elems.len() as u8)?;
    } else {
        if elems.len() > u32::MAX as usize {
            return Err(EncodeError::TupleTooLarge(elems.len()));
        }
        out.write_u8(TAG_LARGE_TUPLE)?;
        out.write_u32::<BigEndian>(elems.len() as u32)?;
    }
    for elem in elems {
        encode_term(elem, out)?;
    }
    Ok(())
}

fn encode_list(list: &List, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if list.elements.is_empty() && list.tail.is_none() {
        out.write_u8(TAG_NIL)?;
        return Ok(());
    }
    if list.elements.len() > u32::MAX as usize {
        return Err(EncodeError::ListTooLarge(list.elements.len()));
    }
    out.write_u8(TAG_LIST)?;
    out.write_u32::<BigEndian>(list.elements.len() as u32)?;
    for elem in &list.elements {
        encode_term(elem, out)?;
    }
    match &list.tail {
        Some(tail) => encode_term(tail, out)?,
        None => out.write_u8(TAG_NIL)?,
    }
    Ok(())
}

fn encode_pid(pid: &Pid, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.write_u8(TAG_PID)?;
    encode_atom(&pid.node, out)?;
    out.write_u32::<BigEndian>(pid.id)?;
    out.write_u32::<BigEndian>(pid.serial)?;
    out.write_u8(pid.creation)?;
    Ok(())
}

fn encode_port(port: &Port, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.write_u8(TAG_PORT)?;
    encode_atom(&port.node, out)?;
    out.write_u32::<BigEndian>(port.id)?;
    out.write_u8(port.creation)?;
    Ok(())
}

fn encode_reference(reference: &Reference, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if reference.ids.len() == 1 {
        out.write_u8(TAG_REF)?;
        encode_atom(&reference.node, out)?;
        out.write_u32::<BigEndian>(reference.ids[0])?;
        out.write_u8(reference.creation)?;
    } else {
        out.write_u8(TAG_NEW_REF)?;
        out.write_u16::<BigEndian>(reference.ids.len() as u16)?;
        encode_atom(&reference.node, out)?;
        out.write_u8(reference.creation)?;
        for id in &reference.ids {
            out.write_u32::<BigEndian>(*id)?;
        }
    }
    Ok(())
}

/// `NEW_FUN_EXT`'s leading `size` field covers the whole encoded fun
/// including itself, so it's written after the fact by poking the 4-byte
/// length back into `out` once the body is known.
fn encode_fun(fun: &Fun, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if !fun.new_fun {
        out.write_u8(TAG_FUN)?;
        out.write_u32::<BigEndian>(fun.free_vars.len() as u32)?;
        encode_pid(&fun.pid, out)?;
        encode_atom(&fun.module, out)?;
        encode_integer(&Integer::from_i64(fun.old_index as i64), out)?;
        encode_integer(&Integer::from_i64(i64::from_be_bytes(fun.uniq[..8].try_into().unwrap())), out)?;
        for v in &fun.free_vars {
            encode_term(v, out)?;
        }
        return Ok(());
    }

    let size_offset = out.len();
    out.write_u8(TAG_NEW_FUN)?;
    out.write_u32::<BigEndian>(0)?; // backpatched below
    out.write_u8(fun.arity)?;
    out.extend_from_slice(&fun.uniq);
    out.write_u32::<BigEndian>(fun.index)?;
    out.write_u32::<BigEndian>(fun.free_vars.len() as u32)?;
    encode_atom(&fun.module, out)?;
    encode_integer(&Integer::from_i64(fun.old_index as i64), out)?;
    encode_integer(&Integer::from_i64(fun.index as i64), out)?;
    encode_pid(&fun.pid, out)?;
    for v in &fun.free_vars {
        encode_term(v, out)?;
    }
    let total_size = (out.len() - size_offset) as u32;
    out[size_offset + 1..size_offset + 5].copy_from_slice(&total_size.to_be_bytes());
    Ok(())
}

fn encode_external_fun(ext: &ExternalFun, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.write_u8(TAG_EXTERNAL_FUN)?;
    encode_atom(&ext.module, out)?;
    encode_atom(&ext.function, out)?;
    encode_integer(&Integer::from_i64(ext.arity as i64), out)?;
    Ok(())
}

fn encode_compressed(inner: &Term, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let mut plain = Vec::new();
    encode_term(inner, &mut plain)?;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&plain)?;
    let compressed = encoder.finish()?;
    out.write_u8(TAG_COMPRESSED)?;
    out.write_u32::<BigEndian>(plain.len() as u32)?;
    out.extend_from_slice(&compressed);
    Ok(())
}

fn decode_term(r: &mut &[u8], compressed_depth: u32) -> Result<Term, DecodeError> {
    let tag = read_u8(r)?;
    match tag {
        TAG_SMALL_INT => Ok(Term::Integer(Integer::from_i64(read_u8(r)? as i64))),
        TAG_INT => Ok(Term::Integer(Integer::from_i64(read_i32(r)? as i64))),
        TAG_OLD_FLOAT => {
            let bytes = read_exact(r, 31)?;
            let text: String = bytes
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect();
            let value: f64 = text.trim().parse().map_err(|_| DecodeError::UnexpectedEof)?;
            Ok(Term::Float(value))
        }
        TAG_NEW_FLOAT => Ok(Term::Float(read_f64(r)?)),
        TAG_ATOM => Ok(Term::Atom(read_atom_name(r)?)),
        TAG_REF => {
            let node = read_atom_name(r)?;
            let id = read_u32(r)?;
            let creation = read_u8(r)?;
            Ok(Term::Reference(Reference::new_old(node, id, creation)))
        }
        TAG_NEW_REF => {
            let len = read_u16(r)? as usize;
            let node = read_atom_name(r)?;
            let creation = read_u8(r)?;
            let mut ids = [0u32; 3];
            for slot in ids.iter_mut().take(len.min(3)) {
                *slot = read_u32(r)?;
            }
            for _ in 3..len {
                read_u32(r)?;
            }
            Ok(Term::Reference(Reference::new_new(node, creation, ids)))
        }
        TAG_PORT => {
            let node = read_atom_name(r)?;
            let id = read_u32(r)?;
            let creation = read_u8(r)?;
            Ok(Term::Port(Port::new(node, id, creation)))
        }
        TAG_PID => {
            let node = read_atom_name(r)?;
            let id = read_u32(r)?;
            let serial = read_u32(r)?;
            let creation = read_u8(r)?;
            Ok(Term::Pid(Pid::new(node, id, serial, creation)))
        }
        TAG_SMALL_TUPLE => {
            let arity = read_u8(r)? as usize;
            let mut elems = Vec::with_capacity(arity);
            for _ in 0..arity {
                elems.push(decode_term(r, compressed_depth)?);
            }
            Ok(Term::Tuple(elems))
        }
        TAG_LARGE_TUPLE => {
            let arity = read_u32(r)? as usize;
            let mut elems = Vec::with_capacity(arity.min(1 << 20));
            for _ in 0..arity {
                elems.push(decode_term(r, compressed_depth)?);
            }
            Ok(Term::Tuple(elems))
        }
        TAG_NIL => Ok(Term::nil()),
        TAG_STRING => {
            let len = read_u16(r)? as usize;
            let bytes = read_exact(r, len)?;
            Ok(Term::String(bytes.into_iter().map(u32::from).collect()))
        }
        TAG_LIST => {
            let len = read_u32(r)? as usize;
            let mut elements = Vec::with_capacity(len.min(1 << 20));
            for _ in 0..len {
                elements.push(decode_term(r, compressed_depth)?);
            }
            let tail = decode_term(r, compressed_depth)?;
            let tail = match tail {
                Term::List(ref l) if l.is_proper() && l.elements.is_empty() => None,
                other => Some(Box::new(other)),
            };
            Ok(Term::List(List { elements, tail }))
        }
        TAG_BINARY => {
            let len = read_u32(r)? as usize;
            Ok(Term::Binary(read_exact(r, len)?))
        }
        TAG_BIT_BINARY => {
            let len = read_u32(r)? as usize;
            let bits = read_u8(r)?;
            let bytes = read_exact(r, len)?;
            let pad_bits = if bits == 0 { 0 } else { 8 - bits };
            Ok(Term::Bitstring(Bitstring { bytes, pad_bits }))
        }
        TAG_SMALL_BIG => {
            let len = read_u8(r)? as usize;
            let sign = if read_u8(r)? == 0 { Sign::Positive } else { Sign::Negative };
            let magnitude = read_exact(r, len)?;
            Ok(Term::Integer(Integer::from_sign_magnitude(sign, magnitude)))
        }
        TAG_LARGE_BIG => {
            let len = read_u32(r)? as usize;
            let sign = if read_u8(r)? == 0 { Sign::Positive } else { Sign::Negative };
            let magnitude = read_exact(r, len)?;
            Ok(Term::Integer(Integer::from_sign_magnitude(sign, magnitude)))
        }
        TAG_NEW_FUN => {
            let _size = read_u32(r)?;
            let arity = read_u8(r)?;
            let uniq_bytes = read_exact(r, 16)?;
            let mut uniq = [0u8; 16];
            uniq.copy_from_slice(&uniq_bytes);
            let index = read_u32(r)?;
            let num_free = read_u32(r)? as usize;
            let module = decode_atom_term(r, compressed_depth)?;
            let old_index = decode_small_int(r, compressed_depth)?;
            let _old_uniq = decode_small_int(r, compressed_depth)?;
            let pid = decode_pid_term(r, compressed_depth)?;
            let mut free_vars = Vec::with_capacity(num_free.min(1 << 16));
            for _ in 0..num_free {
                free_vars.push(decode_term(r, compressed_depth)?);
            }
            Ok(Term::Fun(Fun {
                new_fun: true,
                arity,
                uniq,
                index,
                old_index: old_index as u32,
                module,
                pid,
                free_vars,
            }))
        }
        TAG_FUN => {
            let num_free = read_u32(r)? as usize;
            let pid = decode_pid_term(r, compressed_depth)?;
            let module = decode_atom_term(r, compressed_depth)?;
            let index = decode_small_int(r, compressed_depth)?;
            let uniq_value = decode_small_int(r, compressed_depth)?;
            let mut uniq = [0u8; 16];
            uniq[8..].copy_from_slice(&(uniq_value as i64).to_be_bytes());
            let mut free_vars = Vec::with_capacity(num_free.min(1 << 16));
            for _ in 0..num_free {
                free_vars.push(decode_term(r, compressed_depth)?);
            }
            Ok(Term::Fun(Fun {
                new_fun: false,
                arity: 0,
                uniq,
                index: index as u32,
                old_index: index as u32,
                module,
                pid,
                free_vars,
            }))
        }
        TAG_EXTERNAL_FUN => {
            let module = decode_atom_term(r, compressed_depth)?;
            let function = decode_atom_term(r, compressed_depth)?;
            let arity = decode_small_int(r, compressed_depth)? as u8;
            Ok(Term::ExternalFun(ExternalFun { module, function, arity }))
        }
        TAG_COMPRESSED => {
            if compressed_depth >= MAX_COMPRESSED_DEPTH {
                return Err(DecodeError::CompressedTooDeep(MAX_COMPRESSED_DEPTH));
            }
            let declared = read_u32(r)?;
            let mut decoder = flate2::read::ZlibDecoder::new(*r);
            let mut plain = Vec::new();
            decoder.read_to_end(&mut plain).map_err(|e| DecodeError::Inflate(e.to_string()))?;
            let consumed = decoder.total_in() as usize;
            *r = &r[consumed..];
            if plain.len() != declared as usize {
                return Err(DecodeError::CompressedSizeMismatch {
                    declared,
                    actual: plain.len(),
                });
            }
            let mut inner_cursor = plain.as_slice();
            let inner = decode_term(&mut inner_cursor, compressed_depth + 1)?;
            Ok(Term::Compressed(Box::new(inner)))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn decode_atom_term(r: &mut &[u8], depth: u32) -> Result<Atom, DecodeError> {
    match decode_term(r, depth)? {
        Term::Atom(a) => Ok(a),
        _ => Err(DecodeError::UnknownTag(TAG_ATOM)),
    }
}

fn decode_pid_term(r: &mut &[u8], depth: u32) -> Result<Pid, DecodeError> {
    match decode_term(r, depth)? {
        Term::Pid(p) => Ok(p),
        _ => Err(DecodeError::UnknownTag(TAG_PID)),
    }
}

fn decode_small_int(r: &mut &[u8], depth: u32) -> Result<i64, DecodeError> {
    match decode_term(r, depth)? {
        Term::Integer(Integer::Small(v)) => Ok(v),
        Term::Integer(Integer::Big(BigInt { sign, magnitude })) => {
            let (s, m) = (sign, magnitude);
            let v = Integer::from_sign_magnitude(s, m);
            match v {
                Integer::Small(v) => Ok(v),
                Integer::Big(_) => Err(DecodeError::UnknownTag(TAG_SMALL_INT)),
            }
        }
        _ => Err(DecodeError::UnknownTag(TAG_SMALL_INT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::value::{Atom as TermAtom, List as TermList};

    #[test]
    fn small_int_zero_matches_wire_bytes() {
        let t = Term::Integer(Integer::from_i64(0));
        assert_eq!(encode(&t).unwrap(), vec![131, 97, 0]);
    }

    #[test]
    fn int_one_thousand_matches_wire_bytes() {
        let t = Term::Integer(Integer::from_i64(1000));
        assert_eq!(encode(&t).unwrap(), vec![131, 98, 0, 0, 3, 232]);
    }

    #[test]
    fn roundtrip_atom() {
        let t = Term::atom("hello").unwrap();
        let bytes = encode(&t).unwrap();
        assert_eq!(decode(&bytes).unwrap(), t);
    }

    #[test]
    fn roundtrip_nonempty_string_uses_string_tag() {
        let t = Term::string("hi");
        let bytes = encode(&t).unwrap();
        assert_eq!(bytes[1], TAG_STRING);
        assert_eq!(decode(&bytes).unwrap(), t);
    }

    #[test]
    fn empty_string_encodes_as_nil_and_decodes_as_empty_list() {
        let t = Term::string("");
        let bytes = encode(&t).unwrap();
        assert_eq!(bytes, vec![131, TAG_NIL]);
        assert_eq!(decode(&bytes).unwrap(), Term::nil());
    }

    #[test]
    fn roundtrip_tuple_and_list() {
        let tuple = Term::Tuple(vec![Term::Integer(Integer::from_i64(1)), Term::atom("ok").unwrap()]);
        let bytes = encode(&tuple).unwrap();
        assert_eq!(decode(&bytes).unwrap(), tuple);

        let list = Term::List(TermList::proper(vec![
            Term::Integer(Integer::from_i64(1)),
            Term::Integer(Integer::from_i64(2)),
        ]));
        let bytes = encode(&list).unwrap();
        assert_eq!(decode(&bytes).unwrap(), list);
    }

    #[test]
    fn roundtrip_pid() {
        let pid = Term::Pid(Pid::new(TermAtom::new("a@b").unwrap(), 5, 1, 2));
        let bytes = encode(&pid).unwrap();
        assert_eq!(decode(&bytes).unwrap(), pid);
    }

    #[test]
    fn roundtrip_large_bignum() {
        let magnitude = vec![1u8; 40];
        let integer = Integer::from_sign_magnitude(Sign::Positive, magnitude);
        assert!(matches!(integer, Integer::Big(_)));
        let t = Term::Integer(integer);
        let bytes = encode(&t).unwrap();
        assert_eq!(bytes[1], TAG_SMALL_BIG);
        assert_eq!(decode(&bytes).unwrap(), t);
    }

    #[test]
    fn roundtrip_compressed_term() {
        let inner = Term::List(TermList::proper(
            (0..50).map(|i| Term::Integer(Integer::from_i64(i))).collect(),
        ));
        let t = Term::Compressed(Box::new(inner.clone()));
        let bytes = encode(&t).unwrap();
        assert_eq!(bytes[1], TAG_COMPRESSED);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, t);
        if let Term::Compressed(boxed) = decoded {
            assert_eq!(*boxed, inner);
        }
    }

    #[test]
    fn decode_rejects_bad_version_byte() {
        let err = decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedVersion(1)));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let err = decode(&[131, 250]).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownTag(250)));
    }

    #[test]
    fn compressed_nesting_beyond_limit_is_rejected() {
        let mut term = Term::Integer(Integer::from_i64(1));
        for _ in 0..=MAX_COMPRESSED_DEPTH {
            term = Term::Compressed(Box::new(term));
        }
        let bytes = encode(&term).unwrap();
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::CompressedTooDeep(_)));
    }
}
