//! The term value model (spec §3/§4.1): a closed sum type mirroring the
//! Erlang external term format, plus the handful of custom equality/hash
//! rules the wire format demands (pid/port/ref creation masking, old vs.
//! new reference comparison, atom interning).

use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Sign of an arbitrary-precision integer magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    Positive,
    Negative,
}

/// Arbitrary-precision integer that collapses to a 64-bit fast path whenever
/// the value fits, so two `Integer`s built from different tags (smallInt,
/// int, smallBig, largeBig) but the same numeric value compare and hash
/// equal.
#[derive(Debug, Clone)]
pub enum Integer {
    Small(i64),
    Big(BigInt),
}

/// Little-endian magnitude, trimmed of trailing zero bytes. Only
/// constructed for values that don't fit in an `i64`.
#[derive(Debug, Clone)]
pub struct BigInt {
    pub sign: Sign,
    pub magnitude: Vec<u8>,
}

impl Integer {
    pub fn from_i64(v: i64) -> Self {
        Integer::Small(v)
    }

    /// Build from a sign and a little-endian magnitude, normalizing to the
    /// `Small` fast path when the value fits in an `i64`.
    pub fn from_sign_magnitude(sign: Sign, mut magnitude: Vec<u8>) -> Self {
        while magnitude.last() == Some(&0) {
            magnitude.pop();
        }
        if magnitude.len() <= 8 {
            let mut buf = [0u8; 8];
            buf[..magnitude.len()].copy_from_slice(&magnitude);
            let unsigned = u64::from_le_bytes(buf);
            let fits = match sign {
                Sign::Positive => unsigned <= i64::MAX as u64,
                Sign::Negative => unsigned <= (i64::MAX as u64) + 1,
            };
            if fits {
                let value = match sign {
                    Sign::Positive => unsigned as i64,
                    Sign::Negative => {
                        if unsigned == (i64::MAX as u64) + 1 {
                            i64::MIN
                        } else {
                            -(unsigned as i64)
                        }
                    }
                };
                return Integer::Small(value);
            }
        }
        Integer::Big(BigInt { sign, magnitude })
    }

    /// Sign and little-endian magnitude bytes, computed uniformly for both
    /// variants. Used by the codec to pick smallInt/int/smallBig/largeBig.
    pub fn sign_magnitude(&self) -> (Sign, Vec<u8>) {
        match self {
            Integer::Small(v) => {
                let sign = if *v < 0 { Sign::Negative } else { Sign::Positive };
                let unsigned = v.unsigned_abs();
                let mut magnitude = unsigned.to_le_bytes().to_vec();
                while magnitude.last() == Some(&0) {
                    magnitude.pop();
                }
                (sign, magnitude)
            }
            Integer::Big(b) => (b.sign, b.magnitude.clone()),
        }
    }

    pub fn is_non_negative_byte(&self) -> Option<u8> {
        match self {
            Integer::Small(v) if (0..=255).contains(v) => Some(*v as u8),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Integer::Small(v) if *v >= i32::MIN as i64 && *v <= i32::MAX as i64 => Some(*v as i32),
            _ => None,
        }
    }
}

impl PartialEq for Integer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Integer::Small(a), Integer::Small(b)) => a == b,
            _ => {
                let (sa, ma) = self.sign_magnitude();
                let (sb, mb) = other.sign_magnitude();
                if ma.is_empty() && mb.is_empty() {
                    true
                } else {
                    sa == sb && ma == mb
                }
            }
        }
    }
}
impl Eq for Integer {}

impl Hash for Integer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (sign, magnitude) = self.sign_magnitude();
        if !magnitude.is_empty() {
            sign.hash(state);
        }
        magnitude.hash(state);
    }
}

/// Latin-1 atom, at most 255 bytes. Common atoms are interned so repeated
/// construction of e.g. `ok`/`error`/`undefined` doesn't reallocate.
#[derive(Debug, Clone)]
pub struct Atom(Arc<str>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AtomError {
    #[error("atom name is {size} bytes, exceeds the 255-byte limit")]
    TooLong { size: usize },
    #[error("atom name contains a code point above 255 at byte offset {offset}")]
    NotLatin1 { offset: usize },
}

fn interned_atoms() -> &'static [&'static str] {
    &[
        "ok", "error", "true", "false", "nil", "undefined", "normal", "shutdown", "infinity",
        "badarg", "badarith", "badmatch", "noproc", "timeout",
    ]
}

impl Atom {
    pub fn new(name: impl AsRef<str>) -> Result<Self, AtomError> {
        let name = name.as_ref();
        if name.len() > 255 {
            return Err(AtomError::TooLong { size: name.len() });
        }
        for (offset, ch) in name.char_indices() {
            if ch as u32 > 255 {
                return Err(AtomError::NotLatin1 { offset });
            }
        }
        if let Some(existing) = interned_atoms().iter().find(|candidate| **candidate == name) {
            return Ok(Atom(Arc::from(*existing)));
        }
        Ok(Atom(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn boolean(value: bool) -> Self {
        Atom::new(if value { "true" } else { "false" }).expect("boolean atoms are valid")
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}
impl Eq for Atom {}
impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bitstring whose length isn't a whole number of bytes: the final byte
/// carries only `8 - pad_bits` significant high bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bitstring {
    pub bytes: Vec<u8>,
    pub pad_bits: u8,
}

/// Possibly-improper list: `tail` is `None` for a proper list (implicit
/// `nil` tail), `Some(term)` for an improper list whose final cdr is not
/// `nil`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct List {
    pub elements: Vec<Term>,
    pub tail: Option<Box<Term>>,
}

impl List {
    pub fn proper(elements: Vec<Term>) -> Self {
        List { elements, tail: None }
    }

    pub fn is_proper(&self) -> bool {
        self.tail.is_none()
    }

    /// `getNthTail`: the list obtained by dropping the first `n` elements,
    /// as a `Term` (another list, or the improper tail if `n` reaches the
    /// end of `elements`).
    pub fn nth_tail(&self, n: usize) -> Term {
        if n >= self.elements.len() {
            return match &self.tail {
                Some(t) => (**t).clone(),
                None => Term::List(List::proper(Vec::new())),
            };
        }
        Term::List(List {
            elements: self.elements[n..].to_vec(),
            tail: self.tail.clone(),
        })
    }
}

/// A process identifier. `id`/`serial`/`creation` are stored already masked
/// to their significant widths (15/13/2 bits) so equality is a plain field
/// comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pid {
    pub node: Atom,
    pub id: u32,
    pub serial: u32,
    pub creation: u8,
}

impl Pid {
    pub fn new(node: Atom, id: u32, serial: u32, creation: u8) -> Self {
        Pid {
            node,
            id: id & 0x7fff,
            serial: serial & 0x1fff,
            creation: creation & 0x3,
        }
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}.{}.{}>", self.id, self.serial, self.creation)
    }
}

/// A port identifier; `id` is masked to 28 significant bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port {
    pub node: Atom,
    pub id: u32,
    pub creation: u8,
}

impl Port {
    pub fn new(node: Atom, id: u32, creation: u8) -> Self {
        Port {
            node,
            id: id & 0x0fff_ffff,
            creation: creation & 0x3,
        }
    }
}

/// A reference. `ids` holds either one word (old-style `REFERENCE_EXT`) or
/// three (new-style `NEW_REFERENCE_EXT`); the first word is masked to 18
/// significant bits the way OTP masks it on the wire.
#[derive(Debug, Clone)]
pub struct Reference {
    pub node: Atom,
    pub creation: u8,
    pub ids: Vec<u32>,
}

impl Reference {
    pub fn new_old(node: Atom, id: u32, creation: u8) -> Self {
        Reference {
            node,
            creation: creation & 0x3,
            ids: vec![id & 0x3_ffff],
        }
    }

    pub fn new_new(node: Atom, creation: u8, mut ids: [u32; 3]) -> Self {
        ids[0] &= 0x3_ffff;
        Reference {
            node,
            creation: creation & 0x3,
            ids: ids.to_vec(),
        }
    }
}

/// Two refs are equal iff `(node, creation, first-id)` match; when both are
/// new-style (three id words) all three must match. This lets an old-style
/// ref sent by a legacy peer compare equal to the new-style ref this crate
/// holds for the same logical reference.
impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        if self.node != other.node || self.creation != other.creation {
            return false;
        }
        if self.ids.len() == 3 && other.ids.len() == 3 {
            self.ids == other.ids
        } else {
            self.ids.first() == other.ids.first()
        }
    }
}
impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
        self.creation.hash(state);
        self.ids.first().hash(state);
    }
}

/// A fun closure value: either a pre-R6 `FUN_EXT` (`new_fun: false`, no
/// arity/md5/old_index) or a `NEW_FUN_EXT` (`new_fun: true`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fun {
    pub new_fun: bool,
    pub arity: u8,
    pub uniq: [u8; 16],
    pub index: u32,
    pub old_index: u32,
    pub module: Atom,
    pub pid: Pid,
    pub free_vars: Vec<Term>,
}

/// `EXPORT_EXT`: a reference to an exported function, not a closure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalFun {
    pub module: Atom,
    pub function: Atom,
    pub arity: u8,
}

/// The term value. `Compressed` is preserved as its own variant (rather
/// than transparently unwrapped on decode) so `decode(encode(t)) == t`
/// holds for a term that was explicitly constructed as compressed.
#[derive(Debug, Clone)]
pub enum Term {
    Integer(Integer),
    Float(f64),
    Atom(Atom),
    String(Vec<u32>),
    Binary(Vec<u8>),
    Bitstring(Bitstring),
    Tuple(Vec<Term>),
    List(List),
    Pid(Pid),
    Port(Port),
    Reference(Reference),
    Fun(Fun),
    ExternalFun(ExternalFun),
    Compressed(Box<Term>),
}

impl Term {
    pub fn boolean(value: bool) -> Self {
        Term::Atom(Atom::boolean(value))
    }

    pub fn nil() -> Self {
        Term::List(List::proper(Vec::new()))
    }

    pub fn atom(name: impl AsRef<str>) -> Result<Self, AtomError> {
        Ok(Term::Atom(Atom::new(name)?))
    }

    pub fn string(text: &str) -> Self {
        Term::String(text.chars().map(|c| c as u32).collect())
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Term::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_pid(&self) -> Option<&Pid> {
        match self {
            Term::Pid(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&Integer> {
        match self {
            Term::Integer(i) => Some(i),
            _ => None,
        }
    }
}

/// A list of small integers is never equal to the `String` built from the
/// same code points; the variant discriminant participates in equality.
impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Integer(a), Term::Integer(b)) => a == b,
            (Term::Float(a), Term::Float(b)) => a.to_bits() == b.to_bits(),
            (Term::Atom(a), Term::Atom(b)) => a == b,
            (Term::String(a), Term::String(b)) => a == b,
            (Term::Binary(a), Term::Binary(b)) => a == b,
            (Term::Bitstring(a), Term::Bitstring(b)) => a == b,
            (Term::Tuple(a), Term::Tuple(b)) => a == b,
            (Term::List(a), Term::List(b)) => a == b,
            (Term::Pid(a), Term::Pid(b)) => a == b,
            (Term::Port(a), Term::Port(b)) => a == b,
            (Term::Reference(a), Term::Reference(b)) => a == b,
            (Term::Fun(a), Term::Fun(b)) => a == b,
            (Term::ExternalFun(a), Term::ExternalFun(b)) => a == b,
            (Term::Compressed(a), Term::Compressed(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Term {}

/// Hash mixes in a per-variant discriminant first so e.g. an empty tuple
/// and an empty list (both structurally "no elements") hash differently.
impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Term::Integer(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Term::Float(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Term::Atom(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Term::String(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Term::Binary(v) => {
                4u8.hash(state);
                v.hash(state);
            }
            Term::Bitstring(v) => {
                5u8.hash(state);
                v.hash(state);
            }
            Term::Tuple(v) => {
                6u8.hash(state);
                v.hash(state);
            }
            Term::List(v) => {
                7u8.hash(state);
                v.hash(state);
            }
            Term::Pid(v) => {
                8u8.hash(state);
                v.hash(state);
            }
            Term::Port(v) => {
                9u8.hash(state);
                v.hash(state);
            }
            Term::Reference(v) => {
                10u8.hash(state);
                v.hash(state);
            }
            Term::Fun(v) => {
                11u8.hash(state);
                v.hash(state);
            }
            Term::ExternalFun(v) => {
                12u8.hash(state);
                v.hash(state);
            }
            Term::Compressed(v) => {
                13u8.hash(state);
                v.hash(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_interns_common_names() {
        let a = Atom::new("ok").unwrap();
        let b = Atom::new("ok").unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn atom_rejects_too_long() {
        let name: String = std::iter::repeat('a').take(256).collect();
        assert!(matches!(Atom::new(name), Err(AtomError::TooLong { size: 256 })));
    }

    #[test]
    fn integer_collapses_bignum_that_fits_i64() {
        let small = Integer::from_i64(1000);
        let (sign, magnitude) = small.sign_magnitude();
        let big = Integer::from_sign_magnitude(sign, magnitude);
        assert_eq!(small, big);
        assert!(matches!(big, Integer::Small(1000)));
    }

    #[test]
    fn integer_big_roundtrips_and_preserves_sign() {
        let magnitude = vec![0u8, 0, 0, 0, 0, 0, 0, 0, 1];
        let big = Integer::from_sign_magnitude(Sign::Negative, magnitude.clone());
        assert!(matches!(big, Integer::Big(_)));
        let (sign, roundtripped) = big.sign_magnitude();
        assert_eq!(sign, Sign::Negative);
        assert_eq!(roundtripped, magnitude);
    }

    #[test]
    fn string_and_list_of_same_codepoints_are_not_equal() {
        let s = Term::string("ab");
        let l = Term::List(List::proper(vec![
            Term::Integer(Integer::from_i64(97)),
            Term::Integer(Integer::from_i64(98)),
        ]));
        assert_ne!(s, l);
    }

    #[test]
    fn reference_old_style_matches_new_style_on_first_id() {
        let node = Atom::new("a@b").unwrap();
        let old = Reference::new_old(node.clone(), 42, 1);
        let new = Reference::new_new(node, 1, [42, 7, 9]);
        assert_eq!(old, new);
    }

    #[test]
    fn reference_two_new_style_require_all_ids() {
        let node = Atom::new("a@b").unwrap();
        let a = Reference::new_new(node.clone(), 1, [42, 7, 9]);
        let b = Reference::new_new(node, 1, [42, 7, 10]);
        assert_ne!(a, b);
    }

    #[test]
    fn list_nth_tail_on_proper_list() {
        let list = List::proper(vec![
            Term::Integer(Integer::from_i64(1)),
            Term::Integer(Integer::from_i64(2)),
            Term::Integer(Integer::from_i64(3)),
        ]);
        assert_eq!(list.nth_tail(3), Term::nil());
        assert!(matches!(list.nth_tail(1), Term::List(l) if l.elements.len() == 2));
    }
}
