//! The term model and external term format codec (spec components C1/C2).

mod codec;
mod value;

pub use codec::{decode, decode_one, encode, encode_term, DecodeError, EncodeError, MAX_COMPRESSED_DEPTH, VERSION};
pub use value::{
    Atom, AtomError, BigInt, Bitstring, ExternalFun, Fun, Integer, List, Pid, Port, Reference, Sign, Term,
};
