//! HashMap and HashSet aliases using the `rustc-hash` hasher, which is much
//! faster than the default SipHash for the small keys the IR maps over.

pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
