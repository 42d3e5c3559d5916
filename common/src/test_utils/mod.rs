/// Proptest `Arbitrary`-like strategies for types we can't derive `Arbitrary`
/// for directly (foreign types, or types with non-trivial invariants).
pub mod arbitrary;
/// Quickly create roundtrip proptests for various serialization schemes.
pub mod roundtrip;
