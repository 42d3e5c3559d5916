use std::{fmt, str::FromStr};

use bitcoin::secp256k1;
#[cfg(any(test, feature = "test-utils"))]
use proptest::{
    arbitrary::{any, Arbitrary},
    strategy::{BoxedStrategy, Strategy},
};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// A simple wrapper around [`secp256k1::PublicKey`] which allows for
/// `Arbitrary` and other custom impls.
///
/// # Notes
///
/// - We do not represent the inner value as `[u8; 33]` (the output of
///   [`secp256k1::PublicKey::serialize`]) because not all `[u8; 33]`s are
///   valid pubkeys.
/// - We use [`PublicKey`]'s [`Serialize`] / [`Deserialize`] / [`FromStr`] /
///   [`fmt::Display`] impls since they call into `secp256k1`, which does the
///   complicated validation required to ensure [`NodePk`] is always valid.
///
/// [`PublicKey`]: secp256k1::PublicKey
#[derive(Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodePk(pub secp256k1::PublicKey);

impl From<secp256k1::PublicKey> for NodePk {
    fn from(pk: secp256k1::PublicKey) -> Self {
        Self(pk)
    }
}

impl FromStr for NodePk {
    type Err = secp256k1::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        secp256k1::PublicKey::from_str(s).map(Self)
    }
}

impl fmt::Display for NodePk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for NodePk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePk({self})")
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Arbitrary for NodePk {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        any::<[u8; 32]>()
            .prop_map(|sk_bytes| {
                let secp = secp256k1::Secp256k1::new();
                let sk = secp256k1::SecretKey::from_slice(&sk_bytes)
                    .unwrap_or_else(|_| secp256k1::SecretKey::from_slice(&[1u8; 32]).unwrap());
                Self(secp256k1::PublicKey::from_secret_key(&secp, &sk))
            })
            .boxed()
    }
}

/// A newtype for the `short_channel_id` (`scid`) used throughout BOLT 7.
///
/// A [`Scid`] is an opaque 64-bit identifier; we don't decompose it into its
/// block height / tx index / output index components because the core sync
/// and payment engines never need to.
#[derive(
    Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd,
)]
#[derive(Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct Scid(pub u64);

impl From<u64> for Scid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Scid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use proptest::proptest;

    use super::*;

    proptest! {
        #[test]
        fn node_pk_display_from_str_roundtrip(node_pk: NodePk) {
            let s = node_pk.to_string();
            let node_pk2 = NodePk::from_str(&s).unwrap();
            assert_eq!(node_pk, node_pk2);
        }

        #[test]
        fn scid_roundtrips_through_u64(x: u64) {
            let scid = Scid::from(x);
            assert_eq!(scid.0, x);
        }
    }
}
