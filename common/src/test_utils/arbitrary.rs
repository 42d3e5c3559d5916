use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use lightning::util::ser::Hostname;
use proptest::{
    arbitrary::any,
    strategy::{Strategy},
};

// --- Rust types --- //

/// Like [`any::<String>()`], but generates strings with anywhere from 0 to
/// 256 characters.
///
/// ```
/// use common::test_utils::arbitrary;
/// use proptest_derive::Arbitrary;
///
/// #[derive(Debug, Arbitrary)]
/// struct Foo {
///     #[proptest(strategy = "arbitrary::any_string()")]
///     name: String,
/// }
/// ```
pub fn any_string() -> impl Strategy<Value = String> {
    // Maximum length = 256
    proptest::collection::vec(any::<char>(), 0..256)
        .prop_map(|chars| String::from_iter(chars.into_iter()))
}

/// An [`Option`] version of [`any_string`].
///
/// The option has a 50% probability of being [`Some`].
pub fn any_option_string() -> impl Strategy<Value = Option<String>> {
    proptest::option::weighted(0.5, any_string())
}

/// An `Arbitrary`-like [`Strategy`] for [`SocketAddr`]s which are guaranteed to
/// roundtrip via the `FromStr` / `Display` impls.
///
/// [`SocketAddr`]'s `FromStr` / `Display` impls fail to roundtrip due to the
/// IPv6 flowinfo field (which we don't care about) not being represented in
/// serialized form. To fix this, we simply set the flowinfo field to 0 if we
/// detect that the socket address is an IPv6 address.
pub fn any_socket_addr() -> impl Strategy<Value = SocketAddr> {
    any::<SocketAddr>().prop_map(|mut addr| {
        if let SocketAddr::V6(inner) = &mut addr {
            inner.set_flowinfo(0);
        }
        addr
    })
}

/// An `Arbitrary`-like [`Strategy`] for [`Ipv4Addr`]s.
pub fn any_ipv4_addr() -> impl Strategy<Value = Ipv4Addr> {
    any::<u32>().prop_map(Ipv4Addr::from)
}

/// An `Arbitrary`-like [`Strategy`] for [`Ipv6Addr`]s.
pub fn any_ipv6_addr() -> impl Strategy<Value = Ipv6Addr> {
    any::<u128>().prop_map(Ipv6Addr::from)
}

/// An `Arbitrary`-like [`Strategy`] for a [`Hostname`] that is guaranteed to
/// be valid, non-empty, and at most 255 bytes.
pub fn any_hostname() -> impl Strategy<Value = Hostname> {
    proptest::collection::vec(
        proptest::char::range('a', 'z'),
        1..64,
    )
    .prop_map(|chars| {
        let s: String = chars.into_iter().collect();
        Hostname::try_from(s).expect("only contains [a-z], always valid")
    })
}
