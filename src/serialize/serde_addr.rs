//! `#[serde(with = "serde_addr")]` for addresses: written as `0x`-prefixed
//! lowercase hex strings, which is how everyone reads them anyway.

use std::{fmt, marker::PhantomData};

use serde::{de::Visitor, Deserializer, Serializer};

pub trait AsAddr: Copy {
    fn as_addr(self) -> usize;
}

pub trait FromAddr: Copy {
    fn from_addr(value: usize) -> Self;
}

impl AsAddr for usize {
    fn as_addr(self) -> usize {
        self
    }
}

impl FromAddr for usize {
    fn from_addr(value: usize) -> Self {
        value
    }
}

pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsAddr,
{
    serializer.collect_str(&format_args!("{:#x}", value.as_addr()))
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromAddr,
{
    struct V<Addr>(PhantomData<Addr>);

    impl<'de, Addr> Visitor<'de> for V<Addr>
    where
        Addr: FromAddr,
    {
        type Value = Addr;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a 0x-prefixed hexadecimal address")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let digits = v
                .strip_prefix("0x")
                .ok_or_else(|| E::invalid_value(serde::de::Unexpected::Str(v), &self))?;
            usize::from_str_radix(digits, 16)
                .map(Addr::from_addr)
                .map_err(|_| E::invalid_value(serde::de::Unexpected::Str(v), &self))
        }
    }

    deserializer.deserialize_str(V::<T>(PhantomData))
}
