/// Declares a transparent newtype over a primitive id.
///
/// The generated type derives the comparison, hashing and serde traits of the
/// inner value, derefs to it, converts both ways with `From`, and prints as
/// `Name(value)` under `Debug` and as the bare value under `Display`.
#[macro_export]
macro_rules! strong_type {
    ($name:ident, $inner:ty) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            #[inline]
            pub const fn new(val: $inner) -> Self {
                Self(val)
            }

            #[inline]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    strong_type!(HandleId, u32);

    #[test]
    fn test_new_and_get() {
        const H: HandleId = HandleId::new(9);
        assert_eq!(H.get(), 9);
        assert_eq!(*H, 9u32);
    }

    #[test]
    fn test_conversions() {
        let h: HandleId = 100u32.into();
        let raw: u32 = h.into();
        assert_eq!(raw, 100);
    }

    #[test]
    fn test_formatting() {
        let h = HandleId(7);
        assert_eq!(h.to_string(), "7");
        assert_eq!(format!("{:?}", h), "HandleId(7)");
    }

    #[test]
    fn test_ordered_set() {
        let set: BTreeSet<HandleId> = [HandleId(3), HandleId(1), HandleId(3)].into_iter().collect();
        assert_eq!(set.into_iter().map(HandleId::get).collect::<Vec<_>>(), vec![1, 3]);
    }
}
