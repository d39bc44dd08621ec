//! Dense integer keys into the arenas that make up the object graph. Passes that run in parallel
//! partition work by key ranges, so keys must convert losslessly to and from `usize`.

pub(crate) trait ShardKey: Copy + Eq {
    fn as_usize(self) -> usize;

    fn from_usize(raw: usize) -> Self;
}

/// Defines a u32-backed id type together with its `ShardKey` impl.
macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(u32);

        impl $crate::sharding::ShardKey for $name {
            fn as_usize(self) -> usize {
                self.0 as usize
            }

            fn from_usize(raw: usize) -> Self {
                debug_assert!(raw <= u32::MAX as usize);
                Self(raw as u32)
            }
        }
    };
}

pub(crate) use define_id_type;
