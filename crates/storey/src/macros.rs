// Generates an ordered set of unique elements backed by an `IndexSet`.
//
// The calling module must import `IndexSet`, `Iter`, `IntoIter`, and
// `DefaultHashBuilder`.
macro_rules! set {
    (
        $(#[$attr:meta])*
        pub struct $name:ident(IndexSet<$ty:ty, DefaultHashBuilder>);
    ) => {
        $(#[$attr])*
        pub struct $name(IndexSet<$ty, DefaultHashBuilder>);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            #[doc = concat!("Creates an empty [`", stringify!($name), "`].")]
            #[must_use]
            #[inline]
            pub fn new() -> Self {
                Self(IndexSet::default())
            }

            #[doc = concat!("Inserts an element into [`", stringify!($name), "`] and returns it.")]
            #[must_use]
            #[inline]
            pub fn insert(mut self, element: $ty) -> Self {
                let _ = self.0.insert(element);
                self
            }

            #[doc = concat!("Adds an element to [`", stringify!($name), "`].")]
            #[inline]
            pub fn add(&mut self, element: $ty) {
                let _ = self.0.insert(element);
            }

            #[doc = concat!("Checks whether [`", stringify!($name), "`] contains the given element.")]
            #[must_use]
            #[inline]
            pub fn contains(&self, element: &$ty) -> bool {
                self.0.contains(element)
            }

            /// Returns the first inserted element, if any.
            #[must_use]
            #[inline]
            pub fn first(&self) -> Option<&$ty> {
                self.0.first()
            }

            /// Returns the number of elements.
            #[must_use]
            #[inline]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            #[doc = concat!("Checks whether [`", stringify!($name), "`] is empty.")]
            #[must_use]
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Returns an iterator over the elements in insertion order.
            #[inline]
            pub fn iter(&self) -> Iter<'_, $ty> {
                self.0.iter()
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = &'a $ty;
            type IntoIter = Iter<'a, $ty>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }

        impl IntoIterator for $name {
            type Item = $ty;
            type IntoIter = IntoIter<$ty>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }
    };
}

pub(crate) use set;
