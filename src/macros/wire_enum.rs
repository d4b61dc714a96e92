/// Defines a fieldless enum with a fixed wire representation and a fallible decoder.
macro_rules! wire_enum {
    (
        $(#[$attr:meta])*
        $vis:vis enum $nm:ident : $repr:ty {
            $($(#[$vattr:meta])* $var:ident = $val:literal),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $nm {
            $($(#[$vattr])* $var = $val,)+
        }
        impl $nm {
            /// Decodes the wire representation, returning `None` for unknown values.
            #[allow(dead_code)]
            pub fn from_wire(raw: $repr) -> Option<Self> {
                match raw {
                    $($val => Some(Self::$var),)+
                    _ => None,
                }
            }
            /// The wire representation.
            #[inline(always)]
            pub fn to_wire(self) -> $repr { self as $repr }
        }
    };
}
