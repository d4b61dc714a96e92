/// Generates by-value setters for an options table, one per listed field.
macro_rules! builder_setters {
    ($($(#[$attr:meta])* $name:ident : $ty:ty),+ $(,)?) => {$(
        $(#[$attr])*
        #[must_use = "builder setters take the entire structure and return the result"]
        #[inline(always)]
        pub fn $name(mut self, $name: $ty) -> Self {
            self.$name = $name;
            self
        }
    )+};
}
