//! Process-wide limits.
//!
//! The kernel consults a single [`Configuration`] table whenever it validates a size supplied by a
//! caller or by a remote peer. The table can be installed once, early, by the embedder; until then
//! (and if it never happens) the defaults apply.

use std::sync::OnceLock;

static CONFIGURATION: OnceLock<Configuration> = OnceLock::new();

/// Returns the installed configuration, or the defaults if none was installed.
pub fn get() -> &'static Configuration { CONFIGURATION.get_or_init(Configuration::new) }

/// A builder for the process-wide limits table.
///
/// ```
/// use handlekit::config::Configuration;
/// let installed = Configuration::new()
///     .max_message_num_bytes(1024 * 1024)
///     .install();
/// # let _ = installed;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) max_message_num_bytes: usize,
    pub(crate) max_message_num_handles: usize,
    pub(crate) max_shared_memory_num_bytes: usize,
    pub(crate) max_mapping_size: usize,
    pub(crate) max_wait_many_num_handles: usize,
}

/// Creation.
impl Configuration {
    /// Creates a table with default values.
    pub const fn new() -> Self {
        Self {
            max_message_num_bytes: 4 * 1024 * 1024,
            max_message_num_handles: 10_000,
            max_shared_memory_num_bytes: 1024 * 1024 * 1024,
            max_mapping_size: 1024 * 1024 * 1024,
            max_wait_many_num_handles: 1_000_000,
        }
    }
    /// Installs the table as the process-wide configuration.
    ///
    /// This can only happen once and must happen before the first handle operation consults the
    /// configuration. If the slot is already taken, the table is handed back.
    pub fn install(self) -> Result<(), Self> { CONFIGURATION.set(self) }
}

/// Option setters.
impl Configuration {
    builder_setters! {
        /// Largest message payload, in bytes, that may be written to a message pipe. Larger
        /// inbound messages are treated as a protocol error.
        ///
        /// The default value is 4 MiB.
        max_message_num_bytes: usize,
        /// Largest number of handles that may be attached to a single message.
        ///
        /// The default value is 10 000.
        max_message_num_handles: usize,
        /// Largest shared buffer that may be created.
        ///
        /// The default value is 1 GiB.
        max_shared_memory_num_bytes: usize,
        /// Largest mapping of a shared buffer that may be requested.
        ///
        /// The default value is 1 GiB.
        max_mapping_size: usize,
        /// Largest number of handles a single [`wait_many`](crate::waiter::wait_many) call may
        /// observe.
        ///
        /// The default value is 1 000 000.
        max_wait_many_num_handles: usize,
    }
}

/// Getters.
impl Configuration {
    /// See the [setter](Self::max_message_num_bytes).
    #[inline]
    pub fn get_max_message_num_bytes(&self) -> usize { self.max_message_num_bytes }
    /// See the [setter](Self::max_message_num_handles).
    #[inline]
    pub fn get_max_message_num_handles(&self) -> usize { self.max_message_num_handles }
    /// See the [setter](Self::max_shared_memory_num_bytes).
    #[inline]
    pub fn get_max_shared_memory_num_bytes(&self) -> usize { self.max_shared_memory_num_bytes }
    /// See the [setter](Self::max_mapping_size).
    #[inline]
    pub fn get_max_mapping_size(&self) -> usize { self.max_mapping_size }
    /// See the [setter](Self::max_wait_many_num_handles).
    #[inline]
    pub fn get_max_wait_many_num_handles(&self) -> usize { self.max_wait_many_num_handles }
}

impl Default for Configuration {
    #[inline]
    fn default() -> Self { Self::new() }
}
