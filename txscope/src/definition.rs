//! Transaction definitions: propagation behavior, isolation level, timeout, read-only hint
//! and a diagnostic name.

use crate::errors::{ErrorKind, TxError, TxResult};
use std::fmt::{Display, Formatter};

/// Timeout marker meaning "use the resource's default timeout".
pub const TIMEOUT_DEFAULT: i32 = -1;

/// How a unit of work relates to a transaction that may already be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Propagation {
    /// Join the current transaction, or start a new one if none exists.
    #[default]
    Required,
    /// Join the current transaction, or run non-transactionally if none exists.
    Supports,
    /// Join the current transaction; fail if none exists.
    Mandatory,
    /// Always start a new transaction, suspending the current one.
    RequiresNew,
    /// Run non-transactionally, suspending the current transaction.
    NotSupported,
    /// Run non-transactionally; fail if a transaction exists.
    Never,
    /// Run in a savepoint of the current transaction, or like `Required` if none exists.
    Nested,
}

impl Propagation {
    pub fn value(&self) -> i32 {
        match self {
            Propagation::Required => 0,
            Propagation::Supports => 1,
            Propagation::Mandatory => 2,
            Propagation::RequiresNew => 3,
            Propagation::NotSupported => 4,
            Propagation::Never => 5,
            Propagation::Nested => 6,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Propagation::Required),
            1 => Some(Propagation::Supports),
            2 => Some(Propagation::Mandatory),
            3 => Some(Propagation::RequiresNew),
            4 => Some(Propagation::NotSupported),
            5 => Some(Propagation::Never),
            6 => Some(Propagation::Nested),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "required",
            Propagation::Supports => "supports",
            Propagation::Mandatory => "mandatory",
            Propagation::RequiresNew => "requires_new",
            Propagation::NotSupported => "not_supported",
            Propagation::Never => "never",
            Propagation::Nested => "nested",
        }
    }
}

impl Display for Propagation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Degree to which concurrent transactions see each other's effects.
///
/// Numeric values follow the conventional JDBC constants, `Default` being `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Isolation {
    /// Use the resource's default isolation level.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Isolation {
    pub fn value(&self) -> i32 {
        match self {
            Isolation::Default => -1,
            Isolation::ReadUncommitted => 1,
            Isolation::ReadCommitted => 2,
            Isolation::RepeatableRead => 4,
            Isolation::Serializable => 8,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Isolation::Default),
            1 => Some(Isolation::ReadUncommitted),
            2 => Some(Isolation::ReadCommitted),
            4 => Some(Isolation::RepeatableRead),
            8 => Some(Isolation::Serializable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Isolation::Default => "default",
            Isolation::ReadUncommitted => "read_uncommitted",
            Isolation::ReadCommitted => "read_committed",
            Isolation::RepeatableRead => "repeatable_read",
            Isolation::Serializable => "serializable",
        }
    }
}

impl Display for Isolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable description of how a unit of work wants to run transactionally.
///
/// Definitions are plain values: they are cloned freely and never changed after
/// construction. Use [`TransactionDefinition::builder`] or
/// [`TransactionDefinitionBuilder::from_definition`] to derive a modified copy.
///
/// # Examples
///
/// ```rust
/// use txscope::definition::{Isolation, Propagation, TransactionDefinition};
///
/// let definition = TransactionDefinition::builder()
///     .propagation(Propagation::RequiresNew)
///     .isolation(Isolation::Serializable)
///     .timeout(30)
///     .name("audit-log")
///     .build()
///     .unwrap();
/// assert_eq!(definition.propagation(), Propagation::RequiresNew);
/// assert_eq!(definition.timeout(), 30);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionDefinition {
    propagation: Propagation,
    isolation: Isolation,
    timeout: i32,
    read_only: bool,
    name: Option<String>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        TransactionDefinition {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            timeout: TIMEOUT_DEFAULT,
            read_only: false,
            name: None,
        }
    }
}

impl TransactionDefinition {
    /// Shorthand for a default definition with the given propagation.
    pub fn with_propagation(propagation: Propagation) -> Self {
        TransactionDefinition {
            propagation,
            ..Default::default()
        }
    }

    pub fn builder() -> TransactionDefinitionBuilder {
        TransactionDefinitionBuilder::new()
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Timeout in seconds, [`TIMEOUT_DEFAULT`] meaning the resource default.
    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Copy of this definition carrying `name`.
    pub(crate) fn named(&self, name: &str) -> Self {
        TransactionDefinition {
            name: Some(name.to_string()),
            ..self.clone()
        }
    }
}

impl Display for TransactionDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PROPAGATION_{},ISOLATION_{}", self.propagation, self.isolation)?;
        if self.timeout != TIMEOUT_DEFAULT {
            write!(f, ",timeout_{}", self.timeout)?;
        }
        if self.read_only {
            write!(f, ",readOnly")?;
        }
        if let Some(name) = &self.name {
            write!(f, ",name={}", name)?;
        }
        Ok(())
    }
}

/// Builder for [`TransactionDefinition`].
///
/// Invalid settings are captured and reported by [`build`](Self::build), so calls can be
/// chained without intermediate error handling.
#[derive(Debug, Default)]
pub struct TransactionDefinitionBuilder {
    error: Option<TxError>,
    definition: TransactionDefinition,
}

impl TransactionDefinitionBuilder {
    pub fn new() -> Self {
        TransactionDefinitionBuilder {
            error: None,
            definition: TransactionDefinition::default(),
        }
    }

    /// Starts from a copy of an existing definition.
    pub fn from_definition(definition: &TransactionDefinition) -> Self {
        TransactionDefinitionBuilder {
            error: None,
            definition: definition.clone(),
        }
    }

    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.definition.propagation = propagation;
        self
    }

    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.definition.isolation = isolation;
        self
    }

    /// Sets the timeout in seconds. Values below [`TIMEOUT_DEFAULT`] are rejected at build time.
    pub fn timeout(mut self, timeout: i32) -> Self {
        if self.error.is_none() && timeout < TIMEOUT_DEFAULT {
            log::error!("Invalid transaction timeout {}", timeout);
            self.error = Some(TxError::new(
                &format!("Invalid transaction timeout: {}", timeout),
                ErrorKind::InvalidTimeout,
            ));
        }
        self.definition.timeout = timeout;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.definition.read_only = read_only;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.definition.name = Some(name.to_string());
        self
    }

    pub fn build(self) -> TxResult<TransactionDefinition> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(self.definition)
    }
}
