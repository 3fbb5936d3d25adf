use std::fmt::{Display, Formatter};

/// Stable identity of an operation invoked on a target type.
///
/// `declaring_type` names the type that declares the operation when it differs from the
/// target, e.g. a trait implemented by the target. Two call sites are equal when all three
/// parts are equal, which makes `CallSite` usable as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSite {
    target_type: String,
    method: String,
    declaring_type: Option<String>,
}

impl CallSite {
    pub fn new(target_type: &str, method: &str) -> Self {
        CallSite {
            target_type: target_type.to_string(),
            method: method.to_string(),
            declaring_type: None,
        }
    }

    /// Records the type that declares the operation.
    pub fn declared_in(mut self, declaring_type: &str) -> Self {
        if declaring_type != self.target_type {
            self.declaring_type = Some(declaring_type.to_string());
        }
        self
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The declaring type, `None` when it is the target type itself.
    pub fn declaring_type(&self) -> Option<&str> {
        self.declaring_type.as_deref()
    }

    /// Qualified name used as the default transaction name, e.g. `OrderService.place`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.target_type, self.method)
    }
}

impl Display for CallSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.declaring_type {
            Some(declaring) => write!(f, "{}.{} (declared in {})", self.target_type, self.method, declaring),
            None => write!(f, "{}.{}", self.target_type, self.method),
        }
    }
}
