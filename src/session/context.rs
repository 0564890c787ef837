use crate::core::{GateError, Result};

/// Tenant binding for one inbound operation.
///
/// Built from the out-of-band connection id that travels with every request
/// and passed explicitly down the call chain. There is no ambient state to
/// clear afterwards, so a reused worker task can never route a later
/// request to the wrong tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    tenant: Option<String>,
}

impl SessionContext {
    /// Bind a tenant id.
    pub fn bind(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.is_empty() {
            Self::unbound()
        } else {
            Self { tenant: Some(id) }
        }
    }

    /// Context with no tenant; first use fails with `NoTenant`.
    pub fn unbound() -> Self {
        Self { tenant: None }
    }

    /// Build from an optional header-equivalent value.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.trim().is_empty() => Self::bind(v.trim()),
            _ => Self::unbound(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.tenant.is_some()
    }

    /// The bound tenant id, or `NoTenant`.
    pub fn tenant(&self) -> Result<&str> {
        self.tenant.as_deref().ok_or(GateError::NoTenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_context() {
        let ctx = SessionContext::bind("abc");
        assert!(ctx.is_bound());
        assert_eq!(ctx.tenant().unwrap(), "abc");
    }

    #[test]
    fn test_unbound_context_errors() {
        assert!(matches!(
            SessionContext::unbound().tenant(),
            Err(GateError::NoTenant)
        ));
        assert!(matches!(
            SessionContext::bind("").tenant(),
            Err(GateError::NoTenant)
        ));
    }

    #[test]
    fn test_from_header() {
        assert_eq!(
            SessionContext::from_header(Some(" id-1 ")),
            SessionContext::bind("id-1")
        );
        assert!(!SessionContext::from_header(None).is_bound());
        assert!(!SessionContext::from_header(Some("  ")).is_bound());
    }
}
